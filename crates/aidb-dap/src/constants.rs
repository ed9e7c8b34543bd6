//! DAP protocol constants

/// DAP event types received from debug adapters
pub mod events {
    pub const INITIALIZED: &str = "initialized";
    pub const STOPPED: &str = "stopped";
    pub const CONTINUED: &str = "continued";
    pub const EXITED: &str = "exited";
    pub const TERMINATED: &str = "terminated";
    pub const THREAD: &str = "thread";
    pub const OUTPUT: &str = "output";
    pub const BREAKPOINT: &str = "breakpoint";
    pub const PROCESS: &str = "process";
}

/// DAP request command names
pub mod requests {
    pub const INITIALIZE: &str = "initialize";
    pub const LAUNCH: &str = "launch";
    pub const ATTACH: &str = "attach";
    pub const CONFIGURATION_DONE: &str = "configurationDone";
    pub const SET_BREAKPOINTS: &str = "setBreakpoints";
    pub const SET_FUNCTION_BREAKPOINTS: &str = "setFunctionBreakpoints";
    pub const CONTINUE: &str = "continue";
    pub const NEXT: &str = "next";
    pub const STEP_IN: &str = "stepIn";
    pub const STEP_OUT: &str = "stepOut";
    pub const PAUSE: &str = "pause";
    pub const RESTART: &str = "restart";
    pub const THREADS: &str = "threads";
    pub const STACK_TRACE: &str = "stackTrace";
    pub const SCOPES: &str = "scopes";
    pub const VARIABLES: &str = "variables";
    pub const EVALUATE: &str = "evaluate";
    pub const DISCONNECT: &str = "disconnect";
    pub const TERMINATE: &str = "terminate";
}

/// Requests an adapter sends to the client
pub mod reverse_requests {
    pub const RUN_IN_TERMINAL: &str = "runInTerminal";
    pub const START_DEBUGGING: &str = "startDebugging";
}

/// Stopped event reasons
pub mod stop_reasons {
    pub const BREAKPOINT: &str = "breakpoint";
    pub const STEP: &str = "step";
    pub const PAUSE: &str = "pause";
    pub const EXCEPTION: &str = "exception";
    pub const ENTRY: &str = "entry";
}

/// Output event categories
pub mod output_categories {
    pub const STDOUT: &str = "stdout";
    pub const STDERR: &str = "stderr";
    pub const CONSOLE: &str = "console";
    pub const TELEMETRY: &str = "telemetry";
}

/// Fallbacks for optional fields adapters leave out
pub mod defaults {
    /// Thread used when a `stopped` event omits `threadId`
    pub const THREAD_ID: i64 = 1;

    /// `clientID` sent in `initialize`
    pub const CLIENT_ID: &str = "aidb";

    pub const CLIENT_NAME: &str = "aidb";
}
