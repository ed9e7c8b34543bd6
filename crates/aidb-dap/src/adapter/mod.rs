//! Starting and connecting to debug adapters

pub mod connection;
mod launcher;
mod spec;

pub use launcher::{AdapterLauncher, LaunchedAdapter, ProcessAdapterLauncher};
pub use spec::{substitute_port, AdapterEndpoint, AdapterSpec, PORT_PLACEHOLDER};
