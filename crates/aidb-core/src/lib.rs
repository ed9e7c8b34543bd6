//! aidb Core - shared domain types
//!
//! This crate holds the vocabulary every other aidb crate speaks:
//!
//! - `error` - service-level error taxonomy with stable codes and categories
//! - `language` - debuggee languages
//! - `session` - session identifiers
//! - `breakpoint` - user-facing breakpoint specifications
//!
//! It has no async or infrastructure dependencies.

pub mod breakpoint;
pub mod error;
pub mod language;
pub mod session;

pub use breakpoint::{BreakpointSpec, VerifiedBreakpoint};
pub use error::{Error, ErrorCategory, ErrorCode, Result};
pub use language::{Language, ParseLanguageError};
pub use session::SessionId;
