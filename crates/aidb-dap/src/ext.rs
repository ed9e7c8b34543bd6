//! Result helpers for best-effort paths.
//!
//! Cleanup and inspection code often wants "log and carry on" instead of
//! propagating. These keep that pattern to one call.

/// Log-and-discard conversion for results whose failure is not fatal.
pub trait LogResult<T> {
    /// Convert to `Option`, logging the error at debug level.
    fn debug_ok(self, context: &str) -> Option<T>;

    /// Convert to `Option`, logging the error at warn level. Use on cleanup
    /// paths where a failure leaks a resource.
    fn warn_ok(self, context: &str) -> Option<T>;
}

impl<T, E: std::fmt::Display> LogResult<T> for Result<T, E> {
    fn debug_ok(self, context: &str) -> Option<T> {
        match self {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::debug!("{}: {}", context, e);
                None
            }
        }
    }

    fn warn_ok(self, context: &str) -> Option<T> {
        match self {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!("{}: {}", context, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ok_passes_through() {
        let result: Result<i32, &str> = Ok(7);
        assert_eq!(result.debug_ok("ctx"), Some(7));
        let result: Result<i32, &str> = Ok(8);
        assert_eq!(result.warn_ok("ctx"), Some(8));
    }

    #[test]
    fn test_err_becomes_none() {
        let result: Result<i32, &str> = Err("boom");
        assert_eq!(result.debug_ok("ctx"), None);
        let result: Result<i32, &str> = Err("boom");
        assert_eq!(result.warn_ok("ctx"), None);
    }
}
