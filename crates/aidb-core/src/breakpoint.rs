//! Breakpoint specifications

use serde::{Deserialize, Serialize};

/// A breakpoint requested by the caller for one line of a source file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BreakpointSpec {
    /// 1-based line number
    pub line: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    /// Only break when this expression is true
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    /// Break after the expression's number of hits (e.g. ">= 3")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hit_condition: Option<String>,
    /// Log this message instead of stopping
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_message: Option<String>,
}

impl BreakpointSpec {
    pub fn at_line(line: u32) -> Self {
        Self {
            line,
            column: None,
            condition: None,
            hit_condition: None,
            log_message: None,
        }
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    pub fn with_hit_condition(mut self, hit_condition: impl Into<String>) -> Self {
        self.hit_condition = Some(hit_condition.into());
        self
    }

    pub fn with_log_message(mut self, message: impl Into<String>) -> Self {
        self.log_message = Some(message.into());
        self
    }

    pub fn is_logpoint(&self) -> bool {
        self.log_message.is_some()
    }
}

/// A breakpoint as the adapter reported it back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedBreakpoint {
    pub spec: BreakpointSpec,
    /// Adapter-assigned id, referenced by `stopped` events
    pub id: Option<i64>,
    pub verified: bool,
    /// Line the adapter actually bound to, when it moved the breakpoint
    pub actual_line: Option<u32>,
    pub message: Option<String>,
}

impl VerifiedBreakpoint {
    /// Placeholder for a breakpoint that has not been sent to the adapter yet
    pub fn pending(spec: BreakpointSpec) -> Self {
        Self {
            spec,
            id: None,
            verified: false,
            actual_line: None,
            message: None,
        }
    }

    pub fn line(&self) -> u32 {
        self.actual_line.unwrap_or(self.spec.line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let bp = BreakpointSpec::at_line(12)
            .with_condition("x > 1")
            .with_hit_condition("3");
        assert_eq!(bp.line, 12);
        assert_eq!(bp.condition.as_deref(), Some("x > 1"));
        assert!(!bp.is_logpoint());
    }

    #[test]
    fn test_deserialize_minimal() {
        let bp: BreakpointSpec = serde_json::from_str(r#"{"line": 4}"#).unwrap();
        assert_eq!(bp, BreakpointSpec::at_line(4));
    }

    #[test]
    fn test_verified_line_prefers_actual() {
        let mut bp = VerifiedBreakpoint::pending(BreakpointSpec::at_line(10));
        assert_eq!(bp.line(), 10);
        bp.actual_line = Some(11);
        assert_eq!(bp.line(), 11);
    }
}
