//! Inspection results handed back to callers

use aidb_dap::{DapScope, DapStackFrame, DapThread, DapVariable, EvaluateResponseBody};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InspectTarget {
    Locals,
    Globals,
    Stack,
    Threads,
    /// Every category above, gathered independently
    All,
}

impl InspectTarget {
    /// The categories `All` expands to, in gathering order
    pub const CATEGORIES: [InspectTarget; 4] = [Self::Threads, Self::Stack, Self::Locals, Self::Globals];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Locals => "locals",
            Self::Globals => "globals",
            Self::Stack => "stack",
            Self::Threads => "threads",
            Self::All => "all",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadInfo {
    pub id: i64,
    pub name: String,
}

impl From<DapThread> for ThreadInfo {
    fn from(thread: DapThread) -> Self {
        Self {
            id: thread.id,
            name: thread.name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackFrame {
    pub id: i64,
    pub name: String,
    pub file: Option<String>,
    pub line: i64,
    pub column: i64,
}

impl From<DapStackFrame> for StackFrame {
    fn from(frame: DapStackFrame) -> Self {
        Self {
            id: frame.id,
            name: frame.name,
            file: frame.source.and_then(|s| s.path.or(s.name)),
            line: frame.line,
            column: frame.column,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    pub value: String,
    pub type_name: Option<String>,
    /// Non-zero when the value has children to expand
    pub variables_reference: i64,
}

impl Variable {
    pub fn has_children(&self) -> bool {
        self.variables_reference > 0
    }
}

impl From<DapVariable> for Variable {
    fn from(variable: DapVariable) -> Self {
        Self {
            name: variable.name,
            value: variable.value,
            type_name: variable.var_type,
            variables_reference: variable.variables_reference,
        }
    }
}

/// Result of `evaluate`. An expression the adapter could not evaluate is
/// reported in `error`; it is not a failed call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub value: String,
    pub type_name: Option<String>,
    pub has_children: bool,
    pub variables_reference: i64,
    pub error: Option<String>,
}

impl EvaluationResult {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            value: String::new(),
            type_name: None,
            has_children: false,
            variables_reference: 0,
            error: Some(message.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

impl From<EvaluateResponseBody> for EvaluationResult {
    fn from(body: EvaluateResponseBody) -> Self {
        Self {
            value: body.result,
            type_name: body.result_type,
            has_children: body.variables_reference > 0,
            variables_reference: body.variables_reference,
            error: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InspectFailure {
    pub target: InspectTarget,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InspectionReport {
    pub threads: Option<Vec<ThreadInfo>>,
    pub stack: Option<Vec<StackFrame>>,
    pub locals: Option<Vec<Variable>>,
    pub globals: Option<Vec<Variable>>,
    pub failures: Vec<InspectFailure>,
}

impl InspectionReport {
    pub fn succeeded(&self) -> Vec<InspectTarget> {
        let mut done = Vec::new();
        if self.threads.is_some() {
            done.push(InspectTarget::Threads);
        }
        if self.stack.is_some() {
            done.push(InspectTarget::Stack);
        }
        if self.locals.is_some() {
            done.push(InspectTarget::Locals);
        }
        if self.globals.is_some() {
            done.push(InspectTarget::Globals);
        }
        done
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

fn scope_is_global(scope: &DapScope) -> bool {
    let name = scope.name.to_ascii_lowercase();
    name == "globals" || name == "global"
}

/// Pick the scope holding a frame's local variables.
///
/// Adapters disagree on naming ("Locals", "Local", "Local: main"); prefer the
/// `locals` presentation hint, then the name, then the first cheap scope that
/// is not the global one.
pub(crate) fn locals_scope(scopes: &[DapScope]) -> Option<&DapScope> {
    scopes
        .iter()
        .find(|s| s.presentation_hint.as_deref() == Some("locals"))
        .or_else(|| {
            scopes
                .iter()
                .find(|s| s.name.to_ascii_lowercase().starts_with("local"))
        })
        .or_else(|| {
            scopes
                .iter()
                .find(|s| !scope_is_global(s) && !s.expensive.unwrap_or(false))
        })
}

pub(crate) fn globals_scope(scopes: &[DapScope]) -> Option<&DapScope> {
    scopes.iter().find(|s| scope_is_global(s))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope(name: &str, hint: Option<&str>, reference: i64) -> DapScope {
        DapScope {
            name: name.to_string(),
            presentation_hint: hint.map(str::to_string),
            variables_reference: reference,
            named_variables: None,
            expensive: None,
        }
    }

    #[test]
    fn test_locals_prefers_hint() {
        let scopes = vec![
            scope("Block", None, 1),
            scope("Local: main", Some("locals"), 2),
            scope("Global", None, 3),
        ];
        assert_eq!(locals_scope(&scopes).unwrap().variables_reference, 2);
        assert_eq!(globals_scope(&scopes).unwrap().variables_reference, 3);
    }

    #[test]
    fn test_locals_by_name_then_first_cheap() {
        let scopes = vec![scope("Globals", None, 9), scope("Locals", None, 4)];
        assert_eq!(locals_scope(&scopes).unwrap().variables_reference, 4);

        let java = vec![scope("Local", None, 5)];
        assert_eq!(locals_scope(&java).unwrap().variables_reference, 5);
        assert!(globals_scope(&java).is_none());

        let mut expensive = scope("Registers", None, 6);
        expensive.expensive = Some(true);
        let scopes = vec![expensive, scope("Closure", None, 7)];
        assert_eq!(locals_scope(&scopes).unwrap().variables_reference, 7);
    }

    #[test]
    fn test_report_lists_successes() {
        let report = InspectionReport {
            stack: Some(Vec::new()),
            locals: Some(Vec::new()),
            failures: vec![InspectFailure {
                target: InspectTarget::Globals,
                error: "no globals scope".to_string(),
            }],
            ..InspectionReport::default()
        };
        assert_eq!(
            report.succeeded(),
            vec![InspectTarget::Stack, InspectTarget::Locals]
        );
        assert!(!report.is_complete());
    }

    #[test]
    fn test_evaluation_result_from_body() {
        let result = EvaluationResult::from(EvaluateResponseBody {
            result: "[1, 2]".to_string(),
            result_type: Some("list".to_string()),
            variables_reference: 12,
        });
        assert!(result.is_ok());
        assert!(result.has_children);
    }
}
