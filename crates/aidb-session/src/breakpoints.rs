//! Per-file breakpoint sets.
//!
//! DAP replaces all breakpoints of a file with every `setBreakpoints`, so the
//! session keeps the full set per file and always sends all of it. Files are
//! kept in the order they were first touched, which is also the order the
//! handshake flushes them in.

use aidb_core::{BreakpointSpec, Error, Result, VerifiedBreakpoint};
use aidb_dap::{capability_names, Breakpoint, Capabilities};

#[derive(Debug, Clone)]
pub(crate) struct FileBreakpoints {
    path: String,
    /// Sorted by requested line
    breakpoints: Vec<VerifiedBreakpoint>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct BreakpointStore {
    files: Vec<FileBreakpoints>,
    functions: Vec<String>,
    /// Set once the handshake has flushed; after that changes go straight out
    configured: bool,
}

impl BreakpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_configured(&self) -> bool {
        self.configured
    }

    pub fn mark_configured(&mut self) {
        self.configured = true;
    }

    fn entry_mut(&mut self, path: &str) -> &mut FileBreakpoints {
        let index = match self.files.iter().position(|f| f.path == path) {
            Some(index) => index,
            None => {
                self.files.push(FileBreakpoints {
                    path: path.to_string(),
                    breakpoints: Vec::new(),
                });
                self.files.len() - 1
            }
        };
        &mut self.files[index]
    }

    fn entry(&self, path: &str) -> Option<&FileBreakpoints> {
        self.files.iter().find(|f| f.path == path)
    }

    /// Merge `specs` into the file's set (same line replaces) and return
    /// the whole set to send
    pub fn merge(&mut self, path: &str, specs: &[BreakpointSpec]) -> Vec<BreakpointSpec> {
        let entry = self.entry_mut(path);
        for spec in specs {
            let pending = VerifiedBreakpoint::pending(spec.clone());
            match entry
                .breakpoints
                .binary_search_by_key(&spec.line, |bp| bp.spec.line)
            {
                Ok(i) => entry.breakpoints[i] = pending,
                Err(i) => entry.breakpoints.insert(i, pending),
            }
        }
        self.specs(path)
    }

    /// Drop the given lines. `None` when the file has no breakpoints.
    pub fn remove_lines(&mut self, path: &str, lines: &[u32]) -> Option<Vec<BreakpointSpec>> {
        self.entry(path)?;
        let entry = self.entry_mut(path);
        entry.breakpoints.retain(|bp| !lines.contains(&bp.spec.line));
        Some(self.specs(path))
    }

    /// Empty the file's set. Returns whether the file had an entry.
    pub fn clear(&mut self, path: &str) -> bool {
        match self.files.iter_mut().find(|f| f.path == path) {
            Some(entry) => {
                entry.breakpoints.clear();
                true
            }
            None => false,
        }
    }

    pub fn specs(&self, path: &str) -> Vec<BreakpointSpec> {
        self.entry(path)
            .map(|f| f.breakpoints.iter().map(|bp| bp.spec.clone()).collect())
            .unwrap_or_default()
    }

    pub fn verified(&self, path: &str) -> Vec<VerifiedBreakpoint> {
        self.entry(path)
            .map(|f| f.breakpoints.clone())
            .unwrap_or_default()
    }

    /// Replace the file's set with what the adapter reported. The file
    /// keeps its place in the order even when the set is now empty.
    pub fn apply_verified(&mut self, path: &str, verified: Vec<VerifiedBreakpoint>) {
        self.entry_mut(path).breakpoints = verified;
    }

    /// Copy of one file's entry, for [`restore_file`](Self::restore_file)
    pub fn file_snapshot(&self, path: &str) -> Option<FileBreakpoints> {
        self.entry(path).cloned()
    }

    /// Put back a file's entry taken with `file_snapshot`. Other files are
    /// left alone so concurrent `breakpoint` events are not lost.
    pub fn restore_file(&mut self, path: &str, snapshot: Option<FileBreakpoints>) {
        match snapshot {
            Some(snapshot) => self.entry_mut(path).breakpoints = snapshot.breakpoints,
            None => self.files.retain(|f| f.path != path),
        }
    }

    /// Files in first-touched order
    pub fn files(&self) -> Vec<String> {
        self.files.iter().map(|f| f.path.clone()).collect()
    }

    pub fn list(&self) -> Vec<(String, Vec<VerifiedBreakpoint>)> {
        self.files
            .iter()
            .filter(|f| !f.breakpoints.is_empty())
            .map(|f| (f.path.clone(), f.breakpoints.clone()))
            .collect()
    }

    pub fn count(&self) -> usize {
        self.files.iter().map(|f| f.breakpoints.len()).sum()
    }

    /// Apply a `breakpoint` event (adapter re-verified or moved a
    /// breakpoint). Returns whether a known breakpoint matched.
    pub fn apply_event(&mut self, update: &Breakpoint) -> bool {
        let Some(id) = update.id else {
            return false;
        };
        for file in &mut self.files {
            if let Some(bp) = file.breakpoints.iter_mut().find(|bp| bp.id == Some(id)) {
                bp.verified = update.verified;
                if let Some(line) = update.line {
                    bp.actual_line = Some(line).filter(|line| *line != bp.spec.line);
                }
                bp.message = update.message.clone();
                return true;
            }
        }
        false
    }

    pub fn set_functions(&mut self, names: Vec<String>) {
        self.functions = names;
    }

    pub fn functions(&self) -> &[String] {
        &self.functions
    }
}

/// Reject specs the adapter cannot honour, before anything is sent
pub(crate) fn check_supported(specs: &[BreakpointSpec], caps: &Capabilities) -> Result<()> {
    for spec in specs {
        if spec.condition.is_some() && !caps.conditional_breakpoints() {
            return Err(Error::unsupported(
                capability_names::CONDITIONAL_BREAKPOINTS,
                "conditional breakpoints",
            ));
        }
        if spec.hit_condition.is_some() && !caps.hit_conditional_breakpoints() {
            return Err(Error::unsupported(
                capability_names::HIT_CONDITIONAL_BREAKPOINTS,
                "hit-count breakpoints",
            ));
        }
        if spec.is_logpoint() && !caps.log_points() {
            return Err(Error::unsupported(capability_names::LOG_POINTS, "logpoints"));
        }
    }
    Ok(())
}

/// Pair the adapter's answer with what was requested. The response lists
/// breakpoints in request order; missing entries count as unverified.
pub(crate) fn pair_verified(specs: Vec<BreakpointSpec>, reported: Vec<Breakpoint>) -> Vec<VerifiedBreakpoint> {
    let mut reported = reported.into_iter();
    specs
        .into_iter()
        .map(|spec| match reported.next() {
            Some(bp) => VerifiedBreakpoint {
                actual_line: bp.line.filter(|line| *line != spec.line),
                spec,
                id: bp.id,
                verified: bp.verified,
                message: bp.message,
            },
            None => VerifiedBreakpoint {
                message: Some("adapter did not report this breakpoint".to_string()),
                ..VerifiedBreakpoint::pending(spec)
            },
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(specs: &[BreakpointSpec]) -> Vec<u32> {
        specs.iter().map(|s| s.line).collect()
    }

    #[test]
    fn test_merge_replaces_same_line_and_sorts() {
        let mut store = BreakpointStore::new();
        store.merge("a.py", &[BreakpointSpec::at_line(20), BreakpointSpec::at_line(5)]);
        let all = store.merge("a.py", &[BreakpointSpec::at_line(5).with_condition("x")]);
        assert_eq!(lines(&all), vec![5, 20]);
        assert_eq!(all[0].condition.as_deref(), Some("x"));
    }

    #[test]
    fn test_files_keep_first_touched_order() {
        let mut store = BreakpointStore::new();
        store.merge("b.py", &[BreakpointSpec::at_line(1)]);
        store.merge("a.py", &[BreakpointSpec::at_line(1)]);
        store.merge("b.py", &[BreakpointSpec::at_line(2)]);
        assert_eq!(store.files(), vec!["b.py", "a.py"]);
        assert_eq!(store.count(), 3);
    }

    #[test]
    fn test_remove_lines_and_clear() {
        let mut store = BreakpointStore::new();
        assert!(store.remove_lines("a.py", &[1]).is_none());
        store.merge("a.py", &[BreakpointSpec::at_line(1), BreakpointSpec::at_line(2)]);
        assert_eq!(lines(&store.remove_lines("a.py", &[1]).unwrap()), vec![2]);
        assert!(store.clear("a.py"));
        assert!(store.specs("a.py").is_empty());
        assert!(store.list().is_empty());
    }

    #[test]
    fn test_pair_verified_tracks_moves_and_gaps() {
        let specs = vec![BreakpointSpec::at_line(3), BreakpointSpec::at_line(9)];
        let reported = vec![Breakpoint {
            id: Some(1),
            verified: true,
            message: None,
            source: None,
            line: Some(4),
            column: None,
        }];
        let verified = pair_verified(specs, reported);
        assert_eq!(verified[0].line(), 4);
        assert!(verified[0].verified);
        assert!(!verified[1].verified);
        assert!(verified[1].message.is_some());
    }

    #[test]
    fn test_breakpoint_event_updates_by_id() {
        let mut store = BreakpointStore::new();
        let specs = store.merge("a.py", &[BreakpointSpec::at_line(3)]);
        let mut verified = pair_verified(specs, Vec::new());
        verified[0].id = Some(11);
        store.apply_verified("a.py", verified);

        let update = Breakpoint {
            id: Some(11),
            verified: true,
            message: None,
            source: None,
            line: Some(5),
            column: None,
        };
        assert!(store.apply_event(&update));
        let bp = &store.verified("a.py")[0];
        assert!(bp.verified);
        assert_eq!(bp.line(), 5);
    }

    #[test]
    fn test_cleared_file_keeps_its_place() {
        let mut store = BreakpointStore::new();
        store.merge("a.py", &[BreakpointSpec::at_line(1)]);
        store.merge("b.py", &[BreakpointSpec::at_line(1)]);
        store.clear("a.py");
        store.apply_verified("a.py", Vec::new());

        let specs = store.merge("a.py", &[BreakpointSpec::at_line(7)]);
        store.apply_verified("a.py", pair_verified(specs, Vec::new()));
        let files: Vec<String> = store.list().into_iter().map(|(path, _)| path).collect();
        assert_eq!(files, vec!["a.py", "b.py"]);
    }

    #[test]
    fn test_restore_file_leaves_other_files() {
        let mut store = BreakpointStore::new();
        store.merge("a.py", &[BreakpointSpec::at_line(1)]);
        let before = store.file_snapshot("a.py");
        let fresh = store.file_snapshot("b.py");
        store.merge("a.py", &[BreakpointSpec::at_line(2)]);
        store.merge("b.py", &[BreakpointSpec::at_line(3)]);

        store.restore_file("a.py", before);
        store.restore_file("b.py", fresh);
        assert_eq!(lines(&store.specs("a.py")), vec![1]);
        assert_eq!(store.files(), vec!["a.py"]);
    }

    #[test]
    fn test_event_on_requested_line_has_no_actual_line() {
        let mut store = BreakpointStore::new();
        let specs = store.merge("a.py", &[BreakpointSpec::at_line(3)]);
        let mut verified = pair_verified(specs, Vec::new());
        verified[0].id = Some(4);
        store.apply_verified("a.py", verified);

        let update = Breakpoint {
            id: Some(4),
            verified: true,
            message: None,
            source: None,
            line: Some(3),
            column: None,
        };
        assert!(store.apply_event(&update));
        assert_eq!(store.verified("a.py")[0].actual_line, None);
    }

    #[test]
    fn test_capability_checks() {
        let caps = Capabilities {
            supports_conditional_breakpoints: Some(true),
            ..Capabilities::default()
        };
        assert!(check_supported(&[BreakpointSpec::at_line(1).with_condition("x")], &caps).is_ok());
        let err = check_supported(&[BreakpointSpec::at_line(1).with_log_message("hi")], &caps)
            .unwrap_err();
        assert!(err.to_string().contains("supportsLogPoints"));
    }
}
