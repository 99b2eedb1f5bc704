//! Component F: a thread-safe, in-memory store of completed executions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use crate::model::ToolResult;

/// A stored result tagged with its insertion sequence. `HashMap::values()`
/// iterates in hash-randomized order, not insertion order, so ties in
/// `started_at` (realistic at microsecond resolution under concurrent
/// saves) need an explicit tiebreaker to sort deterministically.
struct Entry {
    result: ToolResult,
    sequence: u64,
}

/// Mapping id → [`ToolResult`]. Many concurrent readers, exclusive writers.
///
/// Unbounded: no eviction policy is implemented here (see DESIGN.md).
#[derive(Default)]
pub struct ResultLog {
    results: RwLock<HashMap<String, Entry>>,
    next_sequence: AtomicU64,
}

impl ResultLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save(&self, result: ToolResult) {
        let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);
        self.results
            .write()
            .expect("result log lock poisoned")
            .insert(result.id.clone(), Entry { result, sequence });
    }

    pub fn get(&self, id: &str) -> Option<ToolResult> {
        self.results
            .read()
            .expect("result log lock poisoned")
            .get(id)
            .map(|entry| entry.result.clone())
    }

    /// Results whose `target` matches, sorted by `started_at` descending.
    /// Ties (equal `started_at`) break by insertion order, oldest first.
    pub fn for_target(&self, target: &str) -> Vec<ToolResult> {
        let guard = self.results.read().expect("result log lock poisoned");
        let mut matches: Vec<&Entry> = guard
            .values()
            .filter(|entry| entry.result.target == target)
            .collect();
        matches.sort_by(|a, b| {
            b.result
                .started_at
                .cmp(&a.result.started_at)
                .then(a.sequence.cmp(&b.sequence))
        });
        matches.into_iter().map(|entry| entry.result.clone()).collect()
    }

    /// `"=== {tool} on {target} (ID: {id}) ==="` followed by every raw line.
    pub fn full_text(&self, id: &str) -> Option<String> {
        let result = self.get(id)?;
        let mut text = format!(
            "=== {} on {} (ID: {}) ===\n",
            result.tool_name, result.target, result.id
        );
        for line in &result.raw_lines {
            text.push_str(&line.content);
            text.push('\n');
        }
        Some(text.trim_end_matches('\n').to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{make_id, OutputLine};
    use std::time::{Duration, SystemTime};

    fn result(id: &str, target: &str, started_at: SystemTime) -> ToolResult {
        ToolResult {
            id: id.to_string(),
            tool_name: "nmap".to_string(),
            target: target.to_string(),
            args: vec![],
            exit_code: 0,
            raw_lines: vec![OutputLine {
                timestamp: started_at,
                content: "22/tcp open ssh".to_string(),
                is_error: false,
            }],
            truncated: "22/tcp open ssh".to_string(),
            entities: vec![],
            started_at,
            finished_at: started_at,
            error: None,
        }
    }

    #[test]
    fn save_then_get_round_trips() {
        let log = ResultLog::new();
        let now = SystemTime::now();
        let id = make_id("nmap", "10.0.0.5", now);
        log.save(result(&id, "10.0.0.5", now));
        let fetched = log.get(&id).unwrap();
        assert_eq!(fetched.id, id);
    }

    #[test]
    fn get_missing_id_is_none() {
        let log = ResultLog::new();
        assert!(log.get("nope@nowhere@0").is_none());
    }

    #[test]
    fn for_target_filters_and_sorts_descending() {
        let log = ResultLog::new();
        let t1 = SystemTime::now();
        let t2 = t1 + Duration::from_secs(1);
        log.save(result("a", "10.0.0.5", t1));
        log.save(result("b", "10.0.0.5", t2));
        log.save(result("c", "10.0.0.9", t2));

        let results = log.for_target("10.0.0.5");
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, "b");
        assert_eq!(results[1].id, "a");
    }

    #[test]
    fn for_target_breaks_started_at_ties_by_insertion_order() {
        let log = ResultLog::new();
        let t = SystemTime::now();
        log.save(result("first", "10.0.0.5", t));
        log.save(result("second", "10.0.0.5", t));
        log.save(result("third", "10.0.0.5", t));

        // All three share `started_at`; repeated queries must return the
        // same order every time (insertion order, oldest first) rather
        // than whatever `HashMap::values()` happens to iterate.
        for _ in 0..5 {
            let results = log.for_target("10.0.0.5");
            let ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
            assert_eq!(ids, vec!["first", "second", "third"]);
        }
    }

    #[test]
    fn full_text_includes_header_and_raw_lines() {
        let log = ResultLog::new();
        let now = SystemTime::now();
        log.save(result("nmap@10.0.0.5@1", "10.0.0.5", now));
        let text = log.full_text("nmap@10.0.0.5@1").unwrap();
        assert!(text.starts_with("=== nmap on 10.0.0.5 (ID: nmap@10.0.0.5@1) ==="));
        assert!(text.contains("22/tcp open ssh"));
    }
}
