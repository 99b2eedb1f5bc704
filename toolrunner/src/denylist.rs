//! Component C: regex-match forbidden command strings.
//!
//! Malformed patterns are dropped silently at construction — operators
//! typo-proof their config without crashing the agent.

use regex::Regex;

#[derive(Debug, Default)]
pub struct Denylist {
    patterns: Vec<Regex>,
}

impl Denylist {
    pub fn new(patterns: impl IntoIterator<Item = impl AsRef<str>>) -> Self {
        let compiled = patterns
            .into_iter()
            .filter_map(|p| Regex::new(p.as_ref()).ok())
            .collect();
        Self { patterns: compiled }
    }

    pub fn matches(&self, command: &str) -> bool {
        self.patterns.iter().any(|re| re.is_match(command))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_denylist_never_matches() {
        let dl = Denylist::new(Vec::<&str>::new());
        assert!(!dl.matches("rm -rf /"));
    }

    #[test]
    fn matches_any_compiled_pattern() {
        let dl = Denylist::new([r"rm\s+-rf\s+/"]);
        assert!(dl.matches("rm -rf /"));
        assert!(!dl.matches("ls -la"));
    }

    #[test]
    fn silently_drops_malformed_patterns() {
        // `(` with no closing paren is an invalid regex.
        let dl = Denylist::new(["(unclosed", r"rm\s+-rf\s+/"]);
        assert_eq!(dl.patterns.len(), 1);
        assert!(dl.matches("rm -rf /"));
    }
}
