// SPDX-License-Identifier: Apache-2.0

//! include_lines / exclude_lines filtering.

use regex::Regex;
use tracing::debug;

use crate::harvester::error::Result;

/// Decides whether a line's text is exported. Pure function of the line and
/// the compiled pattern sets.
#[derive(Debug, Clone, Default)]
pub struct LineFilter {
    include: Vec<Regex>,
    exclude: Vec<Regex>,
}

impl LineFilter {
    pub fn new(include: &[String], exclude: &[String]) -> Result<Self> {
        Ok(Self {
            include: compile(include)?,
            exclude: compile(exclude)?,
        })
    }

    /// A line is dropped if include patterns exist and none match, or if any exclude pattern matches.
    pub fn should_export(&self, line: &str) -> bool {
        if !self.include.is_empty() && !match_any(&self.include, line) {
            debug!(
                line,
                "Drop line as it does not match any of the include patterns"
            );
            return false;
        }
        if !self.exclude.is_empty() && match_any(&self.exclude, line) {
            debug!(line, "Drop line as it matches one of the exclude patterns");
            return false;
        }
        true
    }
}

fn compile(patterns: &[String]) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|p| Regex::new(p).map_err(Into::into))
        .collect()
}

/// True if any of the patterns matches `text`.
pub fn match_any(patterns: &[Regex], text: &str) -> bool {
    patterns.iter().any(|re| re.is_match(text))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(include: &[&str], exclude: &[&str]) -> LineFilter {
        let include: Vec<String> = include.iter().map(|s| s.to_string()).collect();
        let exclude: Vec<String> = exclude.iter().map(|s| s.to_string()).collect();
        LineFilter::new(&include, &exclude).unwrap()
    }

    #[test]
    fn test_no_patterns_exports_everything() {
        let f = filter(&[], &[]);
        assert!(f.should_export("anything"));
        assert!(f.should_export(""));
    }

    #[test]
    fn test_include_lines() {
        let f = filter(&["^ERROR", "^WARN"], &[]);
        assert!(f.should_export("ERROR y"));
        assert!(f.should_export("WARN z"));
        assert!(!f.should_export("INFO x"));
    }

    #[test]
    fn test_exclude_lines() {
        let f = filter(&[], &["^DBG", "healthcheck"]);
        assert!(!f.should_export("DBG noisy"));
        assert!(!f.should_export("GET /healthcheck 200"));
        assert!(f.should_export("ERROR real problem"));
    }

    #[test]
    fn test_include_then_exclude() {
        let f = filter(&["^ERROR"], &["timeout"]);
        assert!(f.should_export("ERROR disk full"));
        assert!(!f.should_export("ERROR upstream timeout"));
        assert!(!f.should_export("INFO fine"));
    }

    #[test]
    fn test_decision_is_stable() {
        let f = filter(&["a+b"], &["c$"]);
        for line in ["aab", "aabc", "xyz", "ab c", ""] {
            let first = f.should_export(line);
            for _ in 0..5 {
                assert_eq!(f.should_export(line), first, "line {:?}", line);
            }
        }
    }

    #[test]
    fn test_invalid_pattern() {
        let result = LineFilter::new(&["(unclosed".to_string()], &[]);
        assert!(result.is_err());
    }
}
