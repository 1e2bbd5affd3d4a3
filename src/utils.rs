use crate::config::TagMatch;
use std::collections::HashMap;
use std::io::Write;

use std::sync::atomic::{AtomicU64, Ordering};

/// Receives incremental progress from an export and may request cancellation.
pub trait ProgressListener {
    /// Called with the running count of source features processed so far.
    fn progress(&self, processed: u64);

    /// Polled between features; returning true aborts the export.
    fn is_canceled(&self) -> bool {
        false
    }

    fn complete(&self) {}
}

/// Listener that ignores progress and never cancels.
pub struct NoProgress;

impl ProgressListener for NoProgress {
    fn progress(&self, _processed: u64) {}
}

pub struct ProgressCounter {
    label: String,
    interval: u64,
    count: AtomicU64,
}

impl ProgressCounter {
    pub fn new(label: impl Into<String>, interval: u64) -> Self {
        let counter = Self {
            label: label.into(),
            interval: interval.max(1),
            count: AtomicU64::new(0),
        };
        counter.print(0);
        counter
    }

    pub fn inc(&self, delta: u64) {
        let prev = self.count.fetch_add(delta, Ordering::SeqCst);
        self.report(prev, prev + delta);
    }

    pub fn finish(&self) {
        self.print(self.count.load(Ordering::SeqCst));
        eprintln!();
    }

    fn report(&self, prev: u64, current: u64) {
        // Print if we crossed an interval boundary
        if prev / self.interval < current / self.interval {
            self.print(current);
        }
    }

    fn print(&self, current: u64) {
        eprint!("\r{}: {}", self.label, current);
        let _ = std::io::stderr().flush();
    }
}

impl ProgressListener for ProgressCounter {
    fn progress(&self, processed: u64) {
        let prev = self.count.swap(processed, Ordering::SeqCst);
        self.report(prev, processed);
    }

    fn complete(&self) {
        self.finish();
    }
}

pub fn glob_match(pattern: &str, value: &str) -> bool {
    if pattern == "*" {
        return true;
    }

    let parts: Vec<&str> = pattern.split('*').collect();
    let (Some(prefix), Some(suffix)) = (parts.first(), parts.last()) else {
        return false;
    };
    if parts.len() == 1 {
        return pattern == value;
    }

    if !value.starts_with(prefix) || value.len() < prefix.len() + suffix.len() {
        return false;
    }
    if !value.ends_with(suffix) {
        return false;
    }

    let mut remaining = &value[prefix.len()..value.len() - suffix.len()];
    for part in parts[1..parts.len() - 1].iter().filter(|p| !p.is_empty()) {
        match remaining.find(part) {
            Some(idx) => {
                remaining = &remaining[idx + part.len()..];
            }
            None => return false,
        }
    }

    true
}

pub fn build_tag_map<'a, I>(tags: I) -> HashMap<String, String>
where
    I: Iterator<Item = (&'a str, &'a str)>,
{
    tags.map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

/// True when the tag is present and its value matches (an empty value list
/// accepts any value).
pub fn matches_tag(tag_match: &TagMatch, tags: &HashMap<String, String>) -> bool {
    let Some(tag_val) = tags.get(&tag_match.tag) else {
        return false;
    };

    if tag_match.values.is_empty() {
        return true;
    }

    tag_match
        .values
        .iter()
        .any(|pattern| glob_match(pattern, tag_val))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_match_supports_star_suffix() {
        assert!(glob_match("*_link", "motorway_link"));
        assert!(!glob_match("*_link", "motorway"));
    }

    #[test]
    fn glob_match_prefix_and_infix() {
        assert!(glob_match("motor*", "motorway"));
        assert!(glob_match("m*r*y", "motorway"));
        assert!(!glob_match("m*x*y", "motorway"));
        assert!(glob_match("primary", "primary"));
        assert!(!glob_match("ab*ba", "aba"));
    }

    #[test]
    fn matches_tag_values_with_glob() {
        let mut tags = HashMap::new();
        tags.insert("highway".to_string(), "trunk_link".to_string());
        let tag_match = TagMatch {
            tag: "highway".to_string(),
            values: vec!["primary".to_string(), "*_link".to_string()],
        };
        assert!(matches_tag(&tag_match, &tags));
    }

    #[test]
    fn empty_value_list_matches_any_value() {
        let mut tags = HashMap::new();
        tags.insert("amenity".to_string(), "bench".to_string());
        let tag_match = TagMatch {
            tag: "amenity".to_string(),
            values: Vec::new(),
        };
        assert!(matches_tag(&tag_match, &tags));
        assert!(!matches_tag(
            &TagMatch {
                tag: "shop".to_string(),
                values: Vec::new(),
            },
            &tags
        ));
    }

    #[test]
    fn counter_tracks_latest_progress() {
        let counter = ProgressCounter::new("test", 10);
        counter.progress(5);
        counter.progress(12);
        assert_eq!(counter.count.load(Ordering::SeqCst), 12);
        counter.inc(3);
        assert_eq!(counter.count.load(Ordering::SeqCst), 15);
        assert!(!counter.is_canceled());
    }
}
