//! Decides whether a seemingly stuck item is actually busy.
//!
//! Cases with thousands of documents legitimately keep an item `running`
//! well past the stuck grace period. The worker reports progress counts in
//! its log lines, which is the only signal available from outside.

use std::sync::LazyLock;

use regex::Regex;

use crate::config::HeavyWorkConfig;

static RE_COLLECTED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:collected|coletad[oa]s?)\s*:?\s*(\d+)").unwrap());
static RE_FOUND: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:found|encontrad[oa]s?)\s*:?\s*(\d+)").unwrap());

/// Exempts items from stuck recovery based on the batch's recent log text.
pub trait HeavyWorkPredicate: Send + Sync {
    /// `messages` are the batch's log messages written since the item was
    /// last touched, oldest first.
    fn is_heavy(&self, messages: &[String]) -> bool;
}

/// Default predicate: any "collected" count at or above
/// `collected_threshold`, or any "found" count at or above
/// `found_threshold`.
#[derive(Debug, Clone)]
pub struct LogCountHeuristic {
    collected_threshold: u64,
    found_threshold: u64,
}

impl LogCountHeuristic {
    pub fn new(collected_threshold: u64, found_threshold: u64) -> Self {
        Self {
            collected_threshold,
            found_threshold,
        }
    }

    pub fn from_config(config: &HeavyWorkConfig) -> Self {
        Self::new(config.collected_threshold, config.found_threshold)
    }
}

impl Default for LogCountHeuristic {
    fn default() -> Self {
        Self::from_config(&HeavyWorkConfig::default())
    }
}

fn max_count(re: &Regex, message: &str) -> Option<u64> {
    re.captures_iter(message)
        .filter_map(|c| c[1].parse::<u64>().ok())
        .max()
}

impl HeavyWorkPredicate for LogCountHeuristic {
    fn is_heavy(&self, messages: &[String]) -> bool {
        messages.iter().any(|m| {
            max_count(&RE_COLLECTED, m).is_some_and(|n| n >= self.collected_threshold)
                || max_count(&RE_FOUND, m).is_some_and(|n| n >= self.found_threshold)
        })
    }
}
