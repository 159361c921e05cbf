//! Ad-blocker detection.
//!
//! A detection cycle runs a battery of independent probes concurrently and
//! folds their reports into one [`DetectionVerdict`]. Any single probe that
//! crosses its own threshold makes the verdict "blocked". Probe *failures*
//! (a request that errors, an element that vanishes) are the evidence, so
//! nothing in here returns an error.
//!
//! ```text
//! probes ──(staggered spawn)──► JoinSet ──mpsc──► aggregator ──► verdict
//!                                   ▲                 │
//!                                   └── abort + wait ◄┘ (first positive / battery timeout)
//! ```

mod engine;
mod loader;
mod probes;
mod surface;

pub use engine::DetectionEngine;
pub use loader::{HttpLoader, LoadError, ResourceKind, ResourceLoader};
pub use probes::{BaitProbe, MutationProbe, NetworkProbe, Probe};
pub use surface::{
    BaitLayout, BaitSpec, ElementId, ObserverId, PageSurface, Placement, RemovalWatch,
};

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

/// Which heuristic produced a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeKind {
    Bait,
    Script,
    Fetch,
    Image,
    Mutation,
}

/// Fraction of suppressed items at which each probe reports "blocked".
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeThresholds {
    pub bait: f64,
    pub script: f64,
    pub fetch: f64,
    pub image: f64,
    pub mutation: f64,
}

impl Default for ProbeThresholds {
    fn default() -> Self {
        Self {
            bait: 0.7,
            script: 0.6,
            fetch: 0.6,
            image: 0.6,
            mutation: 0.6,
        }
    }
}

/// Timings for a detection cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionSettings {
    /// Full batteries to run before concluding "not blocked".
    pub max_attempts: u32,
    /// Outer bound on one battery.
    pub battery_timeout: Duration,
    /// Per-request bound for script/fetch/image loads.
    pub request_timeout: Duration,
    /// Start offset between consecutive probes.
    pub stagger: Duration,
    /// How long bait elements sit before they are measured.
    pub bait_settle: Duration,
    /// How long the mutation probe watches for removals.
    pub mutation_window: Duration,
    /// Pause between batteries.
    pub retry_delay: Duration,
    /// Bound on a user-triggered recheck before it counts as "still blocked".
    pub recheck_timeout: Duration,
    pub thresholds: ProbeThresholds,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            battery_timeout: Duration::from_secs(6),
            request_timeout: Duration::from_secs(3),
            stagger: Duration::from_millis(100),
            bait_settle: Duration::from_secs(1),
            mutation_window: Duration::from_secs(1),
            retry_delay: Duration::from_millis(500),
            recheck_timeout: Duration::from_millis(6_500),
            thresholds: ProbeThresholds::default(),
        }
    }
}

/// Bait class names and ad-network URLs, already parsed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProbePlan {
    pub bait_classes: Vec<String>,
    pub script_urls: Vec<Url>,
    pub fetch_urls: Vec<Url>,
    pub image_urls: Vec<Url>,
}

impl ProbePlan {
    /// Parse URL lists, skipping (and logging) entries that are not URLs.
    pub fn parse(
        bait_classes: &[String],
        script_urls: &[String],
        fetch_urls: &[String],
        image_urls: &[String],
    ) -> Self {
        fn urls(raw: &[String]) -> Vec<Url> {
            raw.iter()
                .filter_map(|s| match Url::parse(s) {
                    Ok(url) => Some(url),
                    Err(e) => {
                        tracing::warn!(url = %s, error = %e, "skipping malformed probe url");
                        None
                    }
                })
                .collect()
        }
        Self {
            bait_classes: bait_classes.to_vec(),
            script_urls: urls(script_urls),
            fetch_urls: urls(fetch_urls),
            image_urls: urls(image_urls),
        }
    }
}

/// Outcome of one probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeReport {
    pub kind: ProbeKind,
    /// Items (elements or requests) that were suppressed.
    pub suppressed: usize,
    /// Items the probe tried.
    pub total: usize,
    pub blocked: bool,
}

impl ProbeReport {
    /// Build a report, deciding `blocked` from the suppressed fraction.
    pub fn tally(kind: ProbeKind, suppressed: usize, total: usize, threshold: f64) -> Self {
        Self {
            kind,
            suppressed,
            total,
            blocked: crosses(suppressed, total, threshold),
        }
    }
}

/// `suppressed / total >= threshold`, with an empty probe never crossing.
fn crosses(suppressed: usize, total: usize, threshold: f64) -> bool {
    total > 0 && suppressed as f64 + 1e-9 >= threshold * total as f64
}

/// Result of a full detection cycle. Ephemeral; never persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionVerdict {
    pub blocked: bool,
    /// Probes that reported blocked.
    pub signals: u32,
    /// Probes that reported at all.
    pub probes_completed: u32,
    /// Batteries run.
    pub attempts: u32,
    /// Whether the last battery hit its outer timeout.
    pub timed_out: bool,
    pub reports: Vec<ProbeReport>,
}

impl DetectionVerdict {
    /// Verdict used when a recheck runs out of time.
    pub fn assumed_blocked() -> Self {
        Self {
            blocked: true,
            timed_out: true,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_is_inclusive() {
        assert!(ProbeReport::tally(ProbeKind::Bait, 7, 10, 0.7).blocked);
        assert!(!ProbeReport::tally(ProbeKind::Bait, 6, 10, 0.7).blocked);
        assert!(ProbeReport::tally(ProbeKind::Fetch, 3, 5, 0.6).blocked);
        assert!(!ProbeReport::tally(ProbeKind::Fetch, 1, 3, 0.6).blocked);
        assert!(ProbeReport::tally(ProbeKind::Script, 2, 3, 0.6).blocked);
    }

    #[test]
    fn empty_probe_never_blocks() {
        assert!(!ProbeReport::tally(ProbeKind::Image, 0, 0, 0.0).blocked);
    }

    #[test]
    fn plan_skips_malformed_urls() {
        let plan = ProbePlan::parse(
            &["adsbygoogle".to_string()],
            &["https://ads.example/a.js".to_string(), "not a url".to_string()],
            &[],
            &[],
        );
        assert_eq!(plan.script_urls.len(), 1);
        assert_eq!(plan.bait_classes, vec!["adsbygoogle".to_string()]);
    }
}
