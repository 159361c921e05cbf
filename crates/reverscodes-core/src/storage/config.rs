//! TOML-based application configuration.
//!
//! Stores:
//! - Deferral quota constants (max deferrals, window, cooldown)
//! - Detection timings and probe thresholds
//! - Bait class names and ad-network URL lists
//! - Comment store endpoint
//!
//! Configuration is stored at `~/.config/reverscodes/config.toml`.

use std::path::PathBuf;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use super::data_dir;
use crate::detection::{DetectionSettings, ProbePlan, ProbeThresholds};
use crate::error::ConfigError;
use crate::quota::QuotaPolicy;

/// Deferral quota configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaConfig {
    #[serde(default = "default_max_deferrals")]
    pub max_deferrals: u32,
    #[serde(default = "default_window_days")]
    pub window_days: u32,
    #[serde(default = "default_short_cooldown_minutes")]
    pub short_cooldown_minutes: u32,
    #[serde(default = "default_min_modal_gap_secs")]
    pub min_modal_gap_secs: u32,
}

/// Detection timing and threshold configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_battery_timeout_ms")]
    pub battery_timeout_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_stagger_ms")]
    pub stagger_ms: u64,
    #[serde(default = "default_bait_settle_ms")]
    pub bait_settle_ms: u64,
    #[serde(default = "default_mutation_window_ms")]
    pub mutation_window_ms: u64,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_recheck_timeout_ms")]
    pub recheck_timeout_ms: u64,
    #[serde(default = "default_bait_threshold")]
    pub bait_threshold: f64,
    #[serde(default = "default_majority_threshold")]
    pub script_threshold: f64,
    #[serde(default = "default_majority_threshold")]
    pub fetch_threshold: f64,
    #[serde(default = "default_majority_threshold")]
    pub image_threshold: f64,
    #[serde(default = "default_majority_threshold")]
    pub mutation_threshold: f64,
}

/// Bait class names and ad-network URLs used by the probes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbesConfig {
    #[serde(default = "default_bait_classes")]
    pub bait_classes: Vec<String>,
    #[serde(default = "default_script_urls")]
    pub script_urls: Vec<String>,
    #[serde(default = "default_fetch_urls")]
    pub fetch_urls: Vec<String>,
    #[serde(default = "default_image_urls")]
    pub image_urls: Vec<String>,
}

/// Comment store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommentsConfig {
    #[serde(default = "default_comments_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_comments_timeout_ms")]
    pub timeout_ms: u64,
}

/// Application configuration.
///
/// Serialized to/from TOML at `~/.config/reverscodes/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub quota: QuotaConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub probes: ProbesConfig,
    #[serde(default)]
    pub comments: CommentsConfig,
}

fn default_max_deferrals() -> u32 {
    3
}
fn default_window_days() -> u32 {
    7
}
fn default_short_cooldown_minutes() -> u32 {
    10
}
fn default_min_modal_gap_secs() -> u32 {
    2
}
fn default_max_attempts() -> u32 {
    3
}
fn default_battery_timeout_ms() -> u64 {
    6_000
}
fn default_request_timeout_ms() -> u64 {
    3_000
}
fn default_stagger_ms() -> u64 {
    100
}
fn default_bait_settle_ms() -> u64 {
    1_000
}
fn default_mutation_window_ms() -> u64 {
    1_000
}
fn default_retry_delay_ms() -> u64 {
    500
}
fn default_recheck_timeout_ms() -> u64 {
    6_500
}
fn default_bait_threshold() -> f64 {
    0.7
}
fn default_majority_threshold() -> f64 {
    0.6
}
fn default_bait_classes() -> Vec<String> {
    [
        "adsbygoogle",
        "advertisement",
        "ad-banner",
        "ad-placeholder",
        "sponsored-ad",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_script_urls() -> Vec<String> {
    vec![
        "https://pagead2.googlesyndication.com/pagead/js/adsbygoogle.js".into(),
        "https://www.googletagservices.com/tag/js/gpt.js".into(),
        "https://securepubads.g.doubleclick.net/tag/js/gpt.js".into(),
    ]
}
fn default_fetch_urls() -> Vec<String> {
    vec![
        "https://googleads.g.doubleclick.net/pagead/id".into(),
        "https://static.doubleclick.net/instream/ad_status.js".into(),
        "https://pagead2.googlesyndication.com/pagead/show_ads.js".into(),
    ]
}
fn default_image_urls() -> Vec<String> {
    vec![
        "https://googleads.g.doubleclick.net/pagead/viewthroughconversion/0/".into(),
        "https://www.google-analytics.com/collect".into(),
        "https://ad.doubleclick.net/favicon.ico".into(),
    ]
}
fn default_comments_endpoint() -> String {
    "http://localhost:8888/.netlify/functions/comments".into()
}
fn default_comments_timeout_ms() -> u64 {
    10_000
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            max_deferrals: default_max_deferrals(),
            window_days: default_window_days(),
            short_cooldown_minutes: default_short_cooldown_minutes(),
            min_modal_gap_secs: default_min_modal_gap_secs(),
        }
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            battery_timeout_ms: default_battery_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            stagger_ms: default_stagger_ms(),
            bait_settle_ms: default_bait_settle_ms(),
            mutation_window_ms: default_mutation_window_ms(),
            retry_delay_ms: default_retry_delay_ms(),
            recheck_timeout_ms: default_recheck_timeout_ms(),
            bait_threshold: default_bait_threshold(),
            script_threshold: default_majority_threshold(),
            fetch_threshold: default_majority_threshold(),
            image_threshold: default_majority_threshold(),
            mutation_threshold: default_majority_threshold(),
        }
    }
}

impl Default for ProbesConfig {
    fn default() -> Self {
        Self {
            bait_classes: default_bait_classes(),
            script_urls: default_script_urls(),
            fetch_urls: default_fetch_urls(),
            image_urls: default_image_urls(),
        }
    }
}

impl Default for CommentsConfig {
    fn default() -> Self {
        Self {
            endpoint: default_comments_endpoint(),
            timeout_ms: default_comments_timeout_ms(),
        }
    }
}

impl Config {
    fn get_json_value_by_path<'a>(
        root: &'a serde_json::Value,
        key: &str,
    ) -> Option<&'a serde_json::Value> {
        if key.is_empty() {
            return None;
        }

        let mut current = root;
        for part in key.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    fn set_json_value_by_path(
        root: &mut serde_json::Value,
        key: &str,
        value: &str,
    ) -> Result<(), ConfigError> {
        let unknown = || ConfigError::UnknownKey(key.to_string());
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };

        let mut parts = key.split('.').peekable();
        if key.is_empty() {
            return Err(unknown());
        }

        let mut current = root;
        while let Some(part) = parts.next() {
            if parts.peek().is_none() {
                let obj = current.as_object_mut().ok_or_else(unknown)?;
                let existing = obj.get(part).ok_or_else(unknown)?;

                let new_value = match existing {
                    serde_json::Value::Bool(_) => serde_json::Value::Bool(
                        value.parse::<bool>().map_err(|e| invalid(e.to_string()))?,
                    ),
                    serde_json::Value::Number(_) => {
                        if let Ok(n) = value.parse::<u64>() {
                            serde_json::Value::Number(n.into())
                        } else if let Ok(n) = value.parse::<f64>() {
                            serde_json::Number::from_f64(n)
                                .map(serde_json::Value::Number)
                                .ok_or_else(|| invalid(format!("cannot parse '{value}' as number")))?
                        } else {
                            return Err(invalid(format!("cannot parse '{value}' as number")));
                        }
                    }
                    serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                        serde_json::from_str(value).map_err(|e| invalid(e.to_string()))?
                    }
                    _ => serde_json::Value::String(value.into()),
                };

                obj.insert(part.to_string(), new_value);
                return Ok(());
            }

            current = current.get_mut(part).ok_or_else(unknown)?;
        }

        Err(unknown())
    }

    fn path() -> Result<PathBuf, ConfigError> {
        Ok(data_dir()?.join("config.toml"))
    }

    /// Load from disk or return default.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed,
    /// or if the default config cannot be written to disk.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::path()?;
        match std::fs::read_to_string(&path) {
            Ok(content) => toml::from_str(&content).map_err(|e| ConfigError::LoadFailed {
                path,
                message: e.to_string(),
            }),
            Err(_) => {
                let cfg = Self::default();
                cfg.save()?;
                Ok(cfg)
            }
        }
    }

    /// Persist to disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the config cannot be serialized or written to disk.
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = Self::path()?;
        let save_failed = |message: String| ConfigError::SaveFailed {
            path: path.clone(),
            message,
        };
        let content = toml::to_string_pretty(self).map_err(|e| save_failed(e.to_string()))?;
        std::fs::write(&path, content).map_err(|e| save_failed(e.to_string()))?;
        Ok(())
    }

    /// Get a config value as string by dot-separated key.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let val = Self::get_json_value_by_path(&json, key)?;
        match val {
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Every leaf value as `(dot.path, value)`, sorted by key. Lists stay JSON.
    pub fn entries(&self) -> Vec<(String, String)> {
        fn walk(prefix: &str, value: &serde_json::Value, out: &mut Vec<(String, String)>) {
            match value {
                serde_json::Value::Object(map) => {
                    for (k, v) in map {
                        let path = if prefix.is_empty() {
                            k.clone()
                        } else {
                            format!("{prefix}.{k}")
                        };
                        walk(&path, v, out);
                    }
                }
                serde_json::Value::String(s) => out.push((prefix.to_string(), s.clone())),
                other => out.push((prefix.to_string(), other.to_string())),
            }
        }

        let mut out = Vec::new();
        if let Ok(json) = serde_json::to_value(self) {
            walk("", &json, &mut out);
        }
        out
    }

    /// Set a config value by key without persisting.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is unknown or the value cannot be parsed
    /// into the field's type.
    pub fn apply(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };
        let mut json = serde_json::to_value(&*self).map_err(|e| invalid(e.to_string()))?;
        Self::set_json_value_by_path(&mut json, key, value)?;
        *self = serde_json::from_value(json).map_err(|e| invalid(e.to_string()))?;
        Ok(())
    }

    /// Set a config value by key and persist. Returns error if key is unknown.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is unknown, the value cannot be parsed,
    /// or the config cannot be saved.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        self.apply(key, value)?;
        self.save()
    }

    /// Load from disk, returning default on error.
    /// This is a convenience method that never fails.
    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "falling back to default configuration");
            Self::default()
        })
    }

    /// Quota constants for the deferral manager.
    pub fn quota_policy(&self) -> QuotaPolicy {
        QuotaPolicy {
            max_deferrals: self.quota.max_deferrals,
            window: Duration::days(i64::from(self.quota.window_days)),
            short_cooldown: Duration::minutes(i64::from(self.quota.short_cooldown_minutes)),
            min_modal_gap: Duration::seconds(i64::from(self.quota.min_modal_gap_secs)),
        }
    }

    /// Timings and thresholds for the detection engine and probes.
    pub fn detection_settings(&self) -> DetectionSettings {
        let d = &self.detection;
        DetectionSettings {
            max_attempts: d.max_attempts.max(1),
            battery_timeout: std::time::Duration::from_millis(d.battery_timeout_ms),
            request_timeout: std::time::Duration::from_millis(d.request_timeout_ms),
            stagger: std::time::Duration::from_millis(d.stagger_ms),
            bait_settle: std::time::Duration::from_millis(d.bait_settle_ms),
            mutation_window: std::time::Duration::from_millis(d.mutation_window_ms),
            retry_delay: std::time::Duration::from_millis(d.retry_delay_ms),
            recheck_timeout: std::time::Duration::from_millis(d.recheck_timeout_ms),
            thresholds: ProbeThresholds {
                bait: d.bait_threshold,
                script: d.script_threshold,
                fetch: d.fetch_threshold,
                image: d.image_threshold,
                mutation: d.mutation_threshold,
            },
        }
    }

    /// Bait classes and probe URLs. Malformed URLs are dropped with a warning.
    pub fn probe_plan(&self) -> ProbePlan {
        let p = &self.probes;
        ProbePlan::parse(&p.bait_classes, &p.script_urls, &p.fetch_urls, &p.image_urls)
    }
}
