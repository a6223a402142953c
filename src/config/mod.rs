//! Probe configuration
//!
//! The configuration is an immutable record loaded once at startup. It has
//! two parts: the `[probe]` section with scheduler/sampler tuning, and the
//! `[streams]` section, a three-level mapping of
//! `project -> line role -> stream entries`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::models::StreamDescriptor;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub probe: ProbeConfig,
    /// project -> line role -> streams. The line role key (SOURCE / SERVICE /
    /// CDN / ...) is case-folded to lower case when descriptors are derived.
    #[serde(default)]
    pub streams: HashMap<String, HashMap<String, Vec<StreamEntry>>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Seconds between check cycles.
    #[serde(default = "default_check_interval")]
    pub check_interval: u64,
    /// Seconds of container data sampled per stream per cycle.
    #[serde(default = "default_sample_duration")]
    pub sample_duration: u64,
    /// Keyframes required before the sampling loop may stop normally.
    #[serde(default = "default_min_keyframes")]
    pub min_keyframes: u64,
    /// Upper bound on samplers doing I/O at the same time.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Retries per stream per cycle, on top of the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// A single read slower than this counts as a stall.
    #[serde(default = "default_stall_threshold_ms")]
    pub stall_threshold_ms: u64,
    /// Address the exposition endpoint listens on.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamEntry {
    pub url: String,
    pub id: String,
    /// Single-tag shorthand, kept for older configs. Ignored when the `tags`
    /// map already carries a `tag` key.
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

fn default_check_interval() -> u64 {
    30
}

fn default_sample_duration() -> u64 {
    10
}

fn default_min_keyframes() -> u64 {
    2
}

fn default_max_concurrent() -> usize {
    1000
}

fn default_max_retries() -> u32 {
    3
}

fn default_stall_threshold_ms() -> u64 {
    200
}

fn default_listen_addr() -> String {
    "0.0.0.0:9188".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            check_interval: default_check_interval(),
            sample_duration: default_sample_duration(),
            min_keyframes: default_min_keyframes(),
            max_concurrent: default_max_concurrent(),
            max_retries: default_max_retries(),
            stall_threshold_ms: default_stall_threshold_ms(),
            listen_addr: default_listen_addr(),
            log_level: default_log_level(),
        }
    }
}

impl ProbeConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval)
    }

    pub fn sample_duration(&self) -> Duration {
        Duration::from_secs(self.sample_duration)
    }

    pub fn stall_threshold(&self) -> Duration {
        Duration::from_millis(self.stall_threshold_ms)
    }
}

impl Config {
    /// Load the configuration from a TOML file. A probe without streams is
    /// useless, so a missing file is an error rather than a silent default.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Derive the immutable stream descriptors from the streams mapping.
    ///
    /// The line role is case-folded to lower before use. The tag map is the
    /// entry's `tags` map, plus the `tag` shorthand when no `tag` key exists,
    /// with the system keys `project` / `line` / `id` set last so user values
    /// can never shadow them.
    pub fn stream_descriptors(&self) -> Vec<StreamDescriptor> {
        let mut descriptors = Vec::new();

        for (project, groups) in &self.streams {
            for (group_name, entries) in groups {
                let line = group_name.to_lowercase();

                for entry in entries {
                    let mut labels = entry.tags.clone();

                    if let Some(tag) = &entry.tag {
                        labels.entry("tag".to_string()).or_insert_with(|| tag.clone());
                    }

                    labels.insert("project".to_string(), project.clone());
                    labels.insert("line".to_string(), line.clone());
                    labels.insert("id".to_string(), entry.id.clone());

                    descriptors.push(StreamDescriptor::new(
                        entry.id.clone(),
                        entry.url.clone(),
                        project.clone(),
                        line.clone(),
                        labels,
                    ));
                }
            }
        }

        descriptors
    }
}
