use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;
use std::time::Duration;

use crate::common::NORMAL_PRIORITY;
use crate::config::AppConfig;

static REGEX_VERSION_GRADE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(fix|flux)(\d+)").expect("static regex"));

/// Queue partition. No ordering holds across partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Partition {
    /// Cheap, user-facing stills
    Fix,
    /// Expensive transcodes
    Flux,
}

impl Partition {
    pub fn of(version: &str) -> Self {
        if version.contains("fix") {
            Partition::Fix
        } else {
            Partition::Flux
        }
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Partition::Fix => write!(f, "fix"),
            Partition::Flux => write!(f, "flux"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOptions {
    pub queue: Partition,
    /// Higher runs sooner
    pub priority: i32,
    /// The producer awaits the job's outcome
    pub wait: bool,
    pub ttr: Duration,
    /// May run inline when the transport is unavailable
    pub fallback: bool,
}

impl JobOptions {
    /// Scheduling derived from the version name alone.
    ///
    /// `fixN` loses N priority points, `fixNadmin` loses 2N, `fluxN` loses N.
    /// Only `fix3*` blocks the producer.
    pub fn for_version(version: &str, config: &AppConfig) -> Self {
        let queue = Partition::of(version);
        let grade = REGEX_VERSION_GRADE
            .captures(version)
            .and_then(|caps| caps[2].parse::<i32>().ok())
            .unwrap_or(0);
        let penalty = if queue == Partition::Fix && version.ends_with("admin") {
            grade.saturating_mul(2)
        } else {
            grade
        };
        let (ttr, fallback) = match queue {
            Partition::Fix => (config.fix_ttr(), true),
            Partition::Flux => (config.flux_ttr(), false),
        };
        Self {
            queue,
            priority: NORMAL_PRIORITY.saturating_sub(penalty),
            wait: version.starts_with("fix3"),
            ttr,
            fallback,
        }
    }
}

/// What travels through the queue: the worker reloads everything else.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobPayload {
    pub media_id: u64,
    pub version: String,
}
