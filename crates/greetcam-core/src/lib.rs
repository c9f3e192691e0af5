//! greetcam-core — Face identity tracking and greeting decisions.
//!
//! Turns per-frame face boxes from an external detector into stable
//! identities, decides which identities to greet, and keeps daily
//! greeting statistics on disk.

pub mod greeter;
pub mod policy;
pub mod stats;
pub mod tracker;
pub mod types;

pub use greeter::{FrameReport, Greeter};
pub use policy::{GreetingPolicy, PolicyConfig};
pub use stats::{DailyStats, StatsError, StatsStore};
pub use tracker::{Tracker, TrackerConfig};
pub use types::{
    BoundingBox, Detection, FrameDetections, GreetingDecision, GreetingEvent, SkipReason,
    Timestamp, TrackedFace, Variant,
};

use std::path::PathBuf;

/// Base data directory: `$XDG_DATA_HOME/greetcam`, else `~/.local/share/greetcam`.
pub fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("greetcam")
}

/// Default directory for daily statistics records.
pub fn default_stats_dir() -> PathBuf {
    default_data_dir().join("stats")
}
