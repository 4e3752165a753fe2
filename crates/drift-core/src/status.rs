//! # Sync Status Snapshot
//!
//! Immutable snapshot of engine state, broadcast to observers on every
//! change. Snapshots are values: the engine builds the next one with the
//! copy-with helpers and sends it whole, so observers can coalesce but
//! never see a half-updated state.
//!
//! The nullable fields (`last_sync_at`, `last_error`, `next_sync_at`) have
//! setters taking `Option<T>`, which keeps "set to absent" expressible:
//! `with_last_error(None)` clears the error, not-calling leaves it alone.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// =============================================================================
// Sync Mode
// =============================================================================

/// How sync cycles are initiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Only explicit `sync()` calls run a cycle.
    #[default]
    Manual,

    /// A periodic timer and connectivity regain trigger cycles.
    Automatic,

    /// Cycles run at externally scheduled times.
    Scheduled,
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncMode::Manual => write!(f, "manual"),
            SyncMode::Automatic => write!(f, "automatic"),
            SyncMode::Scheduled => write!(f, "scheduled"),
        }
    }
}

impl FromStr for SyncMode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "manual" => Ok(SyncMode::Manual),
            "automatic" | "auto" => Ok(SyncMode::Automatic),
            "scheduled" => Ok(SyncMode::Scheduled),
            other => Err(CoreError::unknown("sync mode", other)),
        }
    }
}

// =============================================================================
// Status Snapshot
// =============================================================================

/// Immutable snapshot of engine state at a moment in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncStatus {
    /// Last observed connectivity state.
    pub is_online: bool,

    /// Whether a sync cycle is currently running.
    pub is_syncing: bool,

    /// Completion time of the last successful cycle.
    pub last_sync_at: Option<DateTime<Utc>>,

    /// Rows across all tables with `sync_status != 'synced'`.
    pub pending_count: i64,

    /// Tables that failed during the last cycle.
    pub failed_count: i64,

    /// Last engine-level error message.
    pub last_error: Option<String>,

    /// Progress of the running cycle, in [0, 1].
    pub sync_progress: f64,

    /// Whether the periodic auto-sync timer is armed.
    pub auto_sync_enabled: bool,

    /// How cycles are initiated.
    pub sync_mode: SyncMode,

    /// Next scheduled cycle, when known.
    pub next_sync_at: Option<DateTime<Utc>>,
}

impl Default for SyncStatus {
    fn default() -> Self {
        SyncStatus {
            is_online: false,
            is_syncing: false,
            last_sync_at: None,
            pending_count: 0,
            failed_count: 0,
            last_error: None,
            sync_progress: 0.0,
            auto_sync_enabled: false,
            sync_mode: SyncMode::Manual,
            next_sync_at: None,
        }
    }
}

impl SyncStatus {
    // -------------------------------------------------------------------------
    // Copy-with helpers
    // -------------------------------------------------------------------------

    pub fn with_is_online(mut self, v: bool) -> Self {
        self.is_online = v;
        self
    }

    pub fn with_is_syncing(mut self, v: bool) -> Self {
        self.is_syncing = v;
        self
    }

    pub fn with_last_sync_at(mut self, v: Option<DateTime<Utc>>) -> Self {
        self.last_sync_at = v;
        self
    }

    pub fn with_pending_count(mut self, v: i64) -> Self {
        self.pending_count = v;
        self
    }

    pub fn with_failed_count(mut self, v: i64) -> Self {
        self.failed_count = v;
        self
    }

    pub fn with_last_error(mut self, v: Option<String>) -> Self {
        self.last_error = v;
        self
    }

    /// Sets the cycle progress, clamped to [0, 1].
    pub fn with_sync_progress(mut self, v: f64) -> Self {
        self.sync_progress = v.clamp(0.0, 1.0);
        self
    }

    pub fn with_auto_sync_enabled(mut self, v: bool) -> Self {
        self.auto_sync_enabled = v;
        self
    }

    pub fn with_sync_mode(mut self, v: SyncMode) -> Self {
        self.sync_mode = v;
        self
    }

    pub fn with_next_sync_at(mut self, v: Option<DateTime<Utc>>) -> Self {
        self.next_sync_at = v;
        self
    }

    // -------------------------------------------------------------------------
    // Derived predicates
    // -------------------------------------------------------------------------

    /// Rows are waiting to be pushed.
    pub fn has_pending_items(&self) -> bool {
        self.pending_count > 0
    }

    /// Tables failed during the last cycle.
    pub fn has_failed_syncs(&self) -> bool {
        self.failed_count > 0
    }

    /// No failures and no standing error.
    pub fn is_healthy(&self) -> bool {
        self.failed_count == 0 && self.last_error.is_none()
    }

    /// Time elapsed since the last successful cycle.
    pub fn time_since_last_sync(&self) -> Option<Duration> {
        self.last_sync_at.map(|ts| Utc::now() - ts)
    }

    /// A cycle completed within the last hour.
    pub fn is_recently_synced(&self) -> bool {
        self.time_since_last_sync()
            .map(|d| d <= Duration::hours(1))
            .unwrap_or(false)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_snapshot() {
        let s = SyncStatus::default();
        assert!(!s.is_online);
        assert!(!s.is_syncing);
        assert!(s.is_healthy());
        assert!(!s.has_pending_items());
        assert_eq!(s.sync_mode, SyncMode::Manual);
    }

    #[test]
    fn test_copy_with_leaves_original_untouched() {
        let a = SyncStatus::default();
        let b = a.clone().with_is_syncing(true).with_pending_count(3);
        assert!(!a.is_syncing);
        assert!(b.is_syncing);
        assert_eq!(b.pending_count, 3);
    }

    #[test]
    fn test_nullable_setters_can_clear() {
        let s = SyncStatus::default()
            .with_last_error(Some("boom".into()))
            .with_last_error(None);
        assert!(s.last_error.is_none());
        assert!(s.is_healthy());
    }

    #[test]
    fn test_progress_clamped() {
        assert_eq!(SyncStatus::default().with_sync_progress(1.7).sync_progress, 1.0);
        assert_eq!(SyncStatus::default().with_sync_progress(-0.2).sync_progress, 0.0);
    }

    #[test]
    fn test_is_healthy_tracks_failures_and_error() {
        let s = SyncStatus::default().with_failed_count(1);
        assert!(!s.is_healthy());
        let s = SyncStatus::default().with_last_error(Some("x".into()));
        assert!(!s.is_healthy());
    }

    #[test]
    fn test_recently_synced() {
        let s = SyncStatus::default().with_last_sync_at(Some(Utc::now()));
        assert!(s.is_recently_synced());
        let s = SyncStatus::default()
            .with_last_sync_at(Some(Utc::now() - Duration::hours(2)));
        assert!(!s.is_recently_synced());
        assert!(!SyncStatus::default().is_recently_synced());
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!("AUTOMATIC".parse::<SyncMode>().unwrap(), SyncMode::Automatic);
        assert_eq!("manual".parse::<SyncMode>().unwrap(), SyncMode::Manual);
        assert!("sometimes".parse::<SyncMode>().is_err());
    }
}
