//! # Conflict Model
//!
//! A conflict is divergent evolution of the same entity on the local and
//! remote replicas. This module defines the taxonomy, the resolution
//! strategies, the pluggable resolver contract, and the default resolver.
//!
//! ## Resolution Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  pull detects divergence                                                │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SyncConflict { local, remote, kind }                                   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  resolvers, descending priority ──► first with can_resolve(kind)       │
//! │       │                                                                 │
//! │       ├── Some(winner) ──► written back as synced                      │
//! │       └── None ──► persisted to sync_conflicts, row marked 'conflict'  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::SyncEntity;
use crate::error::CoreError;

// =============================================================================
// Conflict Kind
// =============================================================================

/// Taxonomy of detected conflicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// Both local and remote advanced past the last sync.
    BothModified,
    /// Local tombstone vs live remote.
    LocalDeletedRemoteModified,
    /// Local live vs remote tombstone.
    LocalModifiedRemoteDeleted,
    /// Both sides tombstoned.
    BothDeleted,
    /// Version numbers diverged without timestamp divergence.
    VersionMismatch,
    /// Payload failed validation; not resolvable by the default resolver.
    DataCorruption,
}

impl ConflictKind {
    /// Returns the canonical snake_case wire string.
    pub const fn as_str(&self) -> &'static str {
        match self {
            ConflictKind::BothModified => "both_modified",
            ConflictKind::LocalDeletedRemoteModified => "local_deleted_remote_modified",
            ConflictKind::LocalModifiedRemoteDeleted => "local_modified_remote_deleted",
            ConflictKind::BothDeleted => "both_deleted",
            ConflictKind::VersionMismatch => "version_mismatch",
            ConflictKind::DataCorruption => "data_corruption",
        }
    }
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "both_modified" => Ok(ConflictKind::BothModified),
            "local_deleted_remote_modified" => Ok(ConflictKind::LocalDeletedRemoteModified),
            "local_modified_remote_deleted" => Ok(ConflictKind::LocalModifiedRemoteDeleted),
            "both_deleted" => Ok(ConflictKind::BothDeleted),
            "version_mismatch" => Ok(ConflictKind::VersionMismatch),
            "data_corruption" => Ok(ConflictKind::DataCorruption),
            other => Err(CoreError::unknown("conflict kind", other)),
        }
    }
}

// =============================================================================
// Resolution Strategy
// =============================================================================

/// How a resolver decides the winner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    /// The local entity wins.
    UseLocal,
    /// The remote entity wins.
    UseRemote,
    /// The entity with the greater `updated_at` wins.
    #[default]
    UseLatest,
    /// The entity with the greater `version` wins.
    UseHighestVersion,
    /// Field-level merge; falls back to `UseLatest` unless overridden.
    Merge,
    /// Application-defined; the default resolver returns nothing.
    Custom,
    /// Leave the conflict unresolved.
    Skip,
}

impl ResolutionStrategy {
    /// Returns the canonical snake_case wire string.
    pub const fn as_str(&self) -> &'static str {
        match self {
            ResolutionStrategy::UseLocal => "use_local",
            ResolutionStrategy::UseRemote => "use_remote",
            ResolutionStrategy::UseLatest => "use_latest",
            ResolutionStrategy::UseHighestVersion => "use_highest_version",
            ResolutionStrategy::Merge => "merge",
            ResolutionStrategy::Custom => "custom",
            ResolutionStrategy::Skip => "skip",
        }
    }
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResolutionStrategy {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "use_local" => Ok(ResolutionStrategy::UseLocal),
            "use_remote" => Ok(ResolutionStrategy::UseRemote),
            "use_latest" => Ok(ResolutionStrategy::UseLatest),
            "use_highest_version" => Ok(ResolutionStrategy::UseHighestVersion),
            "merge" => Ok(ResolutionStrategy::Merge),
            "custom" => Ok(ResolutionStrategy::Custom),
            "skip" => Ok(ResolutionStrategy::Skip),
            other => Err(CoreError::unknown("resolution strategy", other)),
        }
    }
}

// =============================================================================
// Sync Conflict
// =============================================================================

/// A detected conflict, carrying both sides of the divergence.
#[derive(Debug, Clone)]
pub struct SyncConflict {
    /// Conflict record id (UUID once persisted).
    pub id: String,

    /// Id of the conflicted entity.
    pub entity_id: String,

    /// Table the entity belongs to.
    pub entity_type: String,

    /// The local replica's entity.
    pub local: Box<dyn SyncEntity>,

    /// The remote replica's entity.
    pub remote: Box<dyn SyncEntity>,

    pub kind: ConflictKind,

    pub detected_at: DateTime<Utc>,

    pub is_resolved: bool,
}

impl SyncConflict {
    /// Builds an unresolved conflict between two sides of an entity.
    pub fn detect(
        id: impl Into<String>,
        local: Box<dyn SyncEntity>,
        remote: Box<dyn SyncEntity>,
        kind: ConflictKind,
    ) -> Self {
        let entity_id = local.id().to_string();
        let entity_type = local.table_name().to_string();
        SyncConflict {
            id: id.into(),
            entity_id,
            entity_type,
            local,
            remote,
            kind,
            detected_at: Utc::now(),
            is_resolved: false,
        }
    }

    /// Classifies the divergence between two sides.
    ///
    /// Tombstone combinations are looked at first; a surviving pair that
    /// only disagrees on `version` is a `VersionMismatch`, anything else
    /// is `BothModified`.
    pub fn classify(local: &dyn SyncEntity, remote: &dyn SyncEntity) -> ConflictKind {
        match (local.is_deleted(), remote.is_deleted()) {
            (true, true) => ConflictKind::BothDeleted,
            (true, false) => ConflictKind::LocalDeletedRemoteModified,
            (false, true) => ConflictKind::LocalModifiedRemoteDeleted,
            (false, false) => {
                if local.version() != remote.version()
                    && local.updated_at() == remote.updated_at()
                {
                    ConflictKind::VersionMismatch
                } else {
                    ConflictKind::BothModified
                }
            }
        }
    }
}

// =============================================================================
// Resolver Contract
// =============================================================================

/// Pluggable strategy that produces the winning entity for a conflict.
///
/// Resolvers are consulted in descending `priority` order; the first whose
/// `can_resolve` accepts the conflict kind gets to decide. Returning
/// `None` passes the conflict on to manual resolution.
pub trait ConflictResolver: Send + Sync {
    /// Registry name; duplicate registrations replace by name.
    fn name(&self) -> &str;

    /// Higher priority resolvers are consulted first.
    fn priority(&self) -> i32 {
        0
    }

    /// Whether this resolver handles the given conflict kind.
    fn can_resolve(&self, kind: ConflictKind) -> bool;

    /// Produces the winning entity, or `None` to decline.
    fn resolve(&self, conflict: &SyncConflict) -> Option<Box<dyn SyncEntity>>;

    /// Strategy recorded against conflicts this resolver settles.
    fn strategy(&self) -> ResolutionStrategy {
        ResolutionStrategy::Custom
    }
}

// =============================================================================
// Default Resolver
// =============================================================================

/// The built-in resolver, registered under the name `"default"` with
/// priority 0. Handles every kind except `DataCorruption`.
#[derive(Debug, Clone)]
pub struct DefaultResolver {
    strategy: ResolutionStrategy,
}

impl DefaultResolver {
    pub fn new(strategy: ResolutionStrategy) -> Self {
        DefaultResolver { strategy }
    }

    /// Picks by `updated_at`; the remote wins ties (server authority).
    fn latest(conflict: &SyncConflict) -> Box<dyn SyncEntity> {
        if conflict.local.updated_at() > conflict.remote.updated_at() {
            conflict.local.clone()
        } else {
            conflict.remote.clone()
        }
    }

    /// Picks by `version`; the remote wins ties.
    fn highest_version(conflict: &SyncConflict) -> Box<dyn SyncEntity> {
        if conflict.local.version() > conflict.remote.version() {
            conflict.local.clone()
        } else {
            conflict.remote.clone()
        }
    }
}

impl Default for DefaultResolver {
    fn default() -> Self {
        DefaultResolver::new(ResolutionStrategy::UseLatest)
    }
}

impl ConflictResolver for DefaultResolver {
    fn name(&self) -> &str {
        "default"
    }

    fn strategy(&self) -> ResolutionStrategy {
        self.strategy
    }

    fn can_resolve(&self, kind: ConflictKind) -> bool {
        kind != ConflictKind::DataCorruption
    }

    fn resolve(&self, conflict: &SyncConflict) -> Option<Box<dyn SyncEntity>> {
        match self.strategy {
            ResolutionStrategy::UseLocal => Some(conflict.local.clone()),
            ResolutionStrategy::UseRemote => Some(conflict.remote.clone()),
            ResolutionStrategy::UseLatest => Some(Self::latest(conflict)),
            ResolutionStrategy::UseHighestVersion => Some(Self::highest_version(conflict)),
            // Merge has no field-level implementation here; last write wins
            ResolutionStrategy::Merge => Some(Self::latest(conflict)),
            ResolutionStrategy::Custom | ResolutionStrategy::Skip => None,
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{JsonMap, RawEntity};
    use crate::time;

    fn entity(id: &str, updated_ms: i64, version: i64, deleted: bool) -> Box<dyn SyncEntity> {
        let mut payload = JsonMap::new();
        payload.insert("id".into(), serde_json::json!(id));
        payload.insert("created_at".into(), serde_json::json!(0));
        payload.insert("updated_at".into(), serde_json::json!(updated_ms));
        payload.insert("version".into(), serde_json::json!(version));
        payload.insert("is_deleted".into(), serde_json::json!(deleted));
        Box::new(RawEntity::from_payload("todos", payload))
    }

    fn conflict(local: Box<dyn SyncEntity>, remote: Box<dyn SyncEntity>) -> SyncConflict {
        let kind = SyncConflict::classify(local.as_ref(), remote.as_ref());
        SyncConflict::detect("c1", local, remote, kind)
    }

    #[test]
    fn test_classify_tombstones() {
        assert_eq!(
            SyncConflict::classify(
                entity("a", 1, 1, true).as_ref(),
                entity("a", 2, 1, false).as_ref()
            ),
            ConflictKind::LocalDeletedRemoteModified
        );
        assert_eq!(
            SyncConflict::classify(
                entity("a", 1, 1, false).as_ref(),
                entity("a", 2, 1, true).as_ref()
            ),
            ConflictKind::LocalModifiedRemoteDeleted
        );
        assert_eq!(
            SyncConflict::classify(
                entity("a", 1, 1, true).as_ref(),
                entity("a", 2, 1, true).as_ref()
            ),
            ConflictKind::BothDeleted
        );
    }

    #[test]
    fn test_classify_version_mismatch_needs_equal_timestamps() {
        assert_eq!(
            SyncConflict::classify(
                entity("a", 5_000, 1, false).as_ref(),
                entity("a", 5_000, 2, false).as_ref()
            ),
            ConflictKind::VersionMismatch
        );
        assert_eq!(
            SyncConflict::classify(
                entity("a", 5_000, 1, false).as_ref(),
                entity("a", 6_000, 2, false).as_ref()
            ),
            ConflictKind::BothModified
        );
    }

    #[test]
    fn test_default_resolver_use_latest_picks_newer() {
        let c = conflict(entity("a", 1_500, 1, false), entity("a", 2_000, 2, false));
        let winner = DefaultResolver::default().resolve(&c).unwrap();
        assert_eq!(time::to_millis(winner.updated_at()), 2_000);
    }

    #[test]
    fn test_default_resolver_latest_tie_prefers_remote() {
        let c = conflict(entity("a", 2_000, 1, false), entity("a", 2_000, 5, false));
        let winner = DefaultResolver::default().resolve(&c).unwrap();
        assert_eq!(winner.version(), 5);
    }

    #[test]
    fn test_default_resolver_highest_version() {
        let c = conflict(entity("a", 2_000, 7, false), entity("a", 3_000, 2, false));
        let winner = DefaultResolver::new(ResolutionStrategy::UseHighestVersion)
            .resolve(&c)
            .unwrap();
        assert_eq!(winner.version(), 7);
    }

    #[test]
    fn test_default_resolver_declines_custom_and_skip() {
        let c = conflict(entity("a", 1, 1, false), entity("a", 2, 2, false));
        assert!(DefaultResolver::new(ResolutionStrategy::Custom)
            .resolve(&c)
            .is_none());
        assert!(DefaultResolver::new(ResolutionStrategy::Skip)
            .resolve(&c)
            .is_none());
    }

    #[test]
    fn test_default_resolver_refuses_corruption() {
        let r = DefaultResolver::default();
        assert!(!r.can_resolve(ConflictKind::DataCorruption));
        assert!(r.can_resolve(ConflictKind::BothModified));
        assert!(r.can_resolve(ConflictKind::BothDeleted));
    }

    #[test]
    fn test_strategy_wire_round_trip() {
        for s in [
            ResolutionStrategy::UseLocal,
            ResolutionStrategy::UseRemote,
            ResolutionStrategy::UseLatest,
            ResolutionStrategy::UseHighestVersion,
            ResolutionStrategy::Merge,
            ResolutionStrategy::Custom,
            ResolutionStrategy::Skip,
        ] {
            assert_eq!(s.as_str().parse::<ResolutionStrategy>().unwrap(), s);
        }
        assert_eq!(
            "USE_LATEST".parse::<ResolutionStrategy>().unwrap(),
            ResolutionStrategy::UseLatest
        );
        assert!("use_psychic".parse::<ResolutionStrategy>().is_err());
    }
}
