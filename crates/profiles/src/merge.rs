//! Reconciliation of two divergent profile collections.
//!
//! Deterministic and deliberately lossless: a profile that exists only on one
//! side always survives.  Deletions therefore do not propagate: a profile
//! removed from one peer reappears after the next merge.

use crate::schema::ProfilesConfig;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// Remote profiles inserted because the id was unknown locally.
    pub added: usize,
    /// Local profiles replaced by a remote copy with strictly higher usage.
    pub updated: usize,
    /// Local profiles kept (remote usage equal or lower; ties favor local).
    pub kept: usize,
}

/// Merge `remote` into `local`, preferring whichever copy of a profile has
/// seen more use.  Local order is preserved; added remote profiles are
/// appended in remote order.
pub fn merge(local: &ProfilesConfig, remote: &ProfilesConfig) -> (ProfilesConfig, MergeStats) {
    let mut stats = MergeStats::default();
    let mut list = local.list.clone();

    for remote_profile in &remote.list {
        match list.iter_mut().find(|p| p.id == remote_profile.id) {
            Some(slot) => {
                if remote_profile.evolving.usage_count > slot.evolving.usage_count {
                    *slot = remote_profile.clone();
                    stats.updated += 1;
                } else {
                    stats.kept += 1;
                }
            }
            None => {
                list.push(remote_profile.clone());
                stats.added += 1;
            }
        }
    }

    // Remote active pointer wins only if it resolves in the merged result.
    let active_profile_id = remote
        .active_profile_id
        .as_ref()
        .filter(|id| list.iter().any(|p| &p.id == *id))
        .cloned()
        .or_else(|| local.active_profile_id.clone());

    let storage_location = remote.storage_location.or(local.storage_location);

    (
        ProfilesConfig {
            list,
            active_profile_id,
            storage_location,
        },
        stats,
    )
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::schema::{EvolvingProfile, Profile, StorageLocation};

    fn profile(id: &str, usage: u64) -> Profile {
        let mut evolving = EvolvingProfile::empty(Utc::now());
        evolving.usage_count = usage;
        Profile {
            id: id.to_string(),
            name: id.to_uppercase(),
            persona: format!("{id} persona"),
            tone: "neutral".to_string(),
            style_guidelines: vec![],
            evolving,
        }
    }

    fn config(profiles: Vec<Profile>, active: Option<&str>) -> ProfilesConfig {
        ProfilesConfig {
            list: profiles,
            active_profile_id: active.map(str::to_string),
            storage_location: None,
        }
    }

    #[test]
    fn every_local_id_survives() {
        let local = config(vec![profile("a", 1), profile("b", 2)], None);
        let remote = config(vec![profile("c", 9)], None);
        let (merged, stats) = merge(&local, &remote);
        assert!(merged.contains("a"));
        assert!(merged.contains("b"));
        assert!(merged.contains("c"));
        assert_eq!(stats.added, 1);
    }

    #[test]
    fn higher_remote_usage_replaces_local() {
        let mut remote_a = profile("a", 7);
        remote_a.persona = "remote persona".to_string();
        let local = config(vec![profile("a", 3)], None);
        let remote = config(vec![remote_a], None);
        let (merged, stats) = merge(&local, &remote);
        assert_eq!(merged.find("a").unwrap().persona, "remote persona");
        assert_eq!(merged.find("a").unwrap().evolving.usage_count, 7);
        assert_eq!(stats.updated, 1);
        assert_eq!(stats.kept, 0);
    }

    #[test]
    fn equal_usage_tie_keeps_local() {
        let mut remote_a = profile("a", 3);
        remote_a.persona = "remote persona".to_string();
        let local = config(vec![profile("a", 3)], None);
        let remote = config(vec![remote_a], None);
        let (merged, stats) = merge(&local, &remote);
        assert_eq!(merged.find("a").unwrap().persona, "a persona");
        assert_eq!(stats.kept, 1);
        assert_eq!(stats.updated, 0);
    }

    #[test]
    fn remote_active_wins_when_present_after_merge() {
        // Local = {A(3), B(1), active=A}; Remote = {A(7), C(0), active=C}.
        let local = config(vec![profile("a", 3), profile("b", 1)], Some("a"));
        let remote = config(vec![profile("a", 7), profile("c", 0)], Some("c"));
        let (merged, stats) = merge(&local, &remote);

        let ids: Vec<_> = merged.list.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(merged.find("a").unwrap().evolving.usage_count, 7);
        assert_eq!(merged.find("b").unwrap().evolving.usage_count, 1);
        assert_eq!(merged.active_profile_id.as_deref(), Some("c"));
        assert_eq!(
            stats,
            MergeStats {
                added: 1,
                updated: 1,
                kept: 0
            }
        );
    }

    #[test]
    fn dangling_remote_active_falls_back_to_local() {
        let local = config(vec![profile("a", 1)], Some("a"));
        let remote = config(vec![profile("b", 1)], Some("ghost"));
        let (merged, _) = merge(&local, &remote);
        assert_eq!(merged.active_profile_id.as_deref(), Some("a"));
    }

    #[test]
    fn missing_remote_active_keeps_local() {
        let local = config(vec![profile("a", 1)], Some("a"));
        let remote = config(vec![profile("a", 0)], None);
        let (merged, _) = merge(&local, &remote);
        assert_eq!(merged.active_profile_id.as_deref(), Some("a"));
    }

    #[test]
    fn remote_storage_location_is_carried_forward() {
        let local = config(vec![], None);
        let mut remote = config(vec![], None);
        remote.storage_location = Some(StorageLocation::Local);
        let (merged, _) = merge(&local, &remote);
        assert_eq!(merged.storage_location, Some(StorageLocation::Local));

        // Absent on the remote side: local preference is preserved.
        let mut local = config(vec![], None);
        local.storage_location = Some(StorageLocation::Sync);
        let remote = config(vec![], None);
        let (merged, _) = merge(&local, &remote);
        assert_eq!(merged.storage_location, Some(StorageLocation::Sync));
    }

    #[test]
    fn merge_is_pure() {
        let local = config(vec![profile("a", 1)], Some("a"));
        let remote = config(vec![profile("a", 5)], None);
        let (first, _) = merge(&local, &remote);
        let (second, _) = merge(&local, &remote);
        assert_eq!(first, second);
    }
}
