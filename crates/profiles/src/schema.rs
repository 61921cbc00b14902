use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Hard cap on the evolving topic list; anything ranked below this is
/// discarded, not archived.
pub const MAX_TOPICS: usize = 10;

/// Maximum length (in characters) kept for the last refined prompt.
pub const MAX_LAST_PROMPT_CHARS: usize = 200;

/// A short keyword tracked per profile with usage count and recency.
///
/// `name` is the identity key: comparison is trimmed and case-insensitive,
/// while the stored string keeps the casing of first insertion for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topic {
    pub name: String,
    pub count: u32,
    #[serde(rename = "lastUsed")]
    pub last_used: DateTime<Utc>,
}

impl Topic {
    /// Case-insensitive identity comparison against a raw topic name.
    pub fn matches(&self, raw: &str) -> bool {
        normalize_topic(&self.name) == normalize_topic(raw)
    }
}

/// Trim + case-fold a topic name into its comparison key.
pub fn normalize_topic(name: &str) -> String {
    name.trim().to_lowercase()
}

/// The self-adjusting part of a profile: ranked topics plus usage counters.
///
/// Mutated only by the evolution operation and by whole-profile replacement
/// during merge, never merged field-by-field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvolvingProfile {
    #[serde(default)]
    pub topics: Vec<Topic>,
    #[serde(rename = "lastUpdated", default = "Utc::now")]
    pub last_updated: DateTime<Utc>,
    #[serde(rename = "usageCount", default)]
    pub usage_count: u64,
    #[serde(rename = "lastPrompt", default)]
    pub last_prompt: String,
}

impl EvolvingProfile {
    pub fn empty(now: DateTime<Utc>) -> Self {
        Self {
            topics: Vec::new(),
            last_updated: now,
            usage_count: 0,
            last_prompt: String::new(),
        }
    }
}

/// A named persona/style configuration with a self-evolving topic list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub name: String,
    pub persona: String,
    pub tone: String,
    #[serde(rename = "styleGuidelines")]
    pub style_guidelines: Vec<String>,
    #[serde(rename = "evolving_profile")]
    pub evolving: EvolvingProfile,
}

/// Where the external peer should persist synced data.  Passed through by
/// the sync channels, never interpreted here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageLocation {
    Sync,
    Local,
}

/// The whole persisted collection.  `list` keeps insertion order for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfilesConfig {
    pub list: Vec<Profile>,
    #[serde(rename = "activeProfileId", default)]
    pub active_profile_id: Option<String>,
    #[serde(
        rename = "profiles_storage_location",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub storage_location: Option<StorageLocation>,
}

impl ProfilesConfig {
    pub fn empty() -> Self {
        Self {
            list: Vec::new(),
            active_profile_id: None,
            storage_location: None,
        }
    }

    pub fn find(&self, id: &str) -> Option<&Profile> {
        self.list.iter().find(|p| p.id == id)
    }

    pub fn find_mut(&mut self, id: &str) -> Option<&mut Profile> {
        self.list.iter_mut().find(|p| p.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.find(id).is_some()
    }

    /// The profile referenced by `active_profile_id`, if any.
    pub fn active_profile(&self) -> Option<&Profile> {
        self.active_profile_id
            .as_deref()
            .and_then(|id| self.find(id))
    }
}

/// Random id for user-created profiles.
pub fn user_profile_id() -> String {
    Uuid::new_v4().to_string()
}

/// Deterministic id for built-in profiles, derived from the profile name so
/// both peers seed identical ids and merge treats them as the same profile.
pub fn builtin_profile_id(name: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut h = Sha256::new();
    h.update(name.as_bytes());
    let digest = format!("{:x}", h.finalize());
    format!("builtin-{}", &digest[..12])
}

/// Truncate `s` to at most `max_chars` Unicode scalar values.
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_matches_is_case_insensitive_and_trimmed() {
        let topic = Topic {
            name: "Machine Learning".to_string(),
            count: 1,
            last_used: Utc::now(),
        };
        assert!(topic.matches("machine learning"));
        assert!(topic.matches("  MACHINE LEARNING  "));
        assert!(!topic.matches("deep learning"));
    }

    #[test]
    fn builtin_id_is_deterministic_and_prefixed() {
        let a = builtin_profile_id("Professional");
        let b = builtin_profile_id("Professional");
        assert_eq!(a, b);
        assert!(a.starts_with("builtin-"));
        assert_ne!(a, builtin_profile_id("Casual"));
    }

    #[test]
    fn user_ids_are_unique() {
        assert_ne!(user_profile_id(), user_profile_id());
    }

    #[test]
    fn wire_field_names_match_sync_schema() {
        let profile = Profile {
            id: "p1".to_string(),
            name: "Test".to_string(),
            persona: "helper".to_string(),
            tone: "neutral".to_string(),
            style_guidelines: vec!["short".to_string()],
            evolving: EvolvingProfile::empty(Utc::now()),
        };
        let config = ProfilesConfig {
            list: vec![profile],
            active_profile_id: Some("p1".to_string()),
            storage_location: Some(StorageLocation::Sync),
        };
        let value = serde_json::to_value(&config).unwrap();
        assert!(value["activeProfileId"].is_string());
        assert_eq!(value["profiles_storage_location"], "sync");
        let entry = &value["list"][0];
        assert!(entry["styleGuidelines"].is_array());
        let evolving = &entry["evolving_profile"];
        assert!(evolving["topics"].is_array());
        assert!(evolving["lastUpdated"].is_string());
        assert_eq!(evolving["usageCount"], 0);
        assert_eq!(evolving["lastPrompt"], "");
    }

    #[test]
    fn storage_location_is_omitted_when_absent() {
        let config = ProfilesConfig::empty();
        let value = serde_json::to_value(&config).unwrap();
        assert!(value.get("profiles_storage_location").is_none());
        // activeProfileId is always present, null when unset.
        assert!(value["activeProfileId"].is_null());
    }

    #[test]
    fn truncate_chars_respects_utf8_boundaries() {
        assert_eq!(truncate_chars("héllo wörld", 5), "héllo");
        assert_eq!(truncate_chars("short", 200), "short");
    }

    #[test]
    fn active_profile_resolves_against_list() {
        let mut config = ProfilesConfig::empty();
        config.list.push(Profile {
            id: "a".to_string(),
            name: "A".to_string(),
            persona: String::new(),
            tone: String::new(),
            style_guidelines: vec![],
            evolving: EvolvingProfile::empty(Utc::now()),
        });
        config.active_profile_id = Some("a".to_string());
        assert_eq!(config.active_profile().unwrap().name, "A");
        config.active_profile_id = Some("missing".to_string());
        assert!(config.active_profile().is_none());
    }
}
