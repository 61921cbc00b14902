//! Built-in profiles seeded into an empty store on first access.
//!
//! Ids are derived deterministically from the profile name so that two peers
//! seeding independently end up with the same ids and the merger treats the
//! built-ins as one profile rather than duplicating them.

use chrono::{DateTime, Utc};

use crate::schema::{EvolvingProfile, Profile, ProfilesConfig, builtin_profile_id};

pub fn builtin_profiles(now: DateTime<Utc>) -> Vec<Profile> {
    vec![
        Profile {
            id: builtin_profile_id("Professional"),
            name: "Professional".to_string(),
            persona: "A precise business writing assistant".to_string(),
            tone: "formal, confident".to_string(),
            style_guidelines: vec![
                "Prefer active voice".to_string(),
                "Keep sentences under 25 words".to_string(),
                "Avoid slang and filler phrases".to_string(),
            ],
            evolving: EvolvingProfile::empty(now),
        },
        Profile {
            id: builtin_profile_id("Casual"),
            name: "Casual".to_string(),
            persona: "A friendly conversational writing assistant".to_string(),
            tone: "warm, relaxed".to_string(),
            style_guidelines: vec![
                "Use contractions".to_string(),
                "Short paragraphs, everyday vocabulary".to_string(),
            ],
            evolving: EvolvingProfile::empty(now),
        },
        Profile {
            id: builtin_profile_id("Technical"),
            name: "Technical".to_string(),
            persona: "A software engineer explaining to other engineers".to_string(),
            tone: "direct, unambiguous".to_string(),
            style_guidelines: vec![
                "Name concrete tools and versions".to_string(),
                "Prefer code identifiers over prose descriptions".to_string(),
                "No marketing language".to_string(),
            ],
            evolving: EvolvingProfile::empty(now),
        },
    ]
}

/// The collection a fresh store starts with: built-ins, no active profile.
pub fn default_config(now: DateTime<Utc>) -> ProfilesConfig {
    ProfilesConfig {
        list: builtin_profiles(now),
        active_profile_id: None,
        storage_location: None,
    }
}
