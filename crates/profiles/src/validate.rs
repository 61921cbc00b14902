//! Schema-checked parsing of sync payloads (shared file and HTTP body).
//!
//! Returns a tagged result instead of throwing past the channel boundary:
//! malformed JSON is [`ProfileError::Parse`], a shape or invariant violation
//! is [`ProfileError::Validation`], and either one rejects the whole payload
//! before anything reaches the store.

use serde_json::Value;
use tracing::debug;

use crate::error::{ProfileError, Result};
use crate::schema::ProfilesConfig;

/// Parse and validate a raw sync-file / request body string.
pub fn parse_sync_payload(raw: &str) -> Result<ProfilesConfig> {
    let value: Value = serde_json::from_str(raw)?;
    config_from_value(value)
}

/// Validate an already-parsed JSON value (the HTTP handler's entry point).
pub fn config_from_value(value: Value) -> Result<ProfilesConfig> {
    let Some(object) = value.as_object() else {
        return Err(ProfileError::Validation(
            "payload must be a JSON object".to_string(),
        ));
    };

    match object.get("list") {
        Some(Value::Array(_)) => {}
        Some(_) => {
            return Err(ProfileError::Validation(
                "`list` must be an array".to_string(),
            ));
        }
        None => {
            return Err(ProfileError::Validation(
                "missing `list` array".to_string(),
            ));
        }
    }

    if let Some(active) = object.get("activeProfileId") {
        if !active.is_null() && !active.is_string() {
            return Err(ProfileError::Validation(
                "`activeProfileId` must be null or a string".to_string(),
            ));
        }
    }

    // Field-level shape checks (required keys, array/object types) ride on the
    // typed deserialization; its failures are schema violations, not I/O.
    let mut config: ProfilesConfig = serde_json::from_value(value)
        .map_err(|err| ProfileError::Validation(err.to_string()))?;

    validate_config(&mut config)?;
    Ok(config)
}

/// Invariant checks serde cannot express, plus normalization of a dangling
/// active pointer so the stored collection always satisfies the data-model
/// invariant.
fn validate_config(config: &mut ProfilesConfig) -> Result<()> {
    for (index, profile) in config.list.iter().enumerate() {
        for (field, value) in [
            ("id", &profile.id),
            ("name", &profile.name),
            ("persona", &profile.persona),
            ("tone", &profile.tone),
        ] {
            if value.trim().is_empty() {
                return Err(ProfileError::Validation(format!(
                    "profile #{index}: `{field}` must be a non-empty string"
                )));
            }
        }
    }

    if let Some(active) = config.active_profile_id.as_deref() {
        if !config.contains(active) {
            debug!(active, "active profile id not in payload list; clearing");
            config.active_profile_id = None;
        }
    }

    Ok(())
}
