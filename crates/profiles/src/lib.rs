pub mod defaults;
pub mod error;
pub mod events;
pub mod evolution;
pub mod merge;
pub mod schema;
pub mod store;
pub mod validate;

pub use error::{ProfileError, Result};
pub use events::{ChangeOrigin, ProfilesChanged};
pub use merge::{MergeStats, merge};
pub use schema::{EvolvingProfile, Profile, ProfilesConfig, StorageLocation, Topic};
pub use store::{ProfileDraft, ProfileStore, ProfileUpdate};
pub use validate::{config_from_value, parse_sync_payload};
