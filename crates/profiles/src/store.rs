//! The canonical profile store: durable redb persistence, an in-memory cache,
//! and a broadcast change feed the sync channels subscribe to.
//!
//! Every mutation runs read-compute-persist-emit as one critical section
//! under a single async mutex, so a file-originated save and a
//! network-originated save cannot interleave mid-mutation; the last completed
//! save wins.

use std::path::{Path, PathBuf};

use chrono::Utc;
use redb::{Database, TableDefinition};
use tokio::sync::{Mutex, MutexGuard, broadcast};
use tracing::{debug, info};

use crate::defaults;
use crate::error::{ProfileError, Result, storage_err};
use crate::events::{ChangeOrigin, ProfilesChanged};
use crate::evolution::evolve_topics;
use crate::merge::{MergeStats, merge};
use crate::schema::{
    EvolvingProfile, MAX_LAST_PROMPT_CHARS, Profile, ProfilesConfig, truncate_chars,
    user_profile_id,
};

/// Whole-collection table: one JSON blob under [`CONFIG_KEY`].  A single row
/// keeps every save atomic and preserves the list's insertion order without a
/// separate ordering index.
const CONFIG_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("profiles_config");
const CONFIG_KEY: &str = "config";

/// Change-feed capacity.  Old events are dropped when subscribers lag.
const BROADCAST_CAP: usize = 64;

/// Fields accepted by [`ProfileStore::add`]; the store assigns the id and an
/// empty evolving profile itself.
#[derive(Debug, Clone, Default)]
pub struct ProfileDraft {
    pub name: String,
    pub persona: String,
    pub tone: String,
    pub style_guidelines: Vec<String>,
}

/// Partial update applied by [`ProfileStore::update`].  `None` fields are
/// left untouched; the evolving profile is never updatable this way.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub persona: Option<String>,
    pub tone: Option<String>,
    pub style_guidelines: Option<Vec<String>>,
}

pub struct ProfileStore {
    db: Database,
    path: PathBuf,
    state: Mutex<Option<ProfilesConfig>>,
    change_tx: broadcast::Sender<ProfilesChanged>,
}

impl ProfileStore {
    /// Open or create the profile database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(&path).map_err(storage_err)?;

        // Ensure the table exists so first reads don't fail.
        {
            let tx = db.begin_write().map_err(storage_err)?;
            tx.open_table(CONFIG_TABLE).map_err(storage_err)?;
            tx.commit().map_err(storage_err)?;
        }

        let (change_tx, _) = broadcast::channel(BROADCAST_CAP);
        info!(path = %path.display(), "profile store opened");
        Ok(Self {
            db,
            path,
            state: Mutex::new(None),
            change_tx,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Subscribe to the change feed.  Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<ProfilesChanged> {
        self.change_tx.subscribe()
    }

    /// Current collection: cached copy if present, otherwise loaded from
    /// disk, seeding the built-in defaults when the database is empty.
    pub async fn get_all(&self) -> Result<ProfilesConfig> {
        let guard = self.config_mut().await?;
        Ok(guard.as_ref().expect("config loaded by config_mut").clone())
    }

    /// The profile referenced by the active pointer, if any.
    pub async fn get_active_profile(&self) -> Result<Option<Profile>> {
        let config = self.get_all().await?;
        Ok(config.active_profile().cloned())
    }

    /// Create a profile from `draft` with a fresh id and an empty evolving
    /// profile, append it, persist, and emit a change event.
    pub async fn add(&self, draft: ProfileDraft) -> Result<Profile> {
        let mut guard = self.config_mut().await?;
        let config = guard.as_mut().expect("config loaded by config_mut");

        let profile = Profile {
            id: user_profile_id(),
            name: draft.name,
            persona: draft.persona,
            tone: draft.tone,
            style_guidelines: draft.style_guidelines,
            evolving: EvolvingProfile::empty(Utc::now()),
        };
        config.list.push(profile.clone());

        self.persist(config)?;
        self.emit(config, ChangeOrigin::Local);
        Ok(profile)
    }

    /// Shallow-merge `fields` into the profile with `id`.
    pub async fn update(&self, id: &str, fields: ProfileUpdate) -> Result<Profile> {
        let mut guard = self.config_mut().await?;
        let config = guard.as_mut().expect("config loaded by config_mut");

        let profile = config
            .find_mut(id)
            .ok_or_else(|| ProfileError::NotFound(id.to_string()))?;
        if let Some(name) = fields.name {
            profile.name = name;
        }
        if let Some(persona) = fields.persona {
            profile.persona = persona;
        }
        if let Some(tone) = fields.tone {
            profile.tone = tone;
        }
        if let Some(style_guidelines) = fields.style_guidelines {
            profile.style_guidelines = style_guidelines;
        }
        let updated = profile.clone();

        self.persist(config)?;
        self.emit(config, ChangeOrigin::Local);
        Ok(updated)
    }

    /// Remove the profile with `id`, clearing the active pointer if it
    /// referenced the deleted profile.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let mut guard = self.config_mut().await?;
        let config = guard.as_mut().expect("config loaded by config_mut");

        if !config.contains(id) {
            return Err(ProfileError::NotFound(id.to_string()));
        }
        config.list.retain(|p| p.id != id);
        if config.active_profile_id.as_deref() == Some(id) {
            config.active_profile_id = None;
        }

        self.persist(config)?;
        self.emit(config, ChangeOrigin::Local);
        Ok(())
    }

    /// Point the active pointer at `id` (which must exist), or clear it.
    pub async fn set_active(&self, id: Option<&str>) -> Result<()> {
        let mut guard = self.config_mut().await?;
        let config = guard.as_mut().expect("config loaded by config_mut");

        if let Some(id) = id {
            if !config.contains(id) {
                return Err(ProfileError::NotFound(id.to_string()));
            }
        }
        config.active_profile_id = id.map(str::to_string);

        self.persist(config)?;
        self.emit(config, ChangeOrigin::Local);
        Ok(())
    }

    /// Unconditional whole-collection replace, used by the import/merge
    /// paths.  The cache is updated before persisting and the change event
    /// carries the caller's origin so the channels can break loops.
    pub async fn save(&self, config: ProfilesConfig, origin: ChangeOrigin) -> Result<()> {
        let mut guard = self.state.lock().await;
        *guard = Some(config);
        let config = guard.as_ref().expect("just assigned");

        self.persist(config)?;
        self.emit(config, origin);
        Ok(())
    }

    /// Reconcile `remote` into the current collection through the merger and
    /// persist the result, all inside one critical section so a concurrent
    /// save cannot interleave between the read and the write.
    pub async fn merge_from(
        &self,
        remote: &ProfilesConfig,
        origin: ChangeOrigin,
    ) -> Result<MergeStats> {
        let mut guard = self.config_mut().await?;
        let config = guard.as_mut().expect("config loaded by config_mut");

        let (merged, stats) = merge(config, remote);
        *config = merged;

        self.persist(config)?;
        self.emit(config, origin);
        Ok(stats)
    }

    /// Fold a refinement into a profile's evolving state: topic evolution,
    /// usage bump, timestamp, truncated prompt.  Evolution is best-effort
    /// telemetry: an unknown `id` (e.g. a just-deleted profile) is a silent
    /// no-op, and no change event is emitted.
    pub async fn evolve(&self, id: &str, prompt: &str, topic_names: &[String]) -> Result<()> {
        let mut guard = self.config_mut().await?;
        let config = guard.as_mut().expect("config loaded by config_mut");

        let Some(profile) = config.find_mut(id) else {
            debug!(id, "evolution target missing; skipping");
            return Ok(());
        };

        let now = Utc::now();
        profile.evolving.topics = evolve_topics(&profile.evolving.topics, topic_names, now);
        profile.evolving.usage_count += 1;
        profile.evolving.last_updated = now;
        profile.evolving.last_prompt = truncate_chars(prompt, MAX_LAST_PROMPT_CHARS).to_string();

        self.persist(config)?;
        Ok(())
    }

    /// Replace everything with the seeded built-in defaults.
    pub async fn reset(&self) -> Result<()> {
        let mut guard = self.state.lock().await;
        let config = defaults::default_config(Utc::now());
        *guard = Some(config);
        let config = guard.as_ref().expect("just assigned");

        self.persist(config)?;
        self.emit(config, ChangeOrigin::Local);
        info!("profile store reset to built-in defaults");
        Ok(())
    }

    // ── internals ─────────────────────────────────────────────────────────

    /// Lock the cache, filling it from disk (seeding defaults on an empty
    /// database) if this is the first access.
    async fn config_mut(&self) -> Result<MutexGuard<'_, Option<ProfilesConfig>>> {
        let mut guard = self.state.lock().await;
        if guard.is_none() {
            let config = match self.load_from_db()? {
                Some(config) => config,
                None => {
                    let seeded = defaults::default_config(Utc::now());
                    self.persist(&seeded)?;
                    info!(profiles = seeded.list.len(), "seeded built-in profiles");
                    seeded
                }
            };
            *guard = Some(config);
        }
        Ok(guard)
    }

    fn load_from_db(&self) -> Result<Option<ProfilesConfig>> {
        let tx = self.db.begin_read().map_err(storage_err)?;
        let table = tx.open_table(CONFIG_TABLE).map_err(storage_err)?;
        match table.get(CONFIG_KEY).map_err(storage_err)? {
            None => Ok(None),
            Some(bytes) => {
                let config: ProfilesConfig = serde_json::from_slice(bytes.value())?;
                Ok(Some(config))
            }
        }
    }

    fn persist(&self, config: &ProfilesConfig) -> Result<()> {
        let bytes = serde_json::to_vec(config)?;
        let tx = self.db.begin_write().map_err(storage_err)?;
        {
            let mut table = tx.open_table(CONFIG_TABLE).map_err(storage_err)?;
            table
                .insert(CONFIG_KEY, bytes.as_slice())
                .map_err(storage_err)?;
        }
        tx.commit().map_err(storage_err)?;
        Ok(())
    }

    fn emit(&self, config: &ProfilesConfig, origin: ChangeOrigin) {
        // Send fails only when nobody is subscribed; that's fine.
        let _ = self.change_tx.send(ProfilesChanged {
            config: config.clone(),
            origin,
        });
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;
    use tokio::sync::broadcast::error::TryRecvError;

    use super::*;

    fn open_store(dir: &TempDir) -> ProfileStore {
        ProfileStore::open(dir.path().join("profiles.redb")).unwrap()
    }

    fn draft(name: &str) -> ProfileDraft {
        ProfileDraft {
            name: name.to_string(),
            persona: format!("{name} persona"),
            tone: "neutral".to_string(),
            style_guidelines: vec!["keep it short".to_string()],
        }
    }

    #[tokio::test]
    async fn first_access_seeds_builtin_defaults() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let config = store.get_all().await.unwrap();
        assert_eq!(config.list.len(), 3);
        assert!(config.active_profile_id.is_none());
    }

    #[tokio::test]
    async fn seeded_defaults_survive_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = open_store(&dir);
            store.get_all().await.unwrap();
        }
        let store = open_store(&dir);
        let config = store.get_all().await.unwrap();
        assert_eq!(config.list.len(), 3);
    }

    #[tokio::test]
    async fn add_assigns_id_and_empty_evolving_profile() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let profile = store.add(draft("Writer")).await.unwrap();
        assert!(!profile.id.is_empty());
        assert_eq!(profile.evolving.usage_count, 0);
        assert!(profile.evolving.topics.is_empty());

        let config = store.get_all().await.unwrap();
        assert!(config.contains(&profile.id));
        // Appended after the seeded built-ins.
        assert_eq!(config.list.last().unwrap().id, profile.id);
    }

    #[tokio::test]
    async fn update_merges_only_provided_fields() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let profile = store.add(draft("Writer")).await.unwrap();

        let updated = store
            .update(
                &profile.id,
                ProfileUpdate {
                    tone: Some("playful".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.tone, "playful");
        assert_eq!(updated.persona, profile.persona);
        assert_eq!(updated.name, profile.name);
    }

    #[tokio::test]
    async fn update_unknown_id_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let err = store
            .update("ghost", ProfileUpdate::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ProfileError::NotFound(_)));
    }

    #[tokio::test]
    async fn delete_clears_active_pointer() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let profile = store.add(draft("Writer")).await.unwrap();
        store.set_active(Some(&profile.id)).await.unwrap();

        store.delete(&profile.id).await.unwrap();
        let config = store.get_all().await.unwrap();
        assert!(!config.contains(&profile.id));
        assert!(config.active_profile_id.is_none());
    }

    #[tokio::test]
    async fn delete_unknown_id_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let err = store.delete("ghost").await.unwrap_err();
        assert!(matches!(err, ProfileError::NotFound(_)));
    }

    #[tokio::test]
    async fn set_active_validates_the_id() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let profile = store.add(draft("Writer")).await.unwrap();

        store.set_active(Some(&profile.id)).await.unwrap();
        let active = store.get_active_profile().await.unwrap().unwrap();
        assert_eq!(active.id, profile.id);

        let err = store.set_active(Some("ghost")).await.unwrap_err();
        assert!(matches!(err, ProfileError::NotFound(_)));

        store.set_active(None).await.unwrap();
        assert!(store.get_active_profile().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn each_mutation_emits_exactly_one_event() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        store.get_all().await.unwrap(); // seed before subscribing

        let mut rx = store.subscribe();
        let profile = store.add(draft("Writer")).await.unwrap();
        let event = rx.try_recv().unwrap();
        assert_eq!(event.origin, ChangeOrigin::Local);
        assert!(event.config.contains(&profile.id));
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn save_replaces_everything_and_tags_origin() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        store.get_all().await.unwrap();

        let mut rx = store.subscribe();
        let replacement = ProfilesConfig::empty();
        store
            .save(replacement.clone(), ChangeOrigin::Network)
            .await
            .unwrap();

        let event = rx.try_recv().unwrap();
        assert_eq!(event.origin, ChangeOrigin::Network);
        assert!(event.config.list.is_empty());
        assert_eq!(store.get_all().await.unwrap(), replacement);
    }

    #[tokio::test]
    async fn evolve_updates_counters_and_truncates_prompt() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let profile = store.add(draft("Writer")).await.unwrap();

        let long_prompt = "x".repeat(500);
        store
            .evolve(
                &profile.id,
                &long_prompt,
                &["rust".to_string(), "async".to_string()],
            )
            .await
            .unwrap();

        let config = store.get_all().await.unwrap();
        let evolved = config.find(&profile.id).unwrap();
        assert_eq!(evolved.evolving.usage_count, 1);
        assert_eq!(evolved.evolving.topics.len(), 2);
        assert_eq!(evolved.evolving.last_prompt.chars().count(), 200);
    }

    #[tokio::test]
    async fn evolve_unknown_id_is_a_silent_no_op() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        store.get_all().await.unwrap();

        let mut rx = store.subscribe();
        store
            .evolve("ghost", "prompt", &["topic".to_string()])
            .await
            .unwrap();
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn evolve_does_not_emit_change_events() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let profile = store.add(draft("Writer")).await.unwrap();

        let mut rx = store.subscribe();
        store
            .evolve(&profile.id, "prompt", &["topic".to_string()])
            .await
            .unwrap();
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn merge_from_reconciles_and_emits_once() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let local_only = store.add(draft("LocalOnly")).await.unwrap();

        let mut rx = store.subscribe();
        let remote = ProfilesConfig::empty();
        let stats = store
            .merge_from(&remote, ChangeOrigin::File)
            .await
            .unwrap();
        assert_eq!(stats.added, 0);

        let event = rx.try_recv().unwrap();
        assert_eq!(event.origin, ChangeOrigin::File);
        assert!(event.config.contains(&local_only.id));
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn mutations_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let id = {
            let store = open_store(&dir);
            let profile = store.add(draft("Writer")).await.unwrap();
            store.set_active(Some(&profile.id)).await.unwrap();
            profile.id
        };

        let store = open_store(&dir);
        let config = store.get_all().await.unwrap();
        assert!(config.contains(&id));
        assert_eq!(config.active_profile_id.as_deref(), Some(id.as_str()));
    }

    #[tokio::test]
    async fn reset_restores_builtins() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let profile = store.add(draft("Writer")).await.unwrap();

        store.reset().await.unwrap();
        let config = store.get_all().await.unwrap();
        assert!(!config.contains(&profile.id));
        assert_eq!(config.list.len(), 3);
    }
}
