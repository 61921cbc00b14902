//! Shared-file sync channel.
//!
//! Watches one JSON file for edits made by the external peer and mirrors
//! local changes back into it.  Two mechanisms keep the mirror from feeding
//! itself: an import-in-progress guard (an import-triggered save must not
//! re-export the data it just wrote) and a content digest of our own last
//! export (a watch event for a file we wrote ourselves is not re-imported).

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use prosync_profiles::{ChangeOrigin, ProfileStore, parse_sync_payload};

/// How an inbound file reconciles with the local collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Reconcile through the merger (user-invoked "merge" sync).
    Merge,
    /// Bare replace with one-way mirroring semantics, also used by the
    /// automatic watch-triggered import.
    Replace,
}

/// Last reported outcome, published on a `watch` channel so the host can
/// surface it without the channel ever panicking on failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelStatus {
    Idle,
    ExportOk,
    ImportOk(SyncMode),
    Error(String),
}

pub struct FileSyncChannel {
    store: Arc<ProfileStore>,
    path: PathBuf,
    debounce: Duration,
    importing: Arc<AtomicBool>,
    /// SHA-256 of the bytes we last wrote, used to recognize our own writes
    /// when the watcher reports them back.
    last_written_digest: StdMutex<Option<String>>,
    status_tx: watch::Sender<ChannelStatus>,
}

impl FileSyncChannel {
    pub fn new(store: Arc<ProfileStore>, path: impl Into<PathBuf>, debounce: Duration) -> Self {
        let (status_tx, _) = watch::channel(ChannelStatus::Idle);
        Self {
            store,
            path: path.into(),
            debounce,
            importing: Arc::new(AtomicBool::new(false)),
            last_written_digest: StdMutex::new(None),
            status_tx,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn status(&self) -> watch::Receiver<ChannelStatus> {
        self.status_tx.subscribe()
    }

    pub fn import_in_progress(&self) -> bool {
        self.importing.load(Ordering::SeqCst)
    }

    /// Serialize the current collection to the sync file as one atomic write.
    /// The outcome is always published on the status channel; an error is
    /// returned for one-shot callers but never panics the channel.
    pub async fn export_to_file(&self) -> Result<()> {
        let result = self.write_snapshot().await;
        match &result {
            Ok(()) => {
                self.status_tx.send_replace(ChannelStatus::ExportOk);
            }
            Err(err) => {
                warn!(path = %self.path.display(), ?err, "sync file export failed");
                self.status_tx
                    .send_replace(ChannelStatus::Error(err.to_string()));
            }
        }
        result
    }

    /// Read, validate and apply the sync file.  A validation or parse failure
    /// aborts before anything reaches the store.  The import guard is held
    /// for the whole attempt and released on every path.
    pub async fn import_from_file(&self, mode: SyncMode) -> Result<()> {
        let _guard = ImportGuard::hold(self.importing.clone());
        let result = self.apply_file(mode).await;
        match &result {
            Ok(()) => {
                self.status_tx.send_replace(ChannelStatus::ImportOk(mode));
            }
            Err(err) => {
                warn!(path = %self.path.display(), ?err, "sync file import failed");
                self.status_tx
                    .send_replace(ChannelStatus::Error(err.to_string()));
            }
        }
        result
    }

    /// Start the watcher and the export subscription.  Both loops run until
    /// the shutdown channel flips.
    pub fn start(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> Result<()> {
        let watch_dir = self
            .path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        std::fs::create_dir_all(&watch_dir)?;

        // The file is typically replaced by rename, so watch the parent
        // directory and filter events down to our file name.
        let (event_tx, event_rx) = mpsc::channel::<notify::Result<notify::Event>>(64);
        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ = event_tx.blocking_send(res);
            },
            notify::Config::default(),
        )?;
        watcher.watch(&watch_dir, RecursiveMode::NonRecursive)?;

        info!(path = %self.path.display(), "file sync channel started");
        Self::spawn_import_loop(self.clone(), watcher, event_rx, shutdown.clone());
        Self::spawn_export_loop(self, shutdown);
        Ok(())
    }

    // ── internals ─────────────────────────────────────────────────────────

    fn spawn_import_loop(
        channel: Arc<Self>,
        watcher: RecommendedWatcher,
        mut event_rx: mpsc::Receiver<notify::Result<notify::Event>>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        tokio::spawn(async move {
            // Held here so the notify subscription lives as long as the loop.
            let _watcher = watcher;
            loop {
                tokio::select! {
                    maybe = event_rx.recv() => {
                        let Some(event) = maybe else { break };
                        if !channel.touches_sync_file(&event) {
                            continue;
                        }
                        // Collapse a burst of events into one import.
                        tokio::time::sleep(channel.debounce).await;
                        while event_rx.try_recv().is_ok() {}
                        channel.import_external().await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("file sync import loop stopped");
        });
    }

    fn spawn_export_loop(channel: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut rx = channel.store.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = rx.recv() => {
                        match event {
                            Ok(changed) => {
                                // Loop prevention: never export mid-import and
                                // never re-export a file-originated save.
                                if changed.origin == ChangeOrigin::File
                                    || channel.import_in_progress()
                                {
                                    continue;
                                }
                                let _ = channel.export_to_file().await;
                            }
                            Err(RecvError::Lagged(n)) => {
                                warn!(n, "file sync channel lagged; exporting current state");
                                let _ = channel.export_to_file().await;
                            }
                            Err(RecvError::Closed) => break,
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("file sync export loop stopped");
        });
    }

    fn touches_sync_file(&self, event: &notify::Result<notify::Event>) -> bool {
        match event {
            Ok(event) => {
                let target = self.path.file_name();
                event.paths.iter().any(|p| p.file_name() == target)
            }
            Err(err) => {
                warn!(?err, "sync file watcher error");
                false
            }
        }
    }

    /// Watch-triggered import: plain replace (one-way mirroring semantics),
    /// after checking the event is not an echo of our own export.
    async fn import_external(&self) {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => {
                let incoming = digest(&bytes);
                let own = match self.last_written_digest.lock() {
                    Ok(guard) => guard.clone(),
                    Err(_) => None,
                };
                if own.as_deref() == Some(incoming.as_str()) {
                    debug!("sync file event matches our own export; skipping import");
                    return;
                }
            }
            Err(err) => {
                debug!(?err, "sync file unreadable after event; skipping import");
                return;
            }
        }

        // Errors are logged and published inside import_from_file; the
        // watcher keeps running regardless.
        let _ = self.import_from_file(SyncMode::Replace).await;
    }

    async fn apply_file(&self, mode: SyncMode) -> Result<()> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("reading sync file {}", self.path.display()))?;
        let remote = parse_sync_payload(&raw)?;

        match mode {
            SyncMode::Replace => {
                self.store.save(remote, ChangeOrigin::File).await?;
            }
            SyncMode::Merge => {
                let stats = self.store.merge_from(&remote, ChangeOrigin::File).await?;
                info!(
                    added = stats.added,
                    updated = stats.updated,
                    kept = stats.kept,
                    "merged sync file into local profiles"
                );
            }
        }
        Ok(())
    }

    /// Crash-safe write: render to a `.tmp` sibling, fsync, rename over the
    /// real file.  The `.tmp` file is removed on any error path.
    async fn write_snapshot(&self) -> Result<()> {
        let config = self.store.get_all().await?;
        let rendered = serde_json::to_vec_pretty(&config)?;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp_path = {
            let filename = self
                .path
                .file_name()
                .map(|f| f.to_string_lossy().to_string())
                .unwrap_or_else(|| "profiles-sync.json".to_string());
            self.path.with_file_name(format!("{filename}.tmp"))
        };

        let write_result: Result<()> = async {
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)
                .await?;
            file.write_all(&rendered).await?;
            file.flush().await?;
            file.sync_all().await?;
            Ok(())
        }
        .await;

        if let Err(err) = write_result {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(err);
        }

        if let Err(err) = tokio::fs::rename(&tmp_path, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(err.into());
        }

        if let Ok(mut guard) = self.last_written_digest.lock() {
            *guard = Some(digest(&rendered));
        }
        Ok(())
    }
}

/// RAII guard for the import-in-progress flag; clears it on every exit path.
struct ImportGuard {
    flag: Arc<AtomicBool>,
}

impl ImportGuard {
    fn hold(flag: Arc<AtomicBool>) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self { flag }
    }
}

impl Drop for ImportGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

fn digest(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
