use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use notify::event::ModifyKind;
use notify::{EventKind, RecursiveMode, Watcher};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::Instant;

use crate::{Error, Result, Vault, VaultManager, VaultPath};

type RawEvent = std::result::Result<notify::Event, notify::Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Created,
    Modified,
    Renamed,
    Removed,
}

impl ChangeKind {
    fn rank(self) -> u8 {
        match self {
            ChangeKind::Removed => 90,
            ChangeKind::Renamed => 80,
            ChangeKind::Created => 70,
            ChangeKind::Modified => 50,
        }
    }
}

/// One external change to a vault path, after debouncing and deduplication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeEvent {
    pub path: VaultPath,
    pub kind: ChangeKind,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum VaultEvent {
    /// A debounced burst was applied; `generation` is the index generation after it.
    Changed {
        changes: Vec<ChangeEvent>,
        generation: u64,
    },
    Error {
        path: Option<VaultPath>,
        error: String,
    },
}

/// Watches a vault directory and feeds debounced change batches into a
/// [`VaultManager`], one invalidation per burst.
pub struct VaultService {
    manager: Arc<VaultManager>,
    events: broadcast::Sender<VaultEvent>,
    shutdown_tx: watch::Sender<bool>,
    inputs: Option<LoopInputs>,
    watcher: Option<notify::RecommendedWatcher>,
    watch_task: Option<tokio::task::JoinHandle<()>>,
}

#[derive(Clone)]
struct LoopInputs {
    raw: mpsc::UnboundedSender<RawEvent>,
    changes: mpsc::UnboundedSender<ChangeEvent>,
}

impl VaultService {
    pub fn new(manager: Arc<VaultManager>) -> Self {
        let (events, _) = broadcast::channel(512);
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            manager,
            events,
            shutdown_tx,
            inputs: None,
            watcher: None,
            watch_task: None,
        }
    }

    pub fn manager(&self) -> &Arc<VaultManager> {
        &self.manager
    }

    pub fn subscribe(&self) -> broadcast::Receiver<VaultEvent> {
        self.events.subscribe()
    }

    /// Builds the link index off the async runtime.
    pub async fn build_index(&self) -> Result<()> {
        let manager = Arc::clone(&self.manager);
        tokio::task::spawn_blocking(move || manager.rebuild_index())
            .await
            .map_err(|e| Error::Config(format!("index build task failed: {e}")))??;
        Ok(())
    }

    /// Sender for changes detected by an external watcher. They share the
    /// debounce window with filesystem events from
    /// [`start_watching`](Self::start_watching).
    pub fn change_sender(&mut self) -> mpsc::UnboundedSender<ChangeEvent> {
        self.ensure_loop().changes
    }

    pub async fn start_watching(&mut self) -> Result<()> {
        if self.watcher.is_some() {
            return Ok(());
        }

        let raw_tx = self.ensure_loop().raw;
        let mut watcher = notify::recommended_watcher(move |res| {
            let _ = raw_tx.send(res);
        })?;
        watcher.watch(self.manager.vault().root(), RecursiveMode::Recursive)?;
        tracing::info!(root = %self.manager.vault().root().display(), "watching vault");
        self.watcher = Some(watcher);

        Ok(())
    }

    pub async fn shutdown(&mut self) {
        let _ = self.shutdown_tx.send(true);
        self.watcher.take();
        self.inputs.take();
        if let Some(handle) = self.watch_task.take() {
            let _ = handle.await;
        }
    }

    fn ensure_loop(&mut self) -> LoopInputs {
        if let Some(inputs) = &self.inputs {
            return inputs.clone();
        }

        let (raw_tx, raw_rx) = mpsc::unbounded_channel::<RawEvent>();
        let (change_tx, change_rx) = mpsc::unbounded_channel::<ChangeEvent>();
        let manager = Arc::clone(&self.manager);
        let events = self.events.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let cfg = self.manager.vault().config();
        let window = BatchWindow {
            quiet: cfg.watch_debounce,
            max_age: cfg.watch_max_batch_age,
        };
        self.watch_task = Some(tokio::spawn(async move {
            let inputs = LoopReceivers {
                raw: raw_rx,
                changes: change_rx,
            };
            watch_loop(manager, events, inputs, &mut shutdown_rx, window).await;
        }));

        let inputs = LoopInputs {
            raw: raw_tx,
            changes: change_tx,
        };
        self.inputs = Some(inputs.clone());
        inputs
    }
}

impl Drop for VaultService {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

/// A batch flushes after `quiet` without new events, or `max_age` after its
/// first event, whichever comes first.
#[derive(Debug, Clone, Copy)]
struct BatchWindow {
    quiet: Duration,
    max_age: Duration,
}

impl BatchWindow {
    fn deadline(self, now: Instant, batch_started: &mut Option<Instant>) -> Instant {
        let started = *batch_started.get_or_insert(now);
        (now + self.quiet).min(started + self.max_age)
    }
}

struct LoopReceivers {
    raw: mpsc::UnboundedReceiver<RawEvent>,
    changes: mpsc::UnboundedReceiver<ChangeEvent>,
}

async fn watch_loop(
    manager: Arc<VaultManager>,
    events: broadcast::Sender<VaultEvent>,
    mut inputs: LoopReceivers,
    shutdown_rx: &mut watch::Receiver<bool>,
    window: BatchWindow,
) {
    let mut pending_raw: Vec<notify::Event> = Vec::new();
    let mut pending_changes: Vec<ChangeEvent> = Vec::new();
    let mut debounce_armed = false;
    let mut batch_started: Option<Instant> = None;
    let debounce_timer = tokio::time::sleep(Duration::from_secs(60 * 60 * 24 * 365 * 10));
    tokio::pin!(debounce_timer);

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }

            maybe = inputs.raw.recv() => {
                let Some(res) = maybe else { break; };
                match res {
                    Ok(ev) => {
                        pending_raw.push(ev);
                        debounce_armed = true;
                        debounce_timer
                            .as_mut()
                            .reset(window.deadline(Instant::now(), &mut batch_started));
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "watcher error");
                        let _ = events.send(VaultEvent::Error { path: None, error: err.to_string() });
                    }
                }
            }

            maybe = inputs.changes.recv() => {
                let Some(change) = maybe else { break; };
                pending_changes.push(change);
                debounce_armed = true;
                debounce_timer
                    .as_mut()
                    .reset(window.deadline(Instant::now(), &mut batch_started));
            }

            _ = &mut debounce_timer, if debounce_armed => {
                debounce_armed = false;
                batch_started = None;
                let raw = std::mem::take(&mut pending_raw);
                let external = std::mem::take(&mut pending_changes);
                let changes = collapse(
                    events_to_changes(manager.vault(), &raw).into_iter().chain(external),
                );
                if changes.is_empty() {
                    continue;
                }

                manager.apply_changes(&changes);
                tracing::info!(events = raw.len(), changes = changes.len(), "vault changed on disk");

                let warm = Arc::clone(&manager);
                match tokio::task::spawn_blocking(move || warm.rebuild_index()).await {
                    Ok(Ok(_)) => {}
                    Ok(Err(err)) => {
                        tracing::warn!(error = %err, "index rebuild after change failed");
                        let _ = events.send(VaultEvent::Error { path: None, error: err.to_string() });
                    }
                    Err(join_err) => {
                        let _ = events.send(VaultEvent::Error { path: None, error: join_err.to_string() });
                    }
                }

                let _ = events.send(VaultEvent::Changed {
                    changes,
                    generation: manager.index_generation(),
                });
            }
        }
    }
}

/// One entry per path, keeping the strongest kind seen for it.
fn collapse(changes: impl IntoIterator<Item = ChangeEvent>) -> Vec<ChangeEvent> {
    let mut out: Vec<ChangeEvent> = Vec::new();
    let mut seen: HashMap<VaultPath, usize> = HashMap::new();
    for change in changes {
        match seen.get(&change.path).copied() {
            Some(ix) => {
                if change.kind.rank() >= out[ix].kind.rank() {
                    out[ix].kind = change.kind;
                }
            }
            None => {
                seen.insert(change.path.clone(), out.len());
                out.push(change);
            }
        }
    }
    out
}

/// Translates raw watcher events into per-path changes. Access and
/// metadata-only events are dropped since reading notes produces them.
fn events_to_changes(vault: &Vault, batch: &[notify::Event]) -> Vec<ChangeEvent> {
    let mut out = Vec::new();
    let mut push = |path: VaultPath, kind: ChangeKind| out.push(ChangeEvent { path, kind });

    for ev in batch {
        match &ev.kind {
            EventKind::Access(_) => continue,
            EventKind::Modify(ModifyKind::Metadata(_)) => continue,
            EventKind::Modify(ModifyKind::Name(_)) if ev.paths.len() == 2 => {
                if let Some(from) = to_vault_path(vault, &ev.paths[0]) {
                    push(from, ChangeKind::Removed);
                }
                if let Some(to) = to_vault_path(vault, &ev.paths[1]) {
                    push(to, ChangeKind::Renamed);
                }
            }
            EventKind::Modify(ModifyKind::Name(_)) | EventKind::Remove(_) => {
                // Directory removals and renames carry no `.md` suffix but still drop notes.
                for p in &ev.paths {
                    if let Some(rel) = to_vault_path(vault, p) {
                        push(rel, ChangeKind::Removed);
                    }
                }
            }
            kind => {
                let change = match kind {
                    EventKind::Create(_) => ChangeKind::Created,
                    _ => ChangeKind::Modified,
                };
                for p in &ev.paths {
                    let Some(rel) = to_vault_path(vault, p) else {
                        continue;
                    };
                    if vault.is_note_rel(rel.as_path()) {
                        push(rel, change);
                    }
                }
            }
        }
    }

    collapse(out)
}

fn to_vault_path(vault: &Vault, abs: &Path) -> Option<VaultPath> {
    let rel = vault.to_rel(abs).ok()?;
    if rel.as_path().as_os_str().is_empty() || vault.is_ignored_rel(rel.as_path()) {
        return None;
    }
    Some(rel)
}
