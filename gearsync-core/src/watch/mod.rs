//! Filesystem watch pipeline.
//!
//! A thin wrapper around `notify`: watcher callbacks push raw events into a
//! bounded channel, and a single routing task normalizes them into
//! [`FsEvent`]s and hands them to the [`EventRouter`]. No network I/O happens
//! on either side of the channel.

use std::{
    env, fmt,
    path::{Component, Path, PathBuf},
};

use notify::event::{EventKind, ModifyKind, RenameMode};
use notify::{Config as NotifyConfig, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{Mutex, mpsc};
use tokio::task::{JoinHandle, spawn_blocking};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    classify::{FilePatterns, FsEvent},
    error::{Result, SyncError},
    router::EventRouter,
};

/// Capacity of the channel between notify callbacks and the routing task.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Which directories to watch and how.
#[derive(Clone, Debug)]
pub struct WatchConfig {
    pub directories: Vec<PathBuf>,
    pub recursive: bool,
    /// Route every file already present as if it had just been created.
    pub sync_on_start: bool,
    pub channel_capacity: usize,
}

impl WatchConfig {
    pub fn new(directories: Vec<PathBuf>) -> Self {
        Self {
            directories,
            recursive: false,
            sync_on_start: false,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    fn recursive_mode(&self) -> RecursiveMode {
        if self.recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        }
    }
}

/// Running notify watchers plus the task that routes their events.
pub struct WatchService {
    roots: Vec<PathBuf>,
    watchers: Mutex<Option<Vec<RecommendedWatcher>>>,
    routing_task: Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl fmt::Debug for WatchService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("WatchService");
        debug.field("roots", &self.roots);
        match self.watchers.try_lock() {
            Ok(guard) => {
                debug.field("active_watchers", &guard.as_ref().map_or(0, Vec::len));
            }
            Err(_) => {
                debug.field("watchers", &"<locked>");
            }
        }
        debug
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

enum WatchMessage {
    Event(Event),
    Error(String),
}

impl WatchService {
    /// Attach watchers to every configured directory and start routing.
    ///
    /// Fails if any directory cannot be watched.
    pub async fn start(config: WatchConfig, router: EventRouter) -> Result<Self> {
        let roots = resolve_roots(&config.directories).await;
        let (tx, rx) = mpsc::channel::<WatchMessage>(config.channel_capacity.max(1));

        let watcher_roots = roots.clone();
        let mode = config.recursive_mode();
        let watchers = spawn_blocking(move || init_watchers(&watcher_roots, mode, tx))
            .await
            .map_err(|err| SyncError::Internal(format!("watcher initialization panicked: {err}")))??;

        let cancel = CancellationToken::new();
        let routing_task = spawn_routing_loop(roots.clone(), router.clone(), rx, cancel.clone());

        for root in &roots {
            info!(
                directory = %root.display(),
                recursive = config.recursive,
                "watching directory"
            );
        }

        let service = Self {
            roots,
            watchers: Mutex::new(Some(watchers)),
            routing_task: Mutex::new(Some(routing_task)),
            cancel,
        };

        if config.sync_on_start {
            let seeded = service.seed_existing(&router, config.recursive).await;
            info!(files = seeded, "initial synchronisation scheduled");
        }

        Ok(service)
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Route a `Created` event for every file already under the roots.
    /// Returns the number of actions armed.
    pub async fn seed_existing(&self, router: &EventRouter, recursive: bool) -> usize {
        let mut scheduled = 0;
        for root in &self.roots {
            for path in list_files(root, recursive).await {
                if router.patterns().is_ignored(&path) {
                    continue;
                }
                scheduled += router.route(&FsEvent::created(path));
            }
        }
        scheduled
    }

    /// Stop the watchers and the routing task. Pending actions stay in the
    /// hysteresis index; shut that down separately.
    pub async fn shutdown(&self) {
        if let Some(watchers) = self.watchers.lock().await.take() {
            debug!(count = watchers.len(), "dropping file watchers");
            // Dropping the watchers stops the notify streams.
            drop(watchers);
        }

        self.cancel.cancel();
        let task = self.routing_task.lock().await.take();
        if let Some(task) = task
            && let Err(err) = task.await
        {
            warn!("routing task ended abnormally: {err}");
        }
    }
}

fn spawn_routing_loop(
    roots: Vec<PathBuf>,
    router: EventRouter,
    mut rx: mpsc::Receiver<WatchMessage>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let msg = tokio::select! {
                _ = cancel.cancelled() => break,
                msg = rx.recv() => msg,
            };
            let Some(msg) = msg else {
                break;
            };

            match msg {
                WatchMessage::Event(event) => {
                    if let Some(fs_event) = convert_event(&roots, router.patterns(), &event) {
                        router.route(&fs_event);
                    }
                }
                WatchMessage::Error(error) => {
                    warn!("file watcher reported an error: {error}");
                }
            }
        }
        debug!("routing loop stopped");
    })
}

/// Translate a raw notify event. Returns `None` for event kinds that carry no
/// sync meaning and for paths that are ignored or outside every root.
pub(crate) fn convert_event(
    roots: &[PathBuf],
    patterns: &FilePatterns,
    event: &Event,
) -> Option<FsEvent> {
    let mut paths = event.paths.iter();
    let first = paths.next()?;

    // Normalized, in-root, not ignored.
    let accept = |path: &Path| -> Option<PathBuf> {
        let path = roots.iter().find_map(|root| sanitize_path(root, path))?;
        (!patterns.is_ignored(&path)).then_some(path)
    };

    match event.kind {
        EventKind::Create(_) => accept(first).map(FsEvent::created),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let from = accept(first);
            let to = paths.next().and_then(|path| accept(path));
            match (from, to) {
                (Some(from), Some(to)) => Some(FsEvent::moved(from, to)),
                (Some(from), None) => Some(FsEvent::deleted(from)),
                (None, Some(to)) => Some(FsEvent::created(to)),
                (None, None) => None,
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => accept(first).map(FsEvent::deleted),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => accept(first).map(FsEvent::created),
        EventKind::Modify(ModifyKind::Name(RenameMode::Any | RenameMode::Other)) => {
            let path = accept(first)?;
            if path.exists() {
                Some(FsEvent::created(path))
            } else {
                Some(FsEvent::deleted(path))
            }
        }
        EventKind::Modify(
            ModifyKind::Data(_) | ModifyKind::Metadata(_) | ModifyKind::Any | ModifyKind::Other,
        ) => accept(first).map(FsEvent::modified),
        EventKind::Remove(_) => accept(first).map(FsEvent::deleted),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => None,
    }
}

fn path_within_root(path: &Path, root: &Path) -> bool {
    path.starts_with(root)
}

fn sanitize_path(root: &Path, path: &Path) -> Option<PathBuf> {
    if !path_within_root(path, root) {
        return None;
    }

    let rel = path.strip_prefix(root).ok()?;
    let mut clean = PathBuf::new();
    for component in rel.components() {
        match component {
            Component::Normal(seg) => clean.push(seg),
            Component::CurDir => {}
            Component::ParentDir => {
                if !clean.pop() {
                    return None;
                }
            }
            _ => return None,
        }
    }

    if clean.as_os_str().is_empty() {
        return None;
    }
    Some(root.join(clean))
}

async fn resolve_roots(directories: &[PathBuf]) -> Vec<PathBuf> {
    let cwd = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let mut roots = Vec::with_capacity(directories.len());
    for dir in directories {
        let absolute = if dir.is_absolute() {
            dir.clone()
        } else {
            cwd.join(dir)
        };
        // notify reports canonical paths on some platforms.
        let resolved = tokio::fs::canonicalize(&absolute).await.unwrap_or(absolute);
        if !roots.contains(&resolved) {
            roots.push(resolved);
        }
    }
    roots
}

fn init_watchers(
    roots: &[PathBuf],
    mode: RecursiveMode,
    tx: mpsc::Sender<WatchMessage>,
) -> Result<Vec<RecommendedWatcher>> {
    let mut watchers = Vec::with_capacity(roots.len());
    for root in roots {
        let root_display = root.clone();
        let tx_event = tx.clone();
        let mut watcher = RecommendedWatcher::new(
            move |res: std::result::Result<Event, notify::Error>| match res {
                Ok(event) => {
                    if let Err(err) = tx_event.blocking_send(WatchMessage::Event(event)) {
                        warn!(
                            "fs_watch channel send failed for {}: {}",
                            root_display.display(),
                            err
                        );
                    }
                }
                Err(err) => {
                    let _ = tx_event.blocking_send(WatchMessage::Error(err.to_string()));
                }
            },
            NotifyConfig::default(),
        )?;

        watcher.watch(root, mode)?;
        watchers.push(watcher);
    }

    Ok(watchers)
}

async fn list_files(root: &Path, recursive: bool) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) => {
                warn!(directory = %dir.display(), "cannot list directory: {err}");
                continue;
            }
        };

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(err) => {
                    warn!(directory = %dir.display(), "cannot read directory entry: {err}");
                    break;
                }
            };
            match entry.file_type().await {
                Ok(kind) if kind.is_file() => files.push(entry.path()),
                Ok(kind) if kind.is_dir() && recursive => pending.push(entry.path()),
                _ => {}
            }
        }
    }

    files.sort();
    files
}
