use std::{path::PathBuf, sync::Arc};

use tracing::{debug, info, trace};

use crate::{
    classify::{FilePatterns, FsEvent, Routing, classify},
    dispatch::ActionDispatcher,
    hysteresis::HysteresisIndex,
};

/// Classifies events and debounces the resulting actions per path.
#[derive(Debug, Clone)]
pub struct EventRouter {
    patterns: Arc<FilePatterns>,
    index: HysteresisIndex<PathBuf>,
    dispatcher: Arc<ActionDispatcher>,
}

impl EventRouter {
    pub fn new(
        patterns: FilePatterns,
        index: HysteresisIndex<PathBuf>,
        dispatcher: Arc<ActionDispatcher>,
    ) -> Self {
        Self {
            patterns: Arc::new(patterns),
            index,
            dispatcher,
        }
    }

    pub fn patterns(&self) -> &FilePatterns {
        &self.patterns
    }

    pub fn index(&self) -> &HysteresisIndex<PathBuf> {
        &self.index
    }

    /// Route one event. Returns how many actions were (re)armed.
    pub fn route(&self, event: &FsEvent) -> usize {
        let mut scheduled = 0;
        for routing in classify(&self.patterns, event) {
            match routing {
                Routing::Schedule { path, action } => {
                    let dispatcher = Arc::clone(&self.dispatcher);
                    let key = path.clone();
                    if self
                        .index
                        .signal(key, move || async move { dispatcher.perform(action, path).await })
                    {
                        scheduled += 1;
                    }
                }
                Routing::Unsupported { path } => {
                    info!(
                        path = %path.display(),
                        "requirements file removed; installed packages are left in place"
                    );
                }
                Routing::Ignore { path } => {
                    trace!(path = %path.display(), kind = ?event.kind, "ignoring file");
                }
            }
        }

        if scheduled > 0 {
            debug!(kind = ?event.kind, path = %event.src_path.display(), scheduled, "event routed");
        }
        scheduled
    }
}
