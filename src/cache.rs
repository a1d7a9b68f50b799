//! # Update Cache
//!
//! In-memory cache of the host's "available update" state for plugins and
//! themes, plus the broadcast channel release webhooks publish to. The
//! webhook reconciler invalidates the whole cache on any published
//! release; invalidation of an already-empty cache is a no-op, which keeps
//! webhook replays safe.

use std::collections::HashMap;
use std::sync::RwLock;

use serde_json::Value as JsonValue;
use tokio::sync::broadcast;
use tracing::debug;

/// Kind of updatable package the host tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateKind {
    Plugin,
    Theme,
}

impl UpdateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateKind::Plugin => "plugin",
            UpdateKind::Theme => "theme",
        }
    }
}

/// Cached "available update" manifests, keyed by kind and package slug.
#[derive(Default)]
pub struct UpdateCache {
    entries: RwLock<HashMap<(UpdateKind, String), JsonValue>>,
}

impl UpdateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores an update manifest for a package.
    pub fn put(&self, kind: UpdateKind, slug: &str, manifest: JsonValue) {
        self.entries
            .write()
            .expect("update cache poisoned")
            .insert((kind, slug.to_string()), manifest);
    }

    /// Returns the cached manifest for a package, if any.
    pub fn get(&self, kind: UpdateKind, slug: &str) -> Option<JsonValue> {
        self.entries
            .read()
            .expect("update cache poisoned")
            .get(&(kind, slug.to_string()))
            .cloned()
    }

    /// Drops every cached manifest for plugins and themes. Deliberately
    /// broad: a published release anywhere may change what updates are
    /// available, so the next read re-resolves from scratch.
    pub fn invalidate_updates(&self) {
        let mut entries = self.entries.write().expect("update cache poisoned");
        let dropped = entries.len();
        entries.clear();
        debug!(dropped, "Invalidated cached update state");
    }

    /// Number of cached manifests (all kinds).
    pub fn len(&self) -> usize {
        self.entries.read().expect("update cache poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A published-release notification forwarded to in-process listeners.
#[derive(Debug, Clone)]
pub struct ReleaseEvent {
    /// The full webhook payload, untouched.
    pub payload: JsonValue,
}

/// Broadcast fan-out for release events. Publishing with no listeners is
/// fine; events are dropped.
pub struct ReleaseNotifier {
    tx: broadcast::Sender<ReleaseEvent>,
}

impl ReleaseNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ReleaseEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: ReleaseEvent) {
        // Err means no active receivers, which is not a failure.
        let _ = self.tx.send(event);
    }
}

impl Default for ReleaseNotifier {
    fn default() -> Self {
        Self::new(16)
    }
}
