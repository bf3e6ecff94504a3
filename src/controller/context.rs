//! Shared reconcile context

use std::sync::Arc;

use crate::store::EntityStore;

/// Default number of times a read-modify-write is reapplied after a conflict
pub const DEFAULT_MAX_CONFLICT_RETRIES: u32 = 5;

/// Settings the reconcilers read on every run
#[derive(Clone, Debug)]
pub struct Settings {
    /// `ingressClassName` set on routing tables, if any
    pub ingress_class: Option<String>,
    /// How often a conflicting bundle or routing write is re-read and reapplied
    pub max_conflict_retries: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ingress_class: None,
            max_conflict_retries: DEFAULT_MAX_CONFLICT_RETRIES,
        }
    }
}

/// Controller context shared by every reconcile
///
/// Built once at startup and handed out as an `Arc`; there is no other
/// process-wide client state.
pub struct Context<S: EntityStore> {
    /// Store all reads and writes go through
    pub store: Arc<S>,
    /// Reconciler settings
    pub settings: Settings,
}

impl<S: EntityStore> Context<S> {
    /// Create a context with default settings
    pub fn new(store: Arc<S>) -> Self {
        Self::with_settings(store, Settings::default())
    }

    /// Create a context with explicit settings
    pub fn with_settings(store: Arc<S>, settings: Settings) -> Self {
        Self { store, settings }
    }

    /// Attempts allowed for one read-modify-write, never less than one
    pub fn write_attempts(&self) -> u32 {
        self.settings.max_conflict_retries.saturating_add(1)
    }
}
