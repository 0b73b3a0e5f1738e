//! Last-typed form values, restored when a session starts.

use std::sync::Arc;

use tracing::warn;

use vinvite_models::FormValues;

use crate::kv::{KvStore, KvStoreExt};

/// Key under which the form values are stored.
pub const FORM_CACHE_KEY: &str = "form-cache";

/// Best-effort persistence of [`FormValues`].
#[derive(Clone)]
pub struct FormCache {
    store: Arc<dyn KvStore>,
}

impl FormCache {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Saved values, or defaults when nothing usable is stored.
    pub fn load(&self) -> FormValues {
        match self.store.get_json::<FormValues>(FORM_CACHE_KEY) {
            Ok(Some(values)) => values,
            Ok(None) => FormValues::default(),
            Err(e) => {
                warn!(error = %e, "Failed to restore form cache");
                FormValues::default()
            }
        }
    }

    pub fn save(&self, values: &FormValues) {
        if let Err(e) = self.store.set_json(FORM_CACHE_KEY, values) {
            warn!(error = %e, "Failed to save form cache");
        }
    }

    pub fn clear(&self) {
        if let Err(e) = self.store.remove(FORM_CACHE_KEY) {
            warn!(error = %e, "Failed to clear form cache");
        }
    }
}

impl std::fmt::Debug for FormCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormCache").finish_non_exhaustive()
    }
}
