use std::sync::Arc;

use skein_storage::HistoryStore;

use crate::config::NdcConfig;

/// Per-shard handles shared by the resolver components: the shard id stamped
/// on store requests, the history store and the resolver configuration.
pub struct Shard<H> {
    shard_id: i32,
    history_store: Arc<H>,
    config: Arc<NdcConfig>,
}

impl<H: HistoryStore> Shard<H> {
    pub fn new(shard_id: i32, history_store: Arc<H>, config: NdcConfig) -> Self {
        Shard {
            shard_id,
            history_store,
            config: Arc::new(config),
        }
    }

    pub fn shard_id(&self) -> i32 {
        self.shard_id
    }

    pub fn history_store(&self) -> &H {
        &self.history_store
    }

    pub fn config(&self) -> &NdcConfig {
        &self.config
    }
}

impl<H> Clone for Shard<H> {
    fn clone(&self) -> Self {
        Shard {
            shard_id: self.shard_id,
            history_store: Arc::clone(&self.history_store),
            config: Arc::clone(&self.config),
        }
    }
}
