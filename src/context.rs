//! Process-wide services, built once and shared by every worker.

use std::sync::Arc;

use anyhow::Result;

use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::remote::{HttpRemote, RemoteService, SpaceClient};
use crate::storage::Store;

pub struct ServiceContext {
    pub config: Config,
    pub store: Store,
    pub client: SpaceClient,
}

impl ServiceContext {
    /// Wire a context around any transport; tests pass a scripted remote.
    pub fn new(config: Config, store: Store, remote: Arc<dyn RemoteService>) -> Arc<Self> {
        let dispatcher = Arc::new(Dispatcher::new(remote, &config.dispatch));
        let client = SpaceClient::new(dispatcher, &config.worker);
        Arc::new(Self {
            config,
            store,
            client,
        })
    }

    /// Context backed by the configured database and the HTTP remote.
    pub fn from_config(config: Config) -> Result<Arc<Self>> {
        let store = Store::open(&config.storage.db_path)?;
        let remote = Arc::new(HttpRemote::new(&config.api)?);
        Ok(Self::new(config, store, remote))
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        self.client.dispatcher()
    }
}
