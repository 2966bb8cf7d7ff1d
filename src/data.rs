use std::{ops::Deref, sync::Arc};

use crate::audit::{
    AuditSource, CaseStore, Notifier, Reconciler, SerenityAuditSource, SerenityNotifier,
    StoreResult,
};
use crate::config::BotConfig;
use poise::serenity_prelude as serenity;
use serenity::prelude::TypeMapKey;

/// Centralized data structure for the bot
#[derive(Clone)]
pub struct Data(pub Arc<DataInner>);

// Implement TypeMapKey for Data to allow storing it in Serenity's data map
impl TypeMapKey for Data {
    type Value = Data;
}

impl std::fmt::Debug for Data {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Data")
            .field("config", &self.config)
            .field("reconciler", &self.reconciler)
            .finish()
    }
}

impl Deref for Data {
    type Target = DataInner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Data {
    #[must_use]
    pub fn new(config: BotConfig, reconciler: Reconciler) -> Self {
        Self(Arc::new(DataInner { config, reconciler }))
    }

    /// Wire the reconciler to the Discord HTTP API and the configured store
    ///
    /// # Errors
    /// Returns an error if the case database cannot be opened.
    pub fn connect(config: BotConfig, http: &Arc<serenity::Http>) -> StoreResult<Self> {
        let store = CaseStore::open(&config.database_path)?;
        Ok(Self::with_parts(
            config,
            store,
            Arc::new(SerenityAuditSource::new(Arc::clone(http))),
            Arc::new(SerenityNotifier::new(Arc::clone(http))),
        ))
    }

    /// Build from explicit parts
    #[must_use]
    pub fn with_parts(
        config: BotConfig,
        store: CaseStore,
        source: Arc<dyn AuditSource>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let reconciler = Reconciler::new(store, source, notifier, config.reconcile_settings());
        Self::new(config, reconciler)
    }

    /// Pull the shared data out of a serenity context
    pub async fn from_context(ctx: &serenity::Context) -> Option<Self> {
        ctx.data.read().await.get::<Self>().cloned()
    }
}

/// Shared state behind [`Data`]
pub struct DataInner {
    pub config: BotConfig,
    pub reconciler: Reconciler,
}
