//! Shared dependencies of the sync jobs

use bridge_traits::{Clock, ProviderFactory, ProviderHandle};
use core_library::{
    ClientConfig, ItemIndex, ItemRepository, MediaKind, SqliteItemIndex, SqliteItemRepository,
    SqliteUserMediaDataRepository, SqliteUserRepository, UserId, UserMediaDataRepository,
    UserRepository,
};
use core_runtime::config::{CoreConfig, SyncSettings};
use core_runtime::events::{CoreEvent, EventBus, SyncEvent};
use sqlx::SqlitePool;
use std::fmt;
use std::sync::Arc;

use crate::error::Result;

/// Everything a sync job needs besides its own parameters.
///
/// Cheap to clone; every job holds its own copy.
#[derive(Clone)]
pub struct SyncContext {
    pub pool: SqlitePool,
    pub providers: Arc<dyn ProviderFactory>,
    pub clock: Arc<dyn Clock>,
    pub event_bus: EventBus,
    pub settings: SyncSettings,
}

impl SyncContext {
    pub fn new(
        pool: SqlitePool,
        providers: Arc<dyn ProviderFactory>,
        clock: Arc<dyn Clock>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            pool,
            providers,
            clock,
            event_bus,
            settings: SyncSettings::default(),
        }
    }

    pub fn from_config(pool: SqlitePool, config: &CoreConfig, event_bus: EventBus) -> Self {
        Self::new(
            pool,
            config.provider_factory.clone(),
            config.clock.clone(),
            event_bus,
        )
        .with_settings(config.sync)
    }

    pub fn with_settings(mut self, settings: SyncSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn items<K: MediaKind>(&self) -> Arc<dyn ItemRepository<K>> {
        Arc::new(SqliteItemRepository::<K>::new(self.pool.clone()))
    }

    pub fn index(&self) -> Arc<dyn ItemIndex> {
        Arc::new(SqliteItemIndex::new(self.pool.clone()))
    }

    pub fn users(&self) -> Arc<dyn UserRepository> {
        Arc::new(SqliteUserRepository::new(self.pool.clone()))
    }

    pub fn user_data(&self) -> Arc<dyn UserMediaDataRepository> {
        Arc::new(SqliteUserMediaDataRepository::new(self.pool.clone()))
    }

    /// Connect a configured client. Unknown client types fail here.
    pub async fn connect(&self, client: &ClientConfig) -> Result<ProviderHandle> {
        let connection = client.connection()?;
        Ok(self.providers.connect(&connection).await?)
    }

    pub(crate) fn emit(&self, event: SyncEvent) {
        // No subscribers is not an error.
        self.event_bus.emit(CoreEvent::Sync(event)).ok();
    }
}

impl fmt::Debug for SyncContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncContext")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// Which users a user-scoped job covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserScope {
    All,
    Single(UserId),
}

impl UserScope {
    /// Job name for this scope: `base` or `base:user:<id>`.
    pub fn job_name(&self, base: &str) -> String {
        match self {
            UserScope::All => base.to_string(),
            UserScope::Single(user_id) => format!("{}{}{}", base, USER_SEPARATOR, user_id),
        }
    }

    /// Inverse of [`job_name`](Self::job_name): the base name and scope.
    pub fn split_job_name(name: &str) -> (&str, UserScope) {
        match name.split_once(USER_SEPARATOR) {
            Some((base, user_id)) if !user_id.is_empty() => {
                (base, UserScope::Single(UserId::from(user_id)))
            }
            _ => (name, UserScope::All),
        }
    }
}

const USER_SEPARATOR: &str = ":user:";
