//! List sync job: playlists or collections for every configured user.

use async_trait::async_trait;
use bridge_traits::ClientId;
use core_jobs::{Job, JobContext, JobOutcome, ProgressWindow};
use core_library::{ListKind, ListSyncSettings};
use core_runtime::events::SyncEvent;
use std::collections::BTreeMap;
use std::marker::PhantomData;
use tracing::{info, instrument, warn};

use crate::context::{SyncContext, UserScope};
use crate::error::{Result, SyncError};
use crate::list_sync::{ClientLists, ListStrategy, ListSyncEngine, ListSyncStats};

/// Runs the list sync engine for each user with enabled settings of kind `K`.
///
/// Users are processed one at a time. A misconfigured user (directional
/// strategy without a usable primary) does not stop the others, but the run
/// is failed at the end with a message naming every misconfigured user.
///
/// Every scope of one kind shares the `<kind>_sync` lease, so a per-user run
/// never overlaps the all-users run over the same lists.
pub struct ListSyncJob<K: ListKind> {
    ctx: SyncContext,
    scope: UserScope,
    name: String,
    lease_key: String,
    kind: PhantomData<fn() -> K>,
}

impl<K: ListKind> ListSyncJob<K> {
    pub fn new(ctx: SyncContext, scope: UserScope) -> Self {
        let lease_key = Self::base_name();
        let name = scope.job_name(&lease_key);
        Self {
            ctx,
            scope,
            name,
            lease_key,
            kind: PhantomData,
        }
    }

    /// `playlist_sync` or `collection_sync`
    pub fn base_name() -> String {
        format!("{}_sync", K::TYPE)
    }

    async fn load_settings(&self) -> Result<Vec<ListSyncSettings>> {
        let users = self.ctx.users();
        let settings = match &self.scope {
            UserScope::All => users.list_enabled_list_sync(K::TYPE).await?,
            UserScope::Single(user_id) => users
                .get_list_sync_settings(user_id, K::TYPE)
                .await?
                .filter(|settings| settings.enabled)
                .into_iter()
                .collect(),
        };
        Ok(settings)
    }

    /// Connect the user's clients and fetch their lists.
    ///
    /// Non-primary clients that cannot be reached are skipped. The primary is
    /// required: a primary that is not configured or cannot hold lists is a
    /// configuration error, a primary that is unreachable fails the user.
    async fn collect_lists(
        &self,
        settings: &ListSyncSettings,
        primary: Option<&ClientId>,
    ) -> Result<BTreeMap<ClientId, ClientLists>> {
        let clients: Vec<_> = self
            .ctx
            .users()
            .clients_for_user(&settings.user_id)
            .await?
            .into_iter()
            .filter(|client| client.enabled)
            .collect();

        if let Some(primary) = primary {
            if !clients.iter().any(|client| &client.client_id == primary) {
                return Err(SyncError::Config(format!(
                    "primary client {} is not configured",
                    primary
                )));
            }
        }

        let mut collected = BTreeMap::new();
        for client in &clients {
            let is_primary = primary == Some(&client.client_id);
            let fetched = async {
                let handle = self.ctx.connect(client).await?;
                let lists = handle.lists()?.list_lists(K::TYPE).await?;
                Ok::<_, SyncError>(ClientLists::new(handle, lists))
            }
            .await;

            match fetched {
                Ok(entry) => {
                    collected.insert(client.client_id.clone(), entry);
                }
                Err(e) if is_primary && e.is_config() => {
                    return Err(SyncError::Config(format!(
                        "primary client {}: {}",
                        client.client_id, e
                    )));
                }
                Err(e) if is_primary => return Err(e),
                Err(e) => {
                    warn!(
                        user_id = %settings.user_id,
                        client_id = %client.client_id,
                        error = %e,
                        "Skipping client for list sync"
                    );
                }
            }
        }
        Ok(collected)
    }

    async fn sync_user(&self, settings: &ListSyncSettings) -> Result<ListSyncStats> {
        let strategy = ListStrategy::from_settings(settings)?;
        let clients = self.collect_lists(settings, strategy.primary()).await?;

        let engine = ListSyncEngine::<K>::new(
            self.ctx.items::<K>(),
            self.ctx.index(),
            self.ctx.clock.clone(),
        );
        engine.sync_lists(&settings.user_id, &strategy, &clients).await
    }
}

#[async_trait]
impl<K: ListKind> Job for ListSyncJob<K> {
    fn name(&self) -> &str {
        &self.name
    }

    fn lease_key(&self) -> &str {
        &self.lease_key
    }

    #[instrument(skip(self, ctx), fields(job = %self.name, run_id = %ctx.run_id))]
    async fn run(&self, ctx: JobContext) -> core_jobs::Result<JobOutcome> {
        let all_settings = self.load_settings().await?;
        if all_settings.is_empty() {
            info!("No users with {} sync enabled", K::TYPE);
            return Ok(JobOutcome::with_message(format!(
                "No users with {} sync enabled",
                K::TYPE
            )));
        }

        let mut totals = ListSyncStats::default();
        let mut misconfigured = Vec::new();
        let mut failed = Vec::new();

        for (index, settings) in all_settings.iter().enumerate() {
            if ctx.is_cancelled() {
                return Err(SyncError::Cancelled.into());
            }
            let window = ProgressWindow::FULL.split(index, all_settings.len());
            ctx.report(window.start, &format!("{} sync for user {}", K::TYPE, settings.user_id))
                .await;

            match self.sync_user(settings).await {
                Ok(stats) => {
                    self.ctx.emit(SyncEvent::ListsSynced {
                        user_id: settings.user_id.to_string(),
                        media_type: K::TYPE.to_string(),
                        created: stats.created as u64,
                        updated: stats.updated as u64,
                        conflicts: stats.conflicts as u64,
                    });
                    totals.absorb(&stats);
                }
                Err(e) if e.is_config() => {
                    warn!(user_id = %settings.user_id, error = %e, "List sync misconfigured");
                    misconfigured.push(format!("{} ({})", settings.user_id, e));
                }
                Err(e) => {
                    warn!(user_id = %settings.user_id, error = %e, "List sync failed for user");
                    failed.push(format!("{} ({})", settings.user_id, e));
                }
            }
            ctx.report(window.end, &format!("{} sync for user {} done", K::TYPE, settings.user_id))
                .await;
        }

        if !misconfigured.is_empty() {
            return Err(SyncError::Config(format!(
                "{} sync misconfigured for users: {}",
                K::TYPE,
                misconfigured.join(", ")
            ))
            .into());
        }
        if failed.len() == all_settings.len() {
            return Err(SyncError::AllUsersFailed {
                attempted: failed.len(),
                details: failed.join(", "),
            }
            .into());
        }

        let mut message = format!(
            "{} lists created, {} updated, {} conflicts, {} items added, {} skipped",
            totals.created, totals.updated, totals.conflicts, totals.items_added, totals.items_skipped
        );
        if !failed.is_empty() {
            message.push_str(&format!("; failed users: {}", failed.join(", ")));
        }
        Ok(JobOutcome::with_message(message))
    }
}
