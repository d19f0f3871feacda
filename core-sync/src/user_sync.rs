//! # User Data Sync
//!
//! Favorites and watch history are pulled per user from each of the user's
//! enabled clients and merged into one [`UserMediaItemData`] row per canonical
//! item.
//!
//! Merge rules across clients:
//!
//! - favorites: an item is a favorite while any client's feed lists it. A
//!   favorite that no fetched client lists anymore is cleared, unless a client
//!   holding the item failed during the same pass
//! - history: `play_count` and `last_played_at` take the maximum, `completed`
//!   is sticky and `played_percentage` follows the most recent play
//!
//! Records whose client item id is not in the catalog yet are skipped; they are
//! picked up once the catalog job has imported the item.

use async_trait::async_trait;
use bridge_traits::ClientId;
use core_jobs::{Job, JobContext, JobOutcome, ProgressWindow};
use core_library::{ClientConfig, MediaItemId, User, UserMediaItemData};
use core_runtime::events::SyncEvent;
use std::collections::BTreeSet;
use std::fmt;
use tracing::{debug, info, instrument, warn};

use crate::context::{SyncContext, UserScope};
use crate::error::{Result, SyncError};

/// Which per-user feed a job pulls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UserDataKind {
    Favorites,
    WatchHistory,
}

impl UserDataKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserDataKind::Favorites => "favorites",
            UserDataKind::WatchHistory => "watch_history",
        }
    }

    /// `favorites_sync` or `watch_history_sync`
    pub fn base_job_name(&self) -> String {
        format!("{}_sync", self.as_str())
    }
}

impl fmt::Display for UserDataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UserDataStats {
    /// Rows created or changed
    pub applied: usize,
    /// Records already reflected in the stored row
    pub unchanged: usize,
    /// Records with no canonical item
    pub skipped: usize,
    pub clients_failed: usize,
}

impl UserDataStats {
    fn absorb(&mut self, other: UserDataStats) {
        self.applied += other.applied;
        self.unchanged += other.unchanged;
        self.skipped += other.skipped;
        self.clients_failed += other.clients_failed;
    }
}

/// Per-user and all-users jobs of one kind share the base-name lease.
pub struct UserDataSyncJob {
    ctx: SyncContext,
    kind: UserDataKind,
    scope: UserScope,
    name: String,
    lease_key: String,
}

impl UserDataSyncJob {
    pub fn new(ctx: SyncContext, kind: UserDataKind, scope: UserScope) -> Self {
        let lease_key = kind.base_job_name();
        let name = scope.job_name(&lease_key);
        Self {
            ctx,
            kind,
            scope,
            name,
            lease_key,
        }
    }

    pub fn kind(&self) -> UserDataKind {
        self.kind
    }

    async fn users(&self) -> Result<Vec<User>> {
        let users = self.ctx.users();
        match &self.scope {
            UserScope::All => Ok(users.list_active_users().await?),
            UserScope::Single(user_id) => match users.find_user(user_id).await? {
                Some(user) if user.active => Ok(vec![user]),
                Some(_) => Ok(Vec::new()),
                None => Err(SyncError::Config(format!("user {} does not exist", user_id))),
            },
        }
    }

    /// Sync every enabled client of `user`; returns the stats and the number
    /// of clients attempted.
    async fn sync_user(&self, user: &User) -> Result<(UserDataStats, usize)> {
        let clients: Vec<ClientConfig> = self
            .ctx
            .users()
            .clients_for_user(&user.id)
            .await?
            .into_iter()
            .filter(|client| client.enabled)
            .collect();

        let mut stats = UserDataStats::default();
        let mut favorites = BTreeSet::new();
        let mut fetched = BTreeSet::new();
        let mut failed = BTreeSet::new();
        for client in &clients {
            match self.sync_client(user, client, &mut favorites).await {
                Ok(client_stats) => {
                    stats.absorb(client_stats);
                    fetched.insert(client.client_id.clone());
                }
                Err(e) => {
                    warn!(
                        user_id = %user.id,
                        client_id = %client.client_id,
                        kind = %self.kind,
                        error = %e,
                        "User data sync failed for client"
                    );
                    stats.clients_failed += 1;
                    failed.insert(client.client_id.clone());
                }
            }
        }

        if self.kind == UserDataKind::Favorites && !fetched.is_empty() {
            stats.applied += self
                .clear_stale_favorites(user, &favorites, &fetched, &failed)
                .await?;
        }
        Ok((stats, clients.len()))
    }

    /// Un-favorite items no fetched client lists anymore. Returns the number
    /// of rows cleared.
    async fn clear_stale_favorites(
        &self,
        user: &User,
        favorites: &BTreeSet<MediaItemId>,
        fetched: &BTreeSet<ClientId>,
        failed: &BTreeSet<ClientId>,
    ) -> Result<usize> {
        let store = self.ctx.user_data();
        let index = self.ctx.index();
        let now = self.ctx.clock.unix_timestamp();
        let mut cleared = 0;

        for mut data in store.list_for_user(&user.id).await? {
            if !data.is_favorite || favorites.contains(&data.media_item_id) {
                continue;
            }
            let holders = index.find_client_ids(&data.media_item_id).await?;
            let seen_by_fetched = holders.keys().any(|client| fetched.contains(client));
            let held_by_failed = holders.keys().any(|client| failed.contains(client));
            if !seen_by_fetched || held_by_failed {
                continue;
            }

            data.merge_favorite(false);
            data.updated_at = now;
            store.update(&data).await?;
            cleared += 1;
        }

        if cleared > 0 {
            debug!(user_id = %user.id, cleared, "Cleared removed favorites");
        }
        Ok(cleared)
    }

    /// Merge one client's feed. Favorites it lists are added to `favorites`.
    async fn sync_client(
        &self,
        user: &User,
        client: &ClientConfig,
        favorites: &mut BTreeSet<MediaItemId>,
    ) -> Result<UserDataStats> {
        let remote_user = client.remote_user_id.as_deref().ok_or_else(|| {
            SyncError::Config(format!(
                "client {} has no remote user id for user {}",
                client.client_id, user.id
            ))
        })?;

        let handle = self.ctx.connect(client).await?;
        let provider = handle.user_data()?;
        let records = match self.kind {
            UserDataKind::Favorites => provider.favorites(remote_user).await?,
            UserDataKind::WatchHistory => provider.watch_history(remote_user).await?,
        };

        let index = self.ctx.index();
        let store = self.ctx.user_data();
        let now = self.ctx.clock.unix_timestamp();
        let mut stats = UserDataStats::default();

        for record in &records {
            let Some(item_id) = index
                .find_id_by_client_item(&client.client_id, &record.item_id)
                .await?
            else {
                debug!(client_id = %client.client_id, item_id = %record.item_id, "No canonical item");
                stats.skipped += 1;
                continue;
            };

            if self.kind == UserDataKind::Favorites {
                if !record.is_favorite {
                    // cleared after every client was read
                    stats.unchanged += 1;
                    continue;
                }
                favorites.insert(item_id);
            }

            let existing = store.find(&user.id, &item_id).await?;
            let is_new = existing.is_none();
            let mut data =
                existing.unwrap_or_else(|| UserMediaItemData::new(user.id.clone(), item_id, now));

            let changed = match self.kind {
                UserDataKind::Favorites => data.merge_favorite(true),
                UserDataKind::WatchHistory => data.merge_play_state(record),
            };
            if !changed {
                stats.unchanged += 1;
                continue;
            }

            data.updated_at = now;
            if is_new {
                store.create(&data).await?;
            } else {
                store.update(&data).await?;
            }
            stats.applied += 1;
        }

        debug!(
            user_id = %user.id,
            client_id = %client.client_id,
            records = records.len(),
            applied = stats.applied,
            "Client user data merged"
        );
        Ok(stats)
    }
}

#[async_trait]
impl Job for UserDataSyncJob {
    fn name(&self) -> &str {
        &self.name
    }

    fn lease_key(&self) -> &str {
        &self.lease_key
    }

    #[instrument(skip(self, ctx), fields(job = %self.name, run_id = %ctx.run_id))]
    async fn run(&self, ctx: JobContext) -> core_jobs::Result<JobOutcome> {
        let users = self.users().await?;
        if users.is_empty() {
            info!("No active users");
            return Ok(JobOutcome::with_message("No active users"));
        }

        let mut totals = UserDataStats::default();
        let mut attempted = 0;
        let mut failed_users = Vec::new();

        for (index, user) in users.iter().enumerate() {
            if ctx.is_cancelled() {
                return Err(SyncError::Cancelled.into());
            }
            let window = ProgressWindow::FULL.split(index, users.len());
            ctx.report(window.start, &format!("{} for user {}", self.kind, user.id))
                .await;

            match self.sync_user(user).await {
                Ok((stats, clients)) => {
                    attempted += clients;
                    self.ctx.emit(SyncEvent::UserDataSynced {
                        user_id: user.id.to_string(),
                        kind: self.kind.to_string(),
                        applied: stats.applied as u64,
                        skipped: stats.skipped as u64,
                    });
                    totals.absorb(stats);
                }
                Err(e) => {
                    warn!(user_id = %user.id, error = %e, "User data sync failed for user");
                    failed_users.push(format!("{} ({})", user.id, e));
                }
            }
            ctx.report(window.end, &format!("{} for user {} done", self.kind, user.id))
                .await;
        }

        if failed_users.len() == users.len() {
            return Err(SyncError::AllUsersFailed {
                attempted: users.len(),
                details: failed_users.join(", "),
            }
            .into());
        }
        if attempted > 0 && totals.clients_failed == attempted {
            return Err(SyncError::AllClientsFailed {
                attempted,
                details: format!("no client returned {}", self.kind),
            }
            .into());
        }

        Ok(JobOutcome::with_message(format!(
            "{} records applied, {} unchanged, {} skipped, {} clients failed",
            totals.applied, totals.unchanged, totals.skipped, totals.clients_failed
        )))
    }
}
