//! Catalog sync job: pulls one media kind from every enabled client.

use async_trait::async_trait;
use bridge_traits::ItemQuery;
use core_jobs::{Job, JobContext, JobError, JobOutcome, ProgressWindow};
use core_library::{ClientConfig, MediaKind};
use core_runtime::events::SyncEvent;
use std::marker::PhantomData;
use tracing::{info, instrument, warn};

use crate::context::SyncContext;
use crate::error::{Result, SyncError};
use crate::reconcile::{Reconciler, UpsertOutcome};

/// Reconciles the catalog of kind `K` from each distinct enabled client.
///
/// Clients are synced one after another, each inside its own slice of the
/// progress range. A failing client is logged and skipped; the run fails only
/// when every client failed.
pub struct CatalogSyncJob<K: MediaKind> {
    ctx: SyncContext,
    name: String,
    kind: PhantomData<fn() -> K>,
}

impl<K: MediaKind> CatalogSyncJob<K> {
    pub fn new(ctx: SyncContext) -> Self {
        Self {
            ctx,
            name: Self::job_name(),
            kind: PhantomData,
        }
    }

    /// `movie_sync`, `track_sync`, ...
    pub fn job_name() -> String {
        format!("{}_sync", K::TYPE)
    }

    async fn sync_client(
        &self,
        client: &ClientConfig,
        job: &JobContext,
        window: ProgressWindow,
    ) -> Result<UpsertOutcome> {
        let handle = self.ctx.connect(client).await?;
        let catalog = handle.catalog()?;
        let reconciler = Reconciler::<K>::new(
            self.ctx.items::<K>(),
            self.ctx.clock.clone(),
            self.ctx.settings.batch_size,
        );

        let mut outcome = UpsertOutcome::default();
        let mut query = ItemQuery::new(K::TYPE, self.ctx.settings.catalog_page_size);
        // The catalog size is unknown up front: every page takes half of
        // what is left of the window.
        let mut remaining = window;

        loop {
            if job.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            let page = catalog.list_items(&query).await?;
            if page.is_empty() {
                break;
            }

            let midpoint = remaining.percent(1, 2);
            let page_window = ProgressWindow::new(remaining.start, midpoint);
            remaining = ProgressWindow::new(midpoint, remaining.end);

            let page_outcome = reconciler
                .upsert(
                    &client.client_id,
                    handle.client_type(),
                    &page,
                    job.progress.as_ref(),
                    page_window,
                )
                .await;
            outcome.absorb(page_outcome);

            if page.len() < query.limit as usize {
                break;
            }
            query = query.next_page();
        }

        job.report(window.end, &format!("{}: {} done", client.client_id, K::TYPE))
            .await;
        Ok(outcome)
    }
}

#[async_trait]
impl<K: MediaKind> Job for CatalogSyncJob<K> {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip(self, ctx), fields(job = %self.name, run_id = %ctx.run_id))]
    async fn run(&self, ctx: JobContext) -> core_jobs::Result<JobOutcome> {
        if K::TYPE.is_list() {
            return Err(JobError::Config(format!(
                "{} is synced by the list sync job",
                K::TYPE
            )));
        }

        let clients = self
            .ctx
            .users()
            .list_enabled_clients()
            .await
            .map_err(SyncError::from)?;
        if clients.is_empty() {
            info!("No enabled clients");
            return Ok(JobOutcome::with_message("No enabled clients"));
        }

        let mut totals = UpsertOutcome::default();
        let mut failures = Vec::new();

        for (index, client) in clients.iter().enumerate() {
            let window = ProgressWindow::FULL.split(index, clients.len());
            match self.sync_client(client, &ctx, window).await {
                Ok(outcome) => {
                    info!(
                        client_id = %client.client_id,
                        created = outcome.created,
                        updated = outcome.updated,
                        unchanged = outcome.unchanged,
                        errors = outcome.errors.len(),
                        "Client catalog reconciled"
                    );
                    self.ctx.emit(SyncEvent::ItemsReconciled {
                        client_id: client.client_id.to_string(),
                        media_type: K::TYPE.to_string(),
                        created: outcome.created as u64,
                        updated: outcome.updated as u64,
                        unchanged: outcome.unchanged as u64,
                        errors: outcome.errors.len() as u64,
                    });
                    totals.absorb(outcome);
                }
                Err(SyncError::Cancelled) => return Err(SyncError::Cancelled.into()),
                Err(e) => {
                    warn!(client_id = %client.client_id, error = %e, "Client catalog sync failed");
                    failures.push(format!("{}: {}", client.client_id, e));
                }
            }
        }

        if failures.len() == clients.len() {
            return Err(SyncError::AllClientsFailed {
                attempted: clients.len(),
                details: failures.join("; "),
            }
            .into());
        }

        let mut message = format!(
            "{} created, {} updated, {} unchanged, {} item errors",
            totals.created,
            totals.updated,
            totals.unchanged,
            totals.errors.len()
        );
        if !failures.is_empty() {
            message.push_str(&format!("; {} of {} clients failed", failures.len(), clients.len()));
        }
        Ok(JobOutcome::with_message(message))
    }
}

