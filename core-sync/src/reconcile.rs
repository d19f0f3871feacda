//! # Reconciliation Engine
//!
//! Merges catalog records reported by one client into the canonical store.
//!
//! ## Overview
//!
//! Each record is matched on `(client_id, item_id)` first. On a miss, the
//! record's external ids (imdb, tmdb, musicbrainz, ...) link it to an item of
//! the same kind already reported by another client. An item that already
//! carries a different id from the same client is never linked.
//!
//! - **Update path**: the client mapping and external ids are merged into the
//!   matched item, the payload is replaced wholesale and the denormalized
//!   fields recomputed. Nothing is written when the merge changed nothing.
//! - **Create path**: a new canonical item is built from the record when both
//!   lookups miss.
//!
//! A record that cannot be reconciled (no client id, wrong kind, undecodable
//! payload, store rejection) becomes an [`ItemError`] and the batch continues.
//!
//! Records are processed in chunks of `batch_size`; progress is reported after
//! every chunk inside the caller's [`ProgressWindow`].
//!
//! ## Usage
//!
//! ```rust,ignore
//! let reconciler = Reconciler::<Movie>::new(ctx.items::<Movie>(), ctx.clock.clone(), 100);
//! let outcome = reconciler
//!     .upsert(&client_id, ClientType::Plex, &records, &progress, ProgressWindow::FULL)
//!     .await;
//! assert_eq!(outcome.errors.len(), 0);
//! ```

use bridge_traits::{ClientId, ClientType, Clock, RemoteItem};
use core_jobs::{ProgressSink, ProgressWindow};
use core_library::{ItemRepository, MediaItem, MediaKind};
use std::sync::Arc;
use tracing::{debug, warn};

/// A record that could not be reconciled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemError {
    /// Position of the record in the submitted batch
    pub index: usize,
    pub item_id: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub created: usize,
    pub updated: usize,
    /// Matched items whose merge changed nothing
    pub unchanged: usize,
    pub errors: Vec<ItemError>,
}

impl UpsertOutcome {
    pub fn processed(&self) -> usize {
        self.created + self.updated + self.unchanged + self.errors.len()
    }

    /// Fold a later batch into this one, shifting its error indexes.
    pub fn absorb(&mut self, other: UpsertOutcome) {
        let offset = self.processed();
        self.created += other.created;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
        self.errors
            .extend(other.errors.into_iter().map(|mut error| {
                error.index += offset;
                error
            }));
    }
}

enum Applied {
    Created,
    Updated,
    Unchanged,
}

pub struct Reconciler<K: MediaKind> {
    items: Arc<dyn ItemRepository<K>>,
    clock: Arc<dyn Clock>,
    batch_size: usize,
}

impl<K: MediaKind> Reconciler<K> {
    pub fn new(items: Arc<dyn ItemRepository<K>>, clock: Arc<dyn Clock>, batch_size: usize) -> Self {
        Self {
            items,
            clock,
            batch_size: batch_size.max(1),
        }
    }

    /// Reconcile `records` from one client.
    ///
    /// Never fails as a whole; per-record failures are returned in
    /// [`UpsertOutcome::errors`].
    pub async fn upsert(
        &self,
        client_id: &ClientId,
        client_type: ClientType,
        records: &[RemoteItem],
        progress: &dyn ProgressSink,
        window: ProgressWindow,
    ) -> UpsertOutcome {
        let mut outcome = UpsertOutcome::default();
        let total = records.len();

        for (chunk_index, chunk) in records.chunks(self.batch_size).enumerate() {
            let now = self.clock.unix_timestamp();
            let base = chunk_index * self.batch_size;

            for (offset, record) in chunk.iter().enumerate() {
                match self.apply(client_id, client_type, record, now).await {
                    Ok(Applied::Created) => outcome.created += 1,
                    Ok(Applied::Updated) => outcome.updated += 1,
                    Ok(Applied::Unchanged) => outcome.unchanged += 1,
                    Err(message) => {
                        warn!(
                            client_id = %client_id,
                            item_id = record.item_id.as_deref().unwrap_or("<none>"),
                            media_type = %K::TYPE,
                            error = %message,
                            "Skipping record"
                        );
                        outcome.errors.push(ItemError {
                            index: base + offset,
                            item_id: record.item_id.clone(),
                            message,
                        });
                    }
                }
            }

            let done = base + chunk.len();
            debug!(client_id = %client_id, done, total, "Reconciled chunk");
            progress
                .report(
                    window.percent(done, total),
                    &format!("{}: {}/{} {} records", client_id, done, total, K::TYPE),
                )
                .await;
        }

        outcome
    }

    async fn apply(
        &self,
        client_id: &ClientId,
        client_type: ClientType,
        record: &RemoteItem,
        now: i64,
    ) -> std::result::Result<Applied, String> {
        let item_id = record
            .item_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| "record has no client item id".to_string())?;

        if record.media_type != K::TYPE {
            return Err(format!(
                "expected a {} record, got {}",
                K::TYPE,
                record.media_type
            ));
        }

        let data: K::Data = serde_json::from_value(record.payload.clone())
            .map_err(|e| format!("malformed payload: {}", e))?;

        let existing = match self
            .items
            .get_by_client_item_id(client_id, item_id)
            .await
            .map_err(|e| e.to_string())?
        {
            Some(item) => Some(item),
            None => self.linked_item(client_id, item_id, record).await?,
        };

        match existing {
            Some(mut item) => {
                let mut changed = item.merge_client(client_id, client_type, item_id);
                changed |= item.merge_external_ids(&record.external_ids);
                changed |= item.set_data(data);
                if !changed {
                    return Ok(Applied::Unchanged);
                }
                item.touch(now);
                self.items.update(&item).await.map_err(|e| e.to_string())?;
                Ok(Applied::Updated)
            }
            None => {
                let mut item = MediaItem::<K>::new(data, now);
                item.merge_client(client_id, client_type, item_id);
                item.merge_external_ids(&record.external_ids);
                self.items.create(&item).await.map_err(|e| e.to_string())?;
                Ok(Applied::Created)
            }
        }
    }

    /// Item reported by another client for the same work.
    async fn linked_item(
        &self,
        client_id: &ClientId,
        item_id: &str,
        record: &RemoteItem,
    ) -> std::result::Result<Option<MediaItem<K>>, String> {
        if record.external_ids.is_empty() {
            return Ok(None);
        }
        let candidate = self
            .items
            .find_by_external_ids(&record.external_ids)
            .await
            .map_err(|e| e.to_string())?;

        Ok(candidate.filter(|item| {
            let free = item.client_item_id(client_id).is_none();
            if free {
                debug!(
                    client_id = %client_id,
                    item_id,
                    media_item_id = %item.id,
                    "Linked record to existing item by external id"
                );
            }
            free
        }))
    }
}
