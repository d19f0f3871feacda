//! # List Sync Engine
//!
//! Propagates playlist and collection membership between one user's clients.
//!
//! ## Overview
//!
//! A pass runs in three steps:
//!
//! 1. **Import**: every fetched client list is matched to a canonical list
//!    (by client list id, then by normalized title among lists the client is
//!    not yet part of), or becomes a new canonical list. The client's state is
//!    refreshed and the canonical sequence rebuilt from the newest version.
//! 2. **Strategy**: [`ListStrategy`] picks source and target versions and
//!    item-level sync copies missing members from source to target.
//! 3. **Persist**: every canonical list touched by the pass is written once.
//!
//! Item-level sync only ever appends. A source member is added to a target
//! when the canonical item behind it has a mapping for the target client;
//! unmapped members are skipped and counted.
//!
//! ## Failure containment
//!
//! A failing add, a failing `create_list` or a target without list support is
//! logged and counted; the pass carries on with the next item or target.
//! Store errors abort the pass for this user.

use bridge_traits::{ClientId, Clock, ListDraft, ListProvider, ProviderHandle, RemoteList};
use core_library::{
    ChangeRecord, ChangeType, ItemIndex, ItemRepository, ListClientState, ListData, ListKind,
    ListSyncSettings, MediaItem, SyncDirection, UserId,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::error::{Result, SyncError};

/// Resolved list sync strategy for one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListStrategy {
    /// The primary client's lists are pushed to every other client
    PrimaryToClients { primary: ClientId },
    /// Every other client's lists are merged into the primary
    ClientsToPrimary { primary: ClientId },
    /// The most recently modified version of each list wins
    Bidirectional,
}

impl ListStrategy {
    pub fn from_settings(settings: &ListSyncSettings) -> Result<Self> {
        match (settings.direction, &settings.primary_client_id) {
            (SyncDirection::Bidirectional, _) => Ok(ListStrategy::Bidirectional),
            (SyncDirection::PrimaryToClients, Some(primary)) => Ok(ListStrategy::PrimaryToClients {
                primary: primary.clone(),
            }),
            (SyncDirection::ClientsToPrimary, Some(primary)) => Ok(ListStrategy::ClientsToPrimary {
                primary: primary.clone(),
            }),
            (direction, None) => Err(SyncError::Config(format!(
                "{} {} sync for user {} has no primary client",
                direction.as_str(),
                settings.media_type,
                settings.user_id
            ))),
        }
    }

    pub fn primary(&self) -> Option<&ClientId> {
        match self {
            ListStrategy::PrimaryToClients { primary } | ListStrategy::ClientsToPrimary { primary } => {
                Some(primary)
            }
            ListStrategy::Bidirectional => None,
        }
    }

    pub fn direction(&self) -> SyncDirection {
        match self {
            ListStrategy::PrimaryToClients { .. } => SyncDirection::PrimaryToClients,
            ListStrategy::ClientsToPrimary { .. } => SyncDirection::ClientsToPrimary,
            ListStrategy::Bidirectional => SyncDirection::Bidirectional,
        }
    }
}

/// One connected client and the lists fetched from it for this pass.
#[derive(Debug, Clone)]
pub struct ClientLists {
    pub handle: ProviderHandle,
    pub lists: Vec<RemoteList>,
}

impl ClientLists {
    pub fn new(handle: ProviderHandle, lists: Vec<RemoteList>) -> Self {
        Self { handle, lists }
    }

    fn find(&self, list_id: &str) -> Option<&RemoteList> {
        self.lists.iter().find(|list| list.list_id == list_id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListSyncStats {
    /// Lists created on clients
    pub created: usize,
    /// Existing client lists that received items or new metadata
    pub updated: usize,
    /// Non-source versions modified since their last sync (bidirectional)
    pub conflicts: usize,
    /// Canonical lists created from client lists
    pub lists_imported: usize,
    pub items_added: usize,
    pub items_skipped: usize,
    pub items_failed: usize,
    pub targets_failed: usize,
}

impl ListSyncStats {
    pub fn absorb(&mut self, other: &ListSyncStats) {
        self.created += other.created;
        self.updated += other.updated;
        self.conflicts += other.conflicts;
        self.lists_imported += other.lists_imported;
        self.items_added += other.items_added;
        self.items_skipped += other.items_skipped;
        self.items_failed += other.items_failed;
        self.targets_failed += other.targets_failed;
    }
}

/// How a source version is copied into one target.
struct Propagation<'a> {
    source: &'a ClientId,
    target: &'a ClientId,
    target_lists: &'a ClientLists,
    /// Create the list on the target when it has no version yet
    create_missing: bool,
    /// Source list whose title and description the target should carry
    metadata_from: Option<&'a RemoteList>,
}

pub struct ListSyncEngine<K: ListKind> {
    lists: Arc<dyn ItemRepository<K>>,
    index: Arc<dyn ItemIndex>,
    clock: Arc<dyn Clock>,
}

impl<K: ListKind> ListSyncEngine<K> {
    pub fn new(
        lists: Arc<dyn ItemRepository<K>>,
        index: Arc<dyn ItemIndex>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { lists, index, clock }
    }

    /// Run one pass for `user_id` over the given clients.
    ///
    /// # Errors
    /// [`SyncError::Config`] when the strategy's primary client is not among
    /// `clients`; store errors are propagated.
    #[instrument(skip(self, clients), fields(media_type = K::TYPE.as_str(), direction = strategy.direction().as_str()))]
    pub async fn sync_lists(
        &self,
        user_id: &UserId,
        strategy: &ListStrategy,
        clients: &BTreeMap<ClientId, ClientLists>,
    ) -> Result<ListSyncStats> {
        if let Some(primary) = strategy.primary() {
            if !clients.contains_key(primary) {
                return Err(SyncError::Config(format!(
                    "primary client {} is not available for user {}",
                    primary, user_id
                )));
            }
        }

        let now = self.clock.unix_timestamp();
        let mut stats = ListSyncStats::default();
        let mut lists = self.lists.get_by_user_id(user_id).await?;
        let stored = lists.len();
        let mut touched = BTreeSet::new();

        self.import(user_id, clients, &mut lists, &mut touched, &mut stats, now);
        for &index in &touched {
            let list = &mut lists[index];
            self.rebuild_items(list, clients, now).await?;
            adopt_source_metadata(list, strategy.primary(), clients);
        }

        match strategy {
            ListStrategy::PrimaryToClients { primary } => {
                self.push_from_primary(primary, clients, &mut lists, &mut touched, &mut stats, now)
                    .await?;
            }
            ListStrategy::ClientsToPrimary { primary } => {
                self.merge_into_primary(primary, clients, &mut lists, &mut touched, &mut stats, now)
                    .await?;
            }
            ListStrategy::Bidirectional => {
                self.sync_newest(clients, &mut lists, &mut touched, &mut stats, now)
                    .await?;
            }
        }

        for index in touched {
            let list = &mut lists[index];
            list.touch(now);
            if index >= stored {
                self.lists.create(list).await?;
            } else {
                self.lists.update(list).await?;
            }
        }

        info!(
            user_id = %user_id,
            created = stats.created,
            updated = stats.updated,
            conflicts = stats.conflicts,
            items_added = stats.items_added,
            items_skipped = stats.items_skipped,
            "List sync finished"
        );
        Ok(stats)
    }

    // ========================================================================
    // Import
    // ========================================================================

    fn import(
        &self,
        user_id: &UserId,
        clients: &BTreeMap<ClientId, ClientLists>,
        lists: &mut Vec<MediaItem<K>>,
        touched: &mut BTreeSet<usize>,
        stats: &mut ListSyncStats,
        now: i64,
    ) {
        for (client_id, entry) in clients {
            // A version that the client no longer reports was deleted there.
            for (index, list) in lists.iter_mut().enumerate() {
                let gone = list
                    .data
                    .client_state(client_id)
                    .is_some_and(|state| entry.find(&state.client_list_id).is_none());
                if gone {
                    debug!(client_id = %client_id, list = %list.title, "List no longer on client");
                    list.data.sync_client_states.remove(client_id);
                    list.client_ids.remove(client_id);
                    touched.insert(index);
                }
            }

            for remote in &entry.lists {
                let index = match match_list(lists, client_id, remote) {
                    Some(index) => index,
                    None => {
                        let data = ListData::new(remote.title.trim(), remote.description.clone());
                        lists.push(MediaItem::<K>::new(data, now).with_owner(user_id.clone()));
                        stats.lists_imported += 1;
                        lists.len() - 1
                    }
                };
                let list = &mut lists[index];
                list.data.observe_client_list(client_id, remote);
                list.merge_client(client_id, entry.handle.client_type(), &remote.list_id);
                touched.insert(index);
            }
        }
    }

    /// Rebuild the canonical sequence from the newest connected version.
    async fn rebuild_items(
        &self,
        list: &mut MediaItem<K>,
        clients: &BTreeMap<ClientId, ClientLists>,
        now: i64,
    ) -> Result<()> {
        let Some(newest) = newest_version(&list.data, clients) else {
            return Ok(());
        };
        let item_ids = match list.data.client_state(&newest) {
            Some(state) => state.item_ids.clone(),
            None => return Ok(()),
        };

        let mut ordered = Vec::with_capacity(item_ids.len());
        for item_id in &item_ids {
            if let Some(id) = self.index.find_id_by_client_item(&newest, item_id).await? {
                ordered.push(id);
            }
        }
        list.data.replace_items(ordered, now);
        Ok(())
    }

    // ========================================================================
    // Strategies
    // ========================================================================

    async fn push_from_primary(
        &self,
        primary: &ClientId,
        clients: &BTreeMap<ClientId, ClientLists>,
        lists: &mut [MediaItem<K>],
        touched: &mut BTreeSet<usize>,
        stats: &mut ListSyncStats,
        now: i64,
    ) -> Result<()> {
        let Some(primary_lists) = clients.get(primary) else {
            return Ok(());
        };

        for (index, list) in lists.iter_mut().enumerate() {
            let Some(primary_list_id) = list
                .data
                .client_state(primary)
                .map(|state| state.client_list_id.clone())
            else {
                continue;
            };
            touched.insert(index);
            let source_remote = primary_lists.find(&primary_list_id);

            for (target, target_lists) in clients {
                if target == primary {
                    continue;
                }
                let step = Propagation {
                    source: primary,
                    target,
                    target_lists,
                    create_missing: true,
                    metadata_from: source_remote,
                };
                self.propagate(list, step, stats, now).await?;
            }
        }
        Ok(())
    }

    async fn merge_into_primary(
        &self,
        primary: &ClientId,
        clients: &BTreeMap<ClientId, ClientLists>,
        lists: &mut [MediaItem<K>],
        touched: &mut BTreeSet<usize>,
        stats: &mut ListSyncStats,
        now: i64,
    ) -> Result<()> {
        let Some(primary_lists) = clients.get(primary) else {
            return Ok(());
        };

        for (index, list) in lists.iter_mut().enumerate() {
            let sources: Vec<ClientId> = list
                .data
                .sync_client_states
                .keys()
                .filter(|client| *client != primary && clients.contains_key(*client))
                .cloned()
                .collect();

            for source in &sources {
                touched.insert(index);
                let source_remote = list
                    .data
                    .client_state(source)
                    .and_then(|state| clients.get(source)?.find(&state.client_list_id));
                let step = Propagation {
                    source,
                    target: primary,
                    target_lists: primary_lists,
                    create_missing: true,
                    metadata_from: source_remote,
                };
                self.propagate(list, step, stats, now).await?;
            }
        }
        Ok(())
    }

    async fn sync_newest(
        &self,
        clients: &BTreeMap<ClientId, ClientLists>,
        lists: &mut [MediaItem<K>],
        touched: &mut BTreeSet<usize>,
        stats: &mut ListSyncStats,
        now: i64,
    ) -> Result<()> {
        for (index, list) in lists.iter_mut().enumerate() {
            let Some(source) = newest_version(&list.data, clients) else {
                continue;
            };
            let targets: Vec<ClientId> = list
                .data
                .sync_client_states
                .keys()
                .filter(|client| **client != source && clients.contains_key(*client))
                .cloned()
                .collect();
            if targets.is_empty() {
                continue;
            }
            touched.insert(index);

            for target in &targets {
                let modified = list
                    .data
                    .client_state(target)
                    .is_some_and(ListClientState::modified_since_sync);
                if modified {
                    stats.conflicts += 1;
                    info!(
                        list = %list.title,
                        source = %source,
                        target_client = %target,
                        "Conflicting list edits, newest version wins"
                    );
                }
            }

            for target in &targets {
                let Some(target_lists) = clients.get(target) else {
                    continue;
                };
                let step = Propagation {
                    source: &source,
                    target,
                    target_lists,
                    create_missing: false,
                    metadata_from: None,
                };
                self.propagate(list, step, stats, now).await?;
            }
        }
        Ok(())
    }

    // ========================================================================
    // Propagation
    // ========================================================================

    async fn propagate(
        &self,
        list: &mut MediaItem<K>,
        step: Propagation<'_>,
        stats: &mut ListSyncStats,
        now: i64,
    ) -> Result<()> {
        let provider = match step.target_lists.handle.lists() {
            Ok(provider) => provider,
            Err(e) => {
                warn!(target_client = %step.target, error = %e, "Target cannot hold lists");
                stats.targets_failed += 1;
                return Ok(());
            }
        };

        let mut created = false;
        let mut metadata_updated = false;
        match list.data.client_state(step.target).map(|state| state.client_list_id.clone()) {
            None if !step.create_missing => return Ok(()),
            None => {
                let (title, description) = match step.metadata_from {
                    Some(source) => (source.title.clone(), source.description.clone()),
                    None => (list.data.title.clone(), list.data.description.clone()),
                };
                let draft = ListDraft {
                    media_type: K::TYPE,
                    title,
                    description,
                    item_ids: Vec::new(),
                };
                match provider.create_list(&draft).await {
                    Ok(handle) => {
                        info!(target_client = %step.target, list_id = %handle.list_id, title = %draft.title, "Created list on client");
                        list.merge_client(step.target, step.target_lists.handle.client_type(), &handle.list_id);
                        list.data.sync_client_states.insert(
                            step.target.clone(),
                            ListClientState {
                                client_list_id: handle.list_id,
                                item_ids: Vec::new(),
                                last_modified: now,
                                last_synced: None,
                            },
                        );
                        stats.created += 1;
                        created = true;
                    }
                    Err(e) => {
                        warn!(target_client = %step.target, title = %draft.title, error = %e, "Failed to create list");
                        stats.targets_failed += 1;
                        return Ok(());
                    }
                }
            }
            Some(target_list_id) => {
                if let Some(source) = step.metadata_from {
                    let target_remote = step.target_lists.find(&target_list_id);
                    let stale = target_remote.is_some_and(|target| {
                        target.description != source.description
                            || ListData::normalize_title(&target.title)
                                != ListData::normalize_title(&source.title)
                    });
                    if stale {
                        metadata_updated =
                            self.refresh_metadata(list, provider, &step, source, &target_list_id).await;
                    }
                }
            }
        }

        let added = self.sync_items(list, provider, &step, stats, now).await?;
        if !created && (added > 0 || metadata_updated) {
            stats.updated += 1;
        }
        Ok(())
    }

    /// Rewrite title and description on the target, keeping its members.
    async fn refresh_metadata(
        &self,
        list: &mut MediaItem<K>,
        provider: &dyn ListProvider,
        step: &Propagation<'_>,
        source: &RemoteList,
        target_list_id: &str,
    ) -> bool {
        let item_ids = list
            .data
            .client_state(step.target)
            .map(|state| state.item_ids.clone())
            .unwrap_or_default();
        let draft = ListDraft {
            media_type: K::TYPE,
            title: source.title.clone(),
            description: source.description.clone(),
            item_ids,
        };

        match provider.update_list(target_list_id, &draft).await {
            Ok(()) => {
                debug!(target_client = %step.target, list_id = target_list_id, "Refreshed list metadata");
                set_metadata(list, source);
                true
            }
            Err(e) => {
                warn!(target_client = %step.target, list_id = target_list_id, error = %e, "Failed to update list metadata");
                false
            }
        }
    }

    /// Append source members missing on the target. Returns the number added.
    async fn sync_items(
        &self,
        list: &mut MediaItem<K>,
        provider: &dyn ListProvider,
        step: &Propagation<'_>,
        stats: &mut ListSyncStats,
        now: i64,
    ) -> Result<usize> {
        let (source_items, target_list_id) = match (
            list.data.client_state(step.source),
            list.data.client_state(step.target),
        ) {
            (Some(source), Some(target)) => (source.item_ids.clone(), target.client_list_id.clone()),
            _ => return Ok(0),
        };

        let mut added = 0;
        for source_item in &source_items {
            let Some(canonical) = self.index.find_id_by_client_item(step.source, source_item).await? else {
                debug!(source = %step.source, item_id = %source_item, "List member not in catalog");
                stats.items_skipped += 1;
                continue;
            };
            let client_ids = self.index.find_client_ids(&canonical).await?;
            let Some(target_item) = client_ids.get(step.target).map(|c| c.item_id.clone()) else {
                debug!(target_client = %step.target, item = %canonical, "No mapping on target client");
                stats.items_skipped += 1;
                continue;
            };

            let present = list
                .data
                .client_state(step.target)
                .is_some_and(|state| state.contains(&target_item));
            if present {
                continue;
            }

            match provider.add_item_to_playlist(&target_list_id, &target_item).await {
                Ok(()) => {
                    if let Some(state) = list.data.client_state_mut(step.target) {
                        state.item_ids.push(target_item);
                        state.last_modified = now;
                    }
                    list.data.record_item(
                        canonical,
                        ChangeRecord {
                            source_client_id: step.source.clone(),
                            source_item_id: source_item.clone(),
                            change_type: ChangeType::Sync,
                            timestamp: now,
                        },
                    );
                    stats.items_added += 1;
                    added += 1;
                }
                Err(e) => {
                    warn!(
                        target_client = %step.target,
                        list_id = %target_list_id,
                        item_id = %target_item,
                        error = %e,
                        "Failed to add list item"
                    );
                    stats.items_failed += 1;
                }
            }
        }

        list.data.mark_synced(step.source, now);
        list.data.mark_synced(step.target, now);
        Ok(added)
    }
}

/// Canonical list a client list belongs to: same client list id first, then
/// the same normalized title on a list this client has no version of.
fn match_list<K: ListKind>(
    lists: &[MediaItem<K>],
    client_id: &ClientId,
    remote: &RemoteList,
) -> Option<usize> {
    lists
        .iter()
        .position(|list| {
            list.data
                .client_state(client_id)
                .is_some_and(|state| state.client_list_id == remote.list_id)
        })
        .or_else(|| {
            let key = ListData::normalize_title(&remote.title);
            lists.iter().position(|list| {
                list.data.client_state(client_id).is_none() && list.data.normalized_title() == key
            })
        })
}

/// Take title and description from the authoritative version: the primary's
/// when it holds one, otherwise the newest connected version.
fn adopt_source_metadata<K: ListKind>(
    list: &mut MediaItem<K>,
    primary: Option<&ClientId>,
    clients: &BTreeMap<ClientId, ClientLists>,
) {
    let source = primary
        .filter(|primary| list.data.client_state(primary).is_some())
        .cloned()
        .or_else(|| newest_version(&list.data, clients));
    let Some(source) = source else {
        return;
    };
    let remote = list
        .data
        .client_state(&source)
        .and_then(|state| clients.get(&source)?.find(&state.client_list_id));
    if let Some(remote) = remote {
        set_metadata(list, remote);
    }
}

fn set_metadata<K: ListKind>(list: &mut MediaItem<K>, source: &RemoteList) -> bool {
    let title = source.title.trim();
    if title.is_empty()
        || (list.data.title == title && list.data.description == source.description)
    {
        return false;
    }
    let mut data = list.data.clone();
    data.title = title.to_string();
    data.description = source.description.clone();
    list.set_data(data)
}

/// Connected client holding the most recently modified version; ties go to
/// the smallest client id.
fn newest_version(data: &ListData, clients: &BTreeMap<ClientId, ClientLists>) -> Option<ClientId> {
    let mut newest: Option<(&ClientId, i64)> = None;
    // BTreeMap iterates in ascending client order, so `>` keeps the smallest id on ties
    for (client_id, state) in &data.sync_client_states {
        if !clients.contains_key(client_id) {
            continue;
        }
        if newest.map_or(true, |(_, modified)| state.last_modified > modified) {
            newest = Some((client_id, state.last_modified));
        }
    }
    newest.map(|(client_id, _)| client_id.clone())
}
