//! List payload for playlists and collections
//!
//! A canonical list keeps two views of its membership:
//!
//! - `items`: the canonical, ordered sequence of media item ids
//! - `sync_client_states`: what the list looks like on each client, in that
//!   client's own item ids
//!
//! The two drift apart between sync passes. Client states are authoritative
//! for "what is on client X"; the canonical sequence is rebuilt from the most
//! recently modified client version.

use bridge_traits::{ClientId, RemoteList};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::models::MediaItemId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    /// Propagated from another client by the list sync engine
    Sync,
    Added,
    Removed,
}

/// Provenance of a membership change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub source_client_id: ClientId,
    pub source_item_id: String,
    pub change_type: ChangeType,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListItem {
    pub item_id: MediaItemId,
    pub position: u32,
    pub last_changed: i64,
    #[serde(default)]
    pub change_history: Vec<ChangeRecord>,
}

/// The list as last seen on (or written to) one client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListClientState {
    pub client_list_id: String,
    /// Client-local item ids in client order
    #[serde(default)]
    pub item_ids: Vec<String>,
    pub last_modified: i64,
    #[serde(default)]
    pub last_synced: Option<i64>,
}

impl ListClientState {
    pub fn from_remote(list: &RemoteList) -> Self {
        Self {
            client_list_id: list.list_id.clone(),
            item_ids: list.item_ids.clone(),
            last_modified: list.last_modified,
            last_synced: None,
        }
    }

    pub fn contains(&self, item_id: &str) -> bool {
        self.item_ids.iter().any(|id| id == item_id)
    }

    /// Modified on the client since the last sync pass touched it.
    pub fn modified_since_sync(&self) -> bool {
        self.last_synced.map_or(true, |synced| self.last_modified > synced)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListData {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub items: Vec<ListItem>,
    #[serde(default)]
    pub sync_client_states: BTreeMap<ClientId, ListClientState>,
    #[serde(default)]
    pub last_modified: i64,
    #[serde(default)]
    pub last_synced: Option<i64>,
}

impl ListData {
    pub fn new(title: impl Into<String>, description: Option<String>) -> Self {
        Self {
            title: title.into(),
            description,
            items: Vec::new(),
            sync_client_states: BTreeMap::new(),
            last_modified: 0,
            last_synced: None,
        }
    }

    /// Title key used to match versions of the same list across clients.
    pub fn normalize_title(title: &str) -> String {
        title.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
    }

    pub fn normalized_title(&self) -> String {
        Self::normalize_title(&self.title)
    }

    pub fn client_state(&self, client_id: &ClientId) -> Option<&ListClientState> {
        self.sync_client_states.get(client_id)
    }

    pub fn client_state_mut(&mut self, client_id: &ClientId) -> Option<&mut ListClientState> {
        self.sync_client_states.get_mut(client_id)
    }

    /// Client whose list was found via `client_list_id`.
    pub fn client_for_list_id(&self, client_list_id: &str) -> Option<&ClientId> {
        self.sync_client_states
            .iter()
            .find(|(_, state)| state.client_list_id == client_list_id)
            .map(|(client, _)| client)
    }

    /// Replace the state for `client_id` with a freshly fetched version,
    /// keeping its last sync time.
    pub fn observe_client_list(&mut self, client_id: &ClientId, list: &RemoteList) {
        let last_synced = self
            .sync_client_states
            .get(client_id)
            .and_then(|state| state.last_synced);
        let mut state = ListClientState::from_remote(list);
        state.last_synced = last_synced;
        self.sync_client_states.insert(client_id.clone(), state);
        self.last_modified = self.last_modified.max(list.last_modified);
    }

    pub fn contains_item(&self, item_id: &MediaItemId) -> bool {
        self.items.iter().any(|item| &item.item_id == item_id)
    }

    /// Append `item_id` to the canonical sequence, or add the change record
    /// to the existing entry. Returns `true` when a new entry was appended.
    pub fn record_item(&mut self, item_id: MediaItemId, change: ChangeRecord) -> bool {
        let timestamp = change.timestamp;
        if let Some(existing) = self.items.iter_mut().find(|item| item.item_id == item_id) {
            existing.last_changed = timestamp;
            existing.change_history.push(change);
            return false;
        }

        let position = self.items.len() as u32;
        self.items.push(ListItem {
            item_id,
            position,
            last_changed: timestamp,
            change_history: vec![change],
        });
        true
    }

    /// Rebuild the canonical sequence from resolved ids, keeping history of
    /// entries that survive.
    pub fn replace_items(&mut self, ordered: Vec<MediaItemId>, now: i64) {
        let mut previous: Vec<ListItem> = std::mem::take(&mut self.items);
        for (position, item_id) in ordered.into_iter().enumerate() {
            if self.items.iter().any(|item| item.item_id == item_id) {
                continue;
            }
            let entry = match previous.iter().position(|item| item.item_id == item_id) {
                Some(index) => {
                    let mut kept = previous.swap_remove(index);
                    if kept.position != position as u32 {
                        kept.last_changed = now;
                    }
                    kept.position = position as u32;
                    kept
                }
                None => ListItem {
                    item_id,
                    position: position as u32,
                    last_changed: now,
                    change_history: Vec::new(),
                },
            };
            self.items.push(entry);
        }
        for (position, item) in self.items.iter_mut().enumerate() {
            item.position = position as u32;
        }
    }

    /// Stamp the client state and the list itself as synced at `now`.
    pub fn mark_synced(&mut self, client_id: &ClientId, now: i64) {
        if let Some(state) = self.sync_client_states.get_mut(client_id) {
            state.last_synced = Some(now);
        }
        self.last_synced = Some(now);
    }
}
