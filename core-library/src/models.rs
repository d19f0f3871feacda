//! Domain models for the canonical item store
//!
//! This module contains the canonical [`MediaItem`] with its cross-client
//! identity maps, plus the per-user records the sync jobs read and write.

use bridge_traits::{BridgeError, ClientConnection, ClientId, ClientType, MediaType, RemoteUserData};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{LibraryError, Result};
use crate::kinds::{MediaDetails, MediaKind};

// =============================================================================
// ID Types
// =============================================================================

/// Internal surrogate key of a canonical media item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MediaItemId(pub Uuid);

impl MediaItemId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> std::result::Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for MediaItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MediaItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a user, assigned by the host's account system
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

// =============================================================================
// Canonical Media Item
// =============================================================================

/// A client's copy of a canonical item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientRef {
    pub client_type: ClientType,
    pub item_id: String,
}

/// Client mappings keyed by client id; at most one entry per client.
pub type ClientIds = BTreeMap<ClientId, ClientRef>;

/// External references keyed by source (imdb, tmdb, tvdb, musicbrainz).
pub type ExternalIds = BTreeMap<String, String>;

/// One logical work, independent of any client.
///
/// `title`, `release_date` and `release_year` mirror the payload and are only
/// changed through [`MediaItem::set_data`].
#[derive(Debug, Clone, PartialEq)]
pub struct MediaItem<K: MediaKind> {
    pub id: MediaItemId,
    pub title: String,
    pub release_date: Option<NaiveDate>,
    pub release_year: Option<i32>,
    pub data: K::Data,
    pub client_ids: ClientIds,
    pub external_ids: ExternalIds,
    pub owner_id: Option<UserId>,
    pub created_at: i64,
    pub updated_at: i64,
    kind: PhantomData<K>,
}

impl<K: MediaKind> MediaItem<K> {
    pub fn new(data: K::Data, now: i64) -> Self {
        Self {
            id: MediaItemId::new(),
            title: data.title().to_string(),
            release_date: data.release_date(),
            release_year: data.release_year(),
            data,
            client_ids: ClientIds::new(),
            external_ids: ExternalIds::new(),
            owner_id: None,
            created_at: now,
            updated_at: now,
            kind: PhantomData,
        }
    }

    /// Rehydrate a stored item; denormalized fields are recomputed.
    pub fn from_parts(
        id: MediaItemId,
        data: K::Data,
        client_ids: ClientIds,
        external_ids: ExternalIds,
        owner_id: Option<UserId>,
        created_at: i64,
        updated_at: i64,
    ) -> Self {
        let mut item = Self::new(data, created_at);
        item.id = id;
        item.client_ids = client_ids;
        item.external_ids = external_ids;
        item.owner_id = owner_id;
        item.updated_at = updated_at;
        item
    }

    pub fn with_owner(mut self, owner: UserId) -> Self {
        self.owner_id = Some(owner);
        self
    }

    pub fn media_type(&self) -> MediaType {
        K::TYPE
    }

    pub fn client_item_id(&self, client_id: &ClientId) -> Option<&str> {
        self.client_ids
            .get(client_id)
            .map(|client| client.item_id.as_str())
    }

    /// Insert or replace the mapping for `client_id`. Returns whether it changed.
    pub fn merge_client(&mut self, client_id: &ClientId, client_type: ClientType, item_id: &str) -> bool {
        let incoming = ClientRef {
            client_type,
            item_id: item_id.to_string(),
        };
        match self.client_ids.get(client_id) {
            Some(existing) if *existing == incoming => false,
            _ => {
                self.client_ids.insert(client_id.clone(), incoming);
                true
            }
        }
    }

    /// Overwrite ids for matching sources and add new ones; never removes.
    pub fn merge_external_ids(&mut self, incoming: &ExternalIds) -> bool {
        let mut changed = false;
        for (source, id) in incoming {
            if self.external_ids.get(source) != Some(id) {
                self.external_ids.insert(source.clone(), id.clone());
                changed = true;
            }
        }
        changed
    }

    /// Replace the payload wholesale and recompute denormalized fields.
    pub fn set_data(&mut self, data: K::Data) -> bool {
        if self.data == data {
            return false;
        }
        self.title = data.title().to_string();
        self.release_date = data.release_date();
        self.release_year = data.release_year();
        self.data = data;
        true
    }

    pub fn touch(&mut self, now: i64) {
        self.updated_at = now;
    }
}

// =============================================================================
// Users and Clients
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub active: bool,
    pub created_at: i64,
}

impl User {
    pub fn new(id: impl Into<String>, name: impl Into<String>, created_at: i64) -> Self {
        Self {
            id: UserId::new(id),
            name: name.into(),
            active: true,
            created_at,
        }
    }
}

/// A user's configured external client.
///
/// `client_type` is kept as stored so that one unknown vendor string fails
/// only that client when it is connected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub user_id: UserId,
    pub client_id: ClientId,
    pub client_type: String,
    pub base_url: Option<String>,
    /// The user's account id on the client, used for favorites and history
    pub remote_user_id: Option<String>,
    pub enabled: bool,
}

impl ClientConfig {
    pub fn new(user_id: UserId, client_id: impl Into<ClientId>, client_type: ClientType) -> Self {
        Self {
            user_id,
            client_id: client_id.into(),
            client_type: client_type.as_str().to_string(),
            base_url: None,
            remote_user_id: None,
            enabled: true,
        }
    }

    pub fn with_remote_user(mut self, remote_user_id: impl Into<String>) -> Self {
        self.remote_user_id = Some(remote_user_id.into());
        self
    }

    pub fn client_type(&self) -> std::result::Result<ClientType, BridgeError> {
        self.client_type.parse()
    }

    pub fn connection(&self) -> std::result::Result<ClientConnection, BridgeError> {
        Ok(ClientConnection {
            client_id: self.client_id.clone(),
            client_type: self.client_type()?,
            base_url: self.base_url.clone(),
        })
    }
}

/// Which side is authoritative when propagating list changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    PrimaryToClients,
    ClientsToPrimary,
    Bidirectional,
}

impl SyncDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncDirection::PrimaryToClients => "primary_to_clients",
            SyncDirection::ClientsToPrimary => "clients_to_primary",
            SyncDirection::Bidirectional => "bidirectional",
        }
    }

    pub fn requires_primary(&self) -> bool {
        !matches!(self, SyncDirection::Bidirectional)
    }
}

impl FromStr for SyncDirection {
    type Err = LibraryError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "primary_to_clients" => Ok(SyncDirection::PrimaryToClients),
            "clients_to_primary" => Ok(SyncDirection::ClientsToPrimary),
            "bidirectional" => Ok(SyncDirection::Bidirectional),
            other => Err(LibraryError::InvalidInput {
                field: "direction".to_string(),
                message: format!("unknown sync direction '{}'", other),
            }),
        }
    }
}

/// Per-user list sync configuration for one list kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListSyncSettings {
    pub user_id: UserId,
    pub media_type: MediaType,
    pub direction: SyncDirection,
    pub primary_client_id: Option<ClientId>,
    pub enabled: bool,
}

// =============================================================================
// Per-user Item State
// =============================================================================

/// A user's interaction state with one canonical item, merged across clients.
#[derive(Debug, Clone, PartialEq)]
pub struct UserMediaItemData {
    pub user_id: UserId,
    pub media_item_id: MediaItemId,
    pub is_favorite: bool,
    pub play_count: u32,
    pub last_played_at: Option<i64>,
    pub completed: bool,
    pub played_percentage: Option<f64>,
    pub updated_at: i64,
}

impl UserMediaItemData {
    pub fn new(user_id: UserId, media_item_id: MediaItemId, now: i64) -> Self {
        Self {
            user_id,
            media_item_id,
            is_favorite: false,
            play_count: 0,
            last_played_at: None,
            completed: false,
            played_percentage: None,
            updated_at: now,
        }
    }

    pub fn merge_favorite(&mut self, is_favorite: bool) -> bool {
        if self.is_favorite == is_favorite {
            return false;
        }
        self.is_favorite = is_favorite;
        true
    }

    /// Merge a client's play state: counts and timestamps take the maximum,
    /// completion is sticky, and the percentage follows the most recent play.
    pub fn merge_play_state(&mut self, remote: &RemoteUserData) -> bool {
        let before = self.clone();

        self.play_count = self.play_count.max(remote.play_count);
        self.completed |= remote.completed;

        let remote_is_latest = match (remote.last_played_at, self.last_played_at) {
            (Some(remote_at), Some(local_at)) => remote_at >= local_at,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => self.played_percentage.is_none(),
        };
        if remote_is_latest && remote.played_percentage.is_some() {
            self.played_percentage = remote.played_percentage;
        }
        self.last_played_at = self.last_played_at.max(remote.last_played_at);

        *self != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kinds::{Movie, MovieData};

    fn movie(title: &str, year: Option<i32>) -> MovieData {
        MovieData {
            title: title.to_string(),
            original_title: None,
            release_date: year.and_then(|y| NaiveDate::from_ymd_opt(y, 1, 1)),
            genres: vec![],
            cast: vec![],
            runtime_minutes: None,
            overview: None,
        }
    }

    #[test]
    fn test_media_item_id_roundtrip() {
        let id = MediaItemId::new();
        assert_eq!(MediaItemId::from_string(&id.to_string()).unwrap(), id);
        assert!(MediaItemId::from_string("not-a-uuid").is_err());
    }

    #[test]
    fn test_new_item_denormalizes_payload() {
        let item = MediaItem::<Movie>::new(movie("Alien", Some(1979)), 100);
        assert_eq!(item.title, "Alien");
        assert_eq!(item.release_year, Some(1979));
        assert_eq!(item.media_type(), MediaType::Movie);
        assert_eq!(item.created_at, 100);
    }

    #[test]
    fn test_set_data_recomputes_and_reports_change() {
        let mut item = MediaItem::<Movie>::new(movie("Alien", Some(1979)), 100);

        assert!(!item.set_data(movie("Alien", Some(1979))));
        assert!(item.set_data(movie("Aliens", Some(1986))));
        assert_eq!(item.title, "Aliens");
        assert_eq!(item.release_year, Some(1986));
    }

    #[test]
    fn test_merge_client_replaces_only_own_entry() {
        let mut item = MediaItem::<Movie>::new(movie("Alien", None), 0);
        let plex = ClientId::from("plex");
        let emby = ClientId::from("emby");

        assert!(item.merge_client(&plex, ClientType::Plex, "1"));
        assert!(item.merge_client(&emby, ClientType::Emby, "e1"));
        assert!(!item.merge_client(&plex, ClientType::Plex, "1"));
        assert!(item.merge_client(&plex, ClientType::Plex, "2"));

        assert_eq!(item.client_ids.len(), 2);
        assert_eq!(item.client_item_id(&plex), Some("2"));
        assert_eq!(item.client_item_id(&emby), Some("e1"));
    }

    #[test]
    fn test_merge_external_ids_is_union() {
        let mut item = MediaItem::<Movie>::new(movie("Alien", None), 0);
        item.external_ids.insert("imdb".into(), "tt0078748".into());

        let mut incoming = ExternalIds::new();
        incoming.insert("tmdb".into(), "348".into());
        assert!(item.merge_external_ids(&incoming));
        assert!(!item.merge_external_ids(&incoming));

        assert_eq!(item.external_ids.len(), 2);
        assert_eq!(item.external_ids.get("imdb").map(String::as_str), Some("tt0078748"));
    }

    #[test]
    fn test_client_config_unknown_type() {
        let mut config = ClientConfig::new(UserId::from("u1"), "kodi-1", ClientType::Plex);
        config.client_type = "kodi".to_string();
        assert!(matches!(
            config.connection(),
            Err(BridgeError::UnknownClientType(_))
        ));
    }

    #[test]
    fn test_sync_direction_parse() {
        for dir in [
            SyncDirection::PrimaryToClients,
            SyncDirection::ClientsToPrimary,
            SyncDirection::Bidirectional,
        ] {
            assert_eq!(dir.as_str().parse::<SyncDirection>().unwrap(), dir);
        }
        assert!(!SyncDirection::Bidirectional.requires_primary());
        assert!("sideways".parse::<SyncDirection>().is_err());
    }

    #[test]
    fn test_merge_play_state_takes_max_and_latest_percentage() {
        let mut data = UserMediaItemData::new(UserId::from("u1"), MediaItemId::new(), 0);

        let first = RemoteUserData {
            item_id: "a".into(),
            is_favorite: false,
            play_count: 3,
            last_played_at: Some(200),
            completed: true,
            played_percentage: Some(100.0),
        };
        assert!(data.merge_play_state(&first));

        let older = RemoteUserData {
            item_id: "b".into(),
            is_favorite: false,
            play_count: 1,
            last_played_at: Some(100),
            completed: false,
            played_percentage: Some(40.0),
        };
        assert!(!data.merge_play_state(&older));

        assert_eq!(data.play_count, 3);
        assert_eq!(data.last_played_at, Some(200));
        assert!(data.completed);
        assert_eq!(data.played_percentage, Some(100.0));

        assert!(!data.merge_play_state(&first), "merge is idempotent");
    }
}
