//! Media Provider Abstractions
//!
//! Uniform capability traits that every external media client adapter
//! (Plex, Emby, Jellyfin, Subsonic, the *arr automation tools, ...) exposes to
//! the sync engine, plus the typed [`ProviderHandle`] a [`ProviderFactory`]
//! hands out for a configured client.
//!
//! Capabilities are optional per client: an automation tool such as Radarr has
//! a catalog but no playlists. Callers ask the handle for a capability and get
//! a [`BridgeError::CapabilityMissing`] instead of performing a downcast.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{BridgeError, Result};

// ============================================================================
// Identifiers
// ============================================================================

/// Identifier of a configured external client (one server instance).
///
/// Ordering is lexical and is used wherever a deterministic client order is
/// required (iteration of identity maps, tie-breaks).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClientId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ClientId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Vendor of an external client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientType {
    Plex,
    Emby,
    Jellyfin,
    Subsonic,
    Radarr,
    Sonarr,
    Lidarr,
    Trakt,
}

impl ClientType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientType::Plex => "plex",
            ClientType::Emby => "emby",
            ClientType::Jellyfin => "jellyfin",
            ClientType::Subsonic => "subsonic",
            ClientType::Radarr => "radarr",
            ClientType::Sonarr => "sonarr",
            ClientType::Lidarr => "lidarr",
            ClientType::Trakt => "trakt",
        }
    }
}

impl fmt::Display for ClientType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClientType {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "plex" => Ok(ClientType::Plex),
            "emby" => Ok(ClientType::Emby),
            "jellyfin" => Ok(ClientType::Jellyfin),
            "subsonic" => Ok(ClientType::Subsonic),
            "radarr" => Ok(ClientType::Radarr),
            "sonarr" => Ok(ClientType::Sonarr),
            "lidarr" => Ok(ClientType::Lidarr),
            "trakt" => Ok(ClientType::Trakt),
            _ => Err(BridgeError::UnknownClientType(s.to_string())),
        }
    }
}

/// Kind of media work exchanged with providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Movie,
    Series,
    Episode,
    Track,
    Album,
    Artist,
    Playlist,
    Collection,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Movie => "movie",
            MediaType::Series => "series",
            MediaType::Episode => "episode",
            MediaType::Track => "track",
            MediaType::Album => "album",
            MediaType::Artist => "artist",
            MediaType::Playlist => "playlist",
            MediaType::Collection => "collection",
        }
    }

    /// Playlists and collections carry ordered membership instead of metadata.
    pub fn is_list(&self) -> bool {
        matches!(self, MediaType::Playlist | MediaType::Collection)
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaType {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "movie" => Ok(MediaType::Movie),
            "series" => Ok(MediaType::Series),
            "episode" => Ok(MediaType::Episode),
            "track" => Ok(MediaType::Track),
            "album" => Ok(MediaType::Album),
            "artist" => Ok(MediaType::Artist),
            "playlist" => Ok(MediaType::Playlist),
            "collection" => Ok(MediaType::Collection),
            other => Err(BridgeError::InvalidData(format!(
                "unknown media type '{}'",
                other
            ))),
        }
    }
}

// ============================================================================
// Records
// ============================================================================

/// Page request for a client's catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemQuery {
    pub media_type: MediaType,
    pub offset: u32,
    pub limit: u32,
}

impl ItemQuery {
    pub fn new(media_type: MediaType, limit: u32) -> Self {
        Self {
            media_type,
            offset: 0,
            limit,
        }
    }

    pub fn with_offset(mut self, offset: u32) -> Self {
        self.offset = offset;
        self
    }

    /// Query for the page following this one.
    pub fn next_page(self) -> Self {
        self.with_offset(self.offset.saturating_add(self.limit))
    }
}

/// A catalog record as reported by a client.
///
/// `item_id` is optional because some providers emit partially populated rows;
/// such records cannot be reconciled and are reported as item errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteItem {
    pub item_id: Option<String>,
    pub media_type: MediaType,
    /// External references keyed by source (imdb, tmdb, tvdb, musicbrainz)
    #[serde(default)]
    pub external_ids: BTreeMap<String, String>,
    /// Kind-specific metadata, decoded by the reconciler
    pub payload: serde_json::Value,
    pub updated_at: Option<i64>,
}

impl RemoteItem {
    pub fn new(item_id: impl Into<String>, media_type: MediaType, payload: serde_json::Value) -> Self {
        Self {
            item_id: Some(item_id.into()),
            media_type,
            external_ids: BTreeMap::new(),
            payload,
            updated_at: None,
        }
    }

    pub fn with_external_id(mut self, source: impl Into<String>, id: impl Into<String>) -> Self {
        self.external_ids.insert(source.into(), id.into());
        self
    }
}

/// A playlist or collection as it exists on one client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteList {
    pub list_id: String,
    pub title: String,
    pub description: Option<String>,
    /// Client-local item ids, in client order
    pub item_ids: Vec<String>,
    /// Unix seconds of the last change reported by the client
    pub last_modified: i64,
}

/// Fields for creating or rewriting a list on a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListDraft {
    pub media_type: MediaType,
    pub title: String,
    pub description: Option<String>,
    pub item_ids: Vec<String>,
}

/// Reference to a list created on a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListHandle {
    pub list_id: String,
}

/// Per-user interaction state for one item on one client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteUserData {
    pub item_id: String,
    pub is_favorite: bool,
    pub play_count: u32,
    pub last_played_at: Option<i64>,
    pub completed: bool,
    pub played_percentage: Option<f64>,
}

impl RemoteUserData {
    pub fn favorite(item_id: impl Into<String>) -> Self {
        Self {
            item_id: item_id.into(),
            is_favorite: true,
            play_count: 0,
            last_played_at: None,
            completed: false,
            played_percentage: None,
        }
    }

    pub fn played(item_id: impl Into<String>, play_count: u32, last_played_at: i64) -> Self {
        Self {
            item_id: item_id.into(),
            is_favorite: false,
            play_count,
            last_played_at: Some(last_played_at),
            completed: false,
            played_percentage: None,
        }
    }
}

// ============================================================================
// Capabilities
// ============================================================================

/// Read access to a client's catalog.
#[async_trait]
pub trait CatalogProvider: Send + Sync {
    /// Fetch one page of items of `query.media_type`.
    ///
    /// A page shorter than `query.limit` marks the end of the catalog.
    async fn list_items(&self, query: &ItemQuery) -> Result<Vec<RemoteItem>>;
}

/// Playlist and collection management on a client.
#[async_trait]
pub trait ListProvider: Send + Sync {
    /// All lists of the given kind visible to the connected user.
    async fn list_lists(&self, media_type: MediaType) -> Result<Vec<RemoteList>>;

    async fn create_list(&self, draft: &ListDraft) -> Result<ListHandle>;

    /// Rewrite title, description and membership of an existing list.
    async fn update_list(&self, list_id: &str, draft: &ListDraft) -> Result<()>;

    /// Append a single client-local item to the end of a list.
    async fn add_item_to_playlist(&self, list_id: &str, item_id: &str) -> Result<()>;

    async fn get_list(&self, list_id: &str) -> Result<RemoteList>;
}

/// Per-user favorites and play state on a client.
#[async_trait]
pub trait UserDataProvider: Send + Sync {
    async fn favorites(&self, remote_user_id: &str) -> Result<Vec<RemoteUserData>>;

    async fn watch_history(&self, remote_user_id: &str) -> Result<Vec<RemoteUserData>>;
}

/// Capabilities of one connected client.
#[derive(Clone)]
pub struct ProviderHandle {
    client_id: ClientId,
    client_type: ClientType,
    catalog: Option<Arc<dyn CatalogProvider>>,
    lists: Option<Arc<dyn ListProvider>>,
    user_data: Option<Arc<dyn UserDataProvider>>,
}

impl ProviderHandle {
    pub fn new(client_id: ClientId, client_type: ClientType) -> Self {
        Self {
            client_id,
            client_type,
            catalog: None,
            lists: None,
            user_data: None,
        }
    }

    pub fn with_catalog(mut self, catalog: Arc<dyn CatalogProvider>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn with_lists(mut self, lists: Arc<dyn ListProvider>) -> Self {
        self.lists = Some(lists);
        self
    }

    pub fn with_user_data(mut self, user_data: Arc<dyn UserDataProvider>) -> Self {
        self.user_data = Some(user_data);
        self
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    pub fn client_type(&self) -> ClientType {
        self.client_type
    }

    pub fn catalog(&self) -> Result<&dyn CatalogProvider> {
        self.catalog
            .as_deref()
            .ok_or_else(|| self.missing("CatalogProvider"))
    }

    pub fn lists(&self) -> Result<&dyn ListProvider> {
        self.lists
            .as_deref()
            .ok_or_else(|| self.missing("ListProvider"))
    }

    pub fn user_data(&self) -> Result<&dyn UserDataProvider> {
        self.user_data
            .as_deref()
            .ok_or_else(|| self.missing("UserDataProvider"))
    }

    fn missing(&self, capability: &'static str) -> BridgeError {
        BridgeError::CapabilityMissing {
            client_id: self.client_id.to_string(),
            capability,
        }
    }
}

impl fmt::Debug for ProviderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderHandle")
            .field("client_id", &self.client_id)
            .field("client_type", &self.client_type)
            .field("catalog", &self.catalog.is_some())
            .field("lists", &self.lists.is_some())
            .field("user_data", &self.user_data.is_some())
            .finish()
    }
}

/// Connection details for a configured client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConnection {
    pub client_id: ClientId,
    pub client_type: ClientType,
    pub base_url: Option<String>,
}

/// Builds provider handles for configured clients.
///
/// Implemented by the host, which owns the vendor API clients and their
/// credentials.
#[async_trait]
pub trait ProviderFactory: Send + Sync {
    async fn connect(&self, connection: &ClientConnection) -> Result<ProviderHandle>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::mock;

    mock! {
        Catalog {}

        #[async_trait]
        impl CatalogProvider for Catalog {
            async fn list_items(&self, query: &ItemQuery) -> Result<Vec<RemoteItem>>;
        }
    }

    #[test]
    fn test_client_type_parse() {
        assert_eq!("Jellyfin".parse::<ClientType>().unwrap(), ClientType::Jellyfin);
        assert_eq!(ClientType::Radarr.as_str(), "radarr");

        let err = "kodi".parse::<ClientType>().unwrap_err();
        assert!(matches!(err, BridgeError::UnknownClientType(ref t) if t == "kodi"));
    }

    #[test]
    fn test_media_type_roundtrip_and_list_flag() {
        for ty in [
            MediaType::Movie,
            MediaType::Series,
            MediaType::Episode,
            MediaType::Track,
            MediaType::Album,
            MediaType::Artist,
            MediaType::Playlist,
            MediaType::Collection,
        ] {
            assert_eq!(ty.as_str().parse::<MediaType>().unwrap(), ty);
        }
        assert!(MediaType::Playlist.is_list());
        assert!(!MediaType::Album.is_list());
        assert!("podcast".parse::<MediaType>().is_err());
    }

    #[test]
    fn test_item_query_paging() {
        let query = ItemQuery::new(MediaType::Movie, 50);
        let next = query.next_page();
        assert_eq!(next.offset, 50);
        assert_eq!(next.next_page().offset, 100);
    }

    #[test]
    fn test_client_id_ordering_is_lexical() {
        let mut ids = vec![ClientId::from("plex-b"), ClientId::from("emby"), ClientId::from("plex-a")];
        ids.sort();
        assert_eq!(ids, vec![ClientId::from("emby"), ClientId::from("plex-a"), ClientId::from("plex-b")]);
    }

    #[test]
    fn test_handle_reports_missing_capability() {
        let handle = ProviderHandle::new(ClientId::from("radarr-1"), ClientType::Radarr);

        match handle.lists() {
            Err(BridgeError::CapabilityMissing { client_id, capability }) => {
                assert_eq!(client_id, "radarr-1");
                assert_eq!(capability, "ListProvider");
            }
            other => panic!("expected CapabilityMissing, got {:?}", other.err()),
        }
        assert!(!BridgeError::UnknownClientType("x".into()).is_transient());
        assert!(BridgeError::Network("reset".into()).is_transient());
    }

    #[tokio::test]
    async fn test_handle_dispatches_to_catalog() {
        let mut catalog = MockCatalog::new();
        catalog
            .expect_list_items()
            .withf(|q| q.media_type == MediaType::Movie && q.offset == 0)
            .times(1)
            .returning(|_| {
                Ok(vec![RemoteItem::new(
                    "m1",
                    MediaType::Movie,
                    serde_json::json!({"title": "Alien"}),
                )])
            });

        let handle = ProviderHandle::new(ClientId::from("plex"), ClientType::Plex)
            .with_catalog(Arc::new(catalog));

        let items = handle
            .catalog()
            .unwrap()
            .list_items(&ItemQuery::new(MediaType::Movie, 10))
            .await
            .unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].item_id.as_deref(), Some("m1"));
    }
}
