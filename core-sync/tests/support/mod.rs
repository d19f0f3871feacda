//! Shared fixtures: an in-memory fake client and a wired-up sync context.

#![allow(dead_code)]

use async_trait::async_trait;
use bridge_traits::error::{BridgeError, Result as BridgeResult};
use bridge_traits::{
    CatalogProvider, ClientConnection, ClientId, ClientType, ItemQuery, ListDraft, ListHandle,
    ListProvider, ManualClock, MediaType, ProviderFactory, ProviderHandle, RemoteItem, RemoteList,
    RemoteUserData, UserDataProvider,
};
use core_jobs::{JobContext, JobRunId, NoopProgress, TriggerKind};
use core_library::{
    create_test_pool, ClientConfig, ItemRepository, ListSyncSettings, MediaItem, MediaItemId,
    SqliteItemRepository, SqliteUserRepository, SyncDirection, Track, TrackData, User, UserId,
    UserRepository,
};
use core_runtime::events::EventBus;
use core_sync::SyncContext;
use sqlx::SqlitePool;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

pub const START: i64 = 1_700_000_000;

// ============================================================================
// Fake Client
// ============================================================================

#[derive(Default)]
pub struct FakeState {
    pub items: Vec<RemoteItem>,
    pub lists: Vec<(MediaType, RemoteList)>,
    pub favorites: Vec<RemoteUserData>,
    pub history: Vec<RemoteUserData>,
    pub fail_catalog: bool,
    pub fail_create: bool,
    pub failing_adds: HashSet<String>,
    pub created: Vec<String>,
    pub added: Vec<(String, String)>,
    pub updated: Vec<String>,
    pub catalog_calls: Vec<u32>,
    next_list: u32,
}

/// Stateful stand-in for one media server.
pub struct FakeClient {
    pub id: ClientId,
    pub state: Mutex<FakeState>,
}

impl FakeClient {
    pub fn new(id: &str) -> Self {
        Self {
            id: ClientId::from(id),
            state: Mutex::new(FakeState::default()),
        }
    }

    pub fn add_list(&self, media_type: MediaType, id: &str, title: &str, items: &[&str], modified: i64) {
        self.state.lock().unwrap().lists.push((
            media_type,
            RemoteList {
                list_id: id.to_string(),
                title: title.to_string(),
                description: None,
                item_ids: items.iter().map(|s| s.to_string()).collect(),
                last_modified: modified,
            },
        ));
    }

    pub fn list(&self, id: &str) -> Option<RemoteList> {
        self.state
            .lock()
            .unwrap()
            .lists
            .iter()
            .find(|(_, list)| list.list_id == id)
            .map(|(_, list)| list.clone())
    }

    pub fn lists_titled(&self, title: &str) -> Vec<RemoteList> {
        self.state
            .lock()
            .unwrap()
            .lists
            .iter()
            .filter(|(_, list)| list.title == title)
            .map(|(_, list)| list.clone())
            .collect()
    }

    pub fn added(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().added.clone()
    }

    pub fn with_state(&self, f: impl FnOnce(&mut FakeState)) {
        f(&mut self.state.lock().unwrap());
    }
}

#[async_trait]
impl CatalogProvider for FakeClient {
    async fn list_items(&self, query: &ItemQuery) -> BridgeResult<Vec<RemoteItem>> {
        let mut state = self.state.lock().unwrap();
        state.catalog_calls.push(query.offset);
        if state.fail_catalog {
            return Err(BridgeError::Network(format!("{} unreachable", self.id)));
        }
        Ok(state
            .items
            .iter()
            .filter(|item| item.media_type == query.media_type)
            .skip(query.offset as usize)
            .take(query.limit as usize)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ListProvider for FakeClient {
    async fn list_lists(&self, media_type: MediaType) -> BridgeResult<Vec<RemoteList>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .lists
            .iter()
            .filter(|(ty, _)| *ty == media_type)
            .map(|(_, list)| list.clone())
            .collect())
    }

    async fn create_list(&self, draft: &ListDraft) -> BridgeResult<ListHandle> {
        let mut state = self.state.lock().unwrap();
        if state.fail_create {
            return Err(BridgeError::OperationFailed("list quota exceeded".to_string()));
        }
        state.next_list += 1;
        let list_id = format!("{}-list-{}", self.id, state.next_list);
        state.created.push(list_id.clone());
        state.lists.push((
            draft.media_type,
            RemoteList {
                list_id: list_id.clone(),
                title: draft.title.clone(),
                description: draft.description.clone(),
                item_ids: draft.item_ids.clone(),
                last_modified: START,
            },
        ));
        Ok(ListHandle { list_id })
    }

    async fn update_list(&self, list_id: &str, draft: &ListDraft) -> BridgeResult<()> {
        let mut state = self.state.lock().unwrap();
        state.updated.push(list_id.to_string());
        let (_, list) = state
            .lists
            .iter_mut()
            .find(|(_, list)| list.list_id == list_id)
            .ok_or_else(|| BridgeError::NotFound(list_id.to_string()))?;
        list.title = draft.title.clone();
        list.description = draft.description.clone();
        list.item_ids = draft.item_ids.clone();
        Ok(())
    }

    async fn add_item_to_playlist(&self, list_id: &str, item_id: &str) -> BridgeResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.failing_adds.contains(item_id) {
            return Err(BridgeError::Network("connection reset".to_string()));
        }
        let (_, list) = state
            .lists
            .iter_mut()
            .find(|(_, list)| list.list_id == list_id)
            .ok_or_else(|| BridgeError::NotFound(list_id.to_string()))?;
        list.item_ids.push(item_id.to_string());
        state.added.push((list_id.to_string(), item_id.to_string()));
        Ok(())
    }

    async fn get_list(&self, list_id: &str) -> BridgeResult<RemoteList> {
        self.list(list_id)
            .ok_or_else(|| BridgeError::NotFound(list_id.to_string()))
    }
}

#[async_trait]
impl UserDataProvider for FakeClient {
    async fn favorites(&self, _remote_user_id: &str) -> BridgeResult<Vec<RemoteUserData>> {
        Ok(self.state.lock().unwrap().favorites.clone())
    }

    async fn watch_history(&self, _remote_user_id: &str) -> BridgeResult<Vec<RemoteUserData>> {
        Ok(self.state.lock().unwrap().history.clone())
    }
}

// ============================================================================
// Factory
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub struct Caps {
    pub catalog: bool,
    pub lists: bool,
    pub user_data: bool,
}

impl Caps {
    pub const ALL: Caps = Caps {
        catalog: true,
        lists: true,
        user_data: true,
    };
    pub const CATALOG_ONLY: Caps = Caps {
        catalog: true,
        lists: false,
        user_data: false,
    };
}

#[derive(Default)]
pub struct FakeFactory {
    clients: Mutex<HashMap<ClientId, (Arc<FakeClient>, Caps)>>,
}

impl FakeFactory {
    pub fn insert(&self, client: Arc<FakeClient>, caps: Caps) {
        self.clients
            .lock()
            .unwrap()
            .insert(client.id.clone(), (client, caps));
    }

    pub fn handle(&self, client_id: &str, client_type: ClientType) -> ProviderHandle {
        let clients = self.clients.lock().unwrap();
        let (client, caps) = clients.get(&ClientId::from(client_id)).unwrap();
        build_handle(client, *caps, client_type)
    }
}

fn build_handle(client: &Arc<FakeClient>, caps: Caps, client_type: ClientType) -> ProviderHandle {
    let mut handle = ProviderHandle::new(client.id.clone(), client_type);
    if caps.catalog {
        handle = handle.with_catalog(client.clone());
    }
    if caps.lists {
        handle = handle.with_lists(client.clone());
    }
    if caps.user_data {
        handle = handle.with_user_data(client.clone());
    }
    handle
}

#[async_trait]
impl ProviderFactory for FakeFactory {
    async fn connect(&self, connection: &ClientConnection) -> BridgeResult<ProviderHandle> {
        let clients = self.clients.lock().unwrap();
        let (client, caps) = clients
            .get(&connection.client_id)
            .ok_or_else(|| BridgeError::NotAvailable(format!("{} is offline", connection.client_id)))?;
        Ok(build_handle(client, *caps, connection.client_type))
    }
}

// ============================================================================
// Environment
// ============================================================================

pub struct TestEnv {
    pub pool: SqlitePool,
    pub clock: Arc<ManualClock>,
    pub event_bus: EventBus,
    pub factory: Arc<FakeFactory>,
    pub ctx: SyncContext,
}

impl TestEnv {
    pub async fn new() -> Self {
        let pool = create_test_pool().await.unwrap();
        let clock = Arc::new(ManualClock::at_timestamp(START));
        let event_bus = EventBus::new(64);
        let factory = Arc::new(FakeFactory::default());
        let ctx = SyncContext::new(pool.clone(), factory.clone(), clock.clone(), event_bus.clone());
        Self {
            pool,
            clock,
            event_bus,
            factory,
            ctx,
        }
    }

    pub fn users(&self) -> SqliteUserRepository {
        SqliteUserRepository::new(self.pool.clone())
    }

    pub async fn add_user(&self, id: &str) -> UserId {
        let user = User::new(id, id.to_uppercase(), START);
        self.users().create_user(&user).await.unwrap();
        user.id
    }

    /// Configure `client_id` for `user` and register its fake.
    pub async fn add_client(
        &self,
        user: &UserId,
        client_id: &str,
        client_type: ClientType,
        caps: Caps,
    ) -> Arc<FakeClient> {
        let config = ClientConfig::new(user.clone(), client_id, client_type)
            .with_remote_user(format!("{}@{}", user, client_id));
        self.users().upsert_client(&config).await.unwrap();

        let client = Arc::new(FakeClient::new(client_id));
        self.factory.insert(client.clone(), caps);
        client
    }

    pub async fn list_settings(
        &self,
        user: &UserId,
        media_type: MediaType,
        direction: SyncDirection,
        primary: Option<&str>,
    ) {
        let settings = ListSyncSettings {
            user_id: user.clone(),
            media_type,
            direction,
            primary_client_id: primary.map(ClientId::from),
            enabled: true,
        };
        self.users().upsert_list_sync_settings(&settings).await.unwrap();
    }

    /// Canonical track mapped to the given `(client, item id)` pairs.
    pub async fn seed_track(&self, title: &str, mappings: &[(&str, &str)]) -> MediaItemId {
        let data = TrackData {
            title: title.to_string(),
            artist: None,
            album: None,
            duration_ms: None,
            track_number: None,
            disc_number: None,
            year: None,
            genres: Vec::new(),
        };
        let mut item = MediaItem::<Track>::new(data, START);
        for (client, item_id) in mappings {
            item.merge_client(&ClientId::from(*client), ClientType::Jellyfin, item_id);
        }
        SqliteItemRepository::<Track>::new(self.pool.clone())
            .create(&item)
            .await
            .unwrap();
        item.id
    }
}

pub fn job_context(name: &str) -> JobContext {
    JobContext {
        run_id: JobRunId::new(),
        job_name: name.to_string(),
        trigger: TriggerKind::Manual,
        progress: Arc::new(NoopProgress),
        cancellation: CancellationToken::new(),
    }
}
