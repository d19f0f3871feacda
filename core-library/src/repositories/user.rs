//! User, client and list sync settings repository

use crate::error::{LibraryError, Result};
use crate::models::{ClientConfig, ListSyncSettings, User, UserId};
use async_trait::async_trait;
use bridge_traits::{ClientId, MediaType};
use sqlx::{query, query_as, FromRow, SqlitePool};

/// Users and their configured clients
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn create_user(&self, user: &User) -> Result<()>;

    async fn find_user(&self, id: &UserId) -> Result<Option<User>>;

    async fn list_active_users(&self) -> Result<Vec<User>>;

    /// Insert or replace a client configuration for its user
    async fn upsert_client(&self, client: &ClientConfig) -> Result<()>;

    /// All clients configured for a user, enabled or not, ordered by client id
    async fn clients_for_user(&self, user_id: &UserId) -> Result<Vec<ClientConfig>>;

    /// Enabled clients of active users, one entry per distinct client id
    ///
    /// When several users share a client, the first configuration by user id
    /// is returned; catalog listing is not user-scoped.
    async fn list_enabled_clients(&self) -> Result<Vec<ClientConfig>>;

    async fn get_list_sync_settings(
        &self,
        user_id: &UserId,
        media_type: MediaType,
    ) -> Result<Option<ListSyncSettings>>;

    /// Insert or replace list sync settings
    ///
    /// # Errors
    /// Returns [`LibraryError::InvalidInput`] for a non-list media type or a
    /// directional strategy without a primary client.
    async fn upsert_list_sync_settings(&self, settings: &ListSyncSettings) -> Result<()>;

    /// Enabled settings of active users for one list kind
    async fn list_enabled_list_sync(&self, media_type: MediaType) -> Result<Vec<ListSyncSettings>>;
}

#[derive(FromRow)]
struct UserRow {
    id: String,
    name: String,
    active: bool,
    created_at: i64,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: UserId::new(row.id),
            name: row.name,
            active: row.active,
            created_at: row.created_at,
        }
    }
}

#[derive(FromRow)]
struct ClientRow {
    user_id: String,
    client_id: String,
    client_type: String,
    base_url: Option<String>,
    remote_user_id: Option<String>,
    enabled: bool,
}

impl From<ClientRow> for ClientConfig {
    fn from(row: ClientRow) -> Self {
        ClientConfig {
            user_id: UserId::new(row.user_id),
            client_id: ClientId::new(row.client_id),
            client_type: row.client_type,
            base_url: row.base_url,
            remote_user_id: row.remote_user_id,
            enabled: row.enabled,
        }
    }
}

#[derive(FromRow)]
struct SettingsRow {
    user_id: String,
    media_type: String,
    direction: String,
    primary_client_id: Option<String>,
    enabled: bool,
}

impl TryFrom<SettingsRow> for ListSyncSettings {
    type Error = LibraryError;

    fn try_from(row: SettingsRow) -> Result<Self> {
        let media_type = row.media_type.parse().map_err(|e| {
            LibraryError::CorruptData(format!("list sync settings for {}: {}", row.user_id, e))
        })?;
        Ok(ListSyncSettings {
            user_id: UserId::new(row.user_id),
            media_type,
            direction: row.direction.parse()?,
            primary_client_id: row.primary_client_id.map(ClientId::new),
            enabled: row.enabled,
        })
    }
}

/// SQLite implementation of [`UserRepository`]
#[derive(Clone)]
pub struct SqliteUserRepository {
    pool: SqlitePool,
}

impl SqliteUserRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for SqliteUserRepository {
    async fn create_user(&self, user: &User) -> Result<()> {
        if user.id.as_str().is_empty() {
            return Err(LibraryError::InvalidInput {
                field: "id".to_string(),
                message: "user id cannot be empty".to_string(),
            });
        }

        query("INSERT INTO users (id, name, active, created_at) VALUES (?, ?, ?, ?)")
            .bind(user.id.as_str())
            .bind(&user.name)
            .bind(user.active)
            .bind(user.created_at)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn find_user(&self, id: &UserId) -> Result<Option<User>> {
        let row = query_as::<_, UserRow>("SELECT id, name, active, created_at FROM users WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(User::from))
    }

    async fn list_active_users(&self) -> Result<Vec<User>> {
        let rows = query_as::<_, UserRow>(
            "SELECT id, name, active, created_at FROM users WHERE active = 1 ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(User::from).collect())
    }

    async fn upsert_client(&self, client: &ClientConfig) -> Result<()> {
        query(
            r#"
            INSERT INTO user_clients (user_id, client_id, client_type, base_url, remote_user_id, enabled)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_id, client_id) DO UPDATE SET
                client_type = excluded.client_type,
                base_url = excluded.base_url,
                remote_user_id = excluded.remote_user_id,
                enabled = excluded.enabled
            "#,
        )
        .bind(client.user_id.as_str())
        .bind(client.client_id.as_str())
        .bind(&client.client_type)
        .bind(&client.base_url)
        .bind(&client.remote_user_id)
        .bind(client.enabled)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn clients_for_user(&self, user_id: &UserId) -> Result<Vec<ClientConfig>> {
        let rows = query_as::<_, ClientRow>(
            r#"
            SELECT user_id, client_id, client_type, base_url, remote_user_id, enabled
            FROM user_clients
            WHERE user_id = ?
            ORDER BY client_id
            "#,
        )
        .bind(user_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ClientConfig::from).collect())
    }

    async fn list_enabled_clients(&self) -> Result<Vec<ClientConfig>> {
        let rows = query_as::<_, ClientRow>(
            r#"
            SELECT c.user_id, c.client_id, c.client_type, c.base_url, c.remote_user_id, c.enabled
            FROM user_clients c
            JOIN users u ON u.id = c.user_id
            WHERE c.enabled = 1 AND u.active = 1
            ORDER BY c.client_id, c.user_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut clients: Vec<ClientConfig> = Vec::with_capacity(rows.len());
        for row in rows {
            if clients.last().map(|c| c.client_id.as_str()) != Some(row.client_id.as_str()) {
                clients.push(row.into());
            }
        }
        Ok(clients)
    }

    async fn get_list_sync_settings(
        &self,
        user_id: &UserId,
        media_type: MediaType,
    ) -> Result<Option<ListSyncSettings>> {
        let row = query_as::<_, SettingsRow>(
            r#"
            SELECT user_id, media_type, direction, primary_client_id, enabled
            FROM list_sync_settings
            WHERE user_id = ? AND media_type = ?
            "#,
        )
        .bind(user_id.as_str())
        .bind(media_type.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(ListSyncSettings::try_from).transpose()
    }

    async fn upsert_list_sync_settings(&self, settings: &ListSyncSettings) -> Result<()> {
        if !settings.media_type.is_list() {
            return Err(LibraryError::InvalidInput {
                field: "media_type".to_string(),
                message: format!("{} is not a list kind", settings.media_type),
            });
        }
        if settings.direction.requires_primary() && settings.primary_client_id.is_none() {
            return Err(LibraryError::InvalidInput {
                field: "primary_client_id".to_string(),
                message: format!("{} requires a primary client", settings.direction.as_str()),
            });
        }

        query(
            r#"
            INSERT INTO list_sync_settings (user_id, media_type, direction, primary_client_id, enabled)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(user_id, media_type) DO UPDATE SET
                direction = excluded.direction,
                primary_client_id = excluded.primary_client_id,
                enabled = excluded.enabled
            "#,
        )
        .bind(settings.user_id.as_str())
        .bind(settings.media_type.as_str())
        .bind(settings.direction.as_str())
        .bind(settings.primary_client_id.as_ref().map(ClientId::as_str))
        .bind(settings.enabled)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_enabled_list_sync(&self, media_type: MediaType) -> Result<Vec<ListSyncSettings>> {
        let rows = query_as::<_, SettingsRow>(
            r#"
            SELECT s.user_id, s.media_type, s.direction, s.primary_client_id, s.enabled
            FROM list_sync_settings s
            JOIN users u ON u.id = s.user_id
            WHERE s.media_type = ? AND s.enabled = 1 AND u.active = 1
            ORDER BY s.user_id
            "#,
        )
        .bind(media_type.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ListSyncSettings::try_from).collect()
    }
}
