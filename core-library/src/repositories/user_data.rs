//! Per-user item state (favorites, play history)

use crate::error::{LibraryError, Result};
use crate::models::{MediaItemId, UserId, UserMediaItemData};
use async_trait::async_trait;
use sqlx::{query, query_as, FromRow, SqlitePool};

#[async_trait]
pub trait UserMediaDataRepository: Send + Sync {
    async fn find(&self, user_id: &UserId, item_id: &MediaItemId) -> Result<Option<UserMediaItemData>>;

    async fn create(&self, data: &UserMediaItemData) -> Result<()>;

    /// # Errors
    /// Returns [`LibraryError::NotFound`] if no row exists for the pair.
    async fn update(&self, data: &UserMediaItemData) -> Result<()>;

    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<UserMediaItemData>>;
}

#[derive(FromRow)]
struct UserDataRow {
    user_id: String,
    media_item_id: String,
    is_favorite: bool,
    play_count: i64,
    last_played_at: Option<i64>,
    completed: bool,
    played_percentage: Option<f64>,
    updated_at: i64,
}

impl TryFrom<UserDataRow> for UserMediaItemData {
    type Error = LibraryError;

    fn try_from(row: UserDataRow) -> Result<Self> {
        let media_item_id = MediaItemId::from_string(&row.media_item_id)
            .map_err(|e| LibraryError::CorruptData(format!("user data item id: {}", e)))?;
        Ok(UserMediaItemData {
            user_id: UserId::new(row.user_id),
            media_item_id,
            is_favorite: row.is_favorite,
            play_count: u32::try_from(row.play_count).unwrap_or(0),
            last_played_at: row.last_played_at,
            completed: row.completed,
            played_percentage: row.played_percentage,
            updated_at: row.updated_at,
        })
    }
}

const SELECT_USER_DATA: &str = r#"
    SELECT user_id, media_item_id, is_favorite, play_count, last_played_at,
           completed, played_percentage, updated_at
    FROM user_media_item_data
"#;

/// SQLite implementation of [`UserMediaDataRepository`]
#[derive(Clone)]
pub struct SqliteUserMediaDataRepository {
    pool: SqlitePool,
}

impl SqliteUserMediaDataRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserMediaDataRepository for SqliteUserMediaDataRepository {
    async fn find(&self, user_id: &UserId, item_id: &MediaItemId) -> Result<Option<UserMediaItemData>> {
        let sql = format!("{} WHERE user_id = ? AND media_item_id = ?", SELECT_USER_DATA);
        let row = query_as::<_, UserDataRow>(&sql)
            .bind(user_id.as_str())
            .bind(item_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(UserMediaItemData::try_from).transpose()
    }

    async fn create(&self, data: &UserMediaItemData) -> Result<()> {
        query(
            r#"
            INSERT INTO user_media_item_data (
                user_id, media_item_id, is_favorite, play_count, last_played_at,
                completed, played_percentage, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(data.user_id.as_str())
        .bind(data.media_item_id.to_string())
        .bind(data.is_favorite)
        .bind(i64::from(data.play_count))
        .bind(data.last_played_at)
        .bind(data.completed)
        .bind(data.played_percentage)
        .bind(data.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update(&self, data: &UserMediaItemData) -> Result<()> {
        let result = query(
            r#"
            UPDATE user_media_item_data
            SET is_favorite = ?, play_count = ?, last_played_at = ?,
                completed = ?, played_percentage = ?, updated_at = ?
            WHERE user_id = ? AND media_item_id = ?
            "#,
        )
        .bind(data.is_favorite)
        .bind(i64::from(data.play_count))
        .bind(data.last_played_at)
        .bind(data.completed)
        .bind(data.played_percentage)
        .bind(data.updated_at)
        .bind(data.user_id.as_str())
        .bind(data.media_item_id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(LibraryError::NotFound {
                entity_type: "UserMediaItemData".to_string(),
                id: format!("{}/{}", data.user_id, data.media_item_id),
            });
        }

        Ok(())
    }

    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<UserMediaItemData>> {
        let sql = format!("{} WHERE user_id = ? ORDER BY media_item_id", SELECT_USER_DATA);
        let rows = query_as::<_, UserDataRow>(&sql)
            .bind(user_id.as_str())
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(UserMediaItemData::try_from).collect()
    }
}
