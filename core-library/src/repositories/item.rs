//! Canonical item repository
//!
//! One trait, implemented once, parameterized by media kind. Client and
//! external id maps live in side tables so that the `(client_id, item_id)`
//! uniqueness rule is enforced by the database.

use crate::error::{LibraryError, Result};
use crate::kinds::MediaKind;
use crate::models::{ClientIds, ClientRef, ExternalIds, MediaItem, MediaItemId, UserId};
use async_trait::async_trait;
use bridge_traits::{ClientId, MediaType};
use chrono::NaiveDate;
use sqlx::{query, query_as, FromRow, Sqlite, SqlitePool, Transaction};
use std::marker::PhantomData;
use tracing::debug;

/// Item store interface for one media kind
#[async_trait]
pub trait ItemRepository<K: MediaKind>: Send + Sync {
    /// Find an item of this kind by its canonical id
    async fn find_by_id(&self, id: &MediaItemId) -> Result<Option<MediaItem<K>>>;

    /// Find the item owning `(client_id, item_id)`
    async fn get_by_client_item_id(
        &self,
        client_id: &ClientId,
        item_id: &str,
    ) -> Result<Option<MediaItem<K>>>;

    /// Find an item of this kind sharing any `(source, id)` pair with
    /// `external_ids`. Sources are tried in key order; the oldest item wins
    /// when several match.
    async fn find_by_external_ids(&self, external_ids: &ExternalIds) -> Result<Option<MediaItem<K>>>;

    /// Insert a new item with its client and external ids
    ///
    /// # Errors
    /// Returns [`LibraryError::DuplicateClientItem`] if one of the item's
    /// client ids already belongs to another item.
    async fn create(&self, item: &MediaItem<K>) -> Result<()>;

    /// Persist an existing item, replacing its client and external ids
    async fn update(&self, item: &MediaItem<K>) -> Result<()>;

    /// Items of this kind owned by a user (playlists, collections)
    async fn get_by_user_id(&self, user_id: &UserId) -> Result<Vec<MediaItem<K>>>;

    async fn count(&self) -> Result<i64>;
}

/// Kind-agnostic lookups used when resolving list members and user data.
#[async_trait]
pub trait ItemIndex: Send + Sync {
    async fn find_id_by_client_item(
        &self,
        client_id: &ClientId,
        item_id: &str,
    ) -> Result<Option<MediaItemId>>;

    async fn find_client_ids(&self, id: &MediaItemId) -> Result<ClientIds>;
}

#[derive(FromRow)]
struct MediaItemRow {
    id: String,
    media_type: String,
    release_date: Option<String>,
    owner_user_id: Option<String>,
    data: String,
    created_at: i64,
    updated_at: i64,
}

#[derive(FromRow)]
struct ClientRow {
    client_id: String,
    client_type: String,
    item_id: String,
}

#[derive(FromRow)]
struct ExternalIdRow {
    source: String,
    external_id: String,
}

fn corrupt(id: &str, what: impl std::fmt::Display) -> LibraryError {
    LibraryError::CorruptData(format!("media item {}: {}", id, what))
}

fn map_write_error(err: sqlx::Error, client_ids: &ClientIds) -> LibraryError {
    let unique = err
        .as_database_error()
        .map(|db| db.is_unique_violation())
        .unwrap_or(false);
    if !unique {
        return LibraryError::Database(err);
    }
    let (client_id, item_id) = client_ids
        .iter()
        .next()
        .map(|(client, entry)| (client.to_string(), entry.item_id.clone()))
        .unwrap_or_default();
    LibraryError::DuplicateClientItem { client_id, item_id }
}

/// SQLite implementation of [`ItemRepository`] for any kind `K`
pub struct SqliteItemRepository<K> {
    pool: SqlitePool,
    kind: PhantomData<fn() -> K>,
}

impl<K> Clone for SqliteItemRepository<K> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            kind: PhantomData,
        }
    }
}

impl<K: MediaKind> SqliteItemRepository<K> {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            kind: PhantomData,
        }
    }

    async fn hydrate(&self, row: MediaItemRow) -> Result<MediaItem<K>> {
        if row.media_type != K::TYPE.as_str() {
            return Err(corrupt(&row.id, format!("stored as {}", row.media_type)));
        }
        let id = MediaItemId::from_string(&row.id).map_err(|e| corrupt(&row.id, e))?;
        let data: K::Data = serde_json::from_str(&row.data).map_err(|e| corrupt(&row.id, e))?;
        if let Some(date) = &row.release_date {
            // Denormalized column is recomputed from the payload; only check it parses.
            NaiveDate::parse_from_str(date, "%Y-%m-%d").map_err(|e| corrupt(&row.id, e))?;
        }

        let client_ids = load_client_ids(&self.pool, &row.id).await?;
        let external_ids = load_external_ids(&self.pool, &row.id).await?;

        Ok(MediaItem::from_parts(
            id,
            data,
            client_ids,
            external_ids,
            row.owner_user_id.map(UserId::new),
            row.created_at,
            row.updated_at,
        ))
    }

    async fn write_identity(
        tx: &mut Transaction<'_, Sqlite>,
        item: &MediaItem<K>,
    ) -> Result<()> {
        let id = item.id.to_string();
        for (client_id, entry) in &item.client_ids {
            query(
                r#"
                INSERT INTO media_item_clients (media_item_id, client_id, client_type, item_id)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(&id)
            .bind(client_id.as_str())
            .bind(entry.client_type.as_str())
            .bind(&entry.item_id)
            .execute(&mut **tx)
            .await
            .map_err(|e| {
                let mut single = ClientIds::new();
                single.insert(client_id.clone(), entry.clone());
                map_write_error(e, &single)
            })?;
        }

        for (source, external_id) in &item.external_ids {
            query(
                "INSERT INTO media_item_external_ids (media_item_id, source, external_id) VALUES (?, ?, ?)",
            )
            .bind(&id)
            .bind(source)
            .bind(external_id)
            .execute(&mut **tx)
            .await?;
        }

        Ok(())
    }

    fn encode(item: &MediaItem<K>) -> Result<String> {
        serde_json::to_string(&item.data).map_err(|e| LibraryError::InvalidInput {
            field: "data".to_string(),
            message: e.to_string(),
        })
    }

    fn validate(item: &MediaItem<K>) -> Result<()> {
        if item.title.trim().is_empty() {
            return Err(LibraryError::InvalidInput {
                field: "title".to_string(),
                message: format!("{} title cannot be empty", K::TYPE),
            });
        }
        Ok(())
    }
}

async fn load_client_ids(pool: &SqlitePool, id: &str) -> Result<ClientIds> {
    let rows = query_as::<_, ClientRow>(
        "SELECT client_id, client_type, item_id FROM media_item_clients WHERE media_item_id = ?",
    )
    .bind(id)
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|row| {
            let client_type = row.client_type.parse().map_err(|e| corrupt(id, e))?;
            Ok((
                ClientId::new(row.client_id),
                ClientRef {
                    client_type,
                    item_id: row.item_id,
                },
            ))
        })
        .collect()
}

async fn load_external_ids(pool: &SqlitePool, id: &str) -> Result<ExternalIds> {
    let rows = query_as::<_, ExternalIdRow>(
        "SELECT source, external_id FROM media_item_external_ids WHERE media_item_id = ?",
    )
    .bind(id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| (row.source, row.external_id))
        .collect())
}

const SELECT_ITEM: &str = r#"
    SELECT m.id, m.media_type, m.release_date, m.owner_user_id, m.data, m.created_at, m.updated_at
    FROM media_items m
"#;

#[async_trait]
impl<K: MediaKind> ItemRepository<K> for SqliteItemRepository<K> {
    async fn find_by_id(&self, id: &MediaItemId) -> Result<Option<MediaItem<K>>> {
        let sql = format!("{} WHERE m.id = ? AND m.media_type = ?", SELECT_ITEM);
        let row = query_as::<_, MediaItemRow>(&sql)
            .bind(id.to_string())
            .bind(K::TYPE.as_str())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(self.hydrate(row).await?)),
            None => Ok(None),
        }
    }

    async fn get_by_client_item_id(
        &self,
        client_id: &ClientId,
        item_id: &str,
    ) -> Result<Option<MediaItem<K>>> {
        let sql = format!(
            "{} JOIN media_item_clients c ON c.media_item_id = m.id \
             WHERE c.client_id = ? AND c.item_id = ? AND m.media_type = ?",
            SELECT_ITEM
        );
        let row = query_as::<_, MediaItemRow>(&sql)
            .bind(client_id.as_str())
            .bind(item_id)
            .bind(K::TYPE.as_str())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(self.hydrate(row).await?)),
            None => Ok(None),
        }
    }

    async fn find_by_external_ids(&self, external_ids: &ExternalIds) -> Result<Option<MediaItem<K>>> {
        let sql = format!(
            "{} JOIN media_item_external_ids e ON e.media_item_id = m.id \
             WHERE e.source = ? AND e.external_id = ? AND m.media_type = ? \
             ORDER BY m.created_at, m.id LIMIT 1",
            SELECT_ITEM
        );

        for (source, external_id) in external_ids {
            let row = query_as::<_, MediaItemRow>(&sql)
                .bind(source)
                .bind(external_id)
                .bind(K::TYPE.as_str())
                .fetch_optional(&self.pool)
                .await?;
            if let Some(row) = row {
                return Ok(Some(self.hydrate(row).await?));
            }
        }
        Ok(None)
    }

    async fn create(&self, item: &MediaItem<K>) -> Result<()> {
        Self::validate(item)?;
        let data = Self::encode(item)?;

        let mut tx = self.pool.begin().await?;
        query(
            r#"
            INSERT INTO media_items (
                id, media_type, title, release_date, release_year, owner_user_id,
                data, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(item.id.to_string())
        .bind(K::TYPE.as_str())
        .bind(&item.title)
        .bind(item.release_date.map(|d| d.to_string()))
        .bind(item.release_year)
        .bind(item.owner_id.as_ref().map(UserId::as_str))
        .bind(&data)
        .bind(item.created_at)
        .bind(item.updated_at)
        .execute(&mut *tx)
        .await?;

        Self::write_identity(&mut tx, item).await?;
        tx.commit().await?;

        debug!(id = %item.id, media_type = %K::TYPE, "Created media item");
        Ok(())
    }

    async fn update(&self, item: &MediaItem<K>) -> Result<()> {
        Self::validate(item)?;
        let data = Self::encode(item)?;
        let id = item.id.to_string();

        let mut tx = self.pool.begin().await?;
        let result = query(
            r#"
            UPDATE media_items
            SET title = ?, release_date = ?, release_year = ?, owner_user_id = ?,
                data = ?, updated_at = ?
            WHERE id = ? AND media_type = ?
            "#,
        )
        .bind(&item.title)
        .bind(item.release_date.map(|d| d.to_string()))
        .bind(item.release_year)
        .bind(item.owner_id.as_ref().map(UserId::as_str))
        .bind(&data)
        .bind(item.updated_at)
        .bind(&id)
        .bind(K::TYPE.as_str())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(LibraryError::NotFound {
                entity_type: K::TYPE.to_string(),
                id,
            });
        }

        query("DELETE FROM media_item_clients WHERE media_item_id = ?")
            .bind(&id)
            .execute(&mut *tx)
            .await?;
        query("DELETE FROM media_item_external_ids WHERE media_item_id = ?")
            .bind(&id)
            .execute(&mut *tx)
            .await?;

        Self::write_identity(&mut tx, item).await?;
        tx.commit().await?;

        Ok(())
    }

    async fn get_by_user_id(&self, user_id: &UserId) -> Result<Vec<MediaItem<K>>> {
        let sql = format!(
            "{} WHERE m.owner_user_id = ? AND m.media_type = ? ORDER BY m.created_at, m.id",
            SELECT_ITEM
        );
        let rows = query_as::<_, MediaItemRow>(&sql)
            .bind(user_id.as_str())
            .bind(K::TYPE.as_str())
            .fetch_all(&self.pool)
            .await?;

        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            items.push(self.hydrate(row).await?);
        }
        Ok(items)
    }

    async fn count(&self) -> Result<i64> {
        let count: (i64,) = query_as("SELECT COUNT(*) FROM media_items WHERE media_type = ?")
            .bind(K::TYPE.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }
}

/// SQLite implementation of [`ItemIndex`]
#[derive(Clone)]
pub struct SqliteItemIndex {
    pool: SqlitePool,
}

impl SqliteItemIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Media type of a canonical item, if it exists.
    pub async fn media_type_of(&self, id: &MediaItemId) -> Result<Option<MediaType>> {
        let row: Option<(String,)> = query_as("SELECT media_type FROM media_items WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|(ty,)| ty.parse().map_err(|e| corrupt(&id.to_string(), e)))
            .transpose()
    }
}

#[async_trait]
impl ItemIndex for SqliteItemIndex {
    async fn find_id_by_client_item(
        &self,
        client_id: &ClientId,
        item_id: &str,
    ) -> Result<Option<MediaItemId>> {
        let row: Option<(String,)> = query_as(
            "SELECT media_item_id FROM media_item_clients WHERE client_id = ? AND item_id = ?",
        )
        .bind(client_id.as_str())
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|(id,)| MediaItemId::from_string(&id).map_err(|e| corrupt(&id, e)))
            .transpose()
    }

    async fn find_client_ids(&self, id: &MediaItemId) -> Result<ClientIds> {
        load_client_ids(&self.pool, &id.to_string()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;
    use crate::kinds::{Movie, MovieData, Playlist, Track, TrackData};
    use crate::list::ListData;
    use bridge_traits::ClientType;

    fn movie(title: &str) -> MediaItem<Movie> {
        MediaItem::new(
            MovieData {
                title: title.to_string(),
                original_title: None,
                release_date: NaiveDate::from_ymd_opt(1979, 5, 25),
                genres: vec!["Horror".into()],
                cast: vec![],
                runtime_minutes: Some(117),
                overview: None,
            },
            1_000,
        )
    }

    #[tokio::test]
    async fn test_create_and_find_by_client_item() {
        let pool = create_test_pool().await.unwrap();
        let repo = SqliteItemRepository::<Movie>::new(pool);
        let plex = ClientId::from("plex");

        let mut item = movie("Alien");
        item.merge_client(&plex, ClientType::Plex, "101");
        item.external_ids.insert("imdb".into(), "tt0078748".into());
        repo.create(&item).await.unwrap();

        let found = repo.get_by_client_item_id(&plex, "101").await.unwrap().unwrap();
        assert_eq!(found, item);
        assert_eq!(found.release_year, Some(1979));
        assert!(repo.get_by_client_item_id(&plex, "999").await.unwrap().is_none());
        assert_eq!(repo.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_lookup_is_scoped_to_kind() {
        let pool = create_test_pool().await.unwrap();
        let movies = SqliteItemRepository::<Movie>::new(pool.clone());
        let tracks = SqliteItemRepository::<Track>::new(pool);
        let plex = ClientId::from("plex");

        let mut item = movie("Alien");
        item.merge_client(&plex, ClientType::Plex, "101");
        movies.create(&item).await.unwrap();

        assert!(tracks.get_by_client_item_id(&plex, "101").await.unwrap().is_none());
        assert!(tracks.find_by_id(&item.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_find_by_external_ids_matches_any_source_within_kind() {
        let pool = create_test_pool().await.unwrap();
        let movies = SqliteItemRepository::<Movie>::new(pool.clone());
        let tracks = SqliteItemRepository::<Track>::new(pool);

        let mut item = movie("Alien");
        item.merge_client(&ClientId::from("plex"), ClientType::Plex, "101");
        item.external_ids.insert("imdb".into(), "tt0078748".into());
        item.external_ids.insert("tmdb".into(), "348".into());
        movies.create(&item).await.unwrap();

        let mut lookup = ExternalIds::new();
        lookup.insert("tvdb".into(), "nope".into());
        lookup.insert("tmdb".into(), "348".into());
        let found = movies.find_by_external_ids(&lookup).await.unwrap().unwrap();
        assert_eq!(found.id, item.id);

        assert!(tracks.find_by_external_ids(&lookup).await.unwrap().is_none());

        let mut other = ExternalIds::new();
        other.insert("imdb".into(), "tt0090605".into());
        assert!(movies.find_by_external_ids(&other).await.unwrap().is_none());
        assert!(movies.find_by_external_ids(&ExternalIds::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_client_item_is_rejected() {
        let pool = create_test_pool().await.unwrap();
        let repo = SqliteItemRepository::<Movie>::new(pool);
        let plex = ClientId::from("plex");

        let mut first = movie("Alien");
        first.merge_client(&plex, ClientType::Plex, "101");
        repo.create(&first).await.unwrap();

        let mut second = movie("Alien (copy)");
        second.merge_client(&plex, ClientType::Plex, "101");
        let err = repo.create(&second).await.unwrap_err();

        assert!(matches!(
            err,
            LibraryError::DuplicateClientItem { ref client_id, ref item_id }
                if client_id == "plex" && item_id == "101"
        ));
        assert_eq!(repo.count().await.unwrap(), 1, "failed create is rolled back");
    }

    #[tokio::test]
    async fn test_client_item_id_is_unique_across_kinds() {
        let pool = create_test_pool().await.unwrap();
        let movies = SqliteItemRepository::<Movie>::new(pool.clone());
        let tracks = SqliteItemRepository::<Track>::new(pool);
        let subsonic = ClientId::from("subsonic");

        let mut film = movie("Alien");
        film.merge_client(&subsonic, ClientType::Subsonic, "5");
        movies.create(&film).await.unwrap();

        let mut song = MediaItem::<Track>::new(
            TrackData {
                title: "Five".into(),
                artist: None,
                album: None,
                duration_ms: None,
                track_number: None,
                disc_number: None,
                year: None,
                genres: vec![],
            },
            1_000,
        );
        song.merge_client(&subsonic, ClientType::Subsonic, "5");
        let err = tracks.create(&song).await.unwrap_err();

        assert!(matches!(err, LibraryError::DuplicateClientItem { ref item_id, .. } if item_id == "5"));
        assert_eq!(tracks.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_update_replaces_identity_maps() {
        let pool = create_test_pool().await.unwrap();
        let repo = SqliteItemRepository::<Movie>::new(pool.clone());
        let index = SqliteItemIndex::new(pool);
        let plex = ClientId::from("plex");
        let emby = ClientId::from("emby");

        let mut item = movie("Alien");
        item.merge_client(&plex, ClientType::Plex, "101");
        repo.create(&item).await.unwrap();

        item.merge_client(&emby, ClientType::Emby, "e-7");
        item.merge_client(&plex, ClientType::Plex, "102");
        item.touch(2_000);
        repo.update(&item).await.unwrap();

        let stored = repo.find_by_id(&item.id).await.unwrap().unwrap();
        assert_eq!(stored.client_item_id(&plex), Some("102"));
        assert_eq!(stored.client_item_id(&emby), Some("e-7"));
        assert_eq!(stored.updated_at, 2_000);

        assert_eq!(
            index.find_id_by_client_item(&emby, "e-7").await.unwrap(),
            Some(item.id)
        );
        assert!(index.find_id_by_client_item(&plex, "101").await.unwrap().is_none());
        assert_eq!(index.find_client_ids(&item.id).await.unwrap().len(), 2);
        assert_eq!(index.media_type_of(&item.id).await.unwrap(), Some(MediaType::Movie));
    }

    #[tokio::test]
    async fn test_update_missing_item_is_not_found() {
        let pool = create_test_pool().await.unwrap();
        let repo = SqliteItemRepository::<Movie>::new(pool);

        let err = repo.update(&movie("Ghost")).await.unwrap_err();
        assert!(matches!(err, LibraryError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_get_by_user_id_returns_owned_lists() {
        let pool = create_test_pool().await.unwrap();
        let repo = SqliteItemRepository::<Playlist>::new(pool);
        let owner = UserId::from("u1");

        let mine = MediaItem::<Playlist>::new(ListData::new("Road Trip", None), 10)
            .with_owner(owner.clone());
        let theirs = MediaItem::<Playlist>::new(ListData::new("Gym", None), 11)
            .with_owner(UserId::from("u2"));
        repo.create(&mine).await.unwrap();
        repo.create(&theirs).await.unwrap();

        let lists = repo.get_by_user_id(&owner).await.unwrap();
        assert_eq!(lists.len(), 1);
        assert_eq!(lists[0].title, "Road Trip");
        assert_eq!(lists[0].owner_id, Some(owner));
    }

    #[tokio::test]
    async fn test_empty_title_is_invalid() {
        let pool = create_test_pool().await.unwrap();
        let repo = SqliteItemRepository::<Track>::new(pool);
        let item = MediaItem::<Track>::new(
            TrackData {
                title: "  ".into(),
                artist: None,
                album: None,
                duration_ms: None,
                track_number: None,
                disc_number: None,
                year: None,
                genres: vec![],
            },
            0,
        );

        assert!(matches!(
            repo.create(&item).await,
            Err(LibraryError::InvalidInput { .. })
        ));
    }
}
