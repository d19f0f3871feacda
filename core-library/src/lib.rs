//! # Canonical Item Store
//!
//! Owns the SQLite database holding canonical media items, the users and
//! clients they are synced for, and the job run tables.
//!
//! ## Overview
//!
//! This crate manages:
//! - SQLite schema and migrations
//! - Typed media kinds and their payloads (`kinds`)
//! - The list payload shared by playlists and collections (`list`)
//! - Repositories for items, users, settings and per-user item state
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_library::{create_pool, DatabaseConfig, Movie, SqliteItemRepository};
//!
//! let pool = create_pool(DatabaseConfig::new("sync.db")).await?;
//! let movies = SqliteItemRepository::<Movie>::new(pool.clone());
//! let item = movies.get_by_client_item_id(&"plex".into(), "101").await?;
//! ```

pub mod db;
pub mod error;
pub mod kinds;
pub mod list;
pub mod models;
pub mod repositories;

pub use db::{create_pool, create_test_pool, schema_version, DatabaseConfig};
pub use error::{LibraryError, Result};
pub use kinds::{
    Album, AlbumData, Artist, ArtistData, Collection, Episode, EpisodeData, ListKind,
    MediaDetails, MediaKind, Movie, MovieData, Playlist, SeasonInfo, Series, SeriesData, Track,
    TrackData,
};
pub use list::{ChangeRecord, ChangeType, ListClientState, ListData, ListItem};
pub use models::{
    ClientConfig, ClientIds, ClientRef, ExternalIds, ListSyncSettings, MediaItem, MediaItemId,
    SyncDirection, User, UserId, UserMediaItemData,
};
pub use repositories::{
    ItemIndex, ItemRepository, SqliteItemIndex, SqliteItemRepository, SqliteUserMediaDataRepository,
    SqliteUserRepository, UserMediaDataRepository, UserRepository,
};
