//! # Repository Pattern Implementation
//!
//! Repository traits and their SQLite implementations.
//!
//! ## Architecture
//!
//! - Traits define the interface for each store so jobs can be tested with mocks
//! - SQLite implementations use sqlx for async database access
//! - All operations return `Result<T>` for error handling
//!
//! ## Available Repositories
//!
//! - `ItemRepository<K>` - Canonical items of one media kind
//! - `ItemIndex` - Kind-agnostic client id lookups
//! - `UserRepository` - Users, their clients and list sync settings
//! - `UserMediaDataRepository` - Favorites and play state per user and item

pub mod item;
pub mod user;
pub mod user_data;

pub use item::{ItemIndex, ItemRepository, SqliteItemIndex, SqliteItemRepository};
pub use user::{SqliteUserRepository, UserRepository};
pub use user_data::{SqliteUserMediaDataRepository, UserMediaDataRepository};
