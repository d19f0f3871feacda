//! # Host Bridge Traits
//!
//! Abstractions the sync engine requires from its host and from external
//! media clients.
//!
//! ## Overview
//!
//! This crate defines the contract between the core crates and everything
//! they talk to over the network or borrow from the host process. The vendor
//! API clients (Plex, Emby, Jellyfin, Subsonic, Radarr, ...) live outside the
//! workspace and are plugged in through a [`ProviderFactory`].
//!
//! ## Traits
//!
//! ### Providers
//! - [`CatalogProvider`](provider::CatalogProvider) - Paged catalog listing
//! - [`ListProvider`](provider::ListProvider) - Playlist/collection management
//! - [`UserDataProvider`](provider::UserDataProvider) - Favorites and watch history
//! - [`ProviderFactory`](provider::ProviderFactory) - Connects configured clients
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//! - [`LoggerSink`](logging::LoggerSink) - Forward structured logs to host logging
//!
//! ## Capability Lookup
//!
//! A connected client is represented by a [`ProviderHandle`]. Capabilities are
//! looked up on the handle and fail with a descriptive error when missing:
//!
//! ```ignore
//! let lists = handle.lists()?; // BridgeError::CapabilityMissing for Radarr
//! let created = lists.create_list(&draft).await?;
//! ```
//!
//! ## Error Handling
//!
//! All traits use [`BridgeError`](error::BridgeError). Adapters should map
//! connection resets and timeouts to [`BridgeError::Network`] so callers can
//! tell transient failures from bad data.
//!
//! ## Thread Safety
//!
//! All traits require `Send + Sync` so handles can be shared across job tasks.

pub mod error;
pub mod logging;
pub mod provider;
pub mod time;

pub use error::BridgeError;

// Re-export commonly used types
pub use provider::{
    CatalogProvider, ClientConnection, ClientId, ClientType, ItemQuery, ListDraft, ListHandle,
    ListProvider, MediaType, ProviderFactory, ProviderHandle, RemoteItem, RemoteList,
    RemoteUserData, UserDataProvider,
};
pub use logging::{LogEntry, LogLevel, LoggerSink};
pub use time::{Clock, ManualClock, SystemClock};
