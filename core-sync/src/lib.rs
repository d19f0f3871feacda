//! # Sync & Reconciliation Module
//!
//! Brings catalog items, lists and per-user state from external media clients
//! into the canonical store, and pushes list membership back out.
//!
//! ## Overview
//!
//! This module provides:
//! - The reconciliation engine merging catalog records into canonical items
//! - The list sync engine with its three propagation strategies
//! - The scheduler jobs driving them (catalog, list and user-data sync)
//!
//! ## Components
//!
//! - **Reconciler** (`reconcile`): Upserts one client's records of one kind
//! - **List Sync Engine** (`list_sync`): Imports client lists and propagates members
//! - **Catalog Job** (`catalog_job`): Pages every enabled client through the reconciler
//! - **List Job** (`list_job`): Runs the list engine per user with list sync enabled
//! - **User Data Job** (`user_sync`): Merges favorites and watch history
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_sync::{CatalogSyncJob, SyncContext};
//!
//! let ctx = SyncContext::from_config(pool, &config, event_bus);
//! scheduler
//!     .register(Arc::new(CatalogSyncJob::<Movie>::new(ctx)), Frequency::Daily)
//!     .await?;
//! ```

pub mod catalog_job;
pub mod context;
pub mod error;
pub mod list_job;
pub mod list_sync;
pub mod reconcile;
pub mod user_sync;

pub use catalog_job::CatalogSyncJob;
pub use context::{SyncContext, UserScope};
pub use error::{Result, SyncError};
pub use list_job::ListSyncJob;
pub use list_sync::{ClientLists, ListStrategy, ListSyncEngine, ListSyncStats};
pub use reconcile::{ItemError, Reconciler, UpsertOutcome};
pub use user_sync::{UserDataKind, UserDataStats, UserDataSyncJob};
