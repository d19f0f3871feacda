//! Workspace facade crate.
//!
//! Re-exports the [`core_service`] entry point so host applications can depend
//! on `mediahub-workspace` alone and reach the sync service, its configuration
//! and the provider traits without wiring each workspace crate individually.

pub use core_service::*;
