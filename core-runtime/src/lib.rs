//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the media sync engine:
//! - Logging and tracing infrastructure
//! - Configuration management
//! - Event bus system
//!
//! ## Overview
//!
//! This crate contains the runtime utilities the library, job and sync crates
//! depend on. It establishes the logging conventions, the validated
//! configuration handed to the service, and the event broadcasting used to
//! report job and sync activity.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
