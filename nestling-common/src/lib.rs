//! # Nestling Common Library
//!
//! Shared code for the Nestling pregnancy tracker client core including:
//! - Pregnancy data model and wire-boundary types
//! - Stage normalization (week/month/trimester -> canonical week)
//! - Sync event types (SyncEvent enum)
//! - Configuration loading
//! - Error types and timestamp utilities

pub mod config;
pub mod error;
pub mod events;
pub mod model;
pub mod stage;
pub mod time;

pub use error::{Error, Result};
pub use model::{CachedPregnancyRecord, DevelopmentSnapshot, PregnancyRecord, Provenance};
pub use stage::{normalize, StageDescriptor, StageOutcome, StageType};
