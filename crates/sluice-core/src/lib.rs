//! # Sluice Core
//!
//! Typed records, the stage contract, and the pipeline engine for Sluice,
//! plus the built-in stages (text chunking among them).
//!
//! This crate is synchronous and does no I/O of its own. Connectors,
//! queues, workers, and delivery live in the `sluice` application crate.

pub mod error;
pub mod fields;
pub mod pipeline;
pub mod record;
pub mod registry;
pub mod stage;
pub mod stages;
pub mod value;
