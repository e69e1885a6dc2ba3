//! # Sluice
//!
//! Moves content from sources into a downstream index. Connectors publish
//! records onto a bounded queue, workers drive each record through a
//! configurable stage pipeline, and an indexer delivers the results and
//! issues a receipt per record.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌───────────┐   ┌──────────────┐   ┌──────────┐
//! │ Connectors  │──▶│ Publisher │──▶│   Workers    │──▶│ Indexer  │──▶ receipts
//! │ FS / JSONL  │   │  (queue)  │   │  Pipeline    │   │ JSONL/out│
//! └─────────────┘   └───────────┘   └──────────────┘   └──────────┘
//! ```
//!
//! Records, stages, and the pipeline engine live in `sluice-core`.
//!
//! ## Quick Start
//!
//! ```bash
//! sluice validate                 # assemble and start the pipeline
//! sluice stages                   # list stage types
//! sluice run                      # run every configured connector
//! sluice run --connector filesystem:docs
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`connector`] | Connector trait and registry |
//! | [`connector_fs`] | Filesystem connector |
//! | [`connector_jsonl`] | JSON Lines connector |
//! | [`connector_csv`] | CSV connector, one record per row |
//! | [`publisher`] | Run-id stamping and the bounded queue |
//! | [`indexer`] | Delivery sinks, retry, receipts |
//! | [`runner`] | One end-to-end run |
//! | [`stages`] | Application stages and the stage registry |

pub mod config;
pub mod connector;
pub mod connector_csv;
pub mod connector_fs;
pub mod connector_jsonl;
pub mod indexer;
pub mod publisher;
pub mod runner;
pub mod stages;
