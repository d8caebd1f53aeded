// Allow common clippy pedantic lints that aren't critical for this codebase
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_lossless)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::unused_self)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::items_after_statements)]
#![allow(clippy::unnecessary_wraps)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::unused_async)]

//! # docshift
//!
//! Checkpointed, resumable document migration between a search index and a
//! document collection.
//!
//! ## Features
//!
//! - **Resumable copies**: every migrated source record is stamped with an
//!   increasing marker, so an interrupted run picks up where it stopped
//! - **Full transfer**: one-shot streaming copy over a server-side scan
//! - **Failure isolation**: records the destination refuses are logged with
//!   their payload and never stop a batch
//! - **Typed errors**: store failures propagate; transient query failures are
//!   retried with backoff
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use docshift::{cli::build_engine, config::MigrationConfig, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = MigrationConfig::from_file("docshift.yaml")?;
//!     let mut engine = build_engine(&config)?;
//!
//!     let report = engine.run_resumable().await?;
//!     println!("{:?}: {} records", report.status, report.stats.records_written);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       TransferEngine                          │
//! │  run_resumable()    run_full_transfer()    status()           │
//! └──────────────────────────────────────────────────────────────┘
//!                │ source                     │ destination
//! ┌──────────────┴──────────┐   ┌─────────────┴────────────────┐
//! │ Adapter                 │   │ Adapter                       │
//! │ SearchIndex/Collection  │   │ SearchIndex/Collection        │
//! └──────────────┬──────────┘   └─────────────┬────────────────┘
//! ┌──────────────┴────────────────────────────┴────────────────┐
//! │ DocumentStore: find  scan  insert_many  set_markers  count  │
//! ├────────────────────┬──────────────────────┬────────────────┤
//! │ SearchIndexStore   │ CollectionStore      │ MemoryStore    │
//! │ HTTP + retry       │ DuckDB               │ fault injection│
//! └────────────────────┴──────────────────────┴────────────────┘
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]

// ============================================================================
// Module declarations
// ============================================================================

/// Error types
pub mod error;

/// Common types and type aliases
pub mod types;

/// Bounded retry with backoff
pub mod retry;

/// HTTP client with retry and rate limiting
pub mod http;

/// Document store connections
pub mod store;

/// Source and destination adapters
pub mod adapter;

/// Transfer engine
pub mod engine;

/// Migration configuration
pub mod config;

/// Command-line interface
pub mod cli;

// ============================================================================
// Re-exports
// ============================================================================

pub use error::{Error, Result};
pub use types::*;

// Re-export commonly used types
pub use adapter::{Adapter, CollectionAdapter, SearchIndexAdapter};
pub use config::MigrationConfig;
pub use engine::{EngineConfig, RunReport, RunStatus, TransferEngine, TransferReport};
pub use store::{CollectionStore, DocumentStore, MemoryStore, SearchIndexStore};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
