/// AssetSleuth Core: discovery, record store, enrichment and filtering.
///
/// This crate contains all business logic with zero UI dependencies.
/// It is designed to be reusable across different frontends (GUI, CLI, TUI).
///
/// # Modules
///
/// - [`model`]: Records, flags and the generation-counted record store.
/// - [`scanner`]: Directory walking and frame-sequence grouping.
/// - [`pipeline`]: Background info, thumbnail and deep-scan workers.
/// - [`filter`]: Text/flag filtering and sorting of buckets.
/// - [`collab`]: Thumbnail cache and bookmark database collaborators.
/// - [`config`]: Browser configuration and the persisted settings context.
/// - [`browser`]: The facade a view layer talks to.
pub mod browser;
pub mod collab;
pub mod config;
pub mod error;
pub mod filter;
pub mod model;
pub mod pipeline;
pub mod scanner;

pub use browser::{Browser, Location};
pub use error::StoreError;
pub use model::{Record, RecordFlags, RecordKind, RecordRef, RecordStore, StoreEvent};
