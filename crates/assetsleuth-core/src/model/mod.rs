/// Data model: records, the bucketed store that owns them, and the events
/// the store publishes.
pub mod event;
pub mod name_key;
pub mod record;
pub mod size;
pub mod store;

pub use event::{ChangeKind, EventHub, StoreEvent};
pub use name_key::NameKey;
pub use record::{Record, RecordFlags, RecordKind, Rgb, SequenceParts, SortKeys, Thumbnail};
pub use store::{BucketState, BucketView, Enrichment, RecordRef, RecordStore};
