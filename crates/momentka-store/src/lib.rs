//! momentka-store — Events, access codes, blob hosting, and media fetching.

pub mod blob;
pub mod cache;
pub mod code;
pub mod event;
pub mod source;
pub mod store;

pub use blob::{kind_for_extension, BlobError, BlobStore, StoredBlob};
pub use cache::{CacheError, CachedMediaList, MediaCache};
pub use code::{AccessCode, CodeError, CODE_LENGTH};
pub use event::{Event, RetentionWindow};
pub use source::{UrlFetcher, DEFAULT_FETCH_TIMEOUT_SECS};
pub use store::{EventStore, StoreError};
