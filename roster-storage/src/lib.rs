//! ROSTER Storage - Indexers, Caches, Leases and Add-ons
//!
//! The data plane of the registry. A [`Backend`] is the authoritative
//! revisioned store; everything else reads through it:
//!
//! - [`RawIndexer`] and [`CacheIndexer`] answer searches, the latter from a
//!   watch-driven [`Mirror`] when the query allows it.
//! - [`TypeStore`] owns one [`Cacher`] per data type and drives its sync
//!   loop, readiness and periodic resync.
//! - [`LeaseKeeper`] renews leases through a single-flight queue.
//! - [`AddOnRegistry`] fans applied changes out to named extensions.
//!
//! [`Registry`] composes all of them over one backend.

pub mod addon;
pub mod backend;
pub mod cache;
pub mod codec;
pub mod indexer;
pub mod lease;
pub mod memory;
pub mod registry;
pub mod type_store;

pub use addon::{AddOn, AddOnConfig, AddOnRegistry, OnEvent, SimpleAddOn};
pub use backend::{Backend, RawEvent, RawEventStream, RawResponse};
pub use cache::{
    parse_watch_response, Cacher, CacherState, Collection, Document, DocumentListWatch,
    DocumentSource, EventSink, KvEventStream, KvListWatch, ListWatch, Mirror, ReadyGate, Snapshot,
    WatchResponse, WatchResponseStream, Watermark,
};
pub use codec::{
    BytesCodec, CodecError, InstanceCodec, MapCodec, ServiceCodec, StringCodec, ValueCodec,
};
pub use indexer::{CacheIndexer, Indexer, RawIndexer};
pub use lease::{
    lease_task_key, LeaseKeeper, LeaseTask, RenewalQueue, SingleFlightRenewals, HANDLED_RETENTION,
    LEASE_TASK_PREFIX,
};
pub use memory::{MemoryBackend, DEFAULT_HISTORY_LIMIT};
pub use registry::{
    Registry, RegistryEngine, SelfRegistration, INSTANCE_TYPE, SERVICE_TYPE, UNREGISTER_TIMEOUT,
};
pub use type_store::{KvListWatchFactory, ListWatchFactory, TypeDescriptor, TypeStore};
