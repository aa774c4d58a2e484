//! Watch-driven cache layer.
//!
//! Each data type gets one [`Cacher`] that owns a [`Mirror`] and keeps it
//! current from a [`ListWatch`] source: a full listing first, then an
//! ordered change stream applied on top.
//!
//! # Consistency
//!
//! The mirror is eventually consistent with the backend. Its
//! [`Watermark`] records the highest revision applied and the revision of
//! the latest listing. Neither moves backward, so a relist racing with an
//! open stream cannot roll entries back or replay what it listed. Readiness is a one-shot [`ReadyGate`] closed after the first
//! successful listing.
//!
//! # Example
//!
//! ```ignore
//! let lw = Arc::new(KvListWatch::new("instance", "/roster/inst/", backend, codec, cfg));
//! let cacher = Arc::new(Cacher::new(lw, RetryConfig::default()));
//! cacher.start(&Handle::current(), shutdown_rx);
//! cacher.ready().wait().await;
//! let hit = cacher.mirror().get(b"/roster/inst/i1")?;
//! ```

pub mod cacher;
pub mod document;
pub mod list_watch;
pub mod mirror;
pub mod ready;
pub mod watermark;

pub use cacher::{Cacher, CacherState, EventSink};
pub use document::{
    parse_watch_response, Collection, Document, DocumentListWatch, DocumentSource, WatchResponse,
    WatchResponseStream,
};
pub use list_watch::{KvEventStream, KvListWatch, ListWatch, Snapshot};
pub use mirror::Mirror;
pub use ready::ReadyGate;
pub use watermark::Watermark;
