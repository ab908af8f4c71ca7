//! Graph property-value server.
//!
//! Values of a node's properties live in several ranked import groups, each
//! holding pre-sorted pages per `(node, property, neighbor type)`. The
//! [`fetch`] engine merges those pages into bounded result pages and carries
//! the read position between requests in an opaque continuation token
//! ([`pagination`]).

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod fetch;
pub mod local;
pub mod logging;
pub mod pagination;
pub mod partition;
pub mod server;
pub mod types;

pub use config::MixerConfig;
pub use error::{MixerError, Result};
pub use fetch::{FetchRequest, FetchResult, Fetcher};
pub use types::{Direction, EntityInfo, GraphKey};
