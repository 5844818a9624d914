//! STASH Core - Record, Policy and Expiration Types
//!
//! Pure data structures and predicates shared by every STASH crate:
//! - [`Record`]: a cached payload with its creation time and source tier
//! - [`Policy`]: resolved per-operation cache configuration, loader included
//! - [`has_expired`]: the expiration predicate
//! - [`PolicyRegistry`]: explicit, memoized operation registration
//! - [`StashError`]: the error hierarchy
//!
//! Storage tiers and the orchestrator live in `stash-storage`.

pub mod config;
pub mod error;
pub mod expiration;
pub mod policy;
pub mod record;
pub mod registry;

pub use config::StashConfig;
pub use error::{BoxError, ConfigError, LoaderError, StashError, StashResult, StoreError};
pub use expiration::{has_expired, has_expired_at};
pub use policy::{Cacheable, EntryType, Loader, LoaderFuture, Policy, PolicyBuilder};
pub use record::{Record, SourceTier, Timestamp};
pub use registry::{OperationDescriptor, OperationId, PolicyRegistry};
