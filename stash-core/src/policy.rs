//! Resolved per-operation cache policy.
//!
//! A [`Policy`] is the immutable configuration the orchestrator consumes for
//! one logical operation: the cache key, how long records live, whether an
//! expired record may be served once, and the loader that produces a fresh
//! value on a miss. Policies can only be obtained through [`PolicyBuilder`],
//! so a policy with an empty key or without a loader never reaches a store.

use std::borrow::Cow;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt};
use serde::{de::DeserializeOwned, Serialize};

use crate::error::{BoxError, ConfigError};

/// Marker trait for payloads that can live in both tiers.
///
/// Memory keeps the value as-is, persistence round-trips it through serde.
pub trait Cacheable: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> Cacheable for T where T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

/// Future returned by a loader.
pub type LoaderFuture<T> = BoxFuture<'static, Result<T, BoxError>>;

/// Zero-argument asynchronous factory producing a fresh payload.
pub type Loader<T> = Arc<dyn Fn() -> LoaderFuture<T> + Send + Sync>;

/// Descriptor of the payload type stored under a key.
///
/// The persistence tier writes it next to every record and refuses to decode
/// a record whose descriptor differs from the one the caller asks for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntryType {
    name: Cow<'static, str>,
}

impl EntryType {
    /// Descriptor for the Rust type `T`.
    pub fn of<T: ?Sized>() -> Self {
        Self {
            name: Cow::Borrowed(std::any::type_name::<T>()),
        }
    }

    /// Descriptor with an explicit name, as read back from storage.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Cow::Owned(name.into()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Resolved cache configuration for one operation.
#[derive(Clone)]
pub struct Policy<T> {
    key: String,
    entry_type: EntryType,
    ttl: Duration,
    expirable: bool,
    allow_stale_on_expiry: bool,
    loader: Loader<T>,
}

impl<T: Send + 'static> Policy<T> {
    /// Start building a policy for `key`.
    pub fn builder(key: impl Into<String>) -> PolicyBuilder<T> {
        PolicyBuilder::new(key)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn entry_type(&self) -> &EntryType {
        &self.entry_type
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn is_expirable(&self) -> bool {
        self.expirable
    }

    pub fn allows_stale_on_expiry(&self) -> bool {
        self.allow_stale_on_expiry
    }

    /// Start one loader invocation.
    pub fn load(&self) -> LoaderFuture<T> {
        (self.loader)()
    }
}

impl<T> fmt::Debug for Policy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Policy")
            .field("key", &self.key)
            .field("entry_type", &self.entry_type)
            .field("ttl", &self.ttl)
            .field("expirable", &self.expirable)
            .field("allow_stale_on_expiry", &self.allow_stale_on_expiry)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Policy`]. Validation happens in [`PolicyBuilder::build`].
pub struct PolicyBuilder<T> {
    key: String,
    ttl: Duration,
    expirable: bool,
    allow_stale_on_expiry: bool,
    loader: Option<Loader<T>>,
}

impl<T: Send + 'static> PolicyBuilder<T> {
    /// New builder. Records never expire until `expirable(true)` is set.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ttl: Duration::ZERO,
            expirable: false,
            allow_stale_on_expiry: false,
            loader: None,
        }
    }

    /// Record lifetime, only checked when the policy is expirable.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn expirable(mut self, expirable: bool) -> Self {
        self.expirable = expirable;
        self
    }

    /// Serve an expired record once before it is evicted.
    pub fn allow_stale_on_expiry(mut self, allow: bool) -> Self {
        self.allow_stale_on_expiry = allow;
        self
    }

    /// Set the loader from an async closure.
    pub fn loader<F, Fut>(mut self, loader: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, BoxError>> + Send + 'static,
    {
        self.loader = Some(Arc::new(move || loader().boxed()));
        self
    }

    /// Set an already shared loader.
    pub fn shared_loader(mut self, loader: Loader<T>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Validate and freeze the policy.
    pub fn build(self) -> Result<Policy<T>, ConfigError> {
        if self.key.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "key".to_string(),
                value: String::new(),
                reason: "cache key must not be empty".to_string(),
            });
        }

        let loader = self.loader.ok_or_else(|| ConfigError::MissingRequired {
            field: "loader".to_string(),
        })?;

        Ok(Policy {
            key: self.key,
            entry_type: EntryType::of::<T>(),
            ttl: self.ttl,
            expirable: self.expirable,
            allow_stale_on_expiry: self.allow_stale_on_expiry,
            loader,
        })
    }
}
