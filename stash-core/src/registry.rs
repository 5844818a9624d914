//! Explicit operation registration and memoized policy resolution.
//!
//! Callers describe each cached operation once with an [`OperationDescriptor`]
//! (the equivalent of per-method cache markers) and hand it to the
//! [`PolicyRegistry`] together with the operation's loader. The registry
//! resolves the pair into a [`Policy`] the first time it is needed and hands
//! the same `Arc<Policy<T>>` to every later caller.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::error::{BoxError, ConfigError};
use crate::policy::{EntryType, Policy};

/// Identity of a cached operation: the component that owns it and its name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationId {
    owner: String,
    name: String,
}

impl OperationId {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.owner, self.name)
    }
}

/// Declarative cache settings for one operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationDescriptor {
    /// Explicit cache key. Derived from the operation identity when absent.
    pub provider_key: Option<String>,
    /// Record lifetime. Absent means zero.
    pub lifetime: Option<Duration>,
    pub expirable: bool,
    /// Serve an expired record once before evicting it.
    pub use_if_expired: bool,
}

impl OperationDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.provider_key = Some(key.into());
        self
    }

    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = Some(lifetime);
        self
    }

    pub fn expirable(mut self) -> Self {
        self.expirable = true;
        self
    }

    pub fn use_if_expired(mut self) -> Self {
        self.use_if_expired = true;
        self
    }

    /// Key used when no provider key is given: owner, name and payload type.
    pub fn default_key<T: ?Sized>(operation: &OperationId) -> String {
        format!("{}:{}", operation, std::any::type_name::<T>())
    }

    /// Resolve this descriptor and a loader into a policy.
    pub fn resolve<T, F, Fut>(
        &self,
        operation: &OperationId,
        loader: F,
    ) -> Result<Policy<T>, ConfigError>
    where
        T: Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, BoxError>> + Send + 'static,
    {
        let key = self
            .provider_key
            .clone()
            .unwrap_or_else(|| Self::default_key::<T>(operation));

        Policy::builder(key)
            .ttl(self.lifetime.unwrap_or(Duration::ZERO))
            .expirable(self.expirable)
            .allow_stale_on_expiry(self.use_if_expired)
            .loader(loader)
            .build()
    }
}

struct Registered {
    entry_type: EntryType,
    policy: Arc<dyn Any + Send + Sync>,
}

/// Memoized map from operation identity to its resolved policy.
///
/// Entries are inserted once and never replaced. Two callers racing on the
/// first resolution of an operation may both build a policy; the first one
/// stored wins and both receive it.
#[derive(Default)]
pub struct PolicyRegistry {
    policies: RwLock<HashMap<OperationId, Registered>>,
}

impl PolicyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve and store the policy for `operation`.
    ///
    /// If the operation is already registered the existing policy is
    /// returned and the new descriptor is ignored.
    pub fn register<T, F, Fut>(
        &self,
        operation: OperationId,
        descriptor: &OperationDescriptor,
        loader: F,
    ) -> Result<Arc<Policy<T>>, ConfigError>
    where
        T: Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, BoxError>> + Send + 'static,
    {
        let id = operation.clone();
        self.resolve_or_register(operation, move || descriptor.resolve(&id, loader))
    }

    /// Fetch a previously registered policy.
    pub fn resolve<T>(&self, operation: &OperationId) -> Result<Arc<Policy<T>>, ConfigError>
    where
        T: Send + Sync + 'static,
    {
        let policies = self.policies.read().unwrap_or_else(|e| e.into_inner());
        let registered = policies
            .get(operation)
            .ok_or_else(|| ConfigError::UnknownOperation {
                operation: operation.to_string(),
            })?;
        Self::downcast(operation, registered)
    }

    /// Return the memoized policy, resolving it with `resolve` on first use.
    pub fn resolve_or_register<T, R>(
        &self,
        operation: OperationId,
        resolve: R,
    ) -> Result<Arc<Policy<T>>, ConfigError>
    where
        T: Send + Sync + 'static,
        R: FnOnce() -> Result<Policy<T>, ConfigError>,
    {
        {
            let policies = self.policies.read().unwrap_or_else(|e| e.into_inner());
            if let Some(registered) = policies.get(&operation) {
                return Self::downcast(&operation, registered);
            }
        }

        // Built outside the lock; resolution is pure so a lost race is harmless.
        let policy: Arc<Policy<T>> = Arc::new(resolve()?);

        let mut policies = self.policies.write().unwrap_or_else(|e| e.into_inner());
        let registered = policies
            .entry(operation.clone())
            .or_insert_with(|| Registered {
                entry_type: policy.entry_type().clone(),
                policy: policy.clone(),
            });
        Self::downcast(&operation, registered)
    }

    /// Registered operations in a stable order.
    pub fn operations(&self) -> Vec<OperationId> {
        let policies = self.policies.read().unwrap_or_else(|e| e.into_inner());
        let mut ops: Vec<OperationId> = policies.keys().cloned().collect();
        ops.sort();
        ops
    }

    pub fn len(&self) -> usize {
        self.policies
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn downcast<T>(
        operation: &OperationId,
        registered: &Registered,
    ) -> Result<Arc<Policy<T>>, ConfigError>
    where
        T: Send + Sync + 'static,
    {
        Arc::clone(&registered.policy)
            .downcast::<Policy<T>>()
            .map_err(|_| ConfigError::PayloadTypeMismatch {
                operation: operation.to_string(),
                registered: registered.entry_type.to_string(),
                requested: EntryType::of::<T>().to_string(),
            })
    }
}
