//! Third-party target actors the wallet forwards calls to.
//!
//! Defines the [`Target`] trait and the [`TargetRouter`] that resolves a
//! target principal to its implementation.
//!
//! One implementation ships with the crate:
//! - [`sample::SampleTarget`]: the three-method sample actor used by the demo

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use tracing::debug;

use crate::registry::Interface;
use crate::types::{CallKind, Principal};

pub mod sample;

/// A call forwarded to a target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetRequest {
    /// Principal the target sees as its caller (the wallet).
    pub caller: Principal,
    /// Method to invoke.
    pub method_name: String,
    /// Call semantics of the method.
    pub kind: CallKind,
    /// Encoded arguments.
    pub args: Vec<u8>,
    /// Cycles attached to the call.
    pub cycles: u128,
}

/// Failure reported by a target, passed through to the caller verbatim.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct TargetFailure {
    /// Reject code reported by the target.
    pub code: u8,
    /// Reject message reported by the target.
    pub message: String,
}

impl TargetFailure {
    /// Build a failure with the given code and message.
    pub fn new(code: u8, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// A callable third-party actor.
#[async_trait]
pub trait Target: Send + Sync {
    /// The target's current declared interface.
    ///
    /// Read on every call, so interface changes are observed immediately.
    fn interface(&self) -> Interface;

    /// Execute a call and return the encoded reply.
    async fn call(&self, request: TargetRequest) -> Result<Vec<u8>, TargetFailure>;
}

/// Resolves target principals to their implementations.
///
/// Uses a sync [`RwLock`] since lookups never hold the lock across an await.
#[derive(Default)]
pub struct TargetRouter {
    targets: RwLock<HashMap<Principal, Arc<dyn Target>>>,
}

impl std::fmt::Debug for TargetRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetRouter")
            .field("target_count", &self.read().len())
            .finish()
    }
}

impl TargetRouter {
    /// Empty router.
    pub fn new() -> Self {
        Self::default()
    }

    // Every write is a single insert or remove, so a poisoned map is intact.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<Principal, Arc<dyn Target>>> {
        self.targets.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<Principal, Arc<dyn Target>>> {
        self.targets.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register (or replace) the implementation behind `principal`.
    pub fn register(&self, principal: Principal, target: Arc<dyn Target>) {
        debug!(target = %principal, "target registered");
        self.write().insert(principal, target);
    }

    /// Remove a target. Returns whether it was registered.
    pub fn unregister(&self, principal: &Principal) -> bool {
        self.write().remove(principal).is_some()
    }

    /// Resolve a target principal.
    pub fn get(&self, principal: &Principal) -> Option<Arc<dyn Target>> {
        self.read().get(principal).cloned()
    }
}
