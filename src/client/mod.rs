//! Typed client for calling targets through the wallet.
//!
//! A [`ProxyActor`] is built from a target's declared interface. It keeps a
//! static method table and exposes one generic entry point,
//! [`ProxyActor::invoke`], which encodes arguments with the declared schema,
//! sends them through `proxy_call`, waits on the confirmation queue when the
//! call is deferred, and decodes the reply.
//!
//! [`ProxyTargetsBuilder`] turns actors into the grant request passed to
//! `add_expiry_user`.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

pub mod poller;

use crate::codec::{self, CodecError};
use crate::registry::{Interface, MethodTable};
use crate::types::{CallArgs, CallResult, Method, Nanos, Principal, ProxyTargets, TargetEntry};
use crate::wallet::queue::Resolution;
use crate::wallet::{Wallet, WalletError};

use self::poller::{poll_queue_method, PollOutcome, PollStrategy, QueueSource};

/// Client-side errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProxyError {
    /// The wallet refused or failed the call.
    #[error(transparent)]
    Wallet(WalletError),

    /// The owner rejected the deferred call.
    #[error("Owner has rejected this call: {0}")]
    Rejected(String),

    /// No decision arrived within the poll budget.
    #[error("No response for call {hash} after {attempts} attempts")]
    Timeout {
        /// Hash of the deferred call.
        hash: String,
        /// Attempts made.
        attempts: u32,
    },

    /// The wallet no longer knows the hash.
    #[error("call {0} is unknown to the wallet")]
    Vanished(String),

    /// Arguments or reply do not match the declared schema.
    #[error("encoding failure: {0}")]
    Encoding(#[from] CodecError),

    /// The approved call failed on the target.
    #[error("{0}")]
    TargetCallFailure(String),

    /// The actor's interface does not declare the method.
    #[error("method {0} is not declared by the target interface")]
    UnknownMethod(String),
}

/// Wallet operations used by the client.
#[async_trait]
pub trait WalletApi: QueueSource {
    /// Forward a call through the wallet.
    async fn proxy_call(&self, args: CallArgs) -> Result<CallResult, WalletError>;
}

/// A wallet seen from one calling principal.
#[derive(Debug, Clone)]
pub struct WalletHandle {
    wallet: Arc<Wallet>,
    caller: Principal,
}

impl WalletHandle {
    /// Handle issuing calls as `caller`.
    pub fn new(wallet: Arc<Wallet>, caller: Principal) -> Self {
        Self { wallet, caller }
    }

    /// The calling principal.
    pub fn caller(&self) -> &Principal {
        &self.caller
    }
}

#[async_trait]
impl QueueSource for WalletHandle {
    async fn get_queue_reply(&self, hash: &str) -> Result<Option<Resolution>, WalletError> {
        self.wallet.get_queue_reply(&self.caller, hash).await
    }

    async fn remove_queue_method(&self, hash: &str) -> Result<bool, WalletError> {
        self.wallet.remove_queue_method(&self.caller, hash).await
    }
}

#[async_trait]
impl WalletApi for WalletHandle {
    async fn proxy_call(&self, args: CallArgs) -> Result<CallResult, WalletError> {
        self.wallet.proxy_call(&self.caller, args).await
    }
}

/// Typed proxy for one target.
pub struct ProxyActor {
    wallet: Arc<dyn WalletApi>,
    target: Principal,
    table: MethodTable,
    strategy: PollStrategy,
}

impl std::fmt::Debug for ProxyActor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyActor")
            .field("target", &self.target)
            .field("methods", &self.table.len())
            .field("strategy", &self.strategy)
            .finish()
    }
}

impl ProxyActor {
    /// Build an actor for `target` from its declared interface.
    pub fn new(
        wallet: Arc<dyn WalletApi>,
        target: Principal,
        interface: &Interface,
        strategy: PollStrategy,
    ) -> Self {
        Self {
            wallet,
            target,
            table: MethodTable::from_interface(interface),
            strategy,
        }
    }

    /// Target principal.
    pub fn target(&self) -> &Principal {
        &self.target
    }

    /// Classified methods, in interface order.
    pub fn methods(&self) -> Vec<Method> {
        self.table.methods()
    }

    /// Call `method_name` with `args` and return the decoded reply.
    ///
    /// Deferred calls are polled with the actor's strategy.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError`] for schema mismatches, wallet refusals, owner
    /// rejection, poll timeout or a failed approved call.
    pub async fn invoke(&self, method_name: &str, args: Vec<Value>) -> Result<Value, ProxyError> {
        let entry = self
            .table
            .get(method_name)
            .ok_or_else(|| ProxyError::UnknownMethod(method_name.to_owned()))?;
        let payload = CallArgs {
            target: self.target.clone(),
            method_name: method_name.to_owned(),
            args: codec::encode(&entry.args, &args)?,
            cycles: 0,
        };

        let result = match self.wallet.proxy_call(payload).await {
            Ok(result) => result,
            Err(WalletError::Pending { hash }) => {
                info!(hash = %hash, method = %method_name, "call deferred, polling");
                self.await_resolution(&hash).await?
            }
            Err(e) => return Err(ProxyError::Wallet(e)),
        };

        let values = codec::decode(&entry.results, &result.reply)?;
        Ok(codec::collapse(values))
    }

    async fn await_resolution(&self, hash: &str) -> Result<CallResult, ProxyError> {
        match poll_queue_method(self.wallet.as_ref(), hash, self.strategy).await {
            PollOutcome::Approved(Ok(result)) => Ok(result),
            PollOutcome::Approved(Err(message)) => Err(ProxyError::TargetCallFailure(message)),
            PollOutcome::Rejected(reason) => Err(ProxyError::Rejected(reason)),
            PollOutcome::Vanished => Err(ProxyError::Vanished(hash.to_owned())),
            PollOutcome::Timeout { attempts } => Err(ProxyError::Timeout {
                hash: hash.to_owned(),
                attempts,
            }),
        }
    }
}

/// Methods to mark as key operations on one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyOperation {
    /// Target principal.
    pub target: Principal,
    /// Method names to flag.
    pub methods: Vec<String>,
}

/// Builds the `add_expiry_user` request from proxy actors.
#[derive(Debug, Clone, Default)]
pub struct ProxyTargetsBuilder {
    entries: Vec<TargetEntry>,
    expiration: Option<Nanos>,
}

impl ProxyTargetsBuilder {
    /// Empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant every method of `actor`.
    pub fn actor(mut self, actor: &ProxyActor) -> Self {
        self.entries.push(TargetEntry {
            target: actor.target().clone(),
            methods: actor.methods(),
        });
        self
    }

    /// Grant an explicit target entry.
    pub fn entry(mut self, entry: TargetEntry) -> Self {
        self.entries.push(entry);
        self
    }

    /// Grant lifetime overriding the wallet default.
    pub fn expiration(mut self, period: Nanos) -> Self {
        self.expiration = Some(period);
        self
    }

    /// Produce the request, flagging the listed key operations.
    pub fn build(mut self, key_operations: &[KeyOperation]) -> ProxyTargets {
        for op in key_operations {
            for entry in self.entries.iter_mut().filter(|e| e.target == op.target) {
                for method in entry
                    .methods
                    .iter_mut()
                    .filter(|m| op.methods.contains(&m.name))
                {
                    method.key_operation = true;
                }
            }
        }
        ProxyTargets {
            targets: self.entries,
            expiration: self.expiration,
        }
    }
}
