//! Proxy dispatcher: gate decisions and immediate execution.
//!
//! The gate runs in two steps. [`admit`] applies the checks that do not need
//! the target interface (blacklist, self-call, owner/user guard). [`decide`]
//! takes the classified method and returns whether the call is dispatched
//! now or deferred to the confirmation queue.
//!
//! [`ProxyDispatcher`] classifies the method against the target's live
//! interface and executes the call, checking arguments and results against
//! the declared schemas on the way through.

use std::sync::Arc;

use tracing::{debug, warn};

use super::blacklist::Blacklist;
use super::store::{AccessCheck, AuthorizationStore};
use super::WalletError;
use crate::codec;
use crate::registry::{MethodEntry, MethodTable};
use crate::target::{Target, TargetRequest, TargetRouter};
use crate::types::{CallArgs, CallKind, CallResult, Method, Nanos, Principal};

/// How an admitted caller reached the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Wallet owner: bypasses the allow-list and the queue.
    Owner,
    /// Principal holding a live grant.
    User,
}

/// What to do with an admitted call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Forward to the target now.
    Dispatch,
    /// Defer to owner confirmation.
    Defer,
}

/// Checks that run before the target method is classified.
///
/// # Errors
///
/// - [`WalletError::Unauthorized`] if the caller or the target is
///   blacklisted, or the caller is neither owner nor live grant holder
/// - [`WalletError::SelfCall`] if the target is the wallet itself
pub fn admit(
    blacklist: &Blacklist,
    store: &AuthorizationStore,
    wallet_id: &Principal,
    caller: &Principal,
    is_owner: bool,
    target: &Principal,
    now: Nanos,
) -> Result<Admission, WalletError> {
    for principal in [caller, target] {
        if blacklist.contains(principal) {
            return Err(WalletError::Unauthorized(format!(
                "{principal} is in proxy black list"
            )));
        }
    }
    if target == wallet_id {
        return Err(WalletError::SelfCall);
    }
    if is_owner {
        return Ok(Admission::Owner);
    }
    if !store.has_live_grant(caller, now) {
        return Err(WalletError::Unauthorized(format!("{caller} unauthorized")));
    }
    Ok(Admission::User)
}

/// Decide between immediate dispatch and deferral for an admitted user call.
///
/// # Errors
///
/// Returns [`WalletError::Unauthorized`] when the validation mode requires
/// an allow-list check and the grant does not cover the target and method.
pub fn decide(
    store: &AuthorizationStore,
    caller: &Principal,
    target: &Principal,
    method: &Method,
    now: Nanos,
) -> Result<GateDecision, WalletError> {
    let key = method.key_operation || store.is_key_operation(caller, target, &method.name);
    if !store
        .method_validate_type()
        .requires_check(method.call_kind, key)
    {
        return Ok(GateDecision::Dispatch);
    }

    match store.check(caller, target, &method.name, now) {
        AccessCheck::Granted if key => Ok(GateDecision::Defer),
        AccessCheck::Granted => Ok(GateDecision::Dispatch),
        AccessCheck::NoGrant | AccessCheck::Expired => {
            Err(WalletError::Unauthorized(format!("{caller} unauthorized")))
        }
        AccessCheck::TargetNotGranted => Err(WalletError::Unauthorized(format!(
            "Canister {target} is not in authorized targets"
        ))),
        AccessCheck::MethodNotGranted => Err(WalletError::Unauthorized(format!(
            "Method {} is not in authorized targets",
            method.name
        ))),
    }
}

/// A target resolved and its method classified from the live interface.
pub struct ResolvedCall {
    target: Arc<dyn Target>,
    /// Classified method with its schemas.
    pub entry: MethodEntry,
}

impl std::fmt::Debug for ResolvedCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedCall")
            .field("entry", &self.entry)
            .finish_non_exhaustive()
    }
}

/// Classifies and forwards calls to targets.
#[derive(Debug, Clone)]
pub struct ProxyDispatcher {
    wallet_id: Principal,
    targets: Arc<TargetRouter>,
}

impl ProxyDispatcher {
    /// Dispatcher forwarding as `wallet_id`.
    pub fn new(wallet_id: Principal, targets: Arc<TargetRouter>) -> Self {
        Self { wallet_id, targets }
    }

    /// Resolve the target and classify the method from its current interface.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::UnknownTarget`] or [`WalletError::UnknownMethod`].
    pub fn resolve(&self, payload: &CallArgs) -> Result<ResolvedCall, WalletError> {
        let target = self
            .targets
            .get(&payload.target)
            .ok_or_else(|| WalletError::UnknownTarget(payload.target.clone()))?;
        let table = MethodTable::from_interface(&target.interface());
        let entry = table
            .get(&payload.method_name)
            .cloned()
            .ok_or_else(|| WalletError::UnknownMethod {
                target: payload.target.clone(),
                method: payload.method_name.clone(),
            })?;
        Ok(ResolvedCall { target, entry })
    }

    /// Forward a resolved call and return the checked reply.
    ///
    /// One-way calls are spawned and answered with an empty result at once.
    ///
    /// # Errors
    ///
    /// - [`WalletError::Encoding`] if arguments or reply do not match the schema
    /// - [`WalletError::TargetCallFailure`] if the target rejects the call
    pub async fn execute(
        &self,
        resolved: ResolvedCall,
        payload: &CallArgs,
    ) -> Result<CallResult, WalletError> {
        let ResolvedCall { target, entry } = resolved;
        let args = codec::recode(&entry.args, &payload.args)?;
        let request = TargetRequest {
            caller: self.wallet_id.clone(),
            method_name: payload.method_name.clone(),
            kind: entry.method.call_kind,
            args,
            cycles: payload.cycles,
        };

        debug!(
            target = %payload.target,
            method = %payload.method_name,
            kind = ?entry.method.call_kind,
            "forwarding call"
        );

        if entry.method.call_kind == CallKind::OneWay {
            let method = payload.method_name.clone();
            tokio::spawn(async move {
                if let Err(e) = target.call(request).await {
                    warn!(method = %method, error = %e, "one-way call failed");
                }
            });
            return Ok(CallResult {
                reply: codec::encode(&[], &[])?,
            });
        }

        let reply = target
            .call(request)
            .await
            .map_err(WalletError::TargetCallFailure)?;
        let reply = codec::recode(&entry.results, &reply)?;
        Ok(CallResult { reply })
    }
}
