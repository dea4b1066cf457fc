//! The proxy wallet: allow-lists, blacklist, dispatch and owner confirmation.
//!
//! [`Wallet`] exposes the full call surface. Every operation takes the
//! calling principal; owner-only operations fail with
//! [`WalletError::NotOwner`] for anyone else.
//!
//! State lives behind one [`tokio::sync::Mutex`], so state changes never
//! interleave. The lock is never held while a target runs: `proxy_call`
//! releases it before awaiting the target, and `owner_confirm` claims the
//! queue entry, releases the lock to execute, then re-locks to record. A
//! claimed entry cannot be claimed again, so a deferred call runs at most
//! once.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

pub mod blacklist;
pub mod dispatcher;
pub mod queue;
pub mod store;

use crate::clock::Clock;
use crate::codec::CodecError;
use crate::target::{TargetFailure, TargetRouter};
use crate::types::{
    AuthorizationGrant, CallArgs, CallResult, Nanos, Principal, ProxyTargets, ValidationMode,
};

use self::blacklist::Blacklist;
use self::dispatcher::{Admission, GateDecision, ProxyDispatcher};
use self::queue::{ConfirmationQueue, QueueHash, Resolution};
use self::store::{AuthorizationStore, DEFAULT_EXPIRY_PERIOD};

/// Errors surfaced by the wallet call surface.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WalletError {
    /// Blacklisted, or no valid grant where one is required.
    #[error("{0}")]
    Unauthorized(String),

    /// The call was deferred; the text is the hash to poll.
    #[error("{hash}")]
    Pending {
        /// Hash of the deferred call.
        hash: String,
    },

    /// Owner-only operation called by someone else.
    #[error("{0} is not an owner")]
    NotOwner(Principal),

    /// Arguments or reply do not match the target's declared schema.
    #[error("encoding failure: {0}")]
    Encoding(#[from] CodecError),

    /// The target rejected the call.
    #[error("An error happened during the call: {0}")]
    TargetCallFailure(TargetFailure),

    /// No target registered under this principal.
    #[error("target {0} is not registered")]
    UnknownTarget(Principal),

    /// The target does not declare the method.
    #[error("method {method} not found on target {target}")]
    UnknownMethod {
        /// Target principal.
        target: Principal,
        /// Requested method.
        method: String,
    },

    /// The call targets the wallet itself.
    #[error("Attempted to call forward on self. This is not allowed. Call this method via a different custodian.")]
    SelfCall,

    /// The wallet cannot cover the attached cycles.
    #[error("insufficient cycles: requested {requested}, available {available}")]
    InsufficientCycles {
        /// Cycles attached to the call.
        requested: u128,
        /// Current wallet balance.
        available: u128,
    },

    /// The grant would be invalid at creation.
    #[error("invalid grant: {0}")]
    InvalidGrant(String),

    /// Reclaim attempted by someone other than an owner or the originator.
    #[error("Not Authorized Execution")]
    NotAuthorizedExecution,
}

impl WalletError {
    /// Hash carried by a deferred call, if this is one.
    pub fn pending_hash(&self) -> Option<&str> {
        match self {
            Self::Pending { hash } => Some(hash),
            _ => None,
        }
    }
}

/// Construction parameters for a [`Wallet`].
#[derive(Debug, Clone)]
pub struct WalletSettings {
    /// The wallet's own principal.
    pub id: Principal,
    /// Initial owners.
    pub owners: Vec<Principal>,
    /// Default grant period.
    pub expiry_period: Nanos,
    /// Initial validation mode.
    pub validate_type: ValidationMode,
    /// Initial cycle balance.
    pub initial_balance: u128,
}

impl WalletSettings {
    /// Settings with one owner and defaults for everything else.
    pub fn new(id: Principal, owner: Principal) -> Self {
        Self {
            id,
            owners: vec![owner],
            expiry_period: DEFAULT_EXPIRY_PERIOD,
            validate_type: ValidationMode::default(),
            initial_balance: 0,
        }
    }
}

#[derive(Debug)]
struct WalletState {
    owners: BTreeSet<Principal>,
    store: AuthorizationStore,
    blacklist: Blacklist,
    queue: ConfirmationQueue,
    balance: u128,
}

impl WalletState {
    fn require_owner(&self, caller: &Principal) -> Result<(), WalletError> {
        if self.owners.contains(caller) {
            Ok(())
        } else {
            Err(WalletError::NotOwner(caller.clone()))
        }
    }

    fn require_user(&self, caller: &Principal, now: Nanos) -> Result<(), WalletError> {
        if self.owners.contains(caller) || self.store.has_live_grant(caller, now) {
            Ok(())
        } else {
            Err(WalletError::Unauthorized(format!("{caller} unauthorized")))
        }
    }

    fn debit(&mut self, cycles: u128) -> Result<(), WalletError> {
        self.balance = self
            .balance
            .checked_sub(cycles)
            .ok_or(WalletError::InsufficientCycles {
                requested: cycles,
                available: self.balance,
            })?;
        Ok(())
    }

    fn refund(&mut self, cycles: u128) {
        self.balance = self.balance.saturating_add(cycles);
    }
}

/// Proxy-call wallet.
pub struct Wallet {
    id: Principal,
    state: Mutex<WalletState>,
    dispatcher: ProxyDispatcher,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for Wallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wallet")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl Wallet {
    /// Build a wallet forwarding to the targets in `targets`.
    pub fn new(settings: WalletSettings, targets: Arc<TargetRouter>, clock: Arc<dyn Clock>) -> Self {
        info!(
            wallet = %settings.id,
            owners = settings.owners.len(),
            validate_type = ?settings.validate_type,
            "wallet initialised"
        );
        Self {
            dispatcher: ProxyDispatcher::new(settings.id.clone(), targets),
            id: settings.id,
            state: Mutex::new(WalletState {
                owners: settings.owners.into_iter().collect(),
                store: AuthorizationStore::new(settings.expiry_period, settings.validate_type),
                blacklist: Blacklist::new(),
                queue: ConfirmationQueue::new(),
                balance: settings.initial_balance,
            }),
            clock,
        }
    }

    /// The wallet's own principal.
    pub fn id(&self) -> &Principal {
        &self.id
    }

    /// Whether `principal` is an owner.
    pub async fn is_owner(&self, principal: &Principal) -> bool {
        self.state.lock().await.owners.contains(principal)
    }

    /// Add an owner.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::NotOwner`] if `caller` is not an owner.
    pub async fn owner_add(&self, caller: &Principal, owner: Principal) -> Result<(), WalletError> {
        let mut state = self.state.lock().await;
        state.require_owner(caller)?;
        info!(owner = %owner, "owner added");
        state.owners.insert(owner);
        Ok(())
    }

    /// Create or replace the grant for `user`.
    ///
    /// # Errors
    ///
    /// - [`WalletError::NotOwner`] if `caller` is not an owner
    /// - [`WalletError::Unauthorized`] if `user` is blacklisted
    /// - [`WalletError::InvalidGrant`] if the grant would expire at creation
    pub async fn add_expiry_user(
        &self,
        caller: &Principal,
        user: Principal,
        targets: ProxyTargets,
    ) -> Result<AuthorizationGrant, WalletError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        state.require_owner(caller)?;
        if state.blacklist.contains(&user) {
            return Err(WalletError::Unauthorized(format!(
                "{user} is in proxy black list"
            )));
        }
        state.store.add_expiry_user(user, targets, now)
    }

    /// Whether `user`'s grant lets it call `method_name` on `target`
    /// directly right now. The method is classified from the target's
    /// current interface.
    pub async fn is_authorized(&self, user: &Principal, target: &Principal, method_name: &str) -> bool {
        let now = self.clock.now();
        let lookup = CallArgs {
            target: target.clone(),
            method_name: method_name.to_owned(),
            args: Vec::new(),
            cycles: 0,
        };
        let Ok(resolved) = self.dispatcher.resolve(&lookup) else {
            return false;
        };
        let state = self.state.lock().await;
        !state.blacklist.contains(user)
            && state
                .store
                .is_authorized(user, target, &resolved.entry.method, now)
    }

    /// Blacklist a principal. Returns its text as ack.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::NotOwner`] if `caller` is not an owner.
    pub async fn add_proxy_black_list(
        &self,
        caller: &Principal,
        principal: Principal,
    ) -> Result<String, WalletError> {
        let mut state = self.state.lock().await;
        state.require_owner(caller)?;
        warn!(principal = %principal, "principal blacklisted");
        Ok(state.blacklist.add(principal))
    }

    /// Remove a principal from the blacklist.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::NotOwner`] if `caller` is not an owner.
    pub async fn remove_proxy_black_list(
        &self,
        caller: &Principal,
        principal: &Principal,
    ) -> Result<Option<String>, WalletError> {
        let mut state = self.state.lock().await;
        state.require_owner(caller)?;
        let removed = state.blacklist.remove(principal);
        if removed.is_some() {
            info!(principal = %principal, "principal removed from blacklist");
        }
        Ok(removed)
    }

    /// Whether a principal is blacklisted.
    pub async fn is_proxy_black_list(&self, principal: &Principal) -> bool {
        self.state.lock().await.blacklist.contains(principal)
    }

    /// Forward a call, or defer it for owner confirmation.
    ///
    /// # Errors
    ///
    /// - [`WalletError::Pending`] when the call was deferred; poll its hash
    /// - [`WalletError::Unauthorized`] when blacklisted or not granted
    /// - [`WalletError::Encoding`] on a schema mismatch
    /// - [`WalletError::TargetCallFailure`] when the target rejects the call
    /// - [`WalletError::UnknownTarget`], [`WalletError::UnknownMethod`],
    ///   [`WalletError::SelfCall`], [`WalletError::InsufficientCycles`]
    pub async fn proxy_call(
        &self,
        caller: &Principal,
        args: CallArgs,
    ) -> Result<CallResult, WalletError> {
        let now = self.clock.now();
        let resolved = {
            let mut state = self.state.lock().await;
            let is_owner = state.owners.contains(caller);
            let admission = dispatcher::admit(
                &state.blacklist,
                &state.store,
                &self.id,
                caller,
                is_owner,
                &args.target,
                now,
            )?;
            let resolved = self.dispatcher.resolve(&args)?;

            if admission == Admission::User {
                let decision = dispatcher::decide(
                    &state.store,
                    caller,
                    &args.target,
                    &resolved.entry.method,
                    now,
                )?;
                if decision == GateDecision::Defer {
                    let hash = state.queue.enqueue(caller.clone(), args, now);
                    return Err(WalletError::Pending { hash });
                }
            }
            state.debit(args.cycles)?;
            resolved
        };

        info!(
            caller = %caller,
            target = %args.target,
            method = %args.method_name,
            "dispatching proxy call"
        );
        let result = self.dispatcher.execute(resolved, &args).await;
        if result.is_err() && args.cycles > 0 {
            self.state.lock().await.refund(args.cycles);
        }
        result
    }

    /// Approve or reject a deferred call.
    ///
    /// Approving executes the stored call now, against the target's current
    /// interface, without holding the wallet lock. A hash that is already
    /// resolved returns its recorded resolution; an unknown hash, or one whose
    /// approved call is still running, returns [`Resolution::NotFound`].
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::NotOwner`] if `caller` is not an owner.
    pub async fn owner_confirm(
        &self,
        caller: &Principal,
        hash: &str,
        accept: bool,
    ) -> Result<Resolution, WalletError> {
        let (call, resolved) = {
            let mut state = self.state.lock().await;
            state.require_owner(caller)?;

            if let Some(existing) = state.queue.resolution(hash) {
                return Ok(existing.clone());
            }
            let Some(call) = state.queue.begin(hash) else {
                return Ok(Resolution::NotFound);
            };

            let barred = [&call.user, &call.payload.target]
                .into_iter()
                .find(|p| state.blacklist.contains(p))
                .cloned();

            let settled = match (accept, barred) {
                (false, _) => Err(Resolution::Rejected(format!("call {hash} rejected by owner"))),
                (true, Some(principal)) => Err(Resolution::Rejected(format!(
                    "{principal} is in proxy black list"
                ))),
                (true, None) => self
                    .dispatcher
                    .resolve(&call.payload)
                    .and_then(|resolved| state.debit(call.payload.cycles).map(|()| resolved))
                    .map_err(|e| Resolution::Approved(Err(e.to_string()))),
            };
            match settled {
                Ok(resolved) => (call, resolved),
                Err(resolution) => {
                    return Ok(state
                        .queue
                        .record(hash, resolution.clone())
                        .unwrap_or(resolution));
                }
            }
        };

        info!(
            hash = %hash,
            target = %call.payload.target,
            method = %call.payload.method_name,
            "executing approved call"
        );
        let outcome = self.dispatcher.execute(resolved, &call.payload).await;

        let mut state = self.state.lock().await;
        if outcome.is_err() && call.payload.cycles > 0 {
            state.refund(call.payload.cycles);
        }
        let resolution = Resolution::Approved(outcome.map_err(|e| e.to_string()));
        Ok(state
            .queue
            .record(hash, resolution.clone())
            .unwrap_or(resolution))
    }

    /// Current reply for a hash: `None` if unknown or reclaimed,
    /// `Some(NotFound)` while pending, otherwise the resolution.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::Unauthorized`] unless `caller` is an owner or
    /// holds a live grant.
    pub async fn get_queue_reply(
        &self,
        caller: &Principal,
        hash: &str,
    ) -> Result<Option<Resolution>, WalletError> {
        let now = self.clock.now();
        let state = self.state.lock().await;
        state.require_user(caller, now)?;
        Ok(state.queue.reply(hash))
    }

    /// Pending calls issued by `user`, for audit and recovery.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::NotOwner`] if `caller` is not an owner.
    pub async fn get_queue_unconfirmed(
        &self,
        caller: &Principal,
        user: &Principal,
    ) -> Result<Vec<QueueHash>, WalletError> {
        let state = self.state.lock().await;
        state.require_owner(caller)?;
        Ok(state.queue.unconfirmed(user))
    }

    /// Whether the queue holds a hash in any state.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::Unauthorized`] unless `caller` is an owner or
    /// holds a live grant.
    pub async fn has_queue_method(&self, caller: &Principal, hash: &str) -> Result<bool, WalletError> {
        let now = self.clock.now();
        let state = self.state.lock().await;
        state.require_user(caller, now)?;
        Ok(state.queue.contains(hash))
    }

    /// Reclaim a queue entry. `Ok(false)` if it was already absent.
    ///
    /// # Errors
    ///
    /// - [`WalletError::Unauthorized`] unless `caller` is an owner or holds a
    ///   live grant
    /// - [`WalletError::NotAuthorizedExecution`] if `caller` is neither an
    ///   owner nor the principal that issued the call
    pub async fn remove_queue_method(
        &self,
        caller: &Principal,
        hash: &str,
    ) -> Result<bool, WalletError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        state.require_user(caller, now)?;
        let Some(call) = state.queue.get(hash) else {
            return Ok(false);
        };
        if !state.owners.contains(caller) && &call.user != caller {
            return Err(WalletError::NotAuthorizedExecution);
        }
        Ok(state.queue.remove(hash).is_some())
    }

    /// Change the default period for future grants.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::NotOwner`] if `caller` is not an owner.
    pub async fn set_expiry_period(&self, caller: &Principal, period: Nanos) -> Result<(), WalletError> {
        let mut state = self.state.lock().await;
        state.require_owner(caller)?;
        info!(period, "default expiry period updated");
        state.store.set_expiry_period(period);
        Ok(())
    }

    /// Switch the validation mode.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::NotOwner`] if `caller` is not an owner.
    pub async fn set_method_validate_type(
        &self,
        caller: &Principal,
        mode: ValidationMode,
    ) -> Result<(), WalletError> {
        let mut state = self.state.lock().await;
        state.require_owner(caller)?;
        info!(mode = ?mode, "validation mode updated");
        state.store.set_method_validate_type(mode);
        Ok(())
    }

    /// Flag or unflag `method_name` on `target` as a key operation for all
    /// principals.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::NotOwner`] if `caller` is not an owner.
    pub async fn set_method_key_operation(
        &self,
        caller: &Principal,
        target: Principal,
        method_name: &str,
        key: bool,
    ) -> Result<(), WalletError> {
        let mut state = self.state.lock().await;
        state.require_owner(caller)?;
        state
            .store
            .set_key_operation(target, method_name.to_owned(), key);
        Ok(())
    }

    /// Add cycles to the wallet balance. Returns the new balance.
    pub async fn deposit_cycles(&self, amount: u128) -> u128 {
        let mut state = self.state.lock().await;
        state.refund(amount);
        state.balance
    }

    /// Current cycle balance.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::NotOwner`] if `caller` is not an owner.
    pub async fn balance_get(&self, caller: &Principal) -> Result<u128, WalletError> {
        let state = self.state.lock().await;
        state.require_owner(caller)?;
        Ok(state.balance)
    }
}
