//! Authorization store: per-principal allow-lists with lazy expiry.
//!
//! Grants are replaced wholesale by [`AuthorizationStore::add_expiry_user`]
//! and never patched. Expiry is evaluated against `expires_at` at check
//! time; [`AuthorizationStore::prune_expired`] only drops grants that are
//! already dead and runs when a new grant is added.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info};

use super::WalletError;
use crate::types::{AuthorizationGrant, Method, Nanos, Principal, ProxyTargets, ValidationMode};

/// Default grant lifetime: seven days.
pub const DEFAULT_EXPIRY_PERIOD: Nanos = 7 * 24 * 60 * 60 * 1_000_000_000;

/// Outcome of checking a principal against the allow-list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessCheck {
    /// No grant recorded.
    NoGrant,
    /// A grant exists but has expired.
    Expired,
    /// The grant does not list the target.
    TargetNotGranted,
    /// The grant lists the target but not the method.
    MethodNotGranted,
    /// Target and method are granted.
    Granted,
}

/// Allow-lists, grant policy and key-operation policy.
#[derive(Debug, Clone)]
pub struct AuthorizationStore {
    grants: BTreeMap<Principal, AuthorizationGrant>,
    expiry_period: Nanos,
    validate_type: ValidationMode,
    key_methods: BTreeSet<(Principal, String)>,
}

impl Default for AuthorizationStore {
    fn default() -> Self {
        Self::new(DEFAULT_EXPIRY_PERIOD, ValidationMode::default())
    }
}

impl AuthorizationStore {
    /// Store with the given default grant period and validation mode.
    pub fn new(expiry_period: Nanos, validate_type: ValidationMode) -> Self {
        Self {
            grants: BTreeMap::new(),
            expiry_period,
            validate_type,
            key_methods: BTreeSet::new(),
        }
    }

    /// Create or replace the grant for `principal`.
    ///
    /// `granted_at` is `now`; `expires_at` is `now` plus the requested
    /// expiration, or the default period when none is given.
    ///
    /// # Errors
    ///
    /// Returns [`WalletError::InvalidGrant`] when the resulting period is zero.
    pub fn add_expiry_user(
        &mut self,
        principal: Principal,
        targets: ProxyTargets,
        now: Nanos,
    ) -> Result<AuthorizationGrant, WalletError> {
        self.prune_expired(now);

        let period = targets.expiration.unwrap_or(self.expiry_period);
        let expires_at = now.saturating_add(period);
        if expires_at <= now {
            return Err(WalletError::InvalidGrant(format!(
                "grant for {principal} would expire at creation"
            )));
        }

        let grant = AuthorizationGrant {
            principal: principal.clone(),
            granted_at: now,
            expires_at,
            targets: targets.targets,
        };

        info!(
            principal = %principal,
            expires_at,
            targets = grant.targets.len(),
            "grant stored"
        );
        self.grants.insert(principal, grant.clone());
        Ok(grant)
    }

    /// Current grant for a principal, live or not.
    pub fn grant(&self, principal: &Principal) -> Option<&AuthorizationGrant> {
        self.grants.get(principal)
    }

    /// Whether the principal holds a grant that is live at `now`.
    pub fn has_live_grant(&self, principal: &Principal, now: Nanos) -> bool {
        self.grants.get(principal).is_some_and(|g| g.is_live(now))
    }

    /// Check `(target, method_name)` against the principal's grant.
    pub fn check(
        &self,
        principal: &Principal,
        target: &Principal,
        method_name: &str,
        now: Nanos,
    ) -> AccessCheck {
        let Some(grant) = self.grants.get(principal) else {
            return AccessCheck::NoGrant;
        };
        if !grant.is_live(now) {
            return AccessCheck::Expired;
        }
        match grant.target(target) {
            None => AccessCheck::TargetNotGranted,
            Some(entry) if entry.method(method_name).is_none() => AccessCheck::MethodNotGranted,
            Some(_) => AccessCheck::Granted,
        }
    }

    /// Whether `method` on `target` may be dispatched directly for `principal`.
    ///
    /// True iff the grant is live, lists the target and method, and the
    /// method is not a key operation. Key operations always go to the queue.
    pub fn is_authorized(
        &self,
        principal: &Principal,
        target: &Principal,
        method: &Method,
        now: Nanos,
    ) -> bool {
        self.check(principal, target, &method.name, now) == AccessCheck::Granted
            && !method.key_operation
            && !self.is_key_operation(principal, target, &method.name)
    }

    /// Whether a method is key-flagged, either by the principal's grant or by
    /// the wallet-wide key policy.
    pub fn is_key_operation(
        &self,
        principal: &Principal,
        target: &Principal,
        method_name: &str,
    ) -> bool {
        if self
            .key_methods
            .contains(&(target.clone(), method_name.to_owned()))
        {
            return true;
        }
        self.grants
            .get(principal)
            .and_then(|g| g.target(target))
            .and_then(|t| t.method(method_name))
            .is_some_and(|m| m.key_operation)
    }

    /// Flag or unflag a method as a key operation for every principal.
    pub fn set_key_operation(&mut self, target: Principal, method_name: String, key: bool) {
        debug!(target = %target, method = %method_name, key, "key policy updated");
        if key {
            self.key_methods.insert((target, method_name));
        } else {
            self.key_methods.remove(&(target, method_name));
        }
    }

    /// Default period for grants created from now on.
    pub fn set_expiry_period(&mut self, period: Nanos) {
        self.expiry_period = period;
    }

    /// Default grant period.
    pub fn expiry_period(&self) -> Nanos {
        self.expiry_period
    }

    /// Switch the validation mode.
    pub fn set_method_validate_type(&mut self, mode: ValidationMode) {
        self.validate_type = mode;
    }

    /// Current validation mode.
    pub fn method_validate_type(&self) -> ValidationMode {
        self.validate_type
    }

    /// Drop grants that are no longer live at `now`. Returns how many.
    pub fn prune_expired(&mut self, now: Nanos) -> usize {
        let before = self.grants.len();
        self.grants.retain(|_, g| g.is_live(now));
        before.saturating_sub(self.grants.len())
    }

    /// Number of stored grants.
    pub fn len(&self) -> usize {
        self.grants.len()
    }

    /// Whether no grants are stored.
    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }
}
