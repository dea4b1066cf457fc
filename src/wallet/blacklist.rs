//! Proxy deny-list, checked before any other authorization logic.
//!
//! Membership never touches grants: a blacklisted principal keeps its grant
//! and regains access as soon as it is removed from the list.

use std::collections::BTreeSet;

use crate::types::Principal;

/// Set of principals barred from the proxy.
#[derive(Debug, Clone, Default)]
pub struct Blacklist {
    entries: BTreeSet<Principal>,
}

impl Blacklist {
    /// Empty blacklist.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a principal. Idempotent; returns the principal's text as ack.
    pub fn add(&mut self, principal: Principal) -> String {
        let ack = principal.to_string();
        self.entries.insert(principal);
        ack
    }

    /// Remove a principal. Returns its text if it was listed.
    pub fn remove(&mut self, principal: &Principal) -> Option<String> {
        self.entries
            .remove(principal)
            .then(|| principal.to_string())
    }

    /// Whether a principal is listed.
    pub fn contains(&self, principal: &Principal) -> bool {
        self.entries.contains(principal)
    }

    /// Number of listed principals.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
