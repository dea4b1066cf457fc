//! Confirmation queue for deferred calls awaiting an owner decision.
//!
//! Lifecycle of an entry: `Pending → Executing → Approved | Rejected →
//! reclaimed`. An approved call is claimed with [`ConfirmationQueue::begin`]
//! before it runs, so it runs at most once. A resolution is recorded at most
//! once; later confirmations return the stored resolution unchanged. Entries
//! stay until explicitly reclaimed.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::info;

use crate::types::{CallArgs, CallResult, Nanos, Principal};

/// Owner decision on a deferred call, as seen by pollers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    /// The owner approved; holds the target's reply or its failure text.
    Approved(Result<CallResult, String>),
    /// The owner rejected the call.
    Rejected(String),
    /// No decision has been recorded.
    NotFound,
}

/// A call deferred for owner confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingCall {
    /// Content-derived identifier.
    pub hash: String,
    /// Principal that issued the call.
    pub user: Principal,
    /// The call as submitted.
    pub payload: CallArgs,
    /// When the call was deferred.
    pub created_at: Nanos,
}

/// Audit view of a pending call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueHash {
    /// Call identifier.
    pub hash: String,
    /// Principal that issued the call.
    pub user: Principal,
    /// When the call was deferred.
    pub created_at: Nanos,
}

#[derive(Debug, Clone)]
struct QueueEntry {
    call: PendingCall,
    resolution: Option<Resolution>,
    executing: bool,
}

impl QueueEntry {
    fn awaiting_decision(&self) -> bool {
        self.resolution.is_none() && !self.executing
    }
}

/// Deferred calls keyed by hash.
#[derive(Debug, Clone, Default)]
pub struct ConfirmationQueue {
    entries: BTreeMap<String, QueueEntry>,
    sequence: u64,
}

/// Derive the identifier of a deferred call.
///
/// `sequence` is a wallet-wide counter, so two identical calls deferred
/// within the same clock tick still get distinct hashes.
pub fn hash_call(user: &Principal, payload: &CallArgs, created_at: Nanos, sequence: u64) -> String {
    let mut sha = Sha256::new();
    sha.update(user.as_bytes());
    sha.update([0u8]);
    sha.update(payload.target.as_bytes());
    sha.update([0u8]);
    sha.update(payload.method_name.as_bytes());
    sha.update([0u8]);
    sha.update(&payload.args);
    sha.update(created_at.to_be_bytes());
    sha.update(sequence.to_be_bytes());
    hex::encode(sha.finalize())
}

impl ConfirmationQueue {
    /// Empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Defer a call and return its hash.
    pub fn enqueue(&mut self, user: Principal, payload: CallArgs, now: Nanos) -> String {
        self.sequence = self.sequence.wrapping_add(1);
        let hash = hash_call(&user, &payload, now, self.sequence);

        info!(
            hash = %hash,
            user = %user,
            target = %payload.target,
            method = %payload.method_name,
            "call deferred for owner confirmation"
        );

        self.entries.entry(hash.clone()).or_insert(QueueEntry {
            call: PendingCall {
                hash: hash.clone(),
                user,
                payload,
                created_at: now,
            },
            resolution: None,
            executing: false,
        });
        hash
    }

    /// The call behind a hash, in any state.
    pub fn get(&self, hash: &str) -> Option<&PendingCall> {
        self.entries.get(hash).map(|e| &e.call)
    }

    /// The call behind a hash if it is still awaiting a decision.
    pub fn pending(&self, hash: &str) -> Option<&PendingCall> {
        self.entries
            .get(hash)
            .filter(|e| e.awaiting_decision())
            .map(|e| &e.call)
    }

    /// Claim a call awaiting a decision. Returns `None` if the hash is
    /// unknown, resolved, or already claimed; the claim ends when a
    /// resolution is recorded.
    pub fn begin(&mut self, hash: &str) -> Option<PendingCall> {
        let entry = self
            .entries
            .get_mut(hash)
            .filter(|e| e.awaiting_decision())?;
        entry.executing = true;
        Some(entry.call.clone())
    }

    /// Recorded resolution, if any.
    pub fn resolution(&self, hash: &str) -> Option<&Resolution> {
        self.entries.get(hash).and_then(|e| e.resolution.as_ref())
    }

    /// Record the resolution of a pending call.
    ///
    /// Returns the stored resolution: the new one if the call was pending,
    /// the earlier one if it was already resolved, `None` if unknown.
    pub fn record(&mut self, hash: &str, resolution: Resolution) -> Option<Resolution> {
        let entry = self.entries.get_mut(hash)?;
        match &entry.resolution {
            Some(existing) => Some(existing.clone()),
            None => {
                info!(hash = %hash, approved = matches!(resolution, Resolution::Approved(_)), "resolution recorded");
                entry.resolution = Some(resolution.clone());
                entry.executing = false;
                Some(resolution)
            }
        }
    }

    /// Poll view: `None` for unknown or reclaimed hashes, `Some(NotFound)`
    /// while pending, otherwise the recorded resolution.
    pub fn reply(&self, hash: &str) -> Option<Resolution> {
        self.entries.get(hash).map(|e| {
            e.resolution
                .clone()
                .unwrap_or(Resolution::NotFound)
        })
    }

    /// Whether a hash is held in any state.
    pub fn contains(&self, hash: &str) -> bool {
        self.entries.contains_key(hash)
    }

    /// Reclaim an entry. Returns the call if it was present.
    pub fn remove(&mut self, hash: &str) -> Option<PendingCall> {
        let removed = self.entries.remove(hash).map(|e| e.call);
        if removed.is_some() {
            info!(hash = %hash, "queue entry reclaimed");
        }
        removed
    }

    /// Pending calls issued by `user`, oldest first.
    pub fn unconfirmed(&self, user: &Principal) -> Vec<QueueHash> {
        let mut out: Vec<QueueHash> = self
            .entries
            .values()
            .filter(|e| e.awaiting_decision() && &e.call.user == user)
            .map(|e| QueueHash {
                hash: e.call.hash.clone(),
                user: e.call.user.clone(),
                created_at: e.call.created_at,
            })
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.hash.cmp(&b.hash)));
        out
    }

    /// Number of entries in any state.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
