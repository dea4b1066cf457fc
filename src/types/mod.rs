//! Shared domain types: principals, method metadata, grants and call payloads.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Nanoseconds since the Unix epoch. All wallet timestamps and periods use it.
pub type Nanos = u64;

/// Opaque, comparable identity of a caller, target or owner.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Principal(String);

impl Principal {
    /// Build a principal from its textual form.
    pub fn from_text(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    /// Textual form of the principal.
    pub fn as_text(&self) -> &str {
        &self.0
    }

    /// Raw bytes fed into call hashes.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Principal {
    fn from(text: &str) -> Self {
        Self::from_text(text)
    }
}

/// How a target method is invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallKind {
    /// State-changing update call.
    #[serde(rename = "CALL")]
    Call,
    /// Read-only query.
    #[serde(rename = "QUERY")]
    Query,
    /// Query that may call other queries.
    #[serde(rename = "CompositeQuery")]
    CompositeQuery,
    /// Fire-and-forget call without a reply.
    #[serde(rename = "OneWay")]
    OneWay,
}

/// A method exposed by a target, as seen by the allow-list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Method {
    /// Method name on the target.
    pub name: String,
    /// Call semantics derived from the target interface.
    pub call_kind: CallKind,
    /// Sensitive methods always go through owner confirmation.
    pub key_operation: bool,
}

impl Method {
    /// Non-key method with the given name and kind.
    pub fn new(name: impl Into<String>, call_kind: CallKind) -> Self {
        Self {
            name: name.into(),
            call_kind,
            key_operation: false,
        }
    }

    /// Same method with the key-operation flag set.
    pub fn key(mut self) -> Self {
        self.key_operation = true;
        self
    }
}

/// One target together with the methods a grant allows on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetEntry {
    /// Target principal.
    pub target: Principal,
    /// Granted methods, in interface order.
    pub methods: Vec<Method>,
}

impl TargetEntry {
    /// Look up a granted method by name.
    pub fn method(&self, name: &str) -> Option<&Method> {
        self.methods.iter().find(|m| m.name == name)
    }
}

/// Argument to `add_expiry_user`: the targets to grant and an optional
/// grant period overriding the wallet default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyTargets {
    /// Targets the principal may call through the wallet.
    pub targets: Vec<TargetEntry>,
    /// Grant lifetime in nanoseconds; `None` uses the wallet default.
    pub expiration: Option<Nanos>,
}

/// Authorization record binding a principal to its permitted targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationGrant {
    /// Authorized principal.
    pub principal: Principal,
    /// When the grant was created.
    pub granted_at: Nanos,
    /// First instant at which the grant is no longer valid.
    pub expires_at: Nanos,
    /// Permitted targets and methods.
    pub targets: Vec<TargetEntry>,
}

impl AuthorizationGrant {
    /// Whether the grant is still valid at `now`.
    pub fn is_live(&self, now: Nanos) -> bool {
        now < self.expires_at
    }

    /// Look up the grant entry for a target.
    pub fn target(&self, target: &Principal) -> Option<&TargetEntry> {
        self.targets.iter().find(|t| &t.target == target)
    }
}

/// A call to forward through the wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallArgs {
    /// Target principal.
    pub target: Principal,
    /// Method to invoke on the target.
    pub method_name: String,
    /// Encoded arguments, typed by the target's declared schema.
    pub args: Vec<u8>,
    /// Cycles attached to the call.
    pub cycles: u128,
}

/// Reply of a forwarded call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallResult {
    /// Encoded result values, typed by the target's declared schema.
    #[serde(rename = "return")]
    pub reply: Vec<u8>,
}

/// Policy switch selecting which calls are checked against the allow-list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationMode {
    /// Every call is checked.
    #[default]
    #[serde(rename = "ALL")]
    All,
    /// Only key operations are checked.
    #[serde(rename = "KEY")]
    Key,
    /// Only state-changing `CALL` methods are checked.
    #[serde(rename = "UPDATE")]
    Update,
}

impl ValidationMode {
    /// Whether a call of `kind` needs an allow-list check under this mode.
    ///
    /// Key operations are checked under every mode.
    pub fn requires_check(self, kind: CallKind, key_operation: bool) -> bool {
        if key_operation {
            return true;
        }
        match self {
            Self::All => true,
            Self::Key => false,
            Self::Update => kind == CallKind::Call,
        }
    }
}

impl FromStr for ValidationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ALL" => Ok(Self::All),
            "KEY" => Ok(Self::Key),
            "UPDATE" => Ok(Self::Update),
            other => Err(format!("unknown validation mode: {other}")),
        }
    }
}
