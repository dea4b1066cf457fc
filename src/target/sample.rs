//! Sample target with one update, one key-style update and one query method.
//!
//! Every method takes a `TestArgs` record and returns `opt text`. The update
//! methods reply `"value"`, the query replies `"query"`.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use super::{Target, TargetFailure, TargetRequest};
use crate::codec::{self, Field, ValueType};
use crate::registry::Interface;

/// Reject code used when the sample target cannot decode its arguments.
const REJECT_CANISTER_ERROR: u8 = 5;

/// Schema of the sample methods' single argument.
pub fn test_args_type() -> ValueType {
    ValueType::Record(vec![
        Field::new(
            "map",
            ValueType::vec(ValueType::Tuple(vec![ValueType::Nat32, ValueType::Bool])),
        ),
        Field::new("pid", ValueType::Principal),
        Field::new("str", ValueType::Text),
        Field::new("bytes", ValueType::Blob),
    ])
}

/// A well-formed `TestArgs` value.
pub fn test_args(pid: &str, text: &str) -> Value {
    json!({
        "map": [[0, true], [1, false]],
        "pid": pid,
        "str": text,
        "bytes": [0, 1, 2, 3, 4]
    })
}

/// The sample actor.
#[derive(Debug, Default)]
pub struct SampleTarget {
    calls: AtomicUsize,
}

impl SampleTarget {
    /// New sample target with a zero call counter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of calls that reached a method body.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Target for SampleTarget {
    fn interface(&self) -> Interface {
        let ret = vec![ValueType::opt(ValueType::Text)];
        Interface::new()
            .function("test_call", vec![test_args_type()], ret.clone(), None)
            .function("test_call_key", vec![test_args_type()], ret.clone(), None)
            .function("test_query", vec![test_args_type()], ret, Some("query"))
    }

    async fn call(&self, request: TargetRequest) -> Result<Vec<u8>, TargetFailure> {
        let reply = match request.method_name.as_str() {
            "test_call" | "test_call_key" => "value",
            "test_query" => "query",
            other => {
                return Err(TargetFailure::new(
                    3,
                    format!("Canister has no update method '{other}'"),
                ))
            }
        };

        let args = codec::decode(&[test_args_type()], &request.args)
            .map_err(|e| TargetFailure::new(REJECT_CANISTER_ERROR, e.to_string()))?;
        self.calls.fetch_add(1, Ordering::SeqCst);

        info!(
            method = %request.method_name,
            caller = %request.caller,
            text = args[0].get("str").and_then(serde_json::Value::as_str).unwrap_or_default(),
            "sample target called"
        );

        codec::encode(&[ValueType::opt(ValueType::Text)], &[json!(reply)])
            .map_err(|e| TargetFailure::new(REJECT_CANISTER_ERROR, e.to_string()))
    }
}
