//! Method registry: derives method metadata from a target's declared interface.
//!
//! [`classify`] is the pure transform from an [`Interface`] to the ordered
//! [`Method`] list used in grants. [`MethodTable`] keeps the argument and
//! result schemas next to each method so callers can encode, invoke and
//! decode through a single generic entry point.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::codec::ValueType;
use crate::types::{CallKind, Method};

/// Declared signature of one target method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionSignature {
    /// Method name.
    pub name: String,
    /// Argument schema.
    pub args: Vec<ValueType>,
    /// Result schema.
    pub results: Vec<ValueType>,
    /// Call annotation (`query`, `composite`, `oneway`, `update`), if any.
    #[serde(default)]
    pub annotation: Option<String>,
}

/// A target's declared interface, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interface {
    /// Declared functions.
    pub functions: Vec<FunctionSignature>,
}

impl Interface {
    /// Empty interface.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a function declaration, builder style.
    pub fn function(
        mut self,
        name: impl Into<String>,
        args: Vec<ValueType>,
        results: Vec<ValueType>,
        annotation: Option<&str>,
    ) -> Self {
        self.functions.push(FunctionSignature {
            name: name.into(),
            args,
            results,
            annotation: annotation.map(str::to_owned),
        });
        self
    }

    /// Find a declared function by name.
    pub fn get(&self, name: &str) -> Option<&FunctionSignature> {
        self.functions.iter().find(|f| f.name == name)
    }
}

/// Map a call annotation to its [`CallKind`]. Unknown annotations are updates.
pub fn call_kind_for(annotation: Option<&str>) -> CallKind {
    match annotation.unwrap_or("") {
        "query" => CallKind::Query,
        "composite" | "composite_query" => CallKind::CompositeQuery,
        "oneway" => CallKind::OneWay,
        _ => CallKind::Call,
    }
}

/// Derive the ordered method list for an interface. Key flags start cleared.
///
/// Duplicate names resolve as in [`MethodTable::from_interface`].
pub fn classify(interface: &Interface) -> Vec<Method> {
    MethodTable::from_interface(interface).methods()
}

/// A classified method together with its schemas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodEntry {
    /// Method metadata.
    pub method: Method,
    /// Argument schema.
    pub args: Vec<ValueType>,
    /// Result schema.
    pub results: Vec<ValueType>,
}

/// Static name → {schema, call kind} table built from an interface.
#[derive(Debug, Clone, Default)]
pub struct MethodTable {
    entries: Vec<MethodEntry>,
    index: HashMap<String, usize>,
}

impl MethodTable {
    /// Build the table for an interface. A later duplicate name replaces the
    /// earlier declaration but keeps its position.
    pub fn from_interface(interface: &Interface) -> Self {
        let mut table = Self::default();
        for f in &interface.functions {
            let entry = MethodEntry {
                method: Method::new(f.name.clone(), call_kind_for(f.annotation.as_deref())),
                args: f.args.clone(),
                results: f.results.clone(),
            };
            match table.index.get(&f.name) {
                Some(&pos) => table.entries[pos] = entry,
                None => {
                    table.index.insert(f.name.clone(), table.entries.len());
                    table.entries.push(entry);
                }
            }
        }
        table
    }

    /// Look up a method by name.
    pub fn get(&self, name: &str) -> Option<&MethodEntry> {
        self.index.get(name).and_then(|&pos| self.entries.get(pos))
    }

    /// Methods in declaration order.
    pub fn methods(&self) -> Vec<Method> {
        self.entries.iter().map(|e| e.method.clone()).collect()
    }

    /// Number of methods.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table has no methods.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
