//! Meta tree: the immutable, tagged description of a data shape.
//!
//! Nodes are shared through `Arc` (`MetaRef`). The allocation is the node's
//! identity: the compiler memoizes on it, so two structurally equal nodes
//! built separately are distinct.
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub type MetaRef = Arc<Meta>;

// ————————————————————————————————————————————————————————————————————————————
// TYPES
// ————————————————————————————————————————————————————————————————————————————

#[derive(Debug, Clone)]
pub enum Meta {
    String { min_length: Option<usize>, max_length: Option<usize> },
    Number { minimum: Option<f64>, maximum: Option<f64> },
    Boolean,
    /// literal singleton
    Of { value: Literal },
    Tuple { components: Vec<MetaRef>, rest_element: Option<MetaRef> },
    Union { members: Vec<MetaRef> },
    Struct { fields: Vec<Field>, index_signature: Option<IndexSignature> },
    /// deferred reference, used for recursive shapes
    Lazy(LazyMeta),
    /// extension point resolved through the annotation registry
    Apply { symbol: Symbol, metas: Vec<MetaRef>, annotations: Vec<Annotation> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    /// An absent property or tuple slot.
    Undefined,
    Json(Value),
}

#[derive(Debug, Clone)]
pub struct Field {
    pub key: String,
    pub value: MetaRef,
}

#[derive(Debug, Clone)]
pub struct IndexSignature {
    pub value: MetaRef,
}

#[derive(Clone)]
pub struct LazyMeta {
    symbol: Symbol,
    f: Arc<dyn Fn() -> MetaRef + Send + Sync>,
}

/// Unique identity token with a human-readable description.
///
/// Equality and hashing only look at the identity, never the description.
#[derive(Clone)]
pub struct Symbol {
    id: u64,
    description: Arc<str>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub tag: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

// ————————————————————————————————————————————————————————————————————————————
// IMPLEMENTATION
// ————————————————————————————————————————————————————————————————————————————

static NEXT_SYMBOL: AtomicU64 = AtomicU64::new(1);

impl Symbol {
    pub fn new(description: impl AsRef<str>) -> Self {
        Self {
            id: NEXT_SYMBOL.fetch_add(1, Ordering::Relaxed),
            description: Arc::from(description.as_ref()),
        }
    }
    pub fn description(&self) -> &str {
        &self.description
    }
}

impl PartialEq for Symbol {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Symbol {}

impl Hash for Symbol {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({}#{})", self.description, self.id)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description)
    }
}

impl LazyMeta {
    pub fn new<F>(symbol: Symbol, f: F) -> Self
    where
        F: Fn() -> MetaRef + Send + Sync + 'static,
    {
        Self { symbol, f: Arc::new(f) }
    }
    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }
    /// Evaluate the deferred reference. Callers memoize per symbol.
    pub fn force(&self) -> MetaRef {
        (self.f)()
    }
}

impl fmt::Debug for LazyMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyMeta").field("symbol", &self.symbol).finish_non_exhaustive()
    }
}

impl Literal {
    /// Strict equality against a present value. Numbers compare by value.
    pub fn matches(&self, value: &Value) -> bool {
        match (self, value) {
            (Literal::Undefined, _) => false,
            (Literal::Json(Value::Number(a)), Value::Number(b)) => a.as_f64() == b.as_f64(),
            (Literal::Json(expected), actual) => expected == actual,
        }
    }
}

impl From<Value> for Literal {
    fn from(value: Value) -> Self {
        Literal::Json(value)
    }
}

impl Annotation {
    pub fn new(tag: impl Into<String>) -> Self {
        Self { tag: tag.into(), params: Value::Null }
    }
    pub fn with_params(mut self, params: impl Into<Value>) -> Self {
        self.params = params.into();
        self
    }
}

impl Meta {
    pub fn into_ref(self) -> MetaRef {
        Arc::new(self)
    }

    pub fn tag(&self) -> &'static str {
        match self {
            Meta::String { .. } => "String",
            Meta::Number { .. } => "Number",
            Meta::Boolean => "Boolean",
            Meta::Of { .. } => "Of",
            Meta::Tuple { .. } => "Tuple",
            Meta::Union { .. } => "Union",
            Meta::Struct { .. } => "Struct",
            Meta::Lazy(_) => "Lazy",
            Meta::Apply { .. } => "Apply",
        }
    }
}

// ————————————————————————————————————————————————————————————————————————————
// TESTS
// ————————————————————————————————————————————————————————————————————————————
