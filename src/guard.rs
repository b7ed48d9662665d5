//! Guards: a Meta node paired with the predicate that validates it.
//!
//! The free functions here compile through the process-wide default
//! compiler (`Compiler::default_compiler`). Use a `Compiler` directly for an
//! isolated cache or a custom annotation registry.
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::compiler::{Compiler, leaf};
use crate::error::GuardError;
use crate::meta::{MetaRef, Symbol};
use crate::schema::{self, AsMeta, Schema};

pub type Predicate = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

pub struct Guard<A = Value> {
    meta: MetaRef,
    predicate: Predicate,
    missing: Missing,
    _type: PhantomData<fn() -> A>,
}

/// Verdict for an absent property or tuple slot.
#[derive(Clone)]
enum Missing {
    Reject,
    Accept,
    /// asked at check time, e.g. of the guard a lazy placeholder resolves to
    When(Arc<dyn Fn() -> bool + Send + Sync>),
}

impl Guard {
    pub fn new<F>(meta: MetaRef, predicate: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        Self::from_predicate(meta, Arc::new(predicate))
    }

    pub(crate) fn from_predicate(meta: MetaRef, predicate: Predicate) -> Self {
        Self::from_parts(meta, predicate, Missing::Reject)
    }
}

impl<A> Guard<A> {
    fn from_parts(meta: MetaRef, predicate: Predicate, missing: Missing) -> Self {
        Self { meta, predicate, missing, _type: PhantomData }
    }

    pub fn is(&self, value: &Value) -> bool {
        (self.predicate)(value)
    }

    /// Check a struct property or tuple slot that may be absent.
    pub fn check(&self, value: Option<&Value>) -> bool {
        match value {
            Some(value) => self.is(value),
            None => self.accepts_missing(),
        }
    }

    /// Whether an absent property or tuple slot satisfies this guard.
    pub fn accepts_missing(&self) -> bool {
        match &self.missing {
            Missing::Reject => false,
            Missing::Accept => true,
            Missing::When(accepts) => accepts(),
        }
    }

    pub fn accepting_missing(mut self) -> Self {
        self.missing = Missing::Accept;
        self
    }

    /// Defer the absent-value verdict to `accepts`, evaluated on every check.
    /// Wrapping guards use this to pass through the verdict of what they wrap.
    pub fn accepting_missing_when<F>(mut self, accepts: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.missing = Missing::When(Arc::new(accepts));
        self
    }

    pub fn meta(&self) -> &MetaRef {
        &self.meta
    }

    pub fn schema(&self) -> Schema<A> {
        Schema::from_meta(self.meta.clone())
    }

    pub fn typed<B>(self) -> Guard<B> {
        Guard::from_parts(self.meta, self.predicate, self.missing)
    }

    pub fn erase(self) -> Guard {
        self.typed()
    }

    /// Same compiled instance (the compiler hands out shared guards).
    pub fn ptr_eq<B>(&self, other: &Guard<B>) -> bool {
        Arc::ptr_eq(&self.predicate, &other.predicate)
    }

    // ---- refinements ----

    pub fn min_length(&self, n: usize) -> Self {
        let meta = schema::min_length(&self.schema(), n).into_meta();
        self.refined(meta, move |v| value_length(v).is_some_and(|len| len >= n))
    }

    pub fn max_length(&self, n: usize) -> Self {
        let meta = schema::max_length(&self.schema(), n).into_meta();
        self.refined(meta, move |v| value_length(v).is_some_and(|len| len <= n))
    }

    pub fn minimum(&self, n: f64) -> Self {
        let meta = schema::minimum(&self.schema(), n).into_meta();
        self.refined(meta, move |v| v.as_f64().is_some_and(|x| x >= n))
    }

    pub fn maximum(&self, n: f64) -> Self {
        let meta = schema::maximum(&self.schema(), n).into_meta();
        self.refined(meta, move |v| v.as_f64().is_some_and(|x| x <= n))
    }

    /// A String/Number leaf is rebuilt from its refined bounds, so setting a
    /// bound twice keeps the last value. Anything else conjoins `check` and
    /// keeps its absent-value verdict.
    fn refined<F>(&self, meta: MetaRef, check: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        match leaf::bounded_predicate(&meta) {
            Some(predicate) => Self::from_parts(meta, predicate, Missing::Reject),
            None => {
                let base = self.predicate.clone();
                let predicate: Predicate = Arc::new(move |v: &Value| base(v) && check(v));
                Self::from_parts(meta, predicate, self.missing.clone())
            }
        }
    }
}

impl<A: DeserializeOwned> Guard<A> {
    /// Deserialize `value` into `A` if the guard accepts it.
    pub fn decode(&self, value: &Value) -> Option<A> {
        if !self.is(value) {
            return None;
        }
        serde_json::from_value(value.clone()).ok()
    }
}

impl<A> Clone for Guard<A> {
    fn clone(&self) -> Self {
        Self::from_parts(self.meta.clone(), self.predicate.clone(), self.missing.clone())
    }
}

impl<A> fmt::Debug for Guard<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Guard")
            .field("meta", &self.meta.tag())
            .field("accepts_missing", &self.accepts_missing())
            .finish_non_exhaustive()
    }
}

impl<A> AsMeta for Guard<A> {
    fn as_meta(&self) -> &MetaRef {
        &self.meta
    }
}

/// Unicode scalar count of a string, element count of an array.
pub fn value_length(value: &Value) -> Option<usize> {
    match value {
        Value::String(s) => Some(s.chars().count()),
        Value::Array(items) => Some(items.len()),
        _ => None,
    }
}

// ————————————————————————————————————————————————————————————————————————————
// DEFAULT-COMPILER ENTRY POINTS
// ————————————————————————————————————————————————————————————————————————————

fn default() -> &'static Compiler {
    Compiler::default_compiler()
}

/// Compile `schema` with the shared, memoized default compiler.
pub fn guard_for<A>(schema: &Schema<A>) -> Result<Guard<A>, GuardError> {
    default().guard_for(schema)
}

pub fn string() -> Guard<String> {
    default().string()
}

pub fn number() -> Guard<f64> {
    default().number()
}

pub fn boolean() -> Guard<bool> {
    default().boolean()
}

pub fn of(value: impl Into<Value>) -> Guard {
    default().of(value)
}

pub fn undefined() -> Guard<()> {
    default().undefined()
}

pub fn tuple(components: &[&dyn AsMeta], rest_element: Option<&dyn AsMeta>) -> Result<Guard, GuardError> {
    default().tuple(components, rest_element)
}

pub fn union(members: &[&dyn AsMeta]) -> Result<Guard, GuardError> {
    default().union(members)
}

pub fn struct_(fields: &[(&str, &dyn AsMeta)]) -> Result<Guard, GuardError> {
    default().struct_(fields)
}

pub fn index_signature(value: &dyn AsMeta) -> Result<Guard, GuardError> {
    default().index_signature(value)
}

pub fn readonly_array(item: &dyn AsMeta) -> Result<Guard, GuardError> {
    default().readonly_array(item)
}

pub fn lazy<F>(symbol: Symbol, f: F) -> Result<Guard, GuardError>
where
    F: Fn() -> Schema + Send + Sync + 'static,
{
    default().guard_for(&schema::lazy(symbol, f))
}

pub fn optional<A>(guard: &Guard<A>) -> Result<Guard<Option<A>>, GuardError> {
    default().optional(guard)
}

pub fn pick<A, K: AsRef<str>>(guard: &Guard<A>, keys: &[K]) -> Result<Guard, GuardError> {
    default().pick(guard, keys)
}

pub fn omit<A, K: AsRef<str>>(guard: &Guard<A>, keys: &[K]) -> Result<Guard, GuardError> {
    default().omit(guard, keys)
}

pub fn map_schema<A, B, F>(guard: &Guard<A>, f: F) -> Result<Guard<B>, GuardError>
where
    F: FnOnce(Schema<A>) -> Schema<B>,
{
    default().map_schema(guard, f)
}

// ————————————————————————————————————————————————————————————————————————————
// TESTS
// ————————————————————————————————————————————————————————————————————————————
