//! Schema constructors and schema-level transformations.
//!
//! A `Schema<A>` is a Meta tree tagged with the static type `A` it describes.
//! Nothing here compiles anything; see `compiler` and `guard`.
//!
//! The unbounded primitives (`string`, `number`, `boolean`, `undefined`) hand
//! out one shared node each, so a compiler caches a single guard for them.
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use once_cell::sync::Lazy;
use serde_json::Value;

use crate::annotation::builtin;
use crate::error::GuardError;
use crate::meta::{Annotation, Field, IndexSignature, LazyMeta, Literal, Meta, MetaRef, Symbol};

pub struct Schema<A = Value> {
    meta: MetaRef,
    _type: PhantomData<fn() -> A>,
}

impl<A> Schema<A> {
    pub fn from_meta(meta: MetaRef) -> Self {
        Self { meta, _type: PhantomData }
    }
    pub fn meta(&self) -> &MetaRef {
        &self.meta
    }
    pub fn into_meta(self) -> MetaRef {
        self.meta
    }
    /// Attach a different static type to the same Meta tree.
    pub fn typed<B>(self) -> Schema<B> {
        Schema::from_meta(self.meta)
    }
    pub fn erase(self) -> Schema {
        self.typed()
    }
}

/// Anything that carries a Meta tree: schemas and guards.
pub trait AsMeta {
    fn as_meta(&self) -> &MetaRef;

    fn to_schema(&self) -> Schema {
        Schema::from_meta(self.as_meta().clone())
    }
}

impl<A> AsMeta for Schema<A> {
    fn as_meta(&self) -> &MetaRef {
        &self.meta
    }
}

impl<A> Clone for Schema<A> {
    fn clone(&self) -> Self {
        Self::from_meta(self.meta.clone())
    }
}

impl<A> fmt::Debug for Schema<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Schema").field(&self.meta).finish()
    }
}

// ————————————————————————————————————————————————————————————————————————————
// CONSTRUCTORS
// ————————————————————————————————————————————————————————————————————————————

static STRING: Lazy<MetaRef> = Lazy::new(|| Meta::String { min_length: None, max_length: None }.into_ref());
static NUMBER: Lazy<MetaRef> = Lazy::new(|| Meta::Number { minimum: None, maximum: None }.into_ref());
static BOOLEAN: Lazy<MetaRef> = Lazy::new(|| Meta::Boolean.into_ref());
static UNDEFINED: Lazy<MetaRef> = Lazy::new(|| Meta::Of { value: Literal::Undefined }.into_ref());

pub fn string() -> Schema<String> {
    Schema::from_meta(Arc::clone(&STRING))
}

pub fn number() -> Schema<f64> {
    Schema::from_meta(Arc::clone(&NUMBER))
}

pub fn boolean() -> Schema<bool> {
    Schema::from_meta(Arc::clone(&BOOLEAN))
}

pub fn of(value: impl Into<Value>) -> Schema {
    Schema::from_meta(Meta::Of { value: Literal::Json(value.into()) }.into_ref())
}

/// Matches only an absent property or tuple slot.
pub fn undefined() -> Schema<()> {
    Schema::from_meta(Arc::clone(&UNDEFINED))
}

pub fn tuple(components: impl IntoIterator<Item = Schema>, rest_element: Option<Schema>) -> Schema {
    Schema::from_meta(
        Meta::Tuple {
            components: components.into_iter().map(Schema::into_meta).collect(),
            rest_element: rest_element.map(Schema::into_meta),
        }
        .into_ref(),
    )
}

pub fn union(members: impl IntoIterator<Item = Schema>) -> Schema {
    Schema::from_meta(
        Meta::Union { members: members.into_iter().map(Schema::into_meta).collect() }.into_ref(),
    )
}

pub fn struct_<K: Into<String>>(fields: impl IntoIterator<Item = (K, Schema)>) -> Schema {
    let fields = fields
        .into_iter()
        .map(|(key, schema)| Field { key: key.into(), value: schema.into_meta() })
        .collect();
    Schema::from_meta(Meta::Struct { fields, index_signature: None }.into_ref())
}

/// A keyed container whose every value satisfies `value`.
pub fn index_signature(value: Schema) -> Schema {
    Schema::from_meta(
        Meta::Struct {
            fields: Vec::new(),
            index_signature: Some(IndexSignature { value: value.into_meta() }),
        }
        .into_ref(),
    )
}

/// Add or replace the index signature of a struct schema.
pub fn with_index_signature(schema: &Schema, value: Schema) -> Result<Schema, GuardError> {
    match schema.meta().as_ref() {
        Meta::Struct { fields, .. } => Ok(Schema::from_meta(
            Meta::Struct {
                fields: fields.clone(),
                index_signature: Some(IndexSignature { value: value.into_meta() }),
            }
            .into_ref(),
        )),
        other => Err(GuardError::UnsupportedMeta { operation: "index_signature", tag: other.tag() }),
    }
}

pub fn readonly_array(item: Schema) -> Schema {
    tuple(Vec::new(), Some(item))
}

/// A deferred reference. `symbol` must be the same on every evaluation of
/// `f` for recursion to terminate.
pub fn lazy<F>(symbol: Symbol, f: F) -> Schema
where
    F: Fn() -> Schema + Send + Sync + 'static,
{
    Schema::from_meta(Meta::Lazy(LazyMeta::new(symbol, move || f().into_meta())).into_ref())
}

pub fn apply(symbol: Symbol, metas: impl IntoIterator<Item = Schema>, annotations: Vec<Annotation>) -> Schema {
    Schema::from_meta(
        Meta::Apply {
            symbol,
            metas: metas.into_iter().map(Schema::into_meta).collect(),
            annotations,
        }
        .into_ref(),
    )
}

// ————————————————————————————————————————————————————————————————————————————
// REFINEMENTS
// ————————————————————————————————————————————————————————————————————————————
//
// Bounds overwrite the matching field of a String/Number node. Any other node
// is wrapped in an `Apply` carrying the built-in refinement annotation.

pub fn min_length<A>(schema: &Schema<A>, n: usize) -> Schema<A> {
    Schema::from_meta(refine_length(schema.meta(), Some(n), None, builtin::MIN_LENGTH, n))
}

pub fn max_length<A>(schema: &Schema<A>, n: usize) -> Schema<A> {
    Schema::from_meta(refine_length(schema.meta(), None, Some(n), builtin::MAX_LENGTH, n))
}

pub fn minimum<A>(schema: &Schema<A>, n: f64) -> Schema<A> {
    Schema::from_meta(refine_magnitude(schema.meta(), Some(n), None, builtin::MINIMUM, n))
}

pub fn maximum<A>(schema: &Schema<A>, n: f64) -> Schema<A> {
    Schema::from_meta(refine_magnitude(schema.meta(), None, Some(n), builtin::MAXIMUM, n))
}

fn refine_length(meta: &MetaRef, min: Option<usize>, max: Option<usize>, tag: &str, n: usize) -> MetaRef {
    match meta.as_ref() {
        Meta::String { min_length, max_length } => Meta::String {
            min_length: min.or(*min_length),
            max_length: max.or(*max_length),
        }
        .into_ref(),
        _ => wrap_refinement(meta, Annotation::new(tag).with_params(n)),
    }
}

fn refine_magnitude(meta: &MetaRef, min: Option<f64>, max: Option<f64>, tag: &str, n: f64) -> MetaRef {
    match meta.as_ref() {
        Meta::Number { minimum, maximum } => Meta::Number {
            minimum: min.or(*minimum),
            maximum: max.or(*maximum),
        }
        .into_ref(),
        _ => wrap_refinement(meta, Annotation::new(tag).with_params(n)),
    }
}

fn wrap_refinement(meta: &MetaRef, annotation: Annotation) -> MetaRef {
    Meta::Apply {
        symbol: Symbol::new(&annotation.tag),
        metas: vec![meta.clone()],
        annotations: vec![annotation],
    }
    .into_ref()
}

// ————————————————————————————————————————————————————————————————————————————
// STRUCTURAL
// ————————————————————————————————————————————————————————————————————————————

/// `schema | undefined`
pub fn optional<A>(schema: &Schema<A>) -> Schema<Option<A>> {
    Schema::from_meta(
        Meta::Union { members: vec![schema.meta().clone(), undefined().into_meta()] }.into_ref(),
    )
}

/// Keep only `keys` (in declaration order). The index signature is dropped.
pub fn pick<A, K: AsRef<str>>(schema: &Schema<A>, keys: &[K]) -> Result<Schema, GuardError> {
    match schema.meta().as_ref() {
        Meta::Struct { fields, .. } => {
            let fields = fields
                .iter()
                .filter(|f| keys.iter().any(|k| k.as_ref() == f.key))
                .cloned()
                .collect();
            Ok(Schema::from_meta(Meta::Struct { fields, index_signature: None }.into_ref()))
        }
        other => Err(GuardError::UnsupportedMeta { operation: "pick", tag: other.tag() }),
    }
}

/// Remove `keys`. The index signature is kept.
pub fn omit<A, K: AsRef<str>>(schema: &Schema<A>, keys: &[K]) -> Result<Schema, GuardError> {
    match schema.meta().as_ref() {
        Meta::Struct { fields, index_signature } => {
            let fields = fields
                .iter()
                .filter(|f| !keys.iter().any(|k| k.as_ref() == f.key))
                .cloned()
                .collect();
            Ok(Schema::from_meta(
                Meta::Struct { fields, index_signature: index_signature.clone() }.into_ref(),
            ))
        }
        other => Err(GuardError::UnsupportedMeta { operation: "omit", tag: other.tag() }),
    }
}

// ————————————————————————————————————————————————————————————————————————————
// TESTS
// ————————————————————————————————————————————————————————————————————————————
