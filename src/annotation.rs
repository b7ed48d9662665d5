//! Annotation registry: the plugin surface for `Apply` nodes.
//!
//! An `Apply` node lists annotations; the compiler looks each tag up here and
//! hands the first registered provider the node, all of its annotations and
//! the compiled guards of its children.
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use regex::Regex;
use serde_json::Value;

use crate::error::GuardError;
use crate::guard::{Guard, value_length};
use crate::meta::{Annotation, MetaRef};

pub trait GuardProvider: Send + Sync {
    fn provide(&self, node: &MetaRef, annotations: &[Annotation], guards: Vec<Guard>) -> Result<Guard, GuardError>;
}

impl<F> GuardProvider for F
where
    F: Fn(&MetaRef, &[Annotation], Vec<Guard>) -> Result<Guard, GuardError> + Send + Sync,
{
    fn provide(&self, node: &MetaRef, annotations: &[Annotation], guards: Vec<Guard>) -> Result<Guard, GuardError> {
        self(node, annotations, guards)
    }
}

#[derive(Clone, Default)]
pub struct AnnotationRegistry {
    providers: HashMap<String, Arc<dyn GuardProvider>>,
}

impl AnnotationRegistry {
    /// An empty registry: every `Apply` node fails to compile.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry
            .register(builtin::NULLABLE, builtin::nullable)
            .register(builtin::INTEGER, builtin::integer)
            .register(builtin::PATTERN, builtin::pattern)
            .register(builtin::MIN_LENGTH, builtin::min_length)
            .register(builtin::MAX_LENGTH, builtin::max_length)
            .register(builtin::MINIMUM, builtin::minimum)
            .register(builtin::MAXIMUM, builtin::maximum);
        registry
    }

    /// Register (or replace) the provider for `tag`.
    pub fn register(&mut self, tag: impl Into<String>, provider: impl GuardProvider + 'static) -> &mut Self {
        self.providers.insert(tag.into(), Arc::new(provider));
        self
    }

    pub fn get(&self, tag: &str) -> Option<&Arc<dyn GuardProvider>> {
        self.providers.get(tag)
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.providers.contains_key(tag)
    }

    /// Registered tags, sorted.
    pub fn tags(&self) -> Vec<&str> {
        let mut tags: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        tags.sort_unstable();
        tags
    }

    /// The first annotation of the node with a registered provider.
    pub(crate) fn resolve<'a>(&'a self, annotations: &'a [Annotation]) -> Option<(&'a Annotation, &'a Arc<dyn GuardProvider>)> {
        annotations.iter().find_map(|a| self.get(&a.tag).map(|p| (a, p)))
    }
}

impl fmt::Debug for AnnotationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnnotationRegistry").field("tags", &self.tags()).finish()
    }
}

// ————————————————————————————————————————————————————————————————————————————
// BUILT-INS
// ————————————————————————————————————————————————————————————————————————————

pub mod builtin {
    use super::*;

    pub const NULLABLE: &str = "nullable";
    pub const INTEGER: &str = "integer";
    pub const PATTERN: &str = "pattern";
    pub const MIN_LENGTH: &str = "minLength";
    pub const MAX_LENGTH: &str = "maxLength";
    pub const MINIMUM: &str = "minimum";
    pub const MAXIMUM: &str = "maximum";

    /// `null` or the single child. An absent value passes when the child lets it.
    pub fn nullable(node: &MetaRef, _: &[Annotation], guards: Vec<Guard>) -> Result<Guard, GuardError> {
        let [inner]: [Guard; 1] = guards
            .try_into()
            .map_err(|gs: Vec<Guard>| GuardError::invalid(NULLABLE, format!("expected 1 child, found {}", gs.len())))?;
        let absent = inner.clone();
        Ok(Guard::new(node.clone(), move |v| v.is_null() || inner.is(v))
            .accepting_missing_when(move || absent.accepts_missing()))
    }

    pub fn integer(node: &MetaRef, _: &[Annotation], guards: Vec<Guard>) -> Result<Guard, GuardError> {
        Ok(refine(node, guards, |v| v.as_f64().is_some_and(|n| n.fract() == 0.0)))
    }

    pub fn pattern(node: &MetaRef, annotations: &[Annotation], guards: Vec<Guard>) -> Result<Guard, GuardError> {
        let source = param(annotations, PATTERN)?
            .as_str()
            .ok_or_else(|| GuardError::invalid(PATTERN, "params must be a regex string"))?;
        let rx = Regex::new(source).map_err(|e| GuardError::invalid(PATTERN, e.to_string()))?;
        Ok(refine(node, guards, move |v| v.as_str().is_some_and(|s| rx.is_match(s))))
    }

    pub fn min_length(node: &MetaRef, annotations: &[Annotation], guards: Vec<Guard>) -> Result<Guard, GuardError> {
        let n = length_param(annotations, MIN_LENGTH)?;
        Ok(refine(node, guards, move |v| value_length(v).is_some_and(|len| len >= n)))
    }

    pub fn max_length(node: &MetaRef, annotations: &[Annotation], guards: Vec<Guard>) -> Result<Guard, GuardError> {
        let n = length_param(annotations, MAX_LENGTH)?;
        Ok(refine(node, guards, move |v| value_length(v).is_some_and(|len| len <= n)))
    }

    pub fn minimum(node: &MetaRef, annotations: &[Annotation], guards: Vec<Guard>) -> Result<Guard, GuardError> {
        let n = number_param(annotations, MINIMUM)?;
        Ok(refine(node, guards, move |v| v.as_f64().is_some_and(|x| x >= n)))
    }

    pub fn maximum(node: &MetaRef, annotations: &[Annotation], guards: Vec<Guard>) -> Result<Guard, GuardError> {
        let n = number_param(annotations, MAXIMUM)?;
        Ok(refine(node, guards, move |v| v.as_f64().is_some_and(|x| x <= n)))
    }

    // ---- helpers ----

    /// Every child accepts and `check` holds. Absent values pass only when
    /// there is at least one child and all of them let it.
    fn refine<F>(node: &MetaRef, guards: Vec<Guard>, check: F) -> Guard
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        let absent = guards.clone();
        Guard::new(node.clone(), move |v| guards.iter().all(|g| g.is(v)) && check(v))
            .accepting_missing_when(move || !absent.is_empty() && absent.iter().all(Guard::accepts_missing))
    }

    fn param<'a>(annotations: &'a [Annotation], tag: &str) -> Result<&'a Value, GuardError> {
        annotations
            .iter()
            .find(|a| a.tag == tag)
            .map(|a| &a.params)
            .ok_or_else(|| GuardError::invalid(tag, "annotation not present on node"))
    }

    fn length_param(annotations: &[Annotation], tag: &str) -> Result<usize, GuardError> {
        param(annotations, tag)?
            .as_u64()
            .and_then(|n| usize::try_from(n).ok())
            .ok_or_else(|| GuardError::invalid(tag, "params must be a non-negative integer"))
    }

    fn number_param(annotations: &[Annotation], tag: &str) -> Result<f64, GuardError> {
        param(annotations, tag)?
            .as_f64()
            .ok_or_else(|| GuardError::invalid(tag, "params must be a number"))
    }
}

// ————————————————————————————————————————————————————————————————————————————
// TESTS
// ————————————————————————————————————————————————————————————————————————————
