//! The compiler: Meta tree → Guard.
//!
//! `go` is a structural interpreter over the tagged tree. Results are
//! memoized per node identity, and lazy references per symbol, inside the
//! compiler. The cache sits behind a re-entrant lock: compilation recurses
//! on the same thread while other threads wait, so every node is compiled at
//! most once per compiler.
//!
//! Each cached node also records its *reach*: the lazy symbols it can get to
//! without passing through a tuple or struct. A lazy whose resolved node
//! reaches its own symbol would recurse forever in `is`, so binding it fails
//! with `UnguardedRecursion`.
use std::cell::RefCell;
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use once_cell::sync::OnceCell;
use parking_lot::ReentrantMutex;
use serde_json::Value;
use tracing::{debug, trace};

use crate::annotation::AnnotationRegistry;
use crate::error::GuardError;
use crate::guard::Guard;
use crate::meta::{Field, IndexSignature, LazyMeta, Literal, Meta, MetaRef, Symbol};
use crate::schema::{self, AsMeta, Schema};

#[derive(Clone)]
pub struct Compiler {
    inner: Arc<Inner>,
}

struct Inner {
    registry: AnnotationRegistry,
    cache: ReentrantMutex<RefCell<Cache>>,
}

type Reach = Arc<HashSet<Symbol>>;

/// Insertion-ordered so a failed lazy can roll back everything compiled
/// since its placeholder was registered.
#[derive(Default)]
struct Cache {
    /// keyed by `Arc` address; the entry pins the allocation
    nodes: IndexMap<usize, Compiled>,
    lazies: IndexMap<Symbol, Compiled>,
}

#[derive(Clone)]
struct Compiled {
    meta: MetaRef,
    guard: Guard,
    reach: Reach,
}

static DEFAULT_COMPILER: OnceCell<Compiler> = OnceCell::new();

fn node_key(meta: &MetaRef) -> usize {
    Arc::as_ptr(meta).addr()
}

// ————————————————————————————————————————————————————————————————————————————
// FRONT API
// ————————————————————————————————————————————————————————————————————————————

impl Compiler {
    /// A compiler with the built-in annotation providers and an empty cache.
    pub fn new() -> Self {
        Self::with_registry(AnnotationRegistry::with_builtins())
    }

    pub fn with_registry(registry: AnnotationRegistry) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry,
                cache: ReentrantMutex::new(RefCell::new(Cache::default())),
            }),
        }
    }

    /// The process-wide compiler behind `guard::guard_for`.
    pub fn default_compiler() -> &'static Compiler {
        DEFAULT_COMPILER.get_or_init(Compiler::new)
    }

    pub fn registry(&self) -> &AnnotationRegistry {
        &self.inner.registry
    }

    pub fn guard_for<A>(&self, schema: &Schema<A>) -> Result<Guard<A>, GuardError> {
        self.compile(schema.meta()).map(Guard::typed)
    }

    pub fn compile(&self, meta: &MetaRef) -> Result<Guard, GuardError> {
        self.compile_node(meta).map(|compiled| compiled.guard)
    }

    /// Number of node-identity entries in the cache.
    pub fn cached_nodes(&self) -> usize {
        self.inner.cache.lock().borrow().nodes.len()
    }

    pub fn clear_cache(&self) {
        let lock = self.inner.cache.lock();
        let mut cache = lock.borrow_mut();
        cache.nodes.clear();
        cache.lazies.clear();
    }

    fn compile_node(&self, meta: &MetaRef) -> Result<Compiled, GuardError> {
        let _lock = self.inner.cache.lock();
        if let Some(compiled) = self.lookup(meta) {
            trace!(tag = meta.tag(), "guard cache hit");
            return Ok(compiled);
        }
        debug!(tag = meta.tag(), "compiling meta node");
        let (guard, reach) = self.go(meta)?;
        Ok(self.remember(Compiled { meta: meta.clone(), guard, reach }))
    }

    fn lookup(&self, meta: &MetaRef) -> Option<Compiled> {
        let lock = self.inner.cache.lock();
        let cache = lock.borrow();
        cache.nodes.get(&node_key(meta)).cloned()
    }

    /// Cache `compiled` unless its node already has an entry; return the cached one.
    fn remember(&self, compiled: Compiled) -> Compiled {
        let lock = self.inner.cache.lock();
        let mut cache = lock.borrow_mut();
        let key = node_key(&compiled.meta);
        cache.nodes.entry(key).or_insert(compiled).clone()
    }

    /// Guard of a shared primitive node, built on first use.
    fn leaf(&self, meta: MetaRef, build: fn(&MetaRef) -> Guard) -> Guard {
        if let Some(compiled) = self.lookup(&meta) {
            return compiled.guard;
        }
        let guard = build(&meta);
        self.remember(Compiled { meta, guard, reach: Reach::default() }).guard
    }
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Compiler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Compiler")
            .field("registry", &self.inner.registry)
            .field("cached_nodes", &self.cached_nodes())
            .finish()
    }
}

// ————————————————————————————————————————————————————————————————————————————
// GO
// ————————————————————————————————————————————————————————————————————————————

impl Compiler {
    fn go(&self, meta: &MetaRef) -> Result<(Guard, Reach), GuardError> {
        match meta.as_ref() {
            Meta::Apply { symbol, metas, annotations } => {
                let Some((annotation, provider)) = self.inner.registry.resolve(annotations) else {
                    return Err(GuardError::MissingAnnotation {
                        symbol: symbol.to_string(),
                        tags: annotations.iter().map(|a| a.tag.clone()).collect(),
                    });
                };
                debug!(symbol = %symbol, tag = %annotation.tag, "applying guard provider");
                let (guards, reach) = self.compile_all(metas)?;
                Ok((provider.provide(meta, annotations, guards)?, reach))
            }
            Meta::String { min_length, max_length } => Ok((
                Guard::from_predicate(meta.clone(), leaf::string(*min_length, *max_length)),
                Reach::default(),
            )),
            Meta::Number { minimum, maximum } => Ok((
                Guard::from_predicate(meta.clone(), leaf::number(*minimum, *maximum)),
                Reach::default(),
            )),
            Meta::Boolean => Ok((leaf::boolean(meta), Reach::default())),
            Meta::Of { value } => Ok((leaf::of(meta, value), Reach::default())),
            Meta::Tuple { components, rest_element } => {
                Ok((self.tuple_guard(meta, components, rest_element.as_ref())?, Reach::default()))
            }
            Meta::Union { members } => {
                let (members, reach) = self.compile_all(members)?;
                let absent = members.clone();
                let guard = Guard::new(meta.clone(), move |v| members.iter().any(|g| g.is(v)))
                    .accepting_missing_when(move || absent.iter().any(Guard::accepts_missing));
                Ok((guard, reach))
            }
            Meta::Struct { fields, index_signature } => {
                Ok((self.struct_guard(meta, fields, index_signature.as_ref())?, Reach::default()))
            }
            Meta::Lazy(lazy) => self.lazy_guard(meta, lazy),
        }
    }

    /// Compile every node; the reach is the union of the children's.
    fn compile_all(&self, metas: &[MetaRef]) -> Result<(Vec<Guard>, Reach), GuardError> {
        let mut guards = Vec::with_capacity(metas.len());
        let mut reach = HashSet::new();
        for meta in metas {
            let compiled = self.compile_node(meta)?;
            reach.extend(compiled.reach.iter().cloned());
            guards.push(compiled.guard);
        }
        Ok((guards, Arc::new(reach)))
    }

    fn tuple_guard(&self, meta: &MetaRef, components: &[MetaRef], rest: Option<&MetaRef>) -> Result<Guard, GuardError> {
        let (components, _) = self.compile_all(components)?;
        let rest = rest.map(|m| self.compile(m)).transpose()?;
        Ok(Guard::new(meta.clone(), move |v| {
            let Some(items) = v.as_array() else { return false };
            // without a rest element, trailing items are tolerated
            components.iter().enumerate().all(|(i, g)| g.check(items.get(i)))
                && rest
                    .as_ref()
                    .is_none_or(|r| items.iter().skip(components.len()).all(|item| r.is(item)))
        }))
    }

    fn struct_guard(&self, meta: &MetaRef, fields: &[Field], index: Option<&IndexSignature>) -> Result<Guard, GuardError> {
        let fields = fields
            .iter()
            .map(|f| Ok((f.key.clone(), self.compile(&f.value)?)))
            .collect::<Result<Vec<(String, Guard)>, GuardError>>()?;
        let index = index.map(|s| self.compile(&s.value)).transpose()?;
        let declared: BTreeSet<String> = fields.iter().map(|(k, _)| k.clone()).collect();
        Ok(Guard::new(meta.clone(), move |v| {
            let Some(object) = v.as_object() else { return false };
            fields.iter().all(|(key, g)| g.check(object.get(key)))
                && index.as_ref().is_none_or(|ix| {
                    object
                        .iter()
                        .filter(|(key, _)| !declared.contains(key.as_str()))
                        .all(|(_, value)| ix.is(value))
                })
        }))
    }

    /// A placeholder is registered for the symbol before `f()` is compiled,
    /// so recursive references resolve to the same guard instance. The
    /// placeholder answers `is` and `check(None)` through the resolved guard.
    fn lazy_guard(&self, meta: &MetaRef, lazy: &LazyMeta) -> Result<(Guard, Reach), GuardError> {
        let lock = self.inner.cache.lock();
        let symbol = lazy.symbol();
        let known = lock.borrow().lazies.get(symbol).cloned();
        if let Some(known) = known {
            trace!(symbol = %symbol, "lazy guard reused");
            return Ok((known.guard, known.reach));
        }
        let (nodes_before, lazies_before) = {
            let cache = lock.borrow();
            (cache.nodes.len(), cache.lazies.len())
        };

        let slot: Arc<OnceCell<Guard>> = Arc::default();
        let placeholder = {
            let (value_slot, missing_slot) = (slot.clone(), slot.clone());
            Guard::new(meta.clone(), move |v| value_slot.get().is_some_and(|g| g.is(v)))
                .accepting_missing_when(move || missing_slot.get().is_some_and(Guard::accepts_missing))
        };
        let pending = Compiled {
            meta: meta.clone(),
            guard: placeholder.clone(),
            reach: Arc::new(HashSet::from([symbol.clone()])),
        };
        lock.borrow_mut().lazies.insert(symbol.clone(), pending);

        debug!(symbol = %symbol, "resolving lazy meta");
        let resolved = self.compile_node(&lazy.force()).and_then(|resolved| {
            if resolved.reach.contains(symbol) {
                return Err(GuardError::UnguardedRecursion { symbol: symbol.to_string() });
            }
            Ok(resolved)
        });

        let mut cache = lock.borrow_mut();
        match resolved {
            Ok(resolved) => {
                let _ = slot.set(resolved.guard);
                let mut reach = (*resolved.reach).clone();
                reach.insert(symbol.clone());
                let reach = Arc::new(reach);
                if let Some(entry) = cache.lazies.get_mut(symbol) {
                    entry.reach = reach.clone();
                }
                Ok((placeholder, reach))
            }
            Err(err) => {
                cache.nodes.truncate(nodes_before);
                cache.lazies.truncate(lazies_before);
                Err(err)
            }
        }
    }
}

// ————————————————————————————————————————————————————————————————————————————
// CONSTRUCTORS & STRUCTURAL COMBINATORS
// ————————————————————————————————————————————————————————————————————————————

impl Compiler {
    pub fn string(&self) -> Guard<String> {
        self.leaf(schema::string().into_meta(), |m| Guard::from_predicate(m.clone(), leaf::string(None, None)))
            .typed()
    }

    pub fn number(&self) -> Guard<f64> {
        self.leaf(schema::number().into_meta(), |m| Guard::from_predicate(m.clone(), leaf::number(None, None)))
            .typed()
    }

    pub fn boolean(&self) -> Guard<bool> {
        self.leaf(schema::boolean().into_meta(), leaf::boolean).typed()
    }

    /// Literal guards are built fresh and never cached.
    pub fn of(&self, value: impl Into<Value>) -> Guard {
        let literal = Literal::Json(value.into());
        leaf::of(&Meta::Of { value: literal.clone() }.into_ref(), &literal)
    }

    pub fn undefined(&self) -> Guard<()> {
        self.leaf(schema::undefined().into_meta(), |m| leaf::of(m, &Literal::Undefined)).typed()
    }

    pub fn tuple(&self, components: &[&dyn AsMeta], rest_element: Option<&dyn AsMeta>) -> Result<Guard, GuardError> {
        let schema = schema::tuple(components.iter().map(|c| c.to_schema()), rest_element.map(|r| r.to_schema()));
        self.guard_for(&schema)
    }

    pub fn union(&self, members: &[&dyn AsMeta]) -> Result<Guard, GuardError> {
        self.guard_for(&schema::union(members.iter().map(|m| m.to_schema())))
    }

    pub fn struct_(&self, fields: &[(&str, &dyn AsMeta)]) -> Result<Guard, GuardError> {
        self.guard_for(&schema::struct_(fields.iter().map(|(k, v)| (*k, v.to_schema()))))
    }

    pub fn index_signature(&self, value: &dyn AsMeta) -> Result<Guard, GuardError> {
        self.guard_for(&schema::index_signature(value.to_schema()))
    }

    pub fn readonly_array(&self, item: &dyn AsMeta) -> Result<Guard, GuardError> {
        self.guard_for(&schema::readonly_array(item.to_schema()))
    }

    pub fn optional<A>(&self, guard: &Guard<A>) -> Result<Guard<Option<A>>, GuardError> {
        self.guard_for(&schema::optional(&guard.schema()))
    }

    pub fn pick<A, K: AsRef<str>>(&self, guard: &Guard<A>, keys: &[K]) -> Result<Guard, GuardError> {
        self.guard_for(&schema::pick(&guard.schema(), keys)?)
    }

    pub fn omit<A, K: AsRef<str>>(&self, guard: &Guard<A>, keys: &[K]) -> Result<Guard, GuardError> {
        self.guard_for(&schema::omit(&guard.schema(), keys)?)
    }

    /// Transform the guard's schema and recompile the result.
    pub fn map_schema<A, B, F>(&self, guard: &Guard<A>, f: F) -> Result<Guard<B>, GuardError>
    where
        F: FnOnce(Schema<A>) -> Schema<B>,
    {
        self.guard_for(&f(guard.schema()))
    }
}

// ————————————————————————————————————————————————————————————————————————————
// LEAF PREDICATES
// ————————————————————————————————————————————————————————————————————————————

pub(crate) mod leaf {
    use super::*;
    use crate::guard::Predicate;

    pub(crate) fn string(min_length: Option<usize>, max_length: Option<usize>) -> Predicate {
        Arc::new(move |v: &Value| {
            let Some(s) = v.as_str() else { return false };
            if min_length.is_none() && max_length.is_none() {
                return true;
            }
            let len = s.chars().count();
            min_length.is_none_or(|min| len >= min) && max_length.is_none_or(|max| len <= max)
        })
    }

    pub(crate) fn number(minimum: Option<f64>, maximum: Option<f64>) -> Predicate {
        Arc::new(move |v: &Value| {
            let Some(n) = v.as_f64() else { return false };
            minimum.is_none_or(|min| n >= min) && maximum.is_none_or(|max| n <= max)
        })
    }

    pub(crate) fn boolean(meta: &MetaRef) -> Guard {
        Guard::new(meta.clone(), Value::is_boolean)
    }

    pub(crate) fn of(meta: &MetaRef, literal: &Literal) -> Guard {
        let expected = literal.clone();
        let guard = Guard::new(meta.clone(), move |v| expected.matches(v));
        if matches!(literal, Literal::Undefined) { guard.accepting_missing() } else { guard }
    }

    /// Predicate of a bounded String/Number leaf; `None` for other nodes.
    pub(crate) fn bounded_predicate(meta: &Meta) -> Option<Predicate> {
        match *meta {
            Meta::String { min_length, max_length } => Some(string(min_length, max_length)),
            Meta::Number { minimum, maximum } => Some(number(minimum, maximum)),
            _ => None,
        }
    }
}

// ————————————————————————————————————————————————————————————————————————————
// TESTS
// ————————————————————————————————————————————————————————————————————————————

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::Annotation;
    use once_cell::sync::Lazy;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn tuple_with_rest_element() {
        let compiler = Compiler::new();
        let g = compiler
            .tuple(&[&compiler.string(), &compiler.number()], Some(&compiler.boolean()))
            .unwrap();
        assert!(g.is(&json!(["a", 1, true, false])));
        assert!(!g.is(&json!(["a", 1, 2])));
        assert!(!g.is(&json!(["a"])));
        assert!(!g.is(&json!({"0": "a", "1": 1})));
    }

    #[test]
    fn tuple_without_rest_tolerates_trailing_items() {
        let compiler = Compiler::new();
        let g = compiler.tuple(&[&compiler.string()], None).unwrap();
        assert!(g.is(&json!(["a", 1, null])));
        assert!(!g.is(&json!([])));
    }

    #[test]
    fn tuple_optional_component_may_be_missing() {
        let compiler = Compiler::new();
        let maybe = compiler.optional(&compiler.number()).unwrap();
        let g = compiler.tuple(&[&compiler.string(), &maybe], None).unwrap();
        assert!(g.is(&json!(["a"])));
        assert!(g.is(&json!(["a", 2])));
        assert!(!g.is(&json!(["a", "b"])));
    }

    #[test]
    fn struct_with_index_signature() {
        let compiler = Compiler::new();
        let base = schema::struct_([("x", schema::number().erase())]);
        let s = schema::with_index_signature(&base, schema::string().erase()).unwrap();
        let g = compiler.guard_for(&s).unwrap();
        assert!(g.is(&json!({"x": 1, "y": "ok"})));
        assert!(!g.is(&json!({"x": 1, "y": 2})));
        assert!(!g.is(&json!({"y": "ok"})));
        assert!(!g.is(&json!([1])));
        assert!(!g.is(&json!(null)));
    }

    #[test]
    fn struct_without_index_signature_is_open() {
        let compiler = Compiler::new();
        let g = compiler.struct_(&[("x", &compiler.number())]).unwrap();
        assert!(g.is(&json!({"x": 1, "extra": [1, 2, 3]})));
    }

    #[test]
    fn struct_ignores_key_order() {
        let compiler = Compiler::new();
        let g = compiler.struct_(&[("a", &compiler.number()), ("b", &compiler.number())]).unwrap();
        let ab: Value = serde_json::from_str(r#"{"a":1,"b":2}"#).unwrap();
        let ba: Value = serde_json::from_str(r#"{"b":2,"a":1}"#).unwrap();
        assert_eq!(g.is(&ab), g.is(&ba));
        assert!(g.is(&ab));
    }

    #[test]
    fn union_is_any_member() {
        let compiler = Compiler::new();
        let g = compiler.union(&[&compiler.string(), &compiler.of(json!(0))]).unwrap();
        assert!(g.is(&json!("x")));
        assert!(g.is(&json!(0)));
        assert!(!g.is(&json!(1)));
        let empty = compiler.union(&[]).unwrap();
        assert!(!empty.is(&json!(null)));
    }

    #[test]
    fn apply_without_registered_annotation_fails() {
        let compiler = Compiler::new();
        let bare = schema::apply(Symbol::new("Opaque"), vec![], vec![]);
        let err = compiler.compile(bare.meta()).unwrap_err();
        assert_eq!(err, GuardError::MissingAnnotation { symbol: "Opaque".into(), tags: vec![] });

        let unknown = schema::apply(Symbol::new("Date"), vec![], vec![Annotation::new("date")]);
        let err = compiler.compile(unknown.meta()).unwrap_err();
        assert!(err.to_string().contains("Date"), "{err}");
        assert_eq!(compiler.cached_nodes(), 0);
    }

    #[test]
    fn empty_registry_rejects_builtin_tags() {
        let compiler = Compiler::with_registry(AnnotationRegistry::new());
        let s = schema::min_length(&schema::readonly_array(schema::number().erase()), 1);
        assert!(matches!(compiler.guard_for(&s), Err(GuardError::MissingAnnotation { .. })));
    }

    #[test]
    fn memoized_by_node_identity() {
        let compiler = Compiler::new();
        let s = schema::struct_([("a", schema::string().erase())]);
        let first = compiler.guard_for(&s).unwrap();
        let second = compiler.guard_for(&s.clone()).unwrap();
        assert!(first.ptr_eq(&second));

        let twin = schema::struct_([("a", schema::string().erase())]);
        let third = compiler.guard_for(&twin).unwrap();
        assert!(!first.ptr_eq(&third));
    }

    #[test]
    fn clear_cache_isolates_runs() {
        let compiler = Compiler::new();
        let s = schema::readonly_array(schema::string().erase());
        let before = compiler.guard_for(&s).unwrap();
        assert_eq!(compiler.cached_nodes(), 2);
        compiler.clear_cache();
        assert_eq!(compiler.cached_nodes(), 0);
        let after = compiler.guard_for(&s).unwrap();
        assert!(!before.ptr_eq(&after));
    }

    static CATEGORY: Lazy<Symbol> = Lazy::new(|| Symbol::new("Category"));

    fn category() -> Schema {
        schema::lazy(CATEGORY.clone(), || {
            schema::struct_([
                ("name", schema::string().erase()),
                ("subcategories", schema::readonly_array(category())),
            ])
        })
    }

    #[test]
    fn recursive_schema_validates_nested_values() {
        let compiler = Compiler::new();
        let g = compiler.guard_for(&category()).unwrap();
        let depth1 = json!({"name": "a", "subcategories": []});
        let depth2 = json!({"name": "a", "subcategories": [{"name": "b", "subcategories": []}]});
        let broken = json!({"name": "a", "subcategories": [{"name": 1, "subcategories": []}]});
        let shallow = json!({"name": "a", "subcategories": [{"name": "b"}]});
        assert!(g.is(&depth1));
        assert!(g.is(&depth2));
        assert!(!g.is(&broken));
        assert!(!g.is(&shallow));
    }

    #[test]
    fn lazy_thunk_runs_once_per_compiler() {
        static CALLS: AtomicUsize = AtomicUsize::new(0);
        static NODE: Lazy<Symbol> = Lazy::new(|| Symbol::new("Node"));
        fn node() -> Schema {
            schema::lazy(NODE.clone(), || {
                CALLS.fetch_add(1, Ordering::SeqCst);
                schema::tuple([schema::number().erase()], Some(node()))
            })
        }
        let compiler = Compiler::new();
        let a = compiler.guard_for(&node()).unwrap();
        let b = compiler.guard_for(&node()).unwrap();
        assert!(a.ptr_eq(&b));
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
        assert!(a.is(&json!([1, [2], [3, [4]]])));
        assert!(!a.is(&json!([1, 2])));
    }

    #[test]
    fn failed_lazy_compile_is_not_cached() {
        static BAD: Lazy<Symbol> = Lazy::new(|| Symbol::new("Bad"));
        let compiler = Compiler::new();
        let bad = schema::lazy(BAD.clone(), || schema::apply(Symbol::new("Opaque"), vec![], vec![]));
        assert!(compiler.guard_for(&bad).is_err());
        assert!(compiler.guard_for(&bad).is_err());
    }

    #[test]
    fn self_reference_without_structure_is_rejected() {
        static LOOP: Lazy<Symbol> = Lazy::new(|| Symbol::new("Loop"));
        fn looped() -> Schema {
            schema::lazy(LOOP.clone(), || schema::union([looped(), schema::string().erase()]))
        }
        let compiler = Compiler::new();
        let err = compiler.guard_for(&looped()).unwrap_err();
        assert_eq!(err, GuardError::UnguardedRecursion { symbol: "Loop".into() });
        assert_eq!(compiler.cached_nodes(), 0);
        // rejected again rather than served from a half-built cache
        assert!(compiler.guard_for(&looped()).is_err());
    }

    #[test]
    fn mutual_recursion_through_optional_is_rejected() {
        static PING: Lazy<Symbol> = Lazy::new(|| Symbol::new("Ping"));
        static PONG: Lazy<Symbol> = Lazy::new(|| Symbol::new("Pong"));
        fn ping() -> Schema {
            schema::lazy(PING.clone(), || schema::optional(&pong()).erase())
        }
        fn pong() -> Schema {
            schema::lazy(PONG.clone(), || schema::union([ping(), schema::number().erase()]))
        }
        let compiler = Compiler::new();
        assert!(matches!(compiler.guard_for(&ping()), Err(GuardError::UnguardedRecursion { .. })));
        assert!(matches!(compiler.guard_for(&pong()), Err(GuardError::UnguardedRecursion { .. })));
    }

    #[test]
    fn lazy_optional_field_and_slot_may_be_absent() {
        static MAYBE: Lazy<Symbol> = Lazy::new(|| Symbol::new("MaybeNumber"));
        let compiler = Compiler::new();
        let maybe = schema::lazy(MAYBE.clone(), || schema::optional(&schema::number()).erase());
        let record = compiler.guard_for(&schema::struct_([("a", maybe.clone())])).unwrap();
        assert!(record.is(&json!({})));
        assert!(record.is(&json!({"a": 1})));
        assert!(!record.is(&json!({"a": "1"})));

        let pair = compiler.guard_for(&schema::tuple([schema::string().erase(), maybe], None)).unwrap();
        assert!(pair.is(&json!(["x"])));
        assert!(!pair.is(&json!(["x", null])));
    }

    #[test]
    fn primitive_constructors_reuse_one_guard() {
        let compiler = Compiler::new();
        assert!(compiler.string().ptr_eq(&compiler.string()));
        for _ in 0..100 {
            compiler.number();
            compiler.boolean();
            compiler.undefined();
            compiler.of(json!(1));
        }
        assert_eq!(compiler.cached_nodes(), 4);
        assert!(compiler.undefined().check(None));
    }

    #[test]
    fn concurrent_first_compile_converges() {
        let compiler = Compiler::new();
        let s = schema::struct_([
            ("id", schema::string().erase()),
            ("tags", schema::readonly_array(schema::string().erase())),
        ]);
        let guards: Vec<Guard> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| compiler.guard_for(&s).unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert!(guards.windows(2).all(|w| w[0].ptr_eq(&w[1])));
    }
}
