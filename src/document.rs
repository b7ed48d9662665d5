//! Schema documents: a JSON encoding of Meta trees.
//!
//! ```json
//! {
//!   "root": { "type": "ref", "name": "Category" },
//!   "definitions": {
//!     "Category": {
//!       "type": "struct",
//!       "fields": {
//!         "name": { "type": "string", "minLength": 1 },
//!         "subcategories": { "type": "array", "items": { "type": "ref", "name": "Category" } }
//!       }
//!     }
//!   }
//! }
//! ```
//!
//! Every `ref` to a definition becomes a `Lazy` node sharing that
//! definition's symbol, so recursive definitions compile once.
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::meta::{Annotation, Field, IndexSignature, LazyMeta, Literal, Meta, MetaRef, Symbol};
use crate::path_de;
use crate::schema::Schema;

// ————————————————————————————————————————————————————————————————————————————
// TYPES
// ————————————————————————————————————————————————————————————————————————————

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaDocument {
    pub root: Node,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub definitions: IndexMap<String, Node>,
}

/// One schema node. `R` is how references are spelled: definition names
/// when parsed, definition indices once resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Node<R = String> {
    String {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min_length: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_length: Option<usize>,
    },
    Number {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        minimum: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        maximum: Option<f64>,
    },
    Boolean,
    Of {
        value: Value,
    },
    Undefined,
    Optional {
        schema: Box<Node<R>>,
    },
    Tuple {
        #[serde(default)]
        components: Vec<Node<R>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rest_element: Option<Box<Node<R>>>,
    },
    Array {
        items: Box<Node<R>>,
    },
    Union {
        members: Vec<Node<R>>,
    },
    Struct {
        #[serde(default)]
        fields: IndexMap<String, Node<R>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        index_signature: Option<Box<Node<R>>>,
    },
    Ref {
        name: R,
    },
    Apply {
        name: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        metas: Vec<Node<R>>,
        #[serde(default)]
        annotations: Vec<Annotation>,
    },
}

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("failed to read schema document {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("at JSON path {path} → {message}")]
    Parse { path: String, message: String },
    #[error("unknown reference `{0}`")]
    UnknownReference(String),
    /// A definition reaches itself through refs, unions, optionals or
    /// applications only; its guard would never terminate.
    #[error("definition `{0}` refers to itself without consuming any structure")]
    UnguardedRecursion(String),
}

type Definitions = Arc<Vec<(Symbol, Node<usize>)>>;

// ————————————————————————————————————————————————————————————————————————————
// LOADING
// ————————————————————————————————————————————————————————————————————————————

impl FromStr for SchemaDocument {
    type Err = DocumentError;

    fn from_str(src: &str) -> Result<Self, Self::Err> {
        path_de::from_str_with_path(src)
    }
}

impl SchemaDocument {
    pub fn from_path(path: &Path) -> Result<Self, DocumentError> {
        let bytes = std::fs::read(path).map_err(|source| DocumentError::Io { path: path.to_path_buf(), source })?;
        path_de::from_slice_with_path(&bytes)
    }

    /// Resolve references and build the Meta tree.
    pub fn into_schema(self) -> Result<Schema, DocumentError> {
        let resolved = self
            .definitions
            .iter()
            .map(|(name, node)| Ok((Symbol::new(name), node.resolve(&self.definitions)?)))
            .collect::<Result<Vec<_>, DocumentError>>()?;
        check_productive(&self.definitions, &resolved)?;
        let root = self.root.resolve(&self.definitions)?;
        debug!(definitions = resolved.len(), "schema document resolved");
        let definitions: Definitions = Arc::new(resolved);
        Ok(Schema::from_meta(build(&root, &definitions)))
    }
}

impl Node {
    fn resolve(&self, definitions: &IndexMap<String, Node>) -> Result<Node<usize>, DocumentError> {
        let all = |nodes: &[Node]| nodes.iter().map(|n| n.resolve(definitions)).collect::<Result<Vec<_>, _>>();
        let boxed = |node: &Node| node.resolve(definitions).map(Box::new);
        Ok(match self {
            Node::String { min_length, max_length } => Node::String { min_length: *min_length, max_length: *max_length },
            Node::Number { minimum, maximum } => Node::Number { minimum: *minimum, maximum: *maximum },
            Node::Boolean => Node::Boolean,
            Node::Of { value } => Node::Of { value: value.clone() },
            Node::Undefined => Node::Undefined,
            Node::Optional { schema } => Node::Optional { schema: boxed(schema)? },
            Node::Tuple { components, rest_element } => Node::Tuple {
                components: all(components)?,
                rest_element: rest_element.as_deref().map(boxed).transpose()?,
            },
            Node::Array { items } => Node::Array { items: boxed(items)? },
            Node::Union { members } => Node::Union { members: all(members)? },
            Node::Struct { fields, index_signature } => Node::Struct {
                fields: fields
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), v.resolve(definitions)?)))
                    .collect::<Result<_, DocumentError>>()?,
                index_signature: index_signature.as_deref().map(boxed).transpose()?,
            },
            Node::Ref { name } => Node::Ref {
                name: definitions
                    .get_index_of(name)
                    .ok_or_else(|| DocumentError::UnknownReference(name.clone()))?,
            },
            Node::Apply { name, metas, annotations } => Node::Apply {
                name: name.clone(),
                metas: all(metas)?,
                annotations: annotations.clone(),
            },
        })
    }
}

/// References reachable without passing through a tuple or struct.
fn unguarded_refs(node: &Node<usize>, out: &mut Vec<usize>) {
    match node {
        Node::Ref { name } => out.push(*name),
        Node::Optional { schema } => unguarded_refs(schema, out),
        Node::Union { members } => members.iter().for_each(|m| unguarded_refs(m, out)),
        Node::Apply { metas, .. } => metas.iter().for_each(|m| unguarded_refs(m, out)),
        _ => {}
    }
}

fn check_productive(names: &IndexMap<String, Node>, resolved: &[(Symbol, Node<usize>)]) -> Result<(), DocumentError> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Fresh,
        Active,
        Done,
    }

    fn visit(i: usize, edges: &[Vec<usize>], marks: &mut [Mark]) -> Option<usize> {
        match marks[i] {
            Mark::Active => return Some(i),
            Mark::Done => return None,
            Mark::Fresh => {}
        }
        marks[i] = Mark::Active;
        for &next in &edges[i] {
            if let Some(cycle) = visit(next, edges, marks) {
                return Some(cycle);
            }
        }
        marks[i] = Mark::Done;
        None
    }

    let edges: Vec<Vec<usize>> = resolved
        .iter()
        .map(|(_, node)| {
            let mut out = Vec::new();
            unguarded_refs(node, &mut out);
            out
        })
        .collect();
    let mut marks = vec![Mark::Fresh; edges.len()];
    for i in 0..edges.len() {
        if let Some(cycle) = visit(i, &edges, &mut marks) {
            let name = names.get_index(cycle).map(|(k, _)| k.clone()).unwrap_or_default();
            return Err(DocumentError::UnguardedRecursion(name));
        }
    }
    Ok(())
}

fn build(node: &Node<usize>, definitions: &Definitions) -> MetaRef {
    let all = |nodes: &[Node<usize>]| nodes.iter().map(|n| build(n, definitions)).collect::<Vec<_>>();
    let meta = match node {
        Node::String { min_length, max_length } => Meta::String { min_length: *min_length, max_length: *max_length },
        Node::Number { minimum, maximum } => Meta::Number { minimum: *minimum, maximum: *maximum },
        Node::Boolean => Meta::Boolean,
        Node::Of { value } => Meta::Of { value: Literal::Json(value.clone()) },
        Node::Undefined => Meta::Of { value: Literal::Undefined },
        Node::Optional { schema } => Meta::Union {
            members: vec![build(schema, definitions), Meta::Of { value: Literal::Undefined }.into_ref()],
        },
        Node::Tuple { components, rest_element } => Meta::Tuple {
            components: all(components),
            rest_element: rest_element.as_deref().map(|r| build(r, definitions)),
        },
        Node::Array { items } => Meta::Tuple { components: Vec::new(), rest_element: Some(build(items, definitions)) },
        Node::Union { members } => Meta::Union { members: all(members) },
        Node::Struct { fields, index_signature } => Meta::Struct {
            fields: fields
                .iter()
                .map(|(key, value)| Field { key: key.clone(), value: build(value, definitions) })
                .collect(),
            index_signature: index_signature
                .as_deref()
                .map(|value| IndexSignature { value: build(value, definitions) }),
        },
        Node::Ref { name } => {
            let index = *name;
            let symbol = definitions[index].0.clone();
            let definitions = definitions.clone();
            Meta::Lazy(LazyMeta::new(symbol, move || build(&definitions[index].1, &definitions)))
        }
        Node::Apply { name, metas, annotations } => Meta::Apply {
            symbol: Symbol::new(name),
            metas: all(metas),
            annotations: annotations.clone(),
        },
    };
    meta.into_ref()
}

// ————————————————————————————————————————————————————————————————————————————
// DESCRIBING
// ————————————————————————————————————————————————————————————————————————————

impl SchemaDocument {
    /// Encode a Meta tree. Each lazy symbol becomes one definition.
    pub fn from_meta(meta: &MetaRef) -> Self {
        let mut describer = Describer::default();
        let root = describer.node(meta);
        Self { root, definitions: describer.definitions }
    }
}

#[derive(Default)]
struct Describer {
    definitions: IndexMap<String, Node>,
    names: HashMap<Symbol, String>,
}

impl Describer {
    fn node(&mut self, meta: &MetaRef) -> Node {
        match meta.as_ref() {
            Meta::String { min_length, max_length } => Node::String { min_length: *min_length, max_length: *max_length },
            Meta::Number { minimum, maximum } => Node::Number { minimum: *minimum, maximum: *maximum },
            Meta::Boolean => Node::Boolean,
            Meta::Of { value: Literal::Undefined } => Node::Undefined,
            Meta::Of { value: Literal::Json(value) } => Node::Of { value: value.clone() },
            Meta::Tuple { components, rest_element: Some(rest) } if components.is_empty() => {
                Node::Array { items: Box::new(self.node(rest)) }
            }
            Meta::Tuple { components, rest_element } => Node::Tuple {
                components: components.iter().map(|c| self.node(c)).collect(),
                rest_element: rest_element.as_ref().map(|r| Box::new(self.node(r))),
            },
            Meta::Union { members } => match members.as_slice() {
                [inner, undefined] if matches!(undefined.as_ref(), Meta::Of { value: Literal::Undefined }) => {
                    Node::Optional { schema: Box::new(self.node(inner)) }
                }
                _ => Node::Union { members: members.iter().map(|m| self.node(m)).collect() },
            },
            Meta::Struct { fields, index_signature } => Node::Struct {
                fields: fields.iter().map(|f| (f.key.clone(), self.node(&f.value))).collect(),
                index_signature: index_signature.as_ref().map(|s| Box::new(self.node(&s.value))),
            },
            Meta::Lazy(lazy) => {
                let symbol = lazy.symbol();
                if let Some(name) = self.names.get(symbol) {
                    return Node::Ref { name: name.clone() };
                }
                let name = self.fresh_name(symbol.description());
                self.names.insert(symbol.clone(), name.clone());
                // reserve the slot so definitions keep discovery order
                self.definitions.insert(name.clone(), Node::Undefined);
                let body = self.node(&lazy.force());
                self.definitions.insert(name.clone(), body);
                Node::Ref { name }
            }
            Meta::Apply { symbol, metas, annotations } => Node::Apply {
                name: symbol.description().to_string(),
                metas: metas.iter().map(|m| self.node(m)).collect(),
                annotations: annotations.clone(),
            },
        }
    }

    fn fresh_name(&self, description: &str) -> String {
        let base = if description.is_empty() { "Definition" } else { description };
        if !self.definitions.contains_key(base) {
            return base.to_string();
        }
        (2..)
            .map(|n| format!("{base}{n}"))
            .find(|candidate| !self.definitions.contains_key(candidate))
            .unwrap_or_else(|| base.to_string())
    }
}

// ————————————————————————————————————————————————————————————————————————————
// TESTS
// ————————————————————————————————————————————————————————————————————————————
