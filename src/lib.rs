//! Compile Meta trees (immutable descriptions of data shapes) into runtime
//! guards that decide whether a JSON value conforms.
//!
//! ```
//! use json_guard::{guard, schema};
//! use serde_json::json;
//!
//! let point = schema::struct_([("x", schema::number().erase()), ("y", schema::number().erase())]);
//! let g = guard::guard_for(&point).unwrap();
//! assert!(g.is(&json!({"x": 1, "y": 2})));
//! assert!(!g.is(&json!({"x": 1})));
//! ```
pub mod annotation;
pub mod compiler;
pub mod document;
pub mod error;
pub mod guard;
pub mod meta;
pub mod schema;
mod path_de;

pub use annotation::{AnnotationRegistry, GuardProvider};
pub use compiler::Compiler;
pub use document::{DocumentError, SchemaDocument};
pub use error::GuardError;
pub use guard::{Guard, guard_for};
pub use meta::{Annotation, Meta, MetaRef, Symbol};
pub use schema::{AsMeta, Schema};
