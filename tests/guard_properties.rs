//! Property tests for compiled guards.
//!
//! Tests cover:
//! - primitive guards matching native JSON types
//! - monotonic length bounds
//! - key-order independence of struct guards
//! - union guards as a disjunction of their members
//! - absent fields reached through lazy, applied and referenced schemas

use json_guard::{Annotation, Compiler, Guard, Schema, SchemaDocument, Symbol, schema};
use proptest::prelude::*;
use rstest::rstest;
use serde_json::{Map, Value, json};

fn arb_json() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i32>().prop_map(|n| json!(n)),
        (-1e6f64..1e6).prop_map(|n| json!(n)),
        "[a-z]{0,8}".prop_map(Value::String),
    ];
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map("[a-c]", inner, 0..4)
                .prop_map(|m| Value::Object(m.into_iter().collect::<Map<_, _>>())),
        ]
    })
}

// =============================================================================
// Primitives
// =============================================================================

#[rstest]
#[case::string(json!("a"), true, false, false)]
#[case::integer(json!(1), false, true, false)]
#[case::float(json!(1.5), false, true, false)]
#[case::boolean(json!(true), false, false, true)]
#[case::null(json!(null), false, false, false)]
#[case::array(json!(["a"]), false, false, false)]
#[case::object(json!({"a": 1}), false, false, false)]
fn primitive_guards_match_native_types(
    #[case] value: Value,
    #[case] is_string: bool,
    #[case] is_number: bool,
    #[case] is_boolean: bool,
) {
    let compiler = Compiler::new();
    assert_eq!(compiler.string().is(&value), is_string);
    assert_eq!(compiler.number().is(&value), is_number);
    assert_eq!(compiler.boolean().is(&value), is_boolean);
}

// =============================================================================
// Absent fields
// =============================================================================

fn maybe_number() -> Schema {
    schema::optional(&schema::number()).erase()
}

fn lazy_field(inner: fn() -> Schema) -> Schema {
    schema::struct_([("p", schema::lazy(Symbol::new("Field"), inner))])
}

fn nullable_field(inner: Schema) -> Schema {
    schema::struct_([(
        "p",
        schema::apply(Symbol::new("Nullable"), [inner], vec![Annotation::new("nullable")]),
    )])
}

fn document_field(definition: &str) -> Schema {
    let src = format!(
        r#"{{
            "root": {{ "type": "struct", "fields": {{ "p": {{ "type": "ref", "name": "M" }} }} }},
            "definitions": {{ "M": {definition} }}
        }}"#
    );
    src.parse::<SchemaDocument>().unwrap().into_schema().unwrap()
}

#[rstest]
#[case::inline_optional(schema::struct_([("p", maybe_number())]), true)]
#[case::lazy_optional(lazy_field(maybe_number), true)]
#[case::lazy_required(lazy_field(|| schema::number().erase()), false)]
#[case::nullable_optional(nullable_field(maybe_number()), true)]
#[case::nullable_required(nullable_field(schema::number().erase()), false)]
#[case::ref_to_optional(document_field(r#"{ "type": "optional", "schema": { "type": "number" } }"#), true)]
#[case::ref_to_required(document_field(r#"{ "type": "number" }"#), false)]
fn absent_field_follows_the_wrapped_schema(#[case] record: Schema, #[case] accepts_absent: bool) {
    let g = Compiler::new().guard_for(&record).unwrap();
    assert_eq!(g.is(&json!({})), accepts_absent);
    assert!(g.is(&json!({"p": 1})));
    assert!(!g.is(&json!({"p": "1"})));
}

// =============================================================================
// Laws
// =============================================================================

proptest! {
    /// minLength(n) accepts a subset of the unbounded guard, shrinking as n grows.
    #[test]
    fn prop_min_length_is_monotonic(s in "\\PC{0,12}", n in 0usize..10) {
        let compiler = Compiler::new();
        let base = compiler.string();
        let value = Value::String(s);
        let tight = base.min_length(n + 1);
        let loose = base.min_length(n);
        if tight.is(&value) {
            prop_assert!(loose.is(&value));
        }
        if loose.is(&value) {
            prop_assert!(base.is(&value));
        }
    }

    /// Struct verdicts do not depend on property order.
    #[test]
    fn prop_struct_ignores_key_order(a in arb_json(), b in arb_json()) {
        let compiler = Compiler::new();
        let g = compiler
            .guard_for(&schema::struct_([("a", schema::number().erase()), ("b", schema::string().erase())]))
            .unwrap();
        let mut ab = Map::new();
        ab.insert("a".into(), a.clone());
        ab.insert("b".into(), b.clone());
        let mut ba = Map::new();
        ba.insert("b".into(), b);
        ba.insert("a".into(), a);
        prop_assert_eq!(g.is(&Value::Object(ab)), g.is(&Value::Object(ba)));
    }

    /// A union accepts exactly what some member accepts.
    #[test]
    fn prop_union_is_disjunction(value in arb_json()) {
        let compiler = Compiler::new();
        let members: Vec<Guard> = vec![
            compiler.string().min_length(2).erase(),
            compiler.number().maximum(0.0).erase(),
            compiler.readonly_array(&compiler.boolean()).unwrap(),
            compiler.of(json!(null)),
        ];
        let union = compiler
            .union(&members.iter().map(|m| m as &dyn json_guard::AsMeta).collect::<Vec<_>>())
            .unwrap();
        prop_assert_eq!(union.is(&value), members.iter().any(|m| m.is(&value)));
    }

    /// Guards never panic on arbitrary input.
    #[test]
    fn prop_guards_are_total(value in arb_json()) {
        let compiler = Compiler::new();
        let s = schema::tuple(
            [schema::string().erase(), schema::optional(&schema::number()).erase()],
            Some(schema::index_signature(schema::boolean().erase())),
        );
        let g = compiler.guard_for(&s).unwrap();
        let _ = g.is(&value);
    }
}
