#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Model build validation, record coercion and the Rust-type mapping.

use std::sync::Arc;
use std::thread;

use odata_edm::{
    AnnotationTerm, EdmEntity, EdmModel, EdmModelBuilder, EnumType, ModelError, Operation,
    PrimitiveKind, Property, Record, StructuredType, TypeRef, Value, format_duration,
    parse_duration,
};
use proptest::prelude::*;
use serde_json::json;

fn customer() -> StructuredType {
    StructuredType::entity("Sales", "Customer")
        .with_property(Property::structural("Id", TypeRef::int32().required()))
        .with_property(Property::structural("Name", TypeRef::string()))
        .with_property(Property::structural("Tier", TypeRef::enumeration("Sales.Tier")))
        .with_property(Property::structural("Address", TypeRef::complex("Sales.Address")))
        .with_property(
            Property::navigation("Orders", TypeRef::collection(TypeRef::entity("Sales.Order")))
                .annotate(AnnotationTerm::NotCountable),
        )
        .with_key("Id")
}

fn order() -> StructuredType {
    StructuredType::entity("Sales", "Order")
        .with_property(Property::structural("Id", TypeRef::int32().required()))
        .with_property(Property::structural(
            "Total",
            TypeRef::primitive(PrimitiveKind::Decimal),
        ))
        .with_property(Property::structural(
            "PlacedAt",
            TypeRef::primitive(PrimitiveKind::DateTimeOffset),
        ))
        .with_key("Id")
}

fn address() -> StructuredType {
    StructuredType::complex("Sales", "Address")
        .with_property(Property::structural("City", TypeRef::string()))
}

fn tier() -> EnumType {
    EnumType::new("Sales", "Tier")
        .with_member("Bronze", 0)
        .with_member("Gold", 1)
}

fn builder() -> EdmModelBuilder {
    EdmModelBuilder::new("Sales")
        .add_structured_type(customer())
        .add_structured_type(order())
        .add_structured_type(address())
        .add_enum_type(tier())
        .add_entity_set("Customers", "Sales.Customer")
        .add_entity_set("Orders", "Sales.Order")
}

fn model() -> Arc<EdmModel> {
    builder().build().unwrap()
}

#[test]
fn builds_valid_model() {
    let m = model();
    assert_eq!(&*m.container().name, "Sales");
    assert!(m.entity_set("Customers").is_some());
    let orders = m.find_property("Sales.Customer", "Orders").unwrap();
    assert!(orders.is_navigation());
    assert!(orders.has(AnnotationTerm::NotCountable));
    assert_eq!(m.enum_member("Sales.Tier", "Gold").map(|e| e.value), Some(1));
}

#[test]
fn rejects_unknown_base_type() {
    let err = EdmModelBuilder::new("X")
        .add_structured_type(StructuredType::entity("X", "A").with_base("X.Missing"))
        .build()
        .unwrap_err();
    assert!(matches!(err, ModelError::UnknownBaseType { .. }), "{err}");
}

#[test]
fn rejects_inheritance_cycle() {
    let err = EdmModelBuilder::new("X")
        .add_structured_type(
            StructuredType::entity("X", "A")
                .with_base("X.B")
                .with_property(Property::structural("Id", TypeRef::int32()))
                .with_key("Id"),
        )
        .add_structured_type(StructuredType::entity("X", "B").with_base("X.A"))
        .build()
        .unwrap_err();
    assert!(matches!(err, ModelError::InheritanceCycle(_)), "{err}");
}

#[test]
fn rejects_missing_key() {
    let err = EdmModelBuilder::new("X")
        .add_structured_type(
            StructuredType::entity("X", "A")
                .with_property(Property::structural("Id", TypeRef::int32())),
        )
        .build()
        .unwrap_err();
    assert_eq!(err, ModelError::MissingKey("X.A".to_owned()));
}

#[test]
fn abstract_entity_may_omit_key() {
    let m = EdmModelBuilder::new("X")
        .add_structured_type(StructuredType::entity("X", "Base").abstract_type())
        .add_structured_type(
            StructuredType::entity("X", "Leaf")
                .with_base("X.Base")
                .with_property(Property::structural("Id", TypeRef::int32()))
                .with_key("Id"),
        )
        .build()
        .unwrap();
    assert_eq!(m.keys("X.Leaf").len(), 1);
    assert!(m.keys("X.Base").is_empty());
}

#[test]
fn rejects_key_naming_missing_property() {
    let err = EdmModelBuilder::new("X")
        .add_structured_type(StructuredType::entity("X", "A").with_key("Nope"))
        .build()
        .unwrap_err();
    assert!(matches!(err, ModelError::InvalidKey { .. }), "{err}");
}

#[test]
fn rejects_navigation_to_complex_type() {
    let err = EdmModelBuilder::new("X")
        .add_structured_type(address_in("X"))
        .add_structured_type(
            StructuredType::entity("X", "A")
                .with_property(Property::structural("Id", TypeRef::int32()))
                .with_property(Property::navigation("Home", TypeRef::complex("X.Address")))
                .with_key("Id"),
        )
        .build()
        .unwrap_err();
    assert!(matches!(err, ModelError::InvalidNavigation { .. }), "{err}");
}

fn address_in(ns: &str) -> StructuredType {
    StructuredType::complex(ns, "Address").with_property(Property::structural("City", TypeRef::string()))
}

#[test]
fn rejects_duplicate_names() {
    let err = builder().add_structured_type(order()).build().unwrap_err();
    assert_eq!(err, ModelError::DuplicateType("Sales.Order".to_owned()));
}

#[test]
fn rejects_entity_set_of_complex_type() {
    let err = builder()
        .add_entity_set("Addresses", "Sales.Address")
        .build()
        .unwrap_err();
    assert!(matches!(err, ModelError::UnknownEntitySetType { .. }), "{err}");
}

#[test]
fn rejects_operation_with_unknown_type() {
    let err = builder()
        .add_operation(Operation::function("Sales", "Best").returns(TypeRef::entity("Sales.Nope")))
        .build()
        .unwrap_err();
    assert!(matches!(err, ModelError::UnknownOperationType { .. }), "{err}");
}

#[test]
fn record_from_json_coerces_declared_types() {
    let m = model();
    let r = Record::from_json(
        &m,
        "Sales.Customer",
        &json!({
            "Id": 7,
            "Name": "Ann",
            "Tier": "Gold",
            "Address": { "City": "Oslo" },
            "Orders": [ { "Id": 1, "Total": 12.5, "PlacedAt": "2024-01-02T03:04:05Z" } ]
        }),
    )
    .unwrap();

    assert_eq!(r.get("Id"), Some(&Value::Int(7)));
    assert!(matches!(r.get("Tier"), Some(Value::Enum(e)) if e.value == 1));
    let city = r
        .get("Address")
        .and_then(Value::as_record)
        .and_then(|a| a.get("City"))
        .cloned();
    assert_eq!(city, Some(Value::from("Oslo")));
    let orders = r.get("Orders").and_then(Value::as_collection).unwrap();
    assert!(matches!(orders[0].as_record().and_then(|o| o.get("Total")), Some(Value::Decimal(_))));
}

#[test]
fn record_from_json_rejects_undeclared_member_on_closed_type() {
    let m = model();
    let err = Record::from_json(&m, "Sales.Order", &json!({ "Id": 1, "Extra": true })).unwrap_err();
    assert!(matches!(err, ModelError::UnknownProperty { .. }), "{err}");

    let err = Record::from_json(&m, "Sales.Order", &json!({ "Id": "one" })).unwrap_err();
    assert!(matches!(err, ModelError::Coercion { .. }), "{err}");
}

#[test]
fn open_type_keeps_dynamic_members() {
    let m = EdmModelBuilder::new("X")
        .add_structured_type(
            StructuredType::entity("X", "Bag")
                .open()
                .with_property(Property::structural("Id", TypeRef::int32()))
                .with_key("Id"),
        )
        .build()
        .unwrap();
    let r = Record::from_json(&m, "X.Bag", &json!({ "Id": 1, "Color": "red", "Size": 2.5 })).unwrap();
    assert_eq!(r.get("Color"), Some(&Value::from("red")));
    assert_eq!(r.get("Size"), Some(&Value::Double(2.5)));
}

struct Widget {
    id: i32,
}

impl EdmEntity for Widget {
    const EDM_TYPE: &'static str = "Shop.Widget";

    fn edm_type() -> StructuredType {
        StructuredType::entity("Shop", "Widget")
            .with_property(Property::structural("Id", TypeRef::int32()))
            .with_key("Id")
    }

    fn to_record(&self) -> Record {
        Record::new(Self::EDM_TYPE).with("Id", self.id)
    }
}

#[test]
fn rust_type_mapping_is_shared_across_threads() {
    let m = EdmModelBuilder::new("Shop").register::<Widget>().build().unwrap();
    let handles: Vec<_> = (0..16)
        .map(|_| {
            let m = Arc::clone(&m);
            thread::spawn(move || m.type_of::<Widget>().map(|n| n.to_string()))
        })
        .collect();
    for h in handles {
        assert_eq!(h.join().unwrap().as_deref(), Some("Shop.Widget"));
    }
    assert_eq!(Widget { id: 3 }.to_record().get("Id"), Some(&Value::Int(3)));
}

proptest! {
    #[test]
    fn duration_text_round_trips(secs in -10_000_000i64..10_000_000, millis in 0i64..1000) {
        let d = chrono::TimeDelta::seconds(secs) + chrono::TimeDelta::milliseconds(millis);
        prop_assert_eq!(parse_duration(&format_duration(d)), Some(d));
    }
}
