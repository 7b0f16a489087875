#![allow(dead_code)]

//! Shared `Shop` model and sample data for the integration tests.

use std::str::FromStr;
use std::sync::Arc;

use bigdecimal::BigDecimal;
use odata_edm::{
    EdmModel, EdmModelBuilder, EnumType, EnumValue, PrimitiveKind, Property, Record,
    StructuredType, TypeRef, Value,
};
use odata_query::{ODataConfig, QueryEngine, QueryResult};

pub fn model() -> Arc<EdmModel> {
    EdmModelBuilder::new("Shop")
        .add_enum_type(
            EnumType::new("Shop", "Genre")
                .with_member("Fiction", 0)
                .with_member("Science", 1)
                .with_member("History", 2),
        )
        .add_structured_type(
            StructuredType::complex("Shop", "Address")
                .with_property(Property::structural("City", TypeRef::string()))
                .with_property(Property::structural("Zip", TypeRef::string())),
        )
        .add_structured_type(
            StructuredType::entity("Shop", "Customer")
                .with_property(Property::structural("Id", TypeRef::int32().required()))
                .with_property(Property::structural("Name", TypeRef::string()))
                .with_property(Property::structural("Age", TypeRef::int32()))
                .with_property(Property::structural("Address", TypeRef::complex("Shop.Address")))
                .with_property(Property::structural(
                    "Emails",
                    TypeRef::collection(TypeRef::string()),
                ))
                .with_property(Property::navigation(
                    "Books",
                    TypeRef::collection(TypeRef::entity("Shop.Book")),
                ))
                .with_property(Property::navigation("BestFriend", TypeRef::entity("Shop.Customer")))
                .with_property(Property::navigation(
                    "Orders",
                    TypeRef::collection(TypeRef::entity("Shop.Order")),
                ))
                .with_key("Id"),
        )
        .add_structured_type(
            StructuredType::entity("Shop", "VipCustomer")
                .with_base("Shop.Customer")
                .with_property(Property::structural("Level", TypeRef::int32())),
        )
        .add_structured_type(
            StructuredType::entity("Shop", "Book")
                .with_property(Property::structural("Id", TypeRef::int32().required()))
                .with_property(Property::structural("Title", TypeRef::string()))
                .with_property(Property::structural(
                    "Price",
                    TypeRef::primitive(PrimitiveKind::Decimal),
                ))
                .with_property(Property::structural("Genre", TypeRef::enumeration("Shop.Genre")))
                .with_key("Id"),
        )
        .add_structured_type(
            StructuredType::entity("Shop", "Order")
                .with_property(Property::structural("Id", TypeRef::int32().required()))
                .with_property(Property::structural(
                    "Total",
                    TypeRef::primitive(PrimitiveKind::Decimal),
                ))
                .with_key("Id"),
        )
        .add_structured_type(
            StructuredType::entity("Shop", "Gadget")
                .with_property(Property::structural("Id", TypeRef::int32().required()))
                .with_property(Property::structural("Name", TypeRef::string()))
                .with_key("Id")
                .open(),
        )
        .add_structured_type(
            StructuredType::entity("Shop", "Enrollment")
                .with_property(Property::structural("StudentId", TypeRef::int32().required()))
                .with_property(Property::structural("CourseId", TypeRef::int32().required()))
                .with_property(Property::structural("Grade", TypeRef::int32()))
                .with_key_ordinal("StudentId", 0)
                .with_key_ordinal("CourseId", 1),
        )
        .add_entity_set("Customers", "Shop.Customer")
        .add_entity_set("Books", "Shop.Book")
        .add_entity_set("Orders", "Shop.Order")
        .add_entity_set("Gadgets", "Shop.Gadget")
        .add_entity_set("Enrollments", "Shop.Enrollment")
        .build()
        .expect("shop model is valid")
}

pub fn engine(config: ODataConfig) -> QueryEngine {
    QueryEngine::new(model(), Arc::new(config))
}

pub fn genre(member: &str) -> Value {
    let value = match member {
        "Fiction" => 0,
        "Science" => 1,
        _ => 2,
    };
    Value::Enum(EnumValue {
        type_name: "Shop.Genre".into(),
        member: member.into(),
        value,
    })
}

pub fn decimal(text: &str) -> Value {
    Value::Decimal(BigDecimal::from_str(text).expect("decimal literal"))
}

pub fn book(id: i32, title: &str, price: &str, g: &str) -> Value {
    Record::new("Shop.Book")
        .with("Id", id)
        .with("Title", title)
        .with("Price", decimal(price))
        .with("Genre", genre(g))
        .into()
}

fn address(city: &str) -> Value {
    Record::new("Shop.Address")
        .with("City", city)
        .with("Zip", "10001")
        .into()
}

/// Ann has one book, Bob two, Cid (a VIP) one, Dee none but a best friend.
pub fn customers() -> Vec<Record> {
    let ann = Record::new("Shop.Customer")
        .with("Id", 1)
        .with("Name", "Ann")
        .with("Age", 30)
        .with("Address", address("Oslo"))
        .with("Emails", Value::from(vec![Value::from("ann@example.com")]))
        .with("Books", Value::from(vec![book(10, "Dune", "9.50", "Fiction")]))
        .with(
            "Orders",
            Value::from(vec![
                Record::new("Shop.Order").with("Id", 100).with("Total", decimal("20.00")).into(),
                Record::new("Shop.Order").with("Id", 101).with("Total", decimal("5.25")).into(),
            ]),
        );
    let bob = Record::new("Shop.Customer")
        .with("Id", 2)
        .with("Name", "Bob")
        .with("Age", 25)
        .with("Address", address("Bergen"))
        .with("Emails", Value::from(Vec::<Value>::new()))
        .with(
            "Books",
            Value::from(vec![
                book(11, "Cosmos", "12.00", "Science"),
                book(12, "SPQR", "15.00", "History"),
            ]),
        )
        .with("Orders", Value::from(Vec::<Value>::new()));
    let cid = Record::new("Shop.VipCustomer")
        .with("Id", 3)
        .with("Name", "Cid")
        .with("Age", 41)
        .with("Level", 2)
        .with("Address", address("Oslo"))
        .with("Emails", Value::from(vec![Value::from("cid@example.com")]))
        .with("Books", Value::from(vec![book(13, "Emma", "7.00", "Fiction")]))
        .with("Orders", Value::from(Vec::<Value>::new()));
    let dee = Record::new("Shop.Customer")
        .with("Id", 4)
        .with("Name", "Dee")
        .with("Age", Value::Null)
        .with("Address", Value::Null)
        .with("Emails", Value::from(Vec::<Value>::new()))
        .with("Books", Value::from(Vec::<Value>::new()))
        .with("BestFriend", ann.clone())
        .with("Orders", Value::from(Vec::<Value>::new()));
    vec![ann, bob, cid, dee]
}

/// Every customer's books as a flat set.
pub fn books() -> Vec<Record> {
    customers()
        .iter()
        .filter_map(|c| c.get("Books").and_then(Value::as_collection))
        .flatten()
        .filter_map(Value::as_record)
        .map(|b| (**b).clone())
        .collect()
}

pub fn gadgets() -> Vec<Record> {
    vec![
        Record::new("Shop.Gadget")
            .with("Id", 1)
            .with("Name", "Lamp")
            .with("Watts", 40)
            .with("Color", "Red"),
        Record::new("Shop.Gadget").with("Id", 2).with("Name", "Fan"),
    ]
}

/// Integer `Id`s of the returned items, in result order.
pub fn ids(result: &QueryResult) -> Vec<i64> {
    ids_of(result, "Id")
}

pub fn ids_of(result: &QueryResult, name: &str) -> Vec<i64> {
    result
        .value
        .iter()
        .map(|c| c.value(name).and_then(Value::as_i64).expect("integer property"))
        .collect()
}
