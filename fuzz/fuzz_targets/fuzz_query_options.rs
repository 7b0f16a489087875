#![no_main]

use std::sync::{Arc, OnceLock};

use libfuzzer_sys::fuzz_target;
use odata_edm::{
    EdmModel, EdmModelBuilder, PrimitiveKind, Property, Record, StructuredType, TypeRef,
};
use odata_query::{ODataConfig, QueryEngine};

fn engine() -> &'static QueryEngine {
    static ENGINE: OnceLock<QueryEngine> = OnceLock::new();
    ENGINE.get_or_init(|| {
        let model: Arc<EdmModel> = EdmModelBuilder::new("Fuzz")
            .add_structured_type(
                StructuredType::entity("Fuzz", "Item")
                    .with_property(Property::structural("Id", TypeRef::int32().required()))
                    .with_property(Property::structural("Name", TypeRef::string()))
                    .with_property(Property::structural(
                        "Price",
                        TypeRef::primitive(PrimitiveKind::Decimal),
                    ))
                    .with_property(Property::structural(
                        "Tags",
                        TypeRef::collection(TypeRef::string()),
                    ))
                    .with_key("Id"),
            )
            .add_entity_set("Items", "Fuzz.Item")
            .build()
            .expect("fuzz model is valid");
        QueryEngine::new(model, Arc::new(ODataConfig::default()))
    })
}

fuzz_target!(|data: &[u8]| {
    if data.len() > 2048 {
        return;
    }
    let Ok(raw) = std::str::from_utf8(data) else {
        return;
    };
    let engine = engine();
    let Ok(target) = engine.entity_set("Items") else {
        return;
    };
    let rows = vec![
        Record::new("Fuzz.Item").with("Id", 1).with("Name", "a"),
        Record::new("Fuzz.Item").with("Id", 2),
    ];
    // Errors are expected; panics are not
    let _ = engine.execute(&target, raw, &rows);
});
