#![no_main]

use libfuzzer_sys::fuzz_target;
use odata_query::syntax::parse_expression;

fuzz_target!(|data: &[u8]| {
    // Limit input size to avoid OOM on pathological inputs
    if data.len() > 1024 {
        return;
    }
    if let Ok(s) = std::str::from_utf8(data)
        && let Ok(expr) = parse_expression("$filter", s, 0)
    {
        let _ = parse_expression("$filter", &expr.to_string(), 0);
    }
});
