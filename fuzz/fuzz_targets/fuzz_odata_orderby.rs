#![no_main]

use libfuzzer_sys::fuzz_target;
use odata_query::syntax::parse_orderby;

fuzz_target!(|data: &[u8]| {
    if data.len() > 1024 {
        return;
    }
    if let Ok(s) = std::str::from_utf8(data) {
        let _ = parse_orderby("$orderby", s, 0);
    }
});
