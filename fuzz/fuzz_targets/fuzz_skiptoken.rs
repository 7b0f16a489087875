#![no_main]

use libfuzzer_sys::fuzz_target;
use odata_query::SkipToken;

fuzz_target!(|data: &[u8]| {
    if data.len() > 2048 {
        return;
    }
    if let Ok(s) = std::str::from_utf8(data)
        && let Ok(token) = SkipToken::decode(s)
    {
        let _ = token.validate_against("Id asc", 1, None);
        let _ = token.encode();
    }
});
