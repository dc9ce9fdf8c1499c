#![no_main]

use libfuzzer_sys::fuzz_target;
use covreport_adapters_sourcemap::{SourceMap, decode_mappings};

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        let _ = decode_mappings(text);
        if let Ok(map) = SourceMap::parse(text, None) {
            for line in 1..4 {
                let _ = map.original_position(line, 0);
            }
        }
    }
});
