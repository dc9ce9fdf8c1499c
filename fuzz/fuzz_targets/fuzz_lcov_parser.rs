#![no_main]

use libfuzzer_sys::fuzz_target;
use covreport_adapters_coverage::parse_lcov;

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        // Malformed records must surface as errors, never panics
        let _ = parse_lcov(text);
    }
});
