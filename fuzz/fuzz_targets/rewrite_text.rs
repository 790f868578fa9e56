#![no_main]

use bugferry_core::rewrite::RewritePipeline;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let _ = RewritePipeline::new("https://bugs.example.org").apply(text);
});
