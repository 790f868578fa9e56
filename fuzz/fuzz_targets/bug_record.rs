#![no_main]

use bugferry_core::model::BugRecord;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(bug) = serde_json::from_slice::<BugRecord>(data) {
        let _ = bug.validate();
    }
});
