#![no_main]
use addon_host::module::validation::{inspect_bytes, ValidationPolicy};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Verdicts must be produced for any input; a bad image is a rejection
    let policy = ValidationPolicy {
        deny: vec!["^System\\.Net".to_string(), "Unsafe".to_string()],
        allow: None,
    };
    let Ok(compiled) = policy.compile() else {
        return;
    };

    let verdict = inspect_bytes(data, &compiled);
    if !verdict.accepted {
        assert!(verdict.reason.is_some());
    }
});
