//! Fuzz target for tracequeue.json parsing and validation.

#![no_main]

use libfuzzer_sys::fuzz_target;
use tq_config::{validate_pipeline, PipelineConfig};

fuzz_target!(|data: &str| {
    if let Ok(config) = serde_json::from_str::<PipelineConfig>(data) {
        // Validation should report errors, never panic
        let _ = validate_pipeline(&config);
    }
});
