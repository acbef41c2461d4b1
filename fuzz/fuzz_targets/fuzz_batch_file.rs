//! Fuzz target for batch file decoding.
//!
//! Batch files may be torn or corrupted by a crash; decoding must never
//! panic and must account for every complete line.

#![no_main]

use libfuzzer_sys::fuzz_target;
use tq_store::{decode_records, encode_record};

fuzz_target!(|data: &[u8]| {
    let decoded = decode_records(data);

    let complete_lines = data
        .split(|b| *b == b'\n')
        .take(data.iter().filter(|b| **b == b'\n').count())
        .filter(|line| !line.iter().all(u8::is_ascii_whitespace))
        .count();
    assert_eq!(decoded.records.len() + decoded.skipped_lines, complete_lines);

    // Whatever decoded must re-encode
    for record in &decoded.records {
        let _ = encode_record(record);
    }
});
