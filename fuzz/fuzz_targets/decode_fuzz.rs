#![no_main]
use std::io::{Cursor, sink};

use libfuzzer_sys::fuzz_target;
use vcpatch::{DecodeOptions, apply_diff_with_options, inspect};

fuzz_target!(|data: &[u8]| {
    // Arbitrary bytes must only ever produce errors, never panics.
    // A small window cap keeps hostile size fields from dominating the run.
    let opts = DecodeOptions {
        max_window_size: 1 << 20,
        ..DecodeOptions::default()
    };
    let _ = apply_diff_with_options(&mut Cursor::new(b""), data, &mut sink(), &opts);
    let _ = inspect(data);

    // Also fuzz with a non-empty source.
    if data.len() >= 2 {
        let split = data.len() / 2;
        let (source, delta) = data.split_at(split);
        let _ = apply_diff_with_options(&mut Cursor::new(source), delta, &mut sink(), &opts);
    }
});
