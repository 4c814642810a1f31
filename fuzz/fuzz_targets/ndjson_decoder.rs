#![no_main]
//! Feed arbitrary bytes, split at an arbitrary point, through the line
//! decoder and classifier. Must never panic; raw lines plus the leftover
//! must rebuild the lossily decoded input, whatever the split.

use libfuzzer_sys::fuzz_target;
use proposal_stream_core::{classify_line, LineDecoder};

fn run(chunks: &[&[u8]]) -> String {
    let mut decoder = LineDecoder::with_max_line_len(usize::MAX);
    let mut rebuilt = String::new();
    for chunk in chunks {
        let decoded = decoder.feed(chunk).expect("uncapped decoder never fails");
        for line in decoded.lines() {
            let _ = classify_line(line);
        }
        for raw in decoded.raw_lines() {
            rebuilt.push_str(raw);
            rebuilt.push('\n');
        }
    }
    rebuilt.push_str(&decoder.finish());
    rebuilt
}

fuzz_target!(|data: &[u8]| {
    let Some((&selector, body)) = data.split_first() else {
        return;
    };
    let split = (selector as usize).min(body.len());

    let expected = String::from_utf8_lossy(body);
    assert_eq!(run(&[body]), expected);
    assert_eq!(run(&[&body[..split], &body[split..]]), expected);
});
