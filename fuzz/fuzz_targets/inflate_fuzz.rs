#![no_main]
use libfuzzer_sys::fuzz_target;
use oxipatch::inflate::NodeDecompressor;

fuzz_target!(|data: &[u8]| {
    // Arbitrary bytes as a compressed region: open may reject the header,
    // and reads may fail, but nothing panics and output stays bounded.
    let mut src: &[u8] = data;
    let Ok(mut dec) = NodeDecompressor::open(&mut src, 0, data.len() as u64) else {
        return;
    };
    let mut out = [0u8; 4096];
    for _ in 0..64 {
        if dec.read(&mut out).is_err() {
            break;
        }
    }
});
