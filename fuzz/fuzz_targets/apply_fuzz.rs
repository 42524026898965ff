#![no_main]
use libfuzzer_sys::fuzz_target;
use oxipatch::hdiff::{HdiffEngine, PatchEngine};
use oxipatch::stream::MemOutput;

fuzz_target!(|data: &[u8]| {
    // Fuzz the engine with arbitrary diff bytes. It must never panic —
    // only return errors.
    if data.is_empty() {
        return;
    }
    let split = data.len() / 4;
    let (old, diff) = data.split_at(split);

    let mut old_stream: &[u8] = old;
    let mut diff_stream: &[u8] = diff;
    let mut out = MemOutput::new();
    let _ = HdiffEngine::default().apply(&mut old_stream, &mut out, &mut diff_stream);
});
