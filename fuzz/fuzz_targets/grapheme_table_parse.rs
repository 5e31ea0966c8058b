//! Fuzz target for GraphemeTable::parse
//!
//! The emoji table is a startup asset, but a corrupt file must produce an
//! error rather than a crash, and any parsed table must answer probes safely.

#![no_main]

use libfuzzer_sys::fuzz_target;
use pixelchat_render::GraphemeTable;

fuzz_target!(|data: &[u8]| {
    let Ok(table) = GraphemeTable::parse(data) else {
        return;
    };

    let text = String::from_utf8_lossy(data);
    let mut chars = text.char_indices();
    while let Some((i, c)) = chars.next() {
        let rest = &text[i + c.len_utf8()..];
        if let Some(hit) = table.probe(c, rest) {
            assert!(hit.suffix_len <= rest.len());
        }
    }
});
