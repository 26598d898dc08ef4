#![no_main]

use libfuzzer_sys::fuzz_target;
use strcloak::{classfile::ClassFile, instrument::{transform, RewriteContext}};

fuzz_target!(|data: &[u8]| {
    let ctx = RewriteContext::new(b"fuzz");
    if let Ok(rewritten) = transform(data, &ctx) {
        // whatever the engine emits must parse again
        let _ = ClassFile::parse(&rewritten).expect("rewritten class does not parse");
    }
});
