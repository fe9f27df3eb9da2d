#![no_main]
use libfuzzer_sys::fuzz_target;

use devd_core::fnmatch;

fuzz_target!(|input: (&str, &str, bool)| {
    let (pattern, text, pathname) = input;
    // Bounded inputs: pathological star chains are exponential by nature.
    if pattern.len() <= 32 && text.len() <= 128 {
        let _ = fnmatch(pattern, text, pathname);
    }
});
