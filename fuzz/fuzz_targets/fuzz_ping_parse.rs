#![no_main]

//! Fuzz target for keepalive ping parsing.
//!
//! Arbitrary bytes must never panic the parser, and anything it accepts must
//! parse back to the same ping once serialized.

use libfuzzer_sys::fuzz_target;

use dtls_assoc::Ping;

fuzz_target!(|data: &[u8]| {
    let Ok((rest, ping)) = Ping::parse(data) else {
        return;
    };
    assert!(rest.is_empty());

    let mut out = Vec::new();
    ping.serialize(&mut out);
    let (_, again) = Ping::parse(&out).expect("serialized ping parses");
    assert_eq!(again, ping);
});
