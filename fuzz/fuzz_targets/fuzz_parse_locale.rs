#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Interpret the input as arbitrary text from the portal
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    // Exercise the locale parsers and the schedule parser; none of these
    // may panic, whatever the portal serves
    let _ = elektra::parser::parse_czech_decimal(Some(text));
    let _ = elektra::parser::parse_czech_timestamp(text);
    let _ = elektra::hdo::parse_windows(text);
});
