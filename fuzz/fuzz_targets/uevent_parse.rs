#![no_main]
use libfuzzer_sys::fuzz_target;

use devd_core::uevent::Uevent;

fuzz_target!(|data: &[u8]| {
    // The parser must be total over arbitrary datagrams.
    let event = Uevent::parse(data);
    let _ = event.device_numbers();
    let _ = event.device_basename(64);
    // Re-encoding what we parsed must parse back to the same event.
    assert_eq!(Uevent::parse(&event.to_payload()), event);
});
