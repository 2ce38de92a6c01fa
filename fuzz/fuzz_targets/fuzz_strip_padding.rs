#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() >= 16 && data.len() % 16 == 0 {
        let _ = tunnelport::strip_padding(data, 16);
    }
});
