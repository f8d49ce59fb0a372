#![no_main]

use libfuzzer_sys::fuzz_target;
use presence_protocol::core::byte_buffer::RawAdvertisement;
use presence_protocol::credential::{CredentialBook, CredentialSlab};
use presence_protocol::deserializer::{deserialize_advertisement, DeserializeResult};

fuzz_target!(|data: &[u8]| {
    // Fuzz advertisement decoding - test for panics, crashes, infinite loops
    let Ok(adv) = RawAdvertisement::try_from_slice(data) else {
        return;
    };
    let Ok(slab) = CredentialSlab::create() else {
        return;
    };
    let Ok(book) = CredentialBook::try_create_from_slab(slab) else {
        return;
    };

    // Walk every accessor the decoded value offers
    match deserialize_advertisement(&adv, &book) {
        Ok(DeserializeResult::V1(v1)) => {
            for i in 0..v1.num_legible_sections() {
                if let Ok(section) = v1.try_get_section(i) {
                    for j in 0..section.num_des() {
                        let _ = section.try_get_de(j);
                    }
                }
            }
        }
        Ok(DeserializeResult::V0(_)) | Ok(DeserializeResult::Error) | Err(_) => {}
    }
});
