#![no_main]

use libfuzzer_sys::fuzz_target;
use presence_protocol::builder::{V1AdvertisementBuilder, V1SectionBuilder};
use presence_protocol::credential::{CredentialBook, CredentialSlab};
use presence_protocol::deserializer::{deserialize_advertisement, DeserializeResult};
use presence_protocol::protocol::v1::V1DataElement;

fuzz_target!(|data: &[u8]| {
    // Fuzz V1 encoding: whatever the builder accepts must decode again
    if data.len() < 4 {
        return;
    }
    let de_type = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) >> 4;
    let Ok(de) = V1DataElement::try_new(de_type, data[4..].to_vec()) else {
        return;
    };

    let mut section = V1SectionBuilder::public();
    if section.try_add_de(de).is_err() {
        return;
    }
    let Ok(mut builder) = V1AdvertisementBuilder::create() else {
        return;
    };
    if builder.try_add_section(section).is_err() {
        return;
    }
    let Ok(adv) = builder.try_serialize() else {
        return;
    };

    let Ok(slab) = CredentialSlab::create() else {
        return;
    };
    let Ok(book) = CredentialBook::try_create_from_slab(slab) else {
        return;
    };
    assert!(matches!(
        deserialize_advertisement(&adv, &book),
        Ok(DeserializeResult::V1(_))
    ));
});
