use presence_protocol::config::GlobalConfig;
use presence_protocol::core::byte_buffer::RawAdvertisement;
use presence_protocol::credential::{CredentialBook, CredentialSlab};
use presence_protocol::deserializer::{deserialize_advertisement, DeserializeResultKind};

#[test]
fn stress_slot_churn_large_series() {
    // Heavy burst of decodes; every slot must be released once its owner drops
    let book = CredentialBook::try_create_from_slab(CredentialSlab::create().unwrap()).unwrap();
    let inputs: [(&[u8], DeserializeResultKind); 4] = [
        (&[0x00, 0x15, 0x03], DeserializeResultKind::V0),
        (&[0x20, 0x03, 0x03, 0x15, 0x03], DeserializeResultKind::V1),
        (&[0x00], DeserializeResultKind::Error),
        (&[0x20, 0x01, 0x03, 0x01, 0x03], DeserializeResultKind::V1),
    ];

    for _ in 0..50_000 {
        for (bytes, expected) in inputs {
            let adv = RawAdvertisement::try_from_slice(bytes).unwrap();
            let result = deserialize_advertisement(&adv, &book).unwrap();
            assert_eq!(result.kind(), expected);
        }
    }

    let live = GlobalConfig::current_handle_allocations();
    assert_eq!(live.v0_payload, 0);
    assert_eq!(live.legible_v1_sections, 0);
    assert_eq!(live.cred_book, 1);
    assert_eq!(live.cred_slab, 0);
}
