#![allow(clippy::unwrap_used, clippy::expect_used)]

use presence_protocol::builder::V0AdvertisementBuilder;
use presence_protocol::credential::{CredentialBook, CredentialSlab, V0BroadcastCredential};
use presence_protocol::deserializer::{deserialize_advertisement, DeserializedIdentityKind};
use presence_protocol::protocol::v0::{TxPower, V0DataElement};
use std::thread;

#[test]
fn concurrent_decode_shared_book() {
    let iterations = 2_000usize;
    let senders: Vec<V0BroadcastCredential> = (0..8u8)
        .map(|i| V0BroadcastCredential::new([i; 32], [i ^ 0x5A; 14]))
        .collect();

    let mut slab = CredentialSlab::create().unwrap();
    for (i, sender) in senders.iter().enumerate() {
        slab.add_v0_credential(sender.derive_discovery_credential(i as u32, Vec::new()).unwrap())
            .unwrap();
    }
    let book = CredentialBook::try_create_from_slab(slab).unwrap();

    thread::scope(|scope| {
        for (i, sender) in senders.iter().enumerate() {
            let book = &book;
            scope.spawn(move || {
                for n in 0..iterations {
                    let power = (n % 100) as i8;
                    let mut builder =
                        V0AdvertisementBuilder::create_encrypted(sender.clone(), (n as u16).to_be_bytes())
                            .unwrap();
                    builder
                        .try_add_de(V0DataElement::TxPower(TxPower::try_build_from_i8(power).unwrap()))
                        .unwrap();
                    let adv = builder.try_serialize().unwrap();

                    let legible = deserialize_advertisement(&adv, book)
                        .unwrap()
                        .into_v0()
                        .into_legible();
                    assert_eq!(legible.identity_kind(), DeserializedIdentityKind::Decrypted);
                    let payload = legible.into_payload();
                    assert_eq!(payload.try_get_identity_details().unwrap().cred_id(), i as u32);
                    assert_eq!(
                        payload.try_get_de(0).unwrap(),
                        V0DataElement::TxPower(TxPower::try_build_from_i8(power).unwrap())
                    );
                }
            });
        }
    });
}
