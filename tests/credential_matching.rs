//! Credential search correctness with a sharded search
//!
//! Every test in this binary configures the same shard count before decoding,
//! so whichever test runs first installs it.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use presence_protocol::builder::{V0AdvertisementBuilder, V1AdvertisementBuilder, V1SectionBuilder};
use presence_protocol::config::GlobalConfig;
use presence_protocol::core::byte_buffer::RawAdvertisement;
use presence_protocol::credential::{
    CredentialBook, CredentialSlab, V0BroadcastCredential, V1BroadcastCredential,
};
use presence_protocol::deserializer::{deserialize_advertisement, DeserializedIdentityKind};
use presence_protocol::protocol::v0::{TxPower, V0DataElement};
use presence_protocol::protocol::v1::{V1DataElement, VerificationMode};
use proptest::prelude::*;

const NUM_SHARDS: u8 = 4;

fn configure_shards() {
    let _ = GlobalConfig::set_num_shards(NUM_SHARDS);
}

fn v0_credential(seed: u8) -> V0BroadcastCredential {
    V0BroadcastCredential::new([seed; 32], [seed.wrapping_add(1); 14])
}

fn v1_credential(seed: u8) -> V1BroadcastCredential {
    V1BroadcastCredential::new([seed; 32], [seed.wrapping_add(1); 16], [seed.wrapping_add(2); 32])
}

fn v0_advertisement(sender: V0BroadcastCredential) -> RawAdvertisement {
    let mut builder = V0AdvertisementBuilder::create_encrypted(sender, [0xAB, 0xCD]).unwrap();
    builder
        .try_add_de(V0DataElement::TxPower(TxPower::try_build_from_i8(12).unwrap()))
        .unwrap();
    builder.try_serialize().unwrap()
}

// Property: the matching V0 credential is found wherever it sits in the book
proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]
    #[test]
    fn prop_v0_match_regardless_of_position(decoys in 0usize..40, position in 0usize..40) {
        configure_shards();
        let position = position % (decoys + 1);
        let target = v0_credential(200);

        let mut slab = CredentialSlab::create().unwrap();
        let mut decoy_seeds = 0u8..;
        for i in 0..=decoys {
            if i == position {
                slab.add_v0_credential(target.derive_discovery_credential(999, Vec::new()).unwrap()).unwrap();
            } else {
                let seed = decoy_seeds.next().unwrap();
                let cred_id = u32::from(seed);
                slab.add_v0_credential(v0_credential(seed).derive_discovery_credential(cred_id, Vec::new()).unwrap()).unwrap();
            }
        }
        let book = CredentialBook::try_create_from_slab(slab).unwrap();
        prop_assert_eq!(book.num_v0_credentials(), decoys + 1);

        let adv = v0_advertisement(target);
        let legible = deserialize_advertisement(&adv, &book).unwrap().into_v0().into_legible();
        prop_assert_eq!(legible.identity_kind(), DeserializedIdentityKind::Decrypted);
        let details = legible.into_payload().try_get_identity_details().unwrap();
        prop_assert_eq!(details.cred_id(), 999);
    }
}

// Property: the matching V1 credential is found wherever it sits in the book
proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]
    #[test]
    fn prop_v1_match_regardless_of_position(decoys in 0usize..20, position in 0usize..20, signed in any::<bool>()) {
        configure_shards();
        let position = position % (decoys + 1);
        let target = v1_credential(200);

        let mut slab = CredentialSlab::create().unwrap();
        for i in 0..=decoys {
            let credential = if i == position {
                target.derive_discovery_credential(777, Vec::new()).unwrap()
            } else {
                v1_credential(i as u8).derive_discovery_credential(i as u32, Vec::new()).unwrap()
            };
            slab.add_v1_credential(credential).unwrap();
        }
        let book = CredentialBook::try_create_from_slab(slab).unwrap();

        let mode = if signed { VerificationMode::Signature } else { VerificationMode::Mic };
        let mut section = V1SectionBuilder::encrypted(target, mode, [0x77; 16]);
        section.try_add_de(V1DataElement::try_new(5, vec![12]).unwrap()).unwrap();
        let mut builder = V1AdvertisementBuilder::create().unwrap();
        builder.try_add_section(section).unwrap();
        let adv = builder.try_serialize().unwrap();

        let v1 = deserialize_advertisement(&adv, &book).unwrap().into_v1();
        prop_assert_eq!(v1.num_legible_sections(), 1);
        let details = v1.try_get_section(0).unwrap().try_get_identity_details().unwrap();
        prop_assert_eq!(details.cred_id(), 777);
        prop_assert_eq!(details.verification_mode(), mode);
    }
}

#[test]
fn test_shard_count_installed() {
    configure_shards();
    assert_eq!(GlobalConfig::num_shards(), NUM_SHARDS);
    assert!(!GlobalConfig::set_num_shards(2));
}

#[test]
fn test_metadata_of_matched_credential() {
    configure_shards();
    let sender = v0_credential(50);
    let metadata = b"device name".to_vec();

    let mut slab = CredentialSlab::create().unwrap();
    slab.add_v0_credential(v0_credential(1).derive_discovery_credential(1, Vec::new()).unwrap())
        .unwrap();
    let encrypted = sender.encrypt_metadata(&metadata).unwrap();
    slab.add_v0_credential(sender.derive_discovery_credential(2, encrypted).unwrap())
        .unwrap();
    let book = CredentialBook::try_create_from_slab(slab).unwrap();

    let payload = deserialize_advertisement(&v0_advertisement(sender), &book)
        .unwrap()
        .into_v0()
        .into_legible()
        .into_payload();
    assert_eq!(payload.try_decrypt_metadata().unwrap(), metadata);
}

#[test]
fn test_v1_metadata_and_de_salt() {
    configure_shards();
    let sender = v1_credential(90);
    let metadata = b"v1 metadata".to_vec();

    let mut slab = CredentialSlab::create().unwrap();
    let encrypted = sender.encrypt_metadata(&metadata).unwrap();
    slab.add_v1_credential(sender.derive_discovery_credential(3, encrypted).unwrap())
        .unwrap();
    let book = CredentialBook::try_create_from_slab(slab).unwrap();

    let mut section = V1SectionBuilder::encrypted(sender, VerificationMode::Mic, [0x10; 16]);
    section
        .try_add_de(V1DataElement::try_new(9, vec![1, 2]).unwrap())
        .unwrap();
    section
        .try_add_de(V1DataElement::try_new(10, vec![3]).unwrap())
        .unwrap();
    let mut builder = V1AdvertisementBuilder::create().unwrap();
    builder.try_add_section(section).unwrap();
    let adv = builder.try_serialize().unwrap();

    let v1 = deserialize_advertisement(&adv, &book).unwrap().into_v1();
    let section = v1.try_get_section(0).unwrap();
    assert_eq!(section.try_decrypt_metadata().unwrap(), metadata);

    // DEs start right after salt and identity token
    let first = section.try_get_de(0).unwrap();
    let second = section.try_get_de(1).unwrap();
    assert_eq!(first.offset(), 33);
    assert_eq!(second.offset(), 36);

    let salt_a = section.derive_salt_for_offset(first.offset()).unwrap();
    let salt_b = section.derive_salt_for_offset(second.offset()).unwrap();
    assert_ne!(salt_a, salt_b);
    assert_eq!(salt_a, section.derive_salt_for_offset(33).unwrap());
}
