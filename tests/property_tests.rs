//! Property-based tests using proptest
//!
//! These tests validate encode/decode invariants across a wide range of
//! randomly generated data elements, credentials and salts.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use presence_protocol::builder::{V0AdvertisementBuilder, V1AdvertisementBuilder, V1SectionBuilder};
use presence_protocol::core::byte_buffer::RawAdvertisement;
use presence_protocol::credential::{
    CredentialBook, CredentialSlab, V0BroadcastCredential, V1BroadcastCredential,
};
use presence_protocol::deserializer::{deserialize_advertisement, DeserializedIdentityKind};
use presence_protocol::error::PresenceError;
use presence_protocol::protocol::v0::{ActionType, Flavor, TxPower, V0Actions, V0DataElement};
use presence_protocol::protocol::v1::{V1DataElement, VerificationMode};
use proptest::prelude::*;

fn tx_power() -> impl Strategy<Value = V0DataElement> {
    (-127i8..=127).prop_map(|power| V0DataElement::TxPower(TxPower::try_build_from_i8(power).unwrap()))
}

fn actions(flavor: Flavor) -> impl Strategy<Value = V0DataElement> {
    let legal: Vec<ActionType> = ActionType::ALL
        .iter()
        .copied()
        .filter(|action| action.is_legal_in(flavor))
        .collect();
    (prop::collection::vec(any::<bool>(), legal.len()), 0u8..16).prop_map(move |(bits, seq)| {
        let mut actions = V0Actions::build_new_zeroed(flavor);
        for (action, set) in legal.iter().zip(bits) {
            actions.try_set_action(*action, set).unwrap();
        }
        actions.try_set_context_sync_sequence_number(seq).unwrap();
        V0DataElement::Actions(actions)
    })
}

fn v0_de(flavor: Flavor) -> impl Strategy<Value = V0DataElement> {
    prop_oneof![tx_power(), actions(flavor)]
}

fn v1_de() -> impl Strategy<Value = V1DataElement> {
    (0u32..(1 << 28), prop::collection::vec(any::<u8>(), 0..40))
        .prop_map(|(de_type, payload)| V1DataElement::try_new(de_type, payload).unwrap())
}

fn empty_book() -> CredentialBook {
    CredentialBook::try_create_from_slab(CredentialSlab::create().unwrap()).unwrap()
}

fn decode_v0(adv: &RawAdvertisement, book: &CredentialBook) -> (DeserializedIdentityKind, Vec<V0DataElement>) {
    let legible = deserialize_advertisement(adv, book).unwrap().into_v0().into_legible();
    let kind = legible.identity_kind();
    let num_des = legible.num_des();
    let payload = legible.into_payload();
    let des = (0..num_des).map(|i| payload.try_get_de(i).unwrap()).collect();
    (kind, des)
}

// Property: public V0 data elements survive a build/decode cycle
proptest! {
    #[test]
    fn prop_v0_public_roundtrip(de in v0_de(Flavor::Public)) {
        let mut builder = V0AdvertisementBuilder::create_public().unwrap();
        builder.try_add_de(de).unwrap();
        let adv = builder.try_serialize().unwrap();

        let (kind, des) = decode_v0(&adv, &empty_book());
        prop_assert_eq!(kind, DeserializedIdentityKind::Plaintext);
        prop_assert_eq!(des, vec![de]);
    }
}

// Property: encrypted V0 data elements decrypt back under the matching credential
proptest! {
    #[test]
    fn prop_v0_encrypted_roundtrip(
        de in v0_de(Flavor::Private),
        key_seed in any::<[u8; 32]>(),
        token in any::<[u8; 14]>(),
        salt in any::<[u8; 2]>(),
        cred_id in any::<u32>(),
    ) {
        let broadcast = V0BroadcastCredential::new(key_seed, token);
        let mut slab = CredentialSlab::create().unwrap();
        slab.add_v0_credential(broadcast.derive_discovery_credential(cred_id, Vec::new()).unwrap()).unwrap();
        let book = CredentialBook::try_create_from_slab(slab).unwrap();

        let mut builder = V0AdvertisementBuilder::create_encrypted(broadcast, salt).unwrap();
        builder.try_add_de(de).unwrap();
        let adv = builder.try_serialize().unwrap();

        let legible = deserialize_advertisement(&adv, &book).unwrap().into_v0().into_legible();
        prop_assert_eq!(legible.identity_kind(), DeserializedIdentityKind::Decrypted);
        let payload = legible.into_payload();
        prop_assert_eq!(payload.try_get_de(0).unwrap(), de);

        let details = payload.try_get_identity_details().unwrap();
        prop_assert_eq!(details.cred_id(), cred_id);
        prop_assert_eq!(details.salt(), salt);
        prop_assert_eq!(details.identity_token(), token);
    }
}

// Property: V1 sections decode to the data elements they were built from
proptest! {
    #[test]
    fn prop_v1_roundtrip(
        des in prop::collection::vec(v1_de(), 1..4),
        mode in prop_oneof![Just(None), Just(Some(VerificationMode::Mic)), Just(Some(VerificationMode::Signature))],
        key_seed in any::<[u8; 32]>(),
        salt in any::<[u8; 16]>(),
    ) {
        let broadcast = V1BroadcastCredential::new(key_seed, [0x5A; 16], [0x33; 32]);
        let mut slab = CredentialSlab::create().unwrap();
        slab.add_v1_credential(broadcast.derive_discovery_credential(9, Vec::new()).unwrap()).unwrap();
        let book = CredentialBook::try_create_from_slab(slab).unwrap();

        let mut section = match mode {
            None => V1SectionBuilder::public(),
            Some(mode) => V1SectionBuilder::encrypted(broadcast, mode, salt),
        };
        for de in &des {
            section.try_add_de(de.clone()).unwrap();
        }
        let mut builder = V1AdvertisementBuilder::create().unwrap();
        builder.try_add_section(section).unwrap();
        let adv = builder.try_serialize().unwrap();

        let v1 = deserialize_advertisement(&adv, &book).unwrap().into_v1();
        prop_assert_eq!(v1.num_legible_sections(), 1);
        prop_assert_eq!(v1.num_undecryptable_sections(), 0);

        let section = v1.try_get_section(0).unwrap();
        prop_assert_eq!(usize::from(section.num_des()), des.len());
        for (i, expected) in des.iter().enumerate() {
            let decoded = section.try_get_de(i as u8).unwrap();
            prop_assert_eq!(decoded.de_type(), expected.de_type());
            prop_assert_eq!(decoded.payload(), expected.payload());
        }
        match mode {
            None => prop_assert_eq!(section.identity_kind(), DeserializedIdentityKind::Plaintext),
            Some(mode) => {
                prop_assert_eq!(section.identity_kind(), DeserializedIdentityKind::Decrypted);
                let details = section.try_get_identity_details().unwrap();
                prop_assert_eq!(details.cred_id(), 9);
                prop_assert_eq!(details.verification_mode(), mode);
                prop_assert_eq!(details.salt(), salt);
            }
        }
    }
}

// Property: data element access succeeds exactly for indices below the count
proptest! {
    #[test]
    fn prop_v0_de_index_bounds(count in 1usize..=11, index in any::<u8>()) {
        let mut builder = V0AdvertisementBuilder::create_public().unwrap();
        for _ in 0..count {
            builder.try_add_de(V0DataElement::TxPower(TxPower::try_build_from_i8(1).unwrap())).unwrap();
        }
        let adv = builder.try_serialize().unwrap();
        let payload = deserialize_advertisement(&adv, &empty_book())
            .unwrap()
            .into_v0()
            .into_legible()
            .into_payload();

        let result = payload.try_get_de(index);
        if usize::from(index) < count {
            prop_assert!(result.is_ok());
        } else {
            let is_out_of_range = matches!(result, Err(PresenceError::IndexOutOfRange { .. }));
            prop_assert!(is_out_of_range);
        }
    }
}

// Property: section access succeeds exactly for indices below the legible count
proptest! {
    #[test]
    fn prop_v1_section_index_bounds(count in 1usize..=8, index in any::<u8>()) {
        let mut builder = V1AdvertisementBuilder::create().unwrap();
        for _ in 0..count {
            let mut section = V1SectionBuilder::public();
            section.try_add_de(V1DataElement::try_new(5, vec![1]).unwrap()).unwrap();
            builder.try_add_section(section).unwrap();
        }
        let adv = builder.try_serialize().unwrap();
        let v1 = deserialize_advertisement(&adv, &empty_book()).unwrap().into_v1();
        prop_assert_eq!(usize::from(v1.num_legible_sections()), count);

        let result = v1.try_get_section(index);
        if usize::from(index) < count {
            prop_assert!(result.is_ok());
        } else {
            let is_out_of_range = matches!(result, Err(PresenceError::IndexOutOfRange { .. }));
            prop_assert!(is_out_of_range);
        }
    }
}

// Property: arbitrary input never panics and never fails for a reason other than exhaustion
proptest! {
    #[test]
    fn prop_deserialize_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..=255)) {
        let adv = RawAdvertisement::try_from_slice(&bytes).unwrap();
        prop_assert!(deserialize_advertisement(&adv, &empty_book()).is_ok());
    }
}
