//! # V0 Wire Format
//!
//! Value types and grammar of V0 advertisements.
//!
//! ## Layout
//! ```text
//! plaintext:  [0x00] [de]...
//! encrypted:  [0x01] [salt:2] [identity_token:14 ‖ de...]   (token and DEs encrypted)
//! de:         [len:4 | type:4] [value:len]
//! ```
//!
//! The whole advertisement is at most [`V0_MAX_ADV_LEN`] bytes. Lengths are
//! encoded directly in the DE header; there is no length extension.

use crate::error::{DeserializeError, PresenceError, Result};
use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum length of a V0 advertisement, header included
pub const V0_MAX_ADV_LEN: usize = 24;
/// Header byte of a plaintext V0 advertisement
pub const V0_HEADER_PLAINTEXT: u8 = 0x00;
/// Header byte of an encrypted V0 advertisement
pub const V0_HEADER_ENCRYPTED: u8 = 0x01;
/// Length of the salt following an encrypted V0 header
pub const V0_SALT_LEN: usize = 2;
/// Length of the V0 identity token
pub const V0_IDENTITY_TOKEN_LEN: usize = 14;
/// Bounds of the ciphertext (token plus data elements) of an encrypted V0 advertisement
pub const V0_MIN_CIPHERTEXT_LEN: usize = 16;
pub const V0_MAX_CIPHERTEXT_LEN: usize = V0_MAX_ADV_LEN - 1 - V0_SALT_LEN;

pub const DE_TYPE_PUBLIC_IDENTITY: u8 = 3;
pub const DE_TYPE_TX_POWER: u8 = 5;
pub const DE_TYPE_ACTIONS: u8 = 6;

/// Encoding of a V0 advertisement, taken from the low 5 bits of the header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum V0Encoding {
    Unencrypted,
    Encrypted,
}

impl V0Encoding {
    pub fn from_header(header: u8) -> std::result::Result<Self, DeserializeError> {
        match header & 0x1F {
            0 => Ok(V0Encoding::Unencrypted),
            1 => Ok(V0Encoding::Encrypted),
            _ => Err(DeserializeError::InvalidHeader(header)),
        }
    }

    /// Flavor every data element in this encoding must be legal for
    pub fn flavor(self) -> Flavor {
        match self {
            V0Encoding::Unencrypted => Flavor::Public,
            V0Encoding::Encrypted => Flavor::Private,
        }
    }
}

/// Whether content is broadcast in the clear or encrypted to a credential
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Flavor {
    Public,
    Private,
}

impl fmt::Display for Flavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Flavor::Public => f.write_str("public"),
            Flavor::Private => f.write_str("private"),
        }
    }
}

/// Named boolean bits of the Actions data element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionType {
    CrossDevSdk,
    FastPairSass,
    Finder,
    CallTransfer,
    ActiveUnlock,
    NearbyShare,
    InstantTethering,
    PhoneHub,
}

impl ActionType {
    pub const ALL: [ActionType; 8] = [
        ActionType::CrossDevSdk,
        ActionType::FastPairSass,
        ActionType::Finder,
        ActionType::CallTransfer,
        ActionType::ActiveUnlock,
        ActionType::NearbyShare,
        ActionType::InstantTethering,
        ActionType::PhoneHub,
    ];

    /// Bit offset from the most significant bit of the 16-bit container
    pub fn bit_offset(self) -> u8 {
        match self {
            ActionType::CrossDevSdk => 1,
            ActionType::FastPairSass => 2,
            ActionType::Finder => 3,
            ActionType::CallTransfer => 4,
            ActionType::ActiveUnlock => 8,
            ActionType::NearbyShare => 9,
            ActionType::InstantTethering => 10,
            ActionType::PhoneHub => 11,
        }
    }

    pub fn is_legal_in(self, flavor: Flavor) -> bool {
        match self {
            ActionType::CrossDevSdk | ActionType::NearbyShare => true,
            ActionType::FastPairSass | ActionType::Finder => flavor == Flavor::Public,
            ActionType::CallTransfer
            | ActionType::ActiveUnlock
            | ActionType::InstantTethering
            | ActionType::PhoneHub => flavor == Flavor::Private,
        }
    }

    fn mask(self) -> u16 {
        1 << (15 - self.bit_offset())
    }
}

const CONTEXT_SYNC_MASK: u16 = 0x000F;
const MAX_CONTEXT_SYNC_SEQUENCE_NUMBER: u8 = 0x0F;

fn legal_bits(flavor: Flavor) -> u16 {
    ActionType::ALL
        .iter()
        .filter(|action| action.is_legal_in(flavor))
        .fold(CONTEXT_SYNC_MASK, |bits, action| bits | action.mask())
}

/// Actions bitfield, built for one flavor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct V0Actions {
    flavor: Flavor,
    bits: u16,
}

impl V0Actions {
    pub fn build_new_zeroed(flavor: Flavor) -> Self {
        Self { flavor, bits: 0 }
    }

    pub fn flavor(&self) -> Flavor {
        self.flavor
    }

    /// Set or clear `action`.
    ///
    /// # Errors
    /// Returns [`PresenceError::FlavorMismatch`] without modifying the
    /// bitfield if `action` is not legal for this flavor.
    pub fn try_set_action(&mut self, action: ActionType, value: bool) -> Result<()> {
        if !action.is_legal_in(self.flavor) {
            return Err(PresenceError::FlavorMismatch {
                action,
                flavor: self.flavor,
            });
        }
        if value {
            self.bits |= action.mask();
        } else {
            self.bits &= !action.mask();
        }
        Ok(())
    }

    pub fn has_action(&self, action: ActionType) -> bool {
        self.bits & action.mask() != 0
    }

    /// Container bits in the high half of a `u32`, bit 0 being the MSB
    pub fn as_u32(&self) -> u32 {
        u32::from(self.bits) << 16
    }

    pub fn context_sync_sequence_number(&self) -> u8 {
        (self.bits & CONTEXT_SYNC_MASK) as u8
    }

    pub fn try_set_context_sync_sequence_number(&mut self, value: u8) -> Result<()> {
        if value > MAX_CONTEXT_SYNC_SEQUENCE_NUMBER {
            return Err(PresenceError::ContextSyncSequenceNumberOutOfRange(value));
        }
        self.bits = (self.bits & !CONTEXT_SYNC_MASK) | u16::from(value);
        Ok(())
    }

    /// Number of value bytes on the wire: 1 when the low byte is zero
    pub fn encoded_len(&self) -> usize {
        if self.bits & 0x00FF == 0 {
            1
        } else {
            2
        }
    }

    fn encode_value(&self, buf: &mut BytesMut) {
        let [high, low] = self.bits.to_be_bytes();
        buf.put_u8(high);
        if self.encoded_len() == 2 {
            buf.put_u8(low);
        }
    }

    /// Decode 1 or 2 value bytes under `flavor`
    pub fn try_decode(
        flavor: Flavor,
        value: &[u8],
    ) -> std::result::Result<Self, DeserializeError> {
        let bits = match *value {
            [high] => u16::from(high) << 8,
            [high, low] => u16::from_be_bytes([high, low]),
            _ => {
                return Err(DeserializeError::InvalidLength {
                    de_type: u32::from(DE_TYPE_ACTIONS),
                    len: value.len(),
                })
            }
        };
        if bits & !legal_bits(flavor) != 0 {
            return Err(DeserializeError::IllegalActions { bits, flavor });
        }
        Ok(Self { flavor, bits })
    }
}

/// Transmit power in dBm, -127..=127
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxPower(i8);

impl TxPower {
    pub fn try_build_from_i8(value: i8) -> Result<Self> {
        if value == i8::MIN {
            return Err(PresenceError::TxPowerOutOfRange(value));
        }
        Ok(Self(value))
    }

    pub fn as_i8(&self) -> i8 {
        self.0
    }
}

/// Data elements carried by a V0 advertisement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum V0DataElement {
    TxPower(TxPower),
    Actions(V0Actions),
}

impl V0DataElement {
    /// Flavor restriction of this element; `None` when legal in both
    pub fn flavor(&self) -> Option<Flavor> {
        match self {
            V0DataElement::TxPower(_) => None,
            V0DataElement::Actions(actions) => Some(actions.flavor()),
        }
    }

    /// Encoded size including the DE header byte
    pub fn encoded_len(&self) -> usize {
        1 + match self {
            V0DataElement::TxPower(_) => 1,
            V0DataElement::Actions(actions) => actions.encoded_len(),
        }
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        match self {
            V0DataElement::TxPower(power) => {
                buf.put_u8(de_header(DE_TYPE_TX_POWER, 1));
                buf.put_i8(power.as_i8());
            }
            V0DataElement::Actions(actions) => {
                buf.put_u8(de_header(DE_TYPE_ACTIONS, actions.encoded_len()));
                actions.encode_value(buf);
            }
        }
    }
}

fn de_header(de_type: u8, len: usize) -> u8 {
    ((len as u8) << 4) | de_type
}

/// Parse the data elements of a plaintext (or decrypted) V0 payload.
///
/// The public identity element may only appear first, and only when
/// `flavor` is public; it is skipped. At least one other element is required.
pub fn parse_data_elements(
    flavor: Flavor,
    mut input: &[u8],
) -> std::result::Result<Vec<V0DataElement>, DeserializeError> {
    let mut des = Vec::new();
    let mut first = true;

    while let Some((&header, rest)) = input.split_first() {
        let len = usize::from(header >> 4);
        let de_type = header & 0x0F;
        if rest.len() < len {
            return Err(DeserializeError::Truncated("V0 data element"));
        }
        let (value, rest) = rest.split_at(len);
        input = rest;

        match de_type {
            DE_TYPE_PUBLIC_IDENTITY => {
                if !first || flavor != Flavor::Public {
                    return Err(DeserializeError::UnexpectedIdentity);
                }
                if len != 0 {
                    return Err(DeserializeError::InvalidLength {
                        de_type: u32::from(de_type),
                        len,
                    });
                }
            }
            DE_TYPE_TX_POWER => {
                let [raw] = *value else {
                    return Err(DeserializeError::InvalidLength {
                        de_type: u32::from(de_type),
                        len,
                    });
                };
                let power = raw as i8;
                let power = TxPower::try_build_from_i8(power)
                    .map_err(|_| DeserializeError::InvalidTxPower(power))?;
                des.push(V0DataElement::TxPower(power));
            }
            DE_TYPE_ACTIONS => {
                des.push(V0DataElement::Actions(V0Actions::try_decode(flavor, value)?));
            }
            other => return Err(DeserializeError::UnknownDataElementType(u32::from(other))),
        }
        first = false;
    }

    if des.is_empty() {
        return Err(DeserializeError::NoDataElements);
    }
    Ok(des)
}
