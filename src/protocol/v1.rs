//! # V1 Wire Format
//!
//! Sections, identities and data elements of V1 advertisements.
//!
//! ## Layout
//! ```text
//! advertisement:  [0x20] section...                    (1..=8 sections, <= 254 bytes)
//! section:        [len:u8 >= 1] [contents:len]
//! contents:       [0x03] de...                          public
//!                 [0x01] salt:16 token_ct:16 de_ct mic:16
//!                 [0x02] salt:16 token_ct:16 ct(de... ‖ signature:64)
//! de header:      0LLLTTTT                              len <= 7, type <= 15
//!                 1LLLLLLL [1TTTTTTT]* 0TTTTTTT         type as 1..=4 big-endian 7-bit groups
//! ```
//!
//! A data element's offset is the position of its header within the section
//! contents, so DEs of encrypted sections start at offset 33.

use crate::error::{DeserializeError, PresenceError, Result};
use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const V1_HEADER: u8 = 0x20;
pub const V1_MAX_ADV_LEN: usize = 254;
pub const V1_MAX_SECTIONS: usize = 8;
/// Largest section contents that fit a single-section advertisement
pub const V1_MAX_SECTION_CONTENTS_LEN: usize = V1_MAX_ADV_LEN - 2;

pub const SECTION_IDENTITY_MIC: u8 = 0x01;
pub const SECTION_IDENTITY_SIGNATURE: u8 = 0x02;
pub const SECTION_IDENTITY_PUBLIC: u8 = 0x03;

pub const V1_SALT_LEN: usize = 16;
pub const V1_IDENTITY_TOKEN_LEN: usize = 16;
pub const V1_MIC_LEN: usize = 16;
pub const V1_SIGNATURE_LEN: usize = 64;
/// Identity byte, salt and token preceding the encrypted body
pub const ENCRYPTED_SECTION_PREFIX_LEN: usize = 1 + V1_SALT_LEN + V1_IDENTITY_TOKEN_LEN;

pub const MAX_DE_PAYLOAD_LEN: usize = 127;
/// Largest type code representable in four 7-bit groups
pub const MAX_DE_TYPE: u32 = (1 << 28) - 1;
const MAX_DE_TYPE_GROUPS: usize = 4;

/// How an encrypted section authenticates its contents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VerificationMode {
    Mic,
    Signature,
}

impl VerificationMode {
    pub fn identity_byte(self) -> u8 {
        match self {
            VerificationMode::Mic => SECTION_IDENTITY_MIC,
            VerificationMode::Signature => SECTION_IDENTITY_SIGNATURE,
        }
    }

    /// Bytes an encrypted section of this mode adds around its DEs
    pub fn overhead(self) -> usize {
        ENCRYPTED_SECTION_PREFIX_LEN
            + match self {
                VerificationMode::Mic => V1_MIC_LEN,
                VerificationMode::Signature => V1_SIGNATURE_LEN,
            }
    }
}

impl fmt::Display for VerificationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerificationMode::Mic => f.write_str("MIC"),
            VerificationMode::Signature => f.write_str("signature"),
        }
    }
}

/// A typed, opaque-payload V1 data element
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct V1DataElement {
    de_type: u32,
    payload: Vec<u8>,
    offset: u8,
}

impl V1DataElement {
    /// Build a data element for encoding.
    ///
    /// # Errors
    /// Fails if the payload exceeds 127 bytes or the type needs more than
    /// four 7-bit groups.
    pub fn try_new(de_type: u32, payload: impl Into<Vec<u8>>) -> Result<Self> {
        let payload = payload.into();
        if payload.len() > MAX_DE_PAYLOAD_LEN {
            return Err(PresenceError::InvalidDataElement(format!(
                "payload of {} bytes exceeds {MAX_DE_PAYLOAD_LEN}",
                payload.len()
            )));
        }
        if de_type > MAX_DE_TYPE {
            return Err(PresenceError::InvalidDataElement(format!(
                "type {de_type} exceeds {MAX_DE_TYPE}"
            )));
        }
        Ok(Self {
            de_type,
            payload,
            offset: 0,
        })
    }

    pub fn de_type(&self) -> u32 {
        self.de_type
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Offset of the DE header within its section's contents
    pub fn offset(&self) -> u8 {
        self.offset
    }

    fn uses_short_header(&self) -> bool {
        self.payload.len() <= 7 && self.de_type <= 15
    }

    /// Encoded size including the DE header
    pub fn encoded_len(&self) -> usize {
        let header = if self.uses_short_header() {
            1
        } else {
            1 + type_group_count(self.de_type)
        };
        header + self.payload.len()
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        let len = self.payload.len() as u8;
        if self.uses_short_header() {
            buf.put_u8((len << 4) | self.de_type as u8);
        } else {
            buf.put_u8(0x80 | len);
            let groups = type_group_count(self.de_type);
            for i in (0..groups).rev() {
                let group = ((self.de_type >> (7 * i)) & 0x7F) as u8;
                buf.put_u8(if i == 0 { group } else { group | 0x80 });
            }
        }
        buf.put_slice(&self.payload);
    }
}

fn type_group_count(de_type: u32) -> usize {
    let mut groups = 1;
    while groups < MAX_DE_TYPE_GROUPS && de_type >> (7 * groups) != 0 {
        groups += 1;
    }
    groups
}

/// Parse the data elements of a public or decrypted section body.
///
/// `base_offset` is the position of `input` within the section contents.
pub fn parse_data_elements(
    input: &[u8],
    base_offset: usize,
) -> std::result::Result<Vec<V1DataElement>, DeserializeError> {
    let mut des = Vec::new();
    let mut pos = 0;

    while pos < input.len() {
        let offset = u8::try_from(base_offset + pos)
            .map_err(|_| DeserializeError::TooLong(base_offset + pos))?;
        let header = input[pos];
        pos += 1;

        let (len, de_type) = if header & 0x80 == 0 {
            (usize::from((header >> 4) & 0x07), u32::from(header & 0x0F))
        } else {
            let len = usize::from(header & 0x7F);
            let mut de_type: u32 = 0;
            let mut groups = 0;
            loop {
                let Some(&byte) = input.get(pos) else {
                    return Err(DeserializeError::Truncated("V1 data element type"));
                };
                pos += 1;
                groups += 1;
                de_type = (de_type << 7) | u32::from(byte & 0x7F);
                if byte & 0x80 == 0 {
                    break;
                }
                if groups == MAX_DE_TYPE_GROUPS {
                    return Err(DeserializeError::InvalidDataElementType);
                }
            }
            (len, de_type)
        };

        let payload = input
            .get(pos..pos + len)
            .ok_or(DeserializeError::Truncated("V1 data element"))?;
        pos += len;

        des.push(V1DataElement {
            de_type,
            payload: payload.to_vec(),
            offset,
        });
    }

    Ok(des)
}

/// Encrypted section fields, still in ciphertext form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedSection<'a> {
    pub mode: VerificationMode,
    /// Section length byte as it appeared on the wire
    pub section_len: u8,
    pub salt: [u8; V1_SALT_LEN],
    pub token_ct: [u8; V1_IDENTITY_TOKEN_LEN],
    /// MIC mode: encrypted DEs. Signature mode: encrypted DEs ‖ signature.
    pub body_ct: &'a [u8],
    /// Present only in MIC mode
    pub mic: Option<[u8; V1_MIC_LEN]>,
}

impl EncryptedSection<'_> {
    /// Bytes preceding the encrypted body that every verification covers:
    /// advertisement header, section length and identity byte
    pub fn authenticated_prefix(&self) -> [u8; 3] {
        [V1_HEADER, self.section_len, self.mode.identity_byte()]
    }
}

/// A section split into its identity and still-unparsed body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawSection<'a> {
    Public { des: &'a [u8] },
    Encrypted(EncryptedSection<'a>),
}

fn split_array<const N: usize>(input: &[u8]) -> Option<([u8; N], &[u8])> {
    if input.len() < N {
        return None;
    }
    let (head, rest) = input.split_at(N);
    let mut array = [0u8; N];
    array.copy_from_slice(head);
    Some((array, rest))
}

fn parse_section(contents: &[u8]) -> std::result::Result<RawSection<'_>, DeserializeError> {
    let Some((&identity, rest)) = contents.split_first() else {
        return Err(DeserializeError::EmptySection);
    };
    let mode = match identity {
        SECTION_IDENTITY_PUBLIC => return Ok(RawSection::Public { des: rest }),
        SECTION_IDENTITY_MIC => VerificationMode::Mic,
        SECTION_IDENTITY_SIGNATURE => VerificationMode::Signature,
        other => return Err(DeserializeError::UnknownSectionIdentity(other)),
    };

    let truncated = DeserializeError::Truncated("V1 encrypted section");
    let (salt, rest) = split_array::<V1_SALT_LEN>(rest).ok_or(truncated.clone())?;
    let (token_ct, rest) = split_array::<V1_IDENTITY_TOKEN_LEN>(rest).ok_or(truncated.clone())?;

    let (body_ct, mic) = match mode {
        VerificationMode::Mic => {
            let body_len = rest.len().checked_sub(V1_MIC_LEN).ok_or(truncated)?;
            let (body, mic) = rest.split_at(body_len);
            let mut tag = [0u8; V1_MIC_LEN];
            tag.copy_from_slice(mic);
            (body, Some(tag))
        }
        VerificationMode::Signature => {
            if rest.len() < V1_SIGNATURE_LEN {
                return Err(truncated);
            }
            (rest, None)
        }
    };

    Ok(RawSection::Encrypted(EncryptedSection {
        mode,
        section_len: contents.len() as u8,
        salt,
        token_ct,
        body_ct,
        mic,
    }))
}

/// Split a V1 advertisement into its sections
pub fn parse_sections(adv: &[u8]) -> std::result::Result<Vec<RawSection<'_>>, DeserializeError> {
    let Some((&header, mut rest)) = adv.split_first() else {
        return Err(DeserializeError::EmptyAdvertisement);
    };
    if header != V1_HEADER {
        return Err(DeserializeError::InvalidHeader(header));
    }
    if adv.len() > V1_MAX_ADV_LEN {
        return Err(DeserializeError::TooLong(adv.len()));
    }

    let mut sections = Vec::new();
    while let Some((&len, tail)) = rest.split_first() {
        if len == 0 {
            return Err(DeserializeError::EmptySection);
        }
        if sections.len() == V1_MAX_SECTIONS {
            return Err(DeserializeError::InvalidSectionCount(sections.len() + 1));
        }
        let len = usize::from(len);
        if tail.len() < len {
            return Err(DeserializeError::Truncated("V1 section"));
        }
        let (contents, tail) = tail.split_at(len);
        sections.push(parse_section(contents)?);
        rest = tail;
    }

    if sections.is_empty() {
        return Err(DeserializeError::InvalidSectionCount(0));
    }
    Ok(sections)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_header_roundtrip() {
        let de = V1DataElement::try_new(5, vec![3]).unwrap();
        let mut buf = BytesMut::new();
        de.encode(&mut buf);
        assert_eq!(&buf[..], &[0x15, 0x03]);

        let parsed = parse_data_elements(&buf, 1).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].de_type(), 5);
        assert_eq!(parsed[0].payload(), &[3]);
        assert_eq!(parsed[0].offset(), 1);
    }

    #[test]
    fn test_extended_header_for_large_type() {
        let de = V1DataElement::try_new(300, vec![0xAA]).unwrap();
        let mut buf = BytesMut::new();
        de.encode(&mut buf);
        // 300 = 0b10_0101100 -> groups 0x02, 0x2C
        assert_eq!(&buf[..], &[0x81, 0x82, 0x2C, 0xAA]);
        assert_eq!(de.encoded_len(), buf.len());

        let parsed = parse_data_elements(&buf, 0).unwrap();
        assert_eq!(parsed[0].de_type(), 300);
        assert_eq!(parsed[0].payload(), &[0xAA]);
    }

    #[test]
    fn test_extended_header_for_long_payload() {
        let de = V1DataElement::try_new(2, vec![0u8; 8]).unwrap();
        let mut buf = BytesMut::new();
        de.encode(&mut buf);
        assert_eq!(&buf[..2], &[0x88, 0x02]);
        assert_eq!(de.encoded_len(), 10);
    }

    #[test]
    fn test_offsets_follow_header_positions() {
        let parsed = parse_data_elements(&[0x15, 0x03, 0x00, 0x81, 0x10, 0x07], 33).unwrap();
        let offsets: Vec<u8> = parsed.iter().map(V1DataElement::offset).collect();
        assert_eq!(offsets, vec![33, 35, 36]);
        assert_eq!(parsed[1].de_type(), 0);
        assert!(parsed[1].payload().is_empty());
    }

    #[test]
    fn test_type_overflow_rejected() {
        assert_eq!(
            parse_data_elements(&[0x80, 0x81, 0x81, 0x81, 0x81, 0x01], 0),
            Err(DeserializeError::InvalidDataElementType)
        );
        assert!(parse_data_elements(&[0x80, 0xFF, 0xFF, 0xFF, 0x7F], 0).is_ok());
    }

    #[test]
    fn test_truncation_rejected() {
        assert_eq!(
            parse_data_elements(&[0x80, 0x81], 0),
            Err(DeserializeError::Truncated("V1 data element type"))
        );
        assert_eq!(
            parse_data_elements(&[0x25, 0x01], 0),
            Err(DeserializeError::Truncated("V1 data element"))
        );
    }

    #[test]
    fn test_try_new_bounds() {
        assert!(V1DataElement::try_new(MAX_DE_TYPE, vec![0u8; 127]).is_ok());
        assert!(V1DataElement::try_new(MAX_DE_TYPE + 1, vec![]).is_err());
        assert!(V1DataElement::try_new(1, vec![0u8; 128]).is_err());
    }

    #[test]
    fn test_parse_public_section() {
        let sections = parse_sections(&[0x20, 0x03, 0x03, 0x15, 0x03]).unwrap();
        assert_eq!(
            sections,
            vec![RawSection::Public {
                des: &[0x15, 0x03]
            }]
        );
    }

    #[test]
    fn test_parse_mic_section_fields() {
        let mut adv = vec![V1_HEADER, 50, SECTION_IDENTITY_MIC];
        adv.extend_from_slice(&[1u8; 16]);
        adv.extend_from_slice(&[2u8; 16]);
        adv.push(0xEE);
        adv.extend_from_slice(&[3u8; 16]);

        let sections = parse_sections(&adv).unwrap();
        let RawSection::Encrypted(section) = &sections[0] else {
            panic!("expected encrypted section");
        };
        assert_eq!(section.mode, VerificationMode::Mic);
        assert_eq!(section.section_len, 50);
        assert_eq!(section.salt, [1u8; 16]);
        assert_eq!(section.token_ct, [2u8; 16]);
        assert_eq!(section.body_ct, &[0xEE]);
        assert_eq!(section.mic, Some([3u8; 16]));
        assert_eq!(section.authenticated_prefix(), [0x20, 50, 0x01]);
    }

    #[test]
    fn test_parse_sections_rejects_malformed() {
        assert_eq!(
            parse_sections(&[0x20]),
            Err(DeserializeError::InvalidSectionCount(0))
        );
        assert_eq!(
            parse_sections(&[0x21, 0x01, 0x03]),
            Err(DeserializeError::InvalidHeader(0x21))
        );
        assert_eq!(
            parse_sections(&[0x20, 0x00]),
            Err(DeserializeError::EmptySection)
        );
        assert_eq!(
            parse_sections(&[0x20, 0x04, 0x03, 0x15]),
            Err(DeserializeError::Truncated("V1 section"))
        );
        assert_eq!(
            parse_sections(&[0x20, 0x01, 0x07]),
            Err(DeserializeError::UnknownSectionIdentity(0x07))
        );
        // Signature section too short for its signature
        let mut adv = vec![V1_HEADER, 34, SECTION_IDENTITY_SIGNATURE];
        adv.extend_from_slice(&[0u8; 33]);
        assert_eq!(
            parse_sections(&adv),
            Err(DeserializeError::Truncated("V1 encrypted section"))
        );
    }

    #[test]
    fn test_section_count_limit() {
        let mut adv = vec![V1_HEADER];
        for _ in 0..V1_MAX_SECTIONS {
            adv.extend_from_slice(&[0x01, 0x03]);
        }
        assert_eq!(parse_sections(&adv).unwrap().len(), V1_MAX_SECTIONS);

        adv.extend_from_slice(&[0x01, 0x03]);
        assert_eq!(
            parse_sections(&adv),
            Err(DeserializeError::InvalidSectionCount(9))
        );
    }

    #[test]
    fn test_too_long_rejected() {
        let mut adv = vec![V1_HEADER];
        adv.extend(std::iter::repeat(0x01).take(V1_MAX_ADV_LEN));
        assert_eq!(
            parse_sections(&adv),
            Err(DeserializeError::TooLong(V1_MAX_ADV_LEN + 1))
        );
    }
}
