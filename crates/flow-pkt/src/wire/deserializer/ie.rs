// Copyright (C) 2024-present The NetGauze Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Field Codec: decodes the value of a single information element

use std::net::{Ipv4Addr, Ipv6Addr};

use nom::{
    error::ErrorKind,
    number::complete::{be_u16, be_u8},
    IResult,
};

use crate::{
    ie::{Field, InformationElementDataType, IE},
    wire::{impl_parse_error, ReadablePduWithTwoInputs},
    VARIABLE_LENGTH,
};

/// Variable length prefix announcing that the actual length follows in two
/// octets
pub(crate) const VARIABLE_LENGTH_LONG_PREFIX: u8 = 255;

#[derive(thiserror::Error, Eq, PartialEq, Clone, Debug)]
pub enum FieldParsingError {
    #[error("nom error: {0:?}")]
    NomError(ErrorKind),
    #[error("variable length prefix of {0} is truncated")]
    TruncatedLengthPrefix(IE),
    #[error("field {ie} declares {declared} octets but only {available} are left")]
    TruncatedField {
        ie: IE,
        declared: u16,
        available: usize,
    },
}

impl_parse_error!(FieldParsingError);

/// Decodes `value`, already cut at the declared length, into a typed
/// [Field].
///
/// Integers accept any width up to 8 octets and are zero-extended, wider
/// values are kept opaque. Addresses are only decoded at their natural length.
/// Unknown elements always decode as [Field::OctetArray].
pub fn decode_value(ie: IE, value: &[u8]) -> Field {
    let data_type = ie.data_type();
    if data_type.is_unsigned() {
        return match value.len() {
            1 => Field::Unsigned8(value[0]),
            2 => Field::Unsigned16(u16::from_be_bytes([value[0], value[1]])),
            3..=4 => Field::Unsigned32(be_uint(value) as u32),
            5..=8 => Field::Unsigned64(be_uint(value)),
            _ => Field::OctetArray(Box::from(value)),
        };
    }
    match (data_type, value.len()) {
        (InformationElementDataType::ipv4Address, 4) => {
            Field::Ipv4Address(Ipv4Addr::new(value[0], value[1], value[2], value[3]))
        }
        (InformationElementDataType::ipv6Address, 16) => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(value);
            Field::Ipv6Address(Ipv6Addr::from(octets))
        }
        (InformationElementDataType::macAddress, 6) => Field::MacAddress(be_uint(value)),
        _ => Field::OctetArray(Box::from(value)),
    }
}

/// Big endian unsigned integer of at most 8 octets
#[inline]
fn be_uint(value: &[u8]) -> u64 {
    value
        .iter()
        .fold(0u64, |acc, octet| (acc << 8) | u64::from(*octet))
}

/// Reads the per record length of a variable length field
fn variable_length(buf: &[u8], ie: IE) -> IResult<&[u8], u16, FieldParsingError> {
    let truncated = |_| nom::Err::Error(FieldParsingError::TruncatedLengthPrefix(ie));
    let (buf, length) = be_u8::<_, FieldParsingError>(buf).map_err(truncated)?;
    if length < VARIABLE_LENGTH_LONG_PREFIX {
        return Ok((buf, u16::from(length)));
    }
    be_u16::<_, FieldParsingError>(buf).map_err(truncated)
}

impl<'a> ReadablePduWithTwoInputs<'a, IE, u16, FieldParsingError> for Field {
    fn from_wire(buf: &'a [u8], ie: IE, length: u16) -> IResult<&'a [u8], Self, FieldParsingError> {
        let (buf, length) = if length == VARIABLE_LENGTH {
            variable_length(buf, ie)?
        } else {
            (buf, length)
        };
        if buf.len() < length as usize {
            return Err(nom::Err::Error(FieldParsingError::TruncatedField {
                ie,
                declared: length,
                available: buf.len(),
            }));
        }
        let (value, rest) = buf.split_at(length as usize);
        Ok((rest, decode_value(ie, value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(IE::protocolIdentifier, &[6], Field::Unsigned8(6))]
    #[case(IE::sourceTransportPort, &[0xc7, 0xae], Field::Unsigned16(51118))]
    #[case(IE::packetDeltaCount, &[0, 0, 0, 27], Field::Unsigned32(27))]
    #[case(IE::octetDeltaCount, &[0, 0, 0, 0, 0, 0, 0x08, 0xc5], Field::Unsigned64(2245))]
    #[case(IE::octetDeltaCount, &[0x01, 0x00, 0x00], Field::Unsigned32(65536))]
    #[case(IE::octetDeltaCount, &[0x01, 0, 0, 0, 0], Field::Unsigned64(1 << 32))]
    #[case(IE::sourceIPv4Address, &[192, 168, 1, 50], Field::Ipv4Address(Ipv4Addr::new(192, 168, 1, 50)))]
    #[case(IE::sourceMacAddress, &[0x00, 0x11, 0x22, 0x33, 0x44, 0x55], Field::MacAddress(0x0011_2233_4455))]
    #[case(IE::sourceIPv4Address, &[192, 168, 1], Field::OctetArray(Box::new([192, 168, 1])))]
    #[case(IE::Unknown { pen: 0, id: 999 }, &[1, 2], Field::OctetArray(Box::new([1, 2])))]
    fn test_decode_value(#[case] ie: IE, #[case] value: &[u8], #[case] expected: Field) {
        assert_eq!(decode_value(ie, value), expected);
    }

    #[test]
    fn test_decode_ipv6() {
        let addr: Ipv6Addr = "2001:db8::1".parse().unwrap();
        assert_eq!(
            decode_value(IE::destinationIPv6Address, &addr.octets()),
            Field::Ipv6Address(addr)
        );
    }

    #[test]
    fn test_truncated_field() {
        let wire = [0, 0, 0];
        assert_eq!(
            Field::from_wire(&wire, IE::octetDeltaCount, 8),
            Err(nom::Err::Error(FieldParsingError::TruncatedField {
                ie: IE::octetDeltaCount,
                declared: 8,
                available: 3,
            }))
        );
    }

    #[test]
    fn test_variable_length_short() {
        let mut wire = vec![200u8];
        wire.extend(std::iter::repeat(0xab).take(200));
        wire.push(0xff);
        let ie = IE::Unknown { pen: 0, id: 999 };
        let (rest, field) = Field::from_wire(&wire, ie, VARIABLE_LENGTH).unwrap();
        assert_eq!(rest, &[0xff]);
        assert_eq!(field, Field::OctetArray(vec![0xab; 200].into_boxed_slice()));
    }

    #[test]
    fn test_variable_length_long() {
        let mut wire = vec![255u8, 0x01, 0x2c];
        wire.extend(std::iter::repeat(0xcd).take(300));
        let ie = IE::Unknown { pen: 0, id: 999 };
        let (rest, field) = Field::from_wire(&wire, ie, VARIABLE_LENGTH).unwrap();
        assert!(rest.is_empty());
        assert_eq!(field, Field::OctetArray(vec![0xcd; 300].into_boxed_slice()));
    }

    #[test]
    fn test_variable_length_truncated_prefix() {
        let ie = IE::Unknown { pen: 0, id: 999 };
        assert_eq!(
            Field::from_wire(&[255u8, 0x01], ie, VARIABLE_LENGTH),
            Err(nom::Err::Error(FieldParsingError::TruncatedLengthPrefix(ie)))
        );
        assert_eq!(
            Field::from_wire(&[], ie, VARIABLE_LENGTH),
            Err(nom::Err::Error(FieldParsingError::TruncatedLengthPrefix(ie)))
        );
    }
}
