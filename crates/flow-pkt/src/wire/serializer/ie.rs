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

use byteorder::{NetworkEndian, WriteBytesExt};
use std::io::Write;

use crate::{
    ie::Field,
    wire::{
        deserializer::ie::VARIABLE_LENGTH_LONG_PREFIX, serializer::impl_from_std_io_error,
        WritablePduWithOneInput,
    },
    VARIABLE_LENGTH,
};

#[derive(thiserror::Error, Eq, PartialEq, Clone, Debug)]
pub enum FieldWritingError {
    #[error("StdIO error: {0}")]
    StdIOError(String),
    #[error("{field} value cannot be written in {length} octets")]
    ValueDoesNotFit { field: &'static str, length: usize },
}

impl_from_std_io_error!(FieldWritingError);

/// Size of the length prefix of a variable length field
const fn length_prefix_len(value_length: usize) -> usize {
    if value_length < VARIABLE_LENGTH_LONG_PREFIX as usize {
        1
    } else {
        3
    }
}

/// `length` is the length declared in the template: `None` writes the value
/// with its natural length, [VARIABLE_LENGTH] adds the per record length
/// prefix and any other value truncates integers to a reduced-size encoding.
impl WritablePduWithOneInput<Option<u16>, FieldWritingError> for Field {
    const BASE_LENGTH: usize = 0;

    fn len(&self, length: Option<u16>) -> usize {
        match length {
            None => self.natural_length(),
            Some(VARIABLE_LENGTH) => {
                length_prefix_len(self.natural_length()) + self.natural_length()
            }
            Some(length) => length as usize,
        }
    }

    fn write<T: Write>(&self, writer: &mut T, length: Option<u16>) -> Result<(), FieldWritingError> {
        let value_length = match length {
            None | Some(VARIABLE_LENGTH) => self.natural_length(),
            Some(length) => length as usize,
        };
        let does_not_fit = || FieldWritingError::ValueDoesNotFit {
            field: self.into(),
            length: value_length,
        };
        if length == Some(VARIABLE_LENGTH) {
            if value_length < VARIABLE_LENGTH_LONG_PREFIX as usize {
                writer.write_u8(value_length as u8)?;
            } else {
                let long_length = u16::try_from(value_length).map_err(|_| does_not_fit())?;
                writer.write_u8(VARIABLE_LENGTH_LONG_PREFIX)?;
                writer.write_u16::<NetworkEndian>(long_length)?;
            }
        }
        match self {
            Self::Unsigned8(_) | Self::Unsigned16(_) | Self::Unsigned32(_) | Self::Unsigned64(_) => {
                let value = self.as_u64().unwrap_or_default();
                if value_length > 8 || (value_length < 8 && value >> (8 * value_length) != 0) {
                    return Err(does_not_fit());
                }
                writer.write_all(&value.to_be_bytes()[8 - value_length..])?;
            }
            Self::Ipv4Address(addr) if value_length == 4 => writer.write_all(&addr.octets())?,
            Self::Ipv6Address(addr) if value_length == 16 => writer.write_all(&addr.octets())?,
            Self::MacAddress(mac) if value_length == 6 && *mac >> 48 == 0 => {
                writer.write_all(&mac.to_be_bytes()[2..])?
            }
            Self::OctetArray(value) if value.len() == value_length => writer.write_all(value)?,
            _ => return Err(does_not_fit()),
        }
        Ok(())
    }
}
