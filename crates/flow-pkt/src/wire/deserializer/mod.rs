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

use nom::{
    error::ErrorKind,
    number::complete::{be_u16, be_u32},
    IResult,
};

use crate::{
    ie::IE,
    wire::{impl_parse_error, ReadablePdu},
    FieldSpecifier, FieldSpecifierError,
};

pub mod ie;
pub mod ipfix;

#[derive(thiserror::Error, Eq, PartialEq, Clone, Debug)]
pub enum FieldSpecifierParsingError {
    #[error("nom error: {0:?}")]
    NomError(ErrorKind),
    #[error(transparent)]
    FieldSpecifierError(#[from] FieldSpecifierError),
}

impl_parse_error!(FieldSpecifierParsingError);

impl<'a> ReadablePdu<'a, FieldSpecifierParsingError> for FieldSpecifier {
    fn from_wire(buf: &'a [u8]) -> IResult<&'a [u8], Self, FieldSpecifierParsingError> {
        let (buf, code) = be_u16(buf)?;
        let is_enterprise = code & 0x8000u16 != 0;
        let (buf, length) = be_u16(buf)?;
        let (buf, (pen, code)) = if is_enterprise {
            let (buf, pen) = be_u32(buf)?;
            // remove the enterprise bit from the IE number
            (buf, (pen, code & 0x7FFF))
        } else {
            (buf, (0, code))
        };
        let spec = FieldSpecifier::new(IE::from((pen, code)), length)
            .map_err(|err| nom::Err::Error(err.into()))?;
        Ok((buf, spec))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iana_field_specifier() {
        let wire = [0x00, 0x08, 0x00, 0x04, 0xff];
        let (rest, spec) = FieldSpecifier::from_wire(&wire).unwrap();
        assert_eq!(rest, &[0xff]);
        assert_eq!(spec, FieldSpecifier::new(IE::sourceIPv4Address, 4).unwrap());
    }

    #[test]
    fn test_enterprise_field_specifier() {
        let wire = [0x80, 0x0c, 0xff, 0xff, 0x00, 0x00, 0x72, 0x79];
        let (rest, spec) = FieldSpecifier::from_wire(&wire).unwrap();
        assert!(rest.is_empty());
        assert_eq!(spec.element_id(), IE::Unknown { pen: 29305, id: 12 });
        assert!(spec.is_variable_length());
    }

    #[test]
    fn test_field_specifier_errors() {
        assert_eq!(
            FieldSpecifier::from_wire(&[0x00, 0x08, 0x00]),
            Err(nom::Err::Error(FieldSpecifierParsingError::NomError(
                ErrorKind::Eof
            )))
        );
        assert_eq!(
            FieldSpecifier::from_wire(&[0x00, 0x08, 0x00, 0x00]),
            Err(nom::Err::Error(
                FieldSpecifierParsingError::FieldSpecifierError(
                    FieldSpecifierError::InvalidLength(0, IE::sourceIPv4Address)
                )
            ))
        );
    }
}
