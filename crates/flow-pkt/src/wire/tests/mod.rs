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

mod ipfix;

use std::fmt::Debug;

use crate::{
    ie::IE,
    ipfix::*,
    wire::{
        deserializer::ipfix::*,
        serializer::{ipfix::*, *},
        ReadablePdu, WritablePdu,
    },
    FieldSpecifier,
};

/// Parses `wire` and checks that every octet was consumed
fn test_parsed_completely<'a, T, E>(wire: &'a [u8], expected: &T)
where
    T: ReadablePdu<'a, E> + PartialEq + Debug,
    E: Debug,
{
    let parsed = T::from_wire(wire);
    assert!(parsed.is_ok(), "Message failed parsing: {parsed:?}");
    let (rest, value) = parsed.unwrap();
    assert_eq!(&value, expected);
    assert!(rest.is_empty(), "Not all the message is consumed: {rest:?}");
}

/// Writes `value` and checks it is serialized exactly as `expected`
fn test_write<E, T: WritablePdu<E>>(value: &T, expected: &[u8]) -> Result<(), E> {
    let mut buf = vec![];
    value.write(&mut buf)?;
    assert_eq!(buf, expected);
    assert_eq!(value.len(), expected.len());
    Ok(())
}

#[test]
fn test_template_record() -> Result<(), TemplateRecordWritingError> {
    let good_wire = [
        0x08, 0x01, 0x00, 0x02, 0x00, 0x1b, 0x00, 0x10, 0x00, 0x1c, 0x00, 0x10,
    ];
    let bad_template_id_wire = [
        0x00, 0x00, 0x00, 0x02, 0x00, 0x1b, 0x00, 0x10, 0x00, 0x1c, 0x00, 0x10,
    ];

    let good = TemplateRecord::new(
        2049,
        Box::new([
            FieldSpecifier::new(IE::sourceIPv6Address, 16).unwrap(),
            FieldSpecifier::new(IE::destinationIPv6Address, 16).unwrap(),
        ]),
    );

    test_parsed_completely(&good_wire, &good);
    assert_eq!(
        TemplateRecord::from_wire(&bad_template_id_wire),
        Err(nom::Err::Error(
            TemplateRecordParsingError::InvalidTemplateId(0)
        ))
    );
    test_write(&good, &good_wire)?;
    Ok(())
}

#[test]
fn test_template_withdrawal_records() -> Result<(), TemplateRecordWritingError> {
    let single_wire = [0x01, 0x00, 0x00, 0x00];
    let all_wire = [0x00, 0x02, 0x00, 0x00];
    test_parsed_completely(&single_wire, &TemplateRecord::withdrawal(256));
    test_parsed_completely(&all_wire, &TemplateRecord::withdrawal(2));
    test_write(&TemplateRecord::withdrawal(256), &single_wire)?;
    Ok(())
}

#[test]
fn test_options_template_record() -> Result<(), OptionsTemplateRecordWritingError> {
    let good_wire = [
        0x01, 0x01, // template id 257
        0x00, 0x02, // field count
        0x00, 0x01, // scope field count
        0x00, 0x0a, 0x00, 0x04, // ingressInterface
        0x00, 0x01, 0x00, 0x08, // octetDeltaCount
    ];
    let bad_scope_wire = [0x01, 0x01, 0x00, 0x01, 0x00, 0x02];
    let withdrawal_wire = [0x01, 0x01, 0x00, 0x00];

    let good = OptionsTemplateRecord::new(
        257,
        Box::new([FieldSpecifier::new(IE::ingressInterface, 4).unwrap()]),
        Box::new([FieldSpecifier::new(IE::octetDeltaCount, 8).unwrap()]),
    );
    test_parsed_completely(&good_wire, &good);
    test_parsed_completely(&withdrawal_wire, &OptionsTemplateRecord::withdrawal(257));
    assert_eq!(
        OptionsTemplateRecord::from_wire(&bad_scope_wire),
        Err(nom::Err::Error(
            OptionsTemplateRecordParsingError::InvalidScopeFieldsCount { scope: 2, total: 1 }
        ))
    );
    test_write(&good, &good_wire)?;
    test_write(&OptionsTemplateRecord::withdrawal(257), &withdrawal_wire)?;
    Ok(())
}

#[test]
fn test_field() -> Result<(), FieldSpecifierWritingError> {
    let good_ipv4_src_wire = [0x00, 0x08, 0x00, 0x04];
    let good_ipv4_src = FieldSpecifier::new(IE::sourceIPv4Address, 4).unwrap();
    let enterprise_wire = [0x80, 0x0c, 0xff, 0xff, 0x00, 0x00, 0x72, 0x79];
    let enterprise =
        FieldSpecifier::new(IE::Unknown { pen: 29305, id: 12 }, crate::VARIABLE_LENGTH).unwrap();
    test_parsed_completely(&good_ipv4_src_wire, &good_ipv4_src);
    test_parsed_completely(&enterprise_wire, &enterprise);
    test_write(&good_ipv4_src, &good_ipv4_src_wire)?;
    test_write(&enterprise, &enterprise_wire)?;
    Ok(())
}
