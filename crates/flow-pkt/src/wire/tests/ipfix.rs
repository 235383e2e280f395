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

use chrono::{TimeZone, Utc};
use std::{
    net::{IpAddr, Ipv4Addr, Ipv6Addr},
    sync::Arc,
};

use crate::{
    ie::{Field, IE},
    ipfix::*,
    templates::{ExporterId, TemplateStore},
    wire::{
        deserializer::{ie::FieldParsingError, ipfix::*},
        ReadablePduWithTwoInputs, WritablePduWithOneInput,
    },
    DataSetId, FieldSpecifier, VARIABLE_LENGTH,
};

const ROUTER: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1));

/// One template set (template 256) followed by one data set using it
const TEMPLATE_AND_DATA_WIRE: [u8; 77] = [
    0x00, 0x0a, // Version
    0x00, 0x4d, // Length = 77
    0x65, 0x53, 0xf1, 0x00, // Export time
    0x00, 0x00, 0x00, 0x00, // Seq number
    0x00, 0x00, 0x00, 0x00, // Observation domain
    0x00, 0x02, 0x00, 0x24, // Template set, length 36
    0x01, 0x00, 0x00, 0x07, // Template 256, 7 fields
    0x00, 0x08, 0x00, 0x04, // sourceIPv4Address
    0x00, 0x0c, 0x00, 0x04, // destinationIPv4Address
    0x00, 0x07, 0x00, 0x02, // sourceTransportPort
    0x00, 0x0b, 0x00, 0x02, // destinationTransportPort
    0x00, 0x04, 0x00, 0x01, // protocolIdentifier
    0x00, 0x02, 0x00, 0x04, // packetDeltaCount
    0x00, 0x01, 0x00, 0x04, // octetDeltaCount
    0x01, 0x00, 0x00, 0x19, // Data set 256, length 25
    0xc0, 0xa8, 0x01, 0x32, // 192.168.1.50
    0x68, 0x12, 0xb9, 0x36, // 104.18.185.54
    0xc7, 0xae, // 51118
    0x01, 0xbb, // 443
    0x06, // TCP
    0x00, 0x00, 0x00, 0x1b, // 27 packets
    0x00, 0x00, 0x08, 0xc5, // 2245 octets
];

fn spec(ie: IE, length: u16) -> FieldSpecifier {
    FieldSpecifier::new(ie, length).unwrap()
}

fn decode(wire: &[u8], store: &TemplateStore) -> IpfixPacket {
    let (rest, pkt) = IpfixPacket::from_wire(wire, ROUTER, store).unwrap();
    assert!(rest.is_empty());
    pkt
}

/// Serializes `pkt`, data sets are written using the templates defined in
/// `templates`.
fn encode(pkt: &IpfixPacket, templates: &[(u16, DecodingTemplate)]) -> Vec<u8> {
    let map: TemplatesMap = templates
        .iter()
        .map(|(id, template)| (*id, Arc::new(template.clone())))
        .collect();
    let mut buf = vec![];
    pkt.write(&mut buf, Some(&map)).unwrap();
    assert_eq!(buf.len(), pkt.len(Some(&map)));
    buf
}

fn template_set(id: u16, specs: &[FieldSpecifier]) -> Set {
    Set::Template(Box::new([TemplateRecord::new(id, specs.into())]))
}

fn data_set(id: u16, records: Vec<DataRecord>) -> Set {
    Set::Data {
        id: DataSetId::new(id).unwrap(),
        records: records.into_boxed_slice(),
    }
}

fn record(fields: &[(IE, Field)]) -> DataRecord {
    DataRecord::new(Box::new([]), fields.into())
}

fn packet(sets: Vec<Set>) -> IpfixPacket {
    IpfixPacket::new(
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
        7,
        0,
        sets.into_boxed_slice(),
    )
}

fn records(pkt: &IpfixPacket) -> Vec<DataRecord> {
    pkt.data_records().map(|(_, record)| record.clone()).collect()
}

#[test]
fn test_template_and_data_in_one_message() {
    let store = TemplateStore::new();
    let pkt = decode(&TEMPLATE_AND_DATA_WIRE, &store);
    let expected_record = record(&[
        (IE::sourceIPv4Address, Field::Ipv4Address(Ipv4Addr::new(192, 168, 1, 50))),
        (IE::destinationIPv4Address, Field::Ipv4Address(Ipv4Addr::new(104, 18, 185, 54))),
        (IE::sourceTransportPort, Field::Unsigned16(51118)),
        (IE::destinationTransportPort, Field::Unsigned16(443)),
        (IE::protocolIdentifier, Field::Unsigned8(6)),
        (IE::packetDeltaCount, Field::Unsigned32(27)),
        (IE::octetDeltaCount, Field::Unsigned32(2245)),
    ]);
    assert_eq!(pkt.version(), IPFIX_VERSION);
    assert_eq!(pkt.export_time().timestamp(), 1_700_000_000);
    assert_eq!(pkt.sets().len(), 2);
    assert!(pkt.skipped_sets().is_empty());
    assert_eq!(records(&pkt), vec![expected_record]);
    assert_eq!(
        store.template_ids(&ExporterId::new(ROUTER, 0)),
        vec![256]
    );
}

#[test]
fn test_serializer_matches_wire() {
    let template = [
        spec(IE::sourceIPv4Address, 4),
        spec(IE::destinationIPv4Address, 4),
        spec(IE::sourceTransportPort, 2),
        spec(IE::destinationTransportPort, 2),
        spec(IE::protocolIdentifier, 1),
        spec(IE::packetDeltaCount, 4),
        spec(IE::octetDeltaCount, 4),
    ];
    let pkt = IpfixPacket::new(
        Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        0,
        0,
        Box::new([
            template_set(256, &template),
            data_set(
                256,
                vec![record(&[
                    (IE::sourceIPv4Address, Field::Ipv4Address(Ipv4Addr::new(192, 168, 1, 50))),
                    (IE::destinationIPv4Address, Field::Ipv4Address(Ipv4Addr::new(104, 18, 185, 54))),
                    (IE::sourceTransportPort, Field::Unsigned16(51118)),
                    (IE::destinationTransportPort, Field::Unsigned16(443)),
                    (IE::protocolIdentifier, Field::Unsigned8(6)),
                    (IE::packetDeltaCount, Field::Unsigned64(27)),
                    (IE::octetDeltaCount, Field::Unsigned64(2245)),
                ])],
            ),
        ]),
    );
    let wire = encode(&pkt, &[(256, DecodingTemplate::new(template.into()))]);
    assert_eq!(wire, TEMPLATE_AND_DATA_WIRE.to_vec());
}

#[test]
fn test_round_trip_all_types() {
    let template = [
        spec(IE::protocolIdentifier, 1),
        spec(IE::sourceTransportPort, 2),
        spec(IE::ingressInterface, 4),
        spec(IE::octetDeltaCount, 8),
        spec(IE::sourceIPv4Address, 4),
        spec(IE::sourceIPv6Address, 16),
        spec(IE::sourceMacAddress, 6),
    ];
    let values = record(&[
        (IE::protocolIdentifier, Field::Unsigned8(17)),
        (IE::sourceTransportPort, Field::Unsigned16(53)),
        (IE::ingressInterface, Field::Unsigned32(0xdead_beef)),
        (IE::octetDeltaCount, Field::Unsigned64(u64::MAX - 1)),
        (IE::sourceIPv4Address, Field::Ipv4Address(Ipv4Addr::new(10, 1, 2, 3))),
        (IE::sourceIPv6Address, Field::Ipv6Address(Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 1))),
        (IE::sourceMacAddress, Field::MacAddress(0x0a1b_2c3d_4e5f)),
    ]);
    let pkt = packet(vec![
        template_set(300, &template),
        data_set(300, vec![values.clone(), values.clone()]),
    ]);
    let wire = encode(&pkt, &[(300, DecodingTemplate::new(template.into()))]);
    let store = TemplateStore::new();
    let decoded = decode(&wire, &store);
    assert_eq!(decoded, pkt);
    assert_eq!(records(&decoded), vec![values.clone(), values]);
}

#[test]
fn test_variable_length_fields() {
    let unknown = IE::Unknown { pen: 0, id: 999 };
    let template = [
        spec(unknown, VARIABLE_LENGTH),
        spec(IE::protocolIdentifier, 1),
    ];
    let short = record(&[
        (unknown, Field::OctetArray(vec![0x11; 200].into_boxed_slice())),
        (IE::protocolIdentifier, Field::Unsigned8(6)),
    ]);
    let long = record(&[
        (unknown, Field::OctetArray(vec![0x22; 300].into_boxed_slice())),
        (IE::protocolIdentifier, Field::Unsigned8(17)),
    ]);
    let pkt = packet(vec![
        template_set(256, &template),
        data_set(256, vec![short.clone(), long.clone()]),
    ]);
    let wire = encode(&pkt, &[(256, DecodingTemplate::new(template.into()))]);
    // header + template set + data set header + (1 + 200 + 1) + (3 + 300 + 1)
    assert_eq!(wire.len(), 16 + 16 + 4 + 202 + 304);
    let decoded = decode(&wire, &TemplateStore::new());
    assert_eq!(records(&decoded), vec![short, long]);
}

#[test]
fn test_withdrawal_makes_template_unresolved() {
    let store = TemplateStore::new();
    let template = [spec(IE::protocolIdentifier, 1)];
    let define = packet(vec![template_set(256, &template)]);
    let data = packet(vec![data_set(
        256,
        vec![record(&[(IE::protocolIdentifier, Field::Unsigned8(6))])],
    )]);
    let withdraw = packet(vec![Set::Template(Box::new([TemplateRecord::withdrawal(256)]))]);
    let templates = [(256, DecodingTemplate::new(template.into()))];

    decode(&encode(&define, &templates), &store);
    let decoded = decode(&encode(&data, &templates), &store);
    assert_eq!(records(&decoded).len(), 1);

    decode(&encode(&withdraw, &templates), &store);
    let decoded = decode(&encode(&data, &templates), &store);
    assert!(decoded.sets().is_empty());
    assert_eq!(
        decoded.skipped_sets(),
        &[SetParsingError::UnresolvedTemplate(256)]
    );
    assert!(decoded.skipped_sets()[0].is_unresolved_template());
}

#[test]
fn test_withdraw_all_templates() {
    let store = TemplateStore::new();
    let define = packet(vec![
        template_set(256, &[spec(IE::protocolIdentifier, 1)]),
        template_set(257, &[spec(IE::sourceTransportPort, 2)]),
        Set::OptionsTemplate(Box::new([OptionsTemplateRecord::new(
            258,
            Box::new([spec(IE::ingressInterface, 4)]),
            Box::new([]),
        )])),
    ]);
    decode(&encode(&define, &[]), &store);
    let exporter = ExporterId::new(ROUTER, 0);
    assert_eq!(store.template_ids(&exporter), vec![256, 257, 258]);

    let withdraw_all = packet(vec![Set::Template(Box::new([TemplateRecord::withdrawal(
        IPFIX_TEMPLATE_SET_ID,
    )]))]);
    decode(&encode(&withdraw_all, &[]), &store);
    assert_eq!(store.template_ids(&exporter), vec![258]);
}

#[test]
fn test_redefinition_with_same_fields_is_idempotent() {
    let store = TemplateStore::new();
    let template = [spec(IE::sourceTransportPort, 2), spec(IE::destinationTransportPort, 2)];
    let templates = [(256, DecodingTemplate::new(template.into()))];
    let data = packet(vec![data_set(
        256,
        vec![record(&[
            (IE::sourceTransportPort, Field::Unsigned16(1234)),
            (IE::destinationTransportPort, Field::Unsigned16(80)),
        ])],
    )]);
    decode(&encode(&packet(vec![template_set(256, &template)]), &templates), &store);
    let first = decode(&encode(&data, &templates), &store);
    decode(&encode(&packet(vec![template_set(256, &template)]), &templates), &store);
    let second = decode(&encode(&data, &templates), &store);
    assert_eq!(records(&first), records(&second));
}

#[test]
fn test_unknown_elements_do_not_prevent_decoding() {
    let vendor = IE::Unknown { pen: 29305, id: 12 };
    let unassigned = IE::Unknown { pen: 0, id: 4000 };
    let template = [
        spec(vendor, 4),
        spec(IE::sourceIPv4Address, 4),
        spec(unassigned, 2),
        spec(IE::destinationIPv4Address, 4),
    ];
    let values = record(&[
        (vendor, Field::OctetArray(Box::new([1, 2, 3, 4]))),
        (IE::sourceIPv4Address, Field::Ipv4Address(Ipv4Addr::new(10, 0, 0, 1))),
        (unassigned, Field::OctetArray(Box::new([5, 6]))),
        (IE::destinationIPv4Address, Field::Ipv4Address(Ipv4Addr::new(10, 0, 0, 2))),
    ]);
    let pkt = packet(vec![template_set(256, &template), data_set(256, vec![values.clone()])]);
    let wire = encode(&pkt, &[(256, DecodingTemplate::new(template.into()))]);
    let decoded = decode(&wire, &TemplateStore::new());
    let decoded_records = records(&decoded);
    assert_eq!(decoded_records, vec![values]);
    assert_eq!(
        decoded_records[0].get(IE::destinationIPv4Address),
        Some(&Field::Ipv4Address(Ipv4Addr::new(10, 0, 0, 2)))
    );
}

#[test]
fn test_template_replacement_order() {
    let store = TemplateStore::new();
    let old = [spec(IE::sourceTransportPort, 2), spec(IE::protocolIdentifier, 1)];
    let new = [spec(IE::protocolIdentifier, 1), spec(IE::sourceIPv4Address, 4)];
    let old_templates = [(256, DecodingTemplate::new(old.into()))];
    let new_templates = [(256, DecodingTemplate::new(new.into()))];
    let old_record = record(&[
        (IE::sourceTransportPort, Field::Unsigned16(5353)),
        (IE::protocolIdentifier, Field::Unsigned8(17)),
    ]);
    let new_record = record(&[
        (IE::protocolIdentifier, Field::Unsigned8(6)),
        (IE::sourceIPv4Address, Field::Ipv4Address(Ipv4Addr::new(192, 168, 1, 9))),
    ]);

    let first = packet(vec![template_set(256, &old), data_set(256, vec![old_record.clone()])]);
    let between = packet(vec![data_set(256, vec![old_record.clone()])]);
    let second = packet(vec![template_set(256, &new), data_set(256, vec![new_record.clone()])]);

    assert_eq!(records(&decode(&encode(&first, &old_templates), &store)), vec![old_record.clone()]);
    assert_eq!(records(&decode(&encode(&between, &old_templates), &store)), vec![old_record]);
    assert_eq!(records(&decode(&encode(&second, &new_templates), &store)), vec![new_record]);
    assert_eq!(
        store
            .resolve(&ExporterId::new(ROUTER, 0), 256)
            .map(|t| t.fields().to_vec()),
        Some(new.to_vec())
    );
}

#[test]
fn test_templates_are_scoped_by_exporter() {
    let store = TemplateStore::new();
    let (_, _) = IpfixPacket::from_wire(&TEMPLATE_AND_DATA_WIRE, ROUTER, &store).unwrap();
    let data_only = packet(vec![data_set(
        256,
        vec![record(&[(IE::sourceIPv4Address, Field::Ipv4Address(Ipv4Addr::LOCALHOST))])],
    )]);
    let wire = encode(&data_only, &[]);
    let other_router = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 2));
    let (_, decoded) = IpfixPacket::from_wire(&wire, other_router, &store).unwrap();
    assert_eq!(
        decoded.skipped_sets(),
        &[SetParsingError::UnresolvedTemplate(256)]
    );
}

#[test]
fn test_malformed_header() {
    let store = TemplateStore::new();
    let mut bad_version = TEMPLATE_AND_DATA_WIRE;
    bad_version[1] = 0x09;
    let mut bad_length = TEMPLATE_AND_DATA_WIRE;
    bad_length[3] = 0x4e;

    let err = IpfixPacket::from_wire(&bad_version, ROUTER, &store);
    assert_eq!(
        err,
        Err(nom::Err::Error(IpfixPacketParsingError::UnsupportedVersion(9)))
    );
    let err = IpfixPacket::from_wire(&bad_length, ROUTER, &store);
    assert_eq!(
        err,
        Err(nom::Err::Error(IpfixPacketParsingError::LengthMismatch {
            declared: 78,
            received: 77
        }))
    );
    let err = IpfixPacket::from_wire(&TEMPLATE_AND_DATA_WIRE[..10], ROUTER, &store);
    assert_eq!(
        err,
        Err(nom::Err::Error(IpfixPacketParsingError::TruncatedHeader(10)))
    );
    // Nothing was learned from the rejected messages
    assert!(store.is_empty());
}

#[test]
fn test_reserved_set_is_skipped() {
    let wire = [
        0x00, 0x0a, 0x00, 0x1c, // Version, length 28
        0x65, 0x53, 0xf1, 0x00, // Export time
        0x00, 0x00, 0x00, 0x01, // Seq number
        0x00, 0x00, 0x00, 0x00, // Observation domain
        0x00, 0x01, 0x00, 0x08, 0xaa, 0xbb, 0xcc, 0xdd, // Reserved set 1
        0x00, 0x02, 0x00, 0x04, // Empty template set
    ];
    let decoded = decode(&wire, &TemplateStore::new());
    assert!(decoded.sets().is_empty());
    assert_eq!(decoded.skipped_sets(), &[SetParsingError::ReservedSetId(1)]);
}

#[test]
fn test_data_set_padding_is_discarded() {
    let wire = [
        0x00, 0x0a, 0x00, 0x2b, // Version, length 43
        0x65, 0x53, 0xf1, 0x00, // Export time
        0x00, 0x00, 0x00, 0x01, // Seq number
        0x00, 0x00, 0x00, 0x00, // Observation domain
        0x00, 0x02, 0x00, 0x0c, // Template set, length 12
        0x01, 0x00, 0x00, 0x01, // Template 256, 1 field
        0x00, 0x08, 0x00, 0x04, // sourceIPv4Address
        0x01, 0x00, 0x00, 0x0f, // Data set 256, length 15
        0x0a, 0x00, 0x00, 0x01, // 10.0.0.1
        0x0a, 0x00, 0x00, 0x02, // 10.0.0.2
        0x00, 0x00, 0x00, // padding
    ];
    let decoded = decode(&wire, &TemplateStore::new());
    assert!(decoded.skipped_sets().is_empty());
    assert_eq!(
        records(&decoded),
        vec![
            record(&[(IE::sourceIPv4Address, Field::Ipv4Address(Ipv4Addr::new(10, 0, 0, 1)))]),
            record(&[(IE::sourceIPv4Address, Field::Ipv4Address(Ipv4Addr::new(10, 0, 0, 2)))]),
        ]
    );
}

#[test]
fn test_truncated_record_keeps_previous_records() {
    let wire = [
        0x00, 0x0a, 0x00, 0x30, // Version, length 48
        0x65, 0x53, 0xf1, 0x00, // Export time
        0x00, 0x00, 0x00, 0x01, // Seq number
        0x00, 0x00, 0x00, 0x00, // Observation domain
        0x00, 0x02, 0x00, 0x10, // Template set, length 16
        0x01, 0x00, 0x00, 0x02, // Template 256, 2 fields
        0x03, 0xe7, 0xff, 0xff, // unknown 999, variable length
        0x00, 0x04, 0x00, 0x01, // protocolIdentifier
        0x01, 0x00, 0x00, 0x10, // Data set 256, length 16
        0x02, 0xaa, 0xbb, 0x06, // record 1
        0x08, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, // record 2, truncated
    ];
    let decoded = decode(&wire, &TemplateStore::new());
    let unknown = IE::Unknown { pen: 0, id: 999 };
    assert_eq!(
        records(&decoded),
        vec![record(&[
            (unknown, Field::OctetArray(Box::new([0xaa, 0xbb]))),
            (IE::protocolIdentifier, Field::Unsigned8(6)),
        ])]
    );
    assert_eq!(
        decoded.skipped_sets(),
        &[SetParsingError::DataRecordError {
            id: 256,
            error: DataRecordParsingError::FieldError(FieldParsingError::TruncatedField {
                ie: unknown,
                declared: 8,
                available: 7,
            }),
        }]
    );
}

#[test]
fn test_truncated_set_stops_parsing() {
    let wire = [
        0x00, 0x0a, 0x00, 0x18, // Version, length 24
        0x65, 0x53, 0xf1, 0x00, // Export time
        0x00, 0x00, 0x00, 0x01, // Seq number
        0x00, 0x00, 0x00, 0x00, // Observation domain
        0x01, 0x00, 0x00, 0x20, // Data set 256 claims 32 octets
        0x00, 0x00, 0x00, 0x00,
    ];
    let decoded = decode(&wire, &TemplateStore::new());
    assert_eq!(
        decoded.skipped_sets(),
        &[SetParsingError::TruncatedSet {
            id: 256,
            declared: 32,
            available: 8,
        }]
    );
}

#[test]
fn test_options_template_scope_fields_are_decoded() {
    let options = DecodingTemplate::new_options(
        Box::new([spec(IE::ingressInterface, 4)]),
        Box::new([spec(IE::packetTotalCount, 8)]),
    );
    let values = DataRecord::new(
        Box::new([(IE::ingressInterface, Field::Unsigned32(3))]),
        Box::new([(IE::packetTotalCount, Field::Unsigned64(99))]),
    );
    let pkt = packet(vec![
        Set::OptionsTemplate(Box::new([OptionsTemplateRecord::new(
            400,
            options.scope_fields().into(),
            options.fields().into(),
        )])),
        data_set(400, vec![values.clone()]),
    ]);
    let wire = encode(&pkt, &[(400, options.clone())]);
    let store = TemplateStore::new();
    let decoded = decode(&wire, &store);
    assert_eq!(records(&decoded), vec![values]);
    assert_eq!(
        store
            .resolve(&ExporterId::new(ROUTER, 0), 400)
            .map(|t| t.kind()),
        Some(TemplateKind::OptionsTemplate)
    );
}

#[test]
fn test_data_records_iterator_is_fused() {
    let template = DecodingTemplate::new(Box::new([spec(IE::protocolIdentifier, 1)]));
    let buf = [6, 17];
    let mut iter = DataRecords::new(&buf, &template);
    assert!(matches!(iter.next(), Some(Ok(_))));
    assert!(matches!(iter.next(), Some(Ok(_))));
    assert!(iter.next().is_none());
    assert!(iter.next().is_none());
    assert!(iter.remaining().is_empty());
}
