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

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, sync::Arc};

use crate::{
    ie::{Field, IE},
    wire::deserializer::ipfix::SetParsingError,
    DataSetId, FieldSpecifier,
};

pub const IPFIX_VERSION: u16 = 10;

/// 2-octets version, 2-octets length, 4-octets * 3 (export time, seq no,
/// observation domain id)
pub const IPFIX_HEADER_LENGTH: u16 = 16;

/// A value of 2 is reserved for Template Sets
pub(crate) const IPFIX_TEMPLATE_SET_ID: u16 = 2;

/// A value of 3 is reserved for Options Template Sets
pub(crate) const IPFIX_OPTIONS_TEMPLATE_SET_ID: u16 = 3;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum TemplateKind {
    Template,
    OptionsTemplate,
}

/// Simpler template that is used to decode data records.
///
/// Scope fields of options templates are decoded like any other field, they
/// are kept apart only to preserve the layout announced by the exporter.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct DecodingTemplate {
    kind: TemplateKind,
    scope_fields: Box<[FieldSpecifier]>,
    fields: Box<[FieldSpecifier]>,
}

impl DecodingTemplate {
    pub fn new(fields: Box<[FieldSpecifier]>) -> Self {
        Self {
            kind: TemplateKind::Template,
            scope_fields: Box::new([]),
            fields,
        }
    }

    pub fn new_options(scope_fields: Box<[FieldSpecifier]>, fields: Box<[FieldSpecifier]>) -> Self {
        Self {
            kind: TemplateKind::OptionsTemplate,
            scope_fields,
            fields,
        }
    }

    pub const fn kind(&self) -> TemplateKind {
        self.kind
    }

    pub fn scope_fields(&self) -> &[FieldSpecifier] {
        &self.scope_fields
    }

    pub fn fields(&self) -> &[FieldSpecifier] {
        &self.fields
    }

    /// Smallest number of octets a record can occupy: every fixed length plus
    /// the one octet length prefix of each variable length field.
    pub fn min_record_length(&self) -> usize {
        self.scope_fields
            .iter()
            .chain(self.fields.iter())
            .map(|spec| {
                if spec.is_variable_length() {
                    1
                } else {
                    spec.length() as usize
                }
            })
            .sum()
    }
}

/// Templates of a single exporter keyed by template ID
pub type TemplatesMap = HashMap<u16, Arc<DecodingTemplate>>;

/// IP Flow Information Export (IPFIX) v10 Packet.
///
/// ```text
///  +--------+--------------------------------------------------------+
///  |        | +----------+ +---------+     +-----------+ +---------+ |
///  |Message | | Template | | Data    |     | Options   | | Data    | |
///  | Header | | Set      | | Set     | ... | Template  | | Set     | |
///  |        | |          | |         |     | Set       | |         | |
///  |        | +----------+ +---------+     +-----------+ +---------+ |
///  +--------+--------------------------------------------------------+
/// ```
/// ```text
/// 0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |       Version Number          |            Length             |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           Export Time                         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                       Sequence Number                         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                    Observation Domain ID                      |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpfixPacket {
    version: u16,
    export_time: DateTime<Utc>,
    sequence_number: u32,
    observation_domain_id: u32,
    sets: Box<[Set]>,
    #[serde(skip)]
    skipped_sets: Box<[SetParsingError]>,
}

impl IpfixPacket {
    pub fn new(
        export_time: DateTime<Utc>,
        sequence_number: u32,
        observation_domain_id: u32,
        sets: Box<[Set]>,
    ) -> Self {
        Self {
            version: IPFIX_VERSION,
            export_time,
            sequence_number,
            observation_domain_id,
            sets,
            skipped_sets: Box::new([]),
        }
    }

    pub(crate) fn with_skipped_sets(mut self, skipped_sets: Box<[SetParsingError]>) -> Self {
        self.skipped_sets = skipped_sets;
        self
    }

    /// IPFIX Protocol version
    pub const fn version(&self) -> u16 {
        self.version
    }

    /// Time at which the IPFIX Message Header leaves the Exporter.
    ///
    /// Note: The exporter is sending this value at a seconds granularity as
    /// UNIX epoch.
    pub const fn export_time(&self) -> DateTime<Utc> {
        self.export_time
    }

    /// Incremental sequence counter modulo 2^32 of all IPFIX Data Records sent
    /// in the current stream from the current Observation Domain by the
    /// Exporting Process.
    pub const fn sequence_number(&self) -> u32 {
        self.sequence_number
    }

    /// A 32-bit identifier of the Observation Domain that is locally unique to
    /// the Exporting Process.
    pub const fn observation_domain_id(&self) -> u32 {
        self.observation_domain_id
    }

    /// Sets decoded from the message in wire order
    pub fn sets(&self) -> &[Set] {
        &self.sets
    }

    /// Sets, or the tails of sets, that could not be decoded. Never filled
    /// for packets built in memory.
    pub fn skipped_sets(&self) -> &[SetParsingError] {
        &self.skipped_sets
    }

    /// All data records of the packet in wire order, along with their set id
    pub fn data_records(&self) -> impl Iterator<Item = (DataSetId, &DataRecord)> {
        self.sets
            .iter()
            .filter_map(|set| match set {
                Set::Data { id, records } => Some((*id, records)),
                _ => None,
            })
            .flat_map(|(id, records)| records.iter().map(move |record| (id, record)))
    }
}

/// Every Set contains a common header. The Sets can be any of these three
/// possible types: Data Set, Template Set, or Options Template Set.
///
/// ```text
/// 0                   1                   2                   3
/// 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |          Set ID               |          Length               |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub enum Set {
    Template(Box<[TemplateRecord]>),
    OptionsTemplate(Box<[OptionsTemplateRecord]>),
    Data {
        id: DataSetId,
        records: Box<[DataRecord]>,
    },
}

impl Set {
    pub const fn id(&self) -> u16 {
        match self {
            Self::Template(_) => IPFIX_TEMPLATE_SET_ID,
            Self::OptionsTemplate(_) => IPFIX_OPTIONS_TEMPLATE_SET_ID,
            Self::Data { id, .. } => id.id(),
        }
    }
}

/// A Template Record, a record with no field specifiers is a withdrawal.
///
/// ```text
/// +--------------------------------------------------+
/// | Template Record Header                           |
/// +--------------------------------------------------+
/// | Field Specifier                                  |
/// +--------------------------------------------------+
/// | Field Specifier                                  |
/// +--------------------------------------------------+
///  ...
/// +--------------------------------------------------+
/// | Field Specifier                                  |
/// +--------------------------------------------------+
/// ```
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct TemplateRecord {
    id: u16,
    field_specifiers: Box<[FieldSpecifier]>,
}

impl TemplateRecord {
    pub const fn new(id: u16, field_specifiers: Box<[FieldSpecifier]>) -> Self {
        Self {
            id,
            field_specifiers,
        }
    }

    /// Withdraws template `id`, or all templates when `id` is the Template Set
    /// ID.
    pub fn withdrawal(id: u16) -> Self {
        Self::new(id, Box::new([]))
    }

    /// Each Template Record is given a unique Template ID in the range 256 to
    /// 65535.
    pub const fn id(&self) -> u16 {
        self.id
    }

    pub fn field_specifiers(&self) -> &[FieldSpecifier] {
        &self.field_specifiers
    }

    pub fn is_withdrawal(&self) -> bool {
        self.field_specifiers.is_empty()
    }
}

/// Options Template Record
///
/// ```text
/// 0                   1                   2                   3
/// 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |         Template ID (> 255)   |         Field Count           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |      Scope Field Count        |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct OptionsTemplateRecord {
    id: u16,
    scope_field_specifiers: Box<[FieldSpecifier]>,
    field_specifiers: Box<[FieldSpecifier]>,
}

impl OptionsTemplateRecord {
    pub const fn new(
        id: u16,
        scope_field_specifiers: Box<[FieldSpecifier]>,
        field_specifiers: Box<[FieldSpecifier]>,
    ) -> Self {
        Self {
            id,
            scope_field_specifiers,
            field_specifiers,
        }
    }

    pub fn withdrawal(id: u16) -> Self {
        Self::new(id, Box::new([]), Box::new([]))
    }

    pub const fn id(&self) -> u16 {
        self.id
    }

    pub fn scope_field_specifiers(&self) -> &[FieldSpecifier] {
        &self.scope_field_specifiers
    }

    pub fn field_specifiers(&self) -> &[FieldSpecifier] {
        &self.field_specifiers
    }

    pub fn is_withdrawal(&self) -> bool {
        self.scope_field_specifiers.is_empty() && self.field_specifiers.is_empty()
    }
}

/// A decoded data record. Fields keep the position they had in the template,
/// an IE repeated in the template is repeated here.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct DataRecord {
    scope_fields: Box<[(IE, Field)]>,
    fields: Box<[(IE, Field)]>,
}

impl DataRecord {
    pub const fn new(scope_fields: Box<[(IE, Field)]>, fields: Box<[(IE, Field)]>) -> Self {
        Self {
            scope_fields,
            fields,
        }
    }

    pub fn scope_fields(&self) -> &[(IE, Field)] {
        &self.scope_fields
    }

    pub fn fields(&self) -> &[(IE, Field)] {
        &self.fields
    }

    /// First value carried for `ie`, looking at scope fields first
    pub fn get(&self, ie: IE) -> Option<&Field> {
        self.iter()
            .find(|(field_ie, _)| *field_ie == ie)
            .map(|(_, field)| field)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(IE, Field)> {
        self.scope_fields.iter().chain(self.fields.iter())
    }
}
