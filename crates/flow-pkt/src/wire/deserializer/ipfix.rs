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

//! Set Parser and Record Decoder.
//!
//! Decoding is split in two levels of failure:
//! - The message header is validated first; any problem there discards the
//!   whole datagram ([IpfixPacketParsingError]).
//! - Every set is then decoded in wire order. A set that cannot be decoded, or
//!   a set that is only partially decoded, is reported in
//!   [IpfixPacket::skipped_sets] and never fails the message. Records decoded
//!   before the failure are kept.

use std::{iter::FusedIterator, net::IpAddr};

use chrono::{LocalResult, TimeZone, Utc};
use nom::{
    error::{ErrorKind, ParseError},
    number::complete::{be_u16, be_u32},
    IResult,
};

use crate::{
    ie::Field,
    ipfix::*,
    templates::{ExporterId, ExporterTemplates, TemplateStore},
    wire::{
        deserializer::{ie::FieldParsingError, FieldSpecifierParsingError},
        impl_parse_error, into_error, ReadablePdu, ReadablePduWithOneInput,
        ReadablePduWithTwoInputs,
    },
    DataSetId, FieldSpecifier, DATA_SET_MIN_ID,
};

/// 2-octets set id, 2-octets length
const SET_HEADER_LENGTH: usize = 4;

#[derive(thiserror::Error, Eq, PartialEq, Clone, Debug)]
pub enum IpfixPacketParsingError {
    #[error("nom error: {0:?}")]
    NomError(ErrorKind),
    #[error("message of {0} octets is shorter than the IPFIX header")]
    TruncatedHeader(usize),
    #[error("unsupported IPFIX version {0}")]
    UnsupportedVersion(u16),
    #[error("message declares {declared} octets but {received} were received")]
    LengthMismatch { declared: u16, received: usize },
    #[error("invalid export time {0}")]
    InvalidExportTime(u32),
}

impl_parse_error!(IpfixPacketParsingError);

impl IpfixPacketParsingError {
    /// The datagram is not a well formed IPFIX message
    pub const fn is_malformed(&self) -> bool {
        matches!(
            self,
            Self::TruncatedHeader(_) | Self::UnsupportedVersion(_) | Self::LengthMismatch { .. }
        )
    }
}

impl<'a, 's> ReadablePduWithTwoInputs<'a, IpAddr, &'s TemplateStore, IpfixPacketParsingError>
    for IpfixPacket
{
    /// Decodes a whole datagram received from `peer`.
    ///
    /// Template sets update `store` while the message is parsed; the lock of
    /// the exporter is held until every set is processed.
    fn from_wire(
        buf: &'a [u8],
        peer: IpAddr,
        store: &'s TemplateStore,
    ) -> IResult<&'a [u8], Self, IpfixPacketParsingError> {
        if buf.len() < IPFIX_HEADER_LENGTH as usize {
            return Err(nom::Err::Error(IpfixPacketParsingError::TruncatedHeader(
                buf.len(),
            )));
        }
        let (rest, version) = be_u16(buf)?;
        if version != IPFIX_VERSION {
            return Err(nom::Err::Error(
                IpfixPacketParsingError::UnsupportedVersion(version),
            ));
        }
        let (rest, length) = be_u16(rest)?;
        if length as usize != buf.len() {
            return Err(nom::Err::Error(IpfixPacketParsingError::LengthMismatch {
                declared: length,
                received: buf.len(),
            }));
        }
        let (rest, export_time) = be_u32(rest)?;
        let export_time = match Utc.timestamp_opt(export_time as i64, 0) {
            LocalResult::Single(time) => time,
            _ => {
                return Err(nom::Err::Error(
                    IpfixPacketParsingError::InvalidExportTime(export_time),
                ));
            }
        };
        let (rest, sequence_number) = be_u32(rest)?;
        let (mut rest, observation_domain_id) = be_u32(rest)?;

        let exporter = ExporterId::new(peer, observation_domain_id);
        let (sets, skipped_sets) = store.with_exporter(&exporter, |templates| {
            let mut sets = vec![];
            let mut skipped_sets = vec![];
            while !rest.is_empty() {
                if rest.len() < SET_HEADER_LENGTH && rest.iter().all(|octet| *octet == 0) {
                    break;
                }
                match parse_set(rest, templates) {
                    Ok((next, outcome)) => {
                        sets.extend(outcome.set);
                        skipped_sets.extend(outcome.error);
                        rest = next;
                    }
                    Err(err) => {
                        // The set boundaries can no longer be trusted
                        skipped_sets.push(err);
                        break;
                    }
                }
            }
            (sets, skipped_sets)
        });
        let packet = IpfixPacket::new(
            export_time,
            sequence_number,
            observation_domain_id,
            sets.into_boxed_slice(),
        )
        .with_skipped_sets(skipped_sets.into_boxed_slice());
        Ok((&buf[buf.len()..], packet))
    }
}

#[derive(thiserror::Error, Eq, PartialEq, Clone, Debug)]
pub enum SetParsingError {
    #[error("nom error: {0:?}")]
    NomError(ErrorKind),
    #[error("{0} octets left, too short for a set header")]
    TruncatedSetHeader(usize),
    #[error("set {id} has an invalid length {length}")]
    InvalidSetLength { id: u16, length: u16 },
    #[error("set {id} declares {declared} octets but only {available} are left")]
    TruncatedSet {
        id: u16,
        declared: u16,
        available: usize,
    },
    #[error("reserved set id {0}")]
    ReservedSetId(u16),
    #[error("no template is defined for data set {0}")]
    UnresolvedTemplate(u16),
    #[error("template record error: {0}")]
    TemplateRecordError(#[from] TemplateRecordParsingError),
    #[error("options template record error: {0}")]
    OptionsTemplateRecordError(#[from] OptionsTemplateRecordParsingError),
    #[error("data record error in set {id}: {error}")]
    DataRecordError {
        id: u16,
        error: DataRecordParsingError,
    },
}

impl_parse_error!(SetParsingError);

impl SetParsingError {
    /// ID of the set the error belongs to, when it is known
    pub const fn set_id(&self) -> Option<u16> {
        match self {
            Self::InvalidSetLength { id, .. }
            | Self::TruncatedSet { id, .. }
            | Self::DataRecordError { id, .. } => Some(*id),
            Self::ReservedSetId(id) | Self::UnresolvedTemplate(id) => Some(*id),
            Self::TemplateRecordError(_) => Some(IPFIX_TEMPLATE_SET_ID),
            Self::OptionsTemplateRecordError(_) => Some(IPFIX_OPTIONS_TEMPLATE_SET_ID),
            Self::NomError(_) | Self::TruncatedSetHeader(_) => None,
        }
    }

    /// Data set dropped because its template is unknown, expected while the
    /// exporter did not send its templates yet.
    pub const fn is_unresolved_template(&self) -> bool {
        matches!(self, Self::UnresolvedTemplate(_))
    }
}

/// What was recovered from a single set
#[derive(Debug)]
struct SetOutcome {
    set: Option<Set>,
    error: Option<SetParsingError>,
}

/// Reads one set header and decodes its body. An `Err` means the set header
/// is unusable and the rest of the message must be abandoned.
fn parse_set<'a>(
    buf: &'a [u8],
    templates: &mut ExporterTemplates,
) -> Result<(&'a [u8], SetOutcome), SetParsingError> {
    if buf.len() < SET_HEADER_LENGTH {
        return Err(SetParsingError::TruncatedSetHeader(buf.len()));
    }
    let (body, id) = be_u16(buf).map_err(into_error::<SetParsingError>)?;
    let (body, length) = be_u16(body).map_err(into_error::<SetParsingError>)?;
    if (length as usize) < SET_HEADER_LENGTH {
        return Err(SetParsingError::InvalidSetLength { id, length });
    }
    let body_length = length as usize - SET_HEADER_LENGTH;
    if body.len() < body_length {
        return Err(SetParsingError::TruncatedSet {
            id,
            declared: length,
            available: buf.len(),
        });
    }
    let (body, rest) = body.split_at(body_length);
    let outcome = match id {
        IPFIX_TEMPLATE_SET_ID => {
            let (records, error) = parse_template_records(
                body,
                SetParsingError::TemplateRecordError,
                |record: &TemplateRecord| {
                    if !record.is_withdrawal() {
                        templates.define(
                            record.id(),
                            DecodingTemplate::new(record.field_specifiers().into()),
                        );
                    } else if record.id() == IPFIX_TEMPLATE_SET_ID {
                        templates.withdraw_all(TemplateKind::Template);
                    } else {
                        templates.withdraw(record.id());
                    }
                },
            );
            SetOutcome {
                set: (!records.is_empty()).then(|| Set::Template(records.into_boxed_slice())),
                error,
            }
        }
        IPFIX_OPTIONS_TEMPLATE_SET_ID => {
            let (records, error) = parse_template_records(
                body,
                SetParsingError::OptionsTemplateRecordError,
                |record: &OptionsTemplateRecord| {
                    if !record.is_withdrawal() {
                        templates.define(
                            record.id(),
                            DecodingTemplate::new_options(
                                record.scope_field_specifiers().into(),
                                record.field_specifiers().into(),
                            ),
                        );
                    } else if record.id() == IPFIX_OPTIONS_TEMPLATE_SET_ID {
                        templates.withdraw_all(TemplateKind::OptionsTemplate);
                    } else {
                        templates.withdraw(record.id());
                    }
                },
            );
            SetOutcome {
                set: (!records.is_empty())
                    .then(|| Set::OptionsTemplate(records.into_boxed_slice())),
                error,
            }
        }
        id if id >= DATA_SET_MIN_ID => parse_data_set(id, body, templates),
        id => SetOutcome {
            set: None,
            error: Some(SetParsingError::ReservedSetId(id)),
        },
    };
    Ok((rest, outcome))
}

/// Decodes the records of a (options) template set, handing each one to
/// `install` as soon as it is decoded.
fn parse_template_records<'a, R, E>(
    mut body: &'a [u8],
    wrap: fn(E) -> SetParsingError,
    mut install: impl FnMut(&R),
) -> (Vec<R>, Option<SetParsingError>)
where
    R: ReadablePdu<'a, E>,
    E: ParseError<&'static [u8]>,
{
    let mut records = vec![];
    // Like Wireshark, anything shorter than a record header is padding.
    while body.len() >= SET_HEADER_LENGTH {
        if body.iter().all(|octet| *octet == 0) {
            break;
        }
        match R::from_wire(body) {
            Ok((rest, record)) => {
                install(&record);
                records.push(record);
                body = rest;
            }
            Err(err) => return (records, Some(wrap(into_error(err)))),
        }
    }
    (records, None)
}

fn parse_data_set(id: u16, body: &[u8], templates: &ExporterTemplates) -> SetOutcome {
    let template = match templates.resolve(id) {
        Some(template) => template,
        None => {
            return SetOutcome {
                set: None,
                error: Some(SetParsingError::UnresolvedTemplate(id)),
            }
        }
    };
    let mut records = vec![];
    let mut error = None;
    for record in DataRecords::new(body, &template) {
        match record {
            Ok(record) => records.push(record),
            Err(err) => error = Some(SetParsingError::DataRecordError { id, error: err }),
        }
    }
    let set = match DataSetId::new(id) {
        Ok(id) if !records.is_empty() => Some(Set::Data {
            id,
            records: records.into_boxed_slice(),
        }),
        _ => None,
    };
    SetOutcome { set, error }
}

/// Lazily decodes the records of a data set back to back.
///
/// Iteration stops once fewer octets than the smallest possible record are
/// left, the remainder is padding. A record that fails to decode is yielded
/// as an error and ends the iteration since the position of the next record
/// is unknown.
#[derive(Debug, Clone)]
pub struct DataRecords<'a> {
    buf: &'a [u8],
    template: &'a DecodingTemplate,
    min_record_length: usize,
    done: bool,
}

impl<'a> DataRecords<'a> {
    pub fn new(buf: &'a [u8], template: &'a DecodingTemplate) -> Self {
        Self {
            buf,
            template,
            min_record_length: template.min_record_length().max(1),
            done: false,
        }
    }

    /// Octets not consumed yet
    pub const fn remaining(&self) -> &'a [u8] {
        self.buf
    }
}

impl Iterator for DataRecords<'_> {
    type Item = Result<DataRecord, DataRecordParsingError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.buf.len() < self.min_record_length {
            self.done = true;
            return None;
        }
        match DataRecord::from_wire(self.buf, self.template) {
            Ok((rest, record)) => {
                // A record made only of empty fields would never advance
                self.done = rest.len() == self.buf.len();
                self.buf = rest;
                Some(Ok(record))
            }
            Err(err) => {
                self.done = true;
                Some(Err(into_error(err)))
            }
        }
    }
}

impl FusedIterator for DataRecords<'_> {}

#[derive(thiserror::Error, Eq, PartialEq, Clone, Debug)]
pub enum DataRecordParsingError {
    #[error("nom error: {0:?}")]
    NomError(ErrorKind),
    #[error(transparent)]
    FieldError(#[from] FieldParsingError),
}

impl_parse_error!(DataRecordParsingError);

fn decode_fields<'a>(
    mut buf: &'a [u8],
    specs: &[FieldSpecifier],
) -> IResult<&'a [u8], Box<[(crate::ie::IE, Field)]>, DataRecordParsingError> {
    let mut fields = Vec::with_capacity(specs.len());
    for spec in specs {
        let (rest, field) = Field::from_wire(buf, spec.element_id(), spec.length())
            .map_err(|err| err.map(DataRecordParsingError::FieldError))?;
        fields.push((spec.element_id(), field));
        buf = rest;
    }
    Ok((buf, fields.into_boxed_slice()))
}

impl<'a, 't> ReadablePduWithOneInput<'a, &'t DecodingTemplate, DataRecordParsingError>
    for DataRecord
{
    fn from_wire(
        buf: &'a [u8],
        template: &'t DecodingTemplate,
    ) -> IResult<&'a [u8], Self, DataRecordParsingError> {
        let (buf, scope_fields) = decode_fields(buf, template.scope_fields())?;
        let (buf, fields) = decode_fields(buf, template.fields())?;
        Ok((buf, DataRecord::new(scope_fields, fields)))
    }
}

#[derive(thiserror::Error, Eq, PartialEq, Clone, Debug)]
pub enum TemplateRecordParsingError {
    #[error("nom error: {0:?}")]
    NomError(ErrorKind),
    #[error("invalid template id {0}")]
    InvalidTemplateId(u16),
    #[error(transparent)]
    FieldSpecifierError(#[from] FieldSpecifierParsingError),
}

impl_parse_error!(TemplateRecordParsingError);

fn parse_field_specifiers<E>(
    mut buf: &[u8],
    count: u16,
    wrap: fn(FieldSpecifierParsingError) -> E,
) -> IResult<&[u8], Box<[FieldSpecifier]>, E> {
    let mut fields = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let (rest, field) = FieldSpecifier::from_wire(buf).map_err(|err| err.map(wrap))?;
        fields.push(field);
        buf = rest;
    }
    Ok((buf, fields.into_boxed_slice()))
}

impl<'a> ReadablePdu<'a, TemplateRecordParsingError> for TemplateRecord {
    fn from_wire(buf: &'a [u8]) -> IResult<&'a [u8], Self, TemplateRecordParsingError> {
        let (buf, template_id) = be_u16(buf)?;
        let (buf, field_count) = be_u16(buf)?;
        // A withdrawal of template ID 2 withdraws every template of the exporter
        let valid_id = template_id >= DATA_SET_MIN_ID
            || (field_count == 0 && template_id == IPFIX_TEMPLATE_SET_ID);
        if !valid_id {
            return Err(nom::Err::Error(
                TemplateRecordParsingError::InvalidTemplateId(template_id),
            ));
        }
        let (buf, fields) = parse_field_specifiers(
            buf,
            field_count,
            TemplateRecordParsingError::FieldSpecifierError,
        )?;
        Ok((buf, TemplateRecord::new(template_id, fields)))
    }
}

#[derive(thiserror::Error, Eq, PartialEq, Clone, Debug)]
pub enum OptionsTemplateRecordParsingError {
    #[error("nom error: {0:?}")]
    NomError(ErrorKind),
    #[error("invalid options template id {0}")]
    InvalidTemplateId(u16),
    /// Scope fields count must be less than the total fields count
    #[error("scope field count {scope} exceeds the field count {total}")]
    InvalidScopeFieldsCount { scope: u16, total: u16 },
    #[error(transparent)]
    FieldSpecifierError(#[from] FieldSpecifierParsingError),
}

impl_parse_error!(OptionsTemplateRecordParsingError);

impl<'a> ReadablePdu<'a, OptionsTemplateRecordParsingError> for OptionsTemplateRecord {
    fn from_wire(buf: &'a [u8]) -> IResult<&'a [u8], Self, OptionsTemplateRecordParsingError> {
        let (buf, template_id) = be_u16(buf)?;
        let (buf, total_fields_count) = be_u16(buf)?;
        // Withdrawal records carry no scope field count
        if total_fields_count == 0 {
            if template_id < DATA_SET_MIN_ID && template_id != IPFIX_OPTIONS_TEMPLATE_SET_ID {
                return Err(nom::Err::Error(
                    OptionsTemplateRecordParsingError::InvalidTemplateId(template_id),
                ));
            }
            return Ok((buf, OptionsTemplateRecord::withdrawal(template_id)));
        }
        if template_id < DATA_SET_MIN_ID {
            return Err(nom::Err::Error(
                OptionsTemplateRecordParsingError::InvalidTemplateId(template_id),
            ));
        }
        let (buf, scope_fields_count) = be_u16(buf)?;
        if scope_fields_count > total_fields_count {
            return Err(nom::Err::Error(
                OptionsTemplateRecordParsingError::InvalidScopeFieldsCount {
                    scope: scope_fields_count,
                    total: total_fields_count,
                },
            ));
        }
        let (buf, scope_fields) = parse_field_specifiers(
            buf,
            scope_fields_count,
            OptionsTemplateRecordParsingError::FieldSpecifierError,
        )?;
        let (buf, fields) = parse_field_specifiers(
            buf,
            total_fields_count - scope_fields_count,
            OptionsTemplateRecordParsingError::FieldSpecifierError,
        )?;
        Ok((
            buf,
            OptionsTemplateRecord::new(template_id, scope_fields, fields),
        ))
    }
}
