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
    ipfix::*,
    wire::{
        serializer::{ie::FieldWritingError, impl_from_std_io_error, FieldSpecifierWritingError},
        WritablePdu, WritablePduWithOneInput,
    },
    FieldSpecifier,
};

#[derive(thiserror::Error, Eq, PartialEq, Clone, Debug)]
pub enum IpfixPacketWritingError {
    #[error("StdIO error: {0}")]
    StdIOError(String),
    #[error("message length {0} exceeds the maximum IPFIX message length")]
    MessageTooLong(usize),
    #[error(transparent)]
    SetError(#[from] SetWritingError),
}

impl_from_std_io_error!(IpfixPacketWritingError);

/// The templates map is used to write data records at the length their
/// template declares, without it every field is written with its natural
/// length.
impl WritablePduWithOneInput<Option<&TemplatesMap>, IpfixPacketWritingError> for IpfixPacket {
    /// 2-octets version, 2-octets length, 4-octets * 3 (export time, seq no,
    /// observation domain id)
    const BASE_LENGTH: usize = IPFIX_HEADER_LENGTH as usize;

    fn len(&self, templates_map: Option<&TemplatesMap>) -> usize {
        Self::BASE_LENGTH
            + self
                .sets()
                .iter()
                .map(|x| x.len(templates_map))
                .sum::<usize>()
    }

    fn write<T: Write>(
        &self,
        writer: &mut T,
        templates_map: Option<&TemplatesMap>,
    ) -> Result<(), IpfixPacketWritingError> {
        let length = self.len(templates_map);
        let length =
            u16::try_from(length).map_err(|_| IpfixPacketWritingError::MessageTooLong(length))?;
        writer.write_u16::<NetworkEndian>(self.version())?;
        writer.write_u16::<NetworkEndian>(length)?;
        writer.write_u32::<NetworkEndian>(self.export_time().timestamp() as u32)?;
        writer.write_u32::<NetworkEndian>(self.sequence_number())?;
        writer.write_u32::<NetworkEndian>(self.observation_domain_id())?;
        for set in self.sets() {
            set.write(writer, templates_map)?;
        }
        Ok(())
    }
}

#[derive(thiserror::Error, Eq, PartialEq, Clone, Debug)]
pub enum TemplateRecordWritingError {
    #[error("StdIO error: {0}")]
    StdIOError(String),
    #[error(transparent)]
    FieldSpecifierError(#[from] FieldSpecifierWritingError),
}

impl_from_std_io_error!(TemplateRecordWritingError);

fn specifiers_len(specs: &[FieldSpecifier]) -> usize {
    specs.iter().map(|x| x.len()).sum::<usize>()
}

impl WritablePdu<TemplateRecordWritingError> for TemplateRecord {
    /// 2-octets template_id, 2-octets field count
    const BASE_LENGTH: usize = 4;

    fn len(&self) -> usize {
        Self::BASE_LENGTH + specifiers_len(self.field_specifiers())
    }

    fn write<T: Write>(&self, writer: &mut T) -> Result<(), TemplateRecordWritingError> {
        writer.write_u16::<NetworkEndian>(self.id())?;
        writer.write_u16::<NetworkEndian>(self.field_specifiers().len() as u16)?;
        for field in self.field_specifiers() {
            field.write(writer)?;
        }
        Ok(())
    }
}

#[derive(thiserror::Error, Eq, PartialEq, Clone, Debug)]
pub enum OptionsTemplateRecordWritingError {
    #[error("StdIO error: {0}")]
    StdIOError(String),
    #[error(transparent)]
    FieldSpecifierError(#[from] FieldSpecifierWritingError),
}

impl_from_std_io_error!(OptionsTemplateRecordWritingError);

impl WritablePdu<OptionsTemplateRecordWritingError> for OptionsTemplateRecord {
    /// 2-octets template_id, 2-octets fields count, 2-octet scope fields count
    const BASE_LENGTH: usize = 6;

    fn len(&self) -> usize {
        if self.is_withdrawal() {
            // A withdrawal has no scope fields count
            return Self::BASE_LENGTH - 2;
        }
        Self::BASE_LENGTH
            + specifiers_len(self.scope_field_specifiers())
            + specifiers_len(self.field_specifiers())
    }

    fn write<T: Write>(&self, writer: &mut T) -> Result<(), OptionsTemplateRecordWritingError> {
        writer.write_u16::<NetworkEndian>(self.id())?;
        writer.write_u16::<NetworkEndian>(
            (self.scope_field_specifiers().len() + self.field_specifiers().len()) as u16,
        )?;
        if self.is_withdrawal() {
            return Ok(());
        }
        writer.write_u16::<NetworkEndian>(self.scope_field_specifiers().len() as u16)?;
        for field in self.scope_field_specifiers() {
            field.write(writer)?;
        }
        for field in self.field_specifiers() {
            field.write(writer)?;
        }
        Ok(())
    }
}

#[derive(thiserror::Error, Eq, PartialEq, Clone, Debug)]
pub enum DataRecordWritingError {
    #[error("StdIO error: {0}")]
    StdIOError(String),
    #[error(transparent)]
    FieldError(#[from] FieldWritingError),
}

impl_from_std_io_error!(DataRecordWritingError);

/// Pairs every value with the length its template declares, if known
fn with_lengths<'a>(
    values: &'a [(crate::ie::IE, crate::ie::Field)],
    specs: Option<&'a [FieldSpecifier]>,
) -> impl Iterator<Item = (&'a crate::ie::Field, Option<u16>)> + 'a {
    values.iter().enumerate().map(move |(index, (_, value))| {
        (
            value,
            specs.and_then(|specs| specs.get(index)).map(|spec| spec.length()),
        )
    })
}

impl WritablePduWithOneInput<Option<&DecodingTemplate>, DataRecordWritingError> for DataRecord {
    const BASE_LENGTH: usize = 0;

    fn len(&self, decoding_template: Option<&DecodingTemplate>) -> usize {
        let scope_specs = decoding_template.map(|x| x.scope_fields());
        let specs = decoding_template.map(|x| x.fields());
        Self::BASE_LENGTH
            + with_lengths(self.scope_fields(), scope_specs)
                .chain(with_lengths(self.fields(), specs))
                .map(|(value, length)| value.len(length))
                .sum::<usize>()
    }

    fn write<T: Write>(
        &self,
        writer: &mut T,
        decoding_template: Option<&DecodingTemplate>,
    ) -> Result<(), DataRecordWritingError> {
        let scope_specs = decoding_template.map(|x| x.scope_fields());
        let specs = decoding_template.map(|x| x.fields());
        for (value, length) in with_lengths(self.scope_fields(), scope_specs)
            .chain(with_lengths(self.fields(), specs))
        {
            value.write(writer, length)?;
        }
        Ok(())
    }
}

/// Calculate Set size
#[inline]
fn calculate_set_size(templates_map: Option<&TemplatesMap>, set: &Set) -> usize {
    let base_length = Set::BASE_LENGTH;
    let length = match set {
        Set::Template(records) => records.iter().map(|x| x.len()).sum::<usize>(),
        Set::OptionsTemplate(records) => records.iter().map(|x| x.len()).sum::<usize>(),
        Set::Data { id: _, records } => {
            let decoding_template = templates_map.and_then(|x| x.get(&set.id()));
            records
                .iter()
                .map(|x| x.len(decoding_template.map(|t| &**t)))
                .sum::<usize>()
        }
    };
    length + base_length
}

#[derive(thiserror::Error, Eq, PartialEq, Clone, Debug)]
pub enum SetWritingError {
    #[error("StdIO error: {0}")]
    StdIOError(String),
    #[error(transparent)]
    DataRecordError(#[from] DataRecordWritingError),
    #[error(transparent)]
    TemplateRecordError(#[from] TemplateRecordWritingError),
    #[error(transparent)]
    OptionsTemplateRecordError(#[from] OptionsTemplateRecordWritingError),
}

impl_from_std_io_error!(SetWritingError);

impl WritablePduWithOneInput<Option<&TemplatesMap>, SetWritingError> for Set {
    /// 2-octets set id + 2-octet set length
    const BASE_LENGTH: usize = 4;

    fn len(&self, templates_map: Option<&TemplatesMap>) -> usize {
        calculate_set_size(templates_map, self)
    }

    fn write<T: Write>(
        &self,
        writer: &mut T,
        templates_map: Option<&TemplatesMap>,
    ) -> Result<(), SetWritingError> {
        let length = calculate_set_size(templates_map, self) as u16;
        writer.write_u16::<NetworkEndian>(self.id())?;
        writer.write_u16::<NetworkEndian>(length)?;
        match self {
            Self::Template(records) => {
                for record in records.iter() {
                    record.write(writer)?;
                }
            }
            Self::OptionsTemplate(records) => {
                for record in records.iter() {
                    record.write(writer)?;
                }
            }
            Self::Data { records, .. } => {
                let decoding_template = templates_map
                    .and_then(|x| x.get(&self.id()))
                    .map(|x| &**x);
                for record in records.iter() {
                    record.write(writer, decoding_template)?;
                }
            }
        }
        Ok(())
    }
}
