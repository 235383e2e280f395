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

//! Code to handle decode/encoding of IPFIX packets exchanged with a single
//! peer.
//!
//! Decoding resolves templates through a shared [TemplateStore], so every
//! codec created for the same exporter sees the same templates. Encoding keeps
//! its own map of the templates it has written so far, data sets are then
//! written at the lengths their template declares.

use byteorder::{ByteOrder, NetworkEndian};
use bytes::{BufMut, BytesMut};
use std::{net::IpAddr, sync::Arc};
use tokio_util::codec::{Decoder, Encoder};
use tracing::instrument;

use crate::{
    ipfix::{
        DecodingTemplate, IpfixPacket, Set, TemplateKind, TemplatesMap, IPFIX_HEADER_LENGTH,
        IPFIX_OPTIONS_TEMPLATE_SET_ID, IPFIX_TEMPLATE_SET_ID,
    },
    templates::TemplateStore,
    wire::{
        deserializer::ipfix::IpfixPacketParsingError, into_error,
        serializer::ipfix::IpfixPacketWritingError, ReadablePduWithTwoInputs,
        WritablePduWithOneInput,
    },
};

#[derive(thiserror::Error, Debug, Clone, Eq, PartialEq)]
pub enum IpfixCodecDecoderError {
    #[error("IO error: {0}")]
    IoError(String),
    #[error(transparent)]
    IpfixParsingError(#[from] IpfixPacketParsingError),
}

impl From<std::io::Error> for IpfixCodecDecoderError {
    fn from(error: std::io::Error) -> Self {
        Self::IoError(error.to_string())
    }
}

impl IpfixCodecDecoderError {
    pub const fn is_malformed(&self) -> bool {
        match self {
            Self::IoError(_) => false,
            Self::IpfixParsingError(err) => err.is_malformed(),
        }
    }
}

/// IPFIX codec bound to a single peer
#[derive(Debug, Clone)]
pub struct IpfixCodec {
    peer: IpAddr,
    store: TemplateStore,
    /// Templates learned from the packets encoded so far
    templates_map: TemplatesMap,
}

impl IpfixCodec {
    pub fn new(peer: IpAddr, store: TemplateStore) -> Self {
        Self {
            peer,
            store,
            templates_map: TemplatesMap::new(),
        }
    }

    pub const fn peer(&self) -> IpAddr {
        self.peer
    }

    pub const fn store(&self) -> &TemplateStore {
        &self.store
    }

    /// Get immutable reference to the templates used for encoding
    pub const fn templates_map(&self) -> &TemplatesMap {
        &self.templates_map
    }

    /// Decodes one complete datagram, the IPFIX length must match the datagram
    /// length.
    #[instrument(skip_all, fields(peer = %self.peer))]
    pub fn decode_datagram(&self, buf: &[u8]) -> Result<IpfixPacket, IpfixCodecDecoderError> {
        let (_, pkt) = IpfixPacket::from_wire(buf, self.peer, &self.store).map_err(into_error)?;
        Ok(pkt)
    }

    fn learn_templates(&mut self, pkt: &IpfixPacket) {
        for set in pkt.sets() {
            match set {
                Set::Template(records) => {
                    for record in records.iter() {
                        if !record.is_withdrawal() {
                            self.templates_map.insert(
                                record.id(),
                                Arc::new(DecodingTemplate::new(record.field_specifiers().into())),
                            );
                        } else if record.id() == IPFIX_TEMPLATE_SET_ID {
                            self.templates_map
                                .retain(|_, t| t.kind() != TemplateKind::Template);
                        } else {
                            self.templates_map.remove(&record.id());
                        }
                    }
                }
                Set::OptionsTemplate(records) => {
                    for record in records.iter() {
                        if !record.is_withdrawal() {
                            self.templates_map.insert(
                                record.id(),
                                Arc::new(DecodingTemplate::new_options(
                                    record.scope_field_specifiers().into(),
                                    record.field_specifiers().into(),
                                )),
                            );
                        } else if record.id() == IPFIX_OPTIONS_TEMPLATE_SET_ID {
                            self.templates_map
                                .retain(|_, t| t.kind() != TemplateKind::OptionsTemplate);
                        } else {
                            self.templates_map.remove(&record.id());
                        }
                    }
                }
                Set::Data { .. } => {}
            }
        }
    }
}

impl Encoder<IpfixPacket> for IpfixCodec {
    type Error = IpfixPacketWritingError;

    fn encode(&mut self, pkt: IpfixPacket, dst: &mut BytesMut) -> Result<(), Self::Error> {
        self.learn_templates(&pkt);
        dst.reserve(pkt.len(Some(&self.templates_map)));
        let mut writer = dst.writer();
        pkt.write(&mut writer, Some(&self.templates_map))?;
        Ok(())
    }
}

/// Stream decoder, used when IPFIX messages are not delimited by datagrams
impl Decoder for IpfixCodec {
    type Item = IpfixPacket;
    type Error = IpfixCodecDecoderError;

    #[instrument(skip_all)]
    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let header_length = IPFIX_HEADER_LENGTH as usize;
        if buf.len() < header_length {
            // We don't have enough data yet to start processing
            return Ok(None);
        }
        let length = NetworkEndian::read_u16(&buf[2..4]) as usize;
        if length < header_length {
            // The length can't be trusted to find the next message
            buf.clear();
            return Err(IpfixPacketParsingError::LengthMismatch {
                declared: length as u16,
                received: header_length,
            }
            .into());
        }
        if buf.len() < length {
            // We still didn't read all the bytes for the message yet
            return Ok(None);
        }
        let msg = buf.split_to(length);
        self.decode_datagram(&msg).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_decode_partial_messages() {
        // Partial IPFIX packet
        let value1: Vec<u8> = vec![
            0x00, 0x0a, // Version
            0x00, 0x74, // Length = 116 bytes
            0x58, 0x3d, 0xe0, 0x59, // Export time
            0x00, 0x00, 0x0e, 0xe4, // Seq number
            0x00, 0x00, 0x00, 0x00, // Observation domain
            0xff,
            0x01, // Arbitrary values with length less than the 116 specified in the header
        ];
        let mut buf = BytesMut::from_iter(value1.iter());
        let mut codec = IpfixCodec::new(IpAddr::V4(Ipv4Addr::LOCALHOST), TemplateStore::new());
        assert_eq!(codec.decode(&mut buf), Ok(None));
        assert_eq!(buf.len(), 18);
    }

    #[test]
    fn test_decode_datagram_length_mismatch() {
        let codec = IpfixCodec::new(IpAddr::V4(Ipv4Addr::LOCALHOST), TemplateStore::new());
        let buf = [
            0x00, 0x0a, 0x00, 0x20, 0x58, 0x3d, 0xe0, 0x59, 0x00, 0x00, 0x0e, 0xe4, 0x00, 0x00,
            0x00, 0x00,
        ];
        let err = codec.decode_datagram(&buf).unwrap_err();
        assert!(err.is_malformed());
        assert_eq!(
            err,
            IpfixCodecDecoderError::IpfixParsingError(IpfixPacketParsingError::LengthMismatch {
                declared: 32,
                received: 16
            })
        );
    }
}
