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

//! Information Elements known to the collector and their decoded values.
//!
//! The registry is a closed set of IANA elements (PEN 0). Anything else,
//! including every enterprise specific element, maps to [IE::Unknown] and is
//! carried as an opaque [Field::OctetArray].

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Abstract data types as defined by
/// [RFC 7012](https://www.rfc-editor.org/rfc/rfc7012#section-3.1)
#[allow(non_camel_case_types)]
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize, strum_macros::Display,
)]
pub enum InformationElementDataType {
    octetArray,
    unsigned8,
    unsigned16,
    unsigned32,
    unsigned64,
    macAddress,
    ipv4Address,
    ipv6Address,
    dateTimeSeconds,
    dateTimeMilliseconds,
}

impl InformationElementDataType {
    /// Types that decode into [Field] unsigned integer variants
    pub const fn is_unsigned(&self) -> bool {
        matches!(
            self,
            Self::unsigned8
                | Self::unsigned16
                | Self::unsigned32
                | Self::unsigned64
                | Self::dateTimeSeconds
                | Self::dateTimeMilliseconds
        )
    }

    pub const fn is_fixed_size(&self) -> bool {
        !matches!(self, Self::octetArray)
    }
}

macro_rules! information_elements {
    ($($(#[$doc:meta])* $name:ident = $id:literal => $data_type:ident,)*) => {
        /// IANA Information Elements understood by the collector
        #[allow(non_camel_case_types)]
        #[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
        pub enum IE {
            $($(#[$doc])* $name,)*
            /// Any element outside the registry, `pen` is zero for IANA elements
            Unknown { pen: u32, id: u16 },
        }

        impl IE {
            /// Information element identifier without the enterprise bit
            pub const fn id(&self) -> u16 {
                match self {
                    $(Self::$name => $id,)*
                    Self::Unknown { id, .. } => *id,
                }
            }

            /// Private Enterprise Number, zero for IANA elements
            pub const fn pen(&self) -> u32 {
                match self {
                    Self::Unknown { pen, .. } => *pen,
                    _ => 0,
                }
            }

            pub const fn data_type(&self) -> InformationElementDataType {
                match self {
                    $(Self::$name => InformationElementDataType::$data_type,)*
                    Self::Unknown { .. } => InformationElementDataType::octetArray,
                }
            }
        }

        impl From<(u32, u16)> for IE {
            fn from(value: (u32, u16)) -> Self {
                let (pen, id) = value;
                if pen != 0 {
                    return Self::Unknown { pen, id };
                }
                match id {
                    $($id => Self::$name,)*
                    id => Self::Unknown { pen, id },
                }
            }
        }

        impl std::fmt::Display for IE {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    $(Self::$name => f.write_str(stringify!($name)),)*
                    Self::Unknown { pen, id } => write!(f, "unknown({pen}:{id})"),
                }
            }
        }
    };
}

information_elements! {
    octetDeltaCount = 1 => unsigned64,
    packetDeltaCount = 2 => unsigned64,
    protocolIdentifier = 4 => unsigned8,
    ipClassOfService = 5 => unsigned8,
    tcpControlBits = 6 => unsigned16,
    sourceTransportPort = 7 => unsigned16,
    sourceIPv4Address = 8 => ipv4Address,
    sourceIPv4PrefixLength = 9 => unsigned8,
    ingressInterface = 10 => unsigned32,
    destinationTransportPort = 11 => unsigned16,
    destinationIPv4Address = 12 => ipv4Address,
    destinationIPv4PrefixLength = 13 => unsigned8,
    egressInterface = 14 => unsigned32,
    ipNextHopIPv4Address = 15 => ipv4Address,
    sourceIPv6Address = 27 => ipv6Address,
    destinationIPv6Address = 28 => ipv6Address,
    icmpTypeCodeIPv4 = 32 => unsigned16,
    sourceMacAddress = 56 => macAddress,
    postDestinationMacAddress = 57 => macAddress,
    vlanId = 58 => unsigned16,
    ipVersion = 60 => unsigned8,
    /// 0x00 ingress flow, 0x01 egress flow
    flowDirection = 61 => unsigned8,
    ipNextHopIPv6Address = 62 => ipv6Address,
    destinationMacAddress = 80 => macAddress,
    postSourceMacAddress = 81 => macAddress,
    octetTotalCount = 85 => unsigned64,
    packetTotalCount = 86 => unsigned64,
    flowEndReason = 136 => unsigned8,
    icmpTypeCodeIPv6 = 139 => unsigned16,
    flowStartSeconds = 150 => dateTimeSeconds,
    flowEndSeconds = 151 => dateTimeSeconds,
    flowStartMilliseconds = 152 => dateTimeMilliseconds,
    flowEndMilliseconds = 153 => dateTimeMilliseconds,
    postNATSourceIPv4Address = 225 => ipv4Address,
    postNATDestinationIPv4Address = 226 => ipv4Address,
    postNAPTSourceTransportPort = 227 => unsigned16,
    postNAPTDestinationTransportPort = 228 => unsigned16,
}

/// Value of a single decoded information element.
///
/// Integers keep the width they were encoded with, reduced-size encodings are
/// zero-extended into the next wider variant.
#[derive(
    Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize, strum_macros::IntoStaticStr,
)]
pub enum Field {
    Unsigned8(u8),
    Unsigned16(u16),
    Unsigned32(u32),
    Unsigned64(u64),
    Ipv4Address(Ipv4Addr),
    Ipv6Address(Ipv6Addr),
    /// 48-bit MAC address, most significant octet first
    MacAddress(u64),
    OctetArray(Box<[u8]>),
}

impl Field {
    pub const fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Unsigned8(v) => Some(*v as u64),
            Self::Unsigned16(v) => Some(*v as u64),
            Self::Unsigned32(v) => Some(*v as u64),
            Self::Unsigned64(v) => Some(*v),
            _ => None,
        }
    }

    pub const fn as_ip(&self) -> Option<IpAddr> {
        match self {
            Self::Ipv4Address(addr) => Some(IpAddr::V4(*addr)),
            Self::Ipv6Address(addr) => Some(IpAddr::V6(*addr)),
            _ => None,
        }
    }

    pub const fn as_mac(&self) -> Option<u64> {
        match self {
            Self::MacAddress(mac) => Some(*mac),
            _ => None,
        }
    }

    /// Number of octets the value occupies with its natural encoding
    pub fn natural_length(&self) -> usize {
        match self {
            Self::Unsigned8(_) => 1,
            Self::Unsigned16(_) => 2,
            Self::Unsigned32(_) => 4,
            Self::Unsigned64(_) => 8,
            Self::Ipv4Address(_) => 4,
            Self::Ipv6Address(_) => 16,
            Self::MacAddress(_) => 6,
            Self::OctetArray(value) => value.len(),
        }
    }
}

#[derive(thiserror::Error, Copy, Clone, Debug, Eq, PartialEq)]
pub enum FieldConversionError {
    #[error("{0} field cannot be converted to {1}")]
    InvalidType(&'static str, &'static str),
    #[error("value {0} is out of range for {1}")]
    OutOfRange(u64, &'static str),
}

macro_rules! impl_try_from_field {
    ($($ty:ty),*) => {
        $(
            impl TryFrom<&Field> for $ty {
                type Error = FieldConversionError;

                fn try_from(field: &Field) -> Result<Self, Self::Error> {
                    let value = field.as_u64().ok_or_else(|| {
                        FieldConversionError::InvalidType(field.into(), stringify!($ty))
                    })?;
                    <$ty>::try_from(value)
                        .map_err(|_| FieldConversionError::OutOfRange(value, stringify!($ty)))
                }
            }
        )*
    };
}

impl_try_from_field!(u8, u16, u32, u64);

impl TryFrom<&Field> for IpAddr {
    type Error = FieldConversionError;

    fn try_from(field: &Field) -> Result<Self, Self::Error> {
        field
            .as_ip()
            .ok_or_else(|| FieldConversionError::InvalidType(field.into(), "IpAddr"))
    }
}
