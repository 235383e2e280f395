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

//! Traits for Ser/Deser of the IPFIX wire format

pub mod deserializer;
pub mod serializer;

#[cfg(test)]
mod tests;

use nom::IResult;

/// Generic trait for Readable Protocol Data Unit that doesn't need any external
/// input while parsing the packet.
pub trait ReadablePdu<'a, Error> {
    fn from_wire(buf: &'a [u8]) -> IResult<&'a [u8], Self, Error>
    where
        Self: Sized;
}

/// Generic trait Readable Protocol Data Unit that does need a single external
/// input
pub trait ReadablePduWithOneInput<'a, T, ErrorType> {
    fn from_wire(buf: &'a [u8], input: T) -> IResult<&'a [u8], Self, ErrorType>
    where
        Self: Sized;
}

/// Generic trait for Readable Protocol Data Unit that does need two external
/// inputs
pub trait ReadablePduWithTwoInputs<'a, T, U, ErrorType> {
    fn from_wire(buf: &'a [u8], input1: T, input2: U) -> IResult<&'a [u8], Self, ErrorType>
    where
        Self: Sized;
}

/// Generic trait for Writable Protocol Data Unit that doesn't need any external
/// input while writing the packet.
#[allow(clippy::len_without_is_empty)]
pub trait WritablePdu<ErrorType> {
    const BASE_LENGTH: usize;

    /// The total length of the written buffer
    fn len(&self) -> usize;

    fn write<T: std::io::Write>(&self, writer: &mut T) -> Result<(), ErrorType>
    where
        Self: Sized;
}

/// Generic trait for Writable Protocol Data Unit that needs a single external
/// input to be written, usually the template describing its layout.
#[allow(clippy::len_without_is_empty)]
pub trait WritablePduWithOneInput<I, ErrorType> {
    const BASE_LENGTH: usize;

    /// The total length of the written buffer
    fn len(&self, input: I) -> usize;

    fn write<T: std::io::Write>(&self, writer: &mut T, input: I) -> Result<(), ErrorType>
    where
        Self: Sized;
}

/// Implements [nom::error::ParseError] for an error enum carrying a
/// `NomError(ErrorKind)` variant, so that nom's number parsers can be used
/// with `?` directly.
macro_rules! impl_parse_error {
    ($($ty:ty),* $(,)?) => {
        $(
            impl<'a> nom::error::ParseError<&'a [u8]> for $ty {
                fn from_error_kind(_input: &'a [u8], kind: nom::error::ErrorKind) -> Self {
                    Self::NomError(kind)
                }

                fn append(_input: &'a [u8], _kind: nom::error::ErrorKind, other: Self) -> Self {
                    other
                }
            }
        )*
    };
}

pub(crate) use impl_parse_error;

/// Flattens a [nom::Err] into the wrapped error. The parsers only use the
/// `complete` combinators, an `Incomplete` can still leak from a custom parser
/// and is reported as an end of input error.
pub(crate) fn into_error<E: nom::error::ParseError<&'static [u8]>>(err: nom::Err<E>) -> E {
    match err {
        nom::Err::Error(err) | nom::Err::Failure(err) => err,
        nom::Err::Incomplete(_) => E::from_error_kind(&[], nom::error::ErrorKind::Eof),
    }
}
