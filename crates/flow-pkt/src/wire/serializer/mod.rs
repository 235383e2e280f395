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

pub mod ie;
pub mod ipfix;

use crate::{wire::WritablePdu, FieldSpecifier};
use byteorder::{NetworkEndian, WriteBytesExt};
use std::io::Write;

/// Writing errors keep the [std::io::Error] as a string to stay `Clone` and
/// `Eq`.
macro_rules! impl_from_std_io_error {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<std::io::Error> for $ty {
                fn from(err: std::io::Error) -> Self {
                    Self::StdIOError(err.to_string())
                }
            }
        )*
    };
}

pub(crate) use impl_from_std_io_error;

#[derive(thiserror::Error, Eq, PartialEq, Clone, Debug)]
pub enum FieldSpecifierWritingError {
    #[error("StdIO error: {0}")]
    StdIOError(String),
}

impl_from_std_io_error!(FieldSpecifierWritingError);

impl WritablePdu<FieldSpecifierWritingError> for FieldSpecifier {
    /// 2-octets field id, 2-octets length
    const BASE_LENGTH: usize = 4;

    fn len(&self) -> usize {
        Self::BASE_LENGTH + if self.element_id().pen() == 0 { 0 } else { 4 }
    }

    fn write<T: Write>(&self, writer: &mut T) -> Result<(), FieldSpecifierWritingError> {
        let element_id = self.element_id().id();
        let pen = self.element_id().pen();

        if pen == 0 {
            writer.write_u16::<NetworkEndian>(element_id)?;
        } else {
            // Set Enterprise bit
            writer.write_u16::<NetworkEndian>(element_id | 0x8000)?;
        }

        writer.write_u16::<NetworkEndian>(self.length())?;

        if pen != 0 {
            writer.write_u32::<NetworkEndian>(pen)?;
        }
        Ok(())
    }
}
