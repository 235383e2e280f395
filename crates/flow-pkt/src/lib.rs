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

#[cfg(feature = "codec")]
pub mod codec;
pub mod ie;
pub mod ipfix;
pub mod templates;
pub mod wire;

pub use crate::ie::{Field, IE};
pub use crate::templates::{ExporterId, TemplateStore};

use serde::{Deserialize, Serialize};
use std::ops::Deref;

/// Field length announcing that the actual length is carried in each record.
pub const VARIABLE_LENGTH: u16 = 65535;

/// Errors when crafting a new [FieldSpecifier]
#[derive(thiserror::Error, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum FieldSpecifierError {
    /// Specified field length can never hold a value of the given IE
    #[error("Invalid length specified {0} for IE: {1}")]
    InvalidLength(u16, IE),
}

/// Field Specifier
///
/// ```text
/// 0                   1                   2                   3
/// 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |E|  Information Element ident. |        Field Length           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                      Enterprise Number                        |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct FieldSpecifier {
    element_id: IE,
    length: u16,
}

impl FieldSpecifier {
    /// Reduced-size encodings are accepted for any IE, only a zero length for
    /// a fixed size IE is rejected.
    pub fn new(element_id: IE, length: u16) -> Result<Self, FieldSpecifierError> {
        if length == 0 && element_id.data_type().is_fixed_size() {
            return Err(FieldSpecifierError::InvalidLength(length, element_id));
        }
        Ok(Self { element_id, length })
    }

    pub const fn element_id(&self) -> IE {
        self.element_id
    }

    pub const fn length(&self) -> u16 {
        self.length
    }

    pub const fn is_variable_length(&self) -> bool {
        self.length == VARIABLE_LENGTH
    }
}

#[derive(thiserror::Error, Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum DataSetIdError {
    #[error("Invalid data set id specified {0}")]
    InvalidId(u16),
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct DataSetId(u16);

/// Values 256 and above are used for Data Sets
pub(crate) const DATA_SET_MIN_ID: u16 = 256;

impl DataSetId {
    pub const fn new(id: u16) -> Result<Self, DataSetIdError> {
        if id < DATA_SET_MIN_ID {
            Err(DataSetIdError::InvalidId(id))
        } else {
            Ok(Self(id))
        }
    }

    #[inline]
    pub const fn id(&self) -> u16 {
        self.0
    }
}

impl Deref for DataSetId {
    type Target = u16;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
