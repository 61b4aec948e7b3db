use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::datatype::Datatype;
use crate::error::{Result, StorageError};
use crate::names::{generate_uuid, timestamped_name};
use crate::range::Range;
use crate::uri::Uri;

pub const SCHEMA_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArrayType {
    Dense,
    Sparse,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dimension {
    pub name: String,
    pub datatype: Datatype,
    /// Full domain. Empty for string dimensions, which are unbounded.
    pub domain: Range,
}

impl Dimension {
    pub fn new(name: impl Into<String>, datatype: Datatype, domain: Range) -> Result<Self> {
        let name = name.into();
        let kind = datatype.element_kind();
        if datatype.is_string() {
            if !domain.empty() {
                return Err(StorageError::InvalidRange(format!(
                    "string dimension '{}' cannot have a domain",
                    name
                )));
            }
        } else {
            domain.check_kind(kind)?;
            if !domain.is_ordered(kind) {
                return Err(StorageError::InvalidRange(format!(
                    "domain of dimension '{}' has start > end",
                    name
                )));
            }
        }
        Ok(Self {
            name,
            datatype,
            domain,
        })
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            datatype: Datatype::StringAscii,
            domain: Range::default(),
        }
    }

    pub fn var_size(&self) -> bool {
        self.datatype.is_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    pub datatype: Datatype,
    pub var_sized: bool,
}

impl Attribute {
    pub fn new(name: impl Into<String>, datatype: Datatype) -> Self {
        Self {
            name: name.into(),
            datatype,
            var_sized: datatype.is_string(),
        }
    }
}

/// One version of an array's schema. The name comes from the file the
/// version is stored in and is not part of the payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArraySchema {
    #[serde(skip)]
    name: String,
    #[serde(skip)]
    uri: Option<Uri>,
    version: u32,
    array_type: ArrayType,
    dimensions: Vec<Dimension>,
    attributes: Vec<Attribute>,
    allows_duplicates: bool,
    timestamp_range: (u64, u64),
}

impl ArraySchema {
    pub fn new(
        array_type: ArrayType,
        dimensions: Vec<Dimension>,
        attributes: Vec<Attribute>,
    ) -> Result<Self> {
        let schema = Self {
            name: String::new(),
            uri: None,
            version: SCHEMA_FORMAT_VERSION,
            array_type,
            dimensions,
            attributes,
            allows_duplicates: false,
            timestamp_range: (0, 0),
        };
        schema.check()?;
        Ok(schema)
    }

    /// Structural validation shared by construction and evolution.
    pub fn check(&self) -> Result<()> {
        if self.dimensions.is_empty() {
            return Err(StorageError::InvalidFormat(
                "array schema needs at least one dimension".to_string(),
            ));
        }
        if self.attributes.is_empty() {
            return Err(StorageError::InvalidFormat(
                "array schema needs at least one attribute".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for name in self
            .dimensions
            .iter()
            .map(|d| &d.name)
            .chain(self.attributes.iter().map(|a| &a.name))
        {
            if !seen.insert(name.as_str()) {
                return Err(StorageError::InvalidFormat(format!(
                    "duplicate dimension/attribute name '{}'",
                    name
                )));
            }
        }
        if self.array_type == ArrayType::Dense {
            if let Some(d) = self.dimensions.iter().find(|d| d.var_size()) {
                return Err(StorageError::InvalidFormat(format!(
                    "dense arrays cannot have string dimension '{}'",
                    d.name
                )));
            }
            if self.allows_duplicates {
                return Err(StorageError::InvalidFormat(
                    "dense arrays cannot allow duplicates".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn deserialize(bytes: &[u8], name: &str, uri: Uri) -> Result<Self> {
        let mut schema: ArraySchema = bincode::deserialize(bytes)?;
        schema.name = name.to_string();
        schema.uri = Some(uri);
        schema.check()?;
        Ok(schema)
    }

    /// Stamp a fresh `__<t>_<t>_<uuid>` name for storing at `timestamp`.
    pub fn generate_name(&mut self, timestamp: u64) {
        self.timestamp_range = (timestamp, timestamp);
        self.name = timestamped_name(timestamp, timestamp, &generate_uuid());
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn uri(&self) -> Option<&Uri> {
        self.uri.as_ref()
    }

    pub fn set_uri(&mut self, uri: Uri) {
        self.uri = Some(uri);
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn array_type(&self) -> ArrayType {
        self.array_type
    }

    pub fn dense(&self) -> bool {
        self.array_type == ArrayType::Dense
    }

    pub fn dim_num(&self) -> usize {
        self.dimensions.len()
    }

    pub fn dimensions(&self) -> &[Dimension] {
        &self.dimensions
    }

    pub fn dimension(&self, idx: usize) -> Option<&Dimension> {
        self.dimensions.get(idx)
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub(crate) fn attributes_mut(&mut self) -> &mut Vec<Attribute> {
        &mut self.attributes
    }

    pub fn allows_duplicates(&self) -> bool {
        self.allows_duplicates
    }

    pub fn set_allows_duplicates(&mut self, allows: bool) -> Result<()> {
        self.allows_duplicates = allows;
        self.check().inspect_err(|_| self.allows_duplicates = false)
    }

    pub fn timestamp_range(&self) -> (u64, u64) {
        self.timestamp_range
    }
}
