//! Closed set of runtime datatypes.
//!
//! Every dimension, attribute and metadata value carries a `Datatype`.
//! Range code never switches on `Datatype` directly: it maps the datatype
//! to an [`ElementKind`] once and dispatches on that.

use serde::{Deserialize, Serialize};

use crate::error::{Result, StorageError};

/// Persisted datatype codes. The discriminants are part of the on-disk
/// format (array metadata stores them as a single byte).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Datatype {
    Int32 = 0,
    Int64 = 1,
    Float32 = 2,
    Float64 = 3,
    Char = 4,
    Int8 = 5,
    UInt8 = 6,
    Int16 = 7,
    UInt16 = 8,
    UInt32 = 9,
    UInt64 = 10,
    StringAscii = 11,
    StringUtf8 = 12,
    StringUtf16 = 13,
    StringUtf32 = 14,
    StringUcs2 = 15,
    StringUcs4 = 16,
    Any = 17,
    DatetimeYear = 18,
    DatetimeMonth = 19,
    DatetimeWeek = 20,
    DatetimeDay = 21,
    DatetimeHr = 22,
    DatetimeMin = 23,
    DatetimeSec = 24,
    DatetimeMs = 25,
    DatetimeUs = 26,
    DatetimeNs = 27,
    DatetimePs = 28,
    DatetimeFs = 29,
    DatetimeAs = 30,
    TimeHr = 31,
    TimeMin = 32,
    TimeSec = 33,
    TimeMs = 34,
    TimeUs = 35,
    TimeNs = 36,
    TimePs = 37,
    TimeFs = 38,
    TimeAs = 39,
}

const ALL: [Datatype; 40] = [
    Datatype::Int32,
    Datatype::Int64,
    Datatype::Float32,
    Datatype::Float64,
    Datatype::Char,
    Datatype::Int8,
    Datatype::UInt8,
    Datatype::Int16,
    Datatype::UInt16,
    Datatype::UInt32,
    Datatype::UInt64,
    Datatype::StringAscii,
    Datatype::StringUtf8,
    Datatype::StringUtf16,
    Datatype::StringUtf32,
    Datatype::StringUcs2,
    Datatype::StringUcs4,
    Datatype::Any,
    Datatype::DatetimeYear,
    Datatype::DatetimeMonth,
    Datatype::DatetimeWeek,
    Datatype::DatetimeDay,
    Datatype::DatetimeHr,
    Datatype::DatetimeMin,
    Datatype::DatetimeSec,
    Datatype::DatetimeMs,
    Datatype::DatetimeUs,
    Datatype::DatetimeNs,
    Datatype::DatetimePs,
    Datatype::DatetimeFs,
    Datatype::DatetimeAs,
    Datatype::TimeHr,
    Datatype::TimeMin,
    Datatype::TimeSec,
    Datatype::TimeMs,
    Datatype::TimeUs,
    Datatype::TimeNs,
    Datatype::TimePs,
    Datatype::TimeFs,
    Datatype::TimeAs,
];

/// Element representation a datatype is stored as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float32,
    Float64,
    /// Single byte character.
    Char,
    /// Variable-length byte string.
    Str,
}

impl ElementKind {
    /// Size of one element in bytes; `None` for variable-length strings.
    pub fn size(self) -> Option<usize> {
        match self {
            ElementKind::Int8 | ElementKind::UInt8 | ElementKind::Char => Some(1),
            ElementKind::Int16 | ElementKind::UInt16 => Some(2),
            ElementKind::Int32 | ElementKind::UInt32 | ElementKind::Float32 => Some(4),
            ElementKind::Int64 | ElementKind::UInt64 | ElementKind::Float64 => Some(8),
            ElementKind::Str => None,
        }
    }

    /// Integral kinds are the only ones adjacent ranges can coalesce on.
    pub fn is_integral(self) -> bool {
        !matches!(
            self,
            ElementKind::Float32 | ElementKind::Float64 | ElementKind::Str
        )
    }
}

impl Datatype {
    pub fn from_u8(code: u8) -> Result<Self> {
        ALL.get(code as usize)
            .copied()
            .ok_or_else(|| StorageError::InvalidFormat(format!("Unknown datatype code {}", code)))
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn element_kind(self) -> ElementKind {
        match self {
            Datatype::Int8 => ElementKind::Int8,
            Datatype::UInt8 | Datatype::Any => ElementKind::UInt8,
            Datatype::Int16 => ElementKind::Int16,
            Datatype::UInt16 => ElementKind::UInt16,
            Datatype::Int32 => ElementKind::Int32,
            Datatype::UInt32 => ElementKind::UInt32,
            Datatype::UInt64 => ElementKind::UInt64,
            Datatype::Float32 => ElementKind::Float32,
            Datatype::Float64 => ElementKind::Float64,
            Datatype::Char => ElementKind::Char,
            Datatype::StringAscii
            | Datatype::StringUtf8
            | Datatype::StringUtf16
            | Datatype::StringUtf32
            | Datatype::StringUcs2
            | Datatype::StringUcs4 => ElementKind::Str,
            // Int64 plus every datetime and time unit.
            _ => ElementKind::Int64,
        }
    }

    /// Bytes per value. For string types this is the code unit width.
    pub fn size(self) -> usize {
        match self {
            Datatype::StringAscii | Datatype::StringUtf8 => 1,
            Datatype::StringUtf16 | Datatype::StringUcs2 => 2,
            Datatype::StringUtf32 | Datatype::StringUcs4 => 4,
            other => other.element_kind().size().unwrap_or(1),
        }
    }

    pub fn is_string(self) -> bool {
        self.element_kind() == ElementKind::Str
    }

    pub fn is_datetime(self) -> bool {
        (Datatype::DatetimeYear as u8..=Datatype::DatetimeAs as u8).contains(&(self as u8))
    }

    pub fn is_time(self) -> bool {
        (Datatype::TimeHr as u8..=Datatype::TimeAs as u8).contains(&(self as u8))
    }

    /// Canonical upper-case name, used in error messages.
    pub fn name(self) -> &'static str {
        match self {
            Datatype::Int32 => "INT32",
            Datatype::Int64 => "INT64",
            Datatype::Float32 => "FLOAT32",
            Datatype::Float64 => "FLOAT64",
            Datatype::Char => "CHAR",
            Datatype::Int8 => "INT8",
            Datatype::UInt8 => "UINT8",
            Datatype::Int16 => "INT16",
            Datatype::UInt16 => "UINT16",
            Datatype::UInt32 => "UINT32",
            Datatype::UInt64 => "UINT64",
            Datatype::StringAscii => "STRING_ASCII",
            Datatype::StringUtf8 => "STRING_UTF8",
            Datatype::StringUtf16 => "STRING_UTF16",
            Datatype::StringUtf32 => "STRING_UTF32",
            Datatype::StringUcs2 => "STRING_UCS2",
            Datatype::StringUcs4 => "STRING_UCS4",
            Datatype::Any => "ANY",
            Datatype::DatetimeYear => "DATETIME_YEAR",
            Datatype::DatetimeMonth => "DATETIME_MONTH",
            Datatype::DatetimeWeek => "DATETIME_WEEK",
            Datatype::DatetimeDay => "DATETIME_DAY",
            Datatype::DatetimeHr => "DATETIME_HR",
            Datatype::DatetimeMin => "DATETIME_MIN",
            Datatype::DatetimeSec => "DATETIME_SEC",
            Datatype::DatetimeMs => "DATETIME_MS",
            Datatype::DatetimeUs => "DATETIME_US",
            Datatype::DatetimeNs => "DATETIME_NS",
            Datatype::DatetimePs => "DATETIME_PS",
            Datatype::DatetimeFs => "DATETIME_FS",
            Datatype::DatetimeAs => "DATETIME_AS",
            Datatype::TimeHr => "TIME_HR",
            Datatype::TimeMin => "TIME_MIN",
            Datatype::TimeSec => "TIME_SEC",
            Datatype::TimeMs => "TIME_MS",
            Datatype::TimeUs => "TIME_US",
            Datatype::TimeNs => "TIME_NS",
            Datatype::TimePs => "TIME_PS",
            Datatype::TimeFs => "TIME_FS",
            Datatype::TimeAs => "TIME_AS",
        }
    }
}

impl std::fmt::Display for Datatype {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_match_table() {
        for (i, dt) in ALL.iter().enumerate() {
            assert_eq!(dt.as_u8() as usize, i);
            assert_eq!(Datatype::from_u8(i as u8).unwrap(), *dt);
        }
        assert!(Datatype::from_u8(200).is_err());
    }

    #[test]
    fn test_element_kind_aliases() {
        assert_eq!(Datatype::DatetimeDay.element_kind(), ElementKind::Int64);
        assert_eq!(Datatype::TimeNs.element_kind(), ElementKind::Int64);
        assert_eq!(Datatype::Any.element_kind(), ElementKind::UInt8);
        assert_eq!(Datatype::StringUtf16.element_kind(), ElementKind::Str);
        assert!(Datatype::DatetimeAs.is_datetime());
        assert!(!Datatype::TimeHr.is_datetime());
        assert!(Datatype::TimeHr.is_time());
    }

    #[test]
    fn test_integral_kinds() {
        assert!(ElementKind::Char.is_integral());
        assert!(ElementKind::UInt64.is_integral());
        assert!(!ElementKind::Float64.is_integral());
        assert!(!ElementKind::Str.is_integral());
    }
}
