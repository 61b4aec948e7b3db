//! `Range`: a typed interval over one dimension's domain.
//!
//! Fixed-width ranges keep `start || end` in a single little-endian buffer;
//! string ranges keep independent start and end byte strings. Typed reads go
//! through [`FixedElement`] and validate the stored element width first.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::datatype::ElementKind;
use crate::error::{Result, StorageError};

// ── Element traits ─────────────────────────────────────────────────

/// A fixed-width scalar a range can be decoded into.
pub trait FixedElement: Copy + Send + Sync + std::fmt::Debug + 'static {
    const SIZE: usize;

    /// Decode from exactly `SIZE` little-endian bytes.
    fn decode(bytes: &[u8]) -> Option<Self>;

    fn encode(self, out: &mut Vec<u8>);

    /// Total order used for sorting and overlap tests.
    fn compare(&self, other: &Self) -> Ordering;
}

/// Integral scalars, the only ones adjacent ranges coalesce on.
pub trait IntegralElement: FixedElement + PartialEq {
    /// `self + 1`, or `None` at the type's maximum.
    fn successor(self) -> Option<Self>;
}

macro_rules! impl_integral {
    ($($t:ty),*) => {$(
        impl FixedElement for $t {
            const SIZE: usize = std::mem::size_of::<$t>();

            fn decode(bytes: &[u8]) -> Option<Self> {
                bytes.try_into().ok().map(<$t>::from_le_bytes)
            }

            fn encode(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }

            fn compare(&self, other: &Self) -> Ordering {
                self.cmp(other)
            }
        }

        impl IntegralElement for $t {
            fn successor(self) -> Option<Self> {
                self.checked_add(1)
            }
        }
    )*};
}

macro_rules! impl_float {
    ($($t:ty),*) => {$(
        impl FixedElement for $t {
            const SIZE: usize = std::mem::size_of::<$t>();

            fn decode(bytes: &[u8]) -> Option<Self> {
                bytes.try_into().ok().map(<$t>::from_le_bytes)
            }

            fn encode(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }

            fn compare(&self, other: &Self) -> Ordering {
                self.total_cmp(other)
            }
        }
    )*};
}

impl_integral!(i8, u8, i16, u16, i32, u32, i64, u64);
impl_float!(f32, f64);

/// Compare two encoded scalars of the given kind. Strings compare bytewise.
pub(crate) fn compare_values(kind: ElementKind, a: &[u8], b: &[u8]) -> Ordering {
    fn typed<T: FixedElement>(a: &[u8], b: &[u8]) -> Ordering {
        match (T::decode(a), T::decode(b)) {
            (Some(x), Some(y)) => x.compare(&y),
            _ => a.cmp(b),
        }
    }

    match kind {
        ElementKind::Int8 | ElementKind::Char => typed::<i8>(a, b),
        ElementKind::UInt8 => typed::<u8>(a, b),
        ElementKind::Int16 => typed::<i16>(a, b),
        ElementKind::UInt16 => typed::<u16>(a, b),
        ElementKind::Int32 => typed::<i32>(a, b),
        ElementKind::UInt32 => typed::<u32>(a, b),
        ElementKind::Int64 => typed::<i64>(a, b),
        ElementKind::UInt64 => typed::<u64>(a, b),
        ElementKind::Float32 => typed::<f32>(a, b),
        ElementKind::Float64 => typed::<f64>(a, b),
        ElementKind::Str => a.cmp(b),
    }
}

// ── Range ──────────────────────────────────────────────────────────

/// Storage behind a [`Range`]. Decoding rejects a fixed-width buffer that
/// does not hold exactly two elements.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "RawRangeData")]
pub enum RangeData {
    #[default]
    Empty,
    FixedWidth { bytes: Vec<u8>, element_size: usize },
    Variable { start: Vec<u8>, end: Vec<u8> },
}

/// Wire form of [`RangeData`], before its widths are checked.
#[derive(Deserialize)]
enum RawRangeData {
    Empty,
    FixedWidth { bytes: Vec<u8>, element_size: usize },
    Variable { start: Vec<u8>, end: Vec<u8> },
}

impl TryFrom<RawRangeData> for RangeData {
    type Error = StorageError;

    fn try_from(raw: RawRangeData) -> Result<Self> {
        match raw {
            RawRangeData::Empty => Ok(RangeData::Empty),
            RawRangeData::FixedWidth {
                bytes,
                element_size,
            } => {
                if element_size == 0 || element_size.checked_mul(2) != Some(bytes.len()) {
                    return Err(StorageError::InvalidFormat(format!(
                        "fixed-width range holds {} bytes for element size {}",
                        bytes.len(),
                        element_size
                    )));
                }
                Ok(RangeData::FixedWidth {
                    bytes,
                    element_size,
                })
            }
            RawRangeData::Variable { start, end } => Ok(RangeData::Variable { start, end }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Range {
    data: RangeData,
}

impl Range {
    /// Build a fixed-width range from `start || end`.
    pub fn from_bytes(start_end: &[u8], element_size: usize) -> Result<Self> {
        if element_size == 0 || start_end.len() != 2 * element_size {
            return Err(StorageError::InvalidRange(format!(
                "expected {} bytes for element size {}, got {}",
                2 * element_size,
                element_size,
                start_end.len()
            )));
        }
        Ok(Self {
            data: RangeData::FixedWidth {
                bytes: start_end.to_vec(),
                element_size,
            },
        })
    }

    pub fn from_values<T: FixedElement>(start: T, end: T) -> Self {
        let mut bytes = Vec::with_capacity(2 * T::SIZE);
        start.encode(&mut bytes);
        end.encode(&mut bytes);
        Self {
            data: RangeData::FixedWidth {
                bytes,
                element_size: T::SIZE,
            },
        }
    }

    pub fn from_str_range(start: impl AsRef<[u8]>, end: impl AsRef<[u8]>) -> Self {
        Self {
            data: RangeData::Variable {
                start: start.as_ref().to_vec(),
                end: end.as_ref().to_vec(),
            },
        }
    }

    pub fn data(&self) -> &RangeData {
        &self.data
    }

    pub fn start(&self) -> &[u8] {
        match &self.data {
            RangeData::Empty => &[],
            RangeData::FixedWidth {
                bytes,
                element_size,
            } => &bytes[..*element_size],
            RangeData::Variable { start, .. } => start,
        }
    }

    pub fn end(&self) -> &[u8] {
        match &self.data {
            RangeData::Empty => &[],
            RangeData::FixedWidth {
                bytes,
                element_size,
            } => &bytes[*element_size..],
            RangeData::Variable { end, .. } => end,
        }
    }

    /// Start of a string range; empty for fixed-width ranges.
    pub fn start_str(&self) -> &[u8] {
        match &self.data {
            RangeData::Variable { start, .. } => start,
            _ => &[],
        }
    }

    /// End of a string range; empty for fixed-width ranges.
    pub fn end_str(&self) -> &[u8] {
        match &self.data {
            RangeData::Variable { end, .. } => end,
            _ => &[],
        }
    }

    pub fn start_as<T: FixedElement>(&self) -> Result<T> {
        self.typed::<T>().map(|(s, _)| s)
    }

    pub fn end_as<T: FixedElement>(&self) -> Result<T> {
        self.typed::<T>().map(|(_, e)| e)
    }

    fn typed<T: FixedElement>(&self) -> Result<(T, T)> {
        match &self.data {
            RangeData::FixedWidth {
                bytes,
                element_size,
            } if *element_size == T::SIZE => {
                let start = T::decode(&bytes[..T::SIZE]);
                let end = T::decode(&bytes[T::SIZE..]);
                start.zip(end).ok_or_else(|| {
                    StorageError::InvalidRange("corrupt fixed-width range".to_string())
                })
            }
            RangeData::FixedWidth { element_size, .. } => Err(StorageError::InvalidRange(
                format!("element size {} does not match {}", element_size, T::SIZE),
            )),
            _ => Err(StorageError::InvalidRange(
                "range is not fixed-width".to_string(),
            )),
        }
    }

    pub fn empty(&self) -> bool {
        matches!(self.data, RangeData::Empty)
    }

    pub fn unary(&self) -> bool {
        !self.empty() && self.start() == self.end()
    }

    pub fn var_size(&self) -> bool {
        matches!(self.data, RangeData::Variable { .. })
    }

    /// Width of one bound, `None` for string or empty ranges.
    pub fn element_size(&self) -> Option<usize> {
        match &self.data {
            RangeData::FixedWidth { element_size, .. } => Some(*element_size),
            _ => None,
        }
    }

    /// Replace the end bound of a fixed-width range.
    pub fn set_end(&mut self, end: &[u8]) -> Result<()> {
        match &mut self.data {
            RangeData::FixedWidth {
                bytes,
                element_size,
            } if end.len() == *element_size => {
                let size = *element_size;
                bytes[size..].copy_from_slice(end);
                Ok(())
            }
            RangeData::Variable { end: e, .. } => {
                *e = end.to_vec();
                Ok(())
            }
            _ => Err(StorageError::InvalidRange(format!(
                "cannot set {}-byte end",
                end.len()
            ))),
        }
    }

    pub fn set_str_range(&mut self, start: impl AsRef<[u8]>, end: impl AsRef<[u8]>) {
        self.data = RangeData::Variable {
            start: start.as_ref().to_vec(),
            end: end.as_ref().to_vec(),
        };
    }

    /// Check that this range is shaped for `kind`: string kinds need a
    /// variable range, fixed kinds need a matching element width.
    pub fn check_kind(&self, kind: ElementKind) -> Result<()> {
        let ok = match (&self.data, kind.size()) {
            (RangeData::Variable { .. }, None) => true,
            (RangeData::FixedWidth { element_size, .. }, Some(size)) => *element_size == size,
            _ => false,
        };
        if ok {
            Ok(())
        } else {
            Err(StorageError::InvalidRange(format!(
                "range {:?} does not match element kind {:?}",
                self.data, kind
            )))
        }
    }

    /// Bounds are ordered (`start <= end`) under `kind`.
    pub(crate) fn is_ordered(&self, kind: ElementKind) -> bool {
        compare_values(kind, self.start(), self.end()) != Ordering::Greater
    }

    /// Closed-interval intersection test under `kind`.
    pub(crate) fn overlaps(&self, other: &Range, kind: ElementKind) -> bool {
        compare_values(kind, self.start(), other.end()) != Ordering::Greater
            && compare_values(kind, other.start(), self.end()) != Ordering::Greater
    }

    /// `self` lies fully inside `outer` under `kind`.
    pub(crate) fn within(&self, outer: &Range, kind: ElementKind) -> bool {
        compare_values(kind, outer.start(), self.start()) != Ordering::Greater
            && compare_values(kind, self.end(), outer.end()) != Ordering::Greater
    }
}
