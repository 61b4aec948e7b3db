//! Add and sort strategies for a dimension's range sequence.
//!
//! Both are picked once, when the owning [`RangeSubset`](super::RangeSubset)
//! is built, from the dimension datatype and the coalesce flag.

use std::cmp::Ordering;

use rayon::prelude::*;
use rayon::ThreadPool;

use crate::datatype::{Datatype, ElementKind};
use crate::error::{Result, StorageError};
use crate::range::value::{compare_values, IntegralElement, Range};

// ── Add ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddStrategy {
    /// Append unconditionally.
    Basic,
    /// Merge into the last range when adjacent (integral kinds only).
    Coalesce(ElementKind),
}

impl AddStrategy {
    pub fn select(kind: ElementKind, coalesce_ranges: bool) -> Self {
        if coalesce_ranges && kind.is_integral() {
            AddStrategy::Coalesce(kind)
        } else {
            AddStrategy::Basic
        }
    }

    pub fn add_range(self, ranges: &mut Vec<Range>, new_range: Range) -> Result<()> {
        match self {
            AddStrategy::Basic => {
                ranges.push(new_range);
                Ok(())
            }
            AddStrategy::Coalesce(kind) => match kind {
                ElementKind::Int8 | ElementKind::Char => coalesce::<i8>(ranges, new_range),
                ElementKind::UInt8 => coalesce::<u8>(ranges, new_range),
                ElementKind::Int16 => coalesce::<i16>(ranges, new_range),
                ElementKind::UInt16 => coalesce::<u16>(ranges, new_range),
                ElementKind::Int32 => coalesce::<i32>(ranges, new_range),
                ElementKind::UInt32 => coalesce::<u32>(ranges, new_range),
                ElementKind::Int64 => coalesce::<i64>(ranges, new_range),
                ElementKind::UInt64 => coalesce::<u64>(ranges, new_range),
                ElementKind::Float32 | ElementKind::Float64 | ElementKind::Str => {
                    ranges.push(new_range);
                    Ok(())
                }
            },
        }
    }
}

/// Extend the last range when `last.end + 1 == new.start`. Only the tail is
/// inspected, so out-of-order inserts stay separate until sorted.
fn coalesce<T: IntegralElement>(ranges: &mut Vec<Range>, new_range: Range) -> Result<()> {
    let new_start = new_range.start_as::<T>()?;
    if let Some(last) = ranges.last_mut() {
        let last_end = last.end_as::<T>()?;
        if last_end.successor() == Some(new_start) {
            last.set_end(new_range.end())?;
            return Ok(());
        }
    }
    ranges.push(new_range);
    Ok(())
}

// ── Sort ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortStrategy {
    /// Decode and compare `(start, end)` as scalars.
    Fixed(ElementKind),
    /// Compare `(start, end)` bytewise.
    Lexicographic,
    /// Sorting fails for this datatype.
    Unsupported(Datatype),
}

impl SortStrategy {
    pub fn select(datatype: Datatype) -> Self {
        match datatype {
            Datatype::Char => SortStrategy::Unsupported(datatype),
            Datatype::StringAscii | Datatype::StringUtf8 => SortStrategy::Lexicographic,
            dt if dt.is_string() => SortStrategy::Unsupported(dt),
            dt => SortStrategy::Fixed(dt.element_kind()),
        }
    }

    /// Sort in place on `pool`. On error the sequence is left untouched.
    pub fn sort(self, pool: &ThreadPool, ranges: &mut [Range]) -> Result<()> {
        match self {
            SortStrategy::Unsupported(dt) => Err(StorageError::NotSortable(dt.name().to_string())),
            SortStrategy::Fixed(kind) => {
                for r in ranges.iter() {
                    r.check_kind(kind)?;
                }
                pool.install(|| ranges.par_sort_by(|a, b| compare_fixed(kind, a, b)));
                Ok(())
            }
            SortStrategy::Lexicographic => {
                for r in ranges.iter() {
                    r.check_kind(ElementKind::Str)?;
                }
                pool.install(|| {
                    ranges.par_sort_by(|a, b| (a.start(), a.end()).cmp(&(b.start(), b.end())))
                });
                Ok(())
            }
        }
    }
}

fn compare_fixed(kind: ElementKind, a: &Range, b: &Range) -> Ordering {
    compare_values(kind, a.start(), b.start())
        .then_with(|| compare_values(kind, a.end(), b.end()))
}
