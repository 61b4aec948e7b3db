//! Per-dimension range manager.

use rayon::ThreadPool;

use crate::datatype::Datatype;
use crate::error::Result;
use crate::range::strategy::{AddStrategy, SortStrategy};
use crate::range::value::Range;

/// Ordered ranges selected on one dimension.
///
/// A *default* subset holds exactly the full-domain range and stands for
/// "no explicit selection". The first explicit add discards it. An empty
/// subset (`num_ranges() == 0`) is a selection that matches nothing.
///
/// Strategies are fixed at construction; the subset is owned by a single
/// subarray and is not internally synchronized.
#[derive(Debug, Clone)]
pub struct RangeSubset {
    datatype: Datatype,
    bounds: Range,
    is_default: bool,
    allow_multiple_ranges: bool,
    ranges: Vec<Range>,
    add_strategy: AddStrategy,
    sort_strategy: SortStrategy,
}

impl RangeSubset {
    fn build(
        datatype: Datatype,
        bounds: Range,
        is_default: bool,
        allow_multiple_ranges: bool,
        coalesce_ranges: bool,
    ) -> Self {
        let ranges = if is_default {
            vec![bounds.clone()]
        } else {
            Vec::new()
        };
        Self {
            datatype,
            bounds,
            is_default,
            allow_multiple_ranges,
            ranges,
            add_strategy: AddStrategy::select(datatype.element_kind(), coalesce_ranges),
            sort_strategy: SortStrategy::select(datatype),
        }
    }

    /// Add a range without bounds or arity checks. The range must be shaped
    /// for this dimension's datatype.
    pub fn add_range_unsafe(&mut self, range: Range) -> Result<()> {
        range.check_kind(self.datatype.element_kind())?;
        if self.is_default {
            self.ranges.clear();
            self.is_default = false;
        }
        self.add_strategy.add_range(&mut self.ranges, range)
    }

    /// Panics if `range_index >= num_ranges()`.
    pub fn get_range(&self, range_index: usize) -> &Range {
        &self.ranges[range_index]
    }

    pub fn get_ranges(&self) -> &[Range] {
        &self.ranges
    }

    pub fn is_default(&self) -> bool {
        self.is_default
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Explicit, non-empty selection.
    pub fn is_set(&self) -> bool {
        !self.is_default && !self.ranges.is_empty()
    }

    pub fn is_unary(&self) -> bool {
        self.ranges.len() == 1 && self.ranges[0].unary()
    }

    pub fn num_ranges(&self) -> usize {
        self.ranges.len()
    }

    pub fn sort_ranges(&mut self, compute_tp: &ThreadPool) -> Result<()> {
        self.sort_strategy.sort(compute_tp, &mut self.ranges)
    }

    pub fn bounds(&self) -> &Range {
        &self.bounds
    }

    pub fn datatype(&self) -> Datatype {
        self.datatype
    }

    pub fn allow_multiple_ranges(&self) -> bool {
        self.allow_multiple_ranges
    }

    pub fn coalesces(&self) -> bool {
        matches!(self.add_strategy, AddStrategy::Coalesce(_))
    }
}

/// Subset over `full_range`; when `is_default` it starts as `[full_range]`.
/// Multiple ranges are always allowed.
pub fn create_range_subset(
    datatype: Datatype,
    full_range: Range,
    is_default: bool,
    coalesce_ranges: bool,
) -> RangeSubset {
    RangeSubset::build(datatype, full_range, is_default, true, coalesce_ranges)
}

/// Non-default manager with no ranges selected yet.
pub fn create_range_manager(
    datatype: Datatype,
    bounds: Range,
    allow_multiple_ranges: bool,
    coalesce_ranges: bool,
) -> RangeSubset {
    RangeSubset::build(datatype, bounds, false, allow_multiple_ranges, coalesce_ranges)
}

/// Default manager holding the single implicit full-domain range.
pub fn create_default_range_manager(datatype: Datatype, bounds: Range) -> RangeSubset {
    RangeSubset::build(datatype, bounds, true, false, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rayon::ThreadPoolBuilder;

    fn pool() -> ThreadPool {
        ThreadPoolBuilder::new().num_threads(2).build().unwrap()
    }

    #[test]
    fn test_default_manager_holds_bounds() {
        let bounds = Range::from_values(0u64, 10u64);
        let m = create_default_range_manager(Datatype::UInt64, bounds.clone());
        assert_eq!(m.num_ranges(), 1);
        assert!(m.is_default());
        assert!(!m.is_set());
        assert_eq!(m.get_range(0), &bounds);
        assert!(!m.allow_multiple_ranges());
    }

    #[test]
    fn test_non_default_manager_starts_empty() {
        let m = create_range_manager(Datatype::UInt64, Range::from_values(0u64, 10u64), true, true);
        assert_eq!(m.num_ranges(), 0);
        assert!(m.is_empty());
        assert!(!m.is_default());
        assert!(!m.is_set());
    }

    #[test]
    fn test_add_full_bounds_clears_default() {
        let bounds = Range::from_values(0u64, 10u64);
        let mut m = create_range_subset(Datatype::UInt64, bounds.clone(), true, false);
        m.add_range_unsafe(bounds.clone()).unwrap();
        assert!(!m.is_default());
        assert!(m.is_set());
        assert_eq!(m.get_ranges(), &[bounds]);
    }

    #[test]
    fn test_rejected_add_keeps_default() {
        let mut m = create_range_subset(Datatype::UInt64, Range::from_values(0u64, 10u64), true, true);
        assert!(m.add_range_unsafe(Range::from_values(1u8, 2u8)).is_err());
        assert!(m.is_default());
        assert_eq!(m.num_ranges(), 1);
    }

    #[test]
    fn test_coalesce_adjacent_and_gap() {
        let bounds = Range::from_values(0u64, 10u64);
        let mut m = create_range_subset(Datatype::UInt64, bounds.clone(), false, true);
        m.add_range_unsafe(Range::from_values(1u64, 3u64)).unwrap();
        m.add_range_unsafe(Range::from_values(4u64, 5u64)).unwrap();
        assert_eq!(m.get_ranges(), &[Range::from_values(1u64, 5u64)]);

        let mut m = create_range_subset(Datatype::UInt64, bounds, false, true);
        m.add_range_unsafe(Range::from_values(1u64, 3u64)).unwrap();
        m.add_range_unsafe(Range::from_values(5u64, 6u64)).unwrap();
        assert_eq!(m.num_ranges(), 2);
    }

    #[test]
    fn test_float_never_coalesces() {
        let bounds = Range::from_values(-1.0f32, 1.0f32);
        let mut m = create_range_subset(Datatype::Float32, bounds, false, true);
        assert!(!m.coalesces());
        m.add_range_unsafe(Range::from_values(-0.5f32, 0.5f32)).unwrap();
        m.add_range_unsafe(Range::from_values(0.5f32, 0.75f32)).unwrap();
        assert_eq!(m.num_ranges(), 2);
    }

    #[test]
    fn test_string_never_coalesces() {
        let mut m = create_range_subset(Datatype::StringAscii, Range::default(), false, true);
        m.add_range_unsafe(Range::from_str_range("a", "b")).unwrap();
        m.add_range_unsafe(Range::from_str_range("c", "d")).unwrap();
        assert_eq!(m.num_ranges(), 2);
    }

    #[test]
    fn test_sort_char_fails_unmodified() {
        let bounds = Range::from_values(b'a' as i8, b'c' as i8);
        let mut m = create_range_subset(Datatype::Char, bounds, false, false);
        m.add_range_unsafe(Range::from_values(b'c' as i8, b'c' as i8)).unwrap();
        m.add_range_unsafe(Range::from_values(b'a' as i8, b'b' as i8)).unwrap();
        let before = m.get_ranges().to_vec();
        let err = m.sort_ranges(&pool()).unwrap_err();
        assert_eq!(err.to_string(), "Invalid datatype CHAR for sorting.");
        assert_eq!(m.get_ranges(), before.as_slice());
    }

    #[test]
    fn test_sort_numeric() {
        let mut m = create_range_subset(Datatype::UInt64, Range::from_values(0u64, 10u64), false, false);
        m.add_range_unsafe(Range::from_values(4u64, 5u64)).unwrap();
        m.add_range_unsafe(Range::from_values(1u64, 2u64)).unwrap();
        m.sort_ranges(&pool()).unwrap();
        assert_eq!(
            m.get_ranges(),
            &[Range::from_values(1u64, 2u64), Range::from_values(4u64, 5u64)]
        );
    }

    #[test]
    fn test_sort_ascii_strings() {
        let mut m = create_range_subset(Datatype::StringAscii, Range::default(), false, false);
        m.add_range_unsafe(Range::from_str_range("cat", "dog")).unwrap();
        m.add_range_unsafe(Range::from_str_range("ax", "bird")).unwrap();
        m.sort_ranges(&pool()).unwrap();
        assert_eq!(m.get_range(0).start_str(), b"ax");
        assert_eq!(m.get_range(0).end_str(), b"bird");
        assert_eq!(m.get_range(1).start_str(), b"cat");
        assert_eq!(m.get_range(1).end_str(), b"dog");
    }

    #[test]
    fn test_sort_utf16_fails() {
        let mut m = create_range_subset(Datatype::StringUtf16, Range::default(), false, false);
        m.add_range_unsafe(Range::from_str_range("b", "c")).unwrap();
        assert!(m.sort_ranges(&pool()).is_err());
    }

    #[test]
    fn test_is_unary() {
        let mut m = create_range_subset(Datatype::Int32, Range::from_values(0i32, 9i32), false, false);
        m.add_range_unsafe(Range::from_values(3i32, 3i32)).unwrap();
        assert!(m.is_unary());
        m.add_range_unsafe(Range::from_values(5i32, 5i32)).unwrap();
        assert!(!m.is_unary());
    }

    #[test]
    #[should_panic]
    fn test_get_range_out_of_bounds_panics() {
        let m = create_range_manager(Datatype::UInt64, Range::from_values(0u64, 10u64), true, false);
        let _ = m.get_range(0);
    }

    proptest! {
        #[test]
        fn prop_coalesced_sorted_runs_are_gapped(starts in proptest::collection::vec((0u32..1000, 0u32..5), 1..40)) {
            let mut m = create_range_subset(Datatype::UInt32, Range::from_values(0u32, u32::MAX), false, true);
            let mut starts = starts;
            starts.sort();
            let mut cursor = 0u32;
            for (gap, len) in starts {
                let s = cursor + gap % 3;
                let e = s + len;
                m.add_range_unsafe(Range::from_values(s, e)).unwrap();
                cursor = e + 1;
            }
            let ranges = m.get_ranges();
            for w in ranges.windows(2) {
                let prev_end = w[0].end_as::<u32>().unwrap();
                let next_start = w[1].start_as::<u32>().unwrap();
                prop_assert!(prev_end + 1 < next_start);
            }
        }

        #[test]
        fn prop_sort_yields_nondecreasing_starts(values in proptest::collection::vec((-500i64..500, 0i64..50), 0..64)) {
            let mut m = create_range_subset(Datatype::Int64, Range::from_values(i64::MIN, i64::MAX), false, false);
            for (s, len) in &values {
                m.add_range_unsafe(Range::from_values(*s, s + len)).unwrap();
            }
            m.sort_ranges(&pool()).unwrap();
            prop_assert_eq!(m.num_ranges(), values.len());
            for w in m.get_ranges().windows(2) {
                let a = (w[0].start_as::<i64>().unwrap(), w[0].end_as::<i64>().unwrap());
                let b = (w[1].start_as::<i64>().unwrap(), w[1].end_as::<i64>().unwrap());
                prop_assert!(a <= b);
            }
        }
    }
}
