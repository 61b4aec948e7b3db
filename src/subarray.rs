//! Multi-dimensional selection: one [`RangeSubset`] per dimension.

use std::sync::Arc;

use rayon::ThreadPool;

use crate::error::{Result, StorageError};
use crate::fragment::FragmentMetadata;
use crate::range::{create_default_range_manager, create_range_subset, FixedElement, Range, RangeSubset};
use crate::schema::ArraySchema;

#[derive(Debug, Clone)]
pub struct Subarray {
    array_schema: Arc<ArraySchema>,
    ranges: Vec<RangeSubset>,
}

impl Subarray {
    /// Every dimension starts at its full domain and accepts any number of
    /// ranges.
    pub fn new(array_schema: Arc<ArraySchema>, coalesce_ranges: bool) -> Self {
        let ranges = array_schema
            .dimensions()
            .iter()
            .map(|d| create_range_subset(d.datatype, d.domain.clone(), true, coalesce_ranges))
            .collect();
        Self {
            array_schema,
            ranges,
        }
    }

    /// Every dimension accepts a single explicit range.
    pub fn single_range(array_schema: Arc<ArraySchema>) -> Self {
        let ranges = array_schema
            .dimensions()
            .iter()
            .map(|d| create_default_range_manager(d.datatype, d.domain.clone()))
            .collect();
        Self {
            array_schema,
            ranges,
        }
    }

    pub fn array_schema(&self) -> &Arc<ArraySchema> {
        &self.array_schema
    }

    pub fn dim_num(&self) -> usize {
        self.ranges.len()
    }

    /// Validated add: shape, order and, for fixed-size dimensions, domain
    /// bounds are checked before the range reaches the subset.
    pub fn add_range(&mut self, dim_idx: usize, range: Range) -> Result<()> {
        let dim = self.array_schema.dimension(dim_idx).ok_or_else(|| {
            StorageError::InvalidRange(format!(
                "dimension index {} out of {}",
                dim_idx,
                self.ranges.len()
            ))
        })?;
        let kind = dim.datatype.element_kind();
        range.check_kind(kind)?;
        if range.empty() || !range.is_ordered(kind) {
            return Err(StorageError::InvalidRange(format!(
                "range on '{}' is empty or has start after end",
                dim.name
            )));
        }
        if !dim.var_size() && !range.within(&dim.domain, kind) {
            return Err(StorageError::RangeOutOfBounds(format!(
                "range exceeds the domain of '{}'",
                dim.name
            )));
        }
        let subset = &mut self.ranges[dim_idx];
        if !subset.allow_multiple_ranges() && subset.is_set() {
            return Err(StorageError::MultipleRangesNotAllowed(dim.name.clone()));
        }
        subset.add_range_unsafe(range)
    }

    pub fn add_point<T: FixedElement>(&mut self, dim_idx: usize, value: T) -> Result<()> {
        self.add_range(dim_idx, Range::from_values(value, value))
    }

    pub fn add_str_range(&mut self, dim_idx: usize, start: &str, end: &str) -> Result<()> {
        self.add_range(dim_idx, Range::from_str_range(start, end))
    }

    pub fn ranges_for_dim(&self, dim_idx: usize) -> Option<&RangeSubset> {
        self.ranges.get(dim_idx)
    }

    /// Number of ranges in the cross product of all dimensions.
    pub fn range_num(&self) -> u64 {
        self.ranges.iter().map(|r| r.num_ranges() as u64).product()
    }

    /// Some dimension carries an explicit selection.
    pub fn is_set(&self) -> bool {
        self.ranges.iter().any(RangeSubset::is_set)
    }

    pub fn is_unary(&self) -> bool {
        self.ranges.iter().all(RangeSubset::is_unary)
    }

    pub fn sort_ranges(&mut self, compute_tp: &ThreadPool) -> Result<()> {
        for subset in &mut self.ranges {
            subset.sort_ranges(compute_tp)?;
        }
        Ok(())
    }

    /// Indices of `fragments` whose non-empty domain meets the selection on
    /// every dimension.
    pub fn relevant_fragments(&self, fragments: &[Arc<FragmentMetadata>]) -> Vec<usize> {
        fragments
            .iter()
            .enumerate()
            .filter(|(_, f)| self.overlaps_domain(f.non_empty_domain()))
            .map(|(i, _)| i)
            .collect()
    }

    fn overlaps_domain(&self, non_empty_domain: &[Range]) -> bool {
        self.ranges
            .iter()
            .zip(non_empty_domain)
            .zip(self.array_schema.dimensions())
            .all(|((subset, ned), dim)| {
                subset.is_default()
                    || subset
                        .get_ranges()
                        .iter()
                        .any(|r| r.overlaps(ned, dim.datatype.element_kind()))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatype::Datatype;
    use crate::names::{fragment_name, generate_uuid, TimestampedUri};
    use crate::schema::{ArrayType, Attribute, Dimension};
    use crate::uri::Uri;
    use rayon::ThreadPoolBuilder;

    fn schema() -> Arc<ArraySchema> {
        let mut s = ArraySchema::new(
            ArrayType::Sparse,
            vec![
                Dimension::new("row", Datatype::UInt32, Range::from_values(0u32, 99u32)).unwrap(),
                Dimension::string("key"),
            ],
            vec![Attribute::new("v", Datatype::Float64)],
        )
        .unwrap();
        s.generate_name(1);
        Arc::new(s)
    }

    fn fragment(schema: &Arc<ArraySchema>, rows: (u32, u32), keys: (&str, &str)) -> Arc<FragmentMetadata> {
        let uri = Uri::new(format!("mem://a/__fragments/{}", fragment_name(1, 1, &generate_uuid())));
        Arc::new(
            FragmentMetadata::new(
                &TimestampedUri::parse(uri).unwrap(),
                schema.clone(),
                vec![Range::from_values(rows.0, rows.1), Range::from_str_range(keys.0, keys.1)],
                1,
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_add_range_validation() {
        let mut sub = Subarray::new(schema(), true);
        assert!(!sub.is_set());
        assert!(matches!(
            sub.add_range(0, Range::from_values(50u32, 100u32)),
            Err(StorageError::RangeOutOfBounds(_))
        ));
        assert!(matches!(
            sub.add_range(0, Range::from_values(9u32, 3u32)),
            Err(StorageError::InvalidRange(_))
        ));
        assert!(sub.add_range(0, Range::from_values(1i64, 2i64)).is_err());
        assert!(sub.add_range(5, Range::from_values(1u32, 2u32)).is_err());
        // Failed adds leave the default in place.
        assert!(sub.ranges_for_dim(0).unwrap().is_default());

        sub.add_range(0, Range::from_values(1u32, 4u32)).unwrap();
        sub.add_point(0, 5u32).unwrap();
        assert_eq!(sub.ranges_for_dim(0).unwrap().get_ranges(), &[Range::from_values(1u32, 5u32)]);
        sub.add_str_range(1, "zz", "zzz").unwrap();
        assert_eq!(sub.range_num(), 1);
        assert!(sub.is_set());
    }

    #[test]
    fn test_single_range_dimension() {
        let mut sub = Subarray::single_range(schema());
        sub.add_point(0, 7u32).unwrap();
        assert!(sub.ranges_for_dim(0).unwrap().is_unary());
        assert!(matches!(
            sub.add_point(0, 8u32),
            Err(StorageError::MultipleRangesNotAllowed(name)) if name == "row"
        ));
    }

    #[test]
    fn test_sort_then_relevant_fragments() {
        let s = schema();
        let frags = vec![
            fragment(&s, (0, 9), ("a", "c")),
            fragment(&s, (20, 29), ("d", "f")),
            fragment(&s, (40, 49), ("a", "z")),
        ];
        let mut sub = Subarray::new(s, false);
        sub.add_range(0, Range::from_values(45u32, 60u32)).unwrap();
        sub.add_range(0, Range::from_values(5u32, 6u32)).unwrap();
        sub.sort_ranges(&ThreadPoolBuilder::new().num_threads(2).build().unwrap())
            .unwrap();
        assert_eq!(sub.ranges_for_dim(0).unwrap().get_range(0), &Range::from_values(5u32, 6u32));
        assert_eq!(sub.relevant_fragments(&frags), vec![0, 2]);

        sub.add_str_range(1, "x", "y").unwrap();
        assert_eq!(sub.relevant_fragments(&frags), vec![2]);
        assert_eq!(sub.range_num(), 2);
    }
}
