//! Typed range algebra: the `Range` value type and the per-dimension
//! `RangeSubset` manager with its add/sort strategies.

pub mod strategy;
pub mod subset;
pub mod value;

pub use strategy::{AddStrategy, SortStrategy};
pub use subset::{
    create_default_range_manager, create_range_manager, create_range_subset, RangeSubset,
};
pub use value::{FixedElement, IntegralElement, Range, RangeData};
