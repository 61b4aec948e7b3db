//! Fragment metadata, individually stored and consolidated.

pub mod consolidated;
pub mod metadata;

pub use consolidated::ConsolidatedFragmentMetadata;
pub use metadata::{FragmentMetadata, FRAGMENT_METADATA_FILENAME};
