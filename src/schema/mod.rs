//! Array schemas and schema evolution.

mod array_schema;
mod evolution;

pub use array_schema::{ArraySchema, ArrayType, Attribute, Dimension, SCHEMA_FORMAT_VERSION};
pub use evolution::ArraySchemaEvolution;
