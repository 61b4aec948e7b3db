use crate::error::{Result, StorageError};
use crate::schema::array_schema::{ArraySchema, Attribute};

/// Changes producing the next schema version of an array.
#[derive(Debug, Clone, Default)]
pub struct ArraySchemaEvolution {
    attributes_to_add: Vec<Attribute>,
    attributes_to_drop: Vec<String>,
    timestamp: Option<u64>,
}

impl ArraySchemaEvolution {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_attribute(&mut self, attr: Attribute) -> Result<()> {
        if self.attributes_to_add.iter().any(|a| a.name == attr.name) {
            return Err(StorageError::SchemaEvolution(format!(
                "attribute '{}' is already being added",
                attr.name
            )));
        }
        self.attributes_to_add.push(attr);
        Ok(())
    }

    pub fn drop_attribute(&mut self, name: impl Into<String>) {
        let name = name.into();
        self.attributes_to_add.retain(|a| a.name != name);
        if !self.attributes_to_drop.contains(&name) {
            self.attributes_to_drop.push(name);
        }
    }

    /// Timestamp of the new version; defaults to the time of evolution.
    pub fn set_timestamp(&mut self, timestamp: u64) {
        self.timestamp = Some(timestamp);
    }

    pub fn timestamp(&self) -> Option<u64> {
        self.timestamp
    }

    pub fn is_empty(&self) -> bool {
        self.attributes_to_add.is_empty() && self.attributes_to_drop.is_empty()
    }

    /// Apply to `orig`, returning the unnamed new version.
    pub fn evolve_schema(&self, orig: &ArraySchema) -> Result<ArraySchema> {
        if self.is_empty() {
            return Err(StorageError::SchemaEvolution(
                "evolution has no changes".to_string(),
            ));
        }
        let mut schema = orig.clone();
        for name in &self.attributes_to_drop {
            if schema.attribute(name).is_none() {
                return Err(StorageError::SchemaEvolution(format!(
                    "cannot drop unknown attribute '{}'",
                    name
                )));
            }
            schema.attributes_mut().retain(|a| &a.name != name);
        }
        for attr in &self.attributes_to_add {
            if schema.attribute(&attr.name).is_some()
                || schema.dimensions().iter().any(|d| d.name == attr.name)
            {
                return Err(StorageError::SchemaEvolution(format!(
                    "attribute '{}' already exists",
                    attr.name
                )));
            }
            schema.attributes_mut().push(attr.clone());
        }
        schema
            .check()
            .map_err(|e| StorageError::SchemaEvolution(e.to_string()))?;
        Ok(schema)
    }
}
