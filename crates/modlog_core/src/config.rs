//! Core configuration.

use crate::schema::OmitFields;
use crate::types::InstanceId;

/// Configuration for the write path and the modification log.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Id of this instance, stamped on entries of replicable models.
    pub instance_id: InstanceId,

    /// Fields never logged, whatever the model.
    pub omit_fields: OmitFields,

    /// Whether entities are validated against their schema before persisting.
    pub validate: bool,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            instance_id: InstanceId::generate(),
            omit_fields: OmitFields::new(),
            validate: true,
        }
    }
}

impl CoreConfig {
    /// Creates a configuration with a fresh instance id.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the instance id.
    #[must_use]
    pub fn instance_id(mut self, id: InstanceId) -> Self {
        self.instance_id = id;
        self
    }

    /// Sets the globally omitted fields.
    #[must_use]
    pub fn omit_fields(mut self, omit: OmitFields) -> Self {
        self.omit_fields = omit;
        self
    }

    /// Sets whether entities are validated.
    #[must_use]
    pub fn validate(mut self, value: bool) -> Self {
        self.validate = value;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides_defaults() {
        let id = InstanceId::generate();
        let config = CoreConfig::new()
            .instance_id(id)
            .omit_fields(OmitFields::new().with("etag"))
            .validate(false);
        assert_eq!(config.instance_id, id);
        assert!(config.omit_fields.contains("etag"));
        assert!(!config.validate);
    }
}
