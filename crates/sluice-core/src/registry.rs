//! Explicit map from stage type identifier to constructor.
//!
//! Stage types are resolved once, at pipeline assembly. An unknown type is a
//! configuration error like any other bad option.
//!
//! ```rust
//! use sluice_core::registry::StageRegistry;
//! use sluice_core::stage::StageConfig;
//!
//! let registry = StageRegistry::with_builtins();
//! let config = StageConfig::new().with("type", "timestamp").with("dest_field", "seen_at");
//! let stage = registry.build(&config).unwrap();
//! assert_eq!(stage.name(), "timestamp");
//! ```

use crate::error::StageError;
use crate::stage::{Stage, StageConfig};
use crate::stages;

/// Builds a stage from its validated options.
pub type StageConstructor = fn(&StageConfig) -> Result<Box<dyn Stage>, StageError>;

/// One registered stage type.
#[derive(Clone)]
pub struct StageType {
    pub name: String,
    pub description: String,
    pub constructor: StageConstructor,
}

/// Registry of stage types (built-in and application-provided).
pub struct StageRegistry {
    types: Vec<StageType>,
}

impl StageRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self { types: Vec::new() }
    }

    /// Create a registry pre-loaded with the built-in stages.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(
            "chunk_text",
            "Split a text field into chunk child records",
            |c| Ok(Box::new(stages::ChunkText::new(c)?)),
        );
        registry.register(
            "rename_fields",
            "Rename fields according to a mapping",
            |c| Ok(Box::new(stages::RenameFields::new(c)?)),
        );
        registry.register(
            "copy_fields",
            "Copy field values according to a mapping",
            |c| Ok(Box::new(stages::CopyFields::new(c)?)),
        );
        registry.register(
            "contains",
            "Tag records whose fields contain any of a set of words",
            |c| Ok(Box::new(stages::Contains::new(c)?)),
        );
        registry.register(
            "timestamp",
            "Write the current UTC time into a field",
            |c| Ok(Box::new(stages::Timestamp::new(c)?)),
        );
        registry.register(
            "drop_record",
            "Drop records, optionally only those matching a field value",
            |c| Ok(Box::new(stages::DropRecord::new(c)?)),
        );
        registry.register(
            "emit_nested_children",
            "Emit attached children as independent records",
            |c| Ok(Box::new(stages::EmitNestedChildren::new(c)?)),
        );
        registry
    }

    /// Register a stage type, replacing any previous registration of the same name.
    pub fn register(&mut self, name: &str, description: &str, constructor: StageConstructor) {
        self.types.retain(|t| t.name != name);
        self.types.push(StageType {
            name: name.to_string(),
            description: description.to_string(),
            constructor,
        });
    }

    /// Find a stage type by name.
    pub fn find(&self, name: &str) -> Option<&StageType> {
        self.types.iter().find(|t| t.name == name)
    }

    /// All registered stage types, in registration order.
    pub fn types(&self) -> &[StageType] {
        &self.types
    }

    /// Construct the stage named by the config's `type` option.
    pub fn build(&self, config: &StageConfig) -> Result<Box<dyn Stage>, StageError> {
        let stage_type = config
            .stage_type()
            .ok_or_else(|| StageError::config(config.label("stage"), "missing option: type"))?;
        let entry = self.find(stage_type).ok_or_else(|| {
            StageError::config(
                config.label("stage"),
                format!("unknown stage type '{}'", stage_type),
            )
        })?;
        (entry.constructor)(config)
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Return the count of registered stage types.
    pub fn len(&self) -> usize {
        self.types.len()
    }
}

impl Default for StageRegistry {
    fn default() -> Self {
        Self::new()
    }
}
