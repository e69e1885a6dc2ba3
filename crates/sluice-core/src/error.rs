//! Error types shared by the field store, records, and stages.

use thiserror::Error;

use crate::value::ValueType;

/// Errors raised by [`FieldStore`](crate::fields::FieldStore) and
/// [`Record`](crate::record::Record) mutations.
///
/// These indicate a programming error inside a stage and are propagated,
/// never swallowed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldError {
    #[error("field `{0}` does not exist")]
    NotFound(String),
    #[error("field `{field}`: {found:?} is not allowed here (declared {declared:?})")]
    InvalidType {
        field: String,
        found: ValueType,
        declared: Option<ValueType>,
    },
    #[error("field `{0}` already exists")]
    Conflict(String),
    #[error("field `{0}` is not multi-valued")]
    NotMultiValued(String),
    #[error("field `{field}`: index {index} out of bounds (length {len})")]
    IndexOutOfBounds {
        field: String,
        index: usize,
        len: usize,
    },
    #[error("`{0}` is a reserved field name")]
    ReservedField(String),
    #[error("record `{0}` already has a run id")]
    RunIdAlreadySet(String),
    #[error("invalid record: {0}")]
    InvalidRecord(String),
}

/// Errors raised while assembling or running stages.
#[derive(Debug, Error)]
pub enum StageError {
    /// Bad or missing options. Always detected at pipeline assembly.
    #[error("stage `{stage}` configuration: {message}")]
    Config { stage: String, message: String },
    #[error("stage `{stage}`: {message}")]
    Lifecycle { stage: String, message: String },
    #[error("stage `{stage}` failed to start: {message}")]
    Start { stage: String, message: String },
    #[error(transparent)]
    Field(#[from] FieldError),
    #[error("stage `{stage}` failed on record `{record_id}`: {message}")]
    Processing {
        stage: String,
        record_id: String,
        message: String,
    },
}

impl StageError {
    pub fn config(stage: impl Into<String>, message: impl Into<String>) -> Self {
        StageError::Config {
            stage: stage.into(),
            message: message.into(),
        }
    }

    pub fn start(stage: impl Into<String>, message: impl Into<String>) -> Self {
        StageError::Start {
            stage: stage.into(),
            message: message.into(),
        }
    }

    pub fn lifecycle(stage: impl Into<String>, message: impl Into<String>) -> Self {
        StageError::Lifecycle {
            stage: stage.into(),
            message: message.into(),
        }
    }

    pub fn processing(
        stage: impl Into<String>,
        record_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        StageError::Processing {
            stage: stage.into(),
            record_id: record_id.into(),
            message: message.into(),
        }
    }

    /// True for errors that must stop pipeline assembly.
    pub fn is_config(&self) -> bool {
        matches!(self, StageError::Config { .. })
    }
}
