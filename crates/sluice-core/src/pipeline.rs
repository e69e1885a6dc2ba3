//! Ordered stages plus the rules for driving records through them.
//!
//! # Traversal
//!
//! Each record visits the stages in order. When stage *i* returns fan-out
//! records, every one of them (and its own fan-out, recursively) runs
//! through stages *i+1..n* before the original record moves on to *i+1*.
//! Output therefore lists descendants ahead of the record that produced
//! them:
//!
//! ```text
//! stage 1 ─▶ stage 2 ──────────────▶ stage 3 ─▶ stage 4 ─▶ out: [F1, F2, R]
//!              │ returns F1, F2        ▲
//!              └─▶ F1: stage 3 ─▶ 4 ───┤
//!              └─▶ F2: stage 3 ─▶ 4 ───┘
//! ```
//!
//! Fan-out records join the run of the record that produced them.
//!
//! A record marked dropped stops where it is. Its children are detached and
//! emitted individually, each keeping its own subtree.
//!
//! A stage error abandons only the record being processed; it is logged and
//! reported in [`PipelineOutput::failures`]. Everything else continues.

use serde::Deserialize;
use tracing::{debug, error, info};

use crate::error::StageError;
use crate::record::Record;
use crate::registry::StageRegistry;
use crate::stage::{Stage, StageConfig};

/// The `[pipeline]` configuration table.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_pipeline_name")]
    pub name: String,
    #[serde(default)]
    pub stages: Vec<StageConfig>,
}

fn default_pipeline_name() -> String {
    "default".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Created,
    Started,
    Stopped,
}

/// A record whose traversal was abandoned by a stage error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFailure {
    pub record_id: String,
    pub run_id: Option<String>,
    pub stage: String,
    pub reason: String,
}

/// Everything one input record turned into.
#[derive(Debug, Default)]
pub struct PipelineOutput {
    /// Surviving records, in delivery order.
    pub records: Vec<Record>,
    pub failures: Vec<RecordFailure>,
}

pub struct Pipeline {
    name: String,
    stages: Vec<Box<dyn Stage>>,
    state: Lifecycle,
}

impl Pipeline {
    pub fn new(name: impl Into<String>, stages: Vec<Box<dyn Stage>>) -> Self {
        Self {
            name: name.into(),
            stages,
            state: Lifecycle::Created,
        }
    }

    /// Construct every configured stage. Any bad option fails here.
    pub fn from_config(config: &PipelineConfig, registry: &StageRegistry) -> Result<Self, StageError> {
        let stages = config
            .stages
            .iter()
            .map(|stage| registry.build(stage))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(config.name.clone(), stages))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn is_started(&self) -> bool {
        self.state == Lifecycle::Started
    }

    /// Start every stage in order. The first failure aborts.
    pub fn start(&mut self) -> Result<(), StageError> {
        if self.state != Lifecycle::Created {
            return Err(StageError::lifecycle(&self.name, "pipeline already started"));
        }
        for stage in self.stages.iter_mut() {
            debug!(pipeline = %self.name, stage = stage.name(), "starting stage");
            stage.start()?;
        }
        self.state = Lifecycle::Started;
        info!(pipeline = %self.name, stages = self.stages.len(), "pipeline started");
        Ok(())
    }

    /// Stop every stage, continuing past failures. Returns the first one.
    pub fn stop(&mut self) -> Result<(), StageError> {
        if self.state != Lifecycle::Started {
            return Err(StageError::lifecycle(&self.name, "pipeline is not running"));
        }
        let mut first_error = None;
        for stage in self.stages.iter_mut() {
            if let Err(e) = stage.stop() {
                error!(pipeline = %self.name, stage = stage.name(), error = %e, "stage failed to stop");
                first_error.get_or_insert(e);
            }
        }
        self.state = Lifecycle::Stopped;
        first_error.map_or(Ok(()), Err)
    }

    /// Drive one record through every stage.
    pub fn process(&self, record: Record) -> Result<PipelineOutput, StageError> {
        if self.state != Lifecycle::Started {
            return Err(StageError::lifecycle(
                &self.name,
                "records can only be processed after start()",
            ));
        }
        let mut out = PipelineOutput::default();
        self.run_from(record, 0, &mut out);
        Ok(out)
    }

    fn run_from(&self, mut record: Record, first_stage: usize, out: &mut PipelineOutput) {
        if record.is_dropped() {
            debug!(record = record.id(), "record arrived dropped");
            surface_children(&mut record, out);
            return;
        }
        for (index, stage) in self.stages.iter().enumerate().skip(first_stage) {
            match stage.process_record(&mut record) {
                Ok(fan_out) => {
                    for mut produced in fan_out.into_iter().flatten() {
                        if let Some(run_id) = record.run_id() {
                            produced.inherit_run_id(run_id);
                        }
                        self.run_from(produced, index + 1, out);
                    }
                    if record.is_dropped() {
                        debug!(record = record.id(), stage = stage.name(), "record dropped");
                        surface_children(&mut record, out);
                        return;
                    }
                }
                Err(e) => {
                    error!(
                        record = record.id(),
                        stage = stage.name(),
                        error = %e,
                        "stage failed; abandoning record"
                    );
                    out.failures.push(RecordFailure {
                        record_id: record.id().to_string(),
                        run_id: record.run_id().map(str::to_string),
                        stage: stage.name().to_string(),
                        reason: e.to_string(),
                    });
                    return;
                }
            }
        }
        out.records.push(record);
    }
}

/// Detach a dropped record's children and emit them as records in their own
/// right, stamped with the parent's run id when they have none. A child that
/// is itself dropped is never emitted; its own children surface instead.
fn surface_children(record: &mut Record, out: &mut PipelineOutput) {
    let run_id = record.run_id().map(str::to_string);
    for mut child in record.take_children() {
        if let Some(run_id) = &run_id {
            child.inherit_run_id(run_id);
        }
        if child.is_dropped() {
            surface_children(&mut child, out);
        } else {
            out.records.push(child);
        }
    }
}
