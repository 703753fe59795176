use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CheckpointError;
use crate::state::io::tmp_sibling;

/// Newest `.states` schema version this crate reads and the one it writes.
pub const STATES_VERSION: u32 = 1;

fn current_version() -> u32 {
    STATES_VERSION
}

/// Training progress written to `<prefix>.states`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingStates {
    #[serde(default = "current_version")]
    pub version: u32,
    /// Best-metric bookkeeping, e.g. `{"hmean": 0.81, "best_epoch": 12}`.
    #[serde(default)]
    pub best_model_dict: Map<String, Value>,
    /// Last completed epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epoch: Option<u64>,
    /// Any further metrics the trainer wants persisted (`global_step`, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for TrainingStates {
    fn default() -> Self {
        TrainingStates {
            version: STATES_VERSION,
            best_model_dict: Map::new(),
            epoch: None,
            extra: Map::new(),
        }
    }
}

impl TrainingStates {
    pub fn new(epoch: u64) -> Self {
        TrainingStates {
            epoch: Some(epoch),
            ..Default::default()
        }
    }

    pub fn with_best_model_dict(mut self, best: Map<String, Value>) -> Self {
        self.best_model_dict = best;
        self
    }

    /// Attach an extra metric.
    pub fn with_metric(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(name.into(), value.into());
        self
    }

    /// Read a `.states` file.
    pub fn load(path: &Path) -> Result<Self, CheckpointError> {
        let json = fs::read_to_string(path).map_err(|e| CheckpointError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        let states: TrainingStates =
            serde_json::from_str(&json).map_err(|e| CheckpointError::StatesParse {
                path: path.to_path_buf(),
                source: e,
            })?;
        if states.version > STATES_VERSION {
            return Err(CheckpointError::UnsupportedVersion {
                path: path.to_path_buf(),
                found: states.version,
                supported: STATES_VERSION,
            });
        }
        Ok(states)
    }

    /// Write a `.states` file, replacing any previous one.
    pub fn save(&self, path: &Path) -> Result<(), CheckpointError> {
        let json = serde_json::to_string_pretty(self)?;
        let tmp_path = tmp_sibling(path);
        fs::write(&tmp_path, json).map_err(|e| CheckpointError::Write {
            path: tmp_path.clone(),
            source: e,
        })?;
        fs::rename(&tmp_path, path).map_err(|e| CheckpointError::Write {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(())
    }

    /// Progress record to hand back to the trainer on resume.
    pub fn into_resume_state(self) -> ResumeState {
        ResumeState {
            best_model_dict: self.best_model_dict,
            start_epoch: self.epoch.map(|e| e.saturating_add(1)),
            is_float16: None,
        }
    }
}

/// What a load operation hands back to the training loop.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResumeState {
    pub best_model_dict: Map<String, Value>,
    /// Epoch to continue from, one past the saved epoch.
    pub start_epoch: Option<u64>,
    /// Whether any loaded parameter was stored in half precision. Only
    /// reported by `load_model` for non-KIE models.
    pub is_float16: Option<bool>,
}

impl ResumeState {
    pub fn is_empty(&self) -> bool {
        self.best_model_dict.is_empty() && self.start_epoch.is_none() && self.is_float16.is_none()
    }

    /// Flatten into a single record: the best-model bookkeeping plus
    /// `start_epoch` and `is_float16` when present.
    pub fn into_record(self) -> Map<String, Value> {
        let mut record = self.best_model_dict;
        if let Some(start_epoch) = self.start_epoch {
            record.insert("start_epoch".to_string(), Value::from(start_epoch));
        }
        if let Some(is_float16) = self.is_float16 {
            record.insert("is_float16".to_string(), Value::from(is_float16));
        }
        record
    }
}
