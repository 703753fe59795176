use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::CheckpointError;
use crate::state::{OptimizerState, ParamState, StateDict};

const FORMAT_TAG: &str = "ocr-ckpt";
/// Newest tensor-state file version this crate reads and the one it writes.
pub const STATE_FILE_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum StateKind {
    Params,
    Optimizer,
}

impl StateKind {
    fn describe(self) -> &'static str {
        match self {
            StateKind::Params => "parameter state",
            StateKind::Optimizer => "optimizer state",
        }
    }
}

#[derive(Serialize)]
struct StateFileRef<'a, V> {
    format: &'a str,
    version: u32,
    kind: StateKind,
    entries: &'a StateDict<V>,
}

#[derive(Deserialize)]
struct StateHeader {
    format: String,
    version: u32,
    kind: StateKind,
}

#[derive(Deserialize)]
struct StateFile<V> {
    entries: StateDict<V>,
}

/// Write a parameter mapping to a `.pdparams` file.
pub fn save_params(state: &ParamState, path: &Path) -> Result<(), CheckpointError> {
    write_state(state, StateKind::Params, path)
}

/// Read a parameter mapping from a `.pdparams` file.
pub fn load_params(path: &Path) -> Result<ParamState, CheckpointError> {
    read_state(StateKind::Params, path)
}

/// Write an optimizer mapping to a `.pdopt` file.
pub fn save_optimizer(state: &OptimizerState, path: &Path) -> Result<(), CheckpointError> {
    write_state(state, StateKind::Optimizer, path)
}

/// Read an optimizer mapping from a `.pdopt` file.
pub fn load_optimizer(path: &Path) -> Result<OptimizerState, CheckpointError> {
    read_state(StateKind::Optimizer, path)
}

fn write_state<V: Serialize>(
    entries: &StateDict<V>,
    kind: StateKind,
    path: &Path,
) -> Result<(), CheckpointError> {
    let envelope = StateFileRef {
        format: FORMAT_TAG,
        version: STATE_FILE_VERSION,
        kind,
        entries,
    };

    let tmp_path = tmp_sibling(path);
    let file = File::create(&tmp_path).map_err(|e| CheckpointError::Write {
        path: tmp_path.clone(),
        source: e,
    })?;
    let mut writer = BufWriter::new(file);
    rmp_serde::encode::write_named(&mut writer, &envelope).map_err(|e| {
        CheckpointError::Encode {
            path: path.to_path_buf(),
            source: e,
        }
    })?;
    writer.flush().map_err(|e| CheckpointError::Write {
        path: tmp_path.clone(),
        source: e,
    })?;
    drop(writer);

    fs::rename(&tmp_path, path).map_err(|e| CheckpointError::Write {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(())
}

fn read_state<V: DeserializeOwned>(
    kind: StateKind,
    path: &Path,
) -> Result<StateDict<V>, CheckpointError> {
    let bytes = fs::read(path).map_err(|e| CheckpointError::Read {
        path: path.to_path_buf(),
        source: e,
    })?;
    let decode_err = |e| CheckpointError::Decode {
        path: path.to_path_buf(),
        source: e,
    };

    // Entries of the wrong kind do not decode as `V`, so check the header first.
    let header: StateHeader = rmp_serde::from_slice(&bytes).map_err(decode_err)?;
    if header.format != FORMAT_TAG || header.kind != kind {
        return Err(CheckpointError::BadFormat {
            path: path.to_path_buf(),
            expected: kind.describe(),
        });
    }
    if header.version > STATE_FILE_VERSION {
        return Err(CheckpointError::UnsupportedVersion {
            path: path.to_path_buf(),
            found: header.version,
            supported: STATE_FILE_VERSION,
        });
    }

    let decoded: StateFile<V> = rmp_serde::from_slice(&bytes).map_err(decode_err)?;
    Ok(decoded.entries)
}

/// `<path>.tmp`, written first and renamed over `path`.
pub(crate) fn tmp_sibling(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(".tmp");
    PathBuf::from(os)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::StateValue;
    use burn::tensor::{f16, DType, TensorData};

    fn sample_params() -> ParamState {
        let mut params = ParamState::new();
        params.insert(
            "backbone.conv1.weight",
            TensorData::new(vec![0.25f32, -1.5, 3.0, 4.125], [2, 2]),
        );
        params.insert(
            "head.bias",
            TensorData::new(vec![f16::from_f32(0.5), f16::from_f32(-2.0)], [2]),
        );
        params
    }

    #[test]
    fn test_params_file_preserves_dtype_and_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("latest.pdparams");
        let params = sample_params();

        save_params(&params, &path).unwrap();
        assert!(!tmp_sibling(&path).exists());

        let loaded = load_params(&path).unwrap();
        assert_eq!(loaded, params);
        assert_eq!(
            loaded.keys().collect::<Vec<_>>(),
            vec!["backbone.conv1.weight", "head.bias"]
        );
        assert_eq!(loaded.get("head.bias").unwrap().dtype, DType::F16);
    }

    #[test]
    fn test_optimizer_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("latest.pdopt");
        let mut state = OptimizerState::new();
        state.insert(
            "conv1.weight_moment1_0",
            StateValue::Tensor(TensorData::new(vec![0.1f32, 0.2], [2])),
        );
        state.insert("global_step", StateValue::Int(1200));
        state.insert("LR_Scheduler.last_lr", StateValue::Float(0.001));

        save_optimizer(&state, &path).unwrap();
        assert_eq!(load_optimizer(&path).unwrap(), state);
    }

    #[test]
    fn test_kind_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("latest.pdparams");
        save_params(&sample_params(), &path).unwrap();

        let err = load_optimizer(&path).unwrap_err();
        assert!(
            matches!(err, CheckpointError::BadFormat { .. }),
            "expected BadFormat, got: {err}"
        );
    }

    #[test]
    fn test_optimizer_file_read_as_params_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("latest.pdopt");
        let mut state = OptimizerState::new();
        state.insert("global_step", StateValue::Int(7));
        save_optimizer(&state, &path).unwrap();

        let err = load_params(&path).unwrap_err();
        assert!(
            matches!(err, CheckpointError::BadFormat { expected: "parameter state", .. }),
            "expected BadFormat, got: {err}"
        );
    }

    #[test]
    fn test_garbage_file_fails_to_decode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.pdparams");
        fs::write(&path, b"not a checkpoint").unwrap();

        let err = load_params(&path).unwrap_err();
        assert!(matches!(err, CheckpointError::Decode { .. }));
    }

    #[test]
    fn test_missing_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.pdparams");

        match load_params(&path) {
            Err(CheckpointError::Read { path: p, .. }) => assert_eq!(p, path),
            other => panic!("expected Read error, got {other:?}"),
        }
    }
}
