//! Matching loaded parameters against a model's own parameters.
//!
//! Every function here takes the model's current state (`target`) and the
//! state read from disk (`loaded`) and returns the subset of `loaded` that
//! can be applied. Incompatible entries are logged and left out, so the
//! model keeps its current value for them.

use std::collections::HashMap;

use burn::tensor::{DType, TensorData};

use crate::state::ParamState;

/// Why a parameter was not applied.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    /// The model has it, the file does not.
    MissingFromLoaded,
    /// The file has it, the model does not.
    MissingFromModel,
    ShapeMismatch {
        expected: Vec<usize>,
        found: Vec<usize>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkippedParam {
    pub name: String,
    pub reason: SkipReason,
}

/// Parameters ready to apply, plus what was left out.
#[derive(Debug, Default)]
pub struct Reconciled {
    pub state: ParamState,
    /// Some loaded parameter was stored as F16.
    pub is_float16: bool,
    pub skipped: Vec<SkippedParam>,
}

impl Reconciled {
    fn skip(&mut self, name: &str, reason: SkipReason) {
        self.skipped.push(SkippedParam {
            name: name.to_string(),
            reason,
        });
    }
}

/// Walk the model's parameters and take each one from `loaded` by name.
pub fn by_target_names(target: &ParamState, loaded: ParamState) -> Reconciled {
    let mut loaded: HashMap<String, TensorData> = loaded.into_iter().collect();
    let mut out = Reconciled::default();
    for (name, current) in target.iter() {
        let Some(value) = loaded.remove(name) else {
            tracing::warn!(param = name, "not in loaded params, keeping model value");
            out.skip(name, SkipReason::MissingFromLoaded);
            continue;
        };
        accept_if_compatible(&mut out, name, current, value);
    }
    out
}

/// Walk the loaded parameters and keep those the model also has.
pub fn by_source_names(target: &ParamState, loaded: ParamState) -> Reconciled {
    let mut out = Reconciled::default();
    for (name, value) in loaded {
        let Some(current) = target.get(&name) else {
            tracing::warn!(param = %name, "pretrained param not in model");
            out.skip(&name, SkipReason::MissingFromModel);
            continue;
        };
        accept_if_compatible(&mut out, &name, current, value);
    }
    out
}

/// Pair the i-th model parameter with the i-th loaded parameter, ignoring
/// names. Accepted values are stored under the model's name. Dtypes are
/// applied as stored; entries beyond the shorter sequence are ignored.
pub fn by_position(target: &ParamState, loaded: ParamState) -> Reconciled {
    let mut out = Reconciled::default();
    for ((name, current), (loaded_name, value)) in target.iter().zip(loaded) {
        if name != loaded_name {
            tracing::debug!(param = name, loaded = %loaded_name, "pairing by position");
        }
        if current.shape == value.shape {
            out.state.insert(name, value);
        } else {
            tracing::info!(
                param = name,
                expected = ?current.shape,
                loaded = %loaded_name,
                found = ?value.shape,
                "shape of model params not matched with loaded params"
            );
            out.skip(name, shape_mismatch(current, &value));
        }
    }
    out
}

fn accept_if_compatible(out: &mut Reconciled, name: &str, current: &TensorData, value: TensorData) {
    if value.dtype == DType::F16 {
        out.is_float16 = true;
    }
    let value = if value.dtype != current.dtype {
        value.convert_dtype(current.dtype)
    } else {
        value
    };
    if value.shape == current.shape {
        out.state.insert(name, value);
    } else {
        tracing::warn!(
            param = name,
            expected = ?current.shape,
            found = ?value.shape,
            "shape of model params not matched with loaded params"
        );
        out.skip(name, shape_mismatch(current, &value));
    }
}

fn shape_mismatch(current: &TensorData, value: &TensorData) -> SkipReason {
    SkipReason::ShapeMismatch {
        expected: current.shape.to_vec(),
        found: value.shape.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::f16;

    fn f32_tensor(shape: &[usize]) -> TensorData {
        let n: usize = shape.iter().product();
        TensorData::new(vec![1.0f32; n], shape.to_vec())
    }

    fn f16_tensor(values: &[f32], shape: &[usize]) -> TensorData {
        let half: Vec<f16> = values.iter().map(|&v| f16::from_f32(v)).collect();
        TensorData::new(half, shape.to_vec())
    }

    fn state(entries: Vec<(&str, TensorData)>) -> ParamState {
        entries
            .into_iter()
            .map(|(name, value)| (name.to_string(), value))
            .collect()
    }

    #[test]
    fn test_target_names_skip_missing_and_unknown() {
        let target = state(vec![("a", f32_tensor(&[2, 2])), ("b", f32_tensor(&[3]))]);
        let loaded = state(vec![("a", f32_tensor(&[2, 2])), ("c", f32_tensor(&[3]))]);

        let out = by_target_names(&target, loaded);
        assert_eq!(out.state.keys().collect::<Vec<_>>(), vec!["a"]);
        assert_eq!(
            out.skipped,
            vec![SkippedParam {
                name: "b".into(),
                reason: SkipReason::MissingFromLoaded
            }]
        );
        assert!(!out.is_float16);
    }

    #[test]
    fn test_shape_mismatch_skips_only_that_entry() {
        let target = state(vec![
            ("conv.weight", f32_tensor(&[4, 3])),
            ("conv.bias", f32_tensor(&[4])),
            ("fc.weight", f32_tensor(&[10, 4])),
        ]);
        let loaded = state(vec![
            ("conv.weight", f32_tensor(&[4, 3])),
            ("conv.bias", f32_tensor(&[4])),
            ("fc.weight", f32_tensor(&[37, 4])),
        ]);

        let out = by_target_names(&target, loaded);
        assert_eq!(
            out.state.keys().collect::<Vec<_>>(),
            vec!["conv.weight", "conv.bias"]
        );
        assert_eq!(
            out.skipped,
            vec![SkippedParam {
                name: "fc.weight".into(),
                reason: SkipReason::ShapeMismatch {
                    expected: vec![10, 4],
                    found: vec![37, 4]
                }
            }]
        );
    }

    #[test]
    fn test_half_precision_is_promoted_to_target_dtype() {
        let target = state(vec![("w", f32_tensor(&[2]))]);
        let loaded = state(vec![("w", f16_tensor(&[0.5, -2.0], &[2]))]);

        let out = by_target_names(&target, loaded);
        assert!(out.is_float16);
        let applied = out.state.get("w").unwrap();
        assert_eq!(applied.dtype, DType::F32);
        assert_eq!(applied.to_vec::<f32>().unwrap(), vec![0.5, -2.0]);
    }

    #[test]
    fn test_source_names_drop_params_unknown_to_model() {
        let target = state(vec![("a", f32_tensor(&[2, 2])), ("b", f32_tensor(&[3]))]);
        let loaded = state(vec![
            ("c", f32_tensor(&[3])),
            ("a", f16_tensor(&[1.0, 2.0, 3.0, 4.0], &[2, 2])),
        ]);

        let out = by_source_names(&target, loaded);
        assert_eq!(out.state.keys().collect::<Vec<_>>(), vec!["a"]);
        assert!(out.is_float16);
        assert_eq!(out.state.get("a").unwrap().dtype, DType::F32);
        assert_eq!(
            out.skipped,
            vec![SkippedParam {
                name: "c".into(),
                reason: SkipReason::MissingFromModel
            }]
        );
    }

    #[test]
    fn test_position_pairs_ignore_names() {
        let target = state(vec![
            ("student.conv.weight", f32_tensor(&[2, 2])),
            ("student.fc.weight", f32_tensor(&[3])),
            ("student.fc.bias", f32_tensor(&[1])),
        ]);
        let loaded = state(vec![
            ("conv.weight", TensorData::new(vec![7.0f32; 4], vec![2, 2])),
            ("fc.weight", f32_tensor(&[5])),
        ]);

        let out = by_position(&target, loaded);
        assert_eq!(
            out.state.keys().collect::<Vec<_>>(),
            vec!["student.conv.weight"]
        );
        assert_eq!(
            out.state
                .get("student.conv.weight")
                .unwrap()
                .to_vec::<f32>()
                .unwrap(),
            vec![7.0; 4]
        );
        assert_eq!(out.skipped.len(), 1);
        assert_eq!(out.skipped[0].name, "student.fc.weight");
    }

    #[test]
    fn test_position_follows_insertion_order_not_name_order() {
        let target = state(vec![("z", f32_tensor(&[1])), ("a", f32_tensor(&[2]))]);
        let loaded = state(vec![
            ("first", TensorData::new(vec![3.0f32], vec![1])),
            ("second", TensorData::new(vec![4.0f32, 5.0], vec![2])),
        ]);

        let out = by_position(&target, loaded);
        assert_eq!(out.state.get("z").unwrap().to_vec::<f32>().unwrap(), vec![3.0]);
        assert_eq!(
            out.state.get("a").unwrap().to_vec::<f32>().unwrap(),
            vec![4.0, 5.0]
        );
        assert!(out.skipped.is_empty());
    }
}
