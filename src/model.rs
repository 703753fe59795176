use std::fs;
use std::path::Path;

use crate::error::CheckpointError;
use crate::state::{io, OptimizerState, ParamState};

/// File written by [`ParamState`]'s pretrained save routine.
pub const PRETRAINED_PARAMS_FILE: &str = "model_state.pdparams";

/// Flat parameter surface of a network.
pub trait StateDictModule {
    /// Snapshot of every parameter, in the model's declaration order.
    fn state_dict(&self) -> ParamState;

    /// Apply the given parameters. Names absent from `state` keep their
    /// current value.
    fn set_state_dict(&mut self, state: ParamState);
}

/// A network the checkpoint manager can save and restore.
///
/// Standard models only need [`StateDictModule`]. Models that persist their
/// weights through a backbone-specific routine also expose the components
/// needed to reach it.
pub trait TrainableModel: StateDictModule {
    /// Wrapped layers when this is a data-parallel wrapper.
    fn inner(&self) -> Option<&dyn TrainableModel> {
        None
    }

    /// Student branch of a distillation model.
    fn student(&self) -> Option<&dyn TrainableModel> {
        None
    }

    /// Backbone that writes its own pretrained directory.
    fn backbone(&self) -> Option<&dyn PretrainedBackbone> {
        None
    }
}

/// Backbone with its own directory-based save routine.
pub trait PretrainedBackbone {
    fn save_pretrained(&self, dir: &Path) -> Result<(), CheckpointError>;
}

/// Optimizer whose internal state can be snapshotted and restored.
pub trait Optimizer {
    fn state_dict(&self) -> OptimizerState;
    fn set_state_dict(&mut self, state: OptimizerState);
}

/// Data-parallel wrapper around a model.
///
/// Parameter names are those of the wrapped model.
#[derive(Debug, Clone)]
pub struct DataParallel<M> {
    layers: M,
}

impl<M: TrainableModel> DataParallel<M> {
    pub fn new(layers: M) -> Self {
        DataParallel { layers }
    }

    pub fn layers(&self) -> &M {
        &self.layers
    }
}

impl<M: TrainableModel> StateDictModule for DataParallel<M> {
    fn state_dict(&self) -> ParamState {
        self.layers.state_dict()
    }

    fn set_state_dict(&mut self, state: ParamState) {
        self.layers.set_state_dict(state);
    }
}

impl<M: TrainableModel> TrainableModel for DataParallel<M> {
    fn inner(&self) -> Option<&dyn TrainableModel> {
        Some(&self.layers)
    }
}

// A bare parameter map is the simplest model there is.
impl StateDictModule for ParamState {
    fn state_dict(&self) -> ParamState {
        self.clone()
    }

    fn set_state_dict(&mut self, state: ParamState) {
        self.merge(state);
    }
}

impl TrainableModel for ParamState {}

impl PretrainedBackbone for ParamState {
    fn save_pretrained(&self, dir: &Path) -> Result<(), CheckpointError> {
        fs::create_dir_all(dir).map_err(|e| CheckpointError::CreateDir {
            path: dir.to_path_buf(),
            source: e,
        })?;
        io::save_params(self, &dir.join(PRETRAINED_PARAMS_FILE))
    }
}

impl Optimizer for OptimizerState {
    fn state_dict(&self) -> OptimizerState {
        self.clone()
    }

    fn set_state_dict(&mut self, state: OptimizerState) {
        *self = state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::TensorData;

    fn params() -> ParamState {
        let mut params = ParamState::new();
        params.insert("linear.weight", TensorData::new(vec![1.0f32, 2.0], [2]));
        params
    }

    #[test]
    fn test_data_parallel_delegates() {
        let mut wrapped = DataParallel::new(params());
        assert!(wrapped.inner().is_some());
        assert_eq!(wrapped.state_dict(), params());

        let mut update = ParamState::new();
        update.insert("linear.weight", TensorData::new(vec![5.0f32, 6.0], [2]));
        wrapped.set_state_dict(update);
        assert_eq!(
            wrapped
                .layers()
                .get("linear.weight")
                .unwrap()
                .to_vec::<f32>()
                .unwrap(),
            vec![5.0, 6.0]
        );
    }

    #[test]
    fn test_param_state_save_pretrained() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("ser_model");
        params().save_pretrained(&target).unwrap();

        let written = io::load_params(&target.join(PRETRAINED_PARAMS_FILE)).unwrap();
        assert_eq!(written, params());
    }
}
