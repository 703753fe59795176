use std::path::Path;

use crate::checkpoint::layout::{CheckpointPrefix, KIE_METRIC_STEM, STATES_EXT};
use crate::checkpoint::manager::{CheckpointManager, ResumePlan};
use crate::checkpoint::metadata::{ResumeState, TrainingStates};
use crate::checkpoint::reconcile;
use crate::error::CheckpointError;
use crate::model::{Optimizer, StateDictModule, TrainableModel};
use crate::state::{io as state_io, OptimizerState, ParamState};

impl CheckpointManager {
    /// Restore the initial training state according to [`Self::plan`].
    ///
    /// Full checkpoints are matched against the model name by name; entries
    /// that are missing or have the wrong shape are skipped with a warning and
    /// keep their current value. Non-KIE models always report `is_float16`.
    pub fn load_model(
        &self,
        model: &mut dyn TrainableModel,
        optimizer: Option<&mut dyn Optimizer>,
    ) -> Result<ResumeState, CheckpointError> {
        let _guard = self.span.enter();
        match self.plan() {
            ResumePlan::KieDistillation => {
                tracing::info!("resume is not supported for KIE distillation models");
                Ok(ResumeState::default())
            }
            ResumePlan::Kie { checkpoints } => self.resume_kie(checkpoints.as_deref(), optimizer),
            ResumePlan::Resume(prefix) => self.resume_reconciled(&prefix, model, optimizer),
            ResumePlan::Pretrained(locations) => {
                let loaded = locations
                    .iter()
                    .map(|location| self.read_pretrained(location))
                    .collect::<Result<Vec<_>, _>>()?;
                let mut is_float16 = false;
                for (prefix, params) in loaded {
                    is_float16 |= apply_pretrained(&mut *model, &prefix, params);
                }
                Ok(ResumeState {
                    is_float16: Some(is_float16),
                    ..Default::default()
                })
            }
            ResumePlan::Scratch => {
                tracing::info!("train from scratch");
                Ok(ResumeState {
                    is_float16: Some(false),
                    ..Default::default()
                })
            }
        }
    }

    /// Resume a full checkpoint without reconciliation.
    ///
    /// Both `<checkpoints>.pdparams` and `<checkpoints>.pdopt` must exist.
    /// Without a checkpoint, every configured pretrained path is applied in
    /// order and no training states are returned.
    pub fn init_model(
        &self,
        model: &mut dyn TrainableModel,
        optimizer: Option<&mut dyn Optimizer>,
    ) -> Result<ResumeState, CheckpointError> {
        let _guard = self.span.enter();
        let global = &self.config().global;

        if let Some(checkpoints) = &global.checkpoints {
            let prefix = CheckpointPrefix::new(checkpoints);
            let params_path = require(prefix.params())?;
            let optimizer_path = require(prefix.optimizer())?;

            let params = state_io::load_params(&params_path)?;
            let optimizer_state = state_io::load_optimizer(&optimizer_path)?;
            let resume = read_states_if_present(&prefix.states())?;

            model.set_state_dict(params);
            if let Some(optimizer) = optimizer {
                optimizer.set_state_dict(optimizer_state);
            }
            tracing::info!(path = %prefix, "resume from checkpoint");
            return Ok(resume);
        }

        if let Some(pretrained) = &global.pretrained_model {
            let locations = pretrained.paths();
            for location in &locations {
                let path = Path::new(location);
                if !(path.is_dir() || CheckpointPrefix::new(path).params().exists()) {
                    return Err(CheckpointError::MissingPretrained(path.to_path_buf()));
                }
            }
            for location in locations {
                let params = state_io::load_params(&CheckpointPrefix::new(location).params())?;
                model.set_state_dict(params);
                tracing::info!(path = location, "load pretrained model");
            }
            return Ok(ResumeState::default());
        }

        tracing::info!("train from scratch");
        Ok(ResumeState::default())
    }

    /// Resume a full checkpoint if one exists, otherwise pair pretrained
    /// parameters with the model's parameters by position.
    ///
    /// Positional pairing ignores names, so it is only meaningful when the
    /// pretrained file was written from a model with the same parameter
    /// order. Only a resumed checkpoint returns training states.
    pub fn load_dygraph_params(
        &self,
        model: &mut dyn TrainableModel,
        optimizer: Option<&mut dyn Optimizer>,
    ) -> Result<ResumeState, CheckpointError> {
        let _guard = self.span.enter();
        let global = &self.config().global;

        if let Some(checkpoints) = &global.checkpoints {
            if CheckpointPrefix::new(checkpoints).params().exists() {
                return self.init_model(model, optimizer);
            }
        }

        let Some(pretrained) = &global.pretrained_model else {
            return Ok(ResumeState::default());
        };
        let locations = pretrained.paths();
        for location in &locations {
            let path = Path::new(location);
            if !path.exists() && !CheckpointPrefix::new(path).params().exists() {
                tracing::info!(path = location, "pretrained model does not exist");
                return Ok(ResumeState::default());
            }
        }

        let loaded = locations
            .iter()
            .map(|location| {
                let params_path = CheckpointPrefix::new(location).params();
                state_io::load_params(&params_path).map(|params| (params_path, params))
            })
            .collect::<Result<Vec<_>, _>>()?;
        for (params_path, params) in loaded {
            let reconciled = reconcile::by_position(&model.state_dict(), params);
            model.set_state_dict(reconciled.state);
            tracing::info!(path = %params_path.display(), "loaded pretrained model");
        }
        Ok(ResumeState::default())
    }

    /// Warm-start from parameter-only weights.
    ///
    /// `location` goes through the manager's resolver first. Every loaded
    /// parameter the model also has is cast to the model's dtype and applied
    /// when shapes agree. Returns whether any loaded parameter was F16.
    pub fn load_pretrained_params<M>(
        &self,
        model: &mut M,
        location: &str,
    ) -> Result<bool, CheckpointError>
    where
        M: StateDictModule + ?Sized,
    {
        let _guard = self.span.enter();
        let (prefix, loaded) = self.read_pretrained(location)?;
        Ok(apply_pretrained(model, &prefix, loaded))
    }

    fn read_pretrained(
        &self,
        location: &str,
    ) -> Result<(CheckpointPrefix, ParamState), CheckpointError> {
        let prefix = CheckpointPrefix::new(self.resolver.resolve(location)?);
        let params_path = require(prefix.params())?;
        let loaded = state_io::load_params(&params_path)?;
        Ok((prefix, loaded))
    }

    fn resume_reconciled(
        &self,
        prefix: &CheckpointPrefix,
        model: &mut dyn TrainableModel,
        optimizer: Option<&mut dyn Optimizer>,
    ) -> Result<ResumeState, CheckpointError> {
        let params_path = require(prefix.params())?;
        let loaded = state_io::load_params(&params_path)?;
        let optimizer_state = match optimizer.is_some() {
            true => read_optimizer_if_present(prefix)?,
            false => None,
        };
        let mut resume = read_states_if_present(&prefix.states())?;

        let reconciled = reconcile::by_target_names(&model.state_dict(), loaded);
        model.set_state_dict(reconciled.state);
        if reconciled.is_float16 {
            tracing::info!("parameter type is float16, converted to the model dtype when loading");
        }
        if let (Some(optimizer), Some(state)) = (optimizer, optimizer_state) {
            optimizer.set_state_dict(state);
        }

        tracing::info!(path = %prefix, "resume from checkpoint");
        resume.is_float16 = Some(reconciled.is_float16);
        Ok(resume)
    }

    fn resume_kie(
        &self,
        checkpoints: Option<&Path>,
        optimizer: Option<&mut dyn Optimizer>,
    ) -> Result<ResumeState, CheckpointError> {
        let Some(checkpoints) = checkpoints else {
            return Ok(ResumeState::default());
        };

        let metric_path = checkpoints.join(format!("{KIE_METRIC_STEM}.{STATES_EXT}"));
        let resume = read_states_if_present(&metric_path)?;
        tracing::info!(path = %checkpoints.display(), "resume from checkpoint");

        if let Some(optimizer) = optimizer {
            let prefix = CheckpointPrefix::without_trailing_separator(checkpoints);
            if let Some(state) = read_optimizer_if_present(&prefix)? {
                optimizer.set_state_dict(state);
            }
        }
        Ok(resume)
    }
}

fn apply_pretrained<M>(model: &mut M, prefix: &CheckpointPrefix, loaded: ParamState) -> bool
where
    M: StateDictModule + ?Sized,
{
    let reconciled = reconcile::by_source_names(&model.state_dict(), loaded);
    model.set_state_dict(reconciled.state);

    if reconciled.is_float16 {
        tracing::info!("parameter type is float16, converted to the model dtype when loading");
    }
    tracing::info!(path = %prefix, "load pretrain successful");
    reconciled.is_float16
}

fn require(path: std::path::PathBuf) -> Result<std::path::PathBuf, CheckpointError> {
    if path.exists() {
        Ok(path)
    } else {
        Err(CheckpointError::MissingArtifact(path))
    }
}

fn read_optimizer_if_present(
    prefix: &CheckpointPrefix,
) -> Result<Option<OptimizerState>, CheckpointError> {
    let path = prefix.optimizer();
    if path.exists() {
        Ok(Some(state_io::load_optimizer(&path)?))
    } else {
        tracing::warn!(path = %path.display(), "optimizer state not found, optimizer is not restored");
        Ok(None)
    }
}

fn read_states_if_present(path: &Path) -> Result<ResumeState, CheckpointError> {
    if path.exists() {
        Ok(TrainingStates::load(path)?.into_resume_state())
    } else {
        Ok(ResumeState::default())
    }
}
