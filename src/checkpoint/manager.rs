use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::checkpoint::layout::{
    best_model_prefix, CheckpointPrefix, BEST_MODEL_DIR, BEST_PREFIX, DEFAULT_PREFIX,
    KIE_METRIC_STEM,
};
use crate::checkpoint::metadata::TrainingStates;
use crate::config::{ModelKind, TrainConfig};
use crate::download::{LocalResolver, WeightsResolver};
use crate::error::{CheckpointError, ConfigError};
use crate::model::{Optimizer, TrainableModel};
use crate::state::io as state_io;

/// Which source `load_model` restores from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumePlan {
    /// KIE distillation: nothing is loaded.
    KieDistillation,
    /// KIE model: metrics and optimizer from the backbone checkpoint, if any.
    Kie { checkpoints: Option<PathBuf> },
    /// Full checkpoint with name-by-name reconciliation.
    Resume(CheckpointPrefix),
    /// Parameter-only warm start, applied in order.
    Pretrained(Vec<String>),
    Scratch,
}

impl fmt::Display for ResumePlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResumePlan::KieDistillation => write!(f, "KIE distillation: resume not supported"),
            ResumePlan::Kie { checkpoints: Some(dir) } => {
                write!(f, "KIE resume from backbone checkpoint {}", dir.display())
            }
            ResumePlan::Kie { checkpoints: None } => write!(f, "KIE model without checkpoint"),
            ResumePlan::Resume(prefix) => write!(f, "resume from {prefix}"),
            ResumePlan::Pretrained(paths) => {
                write!(f, "warm start from pretrained {}", paths.join(", "))
            }
            ResumePlan::Scratch => write!(f, "train from scratch"),
        }
    }
}

/// Saves and restores model, optimizer and training progress.
///
/// The model family is resolved once from the configuration. Every operation
/// logs inside the manager's own span.
///
/// # Example
///
/// ```ignore
/// let config = TrainConfig::load(Path::new("configs/det_r50.toml"))?;
/// let manager = CheckpointManager::new(config)?;
///
/// let resume = manager.load_model(&mut model, Some(&mut optimizer))?;
/// let first_epoch = resume.start_epoch.unwrap_or(1);
///
/// // In training loop:
/// let states = TrainingStates::new(epoch).with_best_model_dict(best.clone());
/// manager.save_model(&model, &optimizer, &save_dir, false, "latest", &states)?;
/// ```
pub struct CheckpointManager {
    config: TrainConfig,
    kind: ModelKind,
    pub(crate) resolver: Box<dyn WeightsResolver>,
    pub(crate) span: tracing::Span,
}

impl CheckpointManager {
    pub fn new(config: TrainConfig) -> Result<Self, ConfigError> {
        let config = config.normalized();
        config.validate()?;
        let kind = config.model_kind();
        let span = tracing::info_span!(
            "checkpoint",
            model_type = %config.architecture.model_type,
            algorithm = %config.architecture.algorithm,
        );
        Ok(CheckpointManager {
            config,
            kind,
            resolver: Box::new(LocalResolver::new()),
            span,
        })
    }

    /// Use a different resolver for pretrained weight locations.
    pub fn with_resolver(mut self, resolver: impl WeightsResolver + 'static) -> Self {
        self.resolver = Box::new(resolver);
        self
    }

    pub fn config(&self) -> &TrainConfig {
        &self.config
    }

    pub fn model_kind(&self) -> ModelKind {
        self.kind
    }

    /// The branch `load_model` takes for this configuration.
    pub fn plan(&self) -> ResumePlan {
        match self.kind {
            ModelKind::KieDistillation => ResumePlan::KieDistillation,
            ModelKind::Kie => ResumePlan::Kie {
                checkpoints: self.config.architecture.backbone.checkpoints.clone(),
            },
            ModelKind::Standard => {
                let global = &self.config.global;
                if let Some(checkpoints) = &global.checkpoints {
                    ResumePlan::Resume(CheckpointPrefix::new(checkpoints))
                } else if let Some(pretrained) = &global.pretrained_model {
                    ResumePlan::Pretrained(
                        pretrained.paths().into_iter().map(String::from).collect(),
                    )
                } else {
                    ResumePlan::Scratch
                }
            }
        }
    }

    /// Save under `Global.save_model_dir` with the [`DEFAULT_PREFIX`] prefix.
    pub fn save(
        &self,
        model: &dyn TrainableModel,
        optimizer: &dyn Optimizer,
        is_best: bool,
        states: &TrainingStates,
    ) -> Result<PathBuf, CheckpointError> {
        let model_dir = &self.config.global.save_model_dir;
        self.save_model(model, optimizer, model_dir, is_best, DEFAULT_PREFIX, states)
    }

    /// Save model, optimizer and training states under `<model_dir>/<prefix>`.
    ///
    /// Callers without their own naming pass [`DEFAULT_PREFIX`], or use
    /// [`Self::save`]. With the [`BEST_PREFIX`] prefix the model and optimizer
    /// state are also mirrored into `<model_dir>/best_model/`. Returns the
    /// model prefix.
    pub fn save_model(
        &self,
        model: &dyn TrainableModel,
        optimizer: &dyn Optimizer,
        model_dir: &Path,
        is_best: bool,
        prefix: &str,
        states: &TrainingStates,
    ) -> Result<PathBuf, CheckpointError> {
        let _guard = self.span.enter();
        mkdir_if_not_exist(model_dir)?;
        let model_prefix = model_dir.join(prefix);
        let checkpoint = CheckpointPrefix::new(&model_prefix);

        let best = if prefix == BEST_PREFIX {
            mkdir_if_not_exist(&model_dir.join(BEST_MODEL_DIR))?;
            Some(best_model_prefix(model_dir))
        } else {
            None
        };

        let optimizer_state = optimizer.state_dict();
        state_io::save_optimizer(&optimizer_state, &checkpoint.optimizer())?;
        if let Some(best) = &best {
            state_io::save_optimizer(&optimizer_state, &best.optimizer())?;
        }

        let metric_prefix = match self.kind {
            ModelKind::Standard => {
                let params = model.state_dict();
                state_io::save_params(&params, &checkpoint.params())?;
                if let Some(best) = &best {
                    state_io::save_params(&params, &best.params())?;
                }
                checkpoint
            }
            ModelKind::Kie | ModelKind::KieDistillation => {
                let backbone = self
                    .architecture(model)?
                    .backbone()
                    .ok_or(CheckpointError::MissingComponent("backbone"))?;
                backbone.save_pretrained(&model_prefix)?;
                if best.is_some() {
                    backbone.save_pretrained(&model_dir.join(BEST_MODEL_DIR))?;
                }
                CheckpointPrefix::new(model_prefix.join(KIE_METRIC_STEM))
            }
        };

        states.save(&metric_prefix.states())?;
        if is_best {
            tracing::info!(path = %model_prefix.display(), "save best model to");
        } else {
            tracing::info!(path = %model_prefix.display(), "save model in");
        }
        Ok(model_prefix)
    }

    // Unwrap data-parallel and distillation indirections down to the network
    // that owns the backbone.
    fn architecture<'a>(
        &self,
        model: &'a dyn TrainableModel,
    ) -> Result<&'a dyn TrainableModel, CheckpointError> {
        let arch = if self.config.global.distributed {
            model
                .inner()
                .ok_or(CheckpointError::MissingComponent("data-parallel layers"))?
        } else {
            model
        };
        if self.kind == ModelKind::KieDistillation {
            arch.student()
                .ok_or(CheckpointError::MissingComponent("student"))
        } else {
            Ok(arch)
        }
    }
}

/// Create `path` (and parents) unless it is already a directory.
///
/// Another process creating the same directory at the same time is not an
/// error.
pub(crate) fn mkdir_if_not_exist(path: &Path) -> Result<(), CheckpointError> {
    if path.is_dir() {
        return Ok(());
    }
    match fs::create_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists && path.is_dir() => {
            tracing::warn!(path = %path.display(), "directory already created by another process");
            Ok(())
        }
        Err(e) => Err(CheckpointError::CreateDir {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}
