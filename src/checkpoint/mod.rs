mod layout;
mod load;
mod manager;
mod metadata;
pub mod reconcile;

pub use layout::{
    best_model_prefix, CheckpointPrefix, BEST_MODEL_DIR, BEST_MODEL_STEM, BEST_PREFIX,
    DEFAULT_PREFIX, KIE_METRIC_STEM, OPTIMIZER_EXT, PARAMS_EXT, STATES_EXT,
};
pub use manager::{CheckpointManager, ResumePlan};
pub use metadata::{ResumeState, TrainingStates, STATES_VERSION};
pub use reconcile::{Reconciled, SkipReason, SkippedParam};
