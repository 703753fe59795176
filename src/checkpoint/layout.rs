use std::ffi::OsString;
use std::path::{Path, PathBuf};

pub const PARAMS_EXT: &str = "pdparams";
pub const OPTIMIZER_EXT: &str = "pdopt";
pub const STATES_EXT: &str = "states";

/// Default file prefix for regular saves.
pub const DEFAULT_PREFIX: &str = "ppocr";
/// Prefix that also mirrors the save into [`BEST_MODEL_DIR`].
pub const BEST_PREFIX: &str = "best_accuracy";
pub const BEST_MODEL_DIR: &str = "best_model";
/// File stem used inside [`BEST_MODEL_DIR`].
pub const BEST_MODEL_STEM: &str = "model";
/// Metric file stem inside a KIE save directory.
pub const KIE_METRIC_STEM: &str = "metric";

/// Path prefix `P` naming the `P.pdparams` / `P.pdopt` / `P.states` triple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointPrefix(PathBuf);

impl CheckpointPrefix {
    /// Build a prefix, dropping a trailing `.pdparams` if the path names the
    /// parameter file itself.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let suffix = format!(".{PARAMS_EXT}");
        match path.to_str().and_then(|s| s.strip_suffix(&suffix)) {
            Some(stripped) => CheckpointPrefix(PathBuf::from(stripped)),
            None => CheckpointPrefix(path),
        }
    }

    /// Prefix without a trailing path separator.
    pub fn without_trailing_separator(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        match path.to_str() {
            Some(s) if s.len() > 1 && (s.ends_with('/') || s.ends_with('\\')) => {
                CheckpointPrefix(PathBuf::from(&s[..s.len() - 1]))
            }
            _ => CheckpointPrefix(path),
        }
    }

    pub fn as_path(&self) -> &Path {
        &self.0
    }

    pub fn params(&self) -> PathBuf {
        self.with_ext(PARAMS_EXT)
    }

    pub fn optimizer(&self) -> PathBuf {
        self.with_ext(OPTIMIZER_EXT)
    }

    pub fn states(&self) -> PathBuf {
        self.with_ext(STATES_EXT)
    }

    // Appended rather than set: prefixes like `iter_epoch_3.5` carry dots.
    fn with_ext(&self, ext: &str) -> PathBuf {
        let mut os = OsString::from(self.0.as_os_str());
        os.push(".");
        os.push(ext);
        PathBuf::from(os)
    }
}

impl std::fmt::Display for CheckpointPrefix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// `<dir>/best_model/model` prefix for the mirrored best snapshot.
pub fn best_model_prefix(model_dir: &Path) -> CheckpointPrefix {
    CheckpointPrefix(model_dir.join(BEST_MODEL_DIR).join(BEST_MODEL_STEM))
}
