use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Algorithm whose KIE models follow the plain parameter-file convention.
pub const SDMGR: &str = "SDMGR";
/// Algorithm name of distillation wrappers that hold a student model.
pub const DISTILLATION: &str = "Distillation";
/// Model type of key-information-extraction models.
pub const KIE: &str = "kie";

/// One or several pretrained weight locations.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum PretrainedModel {
    One(String),
    Many(Vec<String>),
}

impl PretrainedModel {
    /// Configured locations, in application order.
    pub fn paths(&self) -> Vec<&str> {
        match self {
            PretrainedModel::One(path) => vec![path.as_str()],
            PretrainedModel::Many(paths) => paths.iter().map(String::as_str).collect(),
        }
    }
}

/// `Global` section: where training state comes from and goes to.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    /// Prefix of a full checkpoint to resume from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoints: Option<PathBuf>,
    /// Parameter-only weights used to warm-start.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pretrained_model: Option<PretrainedModel>,
    /// Model is wrapped for data-parallel training.
    pub distributed: bool,
    /// Directory `CheckpointManager::save` writes into.
    pub save_model_dir: PathBuf,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        GlobalConfig {
            checkpoints: None,
            pretrained_model: None,
            distributed: false,
            save_model_dir: PathBuf::from("output"),
        }
    }
}

/// `Architecture.Backbone` section.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct BackboneConfig {
    /// Backbone checkpoint directory, only consulted by KIE models.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoints: Option<PathBuf>,
}

/// `Architecture` section.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ArchitectureConfig {
    pub model_type: String,
    pub algorithm: String,
    #[serde(rename = "Backbone")]
    pub backbone: BackboneConfig,
}

impl Default for ArchitectureConfig {
    fn default() -> Self {
        ArchitectureConfig {
            model_type: "det".to_string(),
            algorithm: "DB".to_string(),
            backbone: BackboneConfig::default(),
        }
    }
}

/// How a model family persists and restores its weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    /// Flat parameter files next to the optimizer state.
    Standard,
    /// Weights saved by the backbone's own pretrained routine.
    Kie,
    /// KIE distillation wrapper; resume is not supported.
    KieDistillation,
}

impl ModelKind {
    pub fn resolve(model_type: &str, algorithm: &str) -> Self {
        if model_type != KIE || algorithm == SDMGR {
            ModelKind::Standard
        } else if algorithm == DISTILLATION {
            ModelKind::KieDistillation
        } else {
            ModelKind::Kie
        }
    }
}

/// Training configuration consumed by the checkpoint manager, loadable from TOML.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    #[serde(rename = "Global")]
    pub global: GlobalConfig,
    #[serde(rename = "Architecture")]
    pub architecture: ArchitectureConfig,
}

impl TrainConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml(&content)
    }

    /// Parse, normalize and validate a TOML document.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: TrainConfig = toml::from_str(content)?;
        let config = config.normalized();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the file
    /// does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::warn!(path = %path.display(), "config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Treat empty paths as unset.
    pub fn normalized(mut self) -> Self {
        fn is_blank(path: &Path) -> bool {
            path.as_os_str().is_empty()
        }
        if self.global.checkpoints.as_deref().is_some_and(is_blank) {
            self.global.checkpoints = None;
        }
        if self.architecture.backbone.checkpoints.as_deref().is_some_and(is_blank) {
            self.architecture.backbone.checkpoints = None;
        }
        if let Some(PretrainedModel::One(path)) = &self.global.pretrained_model {
            if path.is_empty() {
                self.global.pretrained_model = None;
            }
        }
        self
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.architecture.model_type.is_empty() {
            return Err(ConfigError::Validation(
                "Architecture.model_type must not be empty".into(),
            ));
        }
        if self.architecture.algorithm.is_empty() {
            return Err(ConfigError::Validation(
                "Architecture.algorithm must not be empty".into(),
            ));
        }
        if let Some(PretrainedModel::Many(paths)) = &self.global.pretrained_model {
            if paths.is_empty() {
                return Err(ConfigError::Validation(
                    "Global.pretrained_model list must not be empty".into(),
                ));
            }
            if paths.iter().any(String::is_empty) {
                return Err(ConfigError::Validation(
                    "Global.pretrained_model entries must not be empty".into(),
                ));
            }
        }
        if self.global.save_model_dir.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "Global.save_model_dir must not be empty".into(),
            ));
        }
        Ok(())
    }

    pub fn model_kind(&self) -> ModelKind {
        ModelKind::resolve(&self.architecture.model_type, &self.architecture.algorithm)
    }

    /// Generate a TOML string with all default values.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&TrainConfig::default()).expect("default config serializes")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = TrainConfig::default();
        config.validate().expect("default config should be valid");
        assert_eq!(config.model_kind(), ModelKind::Standard);
    }

    #[test]
    fn test_empty_toml_uses_all_defaults() {
        let config = TrainConfig::from_toml("").unwrap();
        assert!(config.global.checkpoints.is_none());
        assert!(config.global.pretrained_model.is_none());
        assert_eq!(config.architecture.model_type, "det");
        assert_eq!(config.global.save_model_dir, PathBuf::from("output"));
    }

    #[test]
    fn test_pretrained_accepts_string_or_list() {
        let one = TrainConfig::from_toml(
            r#"
[Global]
pretrained_model = "weights/backbone"
"#,
        )
        .unwrap();
        assert_eq!(
            one.global.pretrained_model.unwrap().paths(),
            vec!["weights/backbone"]
        );

        let many = TrainConfig::from_toml(
            r#"
[Global]
pretrained_model = ["weights/a", "weights/b"]
"#,
        )
        .unwrap();
        assert_eq!(
            many.global.pretrained_model.unwrap().paths(),
            vec!["weights/a", "weights/b"]
        );
    }

    #[test]
    fn test_empty_paths_are_unset() {
        let config = TrainConfig::from_toml(
            r#"
[Global]
checkpoints = ""
pretrained_model = ""

[Architecture.Backbone]
checkpoints = ""
"#,
        )
        .unwrap();
        assert!(config.global.checkpoints.is_none());
        assert!(config.global.pretrained_model.is_none());
        assert!(config.architecture.backbone.checkpoints.is_none());
    }

    #[test]
    fn test_validation_rejects_empty_pretrained_list() {
        let result = TrainConfig::from_toml(
            r#"
[Global]
pretrained_model = []
"#,
        );
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_validation_rejects_empty_model_type() {
        let mut config = TrainConfig::default();
        config.architecture.model_type.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_model_kind_resolution() {
        assert_eq!(ModelKind::resolve("det", "DB"), ModelKind::Standard);
        assert_eq!(ModelKind::resolve("rec", DISTILLATION), ModelKind::Standard);
        assert_eq!(ModelKind::resolve(KIE, SDMGR), ModelKind::Standard);
        assert_eq!(ModelKind::resolve(KIE, "LayoutXLM"), ModelKind::Kie);
        assert_eq!(ModelKind::resolve(KIE, DISTILLATION), ModelKind::KieDistillation);
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = TrainConfig::load_or_default(Path::new("nonexistent_config.toml")).unwrap();
        assert_eq!(config.architecture.algorithm, "DB");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("train.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(
            f,
            r#"
[Global]
checkpoints = "output/ser/latest"
distributed = true

[Architecture]
model_type = "kie"
algorithm = "LayoutXLM"

[Architecture.Backbone]
checkpoints = "output/ser/best_accuracy"
"#
        )
        .unwrap();

        let config = TrainConfig::load(&path).unwrap();
        assert_eq!(
            config.global.checkpoints,
            Some(PathBuf::from("output/ser/latest"))
        );
        assert!(config.global.distributed);
        assert_eq!(config.model_kind(), ModelKind::Kie);
        assert_eq!(
            config.architecture.backbone.checkpoints,
            Some(PathBuf::from("output/ser/best_accuracy"))
        );
    }

    #[test]
    fn test_default_toml_roundtrips() {
        let toml_str = TrainConfig::default_toml();
        let config = TrainConfig::from_toml(&toml_str).unwrap();
        config.validate().expect("roundtripped config should be valid");
    }
}
