//! YAML configuration for the command-line pipeline.
//!
//! Every section is optional and falls back to its defaults, so a config
//! file only needs the values it changes. Once loaded the configuration is
//! an immutable value handed to each stage.

use std::{
    fs,
    path::{Path, PathBuf},
};

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::{
    application::ApplicationParams,
    error::{Result, StyleError},
    extraction::ExtractionParams,
};

pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub raw_images_dir: PathBuf,
    pub clean_images_dir: PathBuf,
    pub output_dir: PathBuf,
    pub fingerprint_subdir: PathBuf,
    pub stylized_subdir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            raw_images_dir: PathBuf::from("data/raw_images"),
            clean_images_dir: PathBuf::from("data/clean_images"),
            output_dir: PathBuf::from("output"),
            fingerprint_subdir: PathBuf::from("camera_fingerprint"),
            stylized_subdir: PathBuf::from("stylized_images"),
        }
    }
}

impl PathsConfig {
    pub fn fingerprint_dir(&self) -> PathBuf {
        self.output_dir.join(&self.fingerprint_subdir)
    }

    pub fn stylized_dir(&self) -> PathBuf {
        self.output_dir.join(&self.stylized_subdir)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub parallel: bool,
    /// Consider only the first N source files (sorted by path). Files that
    /// fail to decode still count toward the limit, so fewer than N images
    /// may be averaged.
    pub max_images: Option<usize>,
    /// Also write PNG previews of the maps next to the fingerprint.
    pub write_previews: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            parallel: true,
            max_images: None,
            write_previews: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StyleConfig {
    pub paths: PathsConfig,
    pub analyzer: ExtractionParams,
    pub applicator: ApplicationParams,
    pub runtime: RuntimeConfig,
}

impl StyleConfig {
    pub fn from_yaml(contents: &str) -> Result<Self> {
        let config: StyleConfig = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(&path)?;
        let config = Self::from_yaml(&contents)?;
        info!("loaded configuration from {}", path.as_ref().display());
        Ok(config)
    }

    /// Like [`load`](Self::load), but a missing file yields the defaults.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().is_file() {
            Self::load(path)
        } else {
            warn!(
                "config file {} not found, using defaults",
                path.as_ref().display()
            );
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.analyzer.validate()?;
        self.applicator.validate()?;
        if self.runtime.max_images == Some(0) {
            return Err(StyleError::InvalidParameter(
                "max_images must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
