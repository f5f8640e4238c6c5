use crate::compose::MapStyle;
use crate::crs::Crs;
use crate::identifier::{IdentifierError, IdentifierNormalizer, OverflowPolicy, DEFAULT_PAD, DEFAULT_WIDTH};
use crate::join::DuplicatePolicy;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub input: InputConfig,
    #[serde(default)]
    pub identifier: IdentifierConfig,
    #[serde(default)]
    pub join: JoinConfig,
    #[serde(default)]
    pub processing: ProcessingConfig,
    #[serde(default)]
    pub map: MapStyle,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct InputConfig {
    pub tracts: PathBuf, // .shp, .geojson or .json
    pub attributes: PathBuf,
    #[serde(default = "default_tract_id_column")]
    pub tract_id_column: String,
    #[serde(default = "default_attribute_id_column")]
    pub attribute_id_column: String,
    #[serde(default)]
    pub source_crs: Crs,
}

fn default_tract_id_column() -> String {
    "GEOID".to_string()
}

fn default_attribute_id_column() -> String {
    "GEOID10".to_string()
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct IdentifierConfig {
    pub width: usize,
    pub pad: char,
    pub overflow: OverflowPolicy,
}

impl Default for IdentifierConfig {
    fn default() -> Self {
        Self {
            width: DEFAULT_WIDTH,
            pad: DEFAULT_PAD,
            overflow: OverflowPolicy::default(),
        }
    }
}

impl IdentifierConfig {
    pub fn normalizer(&self) -> Result<IdentifierNormalizer, IdentifierError> {
        IdentifierNormalizer::new(self.width, self.pad, self.overflow)
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct JoinConfig {
    pub on_duplicate: DuplicatePolicy,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ProcessingConfig {
    pub metric: String,
    /// In degrees, applied after reprojection to EPSG:4326.
    pub simplify_tolerance: f64,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            metric: "NatWalkInd".to_string(),
            simplify_tolerance: 0.001,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct OutputConfig {
    pub html: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            html: PathBuf::from("walkability_map.html"),
        }
    }
}

impl AppConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(content)
            .with_context(|| "Failed to parse TOML configuration")?;
        config
            .identifier
            .normalizer()
            .context("Invalid [identifier] section")?;
        Ok(config)
    }
}
