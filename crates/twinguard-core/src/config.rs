//! Threshold configuration.
//!
//! The configuration file is optional. Its location comes from an explicit
//! path or, failing that, the `TWINGUARD_CONFIG` environment variable:
//! - `*.json`: parsed with serde_json.
//! - `*.toml`: parsed with toml.
//! - `*.yaml` / `*.yml`: parsed with serde_yaml; an empty document is the
//!   defaults.
//!
//! Every key is optional and falls back to its built-in default, so a file
//! only has to name what it overrides:
//!
//! ```text
//! { "thresholds": { "epsilon_psi": 0.55, "L_c": 0.25 }, "tri_temporal": false }
//! ```
//!
//! [`TwinConfig::load`] reports failures; [`TwinConfig::load_or_default`] is
//! the fallback path used by the pipeline and maps any failure to
//! [`TwinConfig::default`].

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::detector::{
    DEFAULT_EPSILON_PSI, DEFAULT_T_GAMMA, DEFAULT_T_OMEGA, DEFAULT_TWIST_THRESHOLD,
    DetectorThresholds,
};
use crate::gate::{DEFAULT_E_C, DEFAULT_L_C, DEFAULT_O_C, DEFAULT_V_C, GateThresholds};

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "TWINGUARD_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing {path} as JSON: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("parsing {path} as TOML: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("parsing {path} as YAML: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("unsupported configuration format for {path} (expected .json, .toml or .yaml)")]
    UnsupportedFormat { path: PathBuf },
}

/// Detector and gate thresholds, keyed the way configuration files name them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub epsilon_psi: f64,
    #[serde(rename = "T_gamma")]
    pub t_gamma: f64,
    #[serde(rename = "T_Omega")]
    pub t_omega: f64,
    #[serde(rename = "V_c")]
    pub v_c: f64,
    #[serde(rename = "O_c")]
    pub o_c: f64,
    #[serde(rename = "E_c")]
    pub e_c: f64,
    #[serde(rename = "L_c")]
    pub l_c: f64,
    pub threshold_twist: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            epsilon_psi: DEFAULT_EPSILON_PSI,
            t_gamma: DEFAULT_T_GAMMA,
            t_omega: DEFAULT_T_OMEGA,
            v_c: DEFAULT_V_C,
            o_c: DEFAULT_O_C,
            e_c: DEFAULT_E_C,
            l_c: DEFAULT_L_C,
            threshold_twist: DEFAULT_TWIST_THRESHOLD,
        }
    }
}

impl Thresholds {
    #[must_use]
    pub fn detector(&self) -> DetectorThresholds {
        DetectorThresholds {
            epsilon_psi: self.epsilon_psi,
            t_gamma: self.t_gamma,
            t_omega: self.t_omega,
            twist: self.threshold_twist,
        }
    }

    #[must_use]
    pub fn gate(&self) -> GateThresholds {
        GateThresholds {
            v_c: self.v_c,
            o_c: self.o_c,
            e_c: self.e_c,
            l_c: self.l_c,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TwinConfig {
    pub thresholds: Thresholds,
    /// Reserved for an extended tri-temporal mode; carried but unused.
    pub tri_temporal: bool,
}

impl TwinConfig {
    /// Parse a JSON document. Blank input yields defaults.
    pub fn from_json_str(text: &str) -> Result<Self, serde_json::Error> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(text)
    }

    /// Parse a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Parse a YAML document. Blank or `null` documents yield defaults.
    pub fn from_yaml_str(text: &str) -> Result<Self, serde_yaml::Error> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str::<Option<Self>>(text).map(Option::unwrap_or_default)
    }

    /// Load from a file, reporting every failure.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        let parse: fn(&Path, &str) -> Result<Self, ConfigError> = match ext.as_deref() {
            Some("json") => |path, text| {
                Self::from_json_str(text).map_err(|source| ConfigError::Json {
                    path: path.to_path_buf(),
                    source,
                })
            },
            Some("toml") => |path, text| {
                Self::from_toml_str(text).map_err(|source| ConfigError::Toml {
                    path: path.to_path_buf(),
                    source,
                })
            },
            Some("yaml" | "yml") => |path, text| {
                Self::from_yaml_str(text).map_err(|source| ConfigError::Yaml {
                    path: path.to_path_buf(),
                    source,
                })
            },
            _ => {
                return Err(ConfigError::UnsupportedFormat {
                    path: path.to_path_buf(),
                });
            }
        };
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        parse(path, &text)
    }

    /// Load from `path` if given; on any failure return the defaults unmodified.
    #[must_use]
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };
        match Self::load(path) {
            Ok(config) => {
                tracing::debug!(path = %path.display(), "configuration loaded");
                config
            }
            Err(err) => {
                tracing::warn!(error = %err, "configuration unavailable; using defaults");
                Self::default()
            }
        }
    }

    /// Configuration file to use: the explicit path, else `TWINGUARD_CONFIG`.
    #[must_use]
    pub fn resolve_path(explicit: Option<&Path>) -> Option<PathBuf> {
        pick_path(explicit, std::env::var_os(CONFIG_ENV))
    }
}

fn pick_path(explicit: Option<&Path>, env_value: Option<OsString>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    env_value
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}
