use crate::logging::LoggingConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub periodic: PeriodicConfig,
    pub spherical: SphericalConfig,
    pub alignment: AlignmentConfig,
    pub search: SearchConfig,
    pub logging: LoggingConfig,
}

/// Plane-wave expansion in a periodic box
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeriodicConfig {
    /// Largest wave index `K` kept on each axis
    pub cutoff: usize,
    /// Gaussian smoothing width, in length units
    pub width: f64,
    /// Translation grid points per retained frequency
    pub oversampling: usize,
    /// Explicit translation grid size, overriding `oversampling`
    pub grid_size: Option<usize>,
}

/// Shell-resolved harmonic expansion of a finite cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SphericalConfig {
    pub jmax: usize,
    /// Radial shell spacing and Gaussian width
    pub width: f64,
    pub oversampling: usize,
    /// Radial shells at `0, σ, .., (shells - 1)σ`; points further out fall
    /// on the outermost shell
    pub shells: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignmentConfig {
    /// Overlap maxima refined per alignment
    pub max_candidates: usize,
    pub refine_iterations: usize,
    /// Minimum decrease for a refinement step to count
    pub refine_tolerance: f64,
    /// Also consider improper alignments (point inversion)
    pub invert: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Root cubes per axis
    pub initial_divisions: usize,
    /// Cubes at or below this half-width are solved but not split
    pub min_half_width: f64,
    /// Optimality gap accepted as certified
    pub tolerance: f64,
}

impl Default for PeriodicConfig {
    fn default() -> Self {
        Self {
            cutoff: 8,
            width: 0.3,
            oversampling: 2,
            grid_size: None,
        }
    }
}

impl Default for SphericalConfig {
    fn default() -> Self {
        Self {
            jmax: 10,
            width: 0.3,
            oversampling: 2,
            shells: 24,
        }
    }
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        Self {
            max_candidates: 12,
            refine_iterations: 50,
            refine_tolerance: 1e-12,
            invert: false,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            initial_divisions: 4,
            min_half_width: 1e-3,
            tolerance: 1e-8,
        }
    }
}

impl Config {
    /// Load from a JSON or TOML file, sniffing the format from the content.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        if content.trim_start().starts_with('{') {
            serde_json::from_str(&content)
                .with_context(|| format!("parsing JSON config {}", path.display()))
        } else {
            toml::from_str(&content)
                .with_context(|| format!("parsing TOML config {}", path.display()))
        }
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P, format: ConfigFormat) -> Result<()> {
        let content = match format {
            ConfigFormat::Json => serde_json::to_string_pretty(self)?,
            ConfigFormat::Toml => toml::to_string_pretty(self)?,
        };

        fs::write(path.as_ref(), content)
            .with_context(|| format!("writing config file {}", path.as_ref().display()))?;
        Ok(())
    }

    /// Every problem found, not just the first.
    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.periodic.cutoff == 0 {
            errors.push("periodic cutoff must be at least 1".to_string());
        }
        if !(self.periodic.width > 0.0) {
            errors.push("periodic width must be positive".to_string());
        }
        if self.periodic.oversampling == 0 {
            errors.push("periodic oversampling must be at least 1".to_string());
        }
        if let Some(size) = self.periodic.grid_size {
            if size < 2 * self.periodic.cutoff + 1 {
                errors.push(format!(
                    "periodic grid_size {} is below 2 * cutoff + 1 = {}",
                    size,
                    2 * self.periodic.cutoff + 1
                ));
            }
        }

        if self.spherical.jmax == 0 || self.spherical.jmax > crate::algorithms::spherical::MAX_JMAX {
            errors.push(format!(
                "spherical jmax must be in 1..={}",
                crate::algorithms::spherical::MAX_JMAX
            ));
        }
        if !(self.spherical.width > 0.0) {
            errors.push("spherical width must be positive".to_string());
        }
        if self.spherical.oversampling == 0 {
            errors.push("spherical oversampling must be at least 1".to_string());
        }
        if self.spherical.shells == 0 {
            errors.push("spherical shells must be at least 1".to_string());
        }

        if self.alignment.max_candidates == 0 {
            errors.push("alignment max_candidates must be at least 1".to_string());
        }
        if self.alignment.refine_tolerance < 0.0 {
            errors.push("alignment refine_tolerance must be non-negative".to_string());
        }

        if self.search.initial_divisions == 0 {
            errors.push("search initial_divisions must be at least 1".to_string());
        }
        if !(self.search.min_half_width > 0.0) {
            errors.push("search min_half_width must be positive".to_string());
        }
        if self.search.tolerance < 0.0 {
            errors.push("search tolerance must be non-negative".to_string());
        }

        if let Err(e) = self.logging.validate() {
            errors.push(e);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum ConfigFormat {
    Json,
    Toml,
}

/// Load and validate `config_path`, falling back to defaults on any problem.
pub fn load_config_or_default(config_path: Option<&str>) -> Config {
    match config_path {
        Some(path) => match Config::load_from_file(path) {
            Ok(config) => {
                if let Err(errors) = config.validate() {
                    tracing::warn!(path, ?errors, "Invalid configuration, using defaults");
                    Config::default()
                } else {
                    config
                }
            }
            Err(e) => {
                tracing::warn!(path, error = %e, "Failed to load configuration, using defaults");
                Config::default()
            }
        },
        None => Config::default(),
    }
}
