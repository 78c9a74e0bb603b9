//! Service configuration.
//!
//! Handles loading, validating, and merging `folio.toml`. The file is a
//! sparse overlay on the stock defaults: it only needs the keys it wants to
//! change.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [storage]
//! root = "uploads"            # Directory of reference rasters
//!
//! [cache]
//! enabled = true
//! dir = ".folio-cache"        # Derivative cache directory
//! ttl_secs = 86400            # Lifetime of cached derivatives
//!
//! [encoding]
//! quality = 90                # JPEG/AVIF quality (1-100)
//! avif_speed = 6              # AVIF encoder speed (1 = slowest, 10 = fastest)
//! max_dimension = 8192        # Longest side a resize may produce
//!
//! [responsive]
//! breakpoints = [320, 480, 640, 768, 1024, 1280, 1536]
//! format = "webp"
//!
//! [rasterize]
//! target_width = 2000         # Pixel width of rendered PDF pages
//! # library_path = "/opt/pdfium/lib/libpdfium.so"
//!
//! [processing]
//! max_processes = 4           # Max parallel workers (omit for auto = CPU cores)
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use crate::imaging::{DEFAULT_MAX_DIMENSION, EncodeSettings, OutputFormat, Quality};
use crate::responsive::{DEFAULT_LADDER, ResponsiveSettings};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Default config file name, looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = "folio.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Configuration loaded from `folio.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FolioConfig {
    pub storage: StorageConfig,
    pub cache: CacheConfig,
    pub encoding: EncodingConfig,
    pub responsive: ResponsiveConfig,
    pub rasterize: RasterizeConfig,
    pub processing: ProcessingConfig,
}

impl FolioConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=100).contains(&self.encoding.quality) {
            return Err(ConfigError::Validation(
                "encoding.quality must be 1-100".into(),
            ));
        }
        if !(1..=10).contains(&self.encoding.avif_speed) {
            return Err(ConfigError::Validation(
                "encoding.avif_speed must be 1-10".into(),
            ));
        }
        if self.encoding.max_dimension == 0 {
            return Err(ConfigError::Validation(
                "encoding.max_dimension must be greater than zero".into(),
            ));
        }
        if self.cache.ttl_secs == 0 {
            return Err(ConfigError::Validation(
                "cache.ttl_secs must be greater than zero".into(),
            ));
        }
        let breakpoints = &self.responsive.breakpoints;
        if breakpoints.is_empty() {
            return Err(ConfigError::Validation(
                "responsive.breakpoints must not be empty".into(),
            ));
        }
        if breakpoints.contains(&0) {
            return Err(ConfigError::Validation(
                "responsive.breakpoints values must be non-zero".into(),
            ));
        }
        if breakpoints.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err(ConfigError::Validation(
                "responsive.breakpoints must be strictly ascending".into(),
            ));
        }
        if self.rasterize.target_width == 0 {
            return Err(ConfigError::Validation(
                "rasterize.target_width must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    pub fn encode_settings(&self) -> EncodeSettings {
        EncodeSettings {
            quality: Quality::new(self.encoding.quality),
            avif_speed: self.encoding.avif_speed,
            max_dimension: self.encoding.max_dimension,
        }
    }

    pub fn responsive_settings(&self) -> ResponsiveSettings {
        ResponsiveSettings {
            ladder: self.responsive.breakpoints.clone(),
            format: self.responsive.format,
        }
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_secs)
    }
}

/// Where reference rasters live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    pub root: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: "uploads".to_string(),
        }
    }
}

/// Derivative cache settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    pub enabled: bool,
    pub dir: String,
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: ".folio-cache".to_string(),
            ttl_secs: crate::cache::DEFAULT_TTL.as_secs(),
        }
    }
}

/// Encoder settings shared by every derivative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EncodingConfig {
    /// JPEG/AVIF quality (1-100). PNG, lossless WebP and TIFF ignore it.
    pub quality: u32,
    /// AVIF encoder speed (1-10).
    pub avif_speed: u8,
    /// Longest side, in pixels, a requested resize may produce.
    pub max_dimension: u32,
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            quality: 90,
            avif_speed: 6,
            max_dimension: DEFAULT_MAX_DIMENSION,
        }
    }
}

/// Responsive descriptor settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResponsiveConfig {
    /// Ascending breakpoint widths.
    pub breakpoints: Vec<u32>,
    /// Output format of every descriptor URL.
    pub format: OutputFormat,
}

impl Default for ResponsiveConfig {
    fn default() -> Self {
        Self {
            breakpoints: DEFAULT_LADDER.to_vec(),
            format: OutputFormat::WebP,
        }
    }
}

/// PDF rasterization settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RasterizeConfig {
    pub target_width: u32,
    /// pdfium shared library to bind. System search path when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub library_path: Option<String>,
}

impl Default for RasterizeConfig {
    fn default() -> Self {
        Self {
            target_width: 2000,
            library_path: None,
        }
    }
}

/// Parallel processing settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum number of parallel prewarm workers.
    /// When absent, defaults to the number of CPU cores.
    /// Values larger than the core count are clamped down.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_processes: Option<usize>,
}

/// Resolve the effective thread count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_threads(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config
        .max_processes
        .map(|n| n.clamp(1, cores))
        .unwrap_or(cores)
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    Ok(toml::Value::try_from(FolioConfig::default())?)
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load a config file as a raw TOML value.
///
/// Returns `Ok(None)` if the file does not exist.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<FolioConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: FolioConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load config from the file at `path`, falling back to the stock defaults
/// when it does not exist.
pub fn load_config(path: &Path) -> Result<FolioConfig, ConfigError> {
    let base = stock_defaults_value()?;
    let overlay = load_raw_config(path)?;
    resolve_config(base, overlay)
}

/// Returns a fully-commented stock `folio.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# folio configuration
# ===================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults.
# Unknown keys will cause an error.

# ---------------------------------------------------------------------------
# Reference raster storage
# ---------------------------------------------------------------------------
[storage]
# Directory holding one <id>.png per converted PDF page.
root = "uploads"

# ---------------------------------------------------------------------------
# Derivative cache
# ---------------------------------------------------------------------------
[cache]
# Set to false to re-encode every request.
enabled = true

# Directory of cached derivatives (one file per cache key).
dir = ".folio-cache"

# Lifetime of a cached derivative, in seconds. Also sent as max-age.
ttl_secs = 86400

# ---------------------------------------------------------------------------
# Encoding
# ---------------------------------------------------------------------------
[encoding]
# JPEG/AVIF quality (1 = worst, 100 = best). PNG, WebP and TIFF are lossless.
quality = 90

# AVIF encoder speed (1 = slowest/smallest, 10 = fastest).
avif_speed = 6

# Longest side, in pixels, a requested resize may produce. Larger requests
# are rejected as invalid geometry.
max_dimension = 8192

# ---------------------------------------------------------------------------
# Responsive images
# ---------------------------------------------------------------------------
[responsive]
# Breakpoint widths advertised in srcset, strictly ascending.
breakpoints = [320, 480, 640, 768, 1024, 1280, 1536]

# Output format of srcset URLs: webp, png, jpeg, avif or tiff.
format = "webp"

# ---------------------------------------------------------------------------
# PDF rasterization
# ---------------------------------------------------------------------------
[rasterize]
# Pixel width PDF pages are rendered at.
target_width = 2000

# pdfium shared library to load. Omit to use the system search path.
# library_path = "/opt/pdfium/lib/libpdfium.so"

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Maximum parallel workers for prewarming.
# Omit or comment out to auto-detect (= number of CPU cores).
# max_processes = 4
"##
}
