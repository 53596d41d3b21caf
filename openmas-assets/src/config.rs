use std::collections::HashSet;
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::error::AssetError;
use crate::utils::checksum::parse_checksum;

/// Environment variable overriding the default cache root.
pub const ASSETS_DIR_ENV: &str = "OPENMAS_ASSETS_DIR";

/// Filename used when the source does not provide one.
pub const DEFAULT_FILENAME: &str = "asset";

/// Kind of location an asset is fetched from.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::AsRefStr,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SourceType {
    Http,
    Hf,
    Local,
}

/// Archive format of an asset that gets unpacked after download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
pub enum UnpackFormat {
    #[serde(rename = "zip")]
    #[strum(serialize = "zip")]
    Zip,
    #[serde(rename = "tar")]
    #[strum(serialize = "tar")]
    Tar,
    #[serde(rename = "tar.gz")]
    #[strum(serialize = "tar.gz")]
    TarGz,
}

impl FromStr for UnpackFormat {
    type Err = AssetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "zip" => Ok(Self::Zip),
            "tar" => Ok(Self::Tar),
            "tar.gz" => Ok(Self::TarGz),
            other => Err(AssetError::unpack(format!(
                "Unsupported archive format: '{}' (expected zip, tar or tar.gz)",
                other
            ))),
        }
    }
}

/// Repository kind on the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum HfRepoType {
    #[default]
    Model,
    Dataset,
    Space,
}

fn default_true() -> bool {
    true
}

fn default_revision() -> String {
    "main".to_string()
}

fn default_version() -> String {
    "latest".to_string()
}

fn default_asset_type() -> String {
    "model".to_string()
}

/// Plain HTTP(S) download.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpSource {
    pub url: String,
    /// Name to store the file under (defaults to the last URL segment)
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default = "default_true")]
    pub progress_report: bool,
    /// Overrides the downloader's progress log interval
    #[serde(default)]
    pub progress_report_interval_mb: Option<f64>,
}

impl HttpSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            filename: None,
            progress_report: true,
            progress_report_interval_mb: None,
        }
    }

    #[must_use]
    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    #[must_use]
    pub fn with_progress_report(mut self, enabled: bool) -> Self {
        self.progress_report = enabled;
        self
    }
}

/// File (or whole repository snapshot) from a Hugging Face style hub.
#[derive(Debug, Clone, Deserialize)]
pub struct HfSource {
    pub repo_id: String,
    /// File inside the repository. When absent the whole repository is fetched.
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default = "default_revision")]
    pub revision: String,
    #[serde(default)]
    pub token: Option<SecretString>,
    #[serde(default)]
    pub repo_type: HfRepoType,
    #[serde(default = "default_true")]
    pub progress_report: bool,
}

impl HfSource {
    pub fn new(repo_id: impl Into<String>) -> Self {
        Self {
            repo_id: repo_id.into(),
            filename: None,
            revision: default_revision(),
            token: None,
            repo_type: HfRepoType::Model,
            progress_report: true,
        }
    }

    #[must_use]
    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    #[must_use]
    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = revision.into();
        self
    }

    #[must_use]
    pub fn with_progress_report(mut self, enabled: bool) -> Self {
        self.progress_report = enabled;
        self
    }
}

/// File or directory already present on the local filesystem.
#[derive(Debug, Clone, Deserialize)]
pub struct LocalSource {
    pub path: PathBuf,
    #[serde(default)]
    pub filename: Option<String>,
}

impl LocalSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            filename: None,
        }
    }
}

/// Where an asset comes from, discriminated by `type` in configuration files.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AssetSourceConfig {
    Http(HttpSource),
    Hf(HfSource),
    Local(LocalSource),
}

impl From<HttpSource> for AssetSourceConfig {
    fn from(source: HttpSource) -> Self {
        Self::Http(source)
    }
}

impl From<HfSource> for AssetSourceConfig {
    fn from(source: HfSource) -> Self {
        Self::Hf(source)
    }
}

impl From<LocalSource> for AssetSourceConfig {
    fn from(source: LocalSource) -> Self {
        Self::Local(source)
    }
}

impl AssetSourceConfig {
    pub fn http(url: impl Into<String>) -> Self {
        Self::Http(HttpSource::new(url))
    }

    pub fn hf(repo_id: impl Into<String>) -> Self {
        Self::Hf(HfSource::new(repo_id))
    }

    pub fn local(path: impl Into<PathBuf>) -> Self {
        Self::Local(LocalSource::new(path))
    }

    pub fn source_type(&self) -> SourceType {
        match self {
            Self::Http(_) => SourceType::Http,
            Self::Hf(_) => SourceType::Hf,
            Self::Local(_) => SourceType::Local,
        }
    }

    /// Human-readable location used in logs and error diagnostics.
    pub fn source_info(&self) -> String {
        match self {
            Self::Http(s) => s.url.clone(),
            Self::Hf(s) => match &s.filename {
                Some(filename) => format!("{}/{}", s.repo_id, filename),
                None => s.repo_id.clone(),
            },
            Self::Local(s) => s.path.display().to_string(),
        }
    }

    /// Name of the file the asset is stored under inside its cache directory.
    pub fn filename(&self) -> String {
        let name = match self {
            Self::Http(s) => s
                .filename
                .as_deref()
                .and_then(last_segment)
                .or_else(|| url_last_segment(&s.url)),
            Self::Hf(s) => s
                .filename
                .as_deref()
                .and_then(last_segment)
                .or_else(|| last_segment(&s.repo_id)),
            Self::Local(s) => s.filename.as_deref().and_then(last_segment),
        };
        name.unwrap_or(DEFAULT_FILENAME).to_string()
    }

    pub fn progress_report(&self) -> bool {
        match self {
            Self::Http(s) => s.progress_report,
            Self::Hf(s) => s.progress_report,
            Self::Local(_) => false,
        }
    }

    /// Check the required fields of the source kind.
    pub fn validate(&self) -> Result<(), AssetError> {
        match self {
            Self::Http(s) => {
                if s.url.trim().is_empty() {
                    return Err(AssetError::Configuration(
                        "'url' is required for http sources".to_string(),
                    ));
                }
                reqwest::Url::parse(&s.url).map_err(|e| {
                    AssetError::Configuration(format!("Invalid url '{}': {}", s.url, e))
                })?;
                if let Some(interval) = s.progress_report_interval_mb {
                    if !(interval > 0.0) {
                        return Err(AssetError::Configuration(format!(
                            "'progress_report_interval_mb' must be positive, got {}",
                            interval
                        )));
                    }
                }
            }
            Self::Hf(s) => {
                if s.repo_id.trim().is_empty() {
                    return Err(AssetError::Configuration(
                        "'repo_id' is required for hf sources".to_string(),
                    ));
                }
            }
            Self::Local(s) => {
                if s.path.as_os_str().is_empty() {
                    return Err(AssetError::Configuration(
                        "'path' is required for local sources".to_string(),
                    ));
                }
            }
        }
        // The stored name sits next to the metadata file and the unpack marker
        validate_path_component("filename", &self.filename())
    }
}

fn last_segment(s: &str) -> Option<&str> {
    s.rsplit(['/', '\\']).find(|seg| !seg.is_empty())
}

fn url_last_segment(url: &str) -> Option<&str> {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    let path = without_query
        .split_once("://")
        .map_or(without_query, |(_, rest)| rest);
    // The first segment is the host, never a filename
    match path.split_once('/') {
        Some((_, rest)) => last_segment(rest),
        None => None,
    }
}

/// One declared asset.
#[derive(Debug, Clone, Deserialize)]
pub struct AssetConfig {
    /// Unique key, used as a directory name in the cache
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    /// Free-form category ("model", "dataset", ...), used as a directory name
    #[serde(default = "default_asset_type")]
    pub asset_type: String,
    pub source: AssetSourceConfig,
    /// "sha256:<64 hex digits>"
    #[serde(default)]
    pub checksum: Option<String>,
    #[serde(default)]
    pub unpack: bool,
    #[serde(default)]
    pub unpack_format: Option<UnpackFormat>,
    #[serde(default)]
    pub description: Option<String>,
}

impl AssetConfig {
    pub fn new(name: impl Into<String>, source: impl Into<AssetSourceConfig>) -> Self {
        Self {
            name: name.into(),
            version: default_version(),
            asset_type: default_asset_type(),
            source: source.into(),
            checksum: None,
            unpack: false,
            unpack_format: None,
            description: None,
        }
    }

    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    #[must_use]
    pub fn with_asset_type(mut self, asset_type: impl Into<String>) -> Self {
        self.asset_type = asset_type.into();
        self
    }

    #[must_use]
    pub fn with_checksum(mut self, checksum: impl Into<String>) -> Self {
        self.checksum = Some(checksum.into());
        self
    }

    #[must_use]
    pub fn with_unpack(mut self, format: UnpackFormat) -> Self {
        self.unpack = true;
        self.unpack_format = Some(format);
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn validate(&self) -> Result<(), AssetError> {
        validate_path_component("name", &self.name)?;
        validate_path_component("version", &self.version)?;
        validate_path_component("asset_type", &self.asset_type)?;
        self.source.validate().map_err(|e| match e {
            AssetError::Configuration(msg) => {
                AssetError::Configuration(format!("Asset '{}': {}", self.name, msg))
            }
            other => other,
        })?;
        if let Some(checksum) = &self.checksum {
            parse_checksum(checksum).map_err(|e| {
                AssetError::Configuration(format!("Asset '{}': {}", self.name, e))
            })?;
        }
        if self.unpack && self.unpack_format.is_none() {
            return Err(AssetError::Configuration(format!(
                "Asset '{}': 'unpack_format' is required when 'unpack' is set",
                self.name
            )));
        }
        Ok(())
    }
}

/// Name, version, type and the stored filename end up as path components in the cache.
fn validate_path_component(field: &str, value: &str) -> Result<(), AssetError> {
    if value.trim().is_empty() {
        return Err(AssetError::Configuration(format!(
            "'{}' must not be empty",
            field
        )));
    }
    if value.contains(['/', '\\']) || value.starts_with('.') {
        return Err(AssetError::Configuration(format!(
            "'{}' must be a single path component without a leading dot, got '{}'",
            field, value
        )));
    }
    Ok(())
}

/// `settings.assets` section of the project configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AssetSettings {
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProjectSettings {
    #[serde(default)]
    pub assets: AssetSettings,
}

/// The parts of a project configuration the asset subsystem consumes.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProjectConfig {
    #[serde(default)]
    pub assets: Vec<AssetConfig>,
    #[serde(default)]
    pub settings: ProjectSettings,
}

impl ProjectConfig {
    pub fn new(assets: Vec<AssetConfig>) -> Self {
        Self {
            assets,
            settings: ProjectSettings::default(),
        }
    }

    #[must_use]
    pub fn with_cache_dir(mut self, cache_dir: impl Into<PathBuf>) -> Self {
        self.settings.assets.cache_dir = Some(cache_dir.into());
        self
    }

    /// Parse and validate a JSON project configuration.
    pub fn from_json_str(json: &str) -> Result<Self, AssetError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| AssetError::Configuration(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, AssetError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<(), AssetError> {
        let mut seen = HashSet::new();
        for asset in &self.assets {
            asset.validate()?;
            if !seen.insert(asset.name.as_str()) {
                return Err(AssetError::Configuration(format!(
                    "Asset '{}' is declared more than once",
                    asset.name
                )));
            }
        }
        Ok(())
    }
}

/// Resolve the cache root: settings, then `OPENMAS_ASSETS_DIR`, then `~/.openmas/assets`.
pub fn resolve_cache_dir(settings: &AssetSettings) -> Result<PathBuf, AssetError> {
    resolve_cache_dir_with(
        settings.cache_dir.as_deref(),
        std::env::var_os(ASSETS_DIR_ENV),
        dirs::home_dir(),
    )
}

fn resolve_cache_dir_with(
    configured: Option<&Path>,
    env_value: Option<OsString>,
    home: Option<PathBuf>,
) -> Result<PathBuf, AssetError> {
    if let Some(dir) = configured {
        return Ok(dir.to_path_buf());
    }
    if let Some(dir) = env_value.filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    home.map(|home| home.join(".openmas").join("assets"))
        .ok_or_else(|| {
            AssetError::Configuration(format!(
                "Cannot determine the home directory; set {} or settings.assets.cache_dir",
                ASSETS_DIR_ENV
            ))
        })
}

impl fmt::Display for AssetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{} ({})", self.name, self.version, self.asset_type)
    }
}
