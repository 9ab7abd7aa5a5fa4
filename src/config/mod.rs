use std::env;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

const APP_DOMAIN: &str = "io";
const APP_ORG: &str = "QuotesTui";
const APP_NAME: &str = "quotetui";

pub const DEFAULT_ENDPOINT: &str = "https://jsonplaceholder.typicode.com/posts";
pub const DEFAULT_SERVER_CATEGORY: &str = "Server";
pub const DEFAULT_EXPORT_FILE: &str = "quotes.json";

pub struct ConfigLoader {
    paths: ConfigPaths,
}

impl ConfigLoader {
    pub fn discover() -> Result<Self> {
        let paths = ConfigPaths::discover()?;
        Ok(Self { paths })
    }

    pub fn from_paths(paths: ConfigPaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &ConfigPaths {
        &self.paths
    }

    pub fn load_or_init(&self) -> Result<AppConfig> {
        self.paths.ensure_directories()?;
        if !self.paths.config_file.exists() {
            let mut default_cfg = AppConfig::default();
            default_cfg.post_load(&self.paths)?;
            self.write_default_config(&default_cfg)?;
            return Ok(default_cfg);
        }

        self.load()
    }

    pub fn load(&self) -> Result<AppConfig> {
        let raw = fs::read_to_string(&self.paths.config_file)
            .with_context(|| format!("reading config {}", self.paths.config_file.display()))?;
        let mut cfg: AppConfig = toml::from_str(&raw).context("parsing config toml")?;
        cfg.post_load(&self.paths)?;
        Ok(cfg)
    }

    fn write_default_config(&self, cfg: &AppConfig) -> Result<()> {
        let toml = toml::to_string_pretty(cfg).context("serializing default config")?;
        if let Some(parent) = self.paths.config_file.parent() {
            fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
        }
        let mut file = fs::File::create(&self.paths.config_file)
            .with_context(|| format!("creating config {}", self.paths.config_file.display()))?;
        file.write_all(toml.as_bytes())
            .context("writing default config")?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ConfigPaths {
    pub config_dir: PathBuf,
    pub config_file: PathBuf,
    pub data_dir: PathBuf,
    pub database_path: PathBuf,
    pub log_dir: PathBuf,
    pub state_dir: PathBuf,
    pub session_dir: PathBuf,
}

impl ConfigPaths {
    pub fn discover() -> Result<Self> {
        let override_config = env::var("QUOTETUI_CONFIG").ok().map(PathBuf::from);
        let override_data = env::var("QUOTETUI_DATA").ok().map(PathBuf::from);

        let project_dirs = ProjectDirs::from(APP_DOMAIN, APP_ORG, APP_NAME)
            .context("resolving XDG project directories")?;

        let config_dir = override_config
            .clone()
            .map(|p| {
                if p.is_dir() {
                    p
                } else {
                    p.parent().map(Path::to_path_buf).unwrap_or(p)
                }
            })
            .unwrap_or_else(|| project_dirs.config_dir().to_path_buf());

        let config_file = override_config
            .filter(|p| p.is_file() || p.extension().is_some())
            .unwrap_or_else(|| config_dir.join("config.toml"));

        let data_root = override_data.unwrap_or_else(|| project_dirs.data_dir().to_path_buf());
        let state_dir = project_dirs
            .state_dir()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| data_root.join("state"));

        Ok(Self::with_roots(config_dir, config_file, data_root, state_dir))
    }

    /// Lays out every derived path under explicit roots.
    pub fn with_roots(
        config_dir: PathBuf,
        config_file: PathBuf,
        data_dir: PathBuf,
        state_dir: PathBuf,
    ) -> Self {
        Self {
            database_path: data_dir.join("quotes.db"),
            log_dir: state_dir.join("logs"),
            session_dir: state_dir.join("sessions"),
            config_dir,
            config_file,
            data_dir,
            state_dir,
        }
    }

    pub fn under(root: &Path) -> Self {
        let config_dir = root.join("config");
        Self::with_roots(
            config_dir.clone(),
            config_dir.join("config.toml"),
            root.join("data"),
            root.join("state"),
        )
    }

    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [
            &self.config_dir,
            &self.data_dir,
            &self.log_dir,
            &self.state_dir,
            &self.session_dir,
        ] {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating application directory {}", dir.display()))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub storage: StorageOptions,
    pub sync: SyncOptions,
    pub session: SessionOptions,
    pub display: DisplayOptions,
}

impl AppConfig {
    fn post_load(&mut self, paths: &ConfigPaths) -> Result<()> {
        self.storage
            .resolve(paths)
            .context("resolving storage paths")?;
        self.sync.sanitize();
        if self.display.export_file_name.trim().is_empty() {
            tracing::warn!("empty export file name in config, using {DEFAULT_EXPORT_FILE}");
            self.display.export_file_name = DEFAULT_EXPORT_FILE.to_string();
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageOptions {
    #[serde(skip)]
    pub database_path: PathBuf,
    pub wal_autocheckpoint: u32,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            database_path: PathBuf::new(),
            wal_autocheckpoint: 1000,
        }
    }
}

impl StorageOptions {
    fn resolve(&mut self, paths: &ConfigPaths) -> Result<()> {
        if self.database_path.as_os_str().is_empty() {
            self.database_path = paths.database_path.clone();
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncOptions {
    pub enabled: bool,
    pub endpoint: String,
    /// Category assigned to every quote pulled from the endpoint
    pub server_category: String,
    pub pull_on_startup: bool,
    pub push_after_add: bool,
    pub push_interval_secs: u64,
    /// 0 disables the request timeout
    pub request_timeout_secs: u64,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            server_category: DEFAULT_SERVER_CATEGORY.to_string(),
            pull_on_startup: true,
            push_after_add: true,
            push_interval_secs: 60,
            request_timeout_secs: 0,
        }
    }
}

impl SyncOptions {
    pub fn push_interval(&self) -> Duration {
        Duration::from_secs(self.push_interval_secs)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        if self.request_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.request_timeout_secs))
        }
    }

    fn sanitize(&mut self) {
        if self.push_interval_secs == 0 {
            tracing::warn!("sync.push_interval_secs must be positive, falling back to 60");
            self.push_interval_secs = 60;
        }
        if self.endpoint.trim().is_empty() {
            tracing::warn!("empty sync endpoint in config, falling back to {DEFAULT_ENDPOINT}");
            self.endpoint = DEFAULT_ENDPOINT.to_string();
        }
        if self.server_category.trim().is_empty() {
            self.server_category = DEFAULT_SERVER_CATEGORY.to_string();
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionOptions {
    /// Session entries untouched for this many hours are discarded (0 = keep until ended)
    pub retention_hours: u64,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            retention_hours: 12,
        }
    }
}

impl SessionOptions {
    pub fn retention(&self) -> Option<time::Duration> {
        if self.retention_hours == 0 {
            None
        } else {
            Some(time::Duration::hours(self.retention_hours as i64))
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayOptions {
    pub show_category: bool,
    pub export_file_name: String,
}

impl Default for DisplayOptions {
    fn default() -> Self {
        Self {
            show_category: true,
            export_file_name: DEFAULT_EXPORT_FILE.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn load_or_init_writes_defaults_on_first_run() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let loader = ConfigLoader::from_paths(ConfigPaths::under(temp.path()));

        let cfg = loader.load_or_init()?;
        assert!(loader.paths().config_file.exists());
        assert_eq!(cfg.sync.push_interval_secs, 60);
        assert_eq!(cfg.sync.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(cfg.storage.database_path, loader.paths().database_path);

        let reloaded = loader.load()?;
        assert_eq!(reloaded.sync.server_category, DEFAULT_SERVER_CATEGORY);
        Ok(())
    }

    #[test]
    fn invalid_sync_values_are_corrected() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let paths = ConfigPaths::under(temp.path());
        paths.ensure_directories()?;
        fs::write(
            &paths.config_file,
            "[sync]\npush_interval_secs = 0\nendpoint = \"  \"\n",
        )?;

        let cfg = ConfigLoader::from_paths(paths).load()?;
        assert_eq!(cfg.sync.push_interval_secs, 60);
        assert_eq!(cfg.sync.endpoint, DEFAULT_ENDPOINT);
        assert!(cfg.sync.request_timeout().is_none());
        assert!(cfg.display.show_category);
        Ok(())
    }
}
