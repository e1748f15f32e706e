//! Tiered configuration loading.
//!
//! Tiers, lowest to highest: embedded defaults, project `config.yaml`, user
//! `config.yaml`, the file named by `TASKDECK_CONFIG_PATH`, then individual
//! environment overrides. YAML tiers are merged key by key.

use super::types::Config;
use anyhow::{Context, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const ENV_CONFIG_PATH: &str = "TASKDECK_CONFIG_PATH";
pub const ENV_DB_PATH: &str = "TASKDECK_DB_PATH";
pub const ENV_MAX_FILE_BYTES: &str = "TASKDECK_MAX_FILE_BYTES";
pub const ENV_USER: &str = "TASKDECK_USER";

const CONFIG_FILE: &str = "config.yaml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConfigTier {
    Defaults,
    Project,
    User,
    Explicit,
    Environment,
}

impl std::fmt::Display for ConfigTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ConfigTier::Defaults => "defaults",
            ConfigTier::Project => "project",
            ConfigTier::User => "user",
            ConfigTier::Explicit => "explicit",
            ConfigTier::Environment => "environment",
        })
    }
}

/// Recursively overlay `overlay` onto `base`. Objects merge per key; any
/// other value replaces the base, except `null`, which leaves it alone.
pub fn deep_merge(base: &mut Value, overlay: Value) {
    match overlay {
        Value::Null => {}
        Value::Object(entries) => {
            if let Value::Object(target) = base {
                for (key, value) in entries {
                    match target.get_mut(&key) {
                        Some(existing) => deep_merge(existing, value),
                        None => {
                            target.insert(key, value);
                        }
                    }
                }
            } else {
                *base = Value::Object(entries);
            }
        }
        other => *base = other,
    }
}

/// Where each file tier is looked for.
#[derive(Debug, Clone, Default)]
pub struct ConfigPaths {
    /// Directory holding the project `config.yaml` (default `./taskdeck`).
    pub project_dir: Option<PathBuf>,
    /// Directory holding the user `config.yaml` (default `~/.taskdeck`).
    pub user_dir: Option<PathBuf>,
    /// Explicit config file, merged above the user tier.
    pub explicit_file: Option<PathBuf>,
}

impl ConfigPaths {
    pub fn discover() -> Self {
        Self {
            project_dir: Some(PathBuf::from("taskdeck")),
            user_dir: dirs::home_dir().map(|home| home.join(".taskdeck")),
            explicit_file: std::env::var_os(ENV_CONFIG_PATH).map(PathBuf::from),
        }
    }

    pub fn with_dirs(project_dir: Option<PathBuf>, user_dir: Option<PathBuf>) -> Self {
        Self {
            project_dir,
            user_dir,
            explicit_file: None,
        }
    }

    pub fn with_explicit_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.explicit_file = Some(path.into());
        self
    }
}

/// Loaded configuration plus where it came from.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    pub paths: ConfigPaths,
    config: Config,
    sources: Vec<(ConfigTier, PathBuf)>,
}

/// Read an optional tier file. Missing or malformed files are skipped.
fn read_tier(path: &Path, tier: ConfigTier) -> Option<Value> {
    if !path.exists() {
        return None;
    }
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            warn!(tier = %tier, path = %path.display(), error = %e, "Skipping unreadable config");
            return None;
        }
    };
    match serde_yaml::from_str::<Value>(&content) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(tier = %tier, path = %path.display(), error = %e, "Skipping malformed config");
            None
        }
    }
}

impl ConfigLoader {
    /// Load from explicit paths, reading overrides through `env`.
    pub fn load_with<F>(paths: ConfigPaths, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut merged = serde_json::to_value(Config::default())?;
        let mut sources = Vec::new();

        let file_tiers = [
            (ConfigTier::Project, paths.project_dir.as_ref().map(|d| d.join(CONFIG_FILE))),
            (ConfigTier::User, paths.user_dir.as_ref().map(|d| d.join(CONFIG_FILE))),
        ];
        for (tier, path) in file_tiers {
            let Some(path) = path else { continue };
            if let Some(value) = read_tier(&path, tier) {
                debug!(tier = %tier, path = %path.display(), "Loaded config tier");
                deep_merge(&mut merged, value);
                sources.push((tier, path));
            }
        }

        // The explicit file was asked for by name, so it must load.
        if let Some(path) = &paths.explicit_file {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            let value: Value = serde_yaml::from_str(&content)
                .with_context(|| format!("Invalid config file {}", path.display()))?;
            deep_merge(&mut merged, value);
            sources.push((ConfigTier::Explicit, path.clone()));
        }

        let mut config: Config =
            serde_json::from_value(merged).context("Invalid merged configuration")?;
        Self::apply_env_overrides(&mut config, &env)?;

        Ok(Self {
            paths,
            config,
            sources,
        })
    }

    fn apply_env_overrides<F>(config: &mut Config, env: &F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(db_path) = env(ENV_DB_PATH) {
            config.store.db_path = PathBuf::from(db_path);
        }
        if let Some(max) = env(ENV_MAX_FILE_BYTES) {
            config.import.max_file_bytes = max
                .trim()
                .parse()
                .with_context(|| format!("{} must be a byte count, got {:?}", ENV_MAX_FILE_BYTES, max))?;
        }
        if let Some(user) = env(ENV_USER).filter(|u| !u.trim().is_empty()) {
            config.session.default_user = Some(user);
        }
        Ok(())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    pub fn into_config(self) -> Config {
        self.config
    }

    /// Files that contributed, lowest tier first.
    pub fn sources(&self) -> &[(ConfigTier, PathBuf)] {
        &self.sources
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn write(dir: &Path, content: &str) {
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(dir.join(CONFIG_FILE), content).unwrap();
    }

    #[test]
    fn test_deep_merge_objects_and_nulls() {
        let mut base = json!({"store": {"db_path": "a.db", "poll_interval_ms": 500}, "list": [1, 2]});
        deep_merge(
            &mut base,
            json!({"store": {"db_path": "b.db", "poll_interval_ms": null}, "list": [3]}),
        );
        assert_eq!(
            base,
            json!({"store": {"db_path": "b.db", "poll_interval_ms": 500}, "list": [3]})
        );
    }

    #[test]
    fn test_defaults_only() {
        let temp = TempDir::new().unwrap();
        let paths = ConfigPaths::with_dirs(
            Some(temp.path().join("project")),
            Some(temp.path().join("user")),
        );
        let loader = ConfigLoader::load_with(paths, no_env).unwrap();
        assert_eq!(loader.config(), &Config::default());
        assert!(loader.sources().is_empty());
    }

    #[test]
    fn test_user_overrides_project_field_by_field() {
        let temp = TempDir::new().unwrap();
        let project = temp.path().join("project");
        let user = temp.path().join("user");
        write(&project, "import:\n  max_file_bytes: 2048\n  placeholder_for_binary: false\n");
        write(&user, "import:\n  max_file_bytes: 4096\n");

        let loader =
            ConfigLoader::load_with(ConfigPaths::with_dirs(Some(project), Some(user)), no_env)
                .unwrap();
        assert_eq!(loader.config().import.max_file_bytes, 4096);
        assert!(!loader.config().import.placeholder_for_binary);
        assert_eq!(loader.sources().len(), 2);
    }

    #[test]
    fn test_explicit_file_and_env_win() {
        let temp = TempDir::new().unwrap();
        let user = temp.path().join("user");
        write(&user, "session:\n  default_user: alice\nstore:\n  db_path: user.db\n");
        let explicit = temp.path().join("explicit.yaml");
        std::fs::write(&explicit, "store:\n  db_path: explicit.db\n").unwrap();

        let paths = ConfigPaths::with_dirs(None, Some(user)).with_explicit_file(&explicit);
        let loader = ConfigLoader::load_with(paths, |key| match key {
            ENV_USER => Some("bob".to_string()),
            _ => None,
        })
        .unwrap();

        assert_eq!(loader.config().store.db_path, PathBuf::from("explicit.db"));
        assert_eq!(loader.config().session.default_user.as_deref(), Some("bob"));
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let temp = TempDir::new().unwrap();
        let paths = ConfigPaths::default().with_explicit_file(temp.path().join("missing.yaml"));
        assert!(ConfigLoader::load_with(paths, no_env).is_err());
    }

    #[test]
    fn test_malformed_tier_is_skipped() {
        let temp = TempDir::new().unwrap();
        let project = temp.path().join("project");
        write(&project, "import: [unclosed");
        let loader =
            ConfigLoader::load_with(ConfigPaths::with_dirs(Some(project), None), no_env).unwrap();
        assert_eq!(loader.config(), &Config::default());
    }

    #[test]
    fn test_bad_max_file_bytes_env() {
        let result = ConfigLoader::load_with(ConfigPaths::default(), |key| {
            (key == ENV_MAX_FILE_BYTES).then(|| "lots".to_string())
        });
        assert!(result.is_err());
    }
}
