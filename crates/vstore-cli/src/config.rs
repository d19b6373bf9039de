use std::path::{Path, PathBuf};

use clap::ValueEnum;
use serde::Deserialize;
use vstore_checkpoint::{
    CheckpointError, CheckpointStore, JsonFileCheckpoints, RedbCheckpoints, SqliteCheckpoints,
};

/// Looked up in the working directory when `--config` is not given.
pub const DEFAULT_CONFIG: &str = "vstore.toml";

/// Contents of `vstore.toml`.
///
/// ```toml
/// [checkpoints]
/// backend = "sqlite"
/// path = "state/checkpoints.db"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CliConfig {
    pub checkpoints: CheckpointConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CheckpointConfig {
    pub backend: Backend,
    /// Defaults to a file named after the backend in the working directory.
    pub path: Option<PathBuf>,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Json,
            path: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Json,
    Sqlite,
    Redb,
}

impl Backend {
    fn default_path(self) -> &'static str {
        match self {
            Backend::Json => "vstore-checkpoints.json",
            Backend::Sqlite => "vstore-checkpoints.db",
            Backend::Redb => "vstore-checkpoints.redb",
        }
    }
}

impl CliConfig {
    pub fn parse(source: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(source)
    }

    /// Load `explicit` if given, else `vstore.toml` if it exists, else the
    /// defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, Box<dyn std::error::Error>> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => {
                let path = PathBuf::from(DEFAULT_CONFIG);
                if !path.exists() {
                    return Ok(Self::default());
                }
                path
            }
        };
        let source = std::fs::read_to_string(&path)
            .map_err(|e| format!("{}: {e}", path.display()))?;
        Ok(Self::parse(&source).map_err(|e| format!("{}: {e}", path.display()))?)
    }
}

impl CheckpointConfig {
    /// Apply command-line overrides.
    pub fn with_overrides(mut self, backend: Option<Backend>, path: Option<PathBuf>) -> Self {
        if let Some(backend) = backend {
            // A path chosen for another backend does not carry over.
            if backend != self.backend {
                self.path = None;
            }
            self.backend = backend;
        }
        if path.is_some() {
            self.path = path;
        }
        self
    }

    pub fn resolved_path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| PathBuf::from(self.backend.default_path()))
    }

    pub fn open(&self) -> Result<Box<dyn CheckpointStore>, CheckpointError> {
        let path = self.resolved_path();
        Ok(match self.backend {
            Backend::Json => Box::new(JsonFileCheckpoints::open(path)?),
            Backend::Sqlite => Box::new(SqliteCheckpoints::open(path)?),
            Backend::Redb => Box::new(RedbCheckpoints::open(path)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = CliConfig::parse("").unwrap();
        assert_eq!(config, CliConfig::default());
        assert_eq!(
            config.checkpoints.resolved_path(),
            PathBuf::from("vstore-checkpoints.json")
        );
    }

    #[test]
    fn parses_backend_and_path() {
        let config = CliConfig::parse(
            r#"
            [checkpoints]
            backend = "redb"
            path = "state/upgrades.redb"
            "#,
        )
        .unwrap();
        assert_eq!(config.checkpoints.backend, Backend::Redb);
        assert_eq!(
            config.checkpoints.resolved_path(),
            PathBuf::from("state/upgrades.redb")
        );
    }

    #[test]
    fn rejects_unknown_keys() {
        assert!(CliConfig::parse("[checkpoints]\nbakend = \"json\"\n").is_err());
        assert!(CliConfig::parse("[checkpoints]\nbackend = \"postgres\"\n").is_err());
    }

    #[test]
    fn flags_override_the_file() {
        let file = CheckpointConfig {
            backend: Backend::Json,
            path: Some(PathBuf::from("cp.json")),
        };

        let same = file.clone().with_overrides(Some(Backend::Json), None);
        assert_eq!(same.resolved_path(), PathBuf::from("cp.json"));

        let switched = file.clone().with_overrides(Some(Backend::Sqlite), None);
        assert_eq!(switched.resolved_path(), PathBuf::from("vstore-checkpoints.db"));

        let moved = file.with_overrides(None, Some(PathBuf::from("elsewhere.json")));
        assert_eq!(moved.backend, Backend::Json);
        assert_eq!(moved.resolved_path(), PathBuf::from("elsewhere.json"));
    }

    #[test]
    fn opens_the_configured_backend() {
        let dir = tempfile::tempdir().unwrap();
        for backend in [Backend::Json, Backend::Sqlite, Backend::Redb] {
            let config = CheckpointConfig {
                backend,
                path: Some(dir.path().join(backend.default_path())),
            };
            let store = config.open().unwrap();
            assert!(store.list().unwrap().is_empty());
        }
    }
}
