use core::time::Duration;
use std::fs::{read_to_string, write};

use camino::{Utf8Path, Utf8PathBuf};
use eyre::{Result as EyreResult, WrapErr};
use serde::{Deserialize, Serialize};

pub const CONFIG_FILE: &str = "config.toml";

/// Bytes per brick when a file is written in chunks.
pub const DEFAULT_CHUNK_SIZE: usize = 1 << 18; // 256 KiB

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[non_exhaustive]
pub struct ConfigFile {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    #[serde(default)]
    pub anchoring: AnchoringConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<StorageConfig>,
}

const fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            anchoring: AnchoringConfig::default(),
            cache: CacheConfig::default(),
            storage: None,
        }
    }
}

/// When and how pending changes are anchored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
#[non_exhaustive]
pub struct AnchoringConfig {
    /// Anchor after each write, outside of batches.
    pub auto_anchor: bool,
    /// Anchor only once this many operations are pending.
    pub min_pending_operations: usize,
    /// Take the previous pointer from the backend instead of from the last
    /// anchor this writer confirmed.
    pub recovery_mode: bool,
    pub conflicts: ConflictsConfig,
}

impl Default for AnchoringConfig {
    fn default() -> Self {
        Self {
            auto_anchor: true,
            min_pending_operations: 1,
            recovery_mode: false,
            conflicts: ConflictsConfig::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
#[non_exhaustive]
pub struct ConflictsConfig {
    pub policy: ConflictPolicy,
}

/// What to do with pending local changes when the remote version moved on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Look for local operations that clash with the remote state.
    #[default]
    Detect,
    /// Skip detection and fold local changes onto the remote state.
    MineWins,
}

/// Bounds of the brick map history cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
#[non_exhaustive]
pub struct CacheConfig {
    pub capacity: usize,
    #[serde(rename = "ttl_ms", with = "serde_duration")]
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 64,
            ttl: Duration::from_secs(300),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[non_exhaustive]
pub struct StorageConfig {
    pub path: Utf8PathBuf,
}

impl StorageConfig {
    #[must_use]
    pub const fn new(path: Utf8PathBuf) -> Self {
        Self { path }
    }
}

impl ConfigFile {
    #[must_use]
    pub const fn new(
        chunk_size: usize,
        anchoring: AnchoringConfig,
        cache: CacheConfig,
        storage: Option<StorageConfig>,
    ) -> Self {
        Self {
            chunk_size,
            anchoring,
            cache,
            storage,
        }
    }

    #[must_use]
    pub fn exists(dir: &Utf8Path) -> bool {
        dir.join(CONFIG_FILE).is_file()
    }

    pub fn load(dir: &Utf8Path) -> EyreResult<Self> {
        let path = dir.join(CONFIG_FILE);
        let content = read_to_string(&path)
            .wrap_err_with(|| format!("failed to read configuration from {path:?}"))?;

        let config: Self = toml::from_str(&content)
            .wrap_err_with(|| format!("failed to parse configuration from {path:?}"))?;

        if config.chunk_size == 0 {
            eyre::bail!("chunk_size in {path:?} must be greater than zero");
        }

        Ok(config)
    }

    pub fn save(&self, dir: &Utf8Path) -> EyreResult<()> {
        let path = dir.join(CONFIG_FILE);
        let content = toml::to_string_pretty(self)?;

        write(&path, content)
            .wrap_err_with(|| format!("failed to write configuration to {path:?}"))?;

        Ok(())
    }

    /// Only write config file if changes are detected
    pub fn save_if_changed(&self, dir: &Utf8Path) -> EyreResult<bool> {
        let path = dir.join(CONFIG_FILE);
        let new_content = toml::to_string_pretty(self)?;

        let changed = match read_to_string(&path) {
            Ok(existing) => existing != new_content,
            Err(_) => true,
        };

        if changed {
            write(&path, new_content)
                .wrap_err_with(|| format!("failed to write configuration to {path:?}"))?;
        }

        Ok(changed)
    }
}

mod serde_duration {
    use core::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir() -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().to_owned()).unwrap();
        (dir, path)
    }

    #[test]
    fn test_missing_sections_take_defaults() {
        let config: ConfigFile = toml::from_str("chunk_size = 1024").unwrap();

        assert_eq!(config.chunk_size, 1024);
        assert_eq!(config.anchoring, AnchoringConfig::default());
        assert_eq!(config.cache.ttl, Duration::from_secs(300));
        assert!(config.storage.is_none());
    }

    #[test]
    fn test_parses_every_section() {
        let config: ConfigFile = toml::from_str(
            r#"
            chunk_size = 4096

            [anchoring]
            auto_anchor = false
            min_pending_operations = 10
            recovery_mode = true

            [anchoring.conflicts]
            policy = "mine_wins"

            [cache]
            capacity = 8
            ttl_ms = 1500

            [storage]
            path = "data/bricks"
            "#,
        )
        .unwrap();

        assert!(!config.anchoring.auto_anchor);
        assert_eq!(config.anchoring.min_pending_operations, 10);
        assert!(config.anchoring.recovery_mode);
        assert_eq!(config.anchoring.conflicts.policy, ConflictPolicy::MineWins);
        assert_eq!(config.cache.capacity, 8);
        assert_eq!(config.cache.ttl, Duration::from_millis(1500));
        assert_eq!(config.storage.unwrap().path, "data/bricks");
    }

    #[test]
    fn test_save_then_load() {
        let (_guard, dir) = temp_dir();
        assert!(!ConfigFile::exists(&dir));

        let mut config = ConfigFile::default();
        config.anchoring.conflicts.policy = ConflictPolicy::MineWins;
        config.storage = Some(StorageConfig::new("bricks".into()));
        config.save(&dir).unwrap();

        assert!(ConfigFile::exists(&dir));
        assert_eq!(ConfigFile::load(&dir).unwrap(), config);
        assert!(!config.save_if_changed(&dir).unwrap());

        config.chunk_size = 512;
        assert!(config.save_if_changed(&dir).unwrap());
    }

    #[test]
    fn test_zero_chunk_size_is_rejected() {
        let (_guard, dir) = temp_dir();
        write(dir.join(CONFIG_FILE), "chunk_size = 0").unwrap();

        assert!(ConfigFile::load(&dir).is_err());
    }
}
