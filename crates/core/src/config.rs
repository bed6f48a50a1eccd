//! Profiling configuration: TOML file plus environment overrides.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ProfileError, ProfileResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ProfileConfig {
    /// Callpaths deeper than this are folded into a collapse node.
    #[serde(default = "default_max_callpath_depth")]
    pub max_callpath_depth: u64,

    /// Upper bound on the number of calltree nodes of the whole profile.
    #[serde(default = "default_max_callpath_num")]
    pub max_callpath_num: u64,

    /// Memory available to all profile arenas, in bytes.
    #[serde(default = "default_total_memory")]
    pub total_memory: usize,

    /// Size of one arena page, in bytes.
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Write a `.core` dump of the failing location when profiling stops on an error.
    #[serde(default)]
    pub core_files: bool,

    /// Basename of files written by the profiling subsystem.
    #[serde(default = "default_basename")]
    pub basename: String,

    /// Directory receiving core files.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

fn default_max_callpath_depth() -> u64 {
    30
}

fn default_max_callpath_num() -> u64 {
    1_000_000_000
}

fn default_total_memory() -> usize {
    16_384_000
}

fn default_page_size() -> usize {
    8192
}

fn default_basename() -> String {
    "profile".to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            max_callpath_depth: default_max_callpath_depth(),
            max_callpath_num: default_max_callpath_num(),
            total_memory: default_total_memory(),
            page_size: default_page_size(),
            core_files: false,
            basename: default_basename(),
            output_dir: default_output_dir(),
        }
    }
}

impl ProfileConfig {
    /// Strict load: a missing or malformed file is an error.
    pub fn load(path: &Path) -> ProfileResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let cfg = toml::from_str::<ProfileConfig>(&text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Lenient load: falls back to defaults and logs why.
    pub fn load_optional(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(s) => match toml::from_str::<ProfileConfig>(&s) {
                Ok(cfg) => cfg,
                Err(err) => {
                    tracing::warn!("failed to parse config {}: {err}", path.display());
                    Self::default()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(err) => {
                tracing::warn!("failed to read config {}: {err}", path.display());
                Self::default()
            }
        }
    }

    /// Apply `CALLTREE_*` environment variables on top of this config.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        fn parse<T: std::str::FromStr>(key: &str, raw: Option<String>) -> Option<T> {
            let raw = raw?;
            match raw.trim().parse::<T>() {
                Ok(v) => Some(v),
                Err(_) => {
                    tracing::warn!("ignoring {key}={raw}: not a valid value");
                    None
                }
            }
        }

        const DEPTH: &str = "CALLTREE_MAX_CALLPATH_DEPTH";
        const NUM: &str = "CALLTREE_MAX_CALLPATH_NUM";
        const MEMORY: &str = "CALLTREE_TOTAL_MEMORY";
        const PAGE: &str = "CALLTREE_PAGE_SIZE";
        const CORE: &str = "CALLTREE_CORE_FILES";
        const BASENAME: &str = "CALLTREE_BASENAME";

        if let Some(v) = parse(DEPTH, lookup(DEPTH)) {
            self.max_callpath_depth = v;
        }
        if let Some(v) = parse(NUM, lookup(NUM)) {
            self.max_callpath_num = v;
        }
        if let Some(v) = parse(MEMORY, lookup(MEMORY)) {
            self.total_memory = v;
        }
        if let Some(v) = parse(PAGE, lookup(PAGE)) {
            self.page_size = v;
        }
        if let Some(v) = parse(CORE, lookup(CORE)) {
            self.core_files = v;
        }
        if let Some(name) = lookup(BASENAME).filter(|s| !s.is_empty()) {
            self.basename = name;
        }
        self
    }

    pub fn validate(&self) -> ProfileResult<()> {
        if self.page_size == 0 {
            return Err(ProfileError::Config("page_size must be positive".into()));
        }
        if self.total_memory < self.page_size {
            return Err(ProfileError::Config(format!(
                "total_memory ({}) is smaller than one page ({})",
                self.total_memory, self.page_size
            )));
        }
        Ok(())
    }

    /// Number of arena pages the whole profile may hold.
    pub fn max_pages(&self) -> usize {
        self.total_memory / self.page_size.max(1)
    }

    /// Path of the core file written for the given location.
    pub fn core_file_path(&self, location: u64) -> PathBuf {
        self.output_dir
            .join(format!("{}.{location}.core", self.basename))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg: ProfileConfig =
            toml::from_str("max_callpath_depth = 4\ncore_files = true\n").unwrap_or_default();
        assert_eq!(cfg.max_callpath_depth, 4);
        assert!(cfg.core_files);
        assert_eq!(cfg.page_size, 8192);
        assert_eq!(cfg.basename, "profile");
    }

    #[test]
    fn env_overrides_apply_and_skip_garbage() {
        let env: HashMap<&str, &str> = [
            ("CALLTREE_MAX_CALLPATH_NUM", "12"),
            ("CALLTREE_PAGE_SIZE", "not-a-number"),
            ("CALLTREE_BASENAME", "run"),
        ]
        .into_iter()
        .collect();
        let cfg = ProfileConfig::default().with_overrides(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.max_callpath_num, 12);
        assert_eq!(cfg.page_size, 8192);
        assert_eq!(cfg.basename, "run");
    }

    #[test]
    fn validate_rejects_tiny_memory() {
        let cfg = ProfileConfig {
            total_memory: 100,
            ..ProfileConfig::default()
        };
        assert!(cfg.validate().is_err());
        assert!(ProfileConfig::default().validate().is_ok());
        assert_eq!(ProfileConfig::default().max_pages(), 2000);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let cfg = ProfileConfig::load_optional(Path::new("/nonexistent/calltree.toml"));
        assert_eq!(cfg, ProfileConfig::default());
    }

    #[test]
    fn core_file_path_uses_basename() {
        let cfg = ProfileConfig {
            output_dir: PathBuf::from("/tmp/x"),
            ..ProfileConfig::default()
        };
        assert_eq!(cfg.core_file_path(3), PathBuf::from("/tmp/x/profile.3.core"));
    }
}
