use anyhow::{Context, Result};
use facemood_core::{MatchStrategy, DEFAULT_DESCRIPTOR_DIM, DEFAULT_MATCH_THRESHOLD};
use facemood_store::BackendKind;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// CLI configuration: defaults, then an optional TOML file, then `FACEMOOD_*` variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Persistence backend for the people store.
    pub backend: BackendKind,
    /// Location of the JSON document or SQLite database.
    pub store_path: PathBuf,
    /// Euclidean distance under which a face matches an enrolled person.
    pub match_threshold: f32,
    pub match_strategy: MatchStrategy,
    /// Required descriptor length; `None` accepts whatever the first person has.
    pub descriptor_dim: Option<usize>,
    /// Directory where the external face model writes `<image stem>.json`.
    pub inference_dir: PathBuf,
}

/// Keys accepted in the TOML config file. All optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    backend: Option<BackendKind>,
    store_path: Option<PathBuf>,
    match_threshold: Option<f32>,
    match_strategy: Option<MatchStrategy>,
    descriptor_dim: Option<usize>,
    inference_dir: Option<PathBuf>,
}

impl Config {
    /// Load from the process environment and the config file it points to.
    pub fn load() -> Result<Self> {
        let env = |key: &str| std::env::var(key).ok();
        let data_dir = data_dir(&env);

        let config_path = env("FACEMOOD_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("config.toml"));
        let file = read_file_config(&config_path)?;

        Ok(Self::from_sources(&data_dir, file, &env))
    }

    fn from_sources(
        data_dir: &Path,
        file: FileConfig,
        env: &dyn Fn(&str) -> Option<String>,
    ) -> Self {
        let backend = env_parse(env, "FACEMOOD_BACKEND").unwrap_or(file.backend.unwrap_or_default());

        let store_path = env("FACEMOOD_STORE_PATH")
            .map(PathBuf::from)
            .or(file.store_path)
            .unwrap_or_else(|| data_dir.join(backend.default_file_name()));

        let descriptor_dim = env_parse::<usize>(env, "FACEMOOD_DESCRIPTOR_DIM")
            .or(file.descriptor_dim)
            .unwrap_or(DEFAULT_DESCRIPTOR_DIM);

        Self {
            backend,
            store_path,
            match_threshold: env_parse(env, "FACEMOOD_MATCH_THRESHOLD")
                .filter(|&t| usable_threshold("FACEMOOD_MATCH_THRESHOLD", t))
                .or(file.match_threshold.filter(|&t| usable_threshold("match_threshold", t)))
                .unwrap_or(DEFAULT_MATCH_THRESHOLD),
            match_strategy: env_parse(env, "FACEMOOD_MATCH_STRATEGY")
                .or(file.match_strategy)
                .unwrap_or_default(),
            // 0 disables the check.
            descriptor_dim: (descriptor_dim > 0).then_some(descriptor_dim),
            inference_dir: env("FACEMOOD_INFERENCE_DIR")
                .map(PathBuf::from)
                .or(file.inference_dir)
                .unwrap_or_else(|| data_dir.join("inference")),
        }
    }
}

fn data_dir(env: &dyn Fn(&str) -> Option<String>) -> PathBuf {
    env("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            let home = env("HOME").unwrap_or_else(|| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facemood")
}

fn read_file_config(path: &Path) -> Result<FileConfig> {
    if !path.exists() {
        return Ok(FileConfig::default());
    }
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    let file = toml::from_str(&text)
        .with_context(|| format!("parsing config file {}", path.display()))?;
    tracing::debug!(path = %path.display(), "loaded config file");
    Ok(file)
}

/// Parse an env var, ignoring (with a warning) values that do not parse.
fn env_parse<T>(env: &dyn Fn(&str) -> Option<String>, key: &str) -> Option<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = env(key)?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(key, value = %raw, error = %e, "ignoring invalid setting");
            None
        }
    }
}

/// Distances are never negative, so a threshold must be finite and above zero
/// for anything to match.
fn usable_threshold(key: &str, threshold: f32) -> bool {
    let usable = threshold.is_finite() && threshold > 0.0;
    if !usable {
        tracing::warn!(key, value = threshold, "ignoring invalid setting");
    }
    usable
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let env = env_of(&[]);
        let config = Config::from_sources(Path::new("/data"), FileConfig::default(), &env);
        assert_eq!(config.backend, BackendKind::Json);
        assert_eq!(config.store_path, PathBuf::from("/data/people.json"));
        assert_eq!(config.match_threshold, 0.6);
        assert_eq!(config.match_strategy, MatchStrategy::First);
        assert_eq!(config.descriptor_dim, Some(128));
        assert_eq!(config.inference_dir, PathBuf::from("/data/inference"));
    }

    #[test]
    fn test_env_overrides_file() {
        let file: FileConfig = toml::from_str(
            r#"
            backend = "sqlite"
            match_threshold = 0.5
            match_strategy = "nearest"
            "#,
        )
        .unwrap();
        let env = env_of(&[("FACEMOOD_MATCH_THRESHOLD", "0.45"), ("FACEMOOD_DESCRIPTOR_DIM", "0")]);
        let config = Config::from_sources(Path::new("/data"), file, &env);

        assert_eq!(config.backend, BackendKind::Sqlite);
        assert_eq!(config.store_path, PathBuf::from("/data/people.db"));
        assert_eq!(config.match_threshold, 0.45);
        assert_eq!(config.match_strategy, MatchStrategy::Nearest);
        assert_eq!(config.descriptor_dim, None);
    }

    #[test]
    fn test_invalid_env_value_falls_back() {
        let env = env_of(&[("FACEMOOD_MATCH_THRESHOLD", "close"), ("FACEMOOD_BACKEND", "mongo")]);
        let config = Config::from_sources(Path::new("/data"), FileConfig::default(), &env);
        assert_eq!(config.match_threshold, 0.6);
        assert_eq!(config.backend, BackendKind::Json);
    }

    #[test]
    fn test_unusable_threshold_falls_back() {
        for bad in ["NaN", "-0.5", "0", "inf"] {
            let env = env_of(&[("FACEMOOD_MATCH_THRESHOLD", bad)]);
            let config = Config::from_sources(Path::new("/data"), FileConfig::default(), &env);
            assert_eq!(config.match_threshold, 0.6, "{bad}");
        }

        let file: FileConfig = toml::from_str("match_threshold = -1.0").unwrap();
        let env = env_of(&[("FACEMOOD_MATCH_THRESHOLD", "nan")]);
        let config = Config::from_sources(Path::new("/data"), file, &env);
        assert_eq!(config.match_threshold, 0.6);

        let file: FileConfig = toml::from_str("match_threshold = 0.4").unwrap();
        let env = env_of(&[("FACEMOOD_MATCH_THRESHOLD", "-2")]);
        let config = Config::from_sources(Path::new("/data"), file, &env);
        assert_eq!(config.match_threshold, 0.4);
    }

    #[test]
    fn test_data_dir_from_xdg_or_home() {
        assert_eq!(
            data_dir(&env_of(&[("XDG_DATA_HOME", "/xdg")])),
            PathBuf::from("/xdg/facemood")
        );
        assert_eq!(
            data_dir(&env_of(&[("HOME", "/home/me")])),
            PathBuf::from("/home/me/.local/share/facemood")
        );
    }

    #[test]
    fn test_file_rejects_unknown_keys() {
        assert!(toml::from_str::<FileConfig>("threshold = 0.5").is_err());
    }

    #[test]
    fn test_read_missing_file_is_default() {
        let file = read_file_config(Path::new("/nonexistent/facemood.toml")).unwrap();
        assert!(file.backend.is_none());
    }
}
