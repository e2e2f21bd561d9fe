use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::schema::ResultSchema;
use crate::SweepError;

/// Grants the runner reflective access into the JDK core modules.
pub const DEFAULT_COMPATIBILITY_FLAGS: [&str; 4] = [
    "--add-opens=java.base/java.util=ALL-UNNAMED",
    "--add-opens=java.base/java.util.reflect=ALL-UNNAMED",
    "--add-opens=java.base/java.lang=ALL-UNNAMED",
    "--add-opens=java.base/java.lang.reflect=ALL-UNNAMED",
];

/// Lower and upper bound handed to the runner as `-min` / `-max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SizeBound {
    pub min: u32,
    pub max: u32,
}

impl fmt::Display for SizeBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.min, self.max)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SweepConfig {
    pub repeats: usize,
    pub frameworks: Vec<String>,
    pub noise_kinds: Vec<String>,
    pub noise_levels: Vec<String>,
    pub size_bounds: Vec<SizeBound>,
    pub query_limit: Option<u64>,
    pub targets_directory: PathBuf,
    /// Explicit target models. Empty means discover them under `targets_directory`.
    pub targets: Vec<PathBuf>,
    pub target_extension: String,
    pub runner_artifact_path: PathBuf,
    pub runtime_executable_path: PathBuf,
    pub compatibility_flags: Vec<String>,
    pub result_schema: ResultSchema,
    pub timeout_seconds: Option<u64>,
    pub base_seed: Option<u64>,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            repeats: 3,
            frameworks: vec!["MAT".to_string(), "PAR".to_string()],
            noise_kinds: vec![
                "INPUT".to_string(),
                "OUTPUT".to_string(),
                "MAPPING".to_string(),
            ],
            noise_levels: ["0.0", "0.1", "0.2", "0.3"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            size_bounds: Vec::new(),
            query_limit: Some(1_000_000),
            targets_directory: PathBuf::from("targets"),
            targets: Vec::new(),
            target_extension: "dot".to_string(),
            runner_artifact_path: PathBuf::from("runner.jar"),
            runtime_executable_path: PathBuf::from("java"),
            compatibility_flags: DEFAULT_COMPATIBILITY_FLAGS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            result_schema: ResultSchema::default(),
            timeout_seconds: None,
            base_seed: None,
        }
    }
}

impl SweepConfig {
    pub fn load(path: &Path) -> Result<Self, SweepError> {
        let raw = fs::read_to_string(path).map_err(|source| SweepError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: SweepConfig =
            serde_yaml::from_str(&raw).map_err(|source| SweepError::ConfigParse {
                path: path.to_path_buf(),
                source,
            })?;
        let base = path.parent().unwrap_or(Path::new("."));
        Ok(config.relative_to(base))
    }

    /// Anchors relative paths at `base` (the config file's directory). A bare
    /// runtime name such as `java` is left for `PATH` lookup.
    pub fn relative_to(mut self, base: &Path) -> Self {
        self.targets_directory = base.join(&self.targets_directory);
        self.targets = self.targets.iter().map(|t| base.join(t)).collect();
        if !self.runner_artifact_path.as_os_str().is_empty() {
            self.runner_artifact_path = base.join(&self.runner_artifact_path);
        }
        if self.runtime_executable_path.components().count() > 1 {
            self.runtime_executable_path = base.join(&self.runtime_executable_path);
        }
        self
    }

    pub fn validate(&self) -> Result<(), SweepError> {
        let mut problems = Vec::new();
        if self.repeats == 0 {
            problems.push("repeats must be at least 1".to_string());
        }
        if self.runner_artifact_path.as_os_str().is_empty() {
            problems.push("runner_artifact_path is empty".to_string());
        }
        if self.runtime_executable_path.as_os_str().is_empty() {
            problems.push("runtime_executable_path is empty".to_string());
        }
        if self.timeout_seconds == Some(0) {
            problems.push("timeout_seconds must be positive when set".to_string());
        }
        for bound in &self.size_bounds {
            if bound.min > bound.max {
                problems.push(format!("size bound {} has min > max", bound));
            }
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(SweepError::Config(problems.join("; ")))
        }
    }

    /// Target models in sweep order: the explicit list as given, otherwise every
    /// file under `targets_directory` carrying `target_extension`, sorted by path.
    pub fn resolve_targets(&self) -> Result<Vec<PathBuf>, SweepError> {
        if !self.targets.is_empty() {
            return Ok(self.targets.clone());
        }
        if !self.targets_directory.is_dir() {
            return Err(SweepError::Config(format!(
                "targets_directory not found: {}",
                self.targets_directory.display()
            )));
        }
        let mut targets = Vec::new();
        for entry in WalkDir::new(&self.targets_directory).follow_links(true) {
            let entry = entry.map_err(|err| {
                SweepError::Config(format!(
                    "failed to scan {}: {}",
                    self.targets_directory.display(),
                    err
                ))
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let matches = entry
                .path()
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| ext.eq_ignore_ascii_case(&self.target_extension))
                .unwrap_or(false);
            if matches {
                targets.push(entry.into_path());
            }
        }
        targets.sort();
        Ok(targets)
    }

    /// `sha256:<hex>` over the canonical json form of the resolved config.
    pub fn digest(&self) -> Result<String, SweepError> {
        let value = serde_json::to_value(self)?;
        let bytes = serde_json::to_vec(&value)?;
        Ok(format!("sha256:{}", hex::encode(Sha256::digest(&bytes))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "sweep_config_{}_{}_{}",
            tag,
            std::process::id(),
            Utc::now().timestamp_micros()
        ));
        fs::create_dir_all(&dir).expect("scratch dir");
        dir
    }

    #[test]
    fn defaults_match_the_benchmark_script() {
        let config = SweepConfig::default();
        assert_eq!(config.repeats, 3);
        assert_eq!(config.frameworks, vec!["MAT", "PAR"]);
        assert_eq!(config.noise_kinds, vec!["INPUT", "OUTPUT", "MAPPING"]);
        assert_eq!(config.noise_levels, vec!["0.0", "0.1", "0.2", "0.3"]);
        assert!(config.size_bounds.is_empty());
        assert_eq!(config.query_limit, Some(1_000_000));
        assert_eq!(config.compatibility_flags.len(), 4);
        assert_eq!(config.result_schema, ResultSchema::Flat);
        config.validate().expect("defaults are valid");
    }

    #[test]
    fn load_fills_missing_fields_with_defaults() {
        let dir = scratch_dir("load");
        let path = dir.join("sweep.yaml");
        fs::write(
            &path,
            "repeats: 5\nframeworks: [PAR]\nsize_bounds:\n  - { min: 10, max: 20 }\nresult_schema: nested\n",
        )
        .expect("write config");
        let config = SweepConfig::load(&path).expect("load config");
        assert_eq!(config.repeats, 5);
        assert_eq!(config.frameworks, vec!["PAR"]);
        assert_eq!(config.size_bounds, vec![SizeBound { min: 10, max: 20 }]);
        assert_eq!(config.result_schema, ResultSchema::Nested);
        assert_eq!(config.noise_kinds.len(), 3);
        assert_eq!(config.targets_directory, dir.join("targets"));
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn relative_paths_are_anchored_at_the_config_directory() {
        let config = SweepConfig {
            targets_directory: PathBuf::from("models"),
            targets: vec![PathBuf::from("a.dot"), PathBuf::from("/abs/b.dot")],
            runner_artifact_path: PathBuf::from("build/runner.jar"),
            runtime_executable_path: PathBuf::from("java"),
            ..SweepConfig::default()
        }
        .relative_to(Path::new("/srv/bench"));
        assert_eq!(config.targets_directory, PathBuf::from("/srv/bench/models"));
        assert_eq!(
            config.targets,
            vec![PathBuf::from("/srv/bench/a.dot"), PathBuf::from("/abs/b.dot")]
        );
        assert_eq!(
            config.runner_artifact_path,
            PathBuf::from("/srv/bench/build/runner.jar")
        );
        assert_eq!(config.runtime_executable_path, PathBuf::from("java"));

        let jdk = SweepConfig {
            runtime_executable_path: PathBuf::from("jdk/bin/java"),
            ..SweepConfig::default()
        }
        .relative_to(Path::new("/srv/bench"));
        assert_eq!(
            jdk.runtime_executable_path,
            PathBuf::from("/srv/bench/jdk/bin/java")
        );
    }

    #[test]
    fn example_config_is_valid() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../config/sweep.example.yaml");
        let config = SweepConfig::load(&path).expect("example config loads");
        config.validate().expect("example config validates");
        assert_eq!(config.size_bounds.len(), 2);
        assert_eq!(config.timeout_seconds, Some(3600));
        assert!(config.runner_artifact_path.ends_with("runner/learning-benchmark.jar"));
    }

    #[test]
    fn load_rejects_unknown_options() {
        let dir = scratch_dir("unknown");
        let path = dir.join("sweep.yaml");
        fs::write(&path, "repetitions: 5\n").expect("write config");
        let err = SweepConfig::load(&path).expect_err("typo must be rejected");
        assert!(matches!(err, SweepError::ConfigParse { .. }), "{}", err);
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn validate_reports_every_problem() {
        let config = SweepConfig {
            repeats: 0,
            runner_artifact_path: PathBuf::new(),
            size_bounds: vec![SizeBound { min: 30, max: 10 }],
            ..SweepConfig::default()
        };
        let msg = config.validate().expect_err("invalid").to_string();
        assert!(msg.contains("repeats"), "{}", msg);
        assert!(msg.contains("runner_artifact_path"), "{}", msg);
        assert!(msg.contains("30..10"), "{}", msg);
    }

    #[test]
    fn resolve_targets_discovers_sorted_models_recursively() {
        let dir = scratch_dir("targets");
        fs::create_dir_all(dir.join("nested")).expect("nested dir");
        fs::write(dir.join("b.dot"), "digraph {}").expect("b");
        fs::write(dir.join("a.DOT"), "digraph {}").expect("a");
        fs::write(dir.join("nested").join("c.dot"), "digraph {}").expect("c");
        fs::write(dir.join("notes.txt"), "ignore me").expect("notes");
        let config = SweepConfig {
            targets_directory: dir.clone(),
            ..SweepConfig::default()
        };
        let targets = config.resolve_targets().expect("targets");
        assert_eq!(
            targets,
            vec![dir.join("a.DOT"), dir.join("b.dot"), dir.join("nested").join("c.dot")]
        );
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn resolve_targets_prefers_explicit_list() {
        let config = SweepConfig {
            targets_directory: PathBuf::from("/definitely/not/here"),
            targets: vec![PathBuf::from("z.dot"), PathBuf::from("a.dot")],
            ..SweepConfig::default()
        };
        let targets = config.resolve_targets().expect("explicit targets");
        assert_eq!(targets, vec![PathBuf::from("z.dot"), PathBuf::from("a.dot")]);
    }

    #[test]
    fn resolve_targets_requires_existing_directory() {
        let config = SweepConfig {
            targets_directory: PathBuf::from("/definitely/not/here"),
            ..SweepConfig::default()
        };
        let err = config.resolve_targets().expect_err("missing dir");
        assert!(err.to_string().contains("targets_directory not found"), "{}", err);
    }

    #[test]
    fn digest_changes_with_config() {
        let a = SweepConfig::default();
        let b = SweepConfig {
            repeats: 4,
            ..SweepConfig::default()
        };
        let da = a.digest().expect("digest a");
        assert!(da.starts_with("sha256:"));
        assert_eq!(da, a.digest().expect("digest a again"));
        assert_ne!(da, b.digest().expect("digest b"));
    }
}
