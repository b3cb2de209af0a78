//! Discovery of input and output rasters from an ISOFIT run directory

use crate::types::{CwcError, CwcResult};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

const STATE_TAG: &str = "_subs_state";
const REFLECTANCE_TAG: &str = "_rfl";
const WATER_TAG: &str = "_cwc";

#[derive(Debug, Deserialize)]
struct RunConfigFile {
    output: OutputSection,
}

#[derive(Debug, Deserialize)]
struct OutputSection {
    estimated_state_file: String,
}

/// Paths needed by one retrieval run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPaths {
    pub config_file: PathBuf,
    pub reflectance: PathBuf,
    pub output: PathBuf,
}

impl RunPaths {
    /// Resolve paths from `<run_dir>/config/*_modtran.json`.
    ///
    /// The first matching config in lexicographic order is used. `output`
    /// overrides the default `_cwc` sibling of the state file.
    pub fn discover<P: AsRef<Path>>(run_dir: P, output: Option<PathBuf>) -> CwcResult<Self> {
        let config_dir = run_dir.as_ref().join("config");
        let pattern = format!(
            "{}/*_modtran.json",
            glob::Pattern::escape(&config_dir.to_string_lossy())
        );
        log::info!("Run config pattern: {}", pattern);

        let mut matches: Vec<PathBuf> = glob::glob(&pattern)
            .map_err(|e| CwcError::Config(format!("Bad config pattern {}: {}", pattern, e)))?
            .filter_map(Result::ok)
            .collect();
        matches.sort();

        let config_file = matches.into_iter().next().ok_or_else(|| {
            CwcError::Config(format!(
                "No *_modtran.json config found in {}",
                config_dir.display()
            ))
        })?;

        Self::from_config_file(config_file, output)
    }

    pub fn from_config_file(config_file: PathBuf, output: Option<PathBuf>) -> CwcResult<Self> {
        let text = fs::read_to_string(&config_file)?;
        let config: RunConfigFile = serde_json::from_str(&text)?;
        let state = &config.output.estimated_state_file;

        if !state.contains(STATE_TAG) {
            return Err(CwcError::Config(format!(
                "Estimated state file '{}' does not contain '{}'",
                state, STATE_TAG
            )));
        }

        let reflectance = PathBuf::from(state.replace(STATE_TAG, REFLECTANCE_TAG));
        let output = output.unwrap_or_else(|| PathBuf::from(state.replace(STATE_TAG, WATER_TAG)));

        Ok(Self {
            config_file,
            reflectance,
            output,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(dir: &Path, name: &str, state: &str) {
        let config_dir = dir.join("config");
        fs::create_dir_all(&config_dir).unwrap();
        let body = format!(
            r#"{{"forward_model": {{"instrument": {{"integrations": 4}}}}, "output": {{"estimated_state_file": "{}"}}}}"#,
            state
        );
        fs::write(config_dir.join(name), body).unwrap();
    }

    #[test]
    fn test_discover_default_output() {
        let dir = tempfile::tempdir().unwrap();
        write_config(dir.path(), "b_modtran.json", "/data/other_subs_state");
        write_config(dir.path(), "a_modtran.json", "/data/scene_subs_state");
        fs::write(dir.path().join("config").join("a_surface.json"), "{}").unwrap();

        let paths = RunPaths::discover(dir.path(), None).unwrap();
        assert!(paths.config_file.ends_with("a_modtran.json"));
        assert_eq!(paths.reflectance, PathBuf::from("/data/scene_rfl"));
        assert_eq!(paths.output, PathBuf::from("/data/scene_cwc"));
    }

    #[test]
    fn test_output_override() {
        let dir = tempfile::tempdir().unwrap();
        write_config(dir.path(), "x_modtran.json", "/data/scene_subs_state");
        let paths = RunPaths::discover(dir.path(), Some(PathBuf::from("/tmp/ewt"))).unwrap();
        assert_eq!(paths.output, PathBuf::from("/tmp/ewt"));
    }

    #[test]
    fn test_missing_config_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = RunPaths::discover(dir.path(), None).unwrap_err();
        assert!(matches!(err, CwcError::Config(_)));
    }

    #[test]
    fn test_malformed_config() {
        let dir = tempfile::tempdir().unwrap();
        let config_dir = dir.path().join("config");
        fs::create_dir_all(&config_dir).unwrap();
        fs::write(config_dir.join("x_modtran.json"), r#"{"output": {}}"#).unwrap();
        let err = RunPaths::discover(dir.path(), None).unwrap_err();
        assert!(matches!(err, CwcError::Json(_)));
    }
}
