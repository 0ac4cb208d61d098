// Copyright (c) Test Tube Contributors
// SPDX-License-Identifier: Apache-2.0

//! Loading of YAML configuration files.

use std::path::{Path, PathBuf};

use anyhow::Context;
use itertools::Itertools;
use serde::de::DeserializeOwned;

/// Load the config from a YAML file located at the provided path.
pub fn load_from_yaml<P: AsRef<Path>, T: DeserializeOwned>(path: P) -> anyhow::Result<T> {
    let path = path.as_ref();
    tracing::debug!(path = %path.display(), "[load_from_yaml] reading from file");

    let reader = std::fs::File::open(path).with_context(|| {
        format!(
            "[load_from_yaml] unable to load config from {}",
            path.display()
        )
    })?;

    serde_yaml::from_reader(reader)
        .with_context(|| format!("[load_from_yaml] invalid config in {}", path.display()))
}

/// Returns the directories searched for configuration files of the application `app_name`.
///
/// In order: the working directory, `$XDG_CONFIG_HOME/<app_name>`, `~/.config/<app_name>`, and
/// `~/.<app_name>`.
pub fn default_config_directories(app_name: &str) -> Vec<PathBuf> {
    let mut directories = vec![PathBuf::from(".")];
    if let Ok(xdg_config_dir) = std::env::var("XDG_CONFIG_HOME") {
        directories.push(PathBuf::from(xdg_config_dir).join(app_name));
    }
    if let Some(home_dir) = home::home_dir() {
        directories.push(home_dir.join(".config").join(app_name));
        directories.push(home_dir.join(format!(".{app_name}")));
    }
    directories
}

/// Combines every directory with every file name.
pub fn default_config_paths(app_name: &str, file_names: &[&str]) -> Vec<PathBuf> {
    default_config_directories(app_name)
        .into_iter()
        .cartesian_product(file_names.iter().copied())
        .map(|(directory, file_name)| directory.join(file_name))
        .collect()
}

/// Returns the given path if provided, otherwise the first of `defaults` that exists.
pub fn path_or_defaults_if_exist(
    path: Option<impl AsRef<Path>>,
    defaults: &[PathBuf],
) -> Option<PathBuf> {
    match path {
        Some(path) => Some(path.as_ref().to_path_buf()),
        None => defaults.iter().find(|path| path.exists()).cloned(),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use serde::Deserialize;
    use testtube_test_utils::Result as TestResult;

    use super::*;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Sample {
        name: String,
        count: u32,
    }

    #[test]
    fn loads_yaml_from_file() -> TestResult {
        let mut file = tempfile::NamedTempFile::new()?;
        writeln!(file, "name: faucet\ncount: 3")?;

        let sample: Sample = load_from_yaml(file.path())?;

        assert_eq!(
            sample,
            Sample {
                name: "faucet".to_owned(),
                count: 3
            }
        );
        Ok(())
    }

    #[test]
    fn missing_file_is_reported_with_path() {
        let error = load_from_yaml::<_, Sample>("/definitely/not/here.yaml")
            .expect_err("file does not exist");
        assert!(error.to_string().contains("/definitely/not/here.yaml"));
    }

    #[test]
    fn explicit_path_wins_over_defaults() -> TestResult {
        let existing = tempfile::NamedTempFile::new()?;
        let defaults = vec![existing.path().to_path_buf()];

        assert_eq!(
            path_or_defaults_if_exist(Some("explicit.yaml"), &defaults),
            Some(PathBuf::from("explicit.yaml"))
        );
        assert_eq!(
            path_or_defaults_if_exist(None::<&Path>, &defaults),
            Some(existing.path().to_path_buf())
        );
        assert_eq!(
            path_or_defaults_if_exist(None::<&Path>, &[PathBuf::from("/nope.yaml")]),
            None
        );
        Ok(())
    }
}
