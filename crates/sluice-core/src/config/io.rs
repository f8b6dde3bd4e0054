//! YAML settings files

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Read settings from a YAML file
///
/// A missing file yields the defaults. An unreadable or malformed file also
/// yields the defaults, with a warning, so a broken file never keeps the
/// tool from starting.
///
/// # Type Parameters
/// * `T` - Settings type implementing `DeserializeOwned` and `Default`
///
/// # Arguments
/// * `path` - Path to the YAML settings file
///
/// # Example
///
/// ```ignore
/// let settings: StreamSettings = load_config(&default_config_path("loopback.yaml"));
/// ```
pub fn load_config<T>(path: &Path) -> T
where
    T: DeserializeOwned + Default,
{
    if !path.exists() {
        log::info!("No settings at {:?}, using defaults", path);
        return T::default();
    }

    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) => {
            log::warn!("Failed to read {:?}: {}, using defaults", path, e);
            return T::default();
        }
    };

    match serde_yaml::from_str::<T>(&contents) {
        Ok(config) => {
            log::info!("Loaded settings from {:?}", path);
            config
        }
        Err(e) => {
            log::warn!("Failed to parse {:?}: {}, using defaults", path, e);
            T::default()
        }
    }
}

/// Write settings to a YAML file
///
/// Parent directories are created as needed. The file is written to a
/// temporary sibling and renamed into place, so readers never see a
/// partial file.
///
/// # Type Parameters
/// * `T` - Settings type implementing `Serialize`
///
/// # Arguments
/// * `config` - Settings to write
/// * `path` - Destination YAML file
///
/// # Errors
/// Fails when the directory, the temporary file or the final rename cannot
/// be created; the error names the path involved.
///
/// # Example
///
/// ```ignore
/// save_config(&StreamSettings::default(), &default_config_path("loopback.yaml"))?;
/// ```
pub fn save_config<T>(config: &T, path: &Path) -> Result<()>
where
    T: Serialize,
{
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)
        .with_context(|| format!("Failed to create settings directory {:?}", parent))?;

    let yaml = serde_yaml::to_string(config).context("Failed to serialize settings")?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent)
        .with_context(|| format!("Failed to create temporary file in {:?}", parent))?;
    tmp.write_all(yaml.as_bytes())
        .context("Failed to write settings")?;
    tmp.persist(path)
        .with_context(|| format!("Failed to write settings file {:?}", path))?;

    log::info!("Saved settings to {:?}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::StreamSettings;
    use crate::types::SampleType;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings: StreamSettings = load_config(&dir.path().join("absent.yaml"));
        assert_eq!(settings, StreamSettings::default());
    }

    #[test]
    fn test_malformed_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.yaml");
        std::fs::write(&path, "frequency: [not, a, number").unwrap();
        let settings: StreamSettings = load_config(&path);
        assert_eq!(settings, StreamSettings::default());
    }

    #[test]
    fn test_save_creates_directories_and_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("sluice").join("loopback.yaml");

        let settings = StreamSettings {
            device_name: "Software".to_string(),
            frequency: 44100,
            sample_type: SampleType::Float,
            drain_timeout_ms: 250,
            ..StreamSettings::default()
        };
        save_config(&settings, &path).unwrap();
        assert!(path.exists());

        let loaded: StreamSettings = load_config(&path);
        assert_eq!(loaded, settings);
    }
}
