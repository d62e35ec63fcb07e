//! Named camera profiles.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::camera::CameraConfig;
use crate::error::PipelineError;

/// Load/save of named, ordered camera config lists.
pub trait ProfileStore {
    fn save_profile(&self, name: &str, configs: &[CameraConfig]) -> Result<()>;

    /// `Ok(None)` when no profile with that name exists.
    fn load_profile(&self, name: &str) -> Result<Option<Vec<CameraConfig>>>;

    /// Stored profile names, sorted.
    fn list_profiles(&self) -> Result<Vec<String>>;
}

/// One pretty-printed JSON array per profile at `<dir>/<name>.json`.
#[derive(Clone, Debug)]
pub struct JsonProfileStore {
    dir: PathBuf,
}

impl JsonProfileStore {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, name: &str) -> Result<PathBuf> {
        validate_profile_name(name)?;
        Ok(self.dir.join(format!("{}.json", name)))
    }
}

pub fn validate_profile_name(name: &str) -> Result<(), PipelineError> {
    let trimmed = name.trim();
    if trimmed.is_empty()
        || trimmed != name
        || name.contains(['/', '\\'])
        || name == "."
        || name == ".."
    {
        return Err(PipelineError::InvalidProfileName(name.to_string()));
    }
    Ok(())
}

impl ProfileStore for JsonProfileStore {
    fn save_profile(&self, name: &str, configs: &[CameraConfig]) -> Result<()> {
        let path = self.path_for(name)?;
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create {}", self.dir.display()))?;
        let json = serde_json::to_string_pretty(configs).context("serialize profile")?;
        fs::write(&path, json).with_context(|| format!("failed to write {}", path.display()))?;
        log::info!("saved profile {} ({} cameras)", name, configs.len());
        Ok(())
    }

    fn load_profile(&self, name: &str) -> Result<Option<Vec<CameraConfig>>> {
        let path = self.path_for(name)?;
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| format!("failed to read {}", path.display()))
            }
        };
        let configs = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse profile {}", path.display()))?;
        Ok(Some(configs))
    }

    fn list_profiles(&self) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to list {}", self.dir.display()))
            }
        };
        let mut names = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_path_like_names() {
        for name in ["", " ", "a/b", "..", "c\\d", " padded"] {
            assert!(validate_profile_name(name).is_err(), "{:?}", name);
        }
        assert!(validate_profile_name("lobby-2").is_ok());
    }

    #[test]
    fn missing_dir_lists_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonProfileStore::new(dir.path().join("absent"));
        assert!(store.list_profiles().unwrap().is_empty());
        assert!(store.load_profile("nope").unwrap().is_none());
    }
}
