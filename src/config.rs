use crate::normalize::DuplicatePolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct KassenbuchConfig {
    pub database: Option<String>,
    /// "reject" (default) or "replace"
    pub on_duplicate: Option<String>,
}

impl KassenbuchConfig {
    pub fn duplicate_policy(&self) -> anyhow::Result<DuplicatePolicy> {
        match self.on_duplicate.as_deref() {
            None | Some("reject") => Ok(DuplicatePolicy::Reject),
            Some("replace") => Ok(DuplicatePolicy::Replace),
            Some(other) => anyhow::bail!("unknown on_duplicate policy `{}` (use reject or replace)", other),
        }
    }
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from("kassenbuch.toml")
}

pub fn default_database_path() -> PathBuf {
    PathBuf::from("kassenbuch.db")
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<Option<KassenbuchConfig>> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
    if !path.exists() {
        return Ok(None);
    }

    let contents = std::fs::read_to_string(&path)?;
    let config: KassenbuchConfig = toml::from_str(&contents)?;
    Ok(Some(config))
}

pub fn write_config(path: &Path, config: &KassenbuchConfig, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("config already exists at {} (use --force to overwrite)", path.display());
    }

    let contents = toml::to_string_pretty(config)?;
    std::fs::write(path, contents)?;
    Ok(())
}

pub fn ensure_db_dir(db_path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}
