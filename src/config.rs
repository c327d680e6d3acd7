use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Owner of every budget, category and transaction in this home.
    pub user_id: Uuid,

    /// Currency new budgets are denominated in when none is given.
    pub base_currency: String,

    /// Fiscal year used when a command omits `--year`.
    #[serde(default)]
    pub default_fiscal_year: Option<i32>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            user_id: Uuid::new_v4(),
            base_currency: "USD".to_string(),
            default_fiscal_year: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppPaths {
    pub config_dir: PathBuf,
    pub data_dir: PathBuf,
}

pub fn app_paths(override_home: Option<PathBuf>) -> Result<AppPaths> {
    if let Some(home) = override_home {
        return Ok(AppPaths {
            config_dir: home.join("config"),
            data_dir: home.join("data"),
        });
    }

    let proj = ProjectDirs::from("com", "budgeteer", "budgeteer")
        .context("Failed to resolve platform directories")?;

    Ok(AppPaths {
        config_dir: proj.config_dir().to_path_buf(),
        data_dir: proj.data_dir().to_path_buf(),
    })
}

pub fn load_or_init_config(paths: &AppPaths) -> Result<(AppConfig, PathBuf)> {
    fs::create_dir_all(&paths.config_dir)
        .with_context(|| format!("Failed to create config dir {}", paths.config_dir.display()))?;

    let cfg_path = paths.config_dir.join("config.json");
    if !cfg_path.exists() {
        let cfg = AppConfig::default();
        write_config(&cfg_path, &cfg)?;
        return Ok((cfg, cfg_path));
    }

    let raw = fs::read_to_string(&cfg_path)
        .with_context(|| format!("Failed to read {}", cfg_path.display()))?;
    let cfg: AppConfig = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse {}", cfg_path.display()))?;

    Ok((cfg, cfg_path))
}

pub fn write_config(path: &Path, cfg: &AppConfig) -> Result<()> {
    let json = serde_json::to_string_pretty(cfg)?;
    fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_is_created_once_and_reloaded() {
        let home = tempfile::tempdir().expect("tempdir");
        let paths = app_paths(Some(home.path().to_path_buf())).unwrap();

        let (first, cfg_path) = load_or_init_config(&paths).unwrap();
        assert_eq!(first.base_currency, "USD");
        assert_eq!(first.default_fiscal_year, None);

        let mut edited = first.clone();
        edited.base_currency = "EUR".to_string();
        edited.default_fiscal_year = Some(2025);
        write_config(&cfg_path, &edited).unwrap();

        let (second, _) = load_or_init_config(&paths).unwrap();
        assert_eq!(second.user_id, first.user_id);
        assert_eq!(second.base_currency, "EUR");
        assert_eq!(second.default_fiscal_year, Some(2025));
    }
}
