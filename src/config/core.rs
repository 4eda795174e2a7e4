use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use figment::Figment;
use figment::providers::{Env, Format, Json, Toml, Yaml};

use super::Settings;

// Embed the default config at compile time
const DEFAULT_CONFIG: &str = include_str!("../../default-config.toml");

/// Builds the layered figment behind [`Settings`].
pub struct ConfigLoader {
    figment: Figment,
}

impl ConfigLoader {
    /// Defaults, then `batchlint.{toml,json,yaml}` in `dir`, then env vars.
    pub fn discover(dir: &Path) -> Self {
        let figment = Figment::new()
            .merge(Toml::string(DEFAULT_CONFIG))
            .merge(Toml::file(dir.join("batchlint.toml")))
            .merge(Json::file(dir.join("batchlint.json")))
            .merge(Yaml::file(dir.join("batchlint.yaml")))
            .merge(Yaml::file(dir.join("batchlint.yml")));
        Self::with_env(figment)
    }

    /// Defaults, then only `path`, then env vars. The file must exist.
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.is_file() {
            anyhow::bail!("config file {} does not exist", path.display());
        }
        let figment = Figment::new().merge(Toml::string(DEFAULT_CONFIG));
        let figment = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => figment.merge(Json::file(&path)),
            Some("yaml" | "yml") => figment.merge(Yaml::file(&path)),
            _ => figment.merge(Toml::file(&path)),
        };
        Ok(Self::with_env(figment))
    }

    fn with_env(figment: Figment) -> Self {
        // Environment variables always have highest priority
        Self {
            figment: figment.merge(Env::prefixed("BATCHLINT_").split("__")),
        }
    }

    /// Layer an extra provider (e.g. command-line overrides) on top.
    pub fn merge(mut self, provider: impl figment::Provider) -> Self {
        self.figment = self.figment.merge(provider);
        self
    }

    pub fn load(&self) -> Result<Settings> {
        let settings: Settings = self
            .figment
            .extract()
            .context("invalid batchlint configuration")?;
        if settings.dispatch.chunk_size == 0 {
            anyhow::bail!("dispatch.chunk_size must be at least 1");
        }
        if !(1..=100).contains(&settings.dispatch.thread_percentage) {
            anyhow::bail!("dispatch.thread_percentage must be between 1 and 100");
        }
        tracing::debug!(dispatch = ?settings.dispatch, "configuration loaded");
        Ok(settings)
    }

    /// Get a section of the merged configuration as JSON
    pub fn get_section(&self, path: &str) -> Result<serde_json::Value> {
        Ok(self.figment.extract_inner(path)?)
    }
}
