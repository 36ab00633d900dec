use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::GenAiError;

const ENV_KEYS: [&str; 2] = ["GEMINI_API_KEY", "API_KEY"];

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettingsFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    gemini_api_key: Option<String>,
}

/// User-supplied Gemini API key, persisted in a small JSON settings file.
#[derive(Debug)]
pub struct ApiKeyStore {
    path: PathBuf,
    settings: SettingsFile,
}

impl ApiKeyStore {
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let settings = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                warn!(error = %e, path = %path.display(), "settings file is corrupt; ignoring");
                SettingsFile::default()
            }),
            Err(_) => SettingsFile::default(),
        };
        Self { path, settings }
    }

    pub fn get(&self) -> Option<&str> {
        self.settings.gemini_api_key.as_deref()
    }

    pub fn has_key(&self) -> bool {
        self.get().is_some()
    }

    pub async fn set(&mut self, key: &str) -> Result<(), GenAiError> {
        let key = key.trim();
        if key.is_empty() {
            return Err(GenAiError::InvalidInput("API key must not be empty".into()));
        }
        self.settings.gemini_api_key = Some(key.to_string());
        self.persist().await?;
        info!("api key saved");
        Ok(())
    }

    pub async fn remove(&mut self) -> Result<(), GenAiError> {
        self.settings.gemini_api_key = None;
        self.persist().await?;
        info!("api key removed");
        Ok(())
    }

    /// The stored key, else the first of `GEMINI_API_KEY` / `API_KEY` set in
    /// the environment.
    pub fn resolve(&self) -> Result<String, GenAiError> {
        self.resolve_with(|name| std::env::var(name).ok())
    }

    pub fn resolve_with(&self, env: impl Fn(&str) -> Option<String>) -> Result<String, GenAiError> {
        if let Some(key) = self.get() {
            return Ok(key.to_string());
        }
        ENV_KEYS
            .iter()
            .filter_map(|name| env(*name))
            .map(|v| v.trim().to_string())
            .find(|v| !v.is_empty())
            .ok_or(GenAiError::MissingApiKey)
    }

    async fn persist(&self) -> Result<(), GenAiError> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await?;
        }
        let bytes = serde_json::to_vec_pretty(&self.settings).map_err(std::io::Error::from)?;
        tokio::fs::write(&self.path, bytes).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[tokio::test]
    async fn set_persists_trimmed_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let mut store = ApiKeyStore::load(&path).await;
        assert!(!store.has_key());
        store.set("  abc123 \n").await.unwrap();

        let reloaded = ApiKeyStore::load(&path).await;
        assert_eq!(reloaded.get(), Some("abc123"));
        assert_eq!(reloaded.resolve_with(no_env).unwrap(), "abc123");
    }

    #[tokio::test]
    async fn empty_key_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ApiKeyStore::load(dir.path().join("settings.json")).await;
        let err = store.set("   ").await.unwrap_err();
        assert!(matches!(err, GenAiError::InvalidInput(_)));
        assert!(!store.has_key());
    }

    #[tokio::test]
    async fn remove_falls_back_to_environment() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ApiKeyStore::load(dir.path().join("settings.json")).await;
        store.set("stored").await.unwrap();
        store.remove().await.unwrap();

        let key = store
            .resolve_with(|name| (name == "API_KEY").then(|| "from-env".to_string()))
            .unwrap();
        assert_eq!(key, "from-env");

        let key = store
            .resolve_with(|name| Some(format!("{name}-value")))
            .unwrap();
        assert_eq!(key, "GEMINI_API_KEY-value");
    }

    #[tokio::test]
    async fn missing_everywhere_is_missing_api_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = ApiKeyStore::load(dir.path().join("settings.json")).await;
        let err = store.resolve_with(no_env).unwrap_err();
        assert_eq!(
            err.to_string(),
            "API key is missing. Please set your Gemini API key in settings."
        );
    }
}
