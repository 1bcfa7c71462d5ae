use crate::constants::{DEEPSEEK_BASE_URL, DEFAULT_BACKEND_URL, OLLAMA_BASE_URL};
use crate::types::{ArmatureError, ObservedError, Result};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// Connection details for one provider slot. Keys live in the environment,
/// not in the file; `api_key_env` names the variable to read.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProviderConfig {
    pub base_url: String,
    pub api_key_env: String,
    pub default_model: String,
}

impl ProviderConfig {
    /// The configured base URL, or `fallback` when a partial file left it
    /// blank.
    pub fn base_url_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        if self.base_url.is_empty() {
            fallback
        } else {
            &self.base_url
        }
    }

    pub fn api_key(&self) -> Option<String> {
        if self.api_key_env.is_empty() {
            return None;
        }
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|key| !key.is_empty())
    }
}

/// Persisted client preferences. Every field is serde-defaulted, so a partial
/// or older file merges with the defaults instead of failing to load.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub backend_url: String,
    /// Active provider id, matched case-insensitively.
    pub provider: String,
    pub deepseek: ProviderConfig,
    pub ollama: ProviderConfig,
    pub custom: ProviderConfig,
    pub log_dir: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            provider: "deepseek".to_string(),
            deepseek: ProviderConfig {
                base_url: DEEPSEEK_BASE_URL.to_string(),
                api_key_env: "DEEPSEEK_API_KEY".to_string(),
                default_model: "deepseek-chat".to_string(),
            },
            ollama: ProviderConfig {
                base_url: OLLAMA_BASE_URL.to_string(),
                api_key_env: String::new(),
                default_model: "llama3".to_string(),
            },
            custom: ProviderConfig {
                base_url: String::new(),
                api_key_env: "OPENAI_API_KEY".to_string(),
                default_model: String::new(),
            },
            log_dir: "logs".to_string(),
        }
    }
}

impl Settings {
    /// Loads settings from `path`. A missing file and an unparsable file both
    /// degrade to defaults; preferences are never a startup blocker.
    pub fn load(path: &Path) -> Settings {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(_) => return Settings::default(),
        };
        match serde_json::from_str(&raw) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!(
                    "Settings file {} is unreadable, falling back to defaults: {}",
                    path.display(),
                    e
                );
                Settings::default()
            }
        }
    }

    /// Writes settings atomically: serialize into a temp file in the target
    /// directory, then rename over the destination. A crash mid-write leaves
    /// the old file intact.
    pub fn save(&self, path: &Path) -> Result<()> {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => {
                std::fs::create_dir_all(parent)?;
                parent
            }
            _ => Path::new("."),
        };
        let mut file = NamedTempFile::new_in(dir)?;
        let body = serde_json::to_string_pretty(self)?;
        file.write_all(body.as_bytes())?;
        file.write_all(b"\n")?;
        file.persist(path)
            .map_err(|e| ObservedError::from(ArmatureError::Io(e.error)))?;
        Ok(())
    }

    /// Config for the named provider slot, case-insensitively. Unknown ids
    /// get the custom slot, which is also what the stub fallback reads.
    pub fn provider_config(&self, id: &str) -> &ProviderConfig {
        match id.to_lowercase().as_str() {
            "deepseek" => &self.deepseek,
            "ollama" => &self.ollama,
            _ => &self.custom,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = match tempdir() {
            Ok(d) => d,
            Err(e) => panic!("Failed to create temp dir: {:?}", e),
        };
        let settings = Settings::load(&dir.path().join("nope.json"));
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_garbage_file_yields_defaults() {
        let dir = match tempdir() {
            Ok(d) => d,
            Err(e) => panic!("Failed to create temp dir: {:?}", e),
        };
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();
        let settings = Settings::load(&path);
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_partial_file_merges_with_defaults() {
        let dir = match tempdir() {
            Ok(d) => d,
            Err(e) => panic!("Failed to create temp dir: {:?}", e),
        };
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{ "provider": "ollama" }"#).unwrap();

        let settings = Settings::load(&path);
        assert_eq!(settings.provider, "ollama");
        assert_eq!(settings.backend_url, DEFAULT_BACKEND_URL);
        assert_eq!(settings.deepseek.base_url, DEEPSEEK_BASE_URL);
    }

    #[test]
    fn test_save_then_load_round_trips() {
        let dir = match tempdir() {
            Ok(d) => d,
            Err(e) => panic!("Failed to create temp dir: {:?}", e),
        };
        let path = dir.path().join("nested").join("settings.json");

        let mut settings = Settings::default();
        settings.provider = "custom".to_string();
        settings.custom.base_url = "http://127.0.0.1:8080".to_string();
        settings.save(&path).unwrap();

        let loaded = Settings::load(&path);
        assert_eq!(loaded, settings);
    }

    #[test]
    fn test_save_overwrite_keeps_latest() {
        let dir = match tempdir() {
            Ok(d) => d,
            Err(e) => panic!("Failed to create temp dir: {:?}", e),
        };
        let path = dir.path().join("settings.json");

        let first = Settings::default();
        first.save(&path).unwrap();

        let mut second = Settings::default();
        second.provider = "ollama".to_string();
        second.save(&path).unwrap();

        assert_eq!(Settings::load(&path).provider, "ollama");
    }

    #[test]
    fn test_blank_base_url_uses_fallback() {
        let config = ProviderConfig::default();
        assert_eq!(config.base_url_or(OLLAMA_BASE_URL), OLLAMA_BASE_URL);

        let configured = ProviderConfig {
            base_url: "http://10.0.0.2:11434".to_string(),
            ..ProviderConfig::default()
        };
        assert_eq!(configured.base_url_or(OLLAMA_BASE_URL), "http://10.0.0.2:11434");
    }

    #[test]
    fn test_api_key_reads_named_env_var() {
        let config = ProviderConfig {
            api_key_env: "ARMATURE_TEST_KEY_SLOT".to_string(),
            ..ProviderConfig::default()
        };
        std::env::set_var("ARMATURE_TEST_KEY_SLOT", "sk-test");
        assert_eq!(config.api_key().as_deref(), Some("sk-test"));
        std::env::remove_var("ARMATURE_TEST_KEY_SLOT");
        assert_eq!(config.api_key(), None);

        let unset = ProviderConfig::default();
        assert_eq!(unset.api_key(), None);
    }

    #[test]
    fn test_provider_config_lookup_is_case_insensitive() {
        let settings = Settings::default();
        assert_eq!(settings.provider_config("DeepSeek"), &settings.deepseek);
        assert_eq!(settings.provider_config("OLLAMA"), &settings.ollama);
        assert_eq!(settings.provider_config("anything-else"), &settings.custom);
    }
}
