use anyhow::Result;
use clap::Parser;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "favorites")]
#[command(about = "Runs the favorites service", long_about = None)]
pub struct Cli {
    #[arg(short = 'c', long = "config")]
    pub config_path: Option<String>,
}

pub fn default_config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".favorites")
}

pub fn default_config_path() -> PathBuf {
    default_config_dir().join("config.yaml")
}

pub const DEFAULT_SCORE: f64 = 2.5;
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Deserialize, Default, Clone)]
pub struct App {
    database: String,
    port: i32,
    #[serde(default)]
    pub turso_url: Option<String>,
    #[serde(default)]
    pub turso_auth_token: Option<String>,
    #[serde(default = "default_sync_interval")]
    pub sync_interval_seconds: u64,
}

fn default_sync_interval() -> u64 {
    60
}

impl App {
    pub fn get_db(&self) -> &str {
        &self.database
    }

    pub fn get_port(&self) -> i32 {
        self.port
    }
}

/// A kind of host entity that can be favorited, and the table it lives in.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ContentTypeRegistration {
    pub app_label: String,
    pub model: String,
    pub table: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FavoritesSettings {
    #[serde(default = "default_score")]
    pub default_score: f64,
    #[serde(default = "default_redirect")]
    pub redirect_to: String,
    #[serde(default = "default_paginate_by")]
    paginate_by: u32,
    #[serde(default)]
    pub content_types: Vec<ContentTypeRegistration>,
    /// Shared secret the host sends on hook calls. Hooks are refused when unset.
    #[serde(default)]
    pub hook_secret: Option<String>,
}

fn default_score() -> f64 {
    DEFAULT_SCORE
}

fn default_redirect() -> String {
    "/favorites".to_string()
}

fn default_paginate_by() -> u32 {
    25
}

impl Default for FavoritesSettings {
    fn default() -> Self {
        FavoritesSettings {
            default_score: default_score(),
            redirect_to: default_redirect(),
            paginate_by: default_paginate_by(),
            content_types: vec![],
            hook_secret: None,
        }
    }
}

impl FavoritesSettings {
    pub fn get_paginate_by(&self) -> u32 {
        self.paginate_by.clamp(1, MAX_PAGE_SIZE)
    }
}

#[derive(Debug, Deserialize)]
pub struct Config {
    pub app: App,
    #[serde(default)]
    pub favorites: FavoritesSettings,
}

impl Config {
    pub fn new(path: &str) -> Result<Self> {
        let yaml_str = fs::read_to_string(path)?;
        Config::from_yaml(&yaml_str)
    }

    pub fn from_yaml(yaml_str: &str) -> Result<Self> {
        let yaml_with_env = Config::substitute_env_vars(yaml_str)?;
        let config: Config = serde_yaml::from_str(&yaml_with_env)?;
        Ok(config)
    }

    fn substitute_env_vars(yaml_str: &str) -> Result<String> {
        let mut result = yaml_str.to_string();
        let mut offset = 0;

        while let Some(start) = result[offset..].find("${") {
            let actual_start = offset + start;
            if let Some(end) = result[actual_start..].find('}') {
                let var_name = &result[actual_start + 2..actual_start + end];

                // ${VAR:-default}
                let env_value = if let Some(default_start) = var_name.find(":-") {
                    let actual_var = &var_name[..default_start];
                    let default_val = &var_name[default_start + 2..];
                    env::var(actual_var).unwrap_or_else(|_| default_val.to_string())
                } else {
                    env::var(var_name).unwrap_or_else(|_| {
                        tracing::warn!(var = %var_name, "environment variable not found");
                        String::new()
                    })
                };

                result.replace_range(actual_start..actual_start + end + 1, &env_value);
                offset = actual_start + env_value.len();
            } else {
                break;
            }
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_applied_when_favorites_section_missing() {
        let cfg = Config::from_yaml("app:\n  database: fav.db\n  port: 8080\n").unwrap();
        assert_eq!(cfg.app.get_db(), "fav.db");
        assert_eq!(cfg.app.get_port(), 8080);
        assert_eq!(cfg.app.sync_interval_seconds, 60);
        assert_eq!(cfg.favorites.default_score, 2.5);
        assert_eq!(cfg.favorites.redirect_to, "/favorites");
        assert_eq!(cfg.favorites.get_paginate_by(), 25);
        assert!(cfg.favorites.content_types.is_empty());
        assert_eq!(cfg.favorites.hook_secret, None);
    }

    #[test]
    fn test_content_types_and_env_default() {
        let yaml = r#"
app:
  database: ${FAVORITES_TEST_UNSET_DB:-fallback.db}
  port: 9000
favorites:
  paginate_by: 500
  hook_secret: ${FAVORITES_TEST_UNSET_SECRET:-s3cret}
  content_types:
    - app_label: library
      model: book
      table: books
"#;
        let cfg = Config::from_yaml(yaml).unwrap();
        assert_eq!(cfg.app.get_db(), "fallback.db");
        assert_eq!(cfg.favorites.get_paginate_by(), MAX_PAGE_SIZE);
        assert_eq!(cfg.favorites.hook_secret.as_deref(), Some("s3cret"));
        assert_eq!(
            cfg.favorites.content_types,
            vec![ContentTypeRegistration {
                app_label: "library".to_string(),
                model: "book".to_string(),
                table: "books".to_string(),
            }]
        );
    }
}
