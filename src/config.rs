use crate::error::{Error, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::{env, fs};
use toml_edit::{DocumentMut, value};
use tracing::info;

pub const DEFAULT_CONFIG_PATH: &str = "config/bills.toml";

#[derive(Deserialize, Clone, Debug, Default)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub parser: ParserConfig,
    #[serde(default)]
    pub zoho: ZohoConfig,
    /// OAuth client settings keyed by provider name.
    #[serde(default)]
    pub oauth: HashMap<String, OAuthProvider>,
}

#[derive(Deserialize, Clone, Debug)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default = "default_files_dir")]
    pub files_dir: String,
}

fn default_db_path() -> String {
    "data/bills.db".to_string()
}

fn default_files_dir() -> String {
    "data/files".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            files_dir: default_files_dir(),
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
pub struct ParserConfig {
    /// Empty means no parser: every upload is simulated.
    #[serde(default)]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
pub struct ZohoConfig {
    #[serde(default)]
    pub mock_mode: bool,
    #[serde(default)]
    pub organization_id: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_web_base")]
    pub web_base: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Tokens expiring within this window are refreshed before use. Zero
    /// serves a token until the moment it expires.
    #[serde(default = "default_refresh_skew_secs")]
    pub refresh_skew_secs: i64,
}

fn default_api_base() -> String {
    "https://www.zohoapis.com".to_string()
}

fn default_web_base() -> String {
    "https://books.zoho.com".to_string()
}

fn default_refresh_skew_secs() -> i64 {
    0
}

impl Default for ZohoConfig {
    fn default() -> Self {
        Self {
            mock_mode: false,
            organization_id: String::new(),
            api_base: default_api_base(),
            web_base: default_web_base(),
            timeout_secs: default_timeout_secs(),
            refresh_skew_secs: default_refresh_skew_secs(),
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
pub struct OAuthProvider {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub redirect_uri: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    #[serde(default = "default_auth_url")]
    pub auth_url: String,
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
}

fn default_token_url() -> String {
    "https://accounts.zoho.com/oauth/v2/token".to_string()
}

fn default_auth_url() -> String {
    "https://accounts.zoho.com/oauth/v2/auth".to_string()
}

fn default_scopes() -> Vec<String> {
    vec![
        "ZohoBooks.bills.CREATE".to_string(),
        "ZohoBooks.bills.UPDATE".to_string(),
    ]
}

impl Default for OAuthProvider {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            redirect_uri: String::new(),
            token_url: default_token_url(),
            auth_url: default_auth_url(),
            scopes: default_scopes(),
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load the file if it exists, otherwise start from defaults, then apply
    /// environment overrides.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let mut cfg = if path.as_ref().exists() {
            Self::load(path)?
        } else {
            Self::default()
        };
        cfg.apply_env(|key| env::var(key).ok());
        Ok(cfg)
    }

    /// Overlay secrets and switches from the environment.
    ///
    /// Recognised keys: `BILLS_<PROVIDER>_CLIENT_ID`,
    /// `BILLS_<PROVIDER>_CLIENT_SECRET`, `BILLS_ZOHO_ORG_ID`, `BILLS_MOCK_MODE`,
    /// `BILLS_PARSER_URL`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("BILLS_PARSER_URL") {
            self.parser.base_url = url;
        }
        if let Some(org) = lookup("BILLS_ZOHO_ORG_ID") {
            self.zoho.organization_id = org;
        }
        if let Some(flag) = lookup("BILLS_MOCK_MODE") {
            self.zoho.mock_mode = matches!(flag.trim(), "1" | "true" | "yes");
        }

        let mut providers: Vec<String> = self.oauth.keys().cloned().collect();
        if !providers.iter().any(|p| p == "zoho") {
            providers.push("zoho".to_string());
        }
        for name in providers {
            let upper = name.to_ascii_uppercase();
            let id = lookup(&format!("BILLS_{upper}_CLIENT_ID"));
            let secret = lookup(&format!("BILLS_{upper}_CLIENT_SECRET"));
            if id.is_none() && secret.is_none() {
                continue;
            }
            let provider = self.oauth.entry(name).or_default();
            if let Some(id) = id {
                provider.client_id = id;
            }
            if let Some(secret) = secret {
                provider.client_secret = secret;
            }
        }
    }

    pub fn provider(&self, name: &str) -> Result<&OAuthProvider> {
        self.oauth
            .get(name)
            .filter(|p| !p.client_id.is_empty() && !p.client_secret.is_empty())
            .ok_or_else(|| Error::Config(format!("OAuth client for '{name}' is not configured")))
    }

    /// Write a single `[section] key = "value"` into the config file, keeping
    /// the rest of the document intact.
    pub fn persist_value(
        path: impl AsRef<Path>,
        section: &str,
        key: &str,
        new_value: &str,
    ) -> Result<()> {
        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };
        let mut doc = content.parse::<DocumentMut>()?;

        doc[section][key] = value(new_value);

        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(&path, doc.to_string())?;
        Ok(())
    }
}

/// Shared configuration, read fresh by components on every call.
#[derive(Clone)]
pub struct ConfigHandle {
    inner: Arc<RwLock<Config>>,
    path: Option<PathBuf>,
}

impl ConfigHandle {
    pub fn new(cfg: Config) -> Self {
        Self {
            inner: Arc::new(RwLock::new(cfg)),
            path: None,
        }
    }

    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let cfg = Config::load_or_default(&path)?;
        Ok(Self {
            inner: Arc::new(RwLock::new(cfg)),
            path: Some(path),
        })
    }

    /// Copy of the current configuration.
    pub fn snapshot(&self) -> Config {
        self.inner.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn update(&self, f: impl FnOnce(&mut Config)) {
        let mut cfg = self.inner.write().unwrap_or_else(|p| p.into_inner());
        f(&mut cfg);
    }

    /// Re-read the backing file, if there is one.
    pub fn reload(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let cfg = Config::load_or_default(path)?;
        self.update(|c| *c = cfg);
        info!(path = %path.display(), "Configuration reloaded");
        Ok(())
    }

    /// Set the accounting organization id in memory and in the config file.
    pub fn set_organization_id(&self, org_id: &str) -> Result<()> {
        if let Some(path) = &self.path {
            Config::persist_value(path, "zoho", "organization_id", org_id)?;
        }
        self.update(|c| c.zoho.organization_id = org_id.to_string());
        info!(org_id = %org_id, "Organization id updated");
        Ok(())
    }
}
