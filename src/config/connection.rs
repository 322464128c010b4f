//! Connection configuration files.
//!
//! A file names the source project (required) and optionally a target
//! project, plus the API keys of the accounts used to reach them:
//!
//! ```json
//! {
//!   "source_catmaid_url": "https://catmaid.example.org",
//!   "source_catmaid_account_to_use": "me",
//!   "source_project_id": 2,
//!   "target_catmaid_url": "https://catmaid.example.org",
//!   "target_catmaid_account_to_use": "me",
//!   "target_project_id": 59,
//!   "catmaid_account_api_keys": { "me": "${CATMAID_API_KEY}" }
//! }
//! ```

use crate::adapters::transformix::Transformix;
use crate::domain::model::{ProjectId, SkeletonId};
use crate::transforms::fanc::WarpContext;
use crate::utils::error::{AddonsError, Result};
use crate::utils::validation::{validate_positive_number, validate_url, Validate};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

pub const DEFAULT_CONFIG_FILE: &str = "default_connection.json";
pub const CONFIG_DIR_ENV: &str = "CATMAID_ADDONS_CONFIG_DIR";
pub const DEFAULT_CONFIG_DIR: &str = "connection_configs";
pub const TRANSFORM_DIR_ENV: &str = "CATMAID_ADDONS_TRANSFORM_DIR";
pub const DEFAULT_TRANSFORM_DIR: &str = "transform_parameters";
const CUSTOM_NICKNAMES_FILE: &str = "custom_nicknames.json";

const BUILTIN_NICKNAMES: [(&str, &str); 6] = [
    ("fafb", "virtualflybrain_FAFB.json"),
    ("brain", "virtualflybrain_FAFB.json"),
    ("fanc", "virtualflybrain_FANC.json"),
    ("vnc", "virtualflybrain_FANC.json"),
    ("larva", "virtualflybrain_L1larva.json"),
    ("l1", "virtualflybrain_L1larva.json"),
];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub source_catmaid_url: Option<String>,
    pub source_catmaid_account_to_use: Option<String>,
    pub source_project_id: Option<ProjectId>,

    pub target_catmaid_url: Option<String>,
    pub target_catmaid_account_to_use: Option<String>,
    pub target_project_id: Option<ProjectId>,

    #[serde(default)]
    pub catmaid_account_api_keys: HashMap<String, String>,
    pub catmaid_http_username: Option<String>,
    pub catmaid_http_password: Option<String>,

    pub transformix_binary: Option<String>,
    pub transform_parameters_dir: Option<String>,

    /// Project id → skeleton used to detach unused annotations.
    #[serde(default = "default_purge_dummy_skeletons")]
    pub purge_dummy_skeletons: HashMap<String, SkeletonId>,

    pub request_timeout_seconds: Option<u64>,

    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

fn default_purge_dummy_skeletons() -> HashMap<String, SkeletonId> {
    [("2", 6401), ("13", 120221), ("38", 352154), ("59", 665257)]
        .into_iter()
        .map(|(pid, skid)| (pid.to_string(), skid))
        .collect()
}

/// Everything needed to open one project.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectSettings {
    pub url: String,
    pub account: String,
    pub api_key: String,
    pub project_id: ProjectId,
}

/// `CATMAID_ADDONS_CONFIG_DIR`, else `./connection_configs`.
pub fn config_dir() -> PathBuf {
    std::env::var(CONFIG_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_DIR))
}

/// Built-in nicknames, overridden and extended by `custom_nicknames.json`.
pub fn connection_nicknames(config_dir: &Path) -> Result<HashMap<String, String>> {
    let mut nicknames: HashMap<String, String> = BUILTIN_NICKNAMES
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    let custom = config_dir.join(CUSTOM_NICKNAMES_FILE);
    if custom.exists() {
        let text = std::fs::read_to_string(&custom)?;
        let extra: HashMap<String, String> = serde_json::from_str(&text)?;
        tracing::debug!("Loaded {} custom nicknames from {}", extra.len(), custom.display());
        nicknames.extend(extra.into_iter().map(|(k, v)| (k.to_lowercase(), v)));
    }
    Ok(nicknames)
}

/// Nickname → file name; a path that does not exist is looked up in the
/// config directory.
pub fn resolve_config_path(name_or_path: &str, config_dir: &Path) -> Result<PathBuf> {
    let nicknames = connection_nicknames(config_dir)?;
    let file = nicknames
        .get(&name_or_path.to_lowercase())
        .cloned()
        .unwrap_or_else(|| name_or_path.to_string());

    let path = PathBuf::from(&file);
    if path.exists() {
        Ok(path)
    } else {
        Ok(config_dir.join(file))
    }
}

fn env_var_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\$\{([^}]+)\}").expect("valid env var pattern"))
}

/// Replace `${VAR}` with the variable's value. Unset variables are left as is.
pub fn substitute_env_vars(content: &str) -> String {
    env_var_pattern()
        .replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        })
        .into_owned()
}

impl ConnectionConfig {
    /// Load by nickname, path, or file name inside the config directory.
    pub fn load(name_or_path: &str) -> Result<Self> {
        Self::load_from(name_or_path, &config_dir())
    }

    pub fn load_from(name_or_path: &str, config_dir: &Path) -> Result<Self> {
        let path = resolve_config_path(name_or_path, config_dir)?;
        tracing::debug!("Reading connection config {}", path.display());
        let content = std::fs::read_to_string(&path).map_err(|e| {
            AddonsError::config(format!(
                "could not read {}: {}. See {}/ for an example config file that works",
                path.display(),
                e,
                DEFAULT_CONFIG_DIR
            ))
        })?;

        let mut config = if path.extension().is_some_and(|ext| ext == "toml") {
            Self::from_toml_str(&content)?
        } else {
            Self::from_json_str(&content)?
        };
        config.source_path = Some(path);
        Ok(config)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        serde_json::from_str(&substitute_env_vars(content)).map_err(|e| {
            AddonsError::ConfigValidationError {
                field: "json_parsing".to_string(),
                message: format!("connection config is not valid JSON: {}", e),
            }
        })
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(&substitute_env_vars(content))?)
    }

    pub fn display_name(&self) -> String {
        self.source_path
            .as_ref()
            .map_or_else(|| "the connection config".to_string(), |p| p.display().to_string())
    }

    fn api_key(&self, account: &str) -> Result<String> {
        self.catmaid_account_api_keys
            .get(account)
            .cloned()
            .ok_or_else(|| AddonsError::MissingConfigError {
                field: format!("catmaid_account_api_keys.{}", account),
            })
    }

    /// The source project. Every source field is required.
    pub fn source(&self) -> Result<ProjectSettings> {
        let fields = [
            ("source_catmaid_url", self.source_catmaid_url.is_some()),
            (
                "source_catmaid_account_to_use",
                self.source_catmaid_account_to_use.is_some(),
            ),
            ("source_project_id", self.source_project_id.is_some()),
        ];
        let missing: Vec<&str> = fields
            .iter()
            .filter(|(_, present)| !present)
            .map(|(name, _)| *name)
            .collect();

        match (
            &self.source_catmaid_url,
            &self.source_catmaid_account_to_use,
            self.source_project_id,
        ) {
            (Some(url), Some(account), Some(project_id)) => Ok(ProjectSettings {
                url: url.clone(),
                account: account.clone(),
                api_key: self.api_key(account)?,
                project_id,
            }),
            _ => Err(AddonsError::config(format!(
                "The following fields must appear in {} and not be null: {}",
                self.display_name(),
                missing.join(", ")
            ))),
        }
    }

    /// The target project, if fully configured. A partial target is warned
    /// about and ignored.
    pub fn target(&self) -> Result<Option<ProjectSettings>> {
        match (
            &self.target_catmaid_url,
            &self.target_catmaid_account_to_use,
            self.target_project_id,
        ) {
            (Some(url), Some(account), Some(project_id)) => Ok(Some(ProjectSettings {
                url: url.clone(),
                account: account.clone(),
                api_key: self.api_key(account)?,
                project_id,
            })),
            (None, None, None) => Ok(None),
            _ => {
                tracing::warn!(
                    "⚠️ Some but not all target project fields are set in {}. \
                     target_catmaid_url, target_catmaid_account_to_use and target_project_id \
                     must all be present. Continuing without a target project.",
                    self.display_name()
                );
                Ok(None)
            }
        }
    }

    pub fn http_auth(&self) -> Option<(&str, &str)> {
        match (&self.catmaid_http_username, &self.catmaid_http_password) {
            (Some(user), Some(password)) => Some((user.as_str(), password.as_str())),
            _ => None,
        }
    }

    pub fn transform_parameters_dir(&self) -> PathBuf {
        self.transform_parameters_dir
            .as_ref()
            .map(PathBuf::from)
            .or_else(|| std::env::var(TRANSFORM_DIR_ENV).ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_TRANSFORM_DIR))
    }

    pub fn transformix(&self) -> Transformix {
        self.transformix_binary
            .as_ref()
            .map_or_else(Transformix::default, |binary| Transformix::new(binary))
    }

    pub fn warp_context(&self) -> WarpContext {
        WarpContext::new(self.transformix(), self.transform_parameters_dir())
    }

    pub fn purge_dummy_skeleton(&self, project_id: ProjectId) -> Option<SkeletonId> {
        self.purge_dummy_skeletons
            .get(&project_id.to_string())
            .copied()
    }
}

impl Validate for ConnectionConfig {
    fn validate(&self) -> Result<()> {
        let source = self.source()?;
        validate_url("source_catmaid_url", &source.url)?;
        if let Some(target) = self.target()? {
            validate_url("target_catmaid_url", &target.url)?;
        }
        if let Some(timeout) = self.request_timeout_seconds {
            validate_positive_number("request_timeout_seconds", timeout, 1)?;
        }
        if self.catmaid_http_username.is_some() != self.catmaid_http_password.is_some() {
            return Err(AddonsError::ConfigValidationError {
                field: "catmaid_http_username".to_string(),
                message: "HTTP username and password must be given together".to_string(),
            });
        }
        Ok(())
    }
}
