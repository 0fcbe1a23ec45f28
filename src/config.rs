use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use camino::Utf8PathBuf;

use crate::error::ConnectorError;

const DEFAULT_RUN_ID: &str = "local-run";
const DEFAULT_CONNECTOR: &str = "zillow";
const DEFAULT_USER_AGENT: &str = "DataIntegrations/1.0";
const DEFAULT_API_URL: &str = "https://api.subsets.com";
const CLOUD_DATA_DIR: &str = "/tmp/data";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Local,
    Cloud,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Local => write!(f, "local"),
            ExecutionMode::Cloud => write!(f, "cloud"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Local,
    Remote,
    Catalog,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Local => write!(f, "local"),
            BackendKind::Remote => write!(f, "remote"),
            BackendKind::Catalog => write!(f, "catalog"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = ConnectorError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "local" => Ok(BackendKind::Local),
            "remote" | "r2" | "s3" => Ok(BackendKind::Remote),
            "catalog" | "subsets" => Ok(BackendKind::Catalog),
            _ => Err(ConnectorError::UnknownBackend(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub calls: u32,
    pub period: Duration,
}

#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub timeout: Duration,
    pub cache_enabled: bool,
    pub cache_dir: Utf8PathBuf,
    pub rate_limit: Option<RateLimit>,
    pub user_agent: String,
}

#[derive(Debug, Clone)]
pub struct R2Credentials {
    pub account_id: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket: String,
}

impl R2Credentials {
    pub fn endpoint(&self) -> String {
        format!("https://{}.r2.cloudflarestorage.com", self.account_id)
    }
}

#[derive(Debug, Clone)]
pub struct CatalogSettings {
    pub database: Utf8PathBuf,
    pub warehouse: String,
    pub api_url: String,
    pub api_key: String,
    pub continue_on_snapshot_error: bool,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub mode: ExecutionMode,
    pub data_dir: Utf8PathBuf,
    pub run_id: String,
    pub connector: String,
    pub environment: String,
    pub backend: BackendKind,
    pub http: HttpSettings,
    pub logging_enabled: bool,
    pub log_dir: Utf8PathBuf,
    pub trigger: String,
    pub r2: Option<R2Credentials>,
    pub catalog: Option<CatalogSettings>,
}

impl Settings {
    pub fn is_cloud(&self) -> bool {
        self.mode == ExecutionMode::Cloud
    }

    /// Settings for a purely local run rooted at `data_dir`; used by tests and tooling.
    pub fn local(data_dir: impl Into<Utf8PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            mode: ExecutionMode::Local,
            run_id: DEFAULT_RUN_ID.to_string(),
            connector: DEFAULT_CONNECTOR.to_string(),
            environment: "dev".to_string(),
            backend: BackendKind::Local,
            http: HttpSettings {
                timeout: Duration::from_secs(30),
                cache_enabled: false,
                cache_dir: data_dir.join("http_cache"),
                rate_limit: None,
                user_agent: DEFAULT_USER_AGENT.to_string(),
            },
            logging_enabled: false,
            log_dir: data_dir.join("logs").join(DEFAULT_RUN_ID),
            trigger: "manual".to_string(),
            r2: None,
            catalog: None,
            data_dir,
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn from_env() -> Result<Settings, ConnectorError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_map(vars: &HashMap<String, String>) -> Result<Settings, ConnectorError> {
        Self::from_lookup(|name| vars.get(name).cloned())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Settings, ConnectorError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        let flag = |name: &str| {
            get(name)
                .map(|value| value.trim().eq_ignore_ascii_case("true"))
                .unwrap_or(false)
        };

        let mode = if flag("CI") {
            ExecutionMode::Cloud
        } else {
            ExecutionMode::Local
        };
        let backend = match get("STORAGE_BACKEND") {
            Some(value) => value.parse()?,
            None => match mode {
                ExecutionMode::Cloud => BackendKind::Remote,
                ExecutionMode::Local => BackendKind::Local,
            },
        };

        let mut required = Vec::new();
        match mode {
            ExecutionMode::Local => required.push("DATA_DIR"),
            ExecutionMode::Cloud => required.extend(R2_VARS),
        }
        if backend == BackendKind::Remote && mode == ExecutionMode::Local {
            required.extend(R2_VARS);
        }
        if backend == BackendKind::Catalog {
            required.extend(["SUBSETS_API_KEY", "SUBSETS_WAREHOUSE"]);
        }
        let missing = required
            .iter()
            .filter(|name| get(name).is_none())
            .map(|name| name.to_string())
            .collect::<Vec<_>>();
        if !missing.is_empty() {
            return Err(ConnectorError::MissingEnv {
                mode: mode.to_string(),
                missing,
            });
        }

        let data_dir = match mode {
            ExecutionMode::Local => Utf8PathBuf::from(get("DATA_DIR").unwrap_or_default()),
            ExecutionMode::Cloud => Utf8PathBuf::from(CLOUD_DATA_DIR),
        };
        let run_id = get("RUN_ID").unwrap_or_else(|| DEFAULT_RUN_ID.to_string());

        let timeout = parse_number::<u64>(&get, "HTTP_TIMEOUT", 30)?;
        let calls = parse_number::<u32>(&get, "HTTP_RATE_LIMIT_CALLS", 60)?;
        let period = parse_number::<u64>(&get, "HTTP_RATE_LIMIT_PERIOD", 60)?;
        let http = HttpSettings {
            timeout: Duration::from_secs(timeout),
            cache_enabled: flag("ENABLE_HTTP_CACHE"),
            cache_dir: get("HTTP_CACHE_DIR")
                .map(Utf8PathBuf::from)
                .unwrap_or_else(|| data_dir.join("http_cache")),
            rate_limit: (calls > 0 && period > 0).then(|| RateLimit {
                calls,
                period: Duration::from_secs(period),
            }),
            user_agent: get("HTTP_USER_AGENT").unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
        };

        let log_dir = match get("LOG_DIR") {
            Some(dir) => Utf8PathBuf::from(dir),
            None => match mode {
                ExecutionMode::Cloud => Utf8PathBuf::from("/tmp/logs").join(&run_id),
                ExecutionMode::Local => Utf8PathBuf::from("logs").join(&run_id),
            },
        };

        let r2 = match (
            get("R2_ACCOUNT_ID"),
            get("R2_ACCESS_KEY_ID"),
            get("R2_SECRET_ACCESS_KEY"),
            get("R2_BUCKET_NAME"),
        ) {
            (Some(account_id), Some(access_key_id), Some(secret_access_key), Some(bucket)) => {
                Some(R2Credentials {
                    account_id,
                    access_key_id,
                    secret_access_key,
                    bucket,
                })
            }
            _ => None,
        };

        let catalog = match (get("SUBSETS_WAREHOUSE"), get("SUBSETS_API_KEY")) {
            (Some(warehouse), Some(api_key)) => Some(CatalogSettings {
                database: get("SUBSETS_CATALOG_URL")
                    .map(|url| catalog_database_path(&url))
                    .unwrap_or_else(|| data_dir.join("catalog").join("catalog.db")),
                warehouse,
                api_url: get("SUBSETS_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string()),
                api_key,
                continue_on_snapshot_error: flag("CONTINUE_ON_SNAPSHOT_ERROR"),
            }),
            _ => None,
        };

        Ok(Settings {
            mode,
            data_dir,
            run_id,
            connector: get("CONNECTOR_NAME").unwrap_or_else(|| DEFAULT_CONNECTOR.to_string()),
            environment: get("ENVIRONMENT").unwrap_or_else(|| "dev".to_string()),
            backend,
            http,
            logging_enabled: flag("ENABLE_LOGGING"),
            log_dir,
            trigger: get("GITHUB_EVENT_NAME").unwrap_or_else(|| "manual".to_string()),
            r2,
            catalog,
        })
    }
}

const R2_VARS: [&str; 4] = [
    "R2_ACCOUNT_ID",
    "R2_ACCESS_KEY_ID",
    "R2_SECRET_ACCESS_KEY",
    "R2_BUCKET_NAME",
];

fn parse_number<T: FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> Result<T, ConnectorError> {
    match get(name) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConnectorError::InvalidEnv {
                name: name.to_string(),
                value,
            }),
        None => Ok(default),
    }
}

fn catalog_database_path(url: &str) -> Utf8PathBuf {
    let path = url
        .strip_prefix("sqlite:///")
        .map(|rest| format!("/{rest}"))
        .or_else(|| url.strip_prefix("sqlite://").map(str::to_string))
        .unwrap_or_else(|| url.to_string());
    Utf8PathBuf::from(path)
}
