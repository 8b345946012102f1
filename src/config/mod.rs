//! Paths, identifiers and credentials for one pipeline run.
//!
//! Nothing here touches process-wide state: credentials are read from the
//! environment once and then travel explicitly inside a [`Context`].
use anyhow::Context as _;
use serde::Deserialize;
use serde::Serialize;
use std::path::Path;
use std::path::PathBuf;

/// Environment variable holding the workspace host for experiment tracking.
pub const HOST_VAR: &str = "DATABRICKS_HOST";
/// Environment variable holding the access token for experiment tracking.
pub const TOKEN_VAR: &str = "DATABRICKS_TOKEN";

/// Table and experiment locations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub bronze_table: String,
    pub train_table: String,
    pub test_table: String,
    pub pl_experiment_path: String,
    pub log_path: String,
}

impl Config {
    /// Conventional layout of a catalog under `root`.
    pub fn catalog(root: impl AsRef<Path>, catalog: &str) -> Self {
        let base = root.as_ref().join(catalog);
        let path = |name: &str| base.join(name).to_string_lossy().into_owned();
        Self {
            bronze_table: path("iot_bronze"),
            train_table: path("iot_train"),
            test_table: path("iot_test"),
            pl_experiment_path: format!("/lakeflow/{}/pl_autoencoder", catalog),
            log_path: path("pl_logs"),
        }
    }
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)
            .with_context(|| format!("opening config {}", path.display()))?;
        serde_json::from_reader(std::io::BufReader::new(file))
            .with_context(|| format!("parsing config {}", path.display()))
    }
    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        let file = std::fs::File::create(path)
            .with_context(|| format!("creating config {}", path.display()))?;
        Ok(serde_json::to_writer_pretty(file, self)?)
    }
    /// Root of the file-backed experiment store.
    pub fn tracking_root(&self) -> PathBuf {
        Path::new(&self.log_path).join("mlruns")
    }
}

/// A token that never prints and is wiped when dropped.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl Drop for Secret {
    fn drop(&mut self) {
        let mut bytes = std::mem::take(&mut self.0).into_bytes();
        bytes.iter_mut().for_each(|b| *b = 0);
        std::hint::black_box(&bytes);
    }
}

/// Workspace credentials for the experiment tracker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    host: Option<String>,
    token: Option<Secret>,
}

impl Credentials {
    pub fn new(host: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            host: Some(host.into()),
            token: Some(Secret::new(token)),
        }
    }
    /// Read, never write, the host and token variables.
    pub fn from_env() -> Self {
        Self {
            host: std::env::var(HOST_VAR).ok().filter(|h| !h.is_empty()),
            token: std::env::var(TOKEN_VAR)
                .ok()
                .filter(|t| !t.is_empty())
                .map(Secret::new),
        }
    }
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }
    pub fn token(&self) -> Option<&Secret> {
        self.token.as_ref()
    }
    pub fn authorized(&self) -> bool {
        self.host.is_some() && self.token.is_some()
    }
}

/// Everything a training routine needs from its host.
#[derive(Debug, Clone)]
pub struct Context {
    pub config: Config,
    pub credentials: Credentials,
}

impl Context {
    pub fn new(config: Config, credentials: Credentials) -> Self {
        Self {
            config,
            credentials,
        }
    }
}
