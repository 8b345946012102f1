use super::experiment::write;
use super::*;
use anyhow::Context;
use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

pub(super) const METRICS: &str = "metrics";
pub(super) const PARAMS: &str = "params";
pub(super) const TAGS: &str = "tags";
pub(super) const ARTIFACTS: &str = "artifacts";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunStatus {
    Running,
    Finished,
    Failed,
    Killed,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "RUNNING"),
            Self::Finished => write!(f, "FINISHED"),
            Self::Failed => write!(f, "FAILED"),
            Self::Killed => write!(f, "KILLED"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMeta {
    pub id: String,
    pub experiment: String,
    pub status: RunStatus,
    pub started: u64,
    pub ended: Option<u64>,
}

/// One logged metric value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Metric {
    pub timestamp: u64,
    pub value: f32,
    pub step: u64,
}

impl std::str::FromStr for Metric {
    type Err = anyhow::Error;
    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut parts = line.split_whitespace();
        let mut next = || parts.next().context("truncated metric line");
        Ok(Self {
            timestamp: next()?.parse()?,
            value: next()?.parse()?,
            step: next()?.parse()?,
        })
    }
}

/// A run directory. Metric files are append-only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Run {
    pub(super) meta: RunMeta,
    pub(super) path: PathBuf,
}

impl Run {
    pub fn id(&self) -> &str {
        &self.meta.id
    }
    pub fn status(&self) -> RunStatus {
        self.meta.status
    }
    pub fn meta(&self) -> &RunMeta {
        &self.meta
    }
    pub fn path(&self) -> &Path {
        &self.path
    }
    pub fn artifacts(&self) -> PathBuf {
        self.path.join(ARTIFACTS)
    }

    pub fn log_metric(&self, name: &str, value: f32, step: u64) -> anyhow::Result<()> {
        let path = self.path.join(METRICS).join(key(name)?);
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("opening metric {}", path.display()))?;
        writeln!(file, "{} {} {}", now(), value, step)?;
        Ok(())
    }
    pub fn log_param(&self, name: &str, value: impl ToString) -> anyhow::Result<()> {
        self.put(PARAMS, name, value.to_string())
    }
    pub fn set_tag(&self, name: &str, value: impl ToString) -> anyhow::Result<()> {
        self.put(TAGS, name, value.to_string())
    }

    pub fn metric(&self, name: &str) -> anyhow::Result<Vec<Metric>> {
        let path = self.path.join(METRICS).join(key(name)?);
        if !path.exists() {
            return Ok(Vec::new());
        }
        std::fs::read_to_string(&path)
            .with_context(|| format!("reading metric {}", path.display()))?
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(str::parse)
            .collect()
    }
    pub fn param(&self, name: &str) -> anyhow::Result<Option<String>> {
        self.get(PARAMS, name)
    }
    pub fn tag(&self, name: &str) -> anyhow::Result<Option<String>> {
        self.get(TAGS, name)
    }

    /// Last value of every metric.
    pub fn summary(&self) -> anyhow::Result<BTreeMap<String, f32>> {
        let mut summary = BTreeMap::new();
        for entry in std::fs::read_dir(self.path.join(METRICS))? {
            let name = entry?.file_name().to_string_lossy().into_owned();
            if let Some(last) = self.metric(&name)?.last() {
                summary.insert(name, last.value);
            }
        }
        Ok(summary)
    }

    pub fn finish(&mut self, status: RunStatus) -> anyhow::Result<()> {
        self.meta.status = status;
        self.meta.ended = Some(now());
        write(&self.path.join("meta.json"), &self.meta)?;
        log::debug!("run {} {}", self.meta.id, status);
        Ok(())
    }

    fn put(&self, dir: &str, name: &str, value: String) -> anyhow::Result<()> {
        let path = self.path.join(dir).join(key(name)?);
        std::fs::write(&path, value).with_context(|| format!("writing {}", path.display()))
    }
    fn get(&self, dir: &str, name: &str) -> anyhow::Result<Option<String>> {
        let path = self.path.join(dir).join(key(name)?);
        match std::fs::read_to_string(&path) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
        }
    }
}
