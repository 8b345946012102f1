use super::run::ARTIFACTS;
use super::run::METRICS;
use super::run::PARAMS;
use super::run::TAGS;
use super::*;
use anyhow::Context;
use serde::Deserialize;
use serde::Serialize;
use std::path::Path;
use std::path::PathBuf;

const META: &str = "meta.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperimentMeta {
    pub id: String,
    pub name: String,
    pub created: u64,
}

/// Root directory of an experiment store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tracker {
    root: PathBuf,
}

impl Tracker {
    pub fn at(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn experiments(&self) -> anyhow::Result<Vec<Experiment>> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }
        let mut experiments = Vec::new();
        for entry in std::fs::read_dir(&self.root)
            .with_context(|| format!("listing {}", self.root.display()))?
        {
            let path = entry?.path();
            let meta = path.join(META);
            if meta.is_file() {
                experiments.push(Experiment {
                    meta: read(&meta)?,
                    path,
                });
            }
        }
        experiments.sort_by_key(|e| e.meta.created);
        Ok(experiments)
    }

    pub fn find(&self, name: &str) -> anyhow::Result<Option<Experiment>> {
        Ok(self
            .experiments()?
            .into_iter()
            .find(|e| e.meta.name == name))
    }

    /// Look up the experiment called `name`, creating it if absent.
    pub fn experiment(&self, name: &str) -> anyhow::Result<Experiment> {
        if let Some(experiment) = self.find(name)? {
            return Ok(experiment);
        }
        let meta = ExperimentMeta {
            id: uuid::Uuid::now_v7().simple().to_string(),
            name: name.to_string(),
            created: now(),
        };
        let path = self.root.join(&meta.id);
        std::fs::create_dir_all(&path)
            .with_context(|| format!("creating experiment {}", path.display()))?;
        write(&path.join(META), &meta)?;
        log::debug!("created experiment {} ({})", meta.name, meta.id);
        Ok(Experiment { meta, path })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Experiment {
    meta: ExperimentMeta,
    path: PathBuf,
}

impl Experiment {
    pub fn id(&self) -> &str {
        &self.meta.id
    }
    pub fn name(&self) -> &str {
        &self.meta.name
    }
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn start_run(&self) -> anyhow::Result<Run> {
        let meta = RunMeta {
            id: uuid::Uuid::now_v7().simple().to_string(),
            experiment: self.meta.id.clone(),
            status: RunStatus::Running,
            started: now(),
            ended: None,
        };
        let path = self.path.join(&meta.id);
        for dir in [METRICS, PARAMS, TAGS, ARTIFACTS] {
            std::fs::create_dir_all(path.join(dir))
                .with_context(|| format!("creating run {}", path.display()))?;
        }
        write(&path.join(META), &meta)?;
        log::debug!("started run {} in {}", meta.id, self.meta.name);
        Ok(Run { meta, path })
    }

    /// Runs oldest first.
    pub fn runs(&self) -> anyhow::Result<Vec<Run>> {
        let mut runs = Vec::new();
        for entry in std::fs::read_dir(&self.path)
            .with_context(|| format!("listing {}", self.path.display()))?
        {
            let path = entry?.path();
            let meta = path.join(META);
            if path.is_dir() && meta.is_file() {
                runs.push(Run {
                    meta: read(&meta)?,
                    path,
                });
            }
        }
        runs.sort_by(|a, b| (a.meta.started, &a.meta.id).cmp(&(b.meta.started, &b.meta.id)));
        Ok(runs)
    }

    pub fn latest(&self) -> anyhow::Result<Option<Run>> {
        Ok(self.runs()?.pop())
    }
}

pub(super) fn read<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let file = std::fs::File::open(path).with_context(|| format!("opening {}", path.display()))?;
    serde_json::from_reader(std::io::BufReader::new(file))
        .with_context(|| format!("parsing {}", path.display()))
}

pub(super) fn write<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let file = std::fs::File::create(path).with_context(|| format!("writing {}", path.display()))?;
    Ok(serde_json::to_writer_pretty(file, value)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reuses_experiment() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = Tracker::at(dir.path());
        let a = tracker.experiment("/lakeflow/main/pl_autoencoder").unwrap();
        let b = tracker.experiment("/lakeflow/main/pl_autoencoder").unwrap();
        let c = tracker.experiment("/lakeflow/dev/pl_autoencoder").unwrap();
        assert_eq!(a, b);
        assert_ne!(a.id(), c.id());
        assert_eq!(tracker.experiments().unwrap().len(), 2);
    }

    #[test]
    fn empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = Tracker::at(dir.path().join("mlruns"));
        assert!(tracker.experiments().unwrap().is_empty());
        assert!(tracker.find("x").unwrap().is_none());
    }

    #[test]
    fn orders_runs() {
        let dir = tempfile::tempdir().unwrap();
        let experiment = Tracker::at(dir.path()).experiment("e").unwrap();
        let first = experiment.start_run().unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = experiment.start_run().unwrap();
        let runs = experiment.runs().unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].id(), first.id());
        assert_eq!(experiment.latest().unwrap().unwrap().id(), second.id());
    }
}
