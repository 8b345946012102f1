use super::*;
use crate::MAX_PROCESSES;
use crate::config::Context;
use anyhow::Context as _;
use burn::tensor::backend::AutodiffBackend;
use serde::Deserialize;
use serde::Serialize;
use std::sync::Arc;

/// Runs a [`Task`] on `num_processes` synchronised replicas and returns rank 0's outcome.
///
/// Replicas are dedicated threads in this process, at most [`MAX_PROCESSES`]. `local_mode` and `use_gpu`
/// are recorded on the run; there is no remote launcher and no GPU backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Distributor {
    pub num_processes: usize,
    pub local_mode: bool,
    pub use_gpu: bool,
}

impl Distributor {
    pub fn new(num_processes: usize, local_mode: bool, use_gpu: bool) -> Self {
        Self {
            num_processes,
            local_mode,
            use_gpu,
        }
    }

    pub async fn run<B: AutodiffBackend>(&self, context: &Context, task: Task) -> anyhow::Result<Outcome> {
        anyhow::ensure!(self.num_processes > 0, "distributor needs at least one process");
        anyhow::ensure!(
            self.num_processes <= MAX_PROCESSES,
            "distributor runs at most {} processes, got {}",
            MAX_PROCESSES,
            self.num_processes
        );
        if self.num_processes > num_cpus::get() {
            log::warn!("{} replicas on {} cpus", self.num_processes, num_cpus::get());
        }
        if !self.local_mode {
            log::info!("{:<20}replicas run in this process", "cluster mode");
        }
        if self.use_gpu {
            log::warn!("gpu requested, replicas train on cpu");
        }
        log::info!("{:<20}{} replicas", "distributor", self.num_processes);
        let tags = Arc::new(vec![
            ("num_processes".to_string(), self.num_processes.to_string()),
            ("local_mode".to_string(), self.local_mode.to_string()),
            ("use_gpu".to_string(), self.use_gpu.to_string()),
        ]);
        let payload = Arc::new(task.encode()?);
        let group = Collective::new(self.num_processes);
        // each replica blocks in the collective until the whole group arrives,
        // so none may wait for a slot in a bounded pool
        let replicas = (0..self.num_processes)
            .map(|rank| {
                let member = group.member(rank);
                let context = context.clone();
                let payload = payload.clone();
                let tags = tags.clone();
                let (tx, rx) = tokio::sync::oneshot::channel();
                std::thread::Builder::new()
                    .name(format!("replica-{}", rank))
                    .spawn(move || {
                        let _guard = Guard(member.clone());
                        let result = Task::decode(&payload)
                            .and_then(|task| task.execute::<B>(&context, &member, &tags));
                        if result.is_err() {
                            member.abort();
                        }
                        let _ = tx.send(result);
                    })
                    .map(|_| rx)
                    .with_context(|| format!("spawning replica {}", rank))
            })
            .collect::<anyhow::Result<Vec<_>>>()
            .inspect_err(|_| group.abort())?;
        let mut outcomes = Vec::with_capacity(self.num_processes);
        let mut failure: Option<anyhow::Error> = None;
        for (rank, joined) in futures::future::join_all(replicas).await.into_iter().enumerate() {
            let e = match joined {
                Ok(Ok(outcome)) => {
                    outcomes.push(outcome);
                    continue;
                }
                Ok(Err(e)) => e.context(format!("replica {}", rank)),
                Err(_) => anyhow::anyhow!("replica {} panicked", rank),
            };
            log::debug!("{:#}", e);
            // keep the root cause over the aborts it triggered
            if failure
                .as_ref()
                .is_none_or(|f| f.is::<Aborted>() && !e.is::<Aborted>())
            {
                failure = Some(e);
            }
        }
        if let Some(e) = failure {
            return Err(e);
        }
        let outcome = outcomes
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("no replica returned"))?;
        log::info!(
            "{:<20}{} epochs, train_loss {:.5}",
            "distributor",
            outcome.epochs,
            outcome.loss
        );
        Ok(outcome)
    }
}

/// Aborts the group if a replica unwinds.
struct Guard(Member);

impl Drop for Guard {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.abort();
        }
    }
}
