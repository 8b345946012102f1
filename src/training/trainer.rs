use super::*;
use crate::config::Context;
use crate::config::Credentials;
use crate::data::DataModule;
use crate::data::Loader;
use crate::model::Autoencoder;
use crate::model::AutoencoderConfig;
use crate::tracking::Run;
use crate::tracking::RunStatus;
use crate::tracking::Tracker;
use crate::*;
use anyhow::Context as _;
use burn::module::AutodiffModule;
use burn::optim::AdamConfig;
use burn::optim::GradientsParams;
use burn::optim::Optimizer;
use burn::tensor::ElementConversion;
use burn::tensor::backend::AutodiffBackend;
use serde::Deserialize;
use serde::Serialize;

/// Loop tunables. Defaults come from the crate constants.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub max_epochs: usize,
    pub patience: usize,
    pub min_delta: Energy,
    pub learning_rate: f64,
    pub log_every_n_steps: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_epochs: EPOCHS,
            patience: PATIENCE,
            min_delta: MIN_DELTA,
            learning_rate: LEARNING_RATE,
            log_every_n_steps: LOG_EVERY_N_STEPS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Init,
    Configured,
    Running,
    Terminal,
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Init => write!(f, "init"),
            Self::Configured => write!(f, "configured"),
            Self::Running => write!(f, "running"),
            Self::Terminal => write!(f, "terminal"),
        }
    }
}

/// A trained model and how the loop ended.
#[derive(Debug)]
pub struct Fitted<B: AutodiffBackend> {
    pub model: Autoencoder<B>,
    pub epochs: usize,
    pub loss: Energy,
    pub stopped_early: bool,
    pub interrupted: bool,
    pub run: Option<String>,
}

/// Drives one replica through `Init → Configured → Running → Terminal`.
///
/// Only the leader replica writes to the experiment tracker.
pub struct Trainer<'a, B: AutodiffBackend> {
    state: State,
    context: &'a Context,
    credentials: Option<Credentials>,
    data: &'a DataModule,
    device: B::Device,
    model: Option<Autoencoder<B>>,
    settings: Settings,
    num_gpus: usize,
    single_node: bool,
    tags: Vec<(String, String)>,
    run: Option<Run>,
}

impl<'a, B: AutodiffBackend> Trainer<'a, B> {
    pub fn new(
        context: &'a Context,
        data: &'a DataModule,
        input_size: usize,
        num_gpus: usize,
        single_node: bool,
    ) -> anyhow::Result<Self> {
        anyhow::ensure!(input_size > 0, "autoencoder needs at least one input feature");
        anyhow::ensure!(
            data.fields.iter().any(|f| f.name == TARGET_COLUMN),
            "data module has no {} field",
            TARGET_COLUMN
        );
        let credentials = context.credentials.clone();
        if !credentials.authorized() {
            log::debug!("no tracking credentials in scope");
        }
        let device = accelerator::<B>(num_gpus);
        let model = AutoencoderConfig::new(input_size).init::<B>(&device);
        log::info!("{:<20}{}", "trainer", State::Init);
        Ok(Self {
            state: State::Init,
            context,
            credentials: Some(credentials),
            data,
            device,
            model: Some(model),
            settings: Settings::default(),
            num_gpus,
            single_node,
            tags: Vec::new(),
            run: None,
        })
    }
    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }
    pub fn with_tag(mut self, key: &str, value: impl ToString) -> Self {
        self.tags.push((key.to_string(), value.to_string()));
        self
    }
    pub fn state(&self) -> State {
        self.state
    }

    pub fn fit(mut self, group: &impl Reduce) -> anyhow::Result<Fitted<B>> {
        let result = self.configure(group).and_then(|model| {
            self.transition(State::Running);
            self.epochs(model, group)
        });
        let result = match self.run {
            Some(ref mut run) => close(run, result),
            None => result,
        };
        self.credentials = None;
        self.transition(State::Terminal);
        let run = self.run.as_ref().map(|r| r.id().to_string());
        result.map(|fitted| Fitted { run, ..fitted })
    }

    fn transition(&mut self, next: State) {
        log::info!("{:<20}{} -> {}", "trainer", self.state, next);
        self.state = next;
    }

    fn configure(&mut self, group: &impl Reduce) -> anyhow::Result<Autoencoder<B>> {
        let mut model = self.model.take().context("trainer already fitted")?;
        if group.world() > 1 {
            let flat = group.broadcast(model.flatten()?)?;
            model = model.with_flat(&flat)?;
        }
        if group.is_leader() {
            let config = &self.context.config;
            let experiment = Tracker::at(config.tracking_root()).experiment(&config.pl_experiment_path)?;
            let run = experiment.start_run()?;
            let shape = model.config();
            run.log_param("input_size", shape.input_size)?;
            run.log_param("hidden_size", shape.hidden_size)?;
            run.log_param("latent_dim", shape.latent_dim)?;
            run.log_param("batch_size", self.data.batch_size)?;
            run.log_param("max_epochs", self.settings.max_epochs)?;
            run.log_param("patience", self.settings.patience)?;
            run.log_param("min_delta", self.settings.min_delta)?;
            run.log_param("learning_rate", self.settings.learning_rate)?;
            run.log_param("num_gpus", self.num_gpus)?;
            run.log_param("single_node", self.single_node)?;
            run.log_param("world_size", group.world())?;
            if let Some(host) = self.credentials.as_ref().and_then(|c| c.host()) {
                run.set_tag("host", host)?;
            }
            for (key, value) in self.tags.iter() {
                run.set_tag(key, value)?;
            }
            log::info!("{:<20}{} / {}", "tracking", experiment.name(), run.id());
            self.run = Some(run);
        }
        self.transition(State::Configured);
        Ok(model)
    }

    fn epochs(&self, mut model: Autoencoder<B>, group: &impl Reduce) -> anyhow::Result<Fitted<B>> {
        let train = self.data.train_dataloader().shard(group.rank(), group.world());
        let valid = self.data.val_dataloader().shard(group.rank(), group.world());
        let every = self.settings.log_every_n_steps.max(1) as u64;
        let mut optim = AdamConfig::new().init::<B, Autoencoder<B>>();
        let mut stopping = EarlyStopping::new(self.settings.patience, self.settings.min_delta);
        let mut fitted = Fitted {
            model: model.clone(),
            epochs: 0,
            loss: Energy::NAN,
            stopped_early: false,
            interrupted: false,
            run: None,
        };
        let mut step = 0u64;
        for epoch in 0..self.settings.max_epochs {
            let (mut total, mut rows) = (0f64, 0usize);
            for batch in &train {
                let batch = batch?;
                if batch.is_empty() {
                    continue;
                }
                let loss = model.training_step(&batch, TARGET_COLUMN, &self.device)?;
                let value = loss.clone().into_scalar().elem::<Energy>();
                anyhow::ensure!(value.is_finite(), "non-finite training loss {} at step {}", value, step);
                let grads = GradientsParams::from_grads(loss.backward(), &model);
                model = optim.step(self.settings.learning_rate, model, grads);
                total += value as f64 * batch.len() as f64;
                rows += batch.len();
                step += 1;
                if step % every == 0 {
                    self.metric("train_loss_step", value, step)?;
                }
            }
            let mut values = model.flatten()?;
            values.push(if rows > 0 { (total / rows as f64) as f32 } else { 0. });
            let (mut values, weight) = group.reduce(values, rows as f64)?;
            anyhow::ensure!(weight > 0., "no training rows in {}", self.data.train_path);
            let loss = values.pop().context("empty reduction")?;
            if group.world() > 1 {
                model = model.with_flat(&values)?;
            }
            let validation = self.validate(&model.valid(), &valid, group)?;
            self.metric("train_loss_epoch", loss, step)?;
            self.metric("train_loss", loss, step)?;
            if let Some(val_loss) = validation {
                self.metric("val_loss", val_loss, step)?;
            }
            log::info!(
                "{:<20}{:<20}{:<20}",
                format!("epoch {}", epoch + 1),
                format!("train {:.5}", loss),
                validation.map_or("val -".to_string(), |v| format!("val {:.5}", v)),
            );
            fitted.epochs = epoch + 1;
            fitted.loss = loss;
            if let Decision::Stop = stopping.check(loss, epoch) {
                log::info!(
                    "early stop after epoch {}, best train_loss {:.5} at epoch {}",
                    epoch + 1,
                    stopping.best(),
                    stopping.best_epoch() + 1
                );
                fitted.stopped_early = true;
                break;
            }
            if group.any(crate::interrupted())? {
                log::warn!("interrupted after epoch {}", epoch + 1);
                fitted.interrupted = true;
                break;
            }
        }
        fitted.model = model;
        Ok(fitted)
    }

    /// Row-weighted mean loss over the validation loader, `None` when it is empty.
    fn validate(
        &self,
        model: &Autoencoder<B::InnerBackend>,
        loader: &Loader,
        group: &impl Reduce,
    ) -> anyhow::Result<Option<Energy>> {
        let (mut total, mut rows) = (0f64, 0usize);
        for batch in loader {
            let batch = batch?;
            if batch.is_empty() {
                continue;
            }
            let loss = model
                .training_step(&batch, TARGET_COLUMN, &self.device)?
                .into_scalar()
                .elem::<Energy>();
            total += loss as f64 * batch.len() as f64;
            rows += batch.len();
        }
        let mean = if rows > 0 { (total / rows as f64) as f32 } else { 0. };
        let (values, weight) = group.reduce(vec![mean], rows as f64)?;
        Ok(values.first().copied().filter(|_| weight > 0.))
    }

    fn metric(&self, key: &str, value: Energy, step: u64) -> anyhow::Result<()> {
        match self.run {
            Some(ref run) => run.log_metric(key, value, step),
            None => Ok(()),
        }
    }
}

/// Device for the requested accelerator count. Only the CPU backend is compiled in.
/// Store the fitted model and settle the run status. The run is always
/// finished, and a bookkeeping error never hides a training error.
fn close<B: AutodiffBackend>(run: &mut Run, result: anyhow::Result<Fitted<B>>) -> anyhow::Result<Fitted<B>> {
    let result = result.and_then(|fitted| {
        fitted.model.save(run.artifacts().join("model"))?;
        Ok(fitted)
    });
    let status = match result {
        Ok(ref fitted) if fitted.interrupted => RunStatus::Killed,
        Ok(_) => RunStatus::Finished,
        Err(_) => RunStatus::Failed,
    };
    match (result, run.finish(status)) {
        (Err(e), Err(finishing)) => {
            log::error!("finishing run {}: {:#}", run.id(), finishing);
            Err(e)
        }
        (Ok(_), Err(finishing)) => Err(finishing),
        (result, Ok(())) => result,
    }
}

fn accelerator<B: AutodiffBackend>(num_gpus: usize) -> B::Device {
    if num_gpus > 0 {
        log::info!("{:<20}cpu ({} gpu requested, none available)", "accelerator", num_gpus);
    } else {
        log::info!("{:<20}cpu", "accelerator");
    }
    B::Device::default()
}

/// Build, train and return an autoencoder on the train/validation loaders of `data`.
pub fn train_model<B: AutodiffBackend>(
    context: &Context,
    data: &DataModule,
    input_size: usize,
    num_gpus: usize,
    single_node: bool,
) -> anyhow::Result<Autoencoder<B>> {
    Trainer::<B>::new(context, data, input_size, num_gpus, single_node)?
        .fit(&Solo)
        .map(|fitted| fitted.model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::table::Column;
    use crate::table::Frame;
    use crate::table::Table;
    use crate::table::WriteOptions;
    use burn::backend::Autodiff;
    use burn::backend::NdArray;

    type A = Autodiff<NdArray>;

    fn frame(rows: usize, offset: usize) -> Frame {
        let a = (0..rows).map(|i| i as f64 / rows as f64).collect::<Vec<_>>();
        Frame::default()
            .with("a", Column::Float(a.clone()))
            .unwrap()
            .with("b", Column::Float(vec![0.5; rows]))
            .unwrap()
            .with("defect", Column::Int(a.iter().map(|x| (*x > 0.5) as i64).collect()))
            .unwrap()
            .with("id", Column::Int((1..=rows).map(|i| (i + offset) as i64).collect()))
            .unwrap()
    }

    fn setup(dir: &std::path::Path) -> (Context, DataModule) {
        let config = Config::catalog(dir, "test");
        Table::at(&config.train_table).overwrite(&frame(48, 0), WriteOptions::default()).unwrap();
        Table::at(&config.test_table).overwrite(&frame(16, 48), WriteOptions::default()).unwrap();
        let data = DataModule::new(
            &config.train_table,
            &config.test_table,
            &["a".into(), "b".into(), "defect".into()],
        )
        .with_batch_size(16);
        (Context::new(config, Credentials::new("https://example.cloud", "dapi-secret")), data)
    }

    fn settings(max_epochs: usize, patience: usize, learning_rate: f64) -> Settings {
        Settings {
            max_epochs,
            patience,
            min_delta: 0.,
            learning_rate,
            log_every_n_steps: 1,
        }
    }

    #[test]
    fn fits() {
        let dir = tempfile::tempdir().unwrap();
        let (context, data) = setup(dir.path());
        let trainer = Trainer::<A>::new(&context, &data, 2, 1, true)
            .unwrap()
            .with_settings(settings(3, 3, 1e-2));
        assert_eq!(trainer.state(), State::Init);
        let fitted = trainer.fit(&Solo).unwrap();
        assert!((1..=3).contains(&fitted.epochs));
        assert!(fitted.loss.is_finite());

        let experiment = Tracker::at(context.config.tracking_root())
            .find(&context.config.pl_experiment_path)
            .unwrap()
            .unwrap();
        let run = experiment.latest().unwrap().unwrap();
        assert_eq!(Some(run.id().to_string()), fitted.run);
        assert_eq!(run.status(), RunStatus::Finished);
        assert_eq!(run.metric("train_loss_epoch").unwrap().len(), fitted.epochs);
        assert_eq!(run.metric("val_loss").unwrap().len(), fitted.epochs);
        // 3 batches per epoch
        assert_eq!(run.metric("train_loss_step").unwrap().len(), 3 * fitted.epochs);
        assert_eq!(run.param("single_node").unwrap().as_deref(), Some("true"));
        assert_eq!(run.tag("host").unwrap().as_deref(), Some("https://example.cloud"));
        assert!(std::fs::read_dir(run.artifacts()).unwrap().next().is_some());
    }

    #[test]
    fn stops_early() {
        let dir = tempfile::tempdir().unwrap();
        let (context, data) = setup(dir.path());
        let fitted = Trainer::<A>::new(&context, &data, 2, 1, true)
            .unwrap()
            .with_settings(settings(20, 2, 0.))
            .fit(&Solo)
            .unwrap();
        // a frozen model never improves after its first epoch
        assert!(fitted.stopped_early);
        assert_eq!(fitted.epochs, 3);
    }

    #[test]
    fn requires_target() {
        let dir = tempfile::tempdir().unwrap();
        let (context, data) = setup(dir.path());
        let data = DataModule::new(&data.train_path, &data.test_path, &["a".into(), "b".into()]);
        assert!(Trainer::<A>::new(&context, &data, 2, 1, true).is_err());
    }

    #[test]
    fn fails_run_on_missing_table() {
        let dir = tempfile::tempdir().unwrap();
        let (context, data) = setup(dir.path());
        let data = DataModule::new("/nonexistent/train", &data.test_path, &["a".into(), "defect".into()]);
        assert!(train_model::<A>(&context, &data, 1, 0, true).is_err());
        let run = Tracker::at(context.config.tracking_root())
            .find(&context.config.pl_experiment_path)
            .unwrap()
            .unwrap()
            .latest()
            .unwrap()
            .unwrap();
        assert_eq!(run.status(), RunStatus::Failed);
    }

    /// A group in which some other replica has been interrupted.
    struct Interrupting;

    impl Reduce for Interrupting {
        fn rank(&self) -> usize {
            0
        }
        fn world(&self) -> usize {
            1
        }
        fn reduce(&self, values: Vec<f32>, weight: f64) -> anyhow::Result<(Vec<f32>, f64)> {
            Ok((values, weight))
        }
        fn any(&self, _: bool) -> anyhow::Result<bool> {
            Ok(true)
        }
    }

    fn fitted(input_size: usize) -> Fitted<A> {
        Fitted {
            model: AutoencoderConfig::new(input_size).init::<A>(&Default::default()),
            epochs: 1,
            loss: 0.5,
            stopped_early: false,
            interrupted: false,
            run: None,
        }
    }

    #[test]
    fn kills_run_on_interrupt() {
        let dir = tempfile::tempdir().unwrap();
        let (context, data) = setup(dir.path());
        let fitted = Trainer::<A>::new(&context, &data, 2, 1, true)
            .unwrap()
            .with_settings(settings(5, 3, 1e-2))
            .fit(&Interrupting)
            .unwrap();
        assert!(fitted.interrupted);
        assert!(!fitted.stopped_early);
        assert_eq!(fitted.epochs, 1);
        let run = Tracker::at(context.config.tracking_root())
            .find(&context.config.pl_experiment_path)
            .unwrap()
            .unwrap()
            .latest()
            .unwrap()
            .unwrap();
        assert_eq!(run.status(), RunStatus::Killed);
        assert!(std::fs::read_dir(run.artifacts()).unwrap().next().is_some());
    }

    #[test]
    fn fails_run_when_artifact_unwritable() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = Tracker::at(dir.path());
        let mut run = tracker.experiment("/close").unwrap().start_run().unwrap();
        std::fs::remove_dir(run.artifacts()).unwrap();
        std::fs::write(run.artifacts(), b"").unwrap();
        assert!(close(&mut run, Ok(fitted(2))).is_err());
        let run = tracker.find("/close").unwrap().unwrap().latest().unwrap().unwrap();
        assert_eq!(run.status(), RunStatus::Failed);
        assert!(run.meta().ended.is_some());
    }

    #[test]
    fn keeps_training_error_over_finish_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut run = Tracker::at(dir.path()).experiment("/close").unwrap().start_run().unwrap();
        std::fs::remove_file(run.path().join("meta.json")).unwrap();
        std::fs::create_dir(run.path().join("meta.json")).unwrap();
        let err = close::<A>(&mut run, Err(anyhow::anyhow!("loss diverged"))).unwrap_err();
        assert_eq!(err.to_string(), "loss diverged");
    }
}
