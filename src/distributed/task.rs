use super::*;
use crate::config::Context;
use crate::data::DataModule;
use crate::model::Autoencoder;
use crate::model::AutoencoderConfig;
use crate::training::Settings;
use crate::training::Trainer;
use crate::*;
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::backend::Backend;
use serde::Deserialize;
use serde::Serialize;

/// Arguments of [`Task::TrainModel`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainArgs {
    pub data: DataModule,
    pub input_size: usize,
    pub num_gpus: usize,
    pub single_node: bool,
    #[serde(default)]
    pub settings: Settings,
}

/// A routine and its arguments, serialisable so that it can be shipped to replicas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "routine", content = "args", rename_all = "snake_case")]
pub enum Task {
    TrainModel(TrainArgs),
}

impl Task {
    pub fn train_model(data: &DataModule, input_size: usize, num_gpus: usize, single_node: bool) -> Self {
        Self::TrainModel(TrainArgs {
            data: data.clone(),
            input_size,
            num_gpus,
            single_node,
            settings: Settings::default(),
        })
    }
    pub fn with_settings(self, settings: Settings) -> Self {
        match self {
            Self::TrainModel(args) => Self::TrainModel(TrainArgs { settings, ..args }),
        }
    }

    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
    pub fn decode(bytes: &[u8]) -> anyhow::Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Run this task as one member of a replica group.
    pub fn execute<B: AutodiffBackend>(
        &self,
        context: &Context,
        member: &Member,
        tags: &[(String, String)],
    ) -> anyhow::Result<Outcome> {
        match self {
            Self::TrainModel(args) => {
                let trainer = Trainer::<B>::new(context, &args.data, args.input_size, args.num_gpus, args.single_node)?
                    .with_settings(args.settings);
                let trainer = tags
                    .iter()
                    .fold(trainer, |trainer, (key, value)| trainer.with_tag(key, value));
                let fitted = trainer.fit(member)?;
                Ok(Outcome {
                    config: fitted.model.config(),
                    params: fitted.model.flatten()?,
                    epochs: fitted.epochs,
                    loss: fitted.loss,
                    stopped_early: fitted.stopped_early,
                    run: fitted.run,
                })
            }
        }
    }
}

/// What a replica hands back to the driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub config: AutoencoderConfig,
    pub params: Vec<f32>,
    pub epochs: usize,
    pub loss: Energy,
    pub stopped_early: bool,
    pub run: Option<String>,
}

impl Outcome {
    pub fn decode<B: Backend>(&self, device: &B::Device) -> anyhow::Result<Autoencoder<B>> {
        self.config.init::<B>(device).with_flat(&self.params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    #[test]
    fn ships_as_json() {
        let data = DataModule::new("/t/train", "/t/test", &["a".into(), "defect".into()]);
        let task = Task::train_model(&data, 1, 1, true);
        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["routine"], "train_model");
        assert_eq!(json["args"]["input_size"], 1);
        assert_eq!(Task::decode(&task.encode().unwrap()).unwrap(), task);
    }

    #[test]
    fn decodes_outcome() {
        let device = Default::default();
        let config = AutoencoderConfig::new(3);
        let model = config.init::<NdArray>(&device);
        let outcome = Outcome {
            config,
            params: model.flatten().unwrap(),
            epochs: 4,
            loss: 0.3,
            stopped_early: true,
            run: None,
        };
        let back = outcome.decode::<NdArray>(&device).unwrap();
        assert_eq!(back.flatten().unwrap(), outcome.params);
    }
}
