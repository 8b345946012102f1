use super::*;
use crate::data::Batch;
use crate::*;
use anyhow::Context;
use burn::module::Module;
use burn::module::Param;
use burn::nn::Linear;
use burn::nn::LinearConfig;
use burn::nn::Relu;
use burn::record::FullPrecisionSettings;
use burn::record::NamedMpkFileRecorder;
use burn::tensor::Tensor;
use burn::tensor::TensorData;
use burn::tensor::activation::sigmoid;
use burn::tensor::backend::Backend;
use serde::Deserialize;
use serde::Serialize;
use std::path::Path;

/// Layer widths of the autoencoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoencoderConfig {
    pub input_size: usize,
    pub hidden_size: usize,
    pub latent_dim: usize,
}

impl AutoencoderConfig {
    pub fn new(input_size: usize) -> Self {
        Self {
            input_size,
            hidden_size: HIDDEN_SIZE,
            latent_dim: LATENT_DIM,
        }
    }
    pub fn init<B: Backend>(&self, device: &B::Device) -> Autoencoder<B> {
        Autoencoder {
            encoder_in: LinearConfig::new(self.input_size, self.hidden_size).init(device),
            encoder_out: LinearConfig::new(self.hidden_size, self.latent_dim).init(device),
            decoder_in: LinearConfig::new(self.latent_dim, self.hidden_size).init(device),
            decoder_out: LinearConfig::new(self.hidden_size, 1).init(device),
            activation: Relu::new(),
        }
    }
    /// Number of scalars in [`Autoencoder::flatten`].
    pub fn parameters(&self) -> usize {
        let (i, h, l) = (self.input_size, self.hidden_size, self.latent_dim);
        (i * h + h) + (h * l + l) + (l * h + h) + (h + 1)
    }
}

/// Encoder: linear → ReLU → linear → ReLU.
/// Decoder: linear → ReLU → linear → sigmoid, down to one probability per row.
#[derive(Module, Debug)]
pub struct Autoencoder<B: Backend> {
    encoder_in: Linear<B>,
    encoder_out: Linear<B>,
    decoder_in: Linear<B>,
    decoder_out: Linear<B>,
    activation: Relu,
}

impl<B: Backend> Autoencoder<B> {
    pub fn config(&self) -> AutoencoderConfig {
        let [input_size, hidden_size] = self.encoder_in.weight.dims();
        let [_, latent_dim] = self.encoder_out.weight.dims();
        AutoencoderConfig {
            input_size,
            hidden_size,
            latent_dim,
        }
    }

    pub fn encode(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = self.activation.forward(self.encoder_in.forward(x));
        self.activation.forward(self.encoder_out.forward(x))
    }
    pub fn decode(&self, z: Tensor<B, 2>) -> Tensor<B, 2> {
        let z = self.activation.forward(self.decoder_in.forward(z));
        sigmoid(self.decoder_out.forward(z))
    }
    /// `[rows, input_size]` → `[rows, 1]`, every value in [0, 1].
    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        self.decode(self.encode(x))
    }

    /// Stack every non-target field of `batch`, in batch order, into
    /// `[rows, input_size]` and clamp into [0, 1].
    pub fn features(&self, batch: &Batch, target: &str, device: &B::Device) -> anyhow::Result<Tensor<B, 2>> {
        let columns = batch
            .fields()
            .filter(|(name, _)| *name != target)
            .map(|(_, values)| values)
            .collect::<Vec<_>>();
        let input_size = self.config().input_size;
        anyhow::ensure!(
            columns.len() == input_size,
            "batch has {} feature fields, model expects {}",
            columns.len(),
            input_size
        );
        let rows = batch.len();
        let values = (0..rows)
            .flat_map(|r| columns.iter().map(move |c| c[r]))
            .collect::<Vec<_>>();
        Ok(Tensor::<B, 2>::from_data(TensorData::new(values, [rows, input_size]), device).clamp(0., 1.))
    }

    pub fn labels(batch: &Batch, target: &str, device: &B::Device) -> anyhow::Result<Tensor<B, 1>> {
        let values = batch
            .field(target)
            .with_context(|| format!("batch has no target field {}", target))?
            .to_vec();
        Ok(Tensor::<B, 1>::from_data(TensorData::new(values, [batch.len()]), device))
    }

    /// Binary cross-entropy of the model's predictions for `batch` against its target field.
    pub fn training_step(&self, batch: &Batch, target: &str, device: &B::Device) -> anyhow::Result<Tensor<B, 1>> {
        let x = self.features(batch, target, device)?;
        let y = Self::labels(batch, target, device)?;
        let p = self.forward(x).flatten::<1>(0, 1);
        Ok(binary_cross_entropy(p, y))
    }

    fn layers(&self) -> [&Linear<B>; 4] {
        [
            &self.encoder_in,
            &self.encoder_out,
            &self.decoder_in,
            &self.decoder_out,
        ]
    }

    /// All weights and biases in layer order, for transport between replicas.
    pub fn flatten(&self) -> anyhow::Result<Vec<f32>> {
        let mut flat = Vec::with_capacity(self.config().parameters());
        for layer in self.layers() {
            flat.extend(values(layer.weight.val())?);
            if let Some(ref bias) = layer.bias {
                flat.extend(values(bias.val())?);
            }
        }
        Ok(flat)
    }

    /// Replace every parameter with values from [`Autoencoder::flatten`] order.
    /// Parameter ids are kept, so optimizer state stays attached.
    pub fn with_flat(mut self, mut flat: &[f32]) -> anyhow::Result<Self> {
        let expected = self.config().parameters();
        anyhow::ensure!(
            flat.len() == expected,
            "expected {} parameters, got {}",
            expected,
            flat.len()
        );
        self.encoder_in = reload(self.encoder_in, &mut flat);
        self.encoder_out = reload(self.encoder_out, &mut flat);
        self.decoder_in = reload(self.decoder_in, &mut flat);
        self.decoder_out = reload(self.decoder_out, &mut flat);
        Ok(self)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        self.clone()
            .save_file(path.as_ref().to_path_buf(), &NamedMpkFileRecorder::<FullPrecisionSettings>::new())
            .map_err(|e| anyhow::anyhow!("saving model to {}: {:?}", path.as_ref().display(), e))
    }

    pub fn load(config: &AutoencoderConfig, path: impl AsRef<Path>, device: &B::Device) -> anyhow::Result<Self> {
        config
            .init::<B>(device)
            .load_file(path.as_ref().to_path_buf(), &NamedMpkFileRecorder::<FullPrecisionSettings>::new(), device)
            .map_err(|e| anyhow::anyhow!("loading model from {}: {:?}", path.as_ref().display(), e))
    }
}

fn values<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> anyhow::Result<Vec<f32>> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| anyhow::anyhow!("reading parameters: {:?}", e))
}

fn reload<B: Backend>(mut layer: Linear<B>, cursor: &mut &[f32]) -> Linear<B> {
    layer.weight = refill(layer.weight, cursor);
    layer.bias = layer.bias.map(|bias| refill(bias, cursor));
    layer
}

fn refill<B: Backend, const D: usize>(param: Param<Tensor<B, D>>, cursor: &mut &[f32]) -> Param<Tensor<B, D>> {
    let current = param.val();
    let dims = current.dims();
    let (head, tail) = cursor.split_at(dims.iter().product());
    *cursor = tail;
    let tensor = Tensor::<B, D>::from_data(TensorData::new(head.to_vec(), dims), &current.device());
    Param::initialized(param.id, tensor.require_grad())
}
