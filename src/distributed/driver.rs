use super::*;
use crate::config::Context;
use crate::data::DataModule;
use crate::model::Autoencoder;
use crate::training::train_model;
use burn::tensor::backend::AutodiffBackend;

/// Train directly in the calling thread on the full train table.
pub fn single_node<B: AutodiffBackend>(
    context: &Context,
    data: &DataModule,
    input_size: usize,
) -> anyhow::Result<Autoencoder<B>> {
    log::info!("{:<20}input_size {}", "single node", input_size);
    train_model::<B>(context, data, input_size, 1, true)
}

/// Train the same routine, with the same arguments, through a [`Distributor`].
pub async fn multi_node<B: AutodiffBackend>(
    context: &Context,
    data: &DataModule,
    input_size: usize,
    distributor: &Distributor,
) -> anyhow::Result<Autoencoder<B>> {
    log::info!("{:<20}input_size {}", "multi node", input_size);
    let task = Task::train_model(data, input_size, 1, true);
    distributor
        .run::<B>(context, task)
        .await?
        .decode::<B>(&Default::default())
}
