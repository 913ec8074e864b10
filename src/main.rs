//! Launch one rank of a training run per process, e.g.
//!
//!   LOCAL_RANK=0 RANK=0 WORLD_SIZE=2 ffno-train --epochs 100 &
//!   LOCAL_RANK=1 RANK=1 WORLD_SIZE=2 ffno-train --epochs 100
//!
//! A single process needs only `LOCAL_RANK=0`.

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, info_span};
use tracing_subscriber::EnvFilter;

use ffno_trainer::data::{Dataset, InputTransform};
use ffno_trainer::{
    Adam, Args, DataLoader, DenseWaveModel, DistributedContext, DistributedSampler, SyntheticDataset,
    TracesDataset, TrainConfig, Trainer,
};

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = TrainConfig::try_from(args).context("invalid training options")?;
    let ctx = DistributedContext::setup().context("failed to join the process group")?;
    let span = info_span!("rank", rank = ctx.rank());
    let _guard = span.enter();

    let outcome = run(&ctx, &config);
    if let Err(e) = &outcome {
        error!("training aborted: {e:#}");
    }
    ctx.teardown().context("failed to tear down the process group")?;
    outcome
}

fn run(ctx: &DistributedContext, config: &TrainConfig) -> anyhow::Result<()> {
    let name = config.name_config();
    info!(%name, device = %ctx.device(), world_size = ctx.world_size(), "starting run");

    let grid = config.grid();
    if config.synthetic {
        let train_set = SyntheticDataset::new(config.ntrain, grid.input_len(), grid.output_len(), config.seed);
        let val_set = SyntheticDataset::new(config.nval, grid.input_len(), grid.output_len(), config.seed.wrapping_add(1));
        fit(ctx, config, &name, train_set, val_set)
    } else {
        let train_set = TracesDataset::open(
            &config.data_root,
            &config.dir_data_train,
            config.ntrain,
            grid,
            InputTransform::Normal,
        )
        .context("failed to load training data")?;
        let val_transform = match train_set.normalizer() {
            Some(fitted) => InputTransform::NormalWith(fitted.clone()),
            None => InputTransform::Identity,
        };
        let val_set = TracesDataset::open(&config.data_root, &config.dir_data_val, config.nval, grid, val_transform)
        .context("failed to load validation data")?;
        fit(ctx, config, &name, train_set, val_set)
    }
}

fn fit<D: Dataset>(
    ctx: &DistributedContext,
    config: &TrainConfig,
    name: &str,
    train_set: D,
    val_set: D,
) -> anyhow::Result<()> {
    let loader = |dataset: D| {
        let sampler = DistributedSampler::new(dataset.len(), ctx.rank(), ctx.world_size()).with_seed(config.seed);
        DataLoader::new(dataset, config.batch_size, sampler)
    };
    let train_data = loader(train_set)?;
    let val_data = loader(val_set)?;

    let grid = config.grid();
    let hidden = vec![config.dv; config.nlayers];
    let model = DenseWaveModel::new(grid.input_len(), grid.output_len(), &hidden, config.seed);
    let optimizer = Adam::new(config.learning_rate).with_weight_decay(config.weight_decay);

    let mut trainer = Trainer::new(
        model,
        train_data,
        optimizer,
        val_data,
        config,
        ctx.communicator(),
        ctx.local_rank(),
    )
    .with_context(|| format!("failed to restore {}", config.snapshot_path.display()))?;

    let last_saved = trainer.train(name)?;
    if let Some(epoch) = last_saved {
        info!(epoch, "last intermediate save");
    }
    Ok(())
}
