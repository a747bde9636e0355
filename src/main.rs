use std::{env, str::FromStr};

use anyhow::Context;
use log::info;
use ndarray::{ArrayD, IxDyn};
use rand::{Rng, SeedableRng, rngs::StdRng};

use model_task::{
    Batch, Callback, HParams, Hook, LinearTask, Task, TrainerState,
    callback::{self, AttributeSchedule, NoopCallback},
    linear::{GRAD_CLIP, INPUT, TARGET},
};

const DEFAULT_EPOCHS: usize = 20;
const DEFAULT_SEED: u64 = 42;
const SAMPLES: usize = 4;
const TASKS: usize = 2;
const FEATURES: usize = 10;
const BATCHES: usize = 8;

fn var_or<T: FromStr>(name: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value.parse().with_context(|| format!("invalid {name}: {value:?}")),
        Err(_) => Ok(default),
    }
}

/// Draws batches from a noisy linear target per task.
fn synthetic_batches(rng: &mut StdRng) -> anyhow::Result<Vec<Batch>> {
    let truth: Vec<f32> = (0..TASKS * (FEATURES + 1))
        .map(|_| rng.random_range(-1.0..1.0))
        .collect();

    (0..BATCHES)
        .map(|_| {
            let x: Vec<f32> = (0..SAMPLES * TASKS * FEATURES)
                .map(|_| rng.random_range(0.0..1.0))
                .collect();

            let y: Vec<f32> = x
                .chunks(FEATURES)
                .enumerate()
                .map(|(i, row)| {
                    let w = &truth[(i % TASKS) * (FEATURES + 1)..][..FEATURES + 1];
                    let dot: f32 = row.iter().zip(w).map(|(x, w)| x * w).sum();
                    dot + w[FEATURES] + rng.random_range(-0.01..0.01)
                })
                .collect();

            let batch = Batch::from_channels([
                (
                    INPUT,
                    ArrayD::from_shape_vec(IxDyn(&[SAMPLES, TASKS, FEATURES]), x)?,
                ),
                (TARGET, ArrayD::from_shape_vec(IxDyn(&[SAMPLES, TASKS, 1]), y)?),
            ])?;

            Ok(batch)
        })
        .collect()
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let hparams = match env::var("HPARAMS") {
        Ok(path) => HParams::load(&path).with_context(|| format!("loading {path}"))?,
        Err(_) => HParams::new(var_or("LR", 1e-2)?)?,
    };
    let epochs = var_or("EPOCHS", DEFAULT_EPOCHS)?;
    let seed = var_or("SEED", DEFAULT_SEED)?;

    let mut rng = StdRng::seed_from_u64(seed);
    let batches = synthetic_batches(&mut rng)?;
    let (train, valid) = batches.split_at(BATCHES - 2);

    let mut task = LinearTask::new(hparams, TASKS, FEATURES, &mut rng);
    let mut optimizer = task.configure_optimizers();
    let mut callbacks: Vec<Box<dyn Callback>> = vec![
        Box::new(NoopCallback),
        Box::new(AttributeSchedule::new(GRAD_CLIP, [(epochs / 2, 1.0)])),
    ];

    info!(lr = hparams.lr(), epochs = epochs, seed = seed; "training");

    let mut state = TrainerState {
        max_epochs: Some(epochs),
        ..Default::default()
    };
    callback::dispatch(&mut callbacks, Hook::TrainStart, &state, &mut task)?;

    for epoch in 0..epochs {
        state.epoch = epoch;
        callback::dispatch(&mut callbacks, Hook::TrainEpochStart, &state, &mut task)?;

        let mut train_loss = 0.0;
        for (batch_idx, batch) in train.iter().enumerate() {
            let output = task.training_step(batch, batch_idx)?;
            train_loss += output.loss().context("training step returned no loss")?;
            task.optimizer_step(&mut optimizer)?;
            state.global_step += 1;
        }

        let mut valid_loss = 0.0;
        for (batch_idx, batch) in valid.iter().enumerate() {
            valid_loss += task
                .validation_step(batch, batch_idx)?
                .loss()
                .context("validation step returned no loss")?;
        }

        info!(
            epoch = epoch,
            train_loss = train_loss / train.len() as f32,
            valid_loss = valid_loss / valid.len() as f32;
            "epoch done"
        );
        callback::dispatch(&mut callbacks, Hook::TrainEpochEnd, &state, &mut task)?;
    }

    callback::dispatch(&mut callbacks, Hook::TrainEnd, &state, &mut task)?;

    if let Ok(path) = env::var("CHECKPOINT") {
        task.checkpoint()
            .save(&path)
            .with_context(|| format!("saving {path}"))?;
        info!("checkpoint written to {path}");
    }

    Ok(())
}
