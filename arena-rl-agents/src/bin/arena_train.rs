use std::{path::PathBuf, process::ExitCode};

use anyhow::Context;
use arena_rl::{
    environment::{
        pool::ProcessLauncher,
        remote::{serve, JsonLines},
        EnvSpec,
    },
    module::nn::{actor_critic::ActorCritic, q_network::QNetwork},
};
use arena_rl_agents::{
    a2c::A2cTrainer,
    adam,
    dqn::DeepQNetworkAgent,
    hyperparameters::{A2cHyperParameters, A2cOverride, DqnHyperParameters, DqnOverride, EnvKind},
    off_policy::OffPolicyAlgorithm,
    run::create_training_dir,
};
use burn::{
    backend::{wgpu::WgpuDevice, Autodiff, NdArray, Wgpu},
    tensor::backend::AutodiffBackend,
};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "arena_train", about = "Train reinforcement-learning agents in the pellet arena")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Logging level
    #[arg(long = "log", value_enum, default_value = "INFO", global = true, ignore_case = true)]
    log_level: LogLevel,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train an advantage actor-critic agent
    A2c(A2cArgs),
    /// Train a deep Q-network agent
    Dqn(DqnArgs),
    /// Serve one environment over stdin/stdout
    #[command(hide = true)]
    Worker(WorkerArgs),
}

#[derive(Args, Debug)]
struct OutputArgs {
    /// Output directory
    #[arg(long, default_value = "model_outputs")]
    output: PathBuf,

    /// Experiment or run name
    #[arg(long)]
    name: Option<String>,

    /// Debug mode: train synchronously and write nothing
    #[arg(long)]
    debug: bool,

    /// Number of episodes to train
    #[arg(short, long)]
    episodes: Option<usize>,

    #[arg(long)]
    seed: Option<u64>,

    /// Train on the wgpu backend instead of ndarray
    #[arg(long)]
    gpu: bool,
}

#[derive(Args, Debug)]
struct A2cArgs {
    /// Environment type
    #[arg(long, value_enum, default_value = "grid")]
    env: EnvKind,

    #[arg(long, value_enum, default_value = "sync")]
    mode: Mode,

    /// Workers (batched) or rollout producers (async)
    #[arg(long)]
    workers: Option<usize>,

    #[command(flatten)]
    output: OutputArgs,
}

#[derive(Args, Debug)]
struct DqnArgs {
    /// Environment type
    #[arg(long, value_enum, default_value = "full")]
    env: EnvKind,

    #[command(flatten)]
    output: OutputArgs,
}

#[derive(Args, Debug)]
struct WorkerArgs {
    /// JSON encoded environment recipe
    #[arg(long)]
    spec: String,

    #[arg(long, default_value_t = 0)]
    index: usize,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Mode {
    /// One local environment
    Sync,
    /// Lock-step pool of worker processes
    Batched,
    /// Rollout producers running concurrently with training
    Async,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum LogLevel {
    #[value(name = "DEBUG")]
    Debug,
    #[value(name = "INFO")]
    Info,
    #[value(name = "WARNING")]
    Warning,
    #[value(name = "ERROR")]
    Error,
}

impl LogLevel {
    fn directive(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Logs go to stderr: a worker's stdout carries the protocol.
fn init_logging(level: LogLevel) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.directive()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Create `<output>/<name>-NNN` and write the hyper-parameters into it,
/// unless in debug mode.
fn prepare_run(
    args: &OutputArgs,
    default_name: &str,
    save: impl FnOnce(&std::path::Path) -> arena_rl::Result<PathBuf>,
) -> anyhow::Result<Option<PathBuf>> {
    if args.debug {
        debug!("debug mode, nothing will be written");
        return Ok(None);
    }
    let name = args.name.as_deref().unwrap_or(default_name);
    let training_dir = create_training_dir(&args.output, name)
        .with_context(|| format!("creating a run directory under {}", args.output.display()))?;
    info!(dir = %training_dir.display(), "model directory");
    let hp_file = save(&training_dir)?;
    debug!(file = %hp_file.display(), "saved hyper-parameters");
    Ok(Some(training_dir))
}

fn train_a2c<B: AutodiffBackend>(args: A2cArgs, device: B::Device) -> anyhow::Result<()> {
    let mut hp = A2cHyperParameters::preset(args.env);
    hp.override_with(&A2cOverride {
        seed: args.output.seed,
        num_envs: args.workers,
        num_episodes: args.output.episodes,
        ..Default::default()
    });
    let training_dir = prepare_run(&args.output, "a2c", |dir| hp.save(dir))?;
    let mode = if args.output.debug { Mode::Sync } else { args.mode };
    info!(env = ?args.env, ?mode, episodes = hp.num_episodes, "training a2c");

    let spec = hp.env_spec();
    let optim = adam::<B, ActorCritic<B>>(hp.grad_clip_norm);
    let mut trainer = A2cTrainer::new(hp, spec.clone(), device, optim, training_dir)?;
    match mode {
        Mode::Sync => trainer.train_sync()?,
        Mode::Batched => trainer.train_batched(&ProcessLauncher::current_exe(&spec)?)?,
        Mode::Async => trainer.train_async()?,
    }
    info!(updates = trainer.updates(), "training finished");
    Ok(())
}

fn train_dqn<B: AutodiffBackend>(args: DqnArgs, device: B::Device) -> anyhow::Result<()> {
    let mut hp = DqnHyperParameters::preset(args.env);
    hp.override_with(&DqnOverride {
        seed: args.output.seed,
        num_episodes: args.output.episodes,
        ..Default::default()
    });
    let training_dir = prepare_run(&args.output, "dqn", |dir| hp.save(dir))?;
    info!(env = ?args.env, episodes = hp.num_episodes, "training dqn");

    let env = hp.env_spec().build(0)?;
    let agent = DeepQNetworkAgent::from_hyperparameters(
        &hp,
        env.observation_space().size(),
        env.action_space().size(),
        adam::<B, QNetwork<B>>(hp.grad_clip_norm),
        device,
    )?;
    let means = OffPolicyAlgorithm::new(hp, env, agent, training_dir).train()?;
    if let Some(last) = means.last() {
        info!(final_mean_return = last, "training finished");
    }
    Ok(())
}

fn run_worker(args: WorkerArgs) -> anyhow::Result<()> {
    let spec: EnvSpec = serde_json::from_str(&args.spec).context("parsing --spec")?;
    let mut env = spec.build(args.index)?;
    debug!(index = args.index, pid = std::process::id(), "worker serving");
    serve(&mut env, &mut JsonLines::stdio())?;
    debug!(index = args.index, "worker exiting");
    Ok(())
}

fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::A2c(args) if args.output.gpu => train_a2c::<Autodiff<Wgpu>>(args, WgpuDevice::default()),
        Command::A2c(args) => train_a2c::<Autodiff<NdArray>>(args, Default::default()),
        Command::Dqn(args) if args.output.gpu => train_dqn::<Autodiff<Wgpu>>(args, WgpuDevice::default()),
        Command::Dqn(args) => train_dqn::<Autodiff<NdArray>>(args, Default::default()),
        Command::Worker(args) => run_worker(args),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log_level);
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
