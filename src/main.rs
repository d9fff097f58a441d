use std::path::Path;
use std::process::exit;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use log::{error, info};

use pedctm::board::Board;
use pedctm::scenario::load_dir;
use pedctm::serialization::results::{export_run, export_samples, SystemStateRow};
use pedctm::sweep::{best_sample, evaluate_samples, sample_parameters};

#[derive(Parser, Debug)]
#[command(
    version,
    author,
    about = "Anisotropic cell transmission model for pedestrian flows with dynamic route choice"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Clone, Debug)]
enum Commands {
    #[command(about = "Simulate a scenario with the parameters in params.csv")]
    Run(RunArgs),

    #[command(about = "Simulate random parameter draws from param_range.csv and score them")]
    Sample(SampleArgs),
}

#[derive(Args, Clone, Debug)]
struct RunArgs {
    #[arg(short = 'd', long, help = "The scenario directory.")]
    scenario_dir: String,

    #[arg(
        short = 'o',
        long,
        default_value = "pedctm-run.sqlite3",
        help = "The file to write the results to."
    )]
    out_filename: String,

    #[arg(long, help = "Also export the state of every link after every step.")]
    system_state: bool,
}
fn main_run(args: &RunArgs) {
    if Path::new(&args.out_filename).exists() {
        error!("Output file already exists: {}", args.out_filename);
        exit(1);
    }

    let loaded = match load_dir(Path::new(&args.scenario_dir)) {
        Ok(loaded) => loaded,
        Err(err) => {
            error!("Could not load scenario {}: {}", args.scenario_dir, err);
            exit(1);
        }
    };
    let mut board = match Board::new(Arc::new(loaded.scenario), loaded.config) {
        Ok(board) => board,
        Err(err) => {
            error!("Could not build network: {}", err);
            exit(1);
        }
    };

    let mut rows = Vec::new();
    let result = if args.system_state {
        board.simulate_with(|step, board| rows.extend(SystemStateRow::capture(step, board)))
    } else {
        board.simulate()
    };
    let summary = match result {
        Ok(summary) => summary,
        Err(err) => {
            error!("Simulation failed: {}", err);
            exit(1);
        }
    };
    info!(
        "{:?}: {:.3} of {:.3} people arrived, {} diagnostics",
        summary.state, summary.arrived, summary.demand, summary.num_diagnostics
    );
    match board.log_likelihood() {
        Ok(ll) => info!("Log-likelihood: {}", ll),
        Err(err) => info!("No log-likelihood: {}", err),
    }

    let system_state = if args.system_state {
        Some(rows.as_slice())
    } else {
        None
    };
    if let Err(err) = export_run(&board, system_state, &args.out_filename) {
        error!("Could not export results: {}", err);
        exit(1);
    }
}

#[derive(Args, Clone, Debug)]
struct SampleArgs {
    #[arg(short = 'd', long, help = "The scenario directory.")]
    scenario_dir: String,

    #[arg(short = 'n', long, default_value_t = 100, help = "Number of parameter draws.")]
    draws: usize,

    #[arg(long, default_value_t = 0, help = "Seed of the random number generator.")]
    seed: u64,

    #[arg(
        short = 'o',
        long,
        default_value = "pedctm-samples.sqlite3",
        help = "The file to write the samples to."
    )]
    out_filename: String,
}
fn main_sample(args: &SampleArgs) {
    if Path::new(&args.out_filename).exists() {
        error!("Output file already exists: {}", args.out_filename);
        exit(1);
    }

    let loaded = match load_dir(Path::new(&args.scenario_dir)) {
        Ok(loaded) => loaded,
        Err(err) => {
            error!("Could not load scenario {}: {}", args.scenario_dir, err);
            exit(1);
        }
    };
    let Some(range) = loaded.range else {
        error!("Scenario {} has no param_range.csv", args.scenario_dir);
        exit(1);
    };

    let draws = sample_parameters(&range, args.draws, args.seed);
    let samples = evaluate_samples(Arc::new(loaded.scenario), &loaded.config, &draws);
    if let Some((best, ll)) = best_sample(&samples) {
        info!("Best draw {:?} with log-likelihood {}", best.params, ll);
    }

    let param_names = loaded.config.diagram.param_names();
    if let Err(err) = export_samples(&param_names, &samples, &args.out_filename) {
        error!("Could not export samples: {}", err);
        exit(1);
    }
}

fn main() {
    env_logger::builder().parse_env("LOG").init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => main_run(&args),
        Commands::Sample(args) => main_sample(&args),
    }
}
