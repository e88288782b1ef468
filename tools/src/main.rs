//! cdf-runner: headless driver for DiffusionTimeCDF simulations.
//!
//! Usage:
//!   cdf-runner --config run.json
//!   cdf-runner --beta 1 --tmax 10000 --seed 7 --mode quantiles --quantiles 1e10,1e20 --out q.csv
//!   cdf-runner --config run.json --resume        (continue from Scalars{id}.json)
//!
//! Command-line flags override values from the config file.

use anyhow::{Context, Result};
use diffusion_core::{
    config::{RecordMode, RunConfig},
    snapshot::checkpoint_paths,
    statistics::ProbAndVelocity,
    types::Time,
    DiffusionTimeCdf, Quad,
};
use std::env;
use std::path::PathBuf;
use std::time::Instant;

#[derive(serde::Serialize)]
struct RunSummary {
    id:          String,
    beta:        f64,
    seed:        u64,
    t_max:       Time,
    final_time:  Time,
    rows:        usize,
    output:      PathBuf,
    started_at:  String,
    finished_at: String,
    elapsed_s:   f64,
    /// Velocity mode only: the crossing at the final time.
    #[serde(skip_serializing_if = "Option::is_none")]
    last_crossing: Option<ProbAndVelocity>,
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let mut config = build_config(&args)?;
    let resume = args.iter().any(|a| a == "--resume");
    // On resume tMax comes from the checkpoint unless given explicitly.
    let t_max_override: Option<Time> = match flag_value(&args, "--tmax") {
        Some(v) => Some(v.parse().context("--tmax")?),
        None => None,
    };

    let id = config
        .id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());

    let started_at = chrono::Local::now();
    let clock = Instant::now();

    println!("DiffusionTimeCDF cdf-runner");
    println!("  id:        {id}");
    println!("  mode:      {:?}", config.mode);
    println!("  save_dir:  {}", config.save_dir.display());
    println!("  output:    {}", config.output.display());
    println!("  started:   {}", started_at.to_rfc3339());

    let mut system = if resume {
        let (cdf_file, scalars_file) = checkpoint_paths(&config.save_dir, &id);
        let system = match t_max_override {
            Some(t_max) => DiffusionTimeCdf::from_files_with_t_max(&cdf_file, &scalars_file, t_max),
            None => DiffusionTimeCdf::from_files(&cdf_file, &scalars_file),
        }
        .with_context(|| format!("resuming {id} from {}", config.save_dir.display()))?;
        log::info!("resumed {id} at time {} (tMax {})", system.time(), system.t_max());
        system
    } else {
        match config.seed {
            Some(seed) => DiffusionTimeCdf::with_seed(config.beta, config.t_max, seed)?,
            None => DiffusionTimeCdf::new(config.beta, config.t_max)?,
        }
    };
    if resume {
        if let Some(seed) = config.seed {
            system.set_beta_seed(seed);
        }
    }
    // Validate the schedule against the parameters actually in force.
    config.beta = system.beta();
    config.t_max = system.t_max();
    config.validate().context("invalid run configuration")?;
    println!("  beta:      {}", config.beta);
    println!("  t_max:     {}", config.t_max);
    println!("  from time: {}", system.time());
    println!();

    system.set_id(id.clone());
    system.set_save_dir(config.save_dir.clone());
    system.set_save_interval(config.checkpoint().save_interval);

    // On resume, only the times not yet reached are recorded.
    let times: Vec<Time> = config
        .schedule()
        .into_iter()
        .filter(|&t| t > system.time())
        .collect();
    let append = config.append || (resume && config.output.exists());

    let mut last_crossing = None;
    match config.mode {
        RecordMode::Quantiles => {
            let quantiles: Vec<Quad> = config.quantiles.iter().map(|&q| Quad::from(q)).collect();
            system.evolve_and_save_quantile(&times, &quantiles, &config.output, append)?;
        }
        RecordMode::Variance => {
            system.evolve_and_get_variance(&times, &config.n_particles, &config.output, append)?;
        }
        RecordMode::Velocity => {
            let quantile = config.quantile.context("velocity mode needs --quantile")?;
            system.evolve_and_get_prob_and_v(Quad::from(quantile), &times, &config.output, append)?;
            last_crossing = system.prob_and_v(quantile).ok();
        }
    }

    // Final checkpoint so the run can be extended later.
    system.save_state()?;

    let summary = RunSummary {
        id,
        beta: system.beta(),
        seed: system.seed(),
        t_max: system.t_max(),
        final_time: system.time(),
        rows: times.len(),
        output: config.output.clone(),
        started_at: started_at.to_rfc3339(),
        finished_at: chrono::Local::now().to_rfc3339(),
        elapsed_s: clock.elapsed().as_secs_f64(),
        last_crossing,
    };
    println!("=== RUN SUMMARY ===");
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn build_config(args: &[String]) -> Result<RunConfig> {
    let mut config = match flag_value(args, "--config") {
        Some(path) => RunConfig::load(&PathBuf::from(path))?,
        None => {
            let beta = parse_arg(args, "--beta", 1.0f64)?;
            let t_max = parse_arg(args, "--tmax", 1000u64)?;
            RunConfig::new(beta, t_max)
        }
    };

    if let Some(v) = flag_value(args, "--beta") {
        config.beta = v.parse().context("--beta")?;
    }
    if let Some(v) = flag_value(args, "--tmax") {
        config.t_max = v.parse().context("--tmax")?;
    }
    if let Some(v) = flag_value(args, "--seed") {
        config.seed = Some(v.parse().context("--seed")?);
    }
    if let Some(v) = flag_value(args, "--id") {
        config.id = Some(v.to_string());
    }
    if let Some(v) = flag_value(args, "--save-dir") {
        config.save_dir = PathBuf::from(v);
    }
    if let Some(v) = flag_value(args, "--save-interval") {
        config.save_interval_secs = v.parse().context("--save-interval")?;
    }
    if let Some(v) = flag_value(args, "--mode") {
        config.mode = v.parse()?;
    }
    if let Some(v) = flag_value(args, "--out") {
        config.output = PathBuf::from(v);
    }
    if let Some(v) = flag_value(args, "--times") {
        config.times = parse_list(v).context("--times")?;
    }
    if let Some(v) = flag_value(args, "--quantiles") {
        config.quantiles = parse_list(v).context("--quantiles")?;
    }
    if let Some(v) = flag_value(args, "--particles") {
        config.n_particles = parse_list(v).context("--particles")?;
    }
    if let Some(v) = flag_value(args, "--quantile") {
        config.quantile = Some(v.parse().context("--quantile")?);
    }
    if args.iter().any(|a| a == "--append") {
        config.append = true;
    }
    Ok(config)
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].as_str())
}

fn parse_arg<T>(args: &[String], flag: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match flag_value(args, flag) {
        Some(v) => v.parse().with_context(|| format!("{flag} {v}")),
        None => Ok(default),
    }
}

fn parse_list<T>(text: &str) -> Result<Vec<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    text.split(',')
        .map(|s| s.trim().parse::<T>().with_context(|| format!("bad list entry '{s}'")))
        .collect()
}
