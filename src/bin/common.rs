use std::path::PathBuf;

use odecast::{Device, ForecastError, Result, RunConfig, Solver};

pub const DEFAULT_CONFIG: &str = "configs/default.toml";

/// Parses the arguments shared by the binaries.
///
/// The first positional argument is the config file (default
/// `configs/default.toml`). Flags override individual fields:
/// `--data-dir`, `--results-dir`, `--device`, `--solver`, `--epochs`,
/// `--seed` and `--drop-rate`.
pub fn parse_cli<I>(mut args: I) -> Result<RunConfig>
where
    I: Iterator<Item = String>,
{
    let mut config_path: Option<PathBuf> = None;
    let mut overrides: Vec<(String, String)> = Vec::new();

    while let Some(arg) = args.next() {
        if let Some(flag) = arg.strip_prefix("--") {
            let value = args
                .next()
                .ok_or_else(|| ForecastError::config("cli", format!("--{flag} expects a value")))?;
            overrides.push((flag.to_string(), value));
        } else if config_path.is_none() {
            config_path = Some(PathBuf::from(arg));
        } else {
            return Err(ForecastError::config("cli", format!("unexpected argument `{arg}`")));
        }
    }

    let path = config_path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));
    let mut cfg = if path.exists() {
        RunConfig::from_path(&path)?
    } else {
        log::warn!("{} not found, using built-in defaults", path.display());
        RunConfig::default()
    };

    for (flag, value) in overrides {
        let bad = |e: String| ForecastError::config("cli", format!("--{flag}: {e}"));
        match flag.as_str() {
            "data-dir" => cfg.data_dir = PathBuf::from(value),
            "results-dir" => cfg.results_dir = PathBuf::from(value),
            "device" => cfg.device = value.parse::<Device>()?,
            "solver" => cfg.hyperparams.solver = value.parse::<Solver>()?,
            "epochs" => {
                cfg.hyperparams.num_epochs = value.parse().map_err(|e| bad(format!("{e}")))?
            }
            "seed" => {
                let seed: u64 = value.parse().map_err(|e| bad(format!("{e}")))?;
                cfg.train.seed = Some(seed);
                cfg.eval.seed = Some(seed);
            }
            "drop-rate" => cfg.eval.drop_rate = value.parse().map_err(|e| bad(format!("{e}")))?,
            other => return Err(ForecastError::config("cli", format!("unknown flag --{other}"))),
        }
    }
    cfg.validate()?;
    Ok(cfg)
}
