use std::env;
use std::process::ExitCode;

use odecast::train::run_training;

mod common;

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cfg = match common::parse_cli(env::args().skip(1)) {
        Ok(cfg) => cfg,
        Err(e) => {
            log::error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    log::info!("training job {}", cfg.hyperparams.job_id());
    match run_training(&cfg) {
        Ok((_, history)) => {
            if let Some(best) = history.best_valid_loss() {
                log::info!("best validation loss {best:.4}");
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("training failed: {e}");
            ExitCode::FAILURE
        }
    }
}
