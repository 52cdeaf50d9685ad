use std::env;
use std::process::ExitCode;

use odecast::evaluate::run_evaluation;

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
    log::info!("evaluating job {} (drop rate {})", cfg.hyperparams.job_id(), cfg.eval.drop_rate);
    match run_evaluation(&cfg) {
        Ok(report) => {
            print!("{}", report.summary());
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("evaluation failed: {e}");
            ExitCode::FAILURE
        }
    }
}
