pub mod checkpoint;
pub mod config;
pub mod data;
pub mod device;
pub mod error;
pub mod evaluate;
pub mod layers;
pub mod logging;
pub mod math;
pub mod models;
pub mod ode;
pub mod optim;
pub mod rng;
pub mod train;
pub mod util;

pub use config::{EvalConfig, Hyperparameters, RunConfig, TrainConfig};
pub use data::Dataset;
pub use device::Device;
pub use error::{ForecastError, NumericalError, Result};
pub use evaluate::{EvalReport, Evaluator};
pub use models::LatentOde;
pub use ode::{OdeOptions, Sensitivity, Solver};
pub use rng::NoiseSource;
pub use train::{TrainHistory, Trainer};
