mod common;

use std::cell::RefCell;
use std::rc::Rc;

use odecast::checkpoint::{self, BestLoss, MemoryCheckpoint};
use odecast::config::{NonFinitePolicy, RunConfig, TrainConfig};
use odecast::data::Split;
use odecast::evaluate::run_evaluation;
use odecast::logging::{Callback, CallbackSignal, EpochRecord, Logger, MetricRecord};
use odecast::train::run_training;
use odecast::{Device, Hyperparameters, LatentOde, NoiseSource, Solver, Trainer};

fn quiet(config: TrainConfig) -> TrainConfig {
    TrainConfig {
        progress: false,
        seed: Some(0),
        ..config
    }
}

#[test]
fn checkpoints_follow_validation_improvements() {
    let train = common::dataset(64, 2, 16);
    let valid = common::dataset(48, 2, 16);
    let hp = Hyperparameters {
        num_epochs: 4,
        lr: 1e-2,
        ..common::small_hyperparams(2)
    };
    let mut noise = NoiseSource::seeded(2);
    let mut model = LatentOde::new(hp, Device::Cpu, &mut noise).unwrap();
    let config = quiet(TrainConfig {
        valid_window_length: 16,
        valid_context_steps: 8,
        ..TrainConfig::default()
    });
    let mut trainer = Trainer::new(&model, config, noise).unwrap();
    let mut sink = MemoryCheckpoint::default();
    let history = trainer.fit(&mut model, &train, &valid, &mut sink).unwrap();

    assert_eq!(history.epochs.len(), 4);
    assert!(history.train_losses().iter().all(|l| l.is_finite()));
    let mut best = BestLoss::new();
    let expected: Vec<usize> = history
        .valid_losses()
        .iter()
        .enumerate()
        .filter(|(_, &l)| best.observe(l))
        .map(|(e, _)| e)
        .collect();
    assert_eq!(history.saved_epochs(), expected);
    assert_eq!(expected[0], 0);
    let saved: Vec<usize> = sink.saved.iter().map(|(e, _)| *e).collect();
    assert_eq!(saved, expected);
    assert!(model.is_training());
}

#[test]
fn early_stopping_ends_the_run() {
    let train = common::dataset(32, 2, 16);
    let hp = Hyperparameters {
        num_epochs: 50,
        lr: 1e-9,
        ..common::small_hyperparams(2)
    };
    let mut noise = NoiseSource::seeded(4);
    let mut model = LatentOde::new(hp, Device::Cpu, &mut noise).unwrap();
    let config = quiet(TrainConfig {
        valid_window_length: 16,
        valid_context_steps: 8,
        early_stopping_patience: Some(1),
        ..TrainConfig::default()
    });
    let mut trainer = Trainer::new(&model, config, noise).unwrap();
    let history = trainer
        .fit(&mut model, &train, &train, &mut MemoryCheckpoint::default())
        .unwrap();
    assert!(history.epochs.len() < 50);
}

/// Records every hook and asks to stop after the first window.
struct StopAfterFirstWindow {
    events: Rc<RefCell<Vec<String>>>,
}

impl Callback for StopAfterFirstWindow {
    fn on_train_begin(&mut self) {
        self.events.borrow_mut().push("begin".into());
    }

    fn on_epoch_begin(&mut self, epoch: usize) {
        self.events.borrow_mut().push(format!("epoch {epoch}"));
    }

    fn on_window_end(&mut self, metrics: &MetricRecord) -> CallbackSignal {
        self.events.borrow_mut().push(format!("window {}", metrics.step));
        CallbackSignal::Stop
    }

    fn on_epoch_end(&mut self, record: &EpochRecord) -> CallbackSignal {
        self.events.borrow_mut().push(format!("end {}", record.epoch));
        CallbackSignal::Continue
    }

    fn on_train_end(&mut self) {
        self.events.borrow_mut().push("done".into());
    }
}

#[test]
fn callbacks_see_every_hook_and_stop_after_the_epoch() {
    let train = common::dataset(48, 2, 16);
    let hp = Hyperparameters {
        num_epochs: 5,
        ..common::small_hyperparams(2)
    };
    let mut noise = NoiseSource::seeded(6);
    let mut model = LatentOde::new(hp, Device::Cpu, &mut noise).unwrap();
    let config = quiet(TrainConfig {
        valid_window_length: 16,
        valid_context_steps: 8,
        ..TrainConfig::default()
    });
    let events = Rc::new(RefCell::new(Vec::new()));
    let mut trainer = Trainer::new(&model, config, noise).unwrap();
    trainer.add_callback(Box::new(StopAfterFirstWindow {
        events: Rc::clone(&events),
    }));
    let history = trainer
        .fit(&mut model, &train, &train, &mut MemoryCheckpoint::default())
        .unwrap();

    // The stop request takes effect once the running epoch is complete.
    assert_eq!(history.epochs.len(), 1);
    let expected = ["begin", "epoch 0", "window 0", "window 1", "window 2", "end 0", "done"];
    assert_eq!(*events.borrow(), expected);
}

fn failing_setup(policy: NonFinitePolicy) -> (tempfile::TempDir, odecast::Result<()>) {
    let data = common::dataset(48, 2, 16);
    let hp = Hyperparameters {
        solver: Solver::Dopri5,
        max_num_steps: 1,
        rtol: 1e-7,
        atol: 1e-9,
        ..common::small_hyperparams(2)
    };
    let mut noise = NoiseSource::seeded(0);
    let mut model = LatentOde::new(hp, Device::Cpu, &mut noise).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let text_log = dir.path().join("train.txt");
    let logger = Logger::new(dir.path().join("metrics"), Some(&text_log)).unwrap();
    let config = quiet(TrainConfig {
        non_finite: policy,
        ..TrainConfig::default()
    });
    let mut trainer = Trainer::new(&model, config, noise).unwrap().with_logger(logger);
    let res = trainer.train_epoch(&mut model, &data, 0).map(|_| ());
    (dir, res)
}

#[test]
fn skip_policy_logs_every_failed_window() {
    let (dir, res) = failing_setup(NonFinitePolicy::Skip);
    let err = res.unwrap_err();
    assert!(err.is_numerical(), "{err}");
    let log = std::fs::read_to_string(dir.path().join("train.txt")).unwrap();
    for w in 0..3 {
        assert!(log.contains(&format!("skipping window {w:03}")), "{log}");
    }
}

#[test]
fn abort_policy_stops_at_the_first_failure() {
    let (dir, res) = failing_setup(NonFinitePolicy::Abort);
    assert!(res.unwrap_err().is_numerical());
    let log = std::fs::read_to_string(dir.path().join("train.txt")).unwrap_or_default();
    assert!(!log.contains("skipping"));
}

#[test]
fn checkpoint_round_trip_preserves_predictions() {
    let data = common::dataset(32, 2, 16);
    let window = data.window(0).unwrap();
    let mut noise = NoiseSource::seeded(9);
    let mut model = LatentOde::new(common::small_hyperparams(2), Device::Cpu, &mut noise).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("models").join("job.bin");
    checkpoint::save(&model, &path).unwrap();

    let mut loaded = checkpoint::load(&path, Device::Cpu).unwrap();
    assert!(!loaded.is_training());
    assert_eq!(loaded.hyperparams(), model.hyperparams());
    let input = window.encoder_input();
    let a = model
        .predict(&data, &input, window.times, &mut NoiseSource::seeded(1))
        .unwrap();
    let b = loaded
        .predict(&data, &input, window.times, &mut NoiseSource::seeded(1))
        .unwrap();
    assert_eq!(a, b);

    let relocated = checkpoint::load(&path, Device::Context(1)).unwrap();
    assert_eq!(relocated.device(), Device::Context(1));
}

#[test]
fn end_to_end_train_then_evaluate() {
    let dir = tempfile::tempdir().unwrap();
    let data_dir = dir.path().join("data");
    std::fs::create_dir_all(&data_dir).unwrap();
    let coord = "-83.812_10.39";
    common::write_split(&data_dir, coord, Split::Train, 256, 1);
    common::write_split(&data_dir, coord, Split::Valid, 128, 1);
    common::write_split(&data_dir, coord, Split::Test, 128, 1);

    let mut cfg = RunConfig {
        data_dir,
        results_dir: dir.path().join("results"),
        coords: vec![coord.to_string()],
        ..RunConfig::default()
    };
    cfg.hyperparams.input_dims = 2;
    cfg.hyperparams.window_length = 128;
    cfg.hyperparams.num_epochs = 1;
    cfg.train = quiet(TrainConfig {
        valid_window_length: 128,
        valid_context_steps: 64,
        ..TrainConfig::default()
    });
    cfg.eval.window_length = 64;
    cfg.eval.drop_rate = 0.5;
    cfg.eval.context_steps = Some(32);
    cfg.eval.seed = Some(1);

    let (_, history) = run_training(&cfg).unwrap();
    assert_eq!(history.epochs.len(), 1);
    assert!(history.epochs[0].train_loss.is_finite());
    assert!(history.epochs[0].checkpointed);

    let paths = cfg.paths();
    assert!(paths.checkpoint().exists());
    let log = std::fs::read_to_string(paths.train_log()).unwrap();
    assert!(log.contains("Epoch 00 training loss"));
    assert!(paths.metrics_dir().join("metrics.jsonl").exists());

    let report = run_evaluation(&cfg).unwrap();
    assert_eq!(report.num_windows, 2);
    assert!(report.mse.is_finite() && report.nll.is_finite());
    assert!(report.horizon_mse.is_some());
    for f in &report.forecasts {
        assert_eq!(f.predicted.len(), 64);
        assert_eq!(f.retained.len(), 16);
    }
    let summary = std::fs::read_to_string(paths.test_report()).unwrap();
    assert!(summary.starts_with("Test MSE loss"));
    let forecasts = std::fs::read_to_string(paths.forecasts()).unwrap();
    assert_eq!(forecasts.lines().count(), 1 + 2 * 64);
}
