#![allow(dead_code)]

use std::fmt::Write as _;
use std::path::Path;

use chrono::{Duration, NaiveDate};
use odecast::data::{Record, Series, Split};
use odecast::{Dataset, Device, Hyperparameters};

pub fn start_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2012, 1, 1).unwrap()
}

fn covariate(i: usize, c: usize) -> f32 {
    let t = i as f32;
    match c % 3 {
        0 => 25.0 + 3.0 * (t * 0.07).sin(),
        1 => 80.0 + 10.0 * (t * 0.03 + 1.0).cos(),
        _ => (t * 0.2).sin() * 5.0,
    }
}

fn target(i: usize) -> f32 {
    let t = i as f32;
    100.0 + 40.0 * (t * 0.05).sin() + 10.0 * (t * 0.013).cos()
}

/// Smooth synthetic series with `cov_dim` weather-like covariates.
pub fn series(region: &str, len: usize, cov_dim: usize) -> Series {
    let records = (0..len)
        .map(|i| Record {
            date: start_date() + Duration::days(i as i64),
            covariates: (0..cov_dim).map(|c| covariate(i, c)).collect(),
            target: target(i),
        })
        .collect();
    let names = (0..cov_dim).map(|c| format!("cov{c}")).collect();
    Series::new(region, names, records).unwrap()
}

pub fn dataset(len: usize, cov_dim: usize, window: usize) -> Dataset {
    Dataset::new(vec![series("test", len, cov_dim)], window, Device::Cpu).unwrap()
}

/// Same targets as [`dataset`] but with constant covariates, which makes the
/// latent dynamics autonomous.
pub fn constant_covariate_dataset(len: usize, cov_dim: usize, window: usize) -> Dataset {
    let records = (0..len)
        .map(|i| Record {
            date: start_date() + Duration::days(i as i64),
            covariates: vec![1.5; cov_dim],
            target: target(i),
        })
        .collect();
    let names = (0..cov_dim).map(|c| format!("cov{c}")).collect();
    let series = Series::new("flat", names, records).unwrap();
    Dataset::new(vec![series], window, Device::Cpu).unwrap()
}

/// A small model matching `cov_dim` covariates.
pub fn small_hyperparams(cov_dim: usize) -> Hyperparameters {
    Hyperparameters {
        input_dims: cov_dim + 1,
        encoder_fc_dims: vec![6],
        hidden_dims: 3,
        odefunc_fc_dims: vec![8],
        decoder_fc_dims: vec![5],
        dropout_rate: 0.0,
        window_length: 16,
        ..Hyperparameters::default()
    }
}

/// Write `<dir>/<coord>_<split>.csv` with `len` rows in the layout of the
/// weather/infection files.
pub fn write_split(dir: &Path, coord: &str, split: Split, len: usize, cov_dim: usize) {
    let mut text = String::from("date");
    for c in 0..cov_dim {
        write!(text, ",cov{c}").unwrap();
    }
    text.push_str(",num_infect\n");
    for i in 0..len {
        let date = start_date() + Duration::days(i as i64);
        write!(text, "{} 00:00:00", date.format("%Y-%m-%d")).unwrap();
        for c in 0..cov_dim {
            write!(text, ",{}", covariate(i, c)).unwrap();
        }
        writeln!(text, ",{}", target(i)).unwrap();
    }
    std::fs::write(dir.join(format!("{coord}_{split}.csv")), text).unwrap();
}
