//! Per-region time series and their CSV representation.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use csv::ReaderBuilder;
use serde::{Deserialize, Serialize};

use crate::error::{ForecastError, Result};

/// One timestamped observation.
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    pub date: NaiveDate,
    pub covariates: Vec<f32>,
    pub target: f32,
}

/// Column layout of the per-region CSV files.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeriesSchema {
    pub date_column: String,
    pub date_format: String,
    pub target_column: String,
    /// Covariate columns in model order. `None` takes every column other
    /// than the date and target, in file order.
    pub covariate_columns: Option<Vec<String>>,
}

impl Default for SeriesSchema {
    fn default() -> Self {
        Self {
            date_column: "date".to_string(),
            date_format: "%Y-%m-%d".to_string(),
            target_column: "num_infect".to_string(),
            covariate_columns: None,
        }
    }
}

/// Ordered observations of a single region with strictly increasing dates.
#[derive(Clone, Debug)]
pub struct Series {
    region: String,
    covariate_names: Vec<String>,
    records: Vec<Record>,
}

impl Series {
    pub fn new(
        region: impl Into<String>,
        covariate_names: Vec<String>,
        records: Vec<Record>,
    ) -> Result<Self> {
        let region = region.into();
        let width = covariate_names.len();
        for (i, r) in records.iter().enumerate() {
            if r.covariates.len() != width {
                return Err(ForecastError::data(format!(
                    "{region}: row {i} has {} covariates, expected {width}",
                    r.covariates.len()
                )));
            }
            if i > 0 && r.date <= records[i - 1].date {
                return Err(ForecastError::data(format!(
                    "{region}: dates must be strictly increasing ({} follows {})",
                    r.date,
                    records[i - 1].date
                )));
            }
        }
        Ok(Self {
            region,
            covariate_names,
            records,
        })
    }

    /// Read a series from a CSV file with a header row.
    pub fn from_csv(path: &Path, region: impl Into<String>, schema: &SeriesSchema) -> Result<Self> {
        let region = region.into();
        if !path.exists() {
            return Err(ForecastError::data(format!("missing series file {}", path.display())));
        }
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_path(path)?;
        let headers = reader.headers()?.clone();
        let column = |name: &str| -> Result<usize> {
            headers.iter().position(|h| h == name).ok_or_else(|| {
                ForecastError::data(format!("{}: missing column '{name}'", path.display()))
            })
        };
        let date_idx = column(schema.date_column.as_str())?;
        let target_idx = column(schema.target_column.as_str())?;
        let covariate_names: Vec<String> = match &schema.covariate_columns {
            Some(cols) => cols.clone(),
            None => headers
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != date_idx && *i != target_idx)
                .map(|(_, h)| h.to_string())
                .collect(),
        };
        let covariate_idx = covariate_names
            .iter()
            .map(|c| column(c.as_str()))
            .collect::<Result<Vec<_>>>()?;

        let parse = |row: &csv::StringRecord, idx: usize, line: usize| -> Result<f32> {
            let raw = row.get(idx).unwrap_or("");
            raw.parse::<f32>().map_err(|_| {
                ForecastError::data(format!(
                    "{}:{line}: cannot parse '{raw}' in column '{}'",
                    path.display(),
                    headers.get(idx).unwrap_or("?")
                ))
            })
        };

        let mut records = Vec::new();
        for (i, row) in reader.records().enumerate() {
            let row = row?;
            let line = i + 2;
            let raw_date = row.get(date_idx).unwrap_or("");
            // Timestamps such as "2012-01-01 00:00:00" keep only the date part.
            let day = raw_date.split_whitespace().next().unwrap_or("");
            let date = NaiveDate::parse_from_str(day, &schema.date_format).map_err(|e| {
                ForecastError::data(format!(
                    "{}:{line}: invalid date '{raw_date}': {e}",
                    path.display()
                ))
            })?;
            let covariates = covariate_idx
                .iter()
                .map(|&c| parse(&row, c, line))
                .collect::<Result<Vec<_>>>()?;
            let target = parse(&row, target_idx, line)?;
            records.push(Record {
                date,
                covariates,
                target,
            });
        }
        log::debug!("loaded {} rows for {region} from {}", records.len(), path.display());
        Series::new(region, covariate_names, records)
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn covariate_names(&self) -> &[String] {
        &self.covariate_names
    }

    pub fn covariate_dim(&self) -> usize {
        self.covariate_names.len()
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Data split a file belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Split {
    Train,
    Valid,
    Test,
}

impl Split {
    pub fn as_str(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Valid => "valid",
            Split::Test => "test",
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `<data_dir>/<coord>_<split>.csv` for every coordinate key.
pub fn split_paths(data_dir: &Path, coords: &[String], split: Split) -> Vec<(String, PathBuf)> {
    coords
        .iter()
        .map(|c| (c.clone(), data_dir.join(format!("{c}_{split}.csv"))))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2020, 1, d).unwrap()
    }

    #[test]
    fn rejects_unordered_dates() {
        let records = vec![
            Record { date: day(2), covariates: vec![1.0], target: 0.0 },
            Record { date: day(1), covariates: vec![1.0], target: 0.0 },
        ];
        assert!(Series::new("r", vec!["t".into()], records).is_err());
    }

    #[test]
    fn reads_csv_with_default_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("-83.812_10.39_train.csv");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "date,temp,precip,num_infect").unwrap();
        writeln!(f, "2012-01-01,26.5,3.0,4").unwrap();
        writeln!(f, "2012-01-02 00:00:00,27.0,0.5,6").unwrap();
        drop(f);

        let s = Series::from_csv(&path, "-83.812_10.39", &SeriesSchema::default()).unwrap();
        assert_eq!(s.len(), 2);
        assert_eq!(s.covariate_names(), &["temp".to_string(), "precip".to_string()]);
        assert_eq!(s.records()[1].covariates, vec![27.0, 0.5]);
        assert_eq!(s.records()[1].target, 6.0);
        assert_eq!(s.records()[1].date, NaiveDate::from_ymd_opt(2012, 1, 2).unwrap());
    }

    #[test]
    fn missing_file_is_a_data_error() {
        let schema = SeriesSchema::default();
        let err = Series::from_csv(Path::new("/nonexistent/x.csv"), "x", &schema).unwrap_err();
        assert!(matches!(err, ForecastError::Data { .. }));
    }

    #[test]
    fn split_paths_follow_naming_convention() {
        let coords = ["a".to_string(), "b".to_string()];
        let paths = split_paths(Path::new("data"), &coords, Split::Valid);
        assert_eq!(paths[1].1, Path::new("data").join("b_valid.csv"));
    }
}
