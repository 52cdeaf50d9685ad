pub mod dataset;
pub mod series;

pub use dataset::{ChannelStats, Dataset, EncoderInput, Window, Windows};
pub use series::{split_paths, Record, Series, SeriesSchema, Split};
