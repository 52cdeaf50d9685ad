pub mod activation;
pub mod dropout;
pub mod feed_forward;
pub mod linear;
pub mod rnn;

pub use activation::Activation;
pub use dropout::Dropout;
pub use feed_forward::{FeedForward, FeedForwardTape};
pub use linear::LinearT;
pub use rnn::GRU;
