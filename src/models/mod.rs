pub mod decoder;
pub mod encoder;
pub mod latent_ode;
pub mod vector_field;

pub use decoder::Decoder;
pub use encoder::Encoder;
pub use latent_ode::{Forward, LatentOde};
pub use vector_field::{BoundField, VectorField};
