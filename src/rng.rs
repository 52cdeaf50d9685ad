use rand::{rngs::StdRng, Rng, RngCore, SeedableRng};
use rand_distr::StandardNormal;
use std::sync::atomic::{AtomicU64, Ordering};

static COUNTER: AtomicU64 = AtomicU64::new(0);

/// Create a [`StdRng`] seeded from the `SEED` environment variable.
///
/// Each call uses a unique seed derived from the base seed and an
/// incrementing counter to ensure deterministic yet distinct streams.
/// Returns `None` when `SEED` is unset or unparsable.
pub fn rng_from_env() -> Option<StdRng> {
    let base: u64 = std::env::var("SEED").ok().and_then(|s| s.parse().ok())?;
    let idx = COUNTER.fetch_add(1, Ordering::SeqCst);
    Some(StdRng::seed_from_u64(base + idx))
}

/// Injectable source of randomness for the model.
///
/// Supplies the fresh initial recurrent state drawn on every forward pass,
/// dropout masks, and the retained-row sampling of the evaluator. Defaults to
/// OS entropy; use [`NoiseSource::seeded`] for reproducible runs.
pub struct NoiseSource {
    rng: StdRng,
}

impl Default for NoiseSource {
    fn default() -> Self {
        Self::from_entropy()
    }
}

impl NoiseSource {
    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Seeded from `SEED` when set, otherwise from entropy.
    pub fn from_env() -> Self {
        match rng_from_env() {
            Some(rng) => Self { rng },
            None => Self::from_entropy(),
        }
    }

    /// Seeded when `seed` is given, otherwise [`NoiseSource::from_env`].
    pub fn from_option(seed: Option<u64>) -> Self {
        seed.map(Self::seeded).unwrap_or_else(Self::from_env)
    }

    /// `n` independent standard normal draws.
    pub fn standard_normal(&mut self, n: usize) -> Vec<f32> {
        (0..n).map(|_| self.rng.sample::<f32, _>(StandardNormal)).collect()
    }

    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }
}

impl RngCore for NoiseSource {
    fn next_u32(&mut self) -> u32 {
        self.rng.next_u32()
    }

    fn next_u64(&mut self) -> u64 {
        self.rng.next_u64()
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.rng.fill_bytes(dest)
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.rng.try_fill_bytes(dest)
    }
}
