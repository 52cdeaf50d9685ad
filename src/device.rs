use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ForecastError, Result};

/// Placement tag carried by datasets and models.
///
/// Every kernel in this crate executes on the host. The tag records which
/// compute context data and parameters were staged for, so that a forward
/// call mixing contexts is rejected before any arithmetic happens.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    /// Host memory.
    #[default]
    Cpu,
    /// Numbered external context.
    Context(u32),
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Context(n) => write!(f, "ctx:{n}"),
        }
    }
}

impl std::str::FromStr for Device {
    type Err = ForecastError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim().to_ascii_lowercase();
        if s == "cpu" {
            return Ok(Device::Cpu);
        }
        s.strip_prefix("ctx:")
            .and_then(|n| n.parse().ok())
            .map(Device::Context)
            .ok_or_else(|| ForecastError::config("device", format!("unknown device `{s}`")))
    }
}

/// Fail with a placement error unless `found` matches `expected`.
pub fn ensure_same(what: &'static str, expected: Device, found: Device) -> Result<()> {
    if expected == found {
        Ok(())
    } else {
        Err(ForecastError::Placement {
            what,
            expected,
            found,
        })
    }
}
