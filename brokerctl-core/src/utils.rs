use sha2::{Digest, Sha256};
use tracing::warn;
use uuid::Uuid;

use crate::errors::{CoreError, Result};

// namespace of every stable uuid handed out by the agent
const STABLE_UUID_NAMESPACE: Uuid = Uuid::from_u128(0x3751f842_240e_48b9_89b5_5b47f04e931b);

const UNITS: [(&str, u32); 8] = [
    ("ZB", 7),
    ("EB", 6),
    ("PB", 5),
    ("TB", 4),
    ("GB", 3),
    ("MB", 2),
    ("KB", 1),
    ("B", 0),
];

/// Parses a byte size such as `512MB`, `1.5GiB` or `2048` into bytes.
///
/// Units are binary multiples (`KB` = 1024) and may carry an `i` (`KiB`). A value without a
/// recognised unit is taken as bytes.
pub fn parse_to_bytes(input: &str) -> Result<u64> {
    let upper = input.trim().to_uppercase().replace('I', "");
    let (number, exponent) = match UNITS
        .iter()
        .find(|(unit, _)| upper.ends_with(unit))
    {
        Some((unit, exponent)) => (upper[..upper.len() - unit.len()].trim(), *exponent),
        None => {
            warn!(
                input,
                "byte size does not contain a supported unit of measurement, using 'B'"
            );
            (upper.as_str(), 0)
        }
    };

    let value: f64 = number
        .parse()
        .map_err(|_| CoreError::InvalidByteSize(input.to_string()))?;
    if !value.is_finite() || value < 0.0 {
        return Err(CoreError::InvalidByteSize(input.to_string()));
    }
    Ok((value * 1024f64.powi(exponent as i32)) as u64)
}

/// Deterministic UUID derived from the given parts.
///
/// The parts are hashed with SHA-256 (empty parts are skipped), and the first 16 bytes of the
/// digest are the name of a version 5 UUID in the agent's namespace. The same inputs yield the
/// same identifier on every poll, on every replica.
pub fn stable_uuid(parts: &[&str]) -> Uuid {
    let mut hasher = Sha256::new();
    for part in parts.iter().filter(|p| !p.is_empty()) {
        hasher.update(part.as_bytes());
    }
    let digest = hasher.finalize();
    Uuid::new_v5(&STABLE_UUID_NAMESPACE, &digest[..16])
}

/// Short description of a list for logging: the names as a JSON array, or the first five names
/// followed by the count of the rest.
pub fn description<T, F>(list: &[T], name: F) -> String
where
    F: Fn(&T) -> String,
{
    const MAX: usize = 5;
    if list.len() > MAX {
        let head: Vec<String> = list.iter().take(MAX).map(&name).collect();
        format!("{} and {} more", head.join(", "), list.len() - MAX)
    } else {
        let names: Vec<String> = list.iter().map(&name).collect();
        serde_json::to_string(&names).unwrap_or_default()
    }
}
