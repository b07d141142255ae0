//! Access codes — the short numeric handles events are shared under.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Access codes are exactly this many ASCII digits.
pub const CODE_LENGTH: usize = 5;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CodeError {
    #[error("access codes are exactly {CODE_LENGTH} digits, got {0:?}")]
    Malformed(String),
}

/// 5-digit event access code.
///
/// Knowledge of the code is the only thing gating access to an event, so the
/// code space is deliberately small and human-typeable. Generation stays in
/// 10000..=99999 (no leading zeros) to match what users expect to read out
/// loud; parsing accepts any 5 ASCII digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessCode(String);

impl AccessCode {
    /// Draw a fresh random code. Uniqueness is the store's problem, not ours.
    pub fn generate(rng: &mut impl Rng) -> Self {
        Self(rng.gen_range(10_000..=99_999u32).to_string())
    }

    pub fn parse(raw: &str) -> Result<Self, CodeError> {
        if raw.len() == CODE_LENGTH && raw.bytes().all(|b| b.is_ascii_digit()) {
            Ok(Self(raw.to_string()))
        } else {
            Err(CodeError::Malformed(raw.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccessCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for AccessCode {
    type Err = CodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_generated_codes_are_five_digits() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let code = AccessCode::generate(&mut rng);
            assert_eq!(code.as_str().len(), CODE_LENGTH);
            assert!(code.as_str().bytes().all(|b| b.is_ascii_digit()));
            assert_ne!(code.as_str().as_bytes()[0], b'0');
        }
    }

    #[test]
    fn test_parse_accepts_leading_zeros() {
        let code = AccessCode::parse("00042").unwrap();
        assert_eq!(code.as_str(), "00042");
    }

    #[test]
    fn test_parse_rejects_wrong_length() {
        assert!(AccessCode::parse("1234").is_err());
        assert!(AccessCode::parse("123456").is_err());
        assert!(AccessCode::parse("").is_err());
    }

    #[test]
    fn test_parse_rejects_non_digits() {
        assert!(AccessCode::parse("12a45").is_err());
        assert!(AccessCode::parse("12 45").is_err());
        assert!(AccessCode::parse("①2345").is_err());
    }

    #[test]
    fn test_from_str_and_display_round_trip() {
        let code: AccessCode = "54321".parse().unwrap();
        assert_eq!(code.to_string(), "54321");
    }
}
