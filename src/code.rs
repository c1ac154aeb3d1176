//! Pickup codes: validation, scan payload parsing and generation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

pub const CODE_LEN: usize = 4;
pub const DEFAULT_SCAN_PREFIX: &str = "pickup://scan/";

/// A 4-digit pickup code minted by the exchange service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PickupCode(String);

impl PickupCode {
    /// Parse typed input. Surrounding whitespace is ignored.
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        if is_code(trimmed) {
            Ok(Self(trimmed.to_string()))
        } else {
            Err(Error::Validation(
                "Please enter a valid 4-digit code".to_string(),
            ))
        }
    }

    /// Extract a code from a decoded scan payload.
    ///
    /// Tries the segment after the last `/`, then the trailing four
    /// characters.
    pub fn from_scan(payload: &str) -> Result<Self> {
        let payload = payload.trim();
        let segment = payload.rsplit('/').next().unwrap_or(payload);
        if is_code(segment) {
            return Ok(Self(segment.to_string()));
        }

        let tail: String = {
            let chars: Vec<char> = payload.chars().collect();
            let start = chars.len().saturating_sub(CODE_LEN);
            chars[start..].iter().collect()
        };
        if is_code(&tail) {
            return Ok(Self(tail));
        }

        Err(Error::Validation(format!(
            "Invalid QR code: could not read a 4-digit code (got \"{tail}\")"
        )))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Payload to render as a scannable code.
    pub fn scan_payload(&self, prefix: &str) -> String {
        format!("{prefix}{}", self.0)
    }

    /// Text handed to the platform share mechanism.
    pub fn share_message(&self) -> String {
        format!("Access your files with code: {}", self.0)
    }
}

fn is_code(s: &str) -> bool {
    s.len() == CODE_LEN && s.bytes().all(|b| b.is_ascii_digit())
}

impl FromStr for PickupCode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for PickupCode {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<PickupCode> for String {
    fn from(code: PickupCode) -> Self {
        code.0
    }
}

impl fmt::Display for PickupCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
