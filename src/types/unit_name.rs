// ABOUTME: Shell-safe name validation for deployable units.
// ABOUTME: Unit names end up in remote file paths and supervisor entries.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UnitNameError {
    #[error("unit name cannot be empty")]
    Empty,

    #[error("unit name exceeds maximum length of 63 characters")]
    TooLong,

    #[error("unit name cannot start with a hyphen")]
    StartsWithHyphen,

    #[error("unit name cannot end with a hyphen")]
    EndsWithHyphen,

    #[error("unit name must be lowercase")]
    NotLowercase,

    #[error("invalid character in unit name: '{0}'")]
    InvalidChar(char),
}

/// Name of a deployable unit (RFC 1123 label rules).
///
/// Because the character set is lowercase alphanumerics and hyphens, a
/// `UnitName` can be interpolated into remote shell commands without quoting.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitName(String);

impl UnitName {
    pub fn new(value: &str) -> Result<Self, UnitNameError> {
        if value.is_empty() {
            return Err(UnitNameError::Empty);
        }

        if value.len() > 63 {
            return Err(UnitNameError::TooLong);
        }

        if value.starts_with('-') {
            return Err(UnitNameError::StartsWithHyphen);
        }

        if value.ends_with('-') {
            return Err(UnitNameError::EndsWithHyphen);
        }

        for c in value.chars() {
            if c.is_ascii_uppercase() {
                return Err(UnitNameError::NotLowercase);
            }
            if !c.is_ascii_lowercase() && !c.is_ascii_digit() && c != '-' {
                return Err(UnitNameError::InvalidChar(c));
            }
        }

        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UnitName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for UnitName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for UnitName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        UnitName::new(&s).map_err(serde::de::Error::custom)
    }
}
