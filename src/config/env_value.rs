// ABOUTME: Configuration values that may come from the environment.
// ABOUTME: Resolves literals and `{ env: VAR, default: ... }` references, secrets included.

use crate::error::{Error, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum EnvValue {
    Literal(String),
    FromEnv {
        #[serde(rename = "env")]
        var: String,
        #[serde(default)]
        default: Option<String>,
    },
}

impl EnvValue {
    pub fn resolve(&self) -> Result<String> {
        match self {
            EnvValue::Literal(s) => Ok(s.clone()),
            EnvValue::FromEnv { var, default } => match std::env::var(var) {
                Ok(val) => Ok(val),
                Err(_) => default
                    .clone()
                    .ok_or_else(|| Error::MissingEnvVar(var.clone())),
            },
        }
    }

    /// Resolve straight into a secret so the plain value never outlives this call.
    pub fn resolve_secret(&self) -> Result<SecretString> {
        self.resolve().map(SecretString::from)
    }
}

pub fn resolve_env_map(map: &BTreeMap<String, EnvValue>) -> Result<BTreeMap<String, String>> {
    map.iter()
        .map(|(k, v)| v.resolve().map(|resolved| (k.clone(), resolved)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn literal_resolves_to_itself() {
        let value: EnvValue = serde_yaml::from_str("production").unwrap();
        assert_eq!(value.resolve().unwrap(), "production");
    }

    #[test]
    fn env_reference_uses_default_when_unset() {
        let value: EnvValue =
            serde_yaml::from_str("{ env: DECKHAND_TEST_UNSET_VAR, default: fallback }").unwrap();
        temp_env::with_var_unset("DECKHAND_TEST_UNSET_VAR", || {
            assert_eq!(value.resolve().unwrap(), "fallback");
        });
    }

    #[test]
    fn missing_env_without_default_is_an_error() {
        let value: EnvValue = serde_yaml::from_str("{ env: DECKHAND_TEST_MISSING }").unwrap();
        temp_env::with_var_unset("DECKHAND_TEST_MISSING", || {
            let err = value.resolve().unwrap_err();
            assert!(matches!(err, Error::MissingEnvVar(ref v) if v == "DECKHAND_TEST_MISSING"));
        });
    }

    #[test]
    fn secret_resolution_reads_env() {
        let value: EnvValue = serde_yaml::from_str("{ env: DECKHAND_TEST_SECRET }").unwrap();
        temp_env::with_var("DECKHAND_TEST_SECRET", Some("s3cret"), || {
            assert_eq!(value.resolve_secret().unwrap().expose_secret(), "s3cret");
        });
    }
}
