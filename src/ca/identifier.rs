//! CA identifier encoding.
//!
//! `libresign-ca-id:{instanceId}_g:{generation}_e:{o|c}` is persisted by
//! hosts and must round-trip exactly.

use super::CaEngineKind;
use crate::error::{Error, Result};
use lazy_static::lazy_static;
use regex::Regex;
use std::fmt;
use std::str::FromStr;

/// Prefix of every encoded identifier.
pub const PREFIX: &str = "libresign-ca-id:";

lazy_static! {
    static ref RE_IDENTIFIER: Regex =
        Regex::new(r"^libresign-ca-id:([A-Za-z0-9]+)_g:([0-9]+)_e:([oc])$").unwrap();
}

/// Identifier of one generation of an installation's CA material.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CaIdentifier {
    instance_id: String,
    generation: u64,
    engine: CaEngineKind,
}

impl CaIdentifier {
    /// Validated constructor: `instance_id` is non-empty ASCII alphanumeric
    /// and `generation` is at least 1.
    pub fn new(
        instance_id: impl Into<String>,
        generation: u64,
        engine: CaEngineKind,
    ) -> Result<Self> {
        let instance_id = instance_id.into();
        if instance_id.is_empty() || !instance_id.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(Error::Validation(format!(
                "instance id must be ASCII alphanumeric, got {:?}",
                instance_id
            )));
        }
        if generation == 0 {
            return Err(Error::Validation("CA generation starts at 1".to_string()));
        }
        Ok(Self {
            instance_id,
            generation,
            engine,
        })
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn engine(&self) -> CaEngineKind {
        self.engine
    }

    /// Encoded form.
    pub fn encode(&self) -> String {
        self.to_string()
    }

    /// Parse an encoded identifier.
    pub fn decode(encoded: &str) -> Result<Self> {
        encoded.parse()
    }

    /// Same instance and engine at another generation.
    pub fn with_generation(&self, generation: u64) -> Result<Self> {
        Self::new(self.instance_id.clone(), generation, self.engine)
    }
}

impl fmt::Display for CaIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}_g:{}_e:{}",
            PREFIX,
            self.instance_id,
            self.generation,
            self.engine.code()
        )
    }
}

impl FromStr for CaIdentifier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if !s.starts_with(PREFIX) {
            return Err(Error::Validation(format!("CA identifier must start with {}", PREFIX)));
        }
        let caps = RE_IDENTIFIER
            .captures(s)
            .ok_or_else(|| Error::Validation(format!("malformed CA identifier: {}", s)))?;
        let generation = caps[2]
            .parse::<u64>()
            .map_err(|e| Error::Validation(format!("invalid CA generation {}: {}", &caps[2], e)))?;
        let engine = caps[3]
            .chars()
            .next()
            .ok_or_else(|| Error::Validation("missing engine code".to_string()))
            .and_then(CaEngineKind::from_code)?;
        Self::new(&caps[1], generation, engine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_encode() {
        let id = CaIdentifier::new("oc1a2b3c", 4, CaEngineKind::Cfssl).unwrap();
        assert_eq!(id.encode(), "libresign-ca-id:oc1a2b3c_g:4_e:c");
    }

    #[test]
    fn test_decode_errors() {
        for bad in [
            "",
            "libresign-ca:abc_g:1_e:o",
            "libresign-ca-id:abc_g:x_e:o",
            "libresign-ca-id:abc_g:1_e:z",
            "libresign-ca-id:ab-c_g:1_e:o",
            "libresign-ca-id:abc_g:0_e:o",
            "libresign-ca-id:abc_g:1_e:o ",
            "libresign-ca-id:abc_g:99999999999999999999999_e:o",
        ] {
            assert!(
                matches!(CaIdentifier::decode(bad), Err(Error::Validation(_))),
                "{:?} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_new_rejects_bad_parts() {
        assert!(CaIdentifier::new("", 1, CaEngineKind::OpenSsl).is_err());
        assert!(CaIdentifier::new("a_b", 1, CaEngineKind::OpenSsl).is_err());
        assert!(CaIdentifier::new("ab", 0, CaEngineKind::OpenSsl).is_err());
    }

    proptest! {
        #[test]
        fn prop_roundtrip(
            instance in "[A-Za-z0-9]{1,24}",
            generation in 1u64..u64::MAX,
            cfssl in any::<bool>(),
        ) {
            let engine = if cfssl { CaEngineKind::Cfssl } else { CaEngineKind::OpenSsl };
            let id = CaIdentifier::new(instance, generation, engine).unwrap();
            prop_assert_eq!(CaIdentifier::decode(&id.encode()).unwrap(), id);
        }

        #[test]
        fn prop_distinct_generations_encode_distinctly(
            g1 in 1u64..1_000_000,
            delta in 1u64..1_000,
        ) {
            let a = CaIdentifier::new("inst", g1, CaEngineKind::OpenSsl).unwrap();
            let b = a.with_generation(g1 + delta).unwrap();
            prop_assert_ne!(a.encode(), b.encode());
        }
    }
}
