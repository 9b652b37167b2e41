//! Serde helpers for wei amounts as decimal strings
//!
//! JSON numbers cannot carry 256-bit integers, so amounts travel as strings.
//! Deserialization also accepts `0x` hex strings and small JSON numbers.

use std::str::FromStr;

use alloy_primitives::U256;
use serde::{de, Deserialize, Deserializer, Serializer};

pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(u64),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Text(s) => U256::from_str(s.trim()).map_err(de::Error::custom),
        Raw::Number(n) => Ok(U256::from(n)),
    }
}
