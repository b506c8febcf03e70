//! Serde helpers that encode hashes as hex strings in JSON.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serializer};

use crate::Hash32;

pub fn decode_hash(s: &str) -> Result<Hash32, String> {
    let bytes = hex::decode(s.trim_start_matches("0x")).map_err(|e| e.to_string())?;
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| format!("expected 32 bytes, got {}", b.len()))
}

pub mod hash {
    use super::*;

    pub fn serialize<S: Serializer>(h: &Hash32, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(h))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Hash32, D::Error> {
        let s = String::deserialize(d)?;
        decode_hash(&s).map_err(D::Error::custom)
    }
}

pub mod hash_vec {
    use super::*;

    pub fn serialize<S: Serializer>(v: &[Hash32], s: S) -> Result<S::Ok, S::Error> {
        s.collect_seq(v.iter().map(hex::encode))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<Hash32>, D::Error> {
        let v = Vec::<String>::deserialize(d)?;
        v.iter()
            .map(|s| decode_hash(s).map_err(D::Error::custom))
            .collect()
    }
}

pub mod hash_pairs {
    use super::*;

    pub fn serialize<S: Serializer>(v: &[(Hash32, Hash32)], s: S) -> Result<S::Ok, S::Error> {
        s.collect_seq(v.iter().map(|(l, r)| [hex::encode(l), hex::encode(r)]))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<(Hash32, Hash32)>, D::Error> {
        let v = Vec::<[String; 2]>::deserialize(d)?;
        v.iter()
            .map(|[l, r]| {
                let l = decode_hash(l).map_err(D::Error::custom)?;
                let r = decode_hash(r).map_err(D::Error::custom)?;
                Ok((l, r))
            })
            .collect()
    }
}
