use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Last rendered checksum of one subchunk under one profile.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecksumRecord {
    /// Row id once stored; `None` for records not yet inserted.
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(with = "hex_bytes")]
    pub level_db_key: Vec<u8>,
    pub crc32: u32,
    pub profile: String,
}

impl ChecksumRecord {
    pub fn new(key: impl Into<Vec<u8>>, crc32: u32, profile: impl Into<String>) -> Self {
        Self {
            id: None,
            level_db_key: key.into(),
            crc32,
            profile: profile.into(),
        }
    }

    #[inline]
    pub fn is_stored(&self) -> bool {
        self.id.is_some()
    }
}

/// Render settings persisted per (dimension, profile) so later incremental
/// runs draw tiles compatible with the existing ones.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsRow {
    pub dimension: i32,
    pub profile: String,
    pub format: String,
    pub quality: u8,
    pub chunks_per_dimension: u32,
    pub min_zoom: i32,
    pub max_zoom: i32,
}

mod hex_bytes {
    use super::*;

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        hex::decode(&s).map_err(|e| serde::de::Error::custom(format!("bad hex key '{}': {}", s, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_serializes_as_hex() {
        let rec = ChecksumRecord::new(vec![0x01, 0xab, 0x2f], 7, "default");
        let json = serde_json::to_string(&rec).unwrap();
        assert!(json.contains("\"01ab2f\""));
        let back: ChecksumRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, rec);
    }

    #[test]
    fn bad_hex_is_rejected() {
        let json = r#"{"id":1,"level_db_key":"0g","crc32":1,"profile":""}"#;
        assert!(serde_json::from_str::<ChecksumRecord>(json).is_err());
        let json = r#"{"id":1,"level_db_key":"abc","crc32":1,"profile":""}"#;
        assert!(serde_json::from_str::<ChecksumRecord>(json).is_err());
    }
}
