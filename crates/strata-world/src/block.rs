use std::collections::BTreeMap;
use std::fmt;

pub const AIR_ID: &str = "minecraft:air";

/// Scalar block-state value as carried by a palette entry.
#[derive(Clone, Debug, PartialEq)]
pub enum BlockValue {
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Str(String),
}

impl BlockValue {
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            BlockValue::Byte(v) => Some(v as i64),
            BlockValue::Short(v) => Some(v as i64),
            BlockValue::Int(v) => Some(v as i64),
            BlockValue::Long(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for BlockValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockValue::Byte(v) => write!(f, "{}", v),
            BlockValue::Short(v) => write!(f, "{}", v),
            BlockValue::Int(v) => write!(f, "{}", v),
            BlockValue::Long(v) => write!(f, "{}", v),
            BlockValue::Float(v) => write!(f, "{}", v),
            BlockValue::Double(v) => write!(f, "{}", v),
            BlockValue::Str(s) => f.write_str(s),
        }
    }
}

/// One palette entry: namespaced id plus block state.
#[derive(Clone, Debug, PartialEq)]
pub struct BlockRecord {
    pub id: String,
    pub data: BTreeMap<String, BlockValue>,
    pub version: i32,
}

impl BlockRecord {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        debug_assert!(!id.is_empty(), "block id must not be empty");
        Self {
            id,
            data: BTreeMap::new(),
            version: 0,
        }
    }

    pub fn air() -> Self {
        Self::new(AIR_ID)
    }

    pub fn with_state(mut self, name: impl Into<String>, value: BlockValue) -> Self {
        self.data.insert(name.into(), value);
        self
    }

    #[inline]
    pub fn is_air(&self) -> bool {
        self.id == AIR_ID
    }

    #[inline]
    pub fn state(&self, name: &str) -> Option<&BlockValue> {
        self.data.get(name)
    }
}

impl fmt::Display for BlockRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)?;
        if !self.data.is_empty() {
            f.write_str("[")?;
            for (i, (k, v)) in self.data.iter().enumerate() {
                if i > 0 {
                    f.write_str(",")?;
                }
                write!(f, "{}={}", k, v)?;
            }
            f.write_str("]")?;
        }
        write!(f, " ({})", self.version)
    }
}
