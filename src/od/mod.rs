//! In-memory object dictionary model (spec §3, §4.4).

pub mod eds;

use std::collections::BTreeMap;

use crate::enums::{AccessType, DataType, ObjectType, PdoMappingKind};
use crate::error::{Error, Result};

/// A tagged value over the CiA-301 primitive types (spec §9: "tagged
/// values over templated getters").
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Boolean(bool),
    Integer8(i8),
    Integer16(i16),
    Integer32(i32),
    Integer64(i64),
    Unsigned8(u8),
    Unsigned16(u16),
    Unsigned32(u32),
    Unsigned64(u64),
    Real32(f32),
    VisibleString(String),
}

impl Value {
    pub fn data_type(&self) -> DataType {
        match self {
            Value::Boolean(_) => DataType::Boolean,
            Value::Integer8(_) => DataType::Integer8,
            Value::Integer16(_) => DataType::Integer16,
            Value::Integer32(_) => DataType::Integer32,
            Value::Integer64(_) => DataType::Integer64,
            Value::Unsigned8(_) => DataType::Unsigned8,
            Value::Unsigned16(_) => DataType::Unsigned16,
            Value::Unsigned32(_) => DataType::Unsigned32,
            Value::Unsigned64(_) => DataType::Unsigned64,
            Value::Real32(_) => DataType::Real32,
            Value::VisibleString(_) => DataType::VisibleString,
        }
    }

    pub fn byte_len(&self) -> usize {
        match self {
            Value::VisibleString(s) => s.len(),
            other => other.data_type().fixed_size().unwrap_or(0),
        }
    }

    pub fn to_le_bytes(&self) -> Vec<u8> {
        match self {
            Value::Boolean(b) => vec![*b as u8],
            Value::Integer8(v) => v.to_le_bytes().to_vec(),
            Value::Integer16(v) => v.to_le_bytes().to_vec(),
            Value::Integer32(v) => v.to_le_bytes().to_vec(),
            Value::Integer64(v) => v.to_le_bytes().to_vec(),
            Value::Unsigned8(v) => v.to_le_bytes().to_vec(),
            Value::Unsigned16(v) => v.to_le_bytes().to_vec(),
            Value::Unsigned32(v) => v.to_le_bytes().to_vec(),
            Value::Unsigned64(v) => v.to_le_bytes().to_vec(),
            Value::Real32(v) => v.to_le_bytes().to_vec(),
            Value::VisibleString(s) => s.as_bytes().to_vec(),
        }
    }

    /// Reconstructs a value of `data_type` from its wire bytes. Used both
    /// by SDO read completion and by the EDS parser's default/limit
    /// fields.
    pub fn from_le_bytes(data_type: DataType, bytes: &[u8]) -> Result<Self> {
        let need = data_type.fixed_size();
        if let Some(n) = need {
            if bytes.len() < n {
                return Err(Error::ParseError(format!(
                    "expected {n} bytes for {data_type:?}, got {}",
                    bytes.len()
                )));
            }
        }
        Ok(match data_type {
            DataType::Boolean => Value::Boolean(bytes[0] != 0),
            DataType::Integer8 => Value::Integer8(bytes[0] as i8),
            DataType::Integer16 => Value::Integer16(i16::from_le_bytes([bytes[0], bytes[1]])),
            DataType::Integer32 => Value::Integer32(i32::from_le_bytes(bytes[0..4].try_into().unwrap())),
            DataType::Integer64 => Value::Integer64(i64::from_le_bytes(bytes[0..8].try_into().unwrap())),
            DataType::Unsigned8 => Value::Unsigned8(bytes[0]),
            DataType::Unsigned16 => Value::Unsigned16(u16::from_le_bytes([bytes[0], bytes[1]])),
            DataType::Unsigned32 => Value::Unsigned32(u32::from_le_bytes(bytes[0..4].try_into().unwrap())),
            DataType::Unsigned64 => Value::Unsigned64(u64::from_le_bytes(bytes[0..8].try_into().unwrap())),
            DataType::Real32 => Value::Real32(f32::from_le_bytes(bytes[0..4].try_into().unwrap())),
            DataType::VisibleString => Value::VisibleString(String::from_utf8_lossy(bytes).into_owned()),
        })
    }

    /// `parseValue(string, dataType)` (spec §4.4 step 3): decimal, `0x`-hex,
    /// or `true`/`false` for booleans.
    pub fn parse(s: &str, data_type: DataType) -> Result<Self> {
        let s = s.trim();
        let as_i128 = |s: &str| -> Result<i128> {
            if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                i128::from_str_radix(hex, 16).map_err(|e| Error::ParseError(e.to_string()))
            } else {
                s.parse::<i128>().map_err(|e| Error::ParseError(e.to_string()))
            }
        };
        Ok(match data_type {
            DataType::Boolean => Value::Boolean(match s.to_ascii_lowercase().as_str() {
                "true" | "1" => true,
                "false" | "0" => false,
                _ => return Err(Error::ParseError(format!("not a bool: {s}"))),
            }),
            DataType::Integer8 => Value::Integer8(as_i128(s)? as i8),
            DataType::Integer16 => Value::Integer16(as_i128(s)? as i16),
            DataType::Integer32 => Value::Integer32(as_i128(s)? as i32),
            DataType::Integer64 => Value::Integer64(as_i128(s)? as i64),
            DataType::Unsigned8 => Value::Unsigned8(as_i128(s)? as u8),
            DataType::Unsigned16 => Value::Unsigned16(as_i128(s)? as u16),
            DataType::Unsigned32 => Value::Unsigned32(as_i128(s)? as u32),
            DataType::Unsigned64 => Value::Unsigned64(as_i128(s)? as u64),
            DataType::Real32 => Value::Real32(s.parse().map_err(|_| Error::ParseError(format!("not a float: {s}")))?),
            DataType::VisibleString => Value::VisibleString(s.to_owned()),
        })
    }

    /// Numeric comparison used for limit checks; non-numeric types (and
    /// mixed-tag comparisons) never compare.
    pub fn as_f64(&self) -> Option<f64> {
        Some(match self {
            Value::Integer8(v) => *v as f64,
            Value::Integer16(v) => *v as f64,
            Value::Integer32(v) => *v as f64,
            Value::Integer64(v) => *v as f64,
            Value::Unsigned8(v) => *v as f64,
            Value::Unsigned16(v) => *v as f64,
            Value::Unsigned32(v) => *v as f64,
            Value::Unsigned64(v) => *v as f64,
            Value::Real32(v) => *v as f64,
            Value::Boolean(_) | Value::VisibleString(_) => return None,
        })
    }
}

#[derive(Clone, Debug)]
pub struct Entry {
    pub parameter_name: String,
    pub object_type: ObjectType,
    pub data_type: DataType,
    pub access_type: AccessType,
    pub pdo_mapping: PdoMappingKind,
    pub value: Value,
    pub low_limit: Option<Value>,
    pub high_limit: Option<Value>,
    pub sub_entries: BTreeMap<u8, Entry>,
}

impl Entry {
    pub fn highest_subindex(&self) -> u8 {
        self.sub_entries.keys().copied().max().unwrap_or(0)
    }

    /// Enforces spec §3's OD invariants before a value would hit the wire.
    pub fn validate_write(&self, index: u16, subindex: u8, value: &Value) -> Result<()> {
        if value.data_type() != self.data_type {
            return Err(Error::TypeMismatch { index, subindex });
        }
        if let (Some(low), Some(v)) = (self.low_limit.as_ref().and_then(Value::as_f64), value.as_f64()) {
            if v < low {
                return Err(limit_error(index, subindex, &self.low_limit, &self.high_limit));
            }
        }
        if let (Some(high), Some(v)) = (self.high_limit.as_ref().and_then(Value::as_f64), value.as_f64()) {
            if v > high {
                return Err(limit_error(index, subindex, &self.low_limit, &self.high_limit));
            }
        }
        Ok(())
    }
}

fn limit_error(index: u16, subindex: u8, low: &Option<Value>, high: &Option<Value>) -> Error {
    Error::LimitExceeded {
        index,
        subindex,
        low: low.as_ref().map(|v| format!("{v:?}")).unwrap_or_default(),
        high: high.as_ref().map(|v| format!("{v:?}")).unwrap_or_default(),
    }
}

/// `index -> Entry` map. `VAR` entries are addressed as subindex 0 by
/// convention; `ARRAY`/`REC` entries are addressed through `Entry::sub_entries`.
#[derive(Clone, Debug, Default)]
pub struct ObjectDictionary {
    entries: BTreeMap<u16, Entry>,
}

impl ObjectDictionary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, index: u16, entry: Entry) {
        self.entries.insert(index, entry);
    }

    pub fn get(&self, index: u16) -> Option<&Entry> {
        self.entries.get(&index)
    }

    pub fn get_mut(&mut self, index: u16) -> Option<&mut Entry> {
        self.entries.get_mut(&index)
    }

    pub fn entry_at(&self, index: u16, subindex: u8) -> Result<&Entry> {
        let entry = self.entries.get(&index).ok_or(Error::UnknownObject { index, subindex })?;
        if subindex == 0 && entry.sub_entries.is_empty() {
            return Ok(entry);
        }
        entry.sub_entries.get(&subindex).ok_or(Error::UnknownObject { index, subindex })
    }

    pub fn entry_at_mut(&mut self, index: u16, subindex: u8) -> Result<&mut Entry> {
        let entry = self.entries.get_mut(&index).ok_or(Error::UnknownObject { index, subindex })?;
        if subindex == 0 && entry.sub_entries.is_empty() {
            return Ok(entry);
        }
        entry.sub_entries.get_mut(&subindex).ok_or(Error::UnknownObject { index, subindex })
    }

    pub fn read(&self, index: u16, subindex: u8) -> Result<&Value> {
        self.entry_at(index, subindex).map(|e| &e.value)
    }

    pub fn write(&mut self, index: u16, subindex: u8, value: Value) -> Result<()> {
        let entry = self.entry_at_mut(index, subindex)?;
        entry.validate_write(index, subindex, &value)?;
        entry.value = value;
        Ok(())
    }

    pub fn indices(&self) -> impl Iterator<Item = &u16> {
        self.entries.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var_entry(data_type: DataType, value: Value) -> Entry {
        Entry {
            parameter_name: "test".into(),
            object_type: ObjectType::Var,
            data_type,
            access_type: AccessType::ReadWrite,
            pdo_mapping: PdoMappingKind::No,
            value,
            low_limit: None,
            high_limit: None,
            sub_entries: BTreeMap::new(),
        }
    }

    #[test]
    fn write_rejects_tag_mismatch() {
        let mut od = ObjectDictionary::new();
        od.insert(0x2000, var_entry(DataType::Unsigned32, Value::Unsigned32(0)));
        let err = od.write(0x2000, 0, Value::Unsigned8(1));
        assert!(matches!(err, Err(Error::TypeMismatch { .. })));
    }

    #[test]
    fn write_rejects_out_of_range() {
        let mut od = ObjectDictionary::new();
        let mut entry = var_entry(DataType::Unsigned8, Value::Unsigned8(0));
        entry.high_limit = Some(Value::Unsigned8(100));
        od.insert(0x2001, entry);
        let err = od.write(0x2001, 0, Value::Unsigned8(200));
        assert!(matches!(err, Err(Error::LimitExceeded { .. })));
    }

    #[test]
    fn expedited_write_then_read_round_trips() {
        let mut od = ObjectDictionary::new();
        od.insert(0x2000, var_entry(DataType::Unsigned32, Value::Unsigned32(0)));
        od.write(0x2000, 0x0A, Value::Unsigned32(42)).unwrap_err();
        od.write(0x2000, 0, Value::Unsigned32(42)).unwrap();
        assert_eq!(od.read(0x2000, 0).unwrap(), &Value::Unsigned32(42));
    }

    #[test]
    fn value_parses_decimal_hex_and_bool() {
        assert_eq!(Value::parse("42", DataType::Unsigned32).unwrap(), Value::Unsigned32(42));
        assert_eq!(Value::parse("0x2A", DataType::Unsigned32).unwrap(), Value::Unsigned32(42));
        assert_eq!(Value::parse("true", DataType::Boolean).unwrap(), Value::Boolean(true));
    }
}
