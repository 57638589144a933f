//! EDS (Electronic Data Sheet) text parser (spec §4.4).
//!
//! The format is INI-shaped: `[Section]` headers followed by `Key=Value`
//! lines. Index sections are named by their 4-hex-digit index
//! (`[2000]`), sub-sections by `[2000sub1]`.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use regex::Regex;

use super::{Entry, ObjectDictionary, Value};
use crate::enums::{AccessType, DataType, ObjectType, PdoMappingKind};
use crate::error::{Error, Result};

struct Ini {
    sections: BTreeMap<String, BTreeMap<String, String>>,
}

impl Ini {
    fn parse(text: &str) -> Result<Self> {
        let section_re = Regex::new(r"^\[(.+)\]$").unwrap();
        let kv_re = Regex::new(r"^([^=;]+)=(.*)$").unwrap();

        let mut sections = BTreeMap::new();
        let mut current: Option<String> = None;

        for (lineno, raw_line) in text.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
                continue;
            }
            if let Some(caps) = section_re.captures(line) {
                let name = caps[1].trim().to_string();
                sections.entry(name.clone()).or_insert_with(BTreeMap::new);
                current = Some(name);
                continue;
            }
            if let Some(caps) = kv_re.captures(line) {
                let key = caps[1].trim().to_string();
                let value = caps[2].trim().to_string();
                let section = current
                    .as_ref()
                    .ok_or_else(|| Error::ParseError(format!("line {}: key outside any section", lineno + 1)))?;
                sections.entry(section.clone()).or_insert_with(BTreeMap::new).insert(key, value);
                continue;
            }
            return Err(Error::ParseError(format!("line {}: unrecognised syntax", lineno + 1)));
        }

        Ok(Self { sections })
    }

    fn section(&self, name: &str) -> Option<&BTreeMap<String, String>> {
        self.sections.get(name)
    }

    fn get<'a>(&'a self, section: &str, key: &str) -> Option<&'a str> {
        self.section(section).and_then(|s| s.get(key)).map(String::as_str)
    }
}

pub fn load(path: impl AsRef<Path>) -> Result<ObjectDictionary> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|_| Error::FileNotFound(path.display().to_string()))?;
    parse(&text)
}

/// Parses `text` per spec §4.4's algorithm: enumerate declared indices from
/// the three object lists, then materialise each index's section (and any
/// `sub0, sub1, …` children) into an [`Entry`].
pub fn parse(text: &str) -> Result<ObjectDictionary> {
    let ini = Ini::parse(text)?;
    let mut od = ObjectDictionary::new();

    let mut indices = Vec::new();
    for list in ["MandatoryObjects", "OptionalObjects", "ManufacturerObjects"] {
        if let Some(section) = ini.section(list) {
            let count: usize = section
                .get("SupportedObjects")
                .and_then(|s| s.parse().ok())
                .unwrap_or(0);
            for i in 1..=count {
                if let Some(raw) = section.get(&i.to_string()) {
                    indices.push(parse_index(raw)?);
                }
            }
        }
    }

    for index in indices {
        let section_name = format!("{index:X}");
        let section = ini
            .section(&section_name)
            .ok_or_else(|| Error::ParseError(format!("declared index {index:#06x} has no section")))?;

        let object_type = section
            .get("ObjectType")
            .and_then(|s| parse_int(s).ok())
            .map(ObjectType::from_eds_code)
            .unwrap_or(ObjectType::Var);

        let entry = match object_type {
            ObjectType::Array | ObjectType::Record => {
                let mut entry = build_entry(section, object_type)?;
                let mut sub = 0u8;
                loop {
                    let sub_name = format!("{section_name}sub{sub}");
                    match ini.section(&sub_name) {
                        Some(sub_section) => {
                            entry.sub_entries.insert(sub, build_entry(sub_section, ObjectType::Var)?);
                            sub = sub.checked_add(1).ok_or_else(|| Error::ParseError("too many sub-entries".into()))?;
                        }
                        None => break,
                    }
                }
                entry
            }
            _ => build_entry(section, object_type)?,
        };

        od.insert(index, entry);
    }

    Ok(od)
}

fn build_entry(section: &BTreeMap<String, String>, object_type: ObjectType) -> Result<Entry> {
    let data_type = section
        .get("DataType")
        .and_then(|s| parse_int(s).ok())
        .map(DataType::from_eds_code)
        .unwrap_or(DataType::Unsigned8);

    let parameter_name = section.get("ParameterName").cloned().unwrap_or_default();
    let access_type = section.get("AccessType").map(|s| AccessType::from_eds_str(s)).unwrap_or(AccessType::None);
    let pdo_mapping = section.get("PDOMapping").map(|s| PdoMappingKind::from_eds_str(s)).unwrap_or(PdoMappingKind::No);

    let value = match section.get("DefaultValue") {
        Some(s) if !s.is_empty() => Value::parse(s, data_type)?,
        _ => zero_value(data_type),
    };
    let low_limit = match section.get("LowLimit") {
        Some(s) if !s.is_empty() => Some(Value::parse(s, data_type)?),
        _ => None,
    };
    let high_limit = match section.get("HighLimit") {
        Some(s) if !s.is_empty() => Some(Value::parse(s, data_type)?),
        _ => None,
    };

    Ok(Entry {
        parameter_name,
        object_type,
        data_type,
        access_type,
        pdo_mapping,
        value,
        low_limit,
        high_limit,
        sub_entries: BTreeMap::new(),
    })
}

fn zero_value(data_type: DataType) -> Value {
    match data_type {
        DataType::Boolean => Value::Boolean(false),
        DataType::Integer8 => Value::Integer8(0),
        DataType::Integer16 => Value::Integer16(0),
        DataType::Integer32 => Value::Integer32(0),
        DataType::Integer64 => Value::Integer64(0),
        DataType::Unsigned8 => Value::Unsigned8(0),
        DataType::Unsigned16 => Value::Unsigned16(0),
        DataType::Unsigned32 => Value::Unsigned32(0),
        DataType::Unsigned64 => Value::Unsigned64(0),
        DataType::Real32 => Value::Real32(0.0),
        DataType::VisibleString => Value::VisibleString(String::new()),
    }
}

fn parse_index(raw: &str) -> Result<u16> {
    parse_int(raw).map(|v| v as u16)
}

fn parse_int(raw: &str) -> Result<u64> {
    let raw = raw.trim();
    if let Some(hex) = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).map_err(|e| Error::ParseError(e.to_string()))
    } else {
        raw.parse().map_err(|e: std::num::ParseIntError| Error::ParseError(e.to_string()))
    }
}

/// Structural validation independent of any one index (spec §4.4 last
/// paragraph).
pub fn validate(od: &ObjectDictionary) -> Result<()> {
    for required in [0x1000u16, 0x1001, 0x1018] {
        if od.get(required).is_none() {
            return Err(Error::ParseError(format!("missing mandatory index {required:#06x}")));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[MandatoryObjects]
SupportedObjects=3
1=0x1000
2=0x1001
3=0x1018

[1000]
ParameterName=Device Type
ObjectType=0x7
DataType=0x7
AccessType=ro
DefaultValue=0x00000192

[1001]
ParameterName=Error Register
ObjectType=0x7
DataType=0x5
AccessType=ro
DefaultValue=0

[1018]
ParameterName=Identity
ObjectType=0x9
DataType=0x7
AccessType=ro
SubNumber=1

[1018sub0]
ParameterName=Highest sub-index supported
DataType=0x5
AccessType=ro
DefaultValue=1

[OptionalObjects]
SupportedObjects=1
1=0x2000

[2000]
ParameterName=Motor current limit
ObjectType=0x7
DataType=0x7
AccessType=rw
DefaultValue=0
LowLimit=0
HighLimit=100
"#;

    #[test]
    fn parses_mandatory_indices_and_validates() {
        let od = parse(SAMPLE).unwrap();
        assert!(validate(&od).is_ok());
        assert_eq!(od.read(0x1000, 0).unwrap(), &Value::Unsigned32(0x192));
    }

    #[test]
    fn array_like_section_collects_sub_entries() {
        let od = parse(SAMPLE).unwrap();
        let identity = od.get(0x1018).unwrap();
        assert_eq!(identity.sub_entries.len(), 1);
    }

    #[test]
    fn respects_low_high_limits_from_eds() {
        let mut od = parse(SAMPLE).unwrap();
        let err = od.write(0x2000, 0, Value::Unsigned32(200));
        assert!(matches!(err, Err(Error::LimitExceeded { .. })));
    }

    #[test]
    fn missing_mandatory_index_fails_validation() {
        let od = parse("[MandatoryObjects]\nSupportedObjects=0\n").unwrap();
        assert!(validate(&od).is_err());
    }
}
