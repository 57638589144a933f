//! `.mab` firmware file parser (spec §4.7 "MAB firmware-file format";
//! SPEC_FULL §C.5).

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use regex::Regex;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

const MIN_BOOT_ADDRESS: u32 = 0x0800_0000;

#[derive(Clone, Debug)]
pub struct MabFile {
    pub tag: String,
    pub size: u32,
    pub start: u32,
    pub version: String,
    pub checksum: [u8; 32],
    pub iv: [u8; 16],
    pub binary: Vec<u8>,
}

impl MabFile {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|_| Error::FileNotFound(path.display().to_string()))?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let section_re = Regex::new(r"(?s)\[firmware\](.*?)(\[|\z)").unwrap();
        let kv_re = Regex::new(r"(?m)^([A-Za-z]+)=(.+)$").unwrap();

        let body = section_re
            .captures(text)
            .and_then(|c| c.get(1))
            .ok_or_else(|| Error::ParseError("missing [firmware] section".into()))?
            .as_str();

        let mut fields: BTreeMap<String, String> = BTreeMap::new();
        for caps in kv_re.captures_iter(body) {
            fields.insert(caps[1].trim().to_lowercase(), caps[2].trim().to_string());
        }

        let get = |key: &str| fields.get(key).cloned().ok_or_else(|| Error::ParseError(format!("missing field: {key}")));

        let tag = get("tag")?;
        let size: u32 = get("size")?.parse().map_err(|_| Error::ParseError("bad size".into()))?;
        let start = parse_hex_u32(&get("start")?)?;
        let version = get("version")?;
        let checksum = parse_hex_bytes::<32>(&get("checksum")?)?;
        let iv = parse_hex_bytes::<16>(&get("iv")?)?;
        let binary = hex::decode(get("binary")?.trim()).map_err(|e| Error::ParseError(e.to_string()))?;

        if start < MIN_BOOT_ADDRESS {
            return Err(Error::ParseError(format!("boot address {start:#010x} below {MIN_BOOT_ADDRESS:#010x}")));
        }
        if size == 0 || size as usize > binary.len() {
            return Err(Error::ParseError("size is zero or exceeds the binary region".into()));
        }

        Ok(Self {
            tag,
            size,
            start,
            version,
            checksum,
            iv,
            binary,
        })
    }

    /// Validates `self.tag` against the device target the loader expects
    /// before flashing (spec §4.7).
    pub fn validate_target(&self, expected_tag: &str) -> Result<()> {
        if self.tag != expected_tag {
            return Err(Error::ParseError(format!("firmware tag '{}' does not match expected target '{expected_tag}'", self.tag)));
        }
        Ok(())
    }

    pub fn verify_checksum(&self) -> Result<()> {
        let mut hasher = Sha256::new();
        hasher.update(&self.binary[..self.size as usize]);
        let digest: [u8; 32] = hasher.finalize().into();
        if digest != self.checksum {
            return Err(Error::ParseError("firmware checksum mismatch".into()));
        }
        Ok(())
    }

    pub fn pages(&self, page_size: usize) -> impl Iterator<Item = &[u8]> {
        self.binary[..self.size as usize].chunks(page_size)
    }
}

fn parse_hex_u32(s: &str) -> Result<u32> {
    let s = s.trim().trim_start_matches("0x").trim_start_matches("0X");
    u32::from_str_radix(s, 16).map_err(|e| Error::ParseError(e.to_string()))
}

fn parse_hex_bytes<const N: usize>(s: &str) -> Result<[u8; N]> {
    let bytes = hex::decode(s.trim()).map_err(|e| Error::ParseError(e.to_string()))?;
    bytes.try_into().map_err(|v: Vec<u8>| Error::ParseError(format!("expected {N} bytes, got {}", v.len())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> String {
        let binary = vec![0xABu8; 16];
        let mut hasher = Sha256::new();
        hasher.update(&binary);
        let checksum: [u8; 32] = hasher.finalize().into();
        format!(
            "[firmware]\ntag=MD\nsize=16\nstart=0x08001000\nversion=1.2.3\nchecksum={}\niv={}\nbinary={}\n",
            hex::encode(checksum),
            hex::encode([0u8; 16]),
            hex::encode(&binary),
        )
    }

    #[test]
    fn parses_and_verifies_checksum() {
        let mab = MabFile::parse(&sample()).unwrap();
        assert_eq!(mab.tag, "MD");
        assert!(mab.verify_checksum().is_ok());
    }

    #[test]
    fn rejects_boot_address_below_minimum() {
        let bad = sample().replace("start=0x08001000", "start=0x07000000");
        assert!(MabFile::parse(&bad).is_err());
    }

    #[test]
    fn validate_target_rejects_wrong_tag() {
        let mab = MabFile::parse(&sample()).unwrap();
        assert!(mab.validate_target("CANdle").is_err());
        assert!(mab.validate_target("MD").is_ok());
    }
}
