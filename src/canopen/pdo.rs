//! PDO mapping setup and TPDO/RPDO (de)serialisation (spec §4.5 "PDO
//! setup", "PDO dispatch on receive", "RPDO transmit").

use crate::bridge::CandleBridge;
use crate::canopen::sdo;
use crate::error::{Error, Result};
use crate::frame::CANFrame;
use crate::od::{ObjectDictionary, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PdoSelector {
    Rpdo1,
    Rpdo2,
    Rpdo3,
    Rpdo4,
    Tpdo1,
    Tpdo2,
    Tpdo3,
    Tpdo4,
}

impl PdoSelector {
    fn is_tpdo(self) -> bool {
        matches!(self, PdoSelector::Tpdo1 | PdoSelector::Tpdo2 | PdoSelector::Tpdo3 | PdoSelector::Tpdo4)
    }

    fn offset(self) -> u16 {
        match self {
            PdoSelector::Rpdo1 | PdoSelector::Tpdo1 => 0,
            PdoSelector::Rpdo2 | PdoSelector::Tpdo2 => 1,
            PdoSelector::Rpdo3 | PdoSelector::Tpdo3 => 2,
            PdoSelector::Rpdo4 | PdoSelector::Tpdo4 => 3,
        }
    }

    fn comm_index(self) -> u16 {
        if self.is_tpdo() { 0x1800 + self.offset() } else { 0x1400 + self.offset() }
    }

    fn map_index(self) -> u16 {
        if self.is_tpdo() { 0x1A00 + self.offset() } else { 0x1600 + self.offset() }
    }

    pub fn cobid_base(self) -> u16 {
        if self.is_tpdo() {
            crate::frame::COB_TPDO1_BASE + 0x100 * self.offset()
        } else {
            crate::frame::COB_RPDO1_BASE + 0x100 * self.offset()
        }
    }
}

/// `setupPDO(id, pdoSelector, fields)`. `fields` are OD `(index, subindex)`
/// pairs in declaration order, looked up against `od` for their bit size.
/// Every value written over the wire is mirrored into `od` afterwards, so
/// reading the mapping parameters back locally (spec §8 "reading back the
/// mapping parameter yields the same tuples") doesn't require a round-trip.
pub fn setup_pdo(
    bridge: &mut CandleBridge,
    od: &mut ObjectDictionary,
    drive_id: u8,
    selector: PdoSelector,
    fields: &[(u16, u8)],
) -> Result<()> {
    let comm_idx = selector.comm_index();
    let map_idx = selector.map_index();
    let cobid = selector.cobid_base() as u32 + drive_id as u32;

    write_mirrored(bridge, od, drive_id, comm_idx, 0x01, Value::Unsigned32(0x8000_0000 | cobid))?;
    write_mirrored(bridge, od, drive_id, comm_idx, 0x02, Value::Unsigned8(1))?;
    write_mirrored(bridge, od, drive_id, map_idx, 0x00, Value::Unsigned8(0))?;

    for (i, (index, subindex)) in fields.iter().enumerate() {
        let field_entry = od.entry_at(*index, *subindex)?;
        let bit_size = field_entry
            .data_type
            .fixed_size()
            .ok_or_else(|| Error::ParseError("PDO field must have a fixed-size data type".into()))?
            * 8;
        let packed = (*index as u32) << 16 | (*subindex as u32) << 8 | bit_size as u32;
        write_mirrored(bridge, od, drive_id, map_idx, (i + 1) as u8, Value::Unsigned32(packed))?;
    }

    write_mirrored(bridge, od, drive_id, map_idx, 0x00, Value::Unsigned8(fields.len() as u8))?;
    write_mirrored(bridge, od, drive_id, comm_idx, 0x01, Value::Unsigned32(cobid))?;

    Ok(())
}

/// Writes `value` to `index:subindex` over the wire, then mirrors the same
/// value into the local OD entry once the drive has acked it.
fn write_mirrored(bridge: &mut CandleBridge, od: &mut ObjectDictionary, drive_id: u8, index: u16, subindex: u8, value: Value) -> Result<()> {
    let entry = od.entry_at(index, subindex)?.clone();
    sdo::write(bridge, drive_id, index, subindex, &entry, &value)?;
    od.write(index, subindex, value)
}

/// Unpacks an incoming TPDO frame's payload into `od`'s mapped entries, in
/// the declaration order recorded at `mapIdx`. Parse failures are dropped
/// and logged (spec §7: "PDO receive parse errors are dropped silently").
pub fn dispatch_tpdo(od: &mut ObjectDictionary, selector: PdoSelector, frame: &CANFrame) {
    if let Err(e) = try_dispatch_tpdo(od, selector, frame) {
        log::debug!("dropping unparseable TPDO frame: {e}");
    }
}

fn try_dispatch_tpdo(od: &mut ObjectDictionary, selector: PdoSelector, frame: &CANFrame) -> Result<()> {
    let map_idx = selector.map_index();
    let count = match od.read(map_idx, 0x00)? {
        Value::Unsigned8(n) => *n,
        _ => return Err(Error::ParseError("PDO mapping count has wrong type".into())),
    };

    let mut offset = 0usize;
    let payload = frame.payload();
    for i in 1..=count {
        let packed = match od.read(map_idx, i)? {
            Value::Unsigned32(v) => *v,
            _ => return Err(Error::ParseError("PDO mapping entry has wrong type".into())),
        };
        let index = (packed >> 16) as u16;
        let subindex = ((packed >> 8) & 0xFF) as u8;
        let bit_size = (packed & 0xFF) as usize;
        let byte_size = bit_size / 8;

        if offset + byte_size > payload.len() {
            return Err(Error::ParseError("TPDO payload shorter than its mapping".into()));
        }
        let entry = od.entry_at(index, subindex)?;
        let value = Value::from_le_bytes(entry.data_type, &payload[offset..offset + byte_size])?;
        od.write(index, subindex, value)?;
        offset += byte_size;
    }
    Ok(())
}

/// `sendRPDOs()`: packs every RPDO whose transmission type is in `(0,
/// 250)` from the OD into one frame each, in mapping order.
pub fn build_rpdos(od: &ObjectDictionary, drive_id: u8) -> Vec<CANFrame> {
    let mut frames = Vec::new();
    for selector in [PdoSelector::Rpdo1, PdoSelector::Rpdo2, PdoSelector::Rpdo3, PdoSelector::Rpdo4] {
        if let Some(frame) = build_one_rpdo(od, drive_id, selector) {
            frames.push(frame);
        }
    }
    frames
}

fn build_one_rpdo(od: &ObjectDictionary, drive_id: u8, selector: PdoSelector) -> Option<CANFrame> {
    let comm_idx = selector.comm_index();
    let map_idx = selector.map_index();

    let transmission_type = match od.read(comm_idx, 0x02).ok()? {
        Value::Unsigned8(t) => *t,
        _ => return None,
    };
    if !(1..250).contains(&transmission_type) {
        return None;
    }

    let count = match od.read(map_idx, 0x00).ok()? {
        Value::Unsigned8(n) => *n,
        _ => return None,
    };

    let mut payload = Vec::new();
    for i in 1..=count {
        let packed = match od.read(map_idx, i).ok()? {
            Value::Unsigned32(v) => *v,
            _ => return None,
        };
        let index = (packed >> 16) as u16;
        let subindex = ((packed >> 8) & 0xFF) as u8;
        let value = od.read(index, subindex).ok()?;
        payload.extend_from_slice(&value.to_le_bytes());
    }

    let cobid = selector.cobid_base() as u32 + drive_id as u32;
    CANFrame::new(0, cobid as u16, &payload).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pdo_selector_computes_cobid_bases() {
        assert_eq!(PdoSelector::Tpdo1.cobid_base(), 0x180);
        assert_eq!(PdoSelector::Rpdo2.cobid_base(), 0x300);
        assert_eq!(PdoSelector::Tpdo1.comm_index(), 0x1800);
        assert_eq!(PdoSelector::Rpdo1.map_index(), 0x1600);
    }
}
