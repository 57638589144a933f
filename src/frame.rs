//! Wire-level CAN frame type and the CANopen function-code id ranges.
//!
//! Unlike the socketcan-backed teacher, frames here don't carry their own
//! transport id: a [`CANFrame`] is a channel + 11-bit id + up to 8 data
//! bytes, produced and consumed by [`crate::bus`] independent of whatever
//! physical bus backs it.

use binrw::{BinRead, BinWrite};
use std::io::Cursor;

use crate::error::{Error, Result};

/// NMT command/error-control broadcast id.
pub const COB_NMT: u16 = 0x000;
/// Global failsafe command id (same as NMT command id's pair in CiA301
/// Annex A.1), not used independently here.
pub const COB_SYNC: u16 = 0x080;
/// Base id for Emergency frames (`0x080 + node_id`, node ids start at 1 so
/// this never collides with [`COB_SYNC`]).
pub const COB_EMERGENCY_BASE: u16 = 0x080;
pub const COB_TPDO1_BASE: u16 = 0x180;
pub const COB_RPDO1_BASE: u16 = 0x200;
pub const COB_TPDO2_BASE: u16 = 0x280;
pub const COB_RPDO2_BASE: u16 = 0x300;
pub const COB_TPDO3_BASE: u16 = 0x380;
pub const COB_RPDO3_BASE: u16 = 0x400;
pub const COB_TPDO4_BASE: u16 = 0x480;
pub const COB_RPDO4_BASE: u16 = 0x500;
pub const COB_SDO_TX_BASE: u16 = 0x580;
pub const COB_SDO_RX_BASE: u16 = 0x600;
pub const COB_GUARD_BASE: u16 = 0x700;

/// An FD-CAN frame: 11-bit id, up to 64 data bytes (spec §3 "CANFrame —
/// `{canId:u16, length:u8, payload:[u8;64]}`"), tagged with the CANdle
/// channel it travels on (spec's multi-channel addressing). Classic
/// CANopen services (SDO, NMT, SYNC, emergency) only ever use the first 8
/// bytes; PDO mappings may use the full FD width (spec §3 "total bits ≤
/// 512").
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CANFrame {
    pub channel: u8,
    pub id: u16,
    pub dlc: u8,
    pub data: [u8; 64],
}

/// FD-CAN DLC values the drive accepts (spec §3). Classic 8-byte frames
/// and any length in between are still round-tripped; this is only
/// consulted where the spec calls for it (none of the core paths reject
/// non-conforming lengths today — see spec §9's note that the MD register
/// response-matching convention is implementation-defined).
pub const FD_DLC_STEPS: [u8; 8] = [8, 12, 16, 20, 24, 32, 48, 64];

impl CANFrame {
    pub fn new(channel: u8, id: u16, data: &[u8]) -> Result<Self> {
        if id > 0x7FF {
            return Err(Error::InvalidId(id as u32));
        }
        if data.len() > 64 {
            return Err(Error::DataTooLong(data.len()));
        }
        let mut buf = [0u8; 64];
        buf[..data.len()].copy_from_slice(data);
        Ok(Self {
            channel,
            id,
            dlc: data.len() as u8,
            data: buf,
        })
    }

    pub fn payload(&self) -> &[u8] {
        &self.data[..self.dlc as usize]
    }

    pub(crate) fn read_payload<T: BinRead>(&self) -> Result<T>
    where
        for<'a> T::Args<'a>: Default,
    {
        T::read_le(&mut Cursor::new(self.payload())).map_err(|e| Error::ParseError(e.to_string()))
    }

    pub(crate) fn write_payload<T: BinWrite>(id: u16, channel: u8, value: &T) -> Result<Self>
    where
        for<'a> T::Args<'a>: Default,
    {
        let mut cursor = Cursor::new(Vec::new());
        value
            .write_le(&mut cursor)
            .map_err(|e| Error::ParseError(e.to_string()))?;
        Self::new(channel, id, &cursor.into_inner())
    }
}

/// Classification of an incoming frame by its CiA-301 function code
/// (spec §4.5 "dispatch"), before the relevant handler parses the payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FunctionCode {
    Nmt,
    Sync,
    Emergency(u8),
    Tpdo1(u8),
    Rpdo1(u8),
    Tpdo2(u8),
    Rpdo2(u8),
    Tpdo3(u8),
    Rpdo3(u8),
    Tpdo4(u8),
    Rpdo4(u8),
    SdoTx(u8),
    SdoRx(u8),
    Guard(u8),
    Unknown(u16),
}

impl FunctionCode {
    pub fn classify(id: u16) -> Self {
        match id {
            COB_NMT => FunctionCode::Nmt,
            COB_SYNC => FunctionCode::Sync,
            0x081..=0x0FF => FunctionCode::Emergency((id - COB_EMERGENCY_BASE) as u8),
            0x181..=0x1FF => FunctionCode::Tpdo1((id - COB_TPDO1_BASE) as u8),
            0x201..=0x27F => FunctionCode::Rpdo1((id - COB_RPDO1_BASE) as u8),
            0x281..=0x2FF => FunctionCode::Tpdo2((id - COB_TPDO2_BASE) as u8),
            0x301..=0x37F => FunctionCode::Rpdo2((id - COB_RPDO2_BASE) as u8),
            0x381..=0x3FF => FunctionCode::Tpdo3((id - COB_TPDO3_BASE) as u8),
            0x401..=0x47F => FunctionCode::Rpdo3((id - COB_RPDO3_BASE) as u8),
            0x481..=0x4FF => FunctionCode::Tpdo4((id - COB_TPDO4_BASE) as u8),
            0x501..=0x57F => FunctionCode::Rpdo4((id - COB_RPDO4_BASE) as u8),
            0x581..=0x5FF => FunctionCode::SdoTx((id - COB_SDO_TX_BASE) as u8),
            0x601..=0x67F => FunctionCode::SdoRx((id - COB_SDO_RX_BASE) as u8),
            0x701..=0x77F => FunctionCode::Guard((id - COB_GUARD_BASE) as u8),
            other => FunctionCode::Unknown(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_known_ranges() {
        assert_eq!(FunctionCode::classify(0x000), FunctionCode::Nmt);
        assert_eq!(FunctionCode::classify(0x080), FunctionCode::Sync);
        assert_eq!(FunctionCode::classify(0x085), FunctionCode::Emergency(5));
        assert_eq!(FunctionCode::classify(0x182), FunctionCode::Tpdo1(2));
        assert_eq!(FunctionCode::classify(0x601), FunctionCode::SdoRx(1));
        assert_eq!(FunctionCode::classify(0x705), FunctionCode::Guard(5));
    }

    #[test]
    fn rejects_extended_ids_and_oversized_payloads() {
        assert!(CANFrame::new(0, 0x800, &[]).is_err());
        assert!(CANFrame::new(0, 0x100, &[0; 65]).is_err());
    }

    #[test]
    fn accepts_fd_length_payload() {
        let f = CANFrame::new(0, 0x181, &[0u8; 64]).unwrap();
        assert_eq!(f.dlc, 64);
        assert_eq!(f.payload().len(), 64);
    }

    #[test]
    fn payload_slices_to_dlc() {
        let f = CANFrame::new(0, 0x601, &[1, 2, 3]).unwrap();
        assert_eq!(f.payload(), &[1, 2, 3]);
    }
}
