//! NMT commands, SYNC, emergency and guard-frame decode (spec §4.5 "NMT",
//! "SYNC", "Emergency"; SPEC_FULL §C.3 for guard frames).

use binrw::{binrw, BinRead, BinWrite};

use crate::enums::{EmergencyErrorCode, EmergencyErrorRegister, GuardStatus, NmtFunction};
use crate::error::{Error, Result};
use crate::frame::{CANFrame, COB_NMT, COB_SYNC};

#[binrw]
#[brw(little)]
#[derive(Clone, Debug)]
struct NmtPayload {
    function: NmtFunction,
    target_node: u8,
}

/// Builds the outgoing `canId=0x000, dlc=2, [command, nodeId]` frame.
pub fn build_nmt(function: NmtFunction, target_node: u8) -> Result<CANFrame> {
    let mut cursor = std::io::Cursor::new(Vec::new());
    NmtPayload { function, target_node }
        .write_le(&mut cursor)
        .map_err(|e| Error::ParseError(e.to_string()))?;
    CANFrame::new(0, COB_NMT, &cursor.into_inner())
}

/// `canId=0x80, dlc=0` broadcast that triggers PDO transmission.
pub fn build_sync() -> Result<CANFrame> {
    CANFrame::new(0, COB_SYNC, &[])
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Emergency {
    pub node_id: u8,
    pub error_code: EmergencyErrorCode,
    pub error_register: u8,
}

impl Emergency {
    pub fn decode(frame: &CANFrame) -> Result<Self> {
        let data = frame.payload();
        if data.len() < 3 {
            return Err(Error::ParseError("emergency frame too short".into()));
        }
        let error_code = EmergencyErrorCode::decode(u16::from_le_bytes([data[0], data[1]]))?;
        Ok(Self {
            node_id: (frame.id - crate::frame::COB_EMERGENCY_BASE) as u8,
            error_code,
            error_register: data[2],
        })
    }

    pub fn error_register_bits(&self) -> Vec<EmergencyErrorRegister> {
        EmergencyErrorRegister::decode(self.error_register)
    }
}

/// Parse-only node-guarding reply (`0x700+id`); never completes an SDO.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Guard {
    pub node_id: u8,
    pub status: GuardStatus,
    pub toggle: bool,
}

impl Guard {
    pub fn decode(frame: &CANFrame) -> Result<Self> {
        let data = frame.payload();
        if data.is_empty() {
            return Err(Error::ParseError("guard frame empty".into()));
        }
        Ok(Self {
            node_id: (frame.id - crate::frame::COB_GUARD_BASE) as u8,
            status: GuardStatus::try_from(data[0])?,
            toggle: data[0] & 0x80 != 0,
        })
    }
}

/// Logs an incoming frame already classified as emergency/guard, matching
/// the "never completes an SDO, just reported" rule (spec §4.5, §7
/// propagation rules).
pub fn report(frame: &CANFrame, kind: crate::frame::FunctionCode) {
    match kind {
        crate::frame::FunctionCode::Emergency(_) => match Emergency::decode(frame) {
            Ok(e) => log::warn!(
                "emergency from node {}: {:?} (register bits {:?})",
                e.node_id,
                e.error_code,
                e.error_register_bits()
            ),
            Err(e) => log::debug!("dropping malformed emergency frame: {e}"),
        },
        crate::frame::FunctionCode::Guard(_) => match Guard::decode(frame) {
            Ok(g) => log::debug!("guard reply from node {}: {:?}", g.node_id, g.status),
            Err(e) => log::debug!("dropping malformed guard frame: {e}"),
        },
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_nmt_reset_node_frame() {
        let frame = build_nmt(NmtFunction::ResetNode, 5).unwrap();
        assert_eq!(frame.id, COB_NMT);
        assert_eq!(frame.payload(), &[0x81, 5]);
    }

    #[test]
    fn decodes_emergency_frame() {
        let frame = CANFrame::new(0, 0x085, &[0x10, 0x81, 0x02, 0, 0, 0, 0]).unwrap();
        let emergency = Emergency::decode(&frame).unwrap();
        assert_eq!(emergency.node_id, 5);
        assert_eq!(emergency.error_code, EmergencyErrorCode::CommunicationLifeGuardError);
    }

    #[test]
    fn decodes_guard_frame_masking_toggle() {
        let frame = CANFrame::new(0, 0x705, &[0x85]).unwrap();
        let guard = Guard::decode(&frame).unwrap();
        assert_eq!(guard.status, GuardStatus::Operational);
        assert!(guard.toggle);
    }
}
