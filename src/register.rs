//! MD/PDS register protocol: a parallel, simpler request/response surface
//! over the same bridge, independent of the object dictionary (spec §4.6).
//!
//! The wire framing between a register request and its response is left
//! implementation-defined by the spec ("matches on `canId + 0x80` for
//! response"); this module picks and documents one convention rather than
//! guessing silently (SPEC_FULL §C.4, spec §9 open question).

use crate::bridge::CandleBridge;
use crate::error::{Error, Result};

const REGISTER_TIMEOUT_MS: u64 = 50;

/// A compile-time register id with a fixed primitive width. Concrete MD
/// register tables (motion, encoder, PDS) are a collaborator's concern;
/// this module only knows how to move bytes for whatever id it's given.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegisterId(pub u16);

fn request_cobid(drive_id: u8) -> u16 {
    0x680 + drive_id as u16
}

fn response_cobid(drive_id: u8) -> u16 {
    request_cobid(drive_id) + 0x80
}

/// Reads `register` on `drive_id`, returning the raw value bytes the
/// device sent back (the caller decodes them against the register's known
/// type, since this layer has no OD-style type tagging).
pub fn read(bridge: &mut CandleBridge, drive_id: u8, register: RegisterId) -> Result<Vec<u8>> {
    let mut request = Vec::with_capacity(2);
    request.extend_from_slice(&register.0.to_le_bytes());
    let response = bridge.transfer_can_frame(request_cobid(drive_id), &request, response_cobid(drive_id), REGISTER_TIMEOUT_MS)?;
    decode_response(register, &response)
}

/// Writes `value` to `register` on `drive_id`; the response is expected to
/// echo the same register id and value back.
pub fn write(bridge: &mut CandleBridge, drive_id: u8, register: RegisterId, value: &[u8]) -> Result<()> {
    let mut request = Vec::with_capacity(2 + value.len());
    request.extend_from_slice(&register.0.to_le_bytes());
    request.extend_from_slice(value);
    let response = bridge.transfer_can_frame(request_cobid(drive_id), &request, response_cobid(drive_id), REGISTER_TIMEOUT_MS)?;
    let echoed = decode_response(register, &response)?;
    if echoed != value {
        return Err(Error::BadResponse("register write echoed a different value".into()));
    }
    Ok(())
}

fn decode_response(register: RegisterId, response: &[u8]) -> Result<Vec<u8>> {
    if response.len() < 2 {
        return Err(Error::BadResponse("register response too short".into()));
    }
    let echoed_id = u16::from_le_bytes([response[0], response[1]]);
    if echoed_id != register.0 {
        return Err(Error::BadResponse(format!(
            "register response echoed id {echoed_id:#06x}, expected {:#06x}",
            register.0
        )));
    }
    Ok(response[2..].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_cobid_is_request_plus_0x80() {
        assert_eq!(response_cobid(10), 0x680 + 10 + 0x80);
    }

    #[test]
    fn decode_rejects_mismatched_register_id() {
        let response = [0x01, 0x00, 9, 9];
        let err = decode_response(RegisterId(0x0002), &response);
        assert!(matches!(err, Err(Error::BadResponse(_))));
    }
}
