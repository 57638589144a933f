//! SDO client: expedited and segmented read/write (spec §4.5 "SDO
//! expedited read/write", "SDO segmented read/write").

use std::time::{Duration, Instant};

use crate::bridge::CandleBridge;
use crate::enums::AbortCode;
use crate::error::{Error, Result};
use crate::frame::CANFrame;
use crate::od::{Entry, Value};

const EXPEDITED_TIMEOUT_MS: u64 = 20;
const SEGMENT_TIMEOUT_MS: u64 = 20;

fn cob_request(drive_id: u8) -> u16 {
    0x600 + drive_id as u16
}

fn cob_response(drive_id: u8) -> u16 {
    0x580 + drive_id as u16
}

fn round_trip(bridge: &mut CandleBridge, drive_id: u8, request: &[u8], timeout_ms: u64) -> Result<Vec<u8>> {
    let frame = CANFrame::new(0, cob_request(drive_id), request)?;
    bridge.send_can_frame(&frame)?;

    let deadline = Instant::now() + Duration::from_millis(timeout_ms);
    let response_id = cob_response(drive_id);
    while Instant::now() < deadline {
        if let Some(reply) = bridge.receive_can_frame() {
            if reply.id == response_id {
                return Ok(reply.payload().to_vec());
            }
            // Not our reply (e.g. stale response from a superseded request): drop silently.
        } else {
            std::thread::sleep(Duration::from_millis(1));
        }
    }
    Err(Error::ResponseTimeout(timeout_ms))
}

fn check_abort(payload: &[u8]) -> Result<()> {
    if payload.first() == Some(&0x80) {
        let code = u32::from_le_bytes(payload[4..8].try_into().unwrap_or([0; 4]));
        return Err(Error::SdoAbort(AbortCode::decode(code).encode()));
    }
    Ok(())
}

/// Reads one OD entry. Fails fast with `TypeMismatch`/`LimitExceeded`
/// before any frame is sent only for writes; reads have no such
/// shortcut since the value is unknown until the wire replies.
pub fn read(bridge: &mut CandleBridge, drive_id: u8, index: u16, subindex: u8, entry: &Entry) -> Result<Value> {
    let request = [0x40, (index & 0xFF) as u8, (index >> 8) as u8, subindex, 0, 0, 0, 0];
    let response = round_trip(bridge, drive_id, &request, EXPEDITED_TIMEOUT_MS)?;
    check_abort(&response)?;

    if response.len() < 8 {
        return Err(Error::BadResponse("SDO upload response too short".into()));
    }
    let cmd = response[0];
    if cmd == 0x41 {
        let total = u32::from_le_bytes(response[4..8].try_into().unwrap()) as usize;
        let bytes = segmented_read(bridge, drive_id, total)?;
        return Value::from_le_bytes(entry.data_type, &bytes);
    }

    // Expedited: `0x4x` where the top nibble is 4 and bits<3:2> of the low
    // nibble give `4 - n` valid bytes (spec §4.5: "4 - ((x>>2)&3)").
    if cmd & 0xF0 != 0x40 {
        return Err(Error::BadResponse(format!("unexpected SDO response command byte {cmd:#04x}")));
    }
    let n = 4 - ((cmd >> 2) & 0x03) as usize;
    Value::from_le_bytes(entry.data_type, &response[4..4 + n])
}

fn segmented_read(bridge: &mut CandleBridge, drive_id: u8, total: usize) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(total);
    let mut toggle = false;
    loop {
        let ctrl = 0x60 | if toggle { 0x10 } else { 0x00 };
        let request = [ctrl, 0, 0, 0, 0, 0, 0, 0];
        let response = round_trip(bridge, drive_id, &request, SEGMENT_TIMEOUT_MS)?;
        check_abort(&response)?;
        if response.is_empty() {
            return Err(Error::BadResponse("empty segment response".into()));
        }
        let byte0 = response[0];
        let last = byte0 & 0x01 != 0;
        let count = 7 - ((byte0 >> 1) & 0x07) as usize;
        out.extend_from_slice(&response[1..1 + count.min(response.len() - 1)]);
        toggle = !toggle;
        if last {
            break;
        }
    }
    Ok(out)
}

/// Writes one OD entry. Validates tag and limits locally first (spec
/// §4.5 tie-breaks: "fail as TypeMismatch, no frame sent").
pub fn write(bridge: &mut CandleBridge, drive_id: u8, index: u16, subindex: u8, entry: &Entry, value: &Value) -> Result<()> {
    entry.validate_write(index, subindex, value)?;
    let bytes = value.to_le_bytes();

    if bytes.len() <= 4 {
        expedited_write(bridge, drive_id, index, subindex, &bytes)
    } else {
        segmented_write(bridge, drive_id, index, subindex, &bytes)
    }
}

fn expedited_write(bridge: &mut CandleBridge, drive_id: u8, index: u16, subindex: u8, bytes: &[u8]) -> Result<()> {
    let mut request = [0u8; 8];
    request[0] = 0b0010_0011 | (((4 - bytes.len()) as u8) << 2);
    request[1] = (index & 0xFF) as u8;
    request[2] = (index >> 8) as u8;
    request[3] = subindex;
    request[4..4 + bytes.len()].copy_from_slice(bytes);

    let response = round_trip(bridge, drive_id, &request, EXPEDITED_TIMEOUT_MS)?;
    check_abort(&response)?;
    if response.first() != Some(&0x60) {
        return Err(Error::BadResponse("expedited write not acked".into()));
    }
    Ok(())
}

fn segmented_write(bridge: &mut CandleBridge, drive_id: u8, index: u16, subindex: u8, bytes: &[u8]) -> Result<()> {
    let mut init = [0u8; 8];
    init[0] = 0x21;
    init[1] = (index & 0xFF) as u8;
    init[2] = (index >> 8) as u8;
    init[3] = subindex;
    init[4..8].copy_from_slice(&(bytes.len() as u32).to_le_bytes());

    let ack = round_trip(bridge, drive_id, &init, EXPEDITED_TIMEOUT_MS)?;
    check_abort(&ack)?;
    if ack.first() != Some(&0x60) {
        return Err(Error::BadResponse("segmented write init not acked".into()));
    }

    let chunks: Vec<&[u8]> = bytes.chunks(7).collect();
    let mut toggle = false;
    for (i, chunk) in chunks.iter().enumerate() {
        let last = i == chunks.len() - 1;
        let count = chunk.len();
        let mut segment = [0u8; 8];
        segment[0] = ((toggle as u8) << 4) | (((7 - count) as u8) << 1) | (last as u8);
        segment[1..1 + count].copy_from_slice(chunk);

        let response = round_trip(bridge, drive_id, &segment, SEGMENT_TIMEOUT_MS)?;
        check_abort(&response)?;
        toggle = !toggle;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expedited_write_command_byte_encodes_size() {
        let mut request = [0u8; 8];
        let bytes = [42u8, 0, 0, 0];
        request[0] = 0b0010_0011 | (((4 - bytes.len()) as u8) << 2);
        assert_eq!(request[0], 0x23);
    }

    #[test]
    fn abort_response_surfaces_code() {
        let mut response = [0x80u8, 0, 0, 0, 0, 0, 0, 0];
        response[4..8].copy_from_slice(&0x0601_0002u32.to_le_bytes());
        let err = check_abort(&response).unwrap_err();
        assert!(matches!(err, Error::SdoAbort(0x0601_0002)));
    }
}
