//! Device discovery: walk node ids and report who answers (spec §4.8).

use std::collections::BTreeSet;

use crate::bridge::CandleBridge;
use crate::error::Result;
use crate::register::{self, RegisterId};

const MAX_NODE_ID: u8 = 127;
const PROBE_TIMEOUT_MS: u64 = 10;

fn sdo_cob_request(drive_id: u8) -> u16 {
    0x600 + drive_id as u16
}

fn sdo_cob_response(drive_id: u8) -> u16 {
    0x580 + drive_id as u16
}

/// Walks ids `1..=127`, issuing an expedited SDO read of 0x1000:00 (Device
/// Type, mandatory on every CiA-301 node) and collecting the ids that
/// answer within `PROBE_TIMEOUT_MS`.
///
/// This is a scan, so per-id timeouts are expected to fire for the vast
/// majority of ids; nothing here is an error condition worth logging at
/// more than debug.
pub fn ping_canopen(bridge: &mut CandleBridge) -> Result<BTreeSet<u8>> {
    let mut found = BTreeSet::new();
    let request = [0x40, 0x00, 0x10, 0x00, 0, 0, 0, 0];

    for id in 1..=MAX_NODE_ID {
        match bridge.transfer_can_frame(sdo_cob_request(id), &request, sdo_cob_response(id), PROBE_TIMEOUT_MS) {
            Ok(_) => {
                found.insert(id);
            }
            Err(e) => log::debug!("node {id} did not answer the discovery probe: {e}"),
        }
    }
    Ok(found)
}

/// Walks ids `1..=127`, issuing an MD register read of register 0x0000
/// (conventionally the device's identity register) and collecting the ids
/// that answer.
pub fn ping_mab(bridge: &mut CandleBridge) -> Result<BTreeSet<u8>> {
    let mut found = BTreeSet::new();
    for id in 1..=MAX_NODE_ID {
        match register::read(bridge, id, RegisterId(0x0000)) {
            Ok(_) => {
                found.insert(id);
            }
            Err(e) => log::debug!("node {id} did not answer the MD register probe: {e}"),
        }
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::LoopbackTransport;

    #[test]
    fn ping_canopen_finds_only_responding_ids() {
        let transport = LoopbackTransport::new(|out: &[u8]| {
            crate::bus::can_echo(out, |frame| {
                if frame.id == sdo_cob_request(5) {
                    Some((sdo_cob_response(5), vec![0x43, 0x00, 0x10, 0x00, 1, 2, 3, 4]))
                } else {
                    None
                }
            })
        });
        let mut bridge = CandleBridge::new(Box::new(transport), 50, 2);
        let first = ping_canopen(&mut bridge).unwrap();
        assert_eq!(first, [5].into_iter().collect::<BTreeSet<u8>>());
        let second = ping_canopen(&mut bridge).unwrap();
        assert_eq!(first, second);
    }
}
