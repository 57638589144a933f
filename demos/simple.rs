//! Minimal end-to-end demo: connect to a CANdle over USB, bring up the
//! CANopen stack against one drive, and exchange SDO/PDO/NMT traffic.
//!
//! Run with `cargo run --example simple` once a CANdle and an MD drive are
//! actually attached — there's no vcan-style loopback for USB, so this
//! isn't exercised in CI.

use candle_core::bridge::CandleBridge;
use candle_core::bus::UsbTransport;
use candle_core::canopen::pdo::PdoSelector;
use candle_core::enums::{AccessType, DataType, NmtFunction, ObjectType, PdoMappingKind};
use candle_core::od::{Entry, ObjectDictionary, Value};
use candle_core::CanopenStack;
use std::collections::BTreeMap;

const DRIVE_ID: u8 = 10;

fn var(data_type: DataType, value: Value) -> Entry {
    Entry {
        parameter_name: String::new(),
        object_type: ObjectType::Var,
        data_type,
        access_type: AccessType::ReadWrite,
        pdo_mapping: PdoMappingKind::Optional,
        value,
        low_limit: None,
        high_limit: None,
        sub_entries: BTreeMap::new(),
    }
}

/// A hand-built stand-in for what [`candle_core::od::eds::load`] would
/// normally populate from the drive's `.eds` file.
fn minimal_od() -> ObjectDictionary {
    let mut od = ObjectDictionary::new();
    od.insert(0x6064, var(DataType::Integer32, Value::Integer32(0)));

    let mut tpdo1_comm = var(DataType::Unsigned32, Value::Unsigned32(0));
    tpdo1_comm.sub_entries.insert(0x01, var(DataType::Unsigned32, Value::Unsigned32(0)));
    tpdo1_comm.sub_entries.insert(0x02, var(DataType::Unsigned8, Value::Unsigned8(0)));
    od.insert(0x1800, tpdo1_comm);

    let mut tpdo1_map = var(DataType::Unsigned8, Value::Unsigned8(0));
    tpdo1_map.sub_entries.insert(0x00, var(DataType::Unsigned8, Value::Unsigned8(0)));
    tpdo1_map.sub_entries.insert(0x01, var(DataType::Unsigned32, Value::Unsigned32(0)));
    od.insert(0x1A00, tpdo1_map);

    od
}

fn main() -> candle_core::Result<()> {
    env_logger::init();

    let mut bridge = CandleBridge::new(Box::new(UsbTransport::application()), 256, 5);
    bridge.configure_bus(1_000_000, 0, 0)?;

    let mut stack = CanopenStack::new(bridge);
    stack.add_drive(DRIVE_ID, 0, minimal_od());

    stack.send_nmt(NmtFunction::EnterOperational, DRIVE_ID)?;
    stack.setup_pdo(DRIVE_ID, PdoSelector::Tpdo1, &[(0x6064, 0x00)])?;

    loop {
        stack.send_sync()?;
        stack.poll_incoming();
        if let Some(od) = stack.od(DRIVE_ID) {
            if let Ok(position) = od.read(0x6064, 0x00) {
                println!("actual position: {position:?}");
            }
        }
        std::thread::sleep(std::time::Duration::from_millis(10));
    }
}
