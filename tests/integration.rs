//! End-to-end scenarios spanning multiple modules, exercised only through
//! `candle_core`'s public API (spec §8 testable properties).

use std::collections::BTreeMap;
use std::io::Cursor;

use binrw::{BinRead, BinWrite};
use candle_core::bridge::CandleBridge;
use candle_core::bus::{BusFrame, LoopbackTransport};
use candle_core::canopen::pdo::PdoSelector;
use candle_core::discovery;
use candle_core::enums::{AccessType, DataType, ObjectType, PdoMappingKind};
use candle_core::frame::CANFrame;
use candle_core::od::{eds, Entry, ObjectDictionary, Value};
use candle_core::CanopenStack;

const WIRE_SIZE: usize = 108;

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

/// Mirrors the crate-internal pack/unpack at the level a real CANdle sees:
/// decode whatever `BusFrame`s arrived in `out`, hand each CAN frame to
/// `responder`, and pack the replies back into one wire buffer.
fn wire_echo(out: &[u8], responder: impl Fn(&CANFrame) -> Option<(u16, Vec<u8>)>) -> Vec<u8> {
    let mut offset = 0;
    let mut replies = Vec::new();
    while offset + WIRE_SIZE <= out.len() {
        if out[offset] == 0 {
            break;
        }
        let frame = BusFrame::read_le(&mut Cursor::new(&out[offset..offset + WIRE_SIZE])).expect("well-formed BusFrame");
        if let Ok(can_frame) = frame.as_can_frame() {
            if let Some((response_id, payload)) = responder(&can_frame) {
                let response_frame = CANFrame::new(can_frame.channel, response_id, &payload).unwrap();
                let bus_frame = BusFrame::can_frame(&response_frame).unwrap();
                let mut cursor = Cursor::new(Vec::new());
                bus_frame.write_le(&mut cursor).unwrap();
                replies.extend_from_slice(&cursor.into_inner());
            }
        }
        offset += WIRE_SIZE;
    }
    replies.push(0);
    if replies.len() < 65 {
        replies.resize(65, 0);
    }
    replies
}

#[test]
fn eds_parse_then_sdo_write_round_trips_through_canopen_stack() {
    const EDS: &str = r#"
[MandatoryObjects]
SupportedObjects=1
1=0x1000

[1000]
ParameterName=Device Type
ObjectType=0x7
DataType=0x7
AccessType=rw
DefaultValue=0

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
HighLimit=1000
"#;
    let od = eds::parse(EDS).unwrap();

    let transport = LoopbackTransport::new(|out: &[u8]| {
        wire_echo(out, |frame| Some((frame.id - 0x80, vec![0x60, frame.data[1], frame.data[2], frame.data[3], 0, 0, 0, 0])))
    });
    let bridge = CandleBridge::new(Box::new(transport), 64, 2);
    let mut stack = CanopenStack::new(bridge);
    stack.add_drive(5, 0, od);

    stack.write(5, 0x2000, 0, Value::Unsigned32(500)).unwrap();
    assert_eq!(stack.od(5).unwrap().read(0x2000, 0).unwrap(), &Value::Unsigned32(500));

    let err = stack.write(5, 0x2000, 0, Value::Unsigned32(5000));
    assert!(err.is_err(), "limit-exceeding write must fail locally before hitting the wire");
}

fn tpdo1_od() -> ObjectDictionary {
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

#[test]
fn pdo_setup_goes_through_the_full_six_step_sdo_sequence() {
    let transport = LoopbackTransport::new(|out: &[u8]| {
        wire_echo(out, |frame| Some((frame.id - 0x80, vec![0x60, frame.data[1], frame.data[2], frame.data[3], 0, 0, 0, 0])))
    });
    let bridge = CandleBridge::new(Box::new(transport), 64, 2);
    let mut stack = CanopenStack::new(bridge);
    stack.add_drive(7, 0, tpdo1_od());

    stack.setup_pdo(7, PdoSelector::Tpdo1, &[(0x6064, 0x00)]).unwrap();
}

#[test]
fn tpdo_dispatch_unpacks_mapped_fields_into_the_od() {
    let mut od = tpdo1_od();
    // As if `setupPDO` had already run: one 32-bit field mapped at 0x6064:00.
    od.write(0x1A00, 0x00, Value::Unsigned8(1)).unwrap();
    od.write(0x1A00, 0x01, Value::Unsigned32((0x6064u32 << 16) | 32)).unwrap();

    let frame = CANFrame::new(0, PdoSelector::Tpdo1.cobid_base() + 7, &100i32.to_le_bytes()).unwrap();
    candle_core::canopen::pdo::dispatch_tpdo(&mut od, PdoSelector::Tpdo1, &frame);

    assert_eq!(od.read(0x6064, 0x00).unwrap(), &Value::Integer32(100));
}

#[test]
fn discovery_scan_is_idempotent() {
    let transport = LoopbackTransport::new(|out: &[u8]| {
        wire_echo(out, |frame| {
            if frame.id == 0x600 + 3 {
                Some((0x580 + 3, vec![0x43, 0x00, 0x10, 0x00, 1, 2, 3, 4]))
            } else {
                None
            }
        })
    });
    let mut bridge = CandleBridge::new(Box::new(transport), 64, 2);

    let first = discovery::ping_canopen(&mut bridge).unwrap();
    let second = discovery::ping_canopen(&mut bridge).unwrap();
    assert_eq!(first, second);
    assert_eq!(first, [3].into_iter().collect());
}
