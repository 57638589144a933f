//! The CANopen stack: one logical client endpoint operating SDO, PDO,
//! SYNC, emergency and NMT against a set of drive handles (spec §4.5).

pub mod nmt;
pub mod pdo;
pub mod sdo;

use std::collections::HashMap;
use std::sync::Mutex;

use crate::bridge::CandleBridge;
use crate::enums::NmtFunction;
use crate::error::{Error, Result};
use crate::frame::{CANFrame, FunctionCode};
use crate::od::{ObjectDictionary, Value};
use pdo::PdoSelector;

/// One drive the stack knows about (spec §3 "Drive handle").
pub struct Drive {
    pub can_id: u8,
    pub channel: u8,
    pub od: ObjectDictionary,
}

/// Per-id lock serialising SDO traffic (spec §4.5: "the stack serialises
/// with a per-id lock"; §5: "callers must not issue two SDOs concurrently
/// to the same id").
pub struct CanopenStack {
    bridge: CandleBridge,
    drives: HashMap<u8, Drive>,
    sdo_locks: HashMap<u8, Mutex<()>>,
}

impl CanopenStack {
    pub fn new(bridge: CandleBridge) -> Self {
        Self {
            bridge,
            drives: HashMap::new(),
            sdo_locks: HashMap::new(),
        }
    }

    /// Registers a drive handle. Lifetime starts once the caller has
    /// confirmed the id is reachable (spec §3: "created on `addDevice(id)`
    /// succeeding").
    pub fn add_drive(&mut self, can_id: u8, channel: u8, od: ObjectDictionary) {
        self.drives.insert(can_id, Drive { can_id, channel, od });
        self.sdo_locks.entry(can_id).or_insert_with(|| Mutex::new(()));
    }

    pub fn remove_drive(&mut self, can_id: u8) {
        self.drives.remove(&can_id);
        self.sdo_locks.remove(&can_id);
    }

    pub fn od(&self, can_id: u8) -> Option<&ObjectDictionary> {
        self.drives.get(&can_id).map(|d| &d.od)
    }

    pub fn read(&mut self, can_id: u8, index: u16, subindex: u8) -> Result<Value> {
        // Borrow `sdo_locks` directly (not through a `&self` helper) so this
        // stays disjoint from the `bridge`/`drives` borrows below (spec §4.5,
        // §5 "the stack serialises with a per-id lock").
        let _guard = self
            .sdo_locks
            .get(&can_id)
            .ok_or(Error::UnknownObject { index, subindex })?
            .lock()
            .map_err(|_| Error::BadResponse("SDO lock poisoned".into()))?;
        let entry = self.drives.get(&can_id).ok_or(Error::UnknownObject { index, subindex })?.od.entry_at(index, subindex)?.clone();
        let value = sdo::read(&mut self.bridge, can_id, index, subindex, &entry)?;
        if let Some(drive) = self.drives.get_mut(&can_id) {
            let _ = drive.od.write(index, subindex, value.clone());
        }
        Ok(value)
    }

    pub fn write(&mut self, can_id: u8, index: u16, subindex: u8, value: Value) -> Result<()> {
        let _guard = self
            .sdo_locks
            .get(&can_id)
            .ok_or(Error::UnknownObject { index, subindex })?
            .lock()
            .map_err(|_| Error::BadResponse("SDO lock poisoned".into()))?;
        let entry = self.drives.get(&can_id).ok_or(Error::UnknownObject { index, subindex })?.od.entry_at(index, subindex)?.clone();
        sdo::write(&mut self.bridge, can_id, index, subindex, &entry, &value)?;
        if let Some(drive) = self.drives.get_mut(&can_id) {
            drive.od.write(index, subindex, value)?;
        }
        Ok(())
    }

    pub fn setup_pdo(&mut self, can_id: u8, selector: PdoSelector, fields: &[(u16, u8)]) -> Result<()> {
        let drive = self.drives.get_mut(&can_id).ok_or(Error::UnknownObject { index: 0, subindex: 0 })?;
        pdo::setup_pdo(&mut self.bridge, &mut drive.od, can_id, selector, fields)
    }

    pub fn send_sync(&mut self) -> Result<()> {
        self.bridge.send_can_frame(&nmt::build_sync()?)
    }

    pub fn send_nmt(&mut self, function: NmtFunction, target_node: u8) -> Result<()> {
        self.bridge.send_can_frame(&nmt::build_nmt(function, target_node)?)
    }

    /// `sendRPDOs()`: flush all known drives' due RPDOs onto the wire.
    pub fn send_rpdos(&mut self) -> Result<()> {
        for drive in self.drives.values() {
            for frame in pdo::build_rpdos(&drive.od, drive.can_id) {
                self.bridge.send_can_frame(&frame)?;
            }
        }
        Ok(())
    }

    /// Drains whatever arrived on the bridge since the last call and
    /// routes it: TPDOs update the owning drive's OD, emergency/guard
    /// frames are logged, anything else is dropped (it belongs to an
    /// in-flight SDO round-trip already being polled by `read`/`write`).
    pub fn poll_incoming(&mut self) {
        while let Some(frame) = self.bridge.receive_can_frame() {
            self.route_incoming(&frame);
        }
    }

    fn route_incoming(&mut self, frame: &CANFrame) {
        match FunctionCode::classify(frame.id) {
            code @ (FunctionCode::Emergency(_) | FunctionCode::Guard(_)) => nmt::report(frame, code),
            FunctionCode::Tpdo1(id) => self.try_dispatch(id, PdoSelector::Tpdo1, frame),
            FunctionCode::Tpdo2(id) => self.try_dispatch(id, PdoSelector::Tpdo2, frame),
            FunctionCode::Tpdo3(id) => self.try_dispatch(id, PdoSelector::Tpdo3, frame),
            FunctionCode::Tpdo4(id) => self.try_dispatch(id, PdoSelector::Tpdo4, frame),
            _ => {}
        }
    }

    fn try_dispatch(&mut self, can_id: u8, selector: PdoSelector, frame: &CANFrame) {
        if let Some(drive) = self.drives.get_mut(&can_id) {
            pdo::dispatch_tpdo(&mut drive.od, selector, frame);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::LoopbackTransport;
    use crate::enums::{AccessType, DataType, ObjectType, PdoMappingKind};
    use crate::od::Entry;
    use std::collections::BTreeMap;

    fn var_entry(data_type: DataType, value: Value) -> Entry {
        Entry {
            parameter_name: "x".into(),
            object_type: ObjectType::Var,
            data_type,
            access_type: AccessType::ReadWrite,
            pdo_mapping: PdoMappingKind::No,
            value,
            low_limit: None,
            high_limit: None,
            sub_entries: BTreeMap::new(),
        }
    }

    #[test]
    fn write_rejects_unknown_drive() {
        let bridge = CandleBridge::new(Box::new(LoopbackTransport::new(|_| vec![])), 50, 2);
        let mut stack = CanopenStack::new(bridge);
        let err = stack.write(5, 0x2000, 0, Value::Unsigned32(1));
        assert!(matches!(err, Err(Error::UnknownObject { .. })));
    }

    #[test]
    fn expedited_write_round_trips_through_loopback() {
        let bridge = CandleBridge::new(
            Box::new(LoopbackTransport::new(|out: &[u8]| {
                // Pretend to be the drive: ack any expedited write with 0x60 + echoed index/subindex.
                crate::bus::can_echo(out, |frame| Some((frame.id - 0x80, vec![0x60, frame.data[1], frame.data[2], frame.data[3], 0, 0, 0, 0])))
            })),
            50,
            2,
        );
        let mut stack = CanopenStack::new(bridge);
        let mut od = ObjectDictionary::new();
        od.insert(0x2000, var_entry(DataType::Unsigned32, Value::Unsigned32(0)));
        stack.add_drive(5, 0, od);

        stack.write(5, 0x2000, 0, Value::Unsigned32(42)).unwrap();
        assert_eq!(stack.od(5).unwrap().read(0x2000, 0).unwrap(), &Value::Unsigned32(42));
    }

    #[test]
    fn setup_pdo_mirrors_mapping_into_the_local_od() {
        let bridge = CandleBridge::new(
            Box::new(LoopbackTransport::new(|out: &[u8]| {
                crate::bus::can_echo(out, |frame| Some((frame.id - 0x80, vec![0x60, frame.data[1], frame.data[2], frame.data[3], 0, 0, 0, 0])))
            })),
            50,
            2,
        );
        let mut stack = CanopenStack::new(bridge);

        let mut od = ObjectDictionary::new();
        od.insert(0x6064, var_entry(DataType::Integer32, Value::Integer32(0)));
        let mut tpdo1_comm = var_entry(DataType::Unsigned32, Value::Unsigned32(0));
        tpdo1_comm.sub_entries.insert(0x01, var_entry(DataType::Unsigned32, Value::Unsigned32(0)));
        tpdo1_comm.sub_entries.insert(0x02, var_entry(DataType::Unsigned8, Value::Unsigned8(0)));
        od.insert(0x1800, tpdo1_comm);
        let mut tpdo1_map = var_entry(DataType::Unsigned8, Value::Unsigned8(0));
        tpdo1_map.sub_entries.insert(0x00, var_entry(DataType::Unsigned8, Value::Unsigned8(0)));
        tpdo1_map.sub_entries.insert(0x01, var_entry(DataType::Unsigned32, Value::Unsigned32(0)));
        od.insert(0x1A00, tpdo1_map);
        stack.add_drive(7, 0, od);

        stack.setup_pdo(7, PdoSelector::Tpdo1, &[(0x6064, 0x00)]).unwrap();

        let od = stack.od(7).unwrap();
        assert_eq!(od.read(0x1A00, 0x00).unwrap(), &Value::Unsigned8(1));
        assert_eq!(od.read(0x1A00, 0x01).unwrap(), &Value::Unsigned32((0x6064u32 << 16) | (0x00u32 << 8) | 32));
    }
}
