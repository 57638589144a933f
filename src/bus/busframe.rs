//! `BusFrame` wire struct, the frame-kind payloads it carries, and the
//! bounded FIFO + pump loop that packs/unpacks them over a [`Transport`]
//! (spec §3, §4.2).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use binrw::{binrw, BinRead, BinWrite};
use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};

use super::{Transport, MAX_TRANSFER, MIN_TRANSFER};
use crate::error::{Error, Result};
use crate::frame::CANFrame;

pub const FRAME_ID_CAN: u8 = 0x01;
pub const FRAME_ID_STATUS: u8 = 0x02;
pub const FRAME_ID_CONFIG: u8 = 0x04;
pub const FRAME_ID_BRIDGE_RESET: u8 = 0x0A;
pub const FRAME_ID_BOOTLOADER_FIRST: u8 = 100;
pub const FRAME_ID_BOOTLOADER_LAST: u8 = 103;

/// 108 bytes on the wire: 8-byte header + fixed 100-byte payload slot. Only
/// `payload_size` bytes of the slot are meaningful; the rest is padding
/// (spec §9: "other header bytes are reserved" — same applies to the
/// trailing payload bytes beyond `payload_size`).
#[binrw]
#[brw(little)]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BusFrame {
    pub id: u8,
    pub payload_size: u8,
    pub reserved: [u8; 6],
    pub payload: [u8; 100],
}

pub const WIRE_SIZE: usize = 108;

impl BusFrame {
    pub fn new(id: u8, data: &[u8]) -> Result<Self> {
        if data.len() > 100 {
            return Err(Error::DataTooLong(data.len()));
        }
        let mut payload = [0u8; 100];
        payload[..data.len()].copy_from_slice(data);
        Ok(Self {
            id,
            payload_size: data.len() as u8,
            reserved: [0; 6],
            payload,
        })
    }

    pub fn data(&self) -> &[u8] {
        &self.payload[..self.payload_size as usize]
    }

    /// `channel` rides in `reserved[0]`: the only one of the six reserved
    /// header bytes this crate gives meaning to, since spec §9 notes the
    /// source's own use of the reserved bytes isn't authoritative and the
    /// `id`/`payloadSize` positions are the only guaranteed ones. A CANdle
    /// with a single physical bus always sees channel 0 here.
    pub fn can_frame(frame: &CANFrame) -> Result<Self> {
        let mut buf = Vec::with_capacity(3 + frame.dlc as usize);
        buf.extend_from_slice(&frame.id.to_le_bytes());
        buf.push(frame.dlc);
        buf.extend_from_slice(frame.payload());
        let mut bus_frame = Self::new(FRAME_ID_CAN, &buf)?;
        bus_frame.reserved[0] = frame.channel;
        Ok(bus_frame)
    }

    pub fn as_can_frame(&self) -> Result<CANFrame> {
        if self.id != FRAME_ID_CAN {
            return Err(Error::BadResponse(format!("not a CAN BusFrame (id={:#x})", self.id)));
        }
        let data = self.data();
        if data.len() < 3 {
            return Err(Error::BadResponse("CAN BusFrame payload too short".into()));
        }
        let can_id = u16::from_le_bytes([data[0], data[1]]);
        let len = data[2] as usize;
        let channel = self.reserved[0];
        CANFrame::new(channel, can_id, &data[3..3 + len.min(data.len() - 3)])
    }

    fn write_to(&self, out: &mut Vec<u8>) -> Result<()> {
        let mut cursor = std::io::Cursor::new(Vec::new());
        self.write_le(&mut cursor).map_err(|e| Error::ParseError(e.to_string()))?;
        out.extend_from_slice(&cursor.into_inner());
        Ok(())
    }

    fn read_from(bytes: &[u8]) -> Result<Self> {
        BusFrame::read_le(&mut std::io::Cursor::new(bytes)).map_err(|e| Error::ParseError(e.to_string()))
    }
}

/// CAN bus configuration payload (`BusFrame` id=0x04).
#[binrw]
#[brw(little)]
#[derive(Clone, Copy, Debug)]
pub struct Settings {
    pub baudrate: u32,
    pub fd_format: u32,
    pub bit_rate_switch: u32,
}

/// Bridge status report (`BusFrame` id=0x02).
#[binrw]
#[brw(little)]
#[derive(Clone, Copy, Debug)]
pub struct StatusFrame {
    pub rx_avg_occupancy_pct: u8,
    pub rx_peak_occupancy_pct: u8,
    pub tx_avg_occupancy_pct: u8,
    pub tx_peak_occupancy_pct: u8,
    pub bus_state: u8,
}

#[derive(Clone, Debug)]
pub enum BusFrameKind {
    Can,
    Status(StatusFrame),
    Config(Settings),
    BridgeReset,
    Bootloader { command: u8, data: Vec<u8> },
}

impl BusFrame {
    pub fn classify(&self) -> Result<BusFrameKind> {
        match self.id {
            FRAME_ID_CAN => Ok(BusFrameKind::Can),
            FRAME_ID_STATUS => {
                let status = StatusFrame::read_le(&mut std::io::Cursor::new(self.data()))
                    .map_err(|e| Error::ParseError(e.to_string()))?;
                Ok(BusFrameKind::Status(status))
            }
            FRAME_ID_CONFIG => {
                let settings = Settings::read_le(&mut std::io::Cursor::new(self.data()))
                    .map_err(|e| Error::ParseError(e.to_string()))?;
                Ok(BusFrameKind::Config(settings))
            }
            FRAME_ID_BRIDGE_RESET => Ok(BusFrameKind::BridgeReset),
            FRAME_ID_BOOTLOADER_FIRST..=FRAME_ID_BOOTLOADER_LAST => {
                let data = self.data();
                if data.len() < 2 || data[0] != 0xAA || data[1] != 0xAA {
                    return Err(Error::BadResponse("bad bootloader BusFrame framing".into()));
                }
                Ok(BusFrameKind::Bootloader {
                    command: self.id,
                    data: data[2..].to_vec(),
                })
            }
            other => Err(Error::BadResponse(format!("unknown BusFrame id {other:#x}"))),
        }
    }
}

/// Packs `frames` into one bulk-OUT buffer (spec §4.2 step 1).
pub(crate) fn pack(frames: &[BusFrame]) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    for frame in frames {
        if buf.len() + WIRE_SIZE > MAX_TRANSFER - 1 {
            break;
        }
        frame.write_to(&mut buf)?;
    }
    buf.push(0); // zero id byte terminates the stream
    if buf.len() < MIN_TRANSFER {
        buf.resize(MIN_TRANSFER, 0);
    }
    if buf.len() % 64 == 0 {
        buf.push(0);
    }
    Ok(buf)
}

/// Unpacks a bulk-IN buffer back into `BusFrame`s (spec §4.2 step 3).
pub(crate) fn unpack(bytes: &[u8]) -> Vec<BusFrame> {
    let mut frames = Vec::new();
    let mut offset = 0;
    while offset + WIRE_SIZE <= bytes.len() {
        if bytes[offset] == 0 {
            break;
        }
        match BusFrame::read_from(&bytes[offset..offset + WIRE_SIZE]) {
            Ok(frame) => frames.push(frame),
            Err(e) => {
                log::warn!("dropping malformed BusFrame: {e}");
                break;
            }
        }
        offset += WIRE_SIZE;
    }
    frames
}

/// Bounded bidirectional FIFO between the application threads and the
/// background pump (spec §4.2, §5 "shared resources").
pub struct BridgeFifo {
    tx_send: Sender<BusFrame>,
    tx_recv: Receiver<BusFrame>,
    rx_send: Sender<BusFrame>,
    rx_recv: Receiver<BusFrame>,
    shutdown: Arc<AtomicBool>,
    pump: Option<std::thread::JoinHandle<()>>,
}

pub const FIFO_CAPACITY: usize = 64;

impl BridgeFifo {
    pub fn new(capacity: usize) -> Self {
        let (tx_send, tx_recv) = bounded(capacity);
        let (rx_send, rx_recv) = bounded(capacity);
        Self {
            tx_send,
            tx_recv,
            rx_send,
            rx_recv,
            shutdown: Arc::new(AtomicBool::new(false)),
            pump: None,
        }
    }

    pub fn enqueue_tx(&self, frame: BusFrame) -> Result<()> {
        self.tx_send.try_send(frame).map_err(|_| Error::FifoFull)
    }

    pub fn dequeue_rx(&self) -> Option<BusFrame> {
        self.rx_recv.try_recv().ok()
    }

    pub fn tx_occupancy_pct(&self) -> u8 {
        ((self.tx_send.len() * 100) / self.tx_send.capacity().unwrap_or(1).max(1)) as u8
    }

    pub fn rx_occupancy_pct(&self) -> u8 {
        ((self.rx_send.len() * 100) / self.rx_send.capacity().unwrap_or(1).max(1)) as u8
    }

    /// Starts the pump thread, which owns `transport` for its lifetime.
    pub fn spawn_pump(&mut self, mut transport: Box<dyn Transport>, poll_timeout_ms: u64) {
        let tx_recv = self.tx_recv.clone();
        let rx_send = self.rx_send.clone();
        let shutdown = self.shutdown.clone();

        let handle = std::thread::spawn(move || {
            if let Err(e) = transport.connect() {
                log::error!("pump thread failed to connect transport: {e}");
                return;
            }
            while !shutdown.load(Ordering::Relaxed) {
                let mut frames = Vec::new();
                loop {
                    match tx_recv.try_recv() {
                        Ok(frame) => frames.push(frame),
                        Err(TryRecvError::Empty) => break,
                        Err(TryRecvError::Disconnected) => {
                            shutdown.store(true, Ordering::Relaxed);
                            break;
                        }
                    }
                    if frames.len() >= FIFO_CAPACITY {
                        break;
                    }
                }

                let out = match pack(&frames) {
                    Ok(buf) => buf,
                    Err(e) => {
                        log::error!("failed to pack outbound BusFrames: {e}");
                        continue;
                    }
                };

                match transport.transfer(&out, poll_timeout_ms, MAX_TRANSFER) {
                    Ok(inbound) => {
                        for frame in unpack(&inbound) {
                            if rx_send.try_send(frame).is_err() {
                                log::warn!("rx FIFO full, dropping inbound BusFrame");
                            }
                        }
                    }
                    Err(e) => log::warn!("bulk transfer failed: {e}"),
                }

                if frames.is_empty() {
                    std::thread::sleep(Duration::from_millis(1));
                }
            }
        });
        self.pump = Some(handle);
    }

    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.pump.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for BridgeFifo {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bus_frame_round_trips() {
        let frame = BusFrame::new(FRAME_ID_CAN, &[1, 2, 3, 4]).unwrap();
        let mut buf = Vec::new();
        frame.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), WIRE_SIZE);
        let back = BusFrame::read_from(&buf).unwrap();
        assert_eq!(frame, back);
    }

    #[test]
    fn pack_pads_to_minimum_and_bumps_multiple_of_64() {
        let buf = pack(&[]).unwrap();
        assert!(buf.len() >= MIN_TRANSFER);
        assert_ne!(buf.len() % 64, 0);
    }

    #[test]
    fn pack_unpack_recovers_frames() {
        let frames = vec![
            BusFrame::new(FRAME_ID_CAN, &[9, 9]).unwrap(),
            BusFrame::new(FRAME_ID_STATUS, &[1, 2, 3, 4, 5]).unwrap(),
        ];
        let buf = pack(&frames).unwrap();
        let parsed = unpack(&buf);
        assert_eq!(parsed, frames);
    }

    #[test]
    fn fifo_enqueue_reports_full_at_capacity() {
        let fifo = BridgeFifo::new(1);
        fifo.enqueue_tx(BusFrame::new(FRAME_ID_CAN, &[]).unwrap()).unwrap();
        let err = fifo.enqueue_tx(BusFrame::new(FRAME_ID_CAN, &[]).unwrap());
        assert!(matches!(err, Err(Error::FifoFull)));
    }
}
