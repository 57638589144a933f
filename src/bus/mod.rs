//! Bus transport: the blocking USB-bulk layer, plus the bounded FIFO and
//! pump thread that turns it into a frame-oriented interface (spec §4.1,
//! §4.2).

pub(crate) mod busframe;
mod usb;

pub use busframe::{BridgeFifo, BusFrame, BusFrameKind, StatusFrame};
pub use usb::UsbTransport;

use crate::error::{Error, Result};

/// VID:PID of the CANdle application firmware.
pub const APP_VID: u16 = 0x0069;
pub const APP_PID: u16 = 0x1000;
/// VID:PID the device re-enumerates as once it drops into its bootloader.
pub const BOOTLOADER_VID: u16 = 0x0069;
pub const BOOTLOADER_PID: u16 = 0x2000;

pub const EP_OUT: u8 = 0x01;
pub const EP_IN: u8 = 0x81;

/// Minimum and maximum bulk transfer sizes (spec §6).
pub const MIN_TRANSFER: usize = 65;
pub const MAX_TRANSFER: usize = 2049;

/// Abstracts a blocking byte-oriented transport: USB bulk today, SPI could
/// implement the same trait later (spec §4.1, §9 "dynamic dispatch over bus
/// type" — a fixed trait, not open-ended polymorphism).
pub trait Transport: Send {
    /// Opens the device, detaching kernel drivers and claiming the
    /// interface as needed. Idempotent: calling `connect` again after
    /// `disconnect` must succeed.
    fn connect(&mut self) -> Result<()>;

    /// Releases the interface and closes the device.
    fn disconnect(&mut self) -> Result<()>;

    /// Sends `out`, then (if `expected_in_size > 0`) reads up to that many
    /// bytes within `timeout_ms`, returning whatever was actually read.
    fn transfer(&mut self, out: &[u8], timeout_ms: u64, expected_in_size: usize) -> Result<Vec<u8>>;

    fn is_connected(&self) -> bool;
}

/// An in-process loopback transport used by tests: whatever bytes are
/// written with `transfer` are handed verbatim to a simulated device
/// closure, whose reply bytes are returned as the inbound half.
pub struct LoopbackTransport {
    connected: bool,
    responder: Box<dyn FnMut(&[u8]) -> Vec<u8> + Send>,
}

impl LoopbackTransport {
    pub fn new(responder: impl FnMut(&[u8]) -> Vec<u8> + Send + 'static) -> Self {
        Self {
            connected: false,
            responder: Box::new(responder),
        }
    }
}

impl Transport for LoopbackTransport {
    fn connect(&mut self) -> Result<()> {
        self.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        self.connected = false;
        Ok(())
    }

    fn transfer(&mut self, out: &[u8], _timeout_ms: u64, expected_in_size: usize) -> Result<Vec<u8>> {
        if !self.connected {
            return Err(Error::DeviceNotConnected);
        }
        if out.is_empty() {
            return Err(Error::DataEmpty);
        }
        let mut reply = (self.responder)(out);
        if expected_in_size > 0 && reply.len() > expected_in_size {
            reply.truncate(expected_in_size);
        }
        Ok(reply)
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

/// Test helper: decodes the packed wire buffer a `BridgeFifo` pump hands a
/// `Transport`, runs each CAN frame found in it through `responder`, and
/// packs whatever replies it returns back into a wire buffer — so a
/// `LoopbackTransport` can simulate a drive at the CAN-frame level instead
/// of needing every test to hand-roll `BusFrame` framing.
#[cfg(test)]
pub(crate) fn can_echo(out: &[u8], responder: impl Fn(&crate::frame::CANFrame) -> Option<(u16, Vec<u8>)>) -> Vec<u8> {
    let mut replies = Vec::new();
    for frame in busframe::unpack(out) {
        let Ok(can_frame) = frame.as_can_frame() else { continue };
        if let Some((response_id, payload)) = responder(&can_frame) {
            if let Ok(response_frame) = crate::frame::CANFrame::new(can_frame.channel, response_id, &payload) {
                if let Ok(bus_frame) = BusFrame::can_frame(&response_frame) {
                    replies.push(bus_frame);
                }
            }
        }
    }
    busframe::pack(&replies).unwrap_or_default()
}
