//! The CANdle bridge client: the protocol-agnostic surface the CANopen
//! stack and the MD register layer both call into (spec §4.3).

use std::time::{Duration, Instant};

use crate::bus::{BridgeFifo, BusFrame, BusFrameKind, StatusFrame, Transport};
use crate::error::{Error, Result};
use crate::frame::CANFrame;

const CONFIG_ACK_TIMEOUT_MS: u64 = 50;
const OCCUPANCY_WARN_PCT: u8 = 50;
const OCCUPANCY_ERROR_PCT: u8 = 99;

/// Last observed FIFO occupancy and bus error state, consumed by the
/// watchdog in [`CandleBridge::poll_statistics`].
#[derive(Clone, Copy, Debug, Default)]
pub struct Statistics {
    pub rx_peak_occupancy_pct: u8,
    pub tx_peak_occupancy_pct: u8,
    pub bus_error: bool,
}

pub struct CandleBridge {
    fifo: BridgeFifo,
    stats: Statistics,
    warned: bool,
    errored: bool,
}

impl CandleBridge {
    pub fn new(transport: Box<dyn Transport>, fifo_capacity: usize, poll_timeout_ms: u64) -> Self {
        let mut fifo = BridgeFifo::new(fifo_capacity.max(50));
        fifo.spawn_pump(transport, poll_timeout_ms);
        Self {
            fifo,
            stats: Statistics::default(),
            warned: false,
            errored: false,
        }
    }

    /// Sends one config `BusFrame` (id=0x04) and waits up to
    /// [`CONFIG_ACK_TIMEOUT_MS`] for any reply before declaring success.
    pub fn configure_bus(&mut self, baudrate: u32, fd_format: u32, bit_rate_switch: u32) -> Result<()> {
        use binrw::BinWrite;
        let mut cursor = std::io::Cursor::new(Vec::new());
        crate::bus::busframe::Settings {
            baudrate,
            fd_format,
            bit_rate_switch,
        }
        .write_le(&mut cursor)
        .map_err(|e| Error::ParseError(e.to_string()))?;
        let frame = BusFrame::new(crate::bus::busframe::FRAME_ID_CONFIG, &cursor.into_inner())?;
        self.fifo.enqueue_tx(frame)?;

        let deadline = Instant::now() + Duration::from_millis(CONFIG_ACK_TIMEOUT_MS);
        while Instant::now() < deadline {
            if let Some(reply) = self.fifo.dequeue_rx() {
                self.route(reply);
                return Ok(());
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        Err(Error::BusConfigError(CONFIG_ACK_TIMEOUT_MS))
    }

    pub fn send_can_frame(&self, frame: &CANFrame) -> Result<()> {
        self.fifo.enqueue_tx(BusFrame::can_frame(frame)?)
    }

    /// Non-blocking dequeue. Status frames are routed to the statistics
    /// sink instead of being handed back as CAN traffic.
    pub fn receive_can_frame(&mut self) -> Option<CANFrame> {
        while let Some(frame) = self.fifo.dequeue_rx() {
            if frame.id == crate::bus::busframe::FRAME_ID_CAN {
                if let Ok(can_frame) = frame.as_can_frame() {
                    return Some(can_frame);
                }
            } else {
                self.route(frame);
            }
        }
        None
    }

    /// Synchronous round-trip used by the MD register protocol and the
    /// loaders: enqueue one CAN frame, poll rx until one arrives matching
    /// `response_id`, or time out.
    pub fn transfer_can_frame(
        &mut self,
        out_id: u16,
        out_payload: &[u8],
        response_id: u16,
        timeout_ms: u64,
    ) -> Result<Vec<u8>> {
        let out = CANFrame::new(0, out_id, out_payload)?;
        self.send_can_frame(&out)?;

        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        while Instant::now() < deadline {
            if let Some(frame) = self.receive_can_frame() {
                if frame.id == response_id {
                    return Ok(frame.payload().to_vec());
                }
            } else {
                std::thread::sleep(Duration::from_millis(1));
            }
        }
        Err(Error::ResponseTimeout(timeout_ms))
    }

    pub fn reset_bridge(&self) -> Result<()> {
        self.fifo.enqueue_tx(BusFrame::new(crate::bus::busframe::FRAME_ID_BRIDGE_RESET, &[])?)
    }

    pub fn statistics(&self) -> Statistics {
        self.stats
    }

    fn route(&mut self, frame: BusFrame) {
        if let Ok(BusFrameKind::Status(status)) = frame.classify() {
            self.update_statistics(status);
        }
    }

    fn update_statistics(&mut self, status: StatusFrame) {
        self.stats.rx_peak_occupancy_pct = status.rx_peak_occupancy_pct;
        self.stats.tx_peak_occupancy_pct = status.tx_peak_occupancy_pct;
        self.stats.bus_error = status.bus_state != 0;
        self.watchdog_log();
    }

    /// Logs once per threshold crossing rather than on every status frame
    /// (SPEC_FULL §C.1).
    fn watchdog_log(&mut self) {
        let peak = self.stats.rx_peak_occupancy_pct.max(self.stats.tx_peak_occupancy_pct);
        if peak >= OCCUPANCY_ERROR_PCT {
            if !self.errored {
                log::error!("bridge FIFO occupancy at {peak}%, data loss imminent");
                self.errored = true;
            }
        } else {
            self.errored = false;
            if peak >= OCCUPANCY_WARN_PCT {
                if !self.warned {
                    log::warn!("bridge FIFO occupancy at {peak}%");
                    self.warned = true;
                }
            } else {
                self.warned = false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::LoopbackTransport;

    fn echo_bridge() -> CandleBridge {
        let transport = LoopbackTransport::new(|_out| Vec::new());
        CandleBridge::new(Box::new(transport), 50, 5)
    }

    #[test]
    fn watchdog_logs_once_per_threshold_crossing() {
        let mut bridge = echo_bridge();
        bridge.update_statistics(StatusFrame {
            rx_avg_occupancy_pct: 10,
            rx_peak_occupancy_pct: 60,
            tx_avg_occupancy_pct: 10,
            tx_peak_occupancy_pct: 10,
            bus_state: 0,
        });
        assert!(bridge.warned);
        assert!(!bridge.errored);
    }
}
