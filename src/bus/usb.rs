//! Blocking USB bulk transport against the CANdle's fixed VID:PID and
//! endpoints (spec §4.1, §6).

use std::time::Duration;

use rusb::{DeviceHandle, GlobalContext};

use super::{Transport, EP_IN, EP_OUT};
use crate::error::{Error, Result};

pub struct UsbTransport {
    vid: u16,
    pid: u16,
    interface: u8,
    handle: Option<DeviceHandle<GlobalContext>>,
    detached_kernel_driver: bool,
}

impl UsbTransport {
    pub fn new(vid: u16, pid: u16) -> Self {
        Self {
            vid,
            pid,
            interface: 0,
            handle: None,
            detached_kernel_driver: false,
        }
    }

    pub fn application() -> Self {
        Self::new(super::APP_VID, super::APP_PID)
    }

    pub fn bootloader() -> Self {
        Self::new(super::BOOTLOADER_VID, super::BOOTLOADER_PID)
    }
}

impl Transport for UsbTransport {
    fn connect(&mut self) -> Result<()> {
        if self.handle.is_some() {
            return Ok(());
        }
        let mut handle = rusb::open_device_with_vid_pid(self.vid, self.pid)
            .ok_or(Error::DeviceNotConnected)?;

        if rusb::supports_detach_kernel_driver() {
            match handle.kernel_driver_active(self.interface) {
                Ok(true) => {
                    handle
                        .detach_kernel_driver(self.interface)
                        .map_err(|e| Error::InitializationError(e.to_string()))?;
                    self.detached_kernel_driver = true;
                }
                _ => self.detached_kernel_driver = false,
            }
        }

        handle
            .set_active_configuration(1)
            .map_err(|e| Error::InitializationError(e.to_string()))?;
        handle
            .claim_interface(self.interface)
            .map_err(|e| Error::InitializationError(e.to_string()))?;

        log::info!("connected to USB device {:04x}:{:04x}", self.vid, self.pid);
        self.handle = Some(handle);
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        if let Some(mut handle) = self.handle.take() {
            let _ = handle.release_interface(self.interface);
            if self.detached_kernel_driver {
                let _ = handle.attach_kernel_driver(self.interface);
            }
        }
        Ok(())
    }

    fn transfer(&mut self, out: &[u8], timeout_ms: u64, expected_in_size: usize) -> Result<Vec<u8>> {
        if out.is_empty() {
            return Err(Error::DataEmpty);
        }
        let handle = self.handle.as_ref().ok_or(Error::DeviceNotConnected)?;
        let timeout = Duration::from_millis(timeout_ms);

        handle
            .write_bulk(EP_OUT, out, timeout)
            .map_err(|e| Error::TransmitterError(e.to_string()))?;

        if expected_in_size == 0 {
            return Ok(Vec::new());
        }

        let mut buf = vec![0u8; expected_in_size];
        let read = handle
            .read_bulk(EP_IN, &mut buf, timeout)
            .map_err(|e| Error::ReceiverError(e.to_string()))?;
        buf.truncate(read);
        Ok(buf)
    }

    fn is_connected(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for UsbTransport {
    fn drop(&mut self) {
        let _ = self.disconnect();
    }
}
