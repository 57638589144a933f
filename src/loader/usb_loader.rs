//! CANdle-over-USB firmware loader (spec §4.7 "CANdle bootloader
//! protocol"). This talks directly to the bootloader's bulk endpoints,
//! bypassing the `BridgeFifo`/`CandleBridge` pair entirely — the bootloader
//! doesn't speak the framed BusFrame protocol the application firmware
//! does.

use std::time::{Duration, Instant};

use crc_any::CRCu32;

use crate::bus::{Transport, UsbTransport, MAX_TRANSFER};
use crate::error::{Error, LoaderErrorKind, Result};
use crate::loader::mabfile::MabFile;

const CHECK_ENTERED: u8 = 100;
const SEND_PAGE: u8 = 101;
const WRITE_PAGE: u8 = 102;
const BOOT_TO_APP: u8 = 103;

const PAGE_SIZE: usize = 2048;
const PAGE_CHUNK: usize = 1024;

const CHECK_TIMEOUT_MS: u64 = 500;
const PAGE_TIMEOUT_MS: u64 = 500;
const BOOT_TIMEOUT_MS: u64 = 2000;

/// How long the bootloader VID/PID is given to reappear after the
/// application resets into it, and the backoff between polls (spec §4.7:
/// "host polls the bootloader VID/PID for up to ~2s with 20ms backoff").
const ENUMERATE_TIMEOUT_MS: u64 = 2000;
const ENUMERATE_BACKOFF_MS: u64 = 20;

pub struct UsbLoader {
    transport: Box<dyn Transport>,
}

impl UsbLoader {
    pub fn new() -> Self {
        Self {
            transport: Box::new(UsbTransport::bootloader()),
        }
    }

    #[cfg(test)]
    fn with_transport(transport: Box<dyn Transport>) -> Self {
        Self { transport }
    }

    fn command(&mut self, id: u8, data: &[u8], timeout_ms: u64) -> Result<Vec<u8>> {
        let mut frame = Vec::with_capacity(3 + data.len());
        frame.push(id);
        frame.push(0xAA);
        frame.push(0xAA);
        frame.extend_from_slice(data);
        self.transport.transfer(&frame, timeout_ms, MAX_TRANSFER)
    }

    fn expect_ok(&self, id: u8, reply: &[u8]) -> Result<()> {
        if reply.len() >= 3 && reply[0] == id && reply[1] == b'O' && reply[2] == b'K' {
            Ok(())
        } else {
            Err(Error::BadResponse(format!("bootloader command {id} did not ack")))
        }
    }

    /// Polls for the bootloader to connect, retrying at
    /// [`ENUMERATE_BACKOFF_MS`] intervals for up to
    /// [`ENUMERATE_TIMEOUT_MS`] (spec §4.7: the device re-enumerates on the
    /// bootloader VID/PID some milliseconds after the application resets
    /// into it).
    fn wait_for_bootloader(&mut self) -> Result<()> {
        let deadline = Instant::now() + Duration::from_millis(ENUMERATE_TIMEOUT_MS);
        loop {
            match self.transport.connect() {
                Ok(()) => return Ok(()),
                Err(_) if Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(ENUMERATE_BACKOFF_MS));
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Flashes `mab` onto the CANdle bootloader: confirms the bootloader is
    /// live, then pushes each page as two 1024-byte chunks (`SEND_PAGE` ×2
    /// followed by one `WRITE_PAGE`), finally telling it to boot.
    pub fn flash(&mut self, mab: &MabFile) -> Result<()> {
        self.wait_for_bootloader().map_err(|_| Error::LoaderError(LoaderErrorKind::Init))?;

        let reply = self.command(CHECK_ENTERED, &[], CHECK_TIMEOUT_MS).map_err(|_| Error::LoaderError(LoaderErrorKind::Init))?;
        self.expect_ok(CHECK_ENTERED, &reply).map_err(|_| Error::LoaderError(LoaderErrorKind::Init))?;

        for (page_index, page) in mab.pages(PAGE_SIZE).enumerate() {
            self.write_page(page_index as u32, page)?;
        }

        let reply = self.command(BOOT_TO_APP, &[], BOOT_TIMEOUT_MS).map_err(|_| Error::LoaderError(LoaderErrorKind::Boot))?;
        self.expect_ok(BOOT_TO_APP, &reply).map_err(|_| Error::LoaderError(LoaderErrorKind::Boot))?;

        self.transport.disconnect()
    }

    /// `page_index` is accepted for symmetry with [`CanLoader`] and future
    /// multi-page retry support; the wire protocol here has no room for it
    /// (`WRITE_PAGE` carries only the page CRC32, spec §4.7).
    fn write_page(&mut self, _page_index: u32, page: &[u8]) -> Result<()> {
        let mut padded = page.to_vec();
        padded.resize(PAGE_SIZE, 0xFF);

        for chunk in padded.chunks(PAGE_CHUNK) {
            let reply = self.command(SEND_PAGE, chunk, PAGE_TIMEOUT_MS).map_err(|_| Error::LoaderError(LoaderErrorKind::Firmware))?;
            self.expect_ok(SEND_PAGE, &reply).map_err(|_| Error::LoaderError(LoaderErrorKind::Firmware))?;
        }

        let mut crc = CRCu32::crc32();
        crc.digest(&padded);
        let reply = self
            .command(WRITE_PAGE, &crc.get_crc().to_le_bytes(), PAGE_TIMEOUT_MS)
            .map_err(|_| Error::LoaderError(LoaderErrorKind::Firmware))?;
        self.expect_ok(WRITE_PAGE, &reply).map_err(|_| Error::LoaderError(LoaderErrorKind::Firmware))
    }
}

impl Default for UsbLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::LoopbackTransport;

    fn ok(id: u8) -> Vec<u8> {
        vec![id, b'O', b'K']
    }

    #[test]
    fn flash_walks_check_send_write_boot() {
        let transport = LoopbackTransport::new(|out: &[u8]| ok(out[0]));
        let mut loader = UsbLoader::with_transport(Box::new(transport));

        let binary = vec![0x22u8; 32];
        let mab_text = format!(
            "[firmware]\ntag=CANdle\nsize=32\nstart=0x08001000\nversion=1.0.0\nchecksum={}\niv={}\nbinary={}\n",
            hex::encode(<sha2::Sha256 as sha2::Digest>::digest(&binary)),
            hex::encode([0u8; 16]),
            hex::encode(&binary),
        );
        let mab = MabFile::parse(&mab_text).unwrap();

        loader.flash(&mab).unwrap();
    }

    #[test]
    fn flash_surfaces_init_error_when_bootloader_silent() {
        let transport = LoopbackTransport::new(|_out: &[u8]| vec![]);
        let mut loader = UsbLoader::with_transport(Box::new(transport));
        let mab_text = format!(
            "[firmware]\ntag=CANdle\nsize=1\nstart=0x08001000\nversion=1.0.0\nchecksum={}\niv={}\nbinary={}\n",
            hex::encode(<sha2::Sha256 as sha2::Digest>::digest([0x00u8])),
            hex::encode([0u8; 16]),
            hex::encode([0x00u8]),
        );
        let mab = MabFile::parse(&mab_text).unwrap();
        let err = loader.flash(&mab);
        assert!(matches!(err, Err(Error::LoaderError(LoaderErrorKind::Init))));
    }
}
