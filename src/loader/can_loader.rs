//! MD-over-CAN firmware loader (spec §4.7 "MD bootloader protocol").
//!
//! The MD bootloader speaks a tiny command set on the drive's own CAN id,
//! independent of both SDO and the MD register protocol: a page-oriented
//! programming loop gated by a CRC32 check per page.

use crc_any::CRCu32;

use crate::bridge::CandleBridge;
use crate::error::{Error, LoaderErrorKind, Result};
use crate::loader::mabfile::MabFile;

const PAGE_SIZE: usize = 2048;
const SAFE_MODE_CHUNK: usize = 8;
const UNSAFE_MODE_CHUNK: usize = 64;
/// Firmwares under this size are small enough that a full page write can be
/// attempted in one larger-chunk pass without tripping the drive's input
/// buffer; above it we fall back to the conservative 8-byte chunking.
const UNSAFE_MODE_THRESHOLD: usize = 20 * 1024;

const HOST_INIT: u8 = 0xA0;
const HOST_INIT_SECONDARY: u8 = 0xA9;
const PROG: u8 = 0xA1;
const BOOT: u8 = 0xA2;
const CHECK_CRC: u8 = 0xA3;

const HOST_INIT_OK: u8 = 0xB0;
const PROG_OK: u8 = 0xB1;
const BOOT_OK: u8 = 0xB2;
const CRC_OK: u8 = 0xB3;
const CHUNK_OK: u8 = 0xB4;

/// Recovery ids the drive answers on when it's stuck before its normal
/// application id is assigned (spec §4.7 "recovery backdoor").
pub const RECOVERY_ID_PRIMARY: u8 = 0x002;
pub const RECOVERY_ID_SECONDARY: u8 = 0x003;

const INIT_TIMEOUT_MS: u64 = 100;
const INIT_RETRIES: u32 = 10;
const CHUNK_TIMEOUT_MS: u64 = 100;
const CRC_TIMEOUT_MS: u64 = 100;
const WRITE_TIMEOUT_MS: u64 = 3000;
const BOOT_TIMEOUT_MS: u64 = 100;

/// Whether the loader talks to the drive's normal CAN id pair
/// (`0x680+id`/`0x780+id`) or the fixed backdoor pair used when the drive
/// is stuck before its application id is assigned (spec §4.7 "recovery
/// mode").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Target {
    Normal(u8),
    Recovery,
}

pub struct CanLoader {
    target: Target,
}

impl CanLoader {
    pub fn new(drive_id: u8) -> Self {
        Self { target: Target::Normal(drive_id) }
    }

    /// Recovery-mode loader: addresses the fixed backdoor id pair and
    /// skips the pre-reset step (spec §4.7).
    pub fn recovery() -> Self {
        Self { target: Target::Recovery }
    }

    fn request_cobid(&self) -> u16 {
        match self.target {
            Target::Normal(id) => 0x680 + id as u16,
            Target::Recovery => RECOVERY_ID_PRIMARY as u16,
        }
    }

    fn response_cobid(&self) -> u16 {
        match self.target {
            Target::Normal(id) => 0x780 + id as u16,
            Target::Recovery => RECOVERY_ID_SECONDARY as u16,
        }
    }

    fn command(&self, bridge: &mut CandleBridge, command: u8, boot_address: u32, extra: &[u8], timeout_ms: u64) -> Result<Vec<u8>> {
        let mut payload = Vec::with_capacity(5 + extra.len());
        payload.push(command);
        payload.extend_from_slice(&boot_address.to_le_bytes());
        payload.extend_from_slice(extra);
        bridge.transfer_can_frame(self.request_cobid(), &payload, self.response_cobid(), timeout_ms)
    }

    /// Flashes `mab` onto the drive, chunk size chosen by firmware size
    /// (spec §4.7 "safe/unsafe mode split at 20KiB"). In unsafe mode the
    /// device is told to write each page as soon as its CRC checks out; in
    /// safe mode the write is requested once, after every page's CRC has
    /// been confirmed.
    pub fn flash(&self, bridge: &mut CandleBridge, mab: &MabFile) -> Result<()> {
        mab.verify_checksum()?;
        self.host_init(bridge, mab.start)?;

        let unsafe_mode = mab.size as usize > UNSAFE_MODE_THRESHOLD;
        let chunk_size = if unsafe_mode { UNSAFE_MODE_CHUNK } else { SAFE_MODE_CHUNK };

        for (page_index, page) in mab.pages(PAGE_SIZE).enumerate() {
            self.program_page(bridge, mab.start, page_index as u32, page, chunk_size)?;
            self.check_crc(bridge, mab.start, page)?;
            if unsafe_mode {
                self.write(bridge, mab.start)?;
            }
        }
        if !unsafe_mode {
            self.write(bridge, mab.start)?;
        }

        self.boot(bridge, mab.start)
    }

    /// Tries `HOST_INIT`, falling back to `HOST_INIT_SECONDARY` every other
    /// attempt, up to [`INIT_RETRIES`] times (spec §4.7: "Init retries up
    /// to 10 times"; recovery mode skips the pre-reset and retries
    /// indefinitely until the caller cancels — not modelled here since this
    /// crate has no cancellation token plumbed through yet).
    fn host_init(&self, bridge: &mut CandleBridge, boot_address: u32) -> Result<()> {
        for attempt in 0..INIT_RETRIES {
            let command = if attempt % 2 == 0 { HOST_INIT } else { HOST_INIT_SECONDARY };
            if let Ok(reply) = self.command(bridge, command, boot_address, &[], INIT_TIMEOUT_MS) {
                if reply.first() == Some(&HOST_INIT_OK) {
                    return Ok(());
                }
            }
        }
        Err(Error::LoaderError(LoaderErrorKind::Init))
    }

    fn program_page(&self, bridge: &mut CandleBridge, boot_address: u32, page_index: u32, page: &[u8], chunk_size: usize) -> Result<()> {
        let chunks: Vec<&[u8]> = page.chunks(chunk_size).collect();
        for (i, chunk) in chunks.iter().enumerate() {
            let mut extra = Vec::with_capacity(4 + chunk.len());
            extra.extend_from_slice(&page_index.to_le_bytes());
            extra.extend_from_slice(chunk);
            let reply = self
                .command(bridge, PROG, boot_address, &extra, CHUNK_TIMEOUT_MS)
                .map_err(|_| Error::LoaderError(LoaderErrorKind::Firmware))?;
            let last = i == chunks.len() - 1;
            let expected = if last { PROG_OK } else { CHUNK_OK };
            if reply.first() != Some(&expected) {
                return Err(Error::LoaderError(LoaderErrorKind::Firmware));
            }
        }
        Ok(())
    }

    fn check_crc(&self, bridge: &mut CandleBridge, boot_address: u32, page: &[u8]) -> Result<()> {
        let mut crc = CRCu32::crc32();
        crc.digest(page);
        let expected = crc.get_crc();

        let reply = self
            .command(bridge, CHECK_CRC, boot_address, &expected.to_le_bytes(), CRC_TIMEOUT_MS)
            .map_err(|_| Error::LoaderError(LoaderErrorKind::Firmware))?;

        if reply.first() != Some(&CRC_OK) {
            return Err(Error::LoaderError(LoaderErrorKind::Firmware));
        }
        Ok(())
    }

    /// Requests the buffered page(s) actually be written to flash (spec
    /// §4.7: unsafe mode does this after every page's CRC check, safe mode
    /// once after the whole image's CRC has passed).
    fn write(&self, bridge: &mut CandleBridge, boot_address: u32) -> Result<()> {
        let reply = self
            .command(bridge, PROG, boot_address, &[], WRITE_TIMEOUT_MS)
            .map_err(|_| Error::LoaderError(LoaderErrorKind::Firmware))?;
        if reply.first() != Some(&PROG_OK) {
            return Err(Error::LoaderError(LoaderErrorKind::Firmware));
        }
        Ok(())
    }

    fn boot(&self, bridge: &mut CandleBridge, boot_address: u32) -> Result<()> {
        let reply = self
            .command(bridge, BOOT, boot_address, &[], BOOT_TIMEOUT_MS)
            .map_err(|_| Error::LoaderError(LoaderErrorKind::Boot))?;
        if reply.first() != Some(&BOOT_OK) {
            return Err(Error::LoaderError(LoaderErrorKind::Boot));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::LoopbackTransport;
    use std::cell::Cell;

    fn crc_of(data: &[u8]) -> u32 {
        let mut crc = CRCu32::crc32();
        crc.digest(data);
        crc.get_crc()
    }

    /// Firmware short enough to land in safe mode (whole-image write
    /// requested once, after all per-page CRC checks), with one page split
    /// into two 8-byte chunks.
    #[test]
    fn flash_walks_init_program_crc_write_boot_for_small_firmware() {
        let binary = vec![0x11u8; 16];
        let page_crc = crc_of(&binary);
        let chunks_seen = Cell::new(0u32);

        let transport = LoopbackTransport::new(move |out: &[u8]| {
            crate::bus::can_echo(out, |frame| {
                let response_id = frame.id + 0x100;
                let reply = match frame.data[0] {
                    HOST_INIT => vec![HOST_INIT_OK],
                    PROG if frame.dlc as usize > 5 => {
                        // chunked page-program: ack CHUNK_OK except the page's last chunk.
                        let n = chunks_seen.get() + 1;
                        chunks_seen.set(n);
                        if n == 2 { vec![PROG_OK] } else { vec![CHUNK_OK] }
                    }
                    PROG => vec![PROG_OK], // standalone whole-image write request
                    CHECK_CRC => {
                        let reported = u32::from_le_bytes(frame.data[5..9].try_into().unwrap());
                        if reported == page_crc { vec![CRC_OK] } else { vec![0xFF] }
                    }
                    BOOT => vec![BOOT_OK],
                    _ => return None,
                };
                Some((response_id, reply))
            })
        });
        let mut bridge = CandleBridge::new(Box::new(transport), 50, 2);

        let mab_text = format!(
            "[firmware]\ntag=MD\nsize=16\nstart=0x08001000\nversion=1.0.0\nchecksum={}\niv={}\nbinary={}\n",
            hex::encode(<sha2::Sha256 as sha2::Digest>::digest(&binary)),
            hex::encode([0u8; 16]),
            hex::encode(&binary),
        );
        let mab = MabFile::parse(&mab_text).unwrap();

        let loader = CanLoader::new(7);
        loader.flash(&mut bridge, &mab).unwrap();
    }

    #[test]
    fn host_init_failure_surfaces_loader_error() {
        let transport = LoopbackTransport::new(|_out: &[u8]| vec![0xFF]);
        let mut bridge = CandleBridge::new(Box::new(transport), 50, 2);
        let loader = CanLoader::new(7);
        let err = loader.host_init(&mut bridge, 0x0800_1000);
        assert!(matches!(err, Err(Error::LoaderError(LoaderErrorKind::Init))));
    }

    #[test]
    fn recovery_loader_addresses_backdoor_ids() {
        let loader = CanLoader::recovery();
        assert_eq!(loader.request_cobid(), RECOVERY_ID_PRIMARY as u16);
        assert_eq!(loader.response_cobid(), RECOVERY_ID_SECONDARY as u16);
    }
}
