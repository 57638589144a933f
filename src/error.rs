//! Unified result/error type for the core (spec §7).
//!
//! Every fallible operation in this crate returns `Result<T>`. Bus errors
//! are surfaced to the immediate caller rather than retried internally;
//! SDO aborts only clear the stack's in-flight state, they don't get
//! retried automatically.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// The loader-specific failure kinds (spec §4.7 "Error semantics").
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderErrorKind {
    #[error("could not enter bootloader or no response to first command")]
    Init,
    #[error("chunk/CRC/write failed mid-transfer")]
    Firmware,
    #[error("boot command did not ack")]
    Boot,
    #[error("pre-reset command not acknowledged")]
    Reset,
    #[error("programmer error")]
    Unknown,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("device not connected")]
    DeviceNotConnected,

    #[error("transport initialization failed: {0}")]
    InitializationError(String),

    #[error("tx FIFO is full")]
    FifoFull,

    #[error("timed out waiting for response after {0} ms")]
    ResponseTimeout(u64),

    #[error("bad response: {0}")]
    BadResponse(String),

    #[error("SDO abort, code 0x{0:08x}")]
    SdoAbort(u32),

    #[error("value type does not match the OD entry's tag at 0x{index:04x}:0x{subindex:02x}")]
    TypeMismatch { index: u16, subindex: u8 },

    #[error("value outside [{low}, {high}] at 0x{index:04x}:0x{subindex:02x}")]
    LimitExceeded {
        index: u16,
        subindex: u8,
        low: String,
        high: String,
    },

    #[error("object 0x{index:04x}:0x{subindex:02x} not found in the object dictionary")]
    UnknownObject { index: u16, subindex: u8 },

    #[error("bus configuration error: no ack within {0} ms")]
    BusConfigError(u64),

    #[error("loader error: {0}")]
    LoaderError(LoaderErrorKind),

    #[error("transmitter error: {0}")]
    TransmitterError(String),

    #[error("receiver error: {0}")]
    ReceiverError(String),

    #[error("data too long: {0} bytes")]
    DataTooLong(usize),

    #[error("no data to send")]
    DataEmpty,

    #[error("invalid CAN id: 0x{0:x}")]
    InvalidId(u32),

    #[error("parse error: {0}")]
    ParseError(String),

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
