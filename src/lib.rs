//! # candle-core
//!
//! Communication core for MAB MD-series brushless servo drives, bridged
//! over USB by a CANdle dongle onto FD-CAN. Two protocols ride the same
//! wire: CiA-301/402 CANopen (SDO, PDO, NMT, SYNC, emergency) and a
//! simpler MAB register protocol, plus firmware loaders for the drive and
//! for the bridge itself.
//!
//! # Layers
//! - [`bus`] — USB bulk transport and the `BusFrame` packing/unpacking
//!   that turns it into a frame-oriented bounded FIFO.
//! - [`bridge`] — the CANdle client built on top of the FIFO: bus
//!   configuration, CAN frame send/receive, statistics watchdog.
//! - [`od`] — the object dictionary model and its EDS-file parser.
//! - [`canopen`] — the CiA-301/402 stack: SDO, PDO, NMT/SYNC, emergency.
//! - [`register`] — the MD register request/response protocol.
//! - [`loader`] — `.mab` firmware files and the two loaders that flash
//!   them (MD drives over CAN, the CANdle bootloader over raw USB).
//! - [`discovery`] — node id scanning for both protocols.
//!
//! # Progress
//! ✅ USB-CAN bridge framing and FIFO
//! ✅ SDO expedited + segmented read/write
//! ✅ PDO mapping setup and dispatch
//! ✅ EDS object dictionary parsing
//! ✅ MD and CANdle firmware loaders
//! we're still missing:
//! ❌ CANopen time-stamp and layer setting services (LSS)
//! ❌ MPDO support

pub mod bridge;
pub mod bus;
pub mod canopen;
pub mod discovery;
pub mod enums;
pub mod error;
pub mod frame;
pub mod loader;
pub mod od;
pub mod register;

pub use bridge::CandleBridge;
pub use canopen::CanopenStack;
pub use error::{Error, Result};
pub use frame::CANFrame;
pub use od::ObjectDictionary;
