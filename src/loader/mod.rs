//! Firmware loaders (spec §4.7): one for MD drives over CAN, one for the
//! CANdle bridge itself over raw USB, both driven by a shared `.mab` file
//! parser.

pub mod can_loader;
pub mod mabfile;
pub mod usb_loader;

pub use can_loader::CanLoader;
pub use mabfile::MabFile;
pub use usb_loader::UsbLoader;
