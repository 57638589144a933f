//! Small CiA-301 enums shared across the OD, SDO and emergency-frame code.

use crate::error::Error;

/// NMT state-change commands.
#[binrw::binrw]
#[br(repr(u8))]
#[bw(repr(u8))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NmtFunction {
    EnterOperational = 0x01,
    EnterStop = 0x02,
    EnterPreOperational = 0x80,
    ResetNode = 0x81,
    ResetCommunication = 0x82,
}

/// Node guarding status byte (`0x700+id`); the reply's high bit is the
/// toggle bit and is masked off before matching here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum GuardStatus {
    Boot = 0x00,
    Stopped = 0x04,
    Operational = 0x05,
    PreOperational = 0x7F,
}

impl TryFrom<u8> for GuardStatus {
    type Error = Error;
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value & 0x7F {
            0x00 => Ok(GuardStatus::Boot),
            0x04 => Ok(GuardStatus::Stopped),
            0x05 => Ok(GuardStatus::Operational),
            0x7F => Ok(GuardStatus::PreOperational),
            _ => Err(Error::ParseError(format!("{value:#x} is not a valid guard status"))),
        }
    }
}

/// CiA-301 primitive data type tags that can appear in an EDS `DataType` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Boolean,
    Integer8,
    Integer16,
    Integer32,
    Integer64,
    Unsigned8,
    Unsigned16,
    Unsigned32,
    Unsigned64,
    Real32,
    VisibleString,
}

impl DataType {
    /// Byte size of the primitive on the wire. `VisibleString` has no fixed
    /// size; callers that need the static size must special-case it.
    pub fn fixed_size(&self) -> Option<usize> {
        use DataType::*;
        match self {
            Boolean | Integer8 | Unsigned8 => Some(1),
            Integer16 | Unsigned16 => Some(2),
            Integer32 | Unsigned32 | Real32 => Some(4),
            Integer64 | Unsigned64 => Some(8),
            VisibleString => None,
        }
    }

    /// Numeric `DataType` code used in EDS files (CiA-301 Table 41).
    /// Unrecognized codes resolve to `Unsigned8` rather than failing the
    /// whole parse, since a single malformed entry shouldn't sink the file.
    pub fn from_eds_code(code: u32) -> Self {
        match code {
            0x0001 => DataType::Boolean,
            0x0002 => DataType::Integer8,
            0x0003 => DataType::Integer16,
            0x0004 => DataType::Integer32,
            0x0005 => DataType::Unsigned8,
            0x0006 => DataType::Unsigned16,
            0x0007 => DataType::Unsigned32,
            0x0008 => DataType::Real32,
            0x0009 => DataType::VisibleString,
            0x0015 => DataType::Integer64,
            0x001B => DataType::Unsigned64,
            _ => DataType::Unsigned8,
        }
    }
}

/// Access rights for an OD entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessType {
    None,
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl AccessType {
    pub fn from_eds_str(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "ro" | "const" => AccessType::ReadOnly,
            "wo" => AccessType::WriteOnly,
            "rw" | "rwr" | "rww" => AccessType::ReadWrite,
            _ => AccessType::None,
        }
    }
}

/// EDS `ObjectType` (CiA-301 Table 42).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectType {
    Var,
    Array,
    Record,
    Domain,
    DefType,
    DefStruct,
}

impl ObjectType {
    pub fn from_eds_code(code: u32) -> Self {
        match code {
            0x02 => ObjectType::Domain,
            0x05 => ObjectType::DefType,
            0x06 => ObjectType::DefStruct,
            0x08 => ObjectType::Array,
            0x09 => ObjectType::Record,
            _ => ObjectType::Var,
        }
    }
}

/// PDO-mapping capability declared for an OD entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PdoMappingKind {
    No,
    Optional,
    Rpdo,
    Tpdo,
}

impl PdoMappingKind {
    pub fn from_eds_str(s: &str) -> Self {
        match s.trim() {
            "0" => PdoMappingKind::No,
            "1" => PdoMappingKind::Optional,
            "rpdo" | "RPDO" => PdoMappingKind::Rpdo,
            "tpdo" | "TPDO" => PdoMappingKind::Tpdo,
            _ => PdoMappingKind::No,
        }
    }
}

/// CiA-301 SDO abort codes (section 7.5.4), giving `Error::SdoAbort`'s raw
/// code a name for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortCode {
    ToggleBitNotAlternated,
    SdoProtocolTimedOut,
    CommandSpecifierInvalid,
    OutOfMemory,
    UnsupportedAccess,
    WriteOnlyObject,
    ReadOnlyObject,
    ObjectDoesNotExist,
    ObjectCannotBeMapped,
    PdoLengthExceeded,
    GeneralParameterIncompatibility,
    GeneralInternalIncompatibility,
    AccessFailedDueToHardwareError,
    DataTypeMismatch,
    SubindexDoesNotExist,
    ValueRangeExceeded,
    ValueTooHigh,
    ValueTooLow,
    GeneralError,
    Other(u32),
}

impl AbortCode {
    pub fn decode(code: u32) -> Self {
        match code {
            0x0503_0000 => AbortCode::ToggleBitNotAlternated,
            0x0504_0000 => AbortCode::SdoProtocolTimedOut,
            0x0504_0001 => AbortCode::CommandSpecifierInvalid,
            0x0504_0005 => AbortCode::OutOfMemory,
            0x0601_0000 => AbortCode::UnsupportedAccess,
            0x0601_0001 => AbortCode::WriteOnlyObject,
            0x0601_0002 => AbortCode::ReadOnlyObject,
            0x0602_0000 => AbortCode::ObjectDoesNotExist,
            0x0604_0041 => AbortCode::ObjectCannotBeMapped,
            0x0604_0042 => AbortCode::PdoLengthExceeded,
            0x0604_0043 => AbortCode::GeneralParameterIncompatibility,
            0x0604_0047 => AbortCode::GeneralInternalIncompatibility,
            0x0606_0000 => AbortCode::AccessFailedDueToHardwareError,
            0x0607_0010 => AbortCode::DataTypeMismatch,
            0x0609_0011 => AbortCode::SubindexDoesNotExist,
            0x0609_0030 => AbortCode::ValueRangeExceeded,
            0x0609_0031 => AbortCode::ValueTooHigh,
            0x0609_0032 => AbortCode::ValueTooLow,
            0x0800_0000 => AbortCode::GeneralError,
            other => AbortCode::Other(other),
        }
    }

    pub fn encode(&self) -> u32 {
        match self {
            AbortCode::ToggleBitNotAlternated => 0x0503_0000,
            AbortCode::SdoProtocolTimedOut => 0x0504_0000,
            AbortCode::CommandSpecifierInvalid => 0x0504_0001,
            AbortCode::OutOfMemory => 0x0504_0005,
            AbortCode::UnsupportedAccess => 0x0601_0000,
            AbortCode::WriteOnlyObject => 0x0601_0001,
            AbortCode::ReadOnlyObject => 0x0601_0002,
            AbortCode::ObjectDoesNotExist => 0x0602_0000,
            AbortCode::ObjectCannotBeMapped => 0x0604_0041,
            AbortCode::PdoLengthExceeded => 0x0604_0042,
            AbortCode::GeneralParameterIncompatibility => 0x0604_0043,
            AbortCode::GeneralInternalIncompatibility => 0x0604_0047,
            AbortCode::AccessFailedDueToHardwareError => 0x0606_0000,
            AbortCode::DataTypeMismatch => 0x0607_0010,
            AbortCode::SubindexDoesNotExist => 0x0609_0011,
            AbortCode::ValueRangeExceeded => 0x0609_0030,
            AbortCode::ValueTooHigh => 0x0609_0031,
            AbortCode::ValueTooLow => 0x0609_0032,
            AbortCode::GeneralError => 0x0800_0000,
            AbortCode::Other(code) => *code,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EmergencyErrorCode {
    ErrorResetOrNoError,
    GenericError,
    Current,
    CurrentInputSide,
    CurrentInsideDevice,
    CurrentOutputSide,
    Voltage,
    MainsVoltage,
    VoltageInsideDevice,
    OutputVoltage,
    Temperature,
    AmbientTemperature,
    DeviceTemperature,
    DeviceHardware,
    DeviceSoftware,
    InternalSoftware,
    UserSoftware,
    DataSet,
    AdditionalModules,
    Monitoring,
    Communication,
    CommunicationCanOverrun,
    CommunicationErrorPassiveMode,
    CommunicationLifeGuardError,
    CommunicationRecoveredBusOff,
    CommunicationCanIdCollision,
    ProtocolError,
    ProtocolErrorPdoLength,
    ProtocolErrorPdoLengthExceeded,
    ProtocolErrorDamMpdo,
    ProtocolErrorUnexpectedSyncLength,
    ProtocolErrorRpdoTimeout,
    ExternalError,
    AdditionalFunctions,
    DeviceSpecific,
}

impl EmergencyErrorCode {
    pub fn decode(code: u16) -> Result<Self, Error> {
        match code {
            0x8110 => Some(Self::CommunicationCanOverrun),
            0x8120 => Some(Self::CommunicationErrorPassiveMode),
            0x8130 => Some(Self::CommunicationLifeGuardError),
            0x8140 => Some(Self::CommunicationRecoveredBusOff),
            0x8150 => Some(Self::CommunicationCanIdCollision),
            0x8210 => Some(Self::ProtocolErrorPdoLength),
            0x8220 => Some(Self::ProtocolErrorPdoLengthExceeded),
            0x8230 => Some(Self::ProtocolErrorDamMpdo),
            0x8240 => Some(Self::ProtocolErrorUnexpectedSyncLength),
            0x8250 => Some(Self::ProtocolErrorRpdoTimeout),
            0x2100..=0x21FF => Some(Self::CurrentInputSide),
            0x2200..=0x22FF => Some(Self::CurrentInsideDevice),
            0x2300..=0x23FF => Some(Self::CurrentOutputSide),
            0x3100..=0x31FF => Some(Self::MainsVoltage),
            0x3200..=0x32FF => Some(Self::VoltageInsideDevice),
            0x3300..=0x33FF => Some(Self::OutputVoltage),
            0x4100..=0x41FF => Some(Self::AmbientTemperature),
            0x4200..=0x42FF => Some(Self::DeviceTemperature),
            0x6100..=0x61FF => Some(Self::InternalSoftware),
            0x6200..=0x62FF => Some(Self::UserSoftware),
            0x6300..=0x63FF => Some(Self::DataSet),
            0x8100..=0x81FF => Some(Self::Communication),
            0x8200..=0x82FF => Some(Self::ProtocolError),
            0x2000..=0x20FF => Some(Self::Current),
            0x3000..=0x30FF => Some(Self::Voltage),
            0x4000..=0x40FF => Some(Self::Temperature),
            0x5000..=0x50FF => Some(Self::DeviceHardware),
            0x6000..=0x60FF => Some(Self::DeviceSoftware),
            0x7000..=0x70FF => Some(Self::AdditionalModules),
            0x8000..=0x80FF => Some(Self::Monitoring),
            0x9000..=0x90FF => Some(Self::ExternalError),
            0xF000..=0xFEFF => Some(Self::AdditionalFunctions),
            0xFF00..=0xFFFF => Some(Self::DeviceSpecific),
            0x0000..=0x00FF => Some(Self::ErrorResetOrNoError),
            0x1000..=0x1FFF => Some(Self::GenericError),
            _ => None,
        }
        .ok_or_else(|| Error::ParseError(format!("bad emergency error code: {code:#06x}")))
    }

    pub fn encode(&self) -> u16 {
        match self {
            Self::ErrorResetOrNoError => 0x0000,
            Self::GenericError => 0x1000,
            Self::Current => 0x2000,
            Self::CurrentInputSide => 0x2100,
            Self::CurrentInsideDevice => 0x2200,
            Self::CurrentOutputSide => 0x2300,
            Self::Voltage => 0x3000,
            Self::MainsVoltage => 0x3100,
            Self::VoltageInsideDevice => 0x3200,
            Self::OutputVoltage => 0x3300,
            Self::Temperature => 0x4000,
            Self::AmbientTemperature => 0x4100,
            Self::DeviceTemperature => 0x4200,
            Self::DeviceHardware => 0x5000,
            Self::DeviceSoftware => 0x6000,
            Self::InternalSoftware => 0x6100,
            Self::UserSoftware => 0x6200,
            Self::DataSet => 0x6300,
            Self::AdditionalModules => 0x7000,
            Self::Monitoring => 0x8000,
            Self::Communication => 0x8100,
            Self::CommunicationCanOverrun => 0x8110,
            Self::CommunicationErrorPassiveMode => 0x8120,
            Self::CommunicationLifeGuardError => 0x8130,
            Self::CommunicationRecoveredBusOff => 0x8140,
            Self::CommunicationCanIdCollision => 0x8150,
            Self::ProtocolError => 0x8200,
            Self::ProtocolErrorPdoLength => 0x8210,
            Self::ProtocolErrorPdoLengthExceeded => 0x8220,
            Self::ProtocolErrorDamMpdo => 0x8230,
            Self::ProtocolErrorUnexpectedSyncLength => 0x8240,
            Self::ProtocolErrorRpdoTimeout => 0x8250,
            Self::ExternalError => 0x9000,
            Self::AdditionalFunctions => 0xF000,
            Self::DeviceSpecific => 0xFF00,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EmergencyErrorRegister {
    GenericError,
    Current,
    Voltage,
    Temperature,
    CommunicationError,
    DeviceProfileSpecific,
    Reserved,
    ManufacturerSpecific,
}

impl EmergencyErrorRegister {
    pub fn decode(code: u8) -> Vec<Self> {
        let mut errors = Vec::new();
        if code & 0x01 != 0 {
            errors.push(Self::GenericError);
        }
        if code & 0x02 != 0 {
            errors.push(Self::Current);
        }
        if code & 0x04 != 0 {
            errors.push(Self::Voltage);
        }
        if code & 0x08 != 0 {
            errors.push(Self::Temperature);
        }
        if code & 0x10 != 0 {
            errors.push(Self::CommunicationError);
        }
        if code & 0x20 != 0 {
            errors.push(Self::DeviceProfileSpecific);
        }
        if code & 0x40 != 0 {
            errors.push(Self::Reserved);
        }
        if code & 0x80 != 0 {
            errors.push(Self::ManufacturerSpecific);
        }
        errors
    }

    pub fn encode(errors: &[EmergencyErrorRegister]) -> u8 {
        let mut code = 0;
        for error in errors {
            code |= match error {
                Self::GenericError => 0x01,
                Self::Current => 0x02,
                Self::Voltage => 0x04,
                Self::Temperature => 0x08,
                Self::CommunicationError => 0x10,
                Self::DeviceProfileSpecific => 0x20,
                Self::Reserved => 0x40,
                Self::ManufacturerSpecific => 0x80,
            };
        }
        code
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abort_code_round_trips() {
        assert_eq!(AbortCode::decode(0x0601_0002), AbortCode::ReadOnlyObject);
        assert_eq!(AbortCode::ReadOnlyObject.encode(), 0x0601_0002);
        match AbortCode::decode(0x1234_5678) {
            AbortCode::Other(code) => assert_eq!(code, 0x1234_5678),
            other => panic!("expected Other, got {other:?}"),
        }
    }

    #[test]
    fn emergency_error_register_round_trips() {
        let bits = EmergencyErrorRegister::decode(0b1001_0011);
        assert_eq!(
            bits,
            vec![
                EmergencyErrorRegister::GenericError,
                EmergencyErrorRegister::Voltage,
                EmergencyErrorRegister::CommunicationError,
                EmergencyErrorRegister::ManufacturerSpecific,
            ]
        );
        assert_eq!(EmergencyErrorRegister::encode(&bits), 0b1001_0011);
    }

    #[test]
    fn emergency_error_code_groups_sub_ranges() {
        assert_eq!(EmergencyErrorCode::decode(0x2150).unwrap(), EmergencyErrorCode::CurrentInputSide);
        assert_eq!(EmergencyErrorCode::decode(0x8130).unwrap(), EmergencyErrorCode::CommunicationLifeGuardError);
        assert_eq!(EmergencyErrorCode::decode(0x8105).unwrap(), EmergencyErrorCode::Communication);
    }

    #[test]
    fn guard_status_masks_toggle_bit() {
        assert_eq!(GuardStatus::try_from(0x85).unwrap(), GuardStatus::Operational);
    }
}
