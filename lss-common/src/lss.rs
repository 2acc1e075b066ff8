//! Core implementation of the LSS protocol wire format.
//!
//! This module holds the command-specifier enum and the request/response message types for the
//! CiA DSP-305 Layer Setting Services protocol, plus their serialization to and from the 8-byte
//! CAN frames defined in spec.md §4.B. Every multi-byte field is big-endian on the wire — this
//! implementation follows the CiA standard rather than the little-endian convention some
//! CANopen stacks use internally for their own non-standard framing (see `DESIGN.md`).

use snafu::Snafu;

use crate::can::{CanFrame, CanId};

/// Identifies which LSS service a frame carries.
///
/// Deliberately exhaustive and matched everywhere by name (never cast blindly), so that adding a
/// new service is a compile error until every dispatch site is updated (spec.md §9, "Tagged
/// state").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LssCommandSpecifier {
    /// Switch the LSS mode of all slaves (Waiting <-> Configuration).
    SwitchModeGlobal = 0x04,
    /// Set the node ID of the slave(s) in Configuration mode.
    ConfigureNodeId = 0x11,
    /// Set the bit timing table/index of the slave(s) in Configuration mode.
    ConfigureBitTiming = 0x13,
    /// Command slaves to activate a newly configured bit rate after a delay.
    ActivateBitTiming = 0x15,
    /// Command the slave(s) in Configuration mode to persist their configuration.
    StoreConfiguration = 0x17,
    /// Selective switch: match on vendor ID.
    SwitchStateVendor = 0x40,
    /// Selective switch: match on product code.
    SwitchStateProduct = 0x41,
    /// Selective switch: match on revision number.
    SwitchStateRevision = 0x42,
    /// Selective switch: match on serial number. Sent last; a matching slave replies here.
    SwitchStateSerial = 0x43,
    /// Confirms a selective switch matched.
    SwitchStateConfirm = 0x44,
    /// Fastscan "slave is here" acknowledgment.
    IdentifySlave = 0x4F,
    /// Fastscan binary-search probe.
    FastScan = 0x51,
    /// Inquire the vendor ID of the slave in Configuration mode.
    InquireVendor = 0x5A,
    /// Inquire the product code of the slave in Configuration mode.
    InquireProduct = 0x5B,
    /// Inquire the revision number of the slave in Configuration mode.
    InquireRev = 0x5C,
    /// Inquire the serial number of the slave in Configuration mode.
    InquireSerial = 0x5D,
    /// Inquire the node ID currently assigned to the slave in Configuration mode.
    InquireNodeId = 0x5E,
}

impl LssCommandSpecifier {
    pub fn from_byte(b: u8) -> Result<Self, LssCodecError> {
        match b {
            0x04 => Ok(Self::SwitchModeGlobal),
            0x11 => Ok(Self::ConfigureNodeId),
            0x13 => Ok(Self::ConfigureBitTiming),
            0x15 => Ok(Self::ActivateBitTiming),
            0x17 => Ok(Self::StoreConfiguration),
            0x40 => Ok(Self::SwitchStateVendor),
            0x41 => Ok(Self::SwitchStateProduct),
            0x42 => Ok(Self::SwitchStateRevision),
            0x43 => Ok(Self::SwitchStateSerial),
            0x44 => Ok(Self::SwitchStateConfirm),
            0x4F => Ok(Self::IdentifySlave),
            0x51 => Ok(Self::FastScan),
            0x5A => Ok(Self::InquireVendor),
            0x5B => Ok(Self::InquireProduct),
            0x5C => Ok(Self::InquireRev),
            0x5D => Ok(Self::InquireSerial),
            0x5E => Ok(Self::InquireNodeId),
            _ => Err(LssCodecError::UnknownCommandSpecifier { value: b }),
        }
    }
}

/// Errors from decoding a frame into a typed LSS message.
#[derive(Debug, Snafu, Clone, Copy, PartialEq, Eq)]
pub enum LssCodecError {
    /// The command-specifier byte did not match any known LSS service.
    #[snafu(display("unrecognized LSS command specifier: {value:#04x}"))]
    UnknownCommandSpecifier {
        /// The unrecognized byte.
        value: u8,
    },
    /// The frame's command specifier is never valid in this direction (e.g. a response cs
    /// appearing where a request was expected).
    #[snafu(display("command specifier {value:#04x} is not valid in this direction"))]
    WrongDirection {
        /// The cs byte, valid in the opposite direction only.
        value: u8,
    },
    /// A field held a value outside its legal range (e.g. an unrecognized LSS mode byte).
    #[snafu(display("invalid field value"))]
    InvalidField,
}

/// The mode carried by `SwitchModeGlobal` / a slave's internal LSS state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LssMode {
    /// The default state: the slave ignores configuration services.
    Waiting = 0,
    /// The slave accepts configuration services (spec.md calls this `GlobalConfig` at the
    /// session level; on the wire and at the slave it is simply "Configuration").
    Configuration = 1,
}

impl LssMode {
    pub fn from_byte(b: u8) -> Result<Self, LssCodecError> {
        match b {
            0 => Ok(Self::Waiting),
            1 => Ok(Self::Configuration),
            _ => Err(LssCodecError::InvalidField),
        }
    }
}

/// Looks up the wire table-index for a bit rate, per spec.md §6.
///
/// Returns `None` for any kilobit/s value not in the standard table (including the intentionally
/// unassigned value `5`); the caller turns that into `LssStatus::IllegalArgument`.
pub fn bit_rate_table_index(kbps: u32) -> Option<u8> {
    match kbps {
        1000 => Some(0),
        800 => Some(1),
        500 => Some(2),
        250 => Some(3),
        125 => Some(4),
        50 => Some(6),
        20 => Some(7),
        10 => Some(8),
        0 => Some(9), // "auto"
        _ => None,
    }
}

/// The 128-bit LSS address: an immutable vendor/product/revision/serial quadruple (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LssAddress {
    pub vendor_id: u32,
    pub product_code: u32,
    pub revision_number: u32,
    pub serial_number: u32,
}

impl LssAddress {
    pub const fn new(
        vendor_id: u32,
        product_code: u32,
        revision_number: u32,
        serial_number: u32,
    ) -> Self {
        Self {
            vendor_id,
            product_code,
            revision_number,
            serial_number,
        }
    }

    /// Index into the address as if it were a `[u32; 4]`, in Fastscan sub-field order
    /// (0=vendor, 1=product, 2=revision, 3=serial).
    pub fn field(&self, sub: u8) -> u32 {
        match sub {
            0 => self.vendor_id,
            1 => self.product_code,
            2 => self.revision_number,
            3 => self.serial_number,
            _ => panic!("invalid LSS address sub-field index"),
        }
    }

    pub fn with_field(mut self, sub: u8, value: u32) -> Self {
        match sub {
            0 => self.vendor_id = value,
            1 => self.product_code = value,
            2 => self.revision_number = value,
            3 => self.serial_number = value,
            _ => panic!("invalid LSS address sub-field index"),
        }
        self
    }
}

/// A request frame sent master -> slave(s).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LssRequest {
    /// Switch the LSS mode of every slave on the bus. Non-confirmed.
    SwitchModeGlobal { mode: LssMode },
    /// Selective switch, vendor component.
    SwitchStateVendor { vendor_id: u32 },
    /// Selective switch, product component.
    SwitchStateProduct { product_code: u32 },
    /// Selective switch, revision component.
    SwitchStateRevision { revision_number: u32 },
    /// Selective switch, serial component. Triggers the matching slave's confirm.
    SwitchStateSerial { serial_number: u32 },
    /// Assign a new node ID to the slave(s) in Configuration mode.
    ConfigureNodeId { node_id: u8 },
    /// Assign a new bit timing table/index to the slave(s) in Configuration mode.
    ConfigureBitTiming { table: u8, index: u8 },
    /// Command slaves to activate a newly configured bit rate.
    ActivateBitTiming { switch_delay_ms: u16 },
    /// Command the slave(s) in Configuration mode to persist node ID and bit rate.
    StoreConfiguration,
    /// Inquire the vendor ID of the slave in Configuration mode.
    InquireVendor,
    /// Inquire the product code of the slave in Configuration mode.
    InquireProduct,
    /// Inquire the revision number of the slave in Configuration mode.
    InquireRev,
    /// Inquire the serial number of the slave in Configuration mode.
    InquireSerial,
    /// Inquire the node ID of the slave in Configuration mode.
    InquireNodeId,
    /// Fastscan binary-search probe (spec.md §4.F).
    FastScan {
        id_number: u32,
        bit_check: u8,
        lss_sub: u8,
        lss_next: u8,
    },
}

impl LssRequest {
    /// Encode this request into an 8-byte frame addressed to `id` (the master-to-slaves
    /// identifier).
    pub fn to_frame(self, id: CanId) -> CanFrame {
        let mut data = [0u8; 8];
        match self {
            LssRequest::SwitchModeGlobal { mode } => {
                data[0] = LssCommandSpecifier::SwitchModeGlobal as u8;
                data[1] = mode as u8;
            }
            LssRequest::SwitchStateVendor { vendor_id } => {
                data[0] = LssCommandSpecifier::SwitchStateVendor as u8;
                data[1..5].copy_from_slice(&vendor_id.to_be_bytes());
            }
            LssRequest::SwitchStateProduct { product_code } => {
                data[0] = LssCommandSpecifier::SwitchStateProduct as u8;
                data[1..5].copy_from_slice(&product_code.to_be_bytes());
            }
            LssRequest::SwitchStateRevision { revision_number } => {
                data[0] = LssCommandSpecifier::SwitchStateRevision as u8;
                data[1..5].copy_from_slice(&revision_number.to_be_bytes());
            }
            LssRequest::SwitchStateSerial { serial_number } => {
                data[0] = LssCommandSpecifier::SwitchStateSerial as u8;
                data[1..5].copy_from_slice(&serial_number.to_be_bytes());
            }
            LssRequest::ConfigureNodeId { node_id } => {
                data[0] = LssCommandSpecifier::ConfigureNodeId as u8;
                data[1] = node_id;
            }
            LssRequest::ConfigureBitTiming { table, index } => {
                data[0] = LssCommandSpecifier::ConfigureBitTiming as u8;
                data[1] = table;
                data[2] = index;
            }
            LssRequest::ActivateBitTiming { switch_delay_ms } => {
                data[0] = LssCommandSpecifier::ActivateBitTiming as u8;
                data[1..3].copy_from_slice(&switch_delay_ms.to_be_bytes());
            }
            LssRequest::StoreConfiguration => {
                data[0] = LssCommandSpecifier::StoreConfiguration as u8;
            }
            LssRequest::InquireVendor => data[0] = LssCommandSpecifier::InquireVendor as u8,
            LssRequest::InquireProduct => data[0] = LssCommandSpecifier::InquireProduct as u8,
            LssRequest::InquireRev => data[0] = LssCommandSpecifier::InquireRev as u8,
            LssRequest::InquireSerial => data[0] = LssCommandSpecifier::InquireSerial as u8,
            LssRequest::InquireNodeId => data[0] = LssCommandSpecifier::InquireNodeId as u8,
            LssRequest::FastScan {
                id_number,
                bit_check,
                lss_sub,
                lss_next,
            } => {
                data[0] = LssCommandSpecifier::FastScan as u8;
                data[1..5].copy_from_slice(&id_number.to_be_bytes());
                data[5] = bit_check;
                data[6] = lss_sub;
                data[7] = lss_next;
            }
        }
        CanFrame::new(id, data)
    }

    /// Decode a request from raw frame data (used by test harnesses simulating a slave).
    pub fn from_bytes(data: &[u8; 8]) -> Result<Self, LssCodecError> {
        let cs = LssCommandSpecifier::from_byte(data[0])?;
        Ok(match cs {
            LssCommandSpecifier::SwitchModeGlobal => LssRequest::SwitchModeGlobal {
                mode: LssMode::from_byte(data[1])?,
            },
            LssCommandSpecifier::SwitchStateVendor => LssRequest::SwitchStateVendor {
                vendor_id: u32::from_be_bytes(data[1..5].try_into().unwrap()),
            },
            LssCommandSpecifier::SwitchStateProduct => LssRequest::SwitchStateProduct {
                product_code: u32::from_be_bytes(data[1..5].try_into().unwrap()),
            },
            LssCommandSpecifier::SwitchStateRevision => LssRequest::SwitchStateRevision {
                revision_number: u32::from_be_bytes(data[1..5].try_into().unwrap()),
            },
            LssCommandSpecifier::SwitchStateSerial => LssRequest::SwitchStateSerial {
                serial_number: u32::from_be_bytes(data[1..5].try_into().unwrap()),
            },
            LssCommandSpecifier::ConfigureNodeId => LssRequest::ConfigureNodeId {
                node_id: data[1],
            },
            LssCommandSpecifier::ConfigureBitTiming => LssRequest::ConfigureBitTiming {
                table: data[1],
                index: data[2],
            },
            LssCommandSpecifier::ActivateBitTiming => LssRequest::ActivateBitTiming {
                switch_delay_ms: u16::from_be_bytes(data[1..3].try_into().unwrap()),
            },
            LssCommandSpecifier::StoreConfiguration => LssRequest::StoreConfiguration,
            LssCommandSpecifier::InquireVendor => LssRequest::InquireVendor,
            LssCommandSpecifier::InquireProduct => LssRequest::InquireProduct,
            LssCommandSpecifier::InquireRev => LssRequest::InquireRev,
            LssCommandSpecifier::InquireSerial => LssRequest::InquireSerial,
            LssCommandSpecifier::InquireNodeId => LssRequest::InquireNodeId,
            LssCommandSpecifier::FastScan => LssRequest::FastScan {
                id_number: u32::from_be_bytes(data[1..5].try_into().unwrap()),
                bit_check: data[5],
                lss_sub: data[6],
                lss_next: data[7],
            },
            LssCommandSpecifier::SwitchStateConfirm | LssCommandSpecifier::IdentifySlave => {
                return Err(LssCodecError::WrongDirection { value: data[0] })
            }
        })
    }
}

/// The standardized (non-manufacturer) error byte returned in a configure-confirm frame.
///
/// `0` means success. Any other standardized value means the slave rejected the argument
/// (spec.md §4.B); the specific meaning (e.g. "node ID out of range") is slave/service specific
/// and is not decoded further here — see spec.md §9's open question on preserving this byte.
pub type LssErrorCode = u8;

/// A response frame sent slave -> master.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LssResponse {
    /// A selective switch matched this slave's identity.
    SwitchStateConfirm,
    /// Confirms a `ConfigureNodeId` request.
    ConfigureNodeIdAck { error: LssErrorCode, spec_error: u8 },
    /// Confirms a `ConfigureBitTiming` request.
    ConfigureBitTimingAck { error: LssErrorCode, spec_error: u8 },
    /// Confirms a `StoreConfiguration` request.
    StoreConfigurationAck { error: LssErrorCode, spec_error: u8 },
    /// Answers `InquireVendor`.
    InquireVendorAck { vendor_id: u32 },
    /// Answers `InquireProduct`.
    InquireProductAck { product_code: u32 },
    /// Answers `InquireRev`.
    InquireRevAck { revision_number: u32 },
    /// Answers `InquireSerial`.
    InquireSerialAck { serial_number: u32 },
    /// Answers `InquireNodeId`.
    InquireNodeIdAck { node_id: u8 },
    /// Fastscan "a candidate slave is still listening" acknowledgment.
    IdentifySlave,
}

impl LssResponse {
    pub fn to_frame(self, id: CanId) -> CanFrame {
        let mut data = [0u8; 8];
        match self {
            LssResponse::SwitchStateConfirm => {
                data[0] = LssCommandSpecifier::SwitchStateConfirm as u8;
            }
            LssResponse::ConfigureNodeIdAck { error, spec_error } => {
                data[0] = LssCommandSpecifier::ConfigureNodeId as u8;
                data[1] = error;
                data[2] = spec_error;
            }
            LssResponse::ConfigureBitTimingAck { error, spec_error } => {
                data[0] = LssCommandSpecifier::ConfigureBitTiming as u8;
                data[1] = error;
                data[2] = spec_error;
            }
            LssResponse::StoreConfigurationAck { error, spec_error } => {
                data[0] = LssCommandSpecifier::StoreConfiguration as u8;
                data[1] = error;
                data[2] = spec_error;
            }
            LssResponse::InquireVendorAck { vendor_id } => {
                data[0] = LssCommandSpecifier::InquireVendor as u8;
                data[1..5].copy_from_slice(&vendor_id.to_be_bytes());
            }
            LssResponse::InquireProductAck { product_code } => {
                data[0] = LssCommandSpecifier::InquireProduct as u8;
                data[1..5].copy_from_slice(&product_code.to_be_bytes());
            }
            LssResponse::InquireRevAck { revision_number } => {
                data[0] = LssCommandSpecifier::InquireRev as u8;
                data[1..5].copy_from_slice(&revision_number.to_be_bytes());
            }
            LssResponse::InquireSerialAck { serial_number } => {
                data[0] = LssCommandSpecifier::InquireSerial as u8;
                data[1..5].copy_from_slice(&serial_number.to_be_bytes());
            }
            LssResponse::InquireNodeIdAck { node_id } => {
                data[0] = LssCommandSpecifier::InquireNodeId as u8;
                data[1] = node_id;
            }
            LssResponse::IdentifySlave => {
                data[0] = LssCommandSpecifier::IdentifySlave as u8;
            }
        }
        CanFrame::new(id, data)
    }

    /// Decode a response from raw frame data and its command specifier.
    ///
    /// Returns the command specifier alongside the decoded value, since the confirmed-service
    /// engine (spec.md §4.E) needs the raw cs to decide whether a reply matches what it's
    /// awaiting, independent of whether decoding succeeds.
    pub fn from_bytes(data: &[u8; 8]) -> Result<(LssCommandSpecifier, Self), LssCodecError> {
        let cs = LssCommandSpecifier::from_byte(data[0])?;
        let resp = match cs {
            LssCommandSpecifier::SwitchStateConfirm => LssResponse::SwitchStateConfirm,
            LssCommandSpecifier::ConfigureNodeId => LssResponse::ConfigureNodeIdAck {
                error: data[1],
                spec_error: data[2],
            },
            LssCommandSpecifier::ConfigureBitTiming => LssResponse::ConfigureBitTimingAck {
                error: data[1],
                spec_error: data[2],
            },
            LssCommandSpecifier::StoreConfiguration => LssResponse::StoreConfigurationAck {
                error: data[1],
                spec_error: data[2],
            },
            LssCommandSpecifier::InquireVendor => LssResponse::InquireVendorAck {
                vendor_id: u32::from_be_bytes(data[1..5].try_into().unwrap()),
            },
            LssCommandSpecifier::InquireProduct => LssResponse::InquireProductAck {
                product_code: u32::from_be_bytes(data[1..5].try_into().unwrap()),
            },
            LssCommandSpecifier::InquireRev => LssResponse::InquireRevAck {
                revision_number: u32::from_be_bytes(data[1..5].try_into().unwrap()),
            },
            LssCommandSpecifier::InquireSerial => LssResponse::InquireSerialAck {
                serial_number: u32::from_be_bytes(data[1..5].try_into().unwrap()),
            },
            LssCommandSpecifier::InquireNodeId => LssResponse::InquireNodeIdAck { node_id: data[1] },
            LssCommandSpecifier::IdentifySlave => LssResponse::IdentifySlave,
            _ => return Err(LssCodecError::WrongDirection { value: data[0] }),
        };
        Ok((cs, resp))
    }
}

/// Special `bit_check` value used in a Fastscan frame to ask "is anyone unconfigured listening".
///
/// Not part of spec.md's Check-phase description directly (which just says "emit Fastscan with
/// ... bitCheck=0x80"), reproduced here as a named constant for readability at call sites.
pub const FASTSCAN_CHECK_BIT: u8 = 0x80;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selective_switch_vendor_is_big_endian() {
        let frame = LssRequest::SwitchStateVendor {
            vendor_id: 0x1122_3344,
        }
        .to_frame(CanId::Std(0x7E5));
        assert_eq!(
            frame.data,
            [0x40, 0x11, 0x22, 0x33, 0x44, 0, 0, 0],
            "S5: selective-switch vendor must be big-endian on the wire"
        );
    }

    #[test]
    fn configure_bit_timing_layout() {
        let frame = LssRequest::ConfigureBitTiming { table: 0, index: 2 }
            .to_frame(CanId::Std(0x7E5));
        assert_eq!(frame.data, [0x13, 0, 2, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn activate_bit_timing_layout() {
        let frame = LssRequest::ActivateBitTiming {
            switch_delay_ms: 0x64,
        }
        .to_frame(CanId::Std(0x7E5));
        assert_eq!(frame.data, [0x15, 0, 0x64, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn round_trip_fastscan() {
        let req = LssRequest::FastScan {
            id_number: 0xDEAD_BEEF,
            bit_check: 31,
            lss_sub: 2,
            lss_next: 3,
        };
        let frame = req.to_frame(CanId::Std(0x7E5));
        let decoded = LssRequest::from_bytes(&frame.data).unwrap();
        assert_eq!(req, decoded);
    }

    #[test]
    fn unknown_cs_is_rejected() {
        let data = [0xC3, 0, 0, 0, 0, 0, 0, 0];
        assert!(matches!(
            LssRequest::from_bytes(&data),
            Err(LssCodecError::UnknownCommandSpecifier { value: 0xC3 })
        ));
    }

    #[test]
    fn bit_rate_table_matches_spec() {
        assert_eq!(bit_rate_table_index(1000), Some(0));
        assert_eq!(bit_rate_table_index(500), Some(2));
        assert_eq!(bit_rate_table_index(0), Some(9));
        assert_eq!(bit_rate_table_index(5), None);
        assert_eq!(bit_rate_table_index(100), None);
    }

    #[test]
    fn configure_node_id_ack_round_trips() {
        let resp = LssResponse::ConfigureNodeIdAck {
            error: 0,
            spec_error: 0,
        };
        let frame = resp.to_frame(CanId::Std(0x7E4));
        let (cs, decoded) = LssResponse::from_bytes(&frame.data).unwrap();
        assert_eq!(cs, LssCommandSpecifier::ConfigureNodeId);
        assert_eq!(resp, decoded);
    }
}
