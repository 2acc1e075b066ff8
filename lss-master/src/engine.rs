//! The confirmed-service engine (spec.md §4.E, component E).

use defmt_or_log::{debug, info};
use lss_common::{
    lss::{bit_rate_table_index, LssAddress, LssCommandSpecifier, LssRequest, LssResponse},
    node_id::NodeId,
    traits::CanSender,
};

use crate::{
    session::{PendingCommand, Session, SessionState},
    status::LssStatus,
    timeout::TimeoutTick,
};

/// Which 32-bit (or 8-bit, zero-extended) field [`Session::inquire`] should fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InquireKind {
    Vendor,
    Product,
    Rev,
    Serial,
    NodeId,
}

impl InquireKind {
    fn pending(self) -> PendingCommand {
        match self {
            InquireKind::Vendor => PendingCommand::InquireVendor,
            InquireKind::Product => PendingCommand::InquireProduct,
            InquireKind::Rev => PendingCommand::InquireRev,
            InquireKind::Serial => PendingCommand::InquireSerial,
            InquireKind::NodeId => PendingCommand::InquireGeneric,
        }
    }

    fn request(self) -> LssRequest {
        match self {
            InquireKind::Vendor => LssRequest::InquireVendor,
            InquireKind::Product => LssRequest::InquireProduct,
            InquireKind::Rev => LssRequest::InquireRev,
            InquireKind::Serial => LssRequest::InquireSerial,
            InquireKind::NodeId => LssRequest::InquireNodeId,
        }
    }

    fn expected_cs(self) -> LssCommandSpecifier {
        match self {
            InquireKind::Vendor => LssCommandSpecifier::InquireVendor,
            InquireKind::Product => LssCommandSpecifier::InquireProduct,
            InquireKind::Rev => LssCommandSpecifier::InquireRev,
            InquireKind::Serial => LssCommandSpecifier::InquireSerial,
            InquireKind::NodeId => LssCommandSpecifier::InquireNodeId,
        }
    }
}

fn status_from_error_byte(error: u8, manufacturer_code: u8) -> LssStatus {
    match error {
        0 => LssStatus::Ok,
        0xFF => LssStatus::OkManufacturer(manufacturer_code),
        other => LssStatus::OkIllegalArg(other),
    }
}

fn extract_inquire_value(resp: LssResponse) -> u32 {
    match resp {
        LssResponse::InquireVendorAck { vendor_id } => vendor_id,
        LssResponse::InquireProductAck { product_code } => product_code,
        LssResponse::InquireRevAck { revision_number } => revision_number,
        LssResponse::InquireSerialAck { serial_number } => serial_number,
        LssResponse::InquireNodeIdAck { node_id } => node_id as u32,
        _ => unreachable!("cs match guarantees the matching response variant"),
    }
}

/// Outcome of a single mailbox poll against an in-flight confirmed service.
enum ConfirmedPoll {
    Waiting,
    Timeout,
    Reply(LssResponse),
}

impl<'a, S: CanSender> Session<'a, S> {
    /// Poll the mailbox for a reply to the expected command specifier (spec.md §4.E).
    ///
    /// A frame whose cs does not match (or that fails to decode) is discarded and this call
    /// falls through to the timeout check in the same tick, exactly as an empty mailbox would.
    fn poll_confirmed(&mut self, delta_us: u32, expected_cs: LssCommandSpecifier) -> ConfirmedPoll {
        if let Some(data) = self.mbox.take() {
            if let Ok((cs, resp)) = LssResponse::from_bytes(&data) {
                if cs == expected_cs {
                    return ConfirmedPoll::Reply(resp);
                }
            }
        }
        match self.timeout.tick(delta_us) {
            TimeoutTick::AwaitingSlave => ConfirmedPoll::Waiting,
            TimeoutTick::Timeout => ConfirmedPoll::Timeout,
        }
    }

    /// Selective switch: puts exactly the slave matching `address` into Configuration mode
    /// (spec.md §4.D). Requires `sessionState == Waiting`; emits all four address frames in
    /// one call, then awaits the matching slave's confirm (cs `0x44`).
    pub fn switch_state_selective(&mut self, delta_us: u32, address: LssAddress) -> LssStatus {
        match self.pending {
            PendingCommand::None => {
                if self.state != SessionState::Waiting {
                    return LssStatus::InvalidState;
                }
                self.begin(PendingCommand::SwitchState);
                self.send_frame(LssRequest::SwitchStateVendor {
                    vendor_id: address.vendor_id,
                });
                self.send_frame(LssRequest::SwitchStateProduct {
                    product_code: address.product_code,
                });
                self.send_frame(LssRequest::SwitchStateRevision {
                    revision_number: address.revision_number,
                });
                self.send_frame(LssRequest::SwitchStateSerial {
                    serial_number: address.serial_number,
                });
                LssStatus::AwaitingSlave
            }
            PendingCommand::SwitchState => {
                match self.poll_confirmed(delta_us, LssCommandSpecifier::SwitchStateConfirm) {
                    ConfirmedPoll::Waiting => LssStatus::AwaitingSlave,
                    ConfirmedPoll::Timeout => {
                        debug!("LSS switch_state_selective: timed out awaiting confirm");
                        self.fail_to_waiting();
                        LssStatus::Timeout
                    }
                    ConfirmedPoll::Reply(LssResponse::SwitchStateConfirm) => {
                        self.finish();
                        self.state = SessionState::SelectedOne;
                        info!("LSS session -> SelectedOne (selective switch confirmed)");
                        LssStatus::Ok
                    }
                    ConfirmedPoll::Reply(_) => unreachable!(),
                }
            }
            _ => LssStatus::InvalidState,
        }
    }

    /// Convenience wrapper for the deselect service named in spec.md §6's abstract entry-point
    /// list; identical to [`Session::deselect`].
    pub fn switch_state_deselect(&mut self) -> LssStatus {
        self.deselect()
    }

    /// Assign a node ID (spec.md §4.B, cs `0x11`). A `Configured` ID requires
    /// `sessionState == SelectedOne` (assign the selected slave a real address); `Unconfigured`
    /// (`255`) requires `GlobalConfig` (factory-reset every slave's node ID at once, spec.md §6).
    /// Range validity itself is enforced by [`NodeId`]'s constructor, not here.
    pub fn configure_node_id(&mut self, delta_us: u32, node_id: NodeId) -> LssStatus {
        match self.pending {
            PendingCommand::None => {
                let state_ok = match node_id {
                    NodeId::Configured(_) => self.state == SessionState::SelectedOne,
                    NodeId::Unconfigured => self.state == SessionState::GlobalConfig,
                };
                if !state_ok {
                    return LssStatus::InvalidState;
                }
                self.begin(PendingCommand::CfgNodeId);
                self.send_frame(LssRequest::ConfigureNodeId {
                    node_id: node_id.raw(),
                });
                LssStatus::AwaitingSlave
            }
            PendingCommand::CfgNodeId => {
                match self.poll_confirmed(delta_us, LssCommandSpecifier::ConfigureNodeId) {
                    ConfirmedPoll::Waiting => LssStatus::AwaitingSlave,
                    ConfirmedPoll::Timeout => {
                        debug!("LSS configure_node_id: timed out awaiting confirm");
                        self.fail_to_waiting();
                        LssStatus::Timeout
                    }
                    ConfirmedPoll::Reply(LssResponse::ConfigureNodeIdAck { error, spec_error }) => {
                        self.finish();
                        let status = status_from_error_byte(error, spec_error);
                        info!("LSS configure_node_id confirmed: {:?}", status);
                        status
                    }
                    ConfirmedPoll::Reply(_) => unreachable!(),
                }
            }
            _ => LssStatus::InvalidState,
        }
    }

    /// Assign a bit rate to the selected slave (spec.md §4.B, cs `0x13`). `bit_rate_kbps` is
    /// looked up in the standardized table (spec.md §6); an unlisted rate is rejected with
    /// `IllegalArgument` before anything is sent.
    pub fn configure_bit_timing(&mut self, delta_us: u32, bit_rate_kbps: u32) -> LssStatus {
        match self.pending {
            PendingCommand::None => {
                if self.state != SessionState::SelectedOne {
                    return LssStatus::InvalidState;
                }
                let Some(index) = bit_rate_table_index(bit_rate_kbps) else {
                    return LssStatus::IllegalArgument;
                };
                self.begin(PendingCommand::CfgBitTiming);
                self.send_frame(LssRequest::ConfigureBitTiming { table: 0, index });
                LssStatus::AwaitingSlave
            }
            PendingCommand::CfgBitTiming => {
                match self.poll_confirmed(delta_us, LssCommandSpecifier::ConfigureBitTiming) {
                    ConfirmedPoll::Waiting => LssStatus::AwaitingSlave,
                    ConfirmedPoll::Timeout => {
                        debug!("LSS configure_bit_timing: timed out awaiting confirm");
                        self.fail_to_waiting();
                        LssStatus::Timeout
                    }
                    ConfirmedPoll::Reply(LssResponse::ConfigureBitTimingAck { error, spec_error }) => {
                        self.finish();
                        let status = status_from_error_byte(error, spec_error);
                        info!("LSS configure_bit_timing confirmed: {:?}", status);
                        status
                    }
                    ConfirmedPoll::Reply(_) => unreachable!(),
                }
            }
            _ => LssStatus::InvalidState,
        }
    }

    /// Commit node ID and bit rate to the selected slave's non-volatile storage (spec.md §4.B,
    /// cs `0x17`). Requires `sessionState == SelectedOne`.
    pub fn configure_store(&mut self, delta_us: u32) -> LssStatus {
        match self.pending {
            PendingCommand::None => {
                if self.state != SessionState::SelectedOne {
                    return LssStatus::InvalidState;
                }
                self.begin(PendingCommand::CfgStore);
                self.send_frame(LssRequest::StoreConfiguration);
                LssStatus::AwaitingSlave
            }
            PendingCommand::CfgStore => {
                match self.poll_confirmed(delta_us, LssCommandSpecifier::StoreConfiguration) {
                    ConfirmedPoll::Waiting => LssStatus::AwaitingSlave,
                    ConfirmedPoll::Timeout => {
                        debug!("LSS configure_store: timed out awaiting confirm");
                        self.fail_to_waiting();
                        LssStatus::Timeout
                    }
                    ConfirmedPoll::Reply(LssResponse::StoreConfigurationAck { error, spec_error }) => {
                        self.finish();
                        let status = status_from_error_byte(error, spec_error);
                        info!("LSS configure_store confirmed: {:?}", status);
                        status
                    }
                    ConfirmedPoll::Reply(_) => unreachable!(),
                }
            }
            _ => LssStatus::InvalidState,
        }
    }

    /// Tell every slave in `GlobalConfig` to switch to its newly configured bit rate after
    /// `switch_delay_ms` (spec.md §4.B, cs `0x15`). Non-confirmed: completes synchronously.
    pub fn activate_bit_timing(&mut self, switch_delay_ms: u16) -> LssStatus {
        if self.state != SessionState::GlobalConfig {
            return LssStatus::InvalidState;
        }
        self.send_frame(LssRequest::ActivateBitTiming { switch_delay_ms });
        info!("LSS activate_bit_timing sent, switch_delay_ms={}", switch_delay_ms);
        LssStatus::Ok
    }

    /// Fetch a single field of the selected slave's LSS address, or its currently assigned node
    /// ID (spec.md §6, `inquire(cs, &out)`). Requires `sessionState == SelectedOne`.
    pub fn inquire(&mut self, delta_us: u32, kind: InquireKind, out: &mut u32) -> LssStatus {
        let cmd = kind.pending();
        match self.pending {
            PendingCommand::None => {
                if self.state != SessionState::SelectedOne {
                    return LssStatus::InvalidState;
                }
                self.begin(cmd);
                self.send_frame(kind.request());
                LssStatus::AwaitingSlave
            }
            pending if pending == cmd => match self.poll_confirmed(delta_us, kind.expected_cs()) {
                ConfirmedPoll::Waiting => LssStatus::AwaitingSlave,
                ConfirmedPoll::Timeout => {
                    debug!("LSS inquire({:?}): timed out awaiting reply", kind);
                    self.fail_to_waiting();
                    LssStatus::Timeout
                }
                ConfirmedPoll::Reply(resp) => {
                    self.finish();
                    *out = extract_inquire_value(resp);
                    info!("LSS inquire({:?}) confirmed: {}", kind, *out);
                    LssStatus::Ok
                }
            },
            _ => LssStatus::InvalidState,
        }
    }

    /// Compose the four single-field inquiries into one full [`LssAddress`] (spec.md §4.E,
    /// "the four-step address inquiry"). The caller polls this one entry point until it returns
    /// `Ok` with `*out` populated; intermediate per-field successes never escape to the caller.
    pub fn inquire_lss_address(&mut self, delta_us: u32, out: &mut LssAddress) -> LssStatus {
        loop {
            let kind = match self.inquire_step {
                0 => InquireKind::Vendor,
                1 => InquireKind::Product,
                2 => InquireKind::Rev,
                3 => InquireKind::Serial,
                _ => return LssStatus::InvalidState,
            };
            let mut value = 0u32;
            match self.inquire(delta_us, kind, &mut value) {
                LssStatus::AwaitingSlave => return LssStatus::AwaitingSlave,
                LssStatus::Ok => {
                    self.inquire_accum = self.inquire_accum.with_field(self.inquire_step, value);
                    if self.inquire_step == 3 {
                        self.inquire_step = 0;
                        *out = self.inquire_accum;
                        return LssStatus::Ok;
                    }
                    self.inquire_step += 1;
                }
                other => {
                    self.inquire_step = 0;
                    return other;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox::Mailbox;
    use crate::session::tests::RecordingSender;
    use lss_common::can::CanId;

    fn new_session(mbox: &Mailbox) -> Session<'_, RecordingSender> {
        Session::init(
            mbox,
            RecordingSender::new(),
            10,
            CanId::Std(0x7E5),
            CanId::Std(0x7E4),
        )
        .unwrap()
    }

    fn reply(response: LssResponse) -> [u8; 8] {
        response.to_frame(CanId::Std(0x7E4)).data
    }

    #[test]
    fn switch_state_selective_selects_matching_slave() {
        let mbox = Mailbox::new();
        let mut session = new_session(&mbox);
        let address = LssAddress::new(1, 2, 3, 4);
        assert_eq!(
            session.switch_state_selective(0, address),
            LssStatus::AwaitingSlave
        );
        assert_eq!(session.sender.sent.len(), 4);
        let data = reply(LssResponse::SwitchStateConfirm);
        mbox.arm();
        mbox.on_frame_received(data);
        assert_eq!(
            session.switch_state_selective(1, address),
            LssStatus::Ok
        );
        assert_eq!(session.session_state(), SessionState::SelectedOne);
    }

    #[test]
    fn configure_node_id_enforces_state_per_variant() {
        let mbox = Mailbox::new();
        let mut session = new_session(&mbox);
        let configured = NodeId::new(5).unwrap();
        // Configured requires SelectedOne.
        assert_eq!(
            session.configure_node_id(0, configured),
            LssStatus::InvalidState
        );
        // Unconfigured (255, factory reset) requires GlobalConfig.
        assert_eq!(
            session.configure_node_id(0, NodeId::Unconfigured),
            LssStatus::InvalidState
        );
        session.state = SessionState::GlobalConfig;
        assert_eq!(
            session.configure_node_id(0, NodeId::Unconfigured),
            LssStatus::AwaitingSlave
        );
    }

    #[test]
    fn configure_node_id_reports_manufacturer_and_illegal_arg_errors() {
        let mbox = Mailbox::new();
        let mut session = new_session(&mbox);
        let node_id = NodeId::new(5).unwrap();
        session.state = SessionState::SelectedOne;
        assert_eq!(
            session.configure_node_id(0, node_id),
            LssStatus::AwaitingSlave
        );
        let data = reply(LssResponse::ConfigureNodeIdAck {
            error: 0xFF,
            spec_error: 7,
        });
        mbox.arm();
        mbox.on_frame_received(data);
        assert_eq!(
            session.configure_node_id(1, node_id),
            LssStatus::OkManufacturer(7)
        );

        session.state = SessionState::SelectedOne;
        assert_eq!(
            session.configure_node_id(0, node_id),
            LssStatus::AwaitingSlave
        );
        let data = reply(LssResponse::ConfigureNodeIdAck {
            error: 1,
            spec_error: 0,
        });
        mbox.arm();
        mbox.on_frame_received(data);
        assert_eq!(
            session.configure_node_id(1, node_id),
            LssStatus::OkIllegalArg(1)
        );
    }

    #[test]
    fn configure_bit_timing_rejects_unlisted_rate() {
        let mbox = Mailbox::new();
        let mut session = new_session(&mbox);
        session.state = SessionState::SelectedOne;
        assert_eq!(
            session.configure_bit_timing(0, 5),
            LssStatus::IllegalArgument
        );
        assert_eq!(
            session.configure_bit_timing(0, 123),
            LssStatus::IllegalArgument
        );
    }

    #[test]
    fn activate_bit_timing_requires_global_config() {
        let mbox = Mailbox::new();
        let mut session = new_session(&mbox);
        assert_eq!(
            session.activate_bit_timing(100),
            LssStatus::InvalidState
        );
        session.state = SessionState::GlobalConfig;
        assert_eq!(session.activate_bit_timing(100), LssStatus::Ok);
        let frame = session.sender.sent.last().unwrap();
        assert_eq!(frame.data, [0x15, 0, 0x64, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn reply_cs_mismatch_is_discarded_and_times_out() {
        let mbox = Mailbox::new();
        let mut session = new_session(&mbox);
        session.state = SessionState::SelectedOne;
        let node_id = NodeId::new(5).unwrap();
        assert_eq!(
            session.configure_node_id(0, node_id),
            LssStatus::AwaitingSlave
        );
        // Inject an unrelated inquire-vendor reply while awaiting configure-node-id confirm.
        let data = reply(LssResponse::InquireVendorAck { vendor_id: 1 });
        mbox.arm();
        mbox.on_frame_received(data);
        assert_eq!(
            session.configure_node_id(5_000, node_id),
            LssStatus::AwaitingSlave
        );
        assert_eq!(
            session.configure_node_id(10_000, node_id),
            LssStatus::Timeout
        );
        assert_eq!(session.session_state(), SessionState::Waiting);
    }

    #[test]
    fn inquire_lss_address_composes_all_four_fields() {
        let mbox = Mailbox::new();
        let mut session = new_session(&mbox);
        session.state = SessionState::SelectedOne;
        let mut out = LssAddress::new(0, 0, 0, 0);

        assert_eq!(
            session.inquire_lss_address(0, &mut out),
            LssStatus::AwaitingSlave
        );
        mbox.arm();
        mbox.on_frame_received(reply(LssResponse::InquireVendorAck { vendor_id: 10 }));
        assert_eq!(
            session.inquire_lss_address(1, &mut out),
            LssStatus::AwaitingSlave
        );
        mbox.on_frame_received(reply(LssResponse::InquireProductAck { product_code: 20 }));
        assert_eq!(
            session.inquire_lss_address(1, &mut out),
            LssStatus::AwaitingSlave
        );
        mbox.on_frame_received(reply(LssResponse::InquireRevAck {
            revision_number: 30,
        }));
        assert_eq!(
            session.inquire_lss_address(1, &mut out),
            LssStatus::AwaitingSlave
        );
        mbox.on_frame_received(reply(LssResponse::InquireSerialAck { serial_number: 40 }));
        assert_eq!(session.inquire_lss_address(1, &mut out), LssStatus::Ok);
        assert_eq!(out, LssAddress::new(10, 20, 30, 40));
    }
}
