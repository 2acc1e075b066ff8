//! The Fastscan identification engine (spec.md §4.F, component F).

use defmt_or_log::{debug, info};
use lss_common::{
    lss::{LssAddress, LssCommandSpecifier, LssRequest, LssResponse, FASTSCAN_CHECK_BIT},
    traits::CanSender,
};

use crate::{
    session::{PendingCommand, Session, SessionState},
    status::LssStatus,
    timeout::TimeoutTick,
};

/// Per-sub-field instruction for [`Session::identify_fastscan`] (spec.md §4.F, "Skipping").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FastscanDirective {
    /// Binary-search this sub-field from scratch.
    Scan,
    /// Skip the binary search and verify this caller-supplied value directly.
    Match(u32),
    /// Do not participate in this sub-field at all.
    Skip,
}

/// The per-sub-field directives for one Fastscan run, in `[vendor, product, revision, serial]`
/// order (spec.md §6, `identifyFastscan(&fastscanIO)`).
#[derive(Debug, Clone, Copy)]
pub struct FastscanIo {
    pub directives: [FastscanDirective; 4],
}

impl FastscanIo {
    /// Binary-search all four sub-fields from scratch.
    pub const fn scan_all() -> Self {
        Self {
            directives: [FastscanDirective::Scan; 4],
        }
    }
}

impl Default for FastscanIo {
    fn default() -> Self {
        Self::scan_all()
    }
}

fn validate_directives(directives: &[FastscanDirective; 4]) -> Result<(), LssStatus> {
    if directives[0] == FastscanDirective::Skip {
        return Err(LssStatus::IllegalArgument);
    }
    let skipped = directives
        .iter()
        .filter(|d| **d == FastscanDirective::Skip)
        .count();
    if skipped > 2 {
        return Err(LssStatus::IllegalArgument);
    }
    Ok(())
}

fn next_active(directives: &[FastscanDirective; 4], from: u8) -> Option<u8> {
    (from..4).find(|&i| directives[i as usize] != FastscanDirective::Skip)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FastscanPhase {
    Check,
    Scan,
    Verify,
}

/// `fastscanState` (spec.md §3): all state that survives between ticks of a Fastscan run.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FastscanProgress {
    phase: FastscanPhase,
    directives: [FastscanDirective; 4],
    sub_field: u8,
    /// The sub-field a successful Verify of `sub_field` will advance to. Equal to `sub_field`
    /// itself when this is the last active sub-field (spec.md §4.F names no wire value for "no
    /// next field"; using the current index is self-consistent and distinguishable from every
    /// legal forward transition, since `next_active` only ever returns indices `> sub_field`).
    next_field: u8,
    bit_index: u8,
    accumulator: u32,
    address: LssAddress,
}

impl Default for FastscanProgress {
    fn default() -> Self {
        Self {
            phase: FastscanPhase::Check,
            directives: [FastscanDirective::Scan; 4],
            sub_field: 0,
            next_field: 0,
            bit_index: 31,
            accumulator: 0,
            address: LssAddress::new(0, 0, 0, 0),
        }
    }
}

enum FastscanPoll {
    Waiting,
    Ack,
    WrongCs,
    TimedOut,
}

impl<'a, S: CanSender> Session<'a, S> {
    /// Drive one phase-step of Fastscan identification (spec.md §4.F).
    ///
    /// Call-multiple-times: the first call (with `pendingCommand == None`) validates `io` and
    /// emits the Check frame; every subsequent call advances exactly one phase-step until
    /// [`LssStatus::ScanFinished`], [`LssStatus::ScanNoAck`], or [`LssStatus::ScanFailed`].
    pub fn identify_fastscan(&mut self, delta_us: u32, io: &FastscanIo) -> LssStatus {
        match self.pending {
            PendingCommand::None => {
                if self.state != SessionState::Waiting {
                    return LssStatus::InvalidState;
                }
                if let Err(status) = validate_directives(&io.directives) {
                    return status;
                }
                self.fastscan = FastscanProgress {
                    directives: io.directives,
                    ..FastscanProgress::default()
                };
                self.begin(PendingCommand::Fastscan);
                self.send_frame(LssRequest::FastScan {
                    id_number: 0,
                    bit_check: FASTSCAN_CHECK_BIT,
                    lss_sub: 0,
                    lss_next: 0,
                });
                debug!("LSS fastscan: Check phase started");
                LssStatus::AwaitingSlave
            }
            PendingCommand::Fastscan => self.drive_fastscan(delta_us),
            _ => LssStatus::InvalidState,
        }
    }

    fn drive_fastscan(&mut self, delta_us: u32) -> LssStatus {
        match self.fastscan.phase {
            FastscanPhase::Check => self.drive_check(delta_us),
            FastscanPhase::Scan => self.drive_scan(delta_us),
            FastscanPhase::Verify => self.drive_verify(delta_us),
        }
    }

    fn poll_fastscan_mailbox(&mut self, delta_us: u32) -> FastscanPoll {
        if let Some(data) = self.mbox.take() {
            return match LssResponse::from_bytes(&data) {
                Ok((LssCommandSpecifier::IdentifySlave, _)) => FastscanPoll::Ack,
                _ => FastscanPoll::WrongCs,
            };
        }
        match self.timeout.tick(delta_us) {
            TimeoutTick::AwaitingSlave => FastscanPoll::Waiting,
            TimeoutTick::Timeout => FastscanPoll::TimedOut,
        }
    }

    fn drive_check(&mut self, delta_us: u32) -> LssStatus {
        match self.poll_fastscan_mailbox(delta_us) {
            FastscanPoll::Waiting => LssStatus::AwaitingSlave,
            FastscanPoll::WrongCs => {
                debug!("LSS fastscan: Check phase saw an unrelated reply");
                self.fail_to_waiting();
                LssStatus::ScanFailed
            }
            FastscanPoll::TimedOut => {
                debug!("LSS fastscan: Check phase got no ack");
                self.fail_to_waiting();
                LssStatus::ScanNoAck
            }
            FastscanPoll::Ack => {
                // Vendor (sub-field 0) can never be Skip, so this is always Some.
                let first = next_active(&self.fastscan.directives, 0).unwrap_or(0);
                debug!("LSS fastscan: Check acked, entering sub-field {}", first);
                self.enter_subfield(first);
                LssStatus::AwaitingSlave
            }
        }
    }

    fn drive_scan(&mut self, delta_us: u32) -> LssStatus {
        match self.poll_fastscan_mailbox(delta_us) {
            FastscanPoll::Waiting => LssStatus::AwaitingSlave,
            FastscanPoll::WrongCs => {
                debug!("LSS fastscan: Scan phase saw an unrelated reply");
                self.fail_to_waiting();
                LssStatus::ScanFailed
            }
            FastscanPoll::Ack => self.advance_scan_bit(false),
            FastscanPoll::TimedOut => self.advance_scan_bit(true),
        }
    }

    fn drive_verify(&mut self, delta_us: u32) -> LssStatus {
        match self.poll_fastscan_mailbox(delta_us) {
            FastscanPoll::Waiting => LssStatus::AwaitingSlave,
            FastscanPoll::WrongCs | FastscanPoll::TimedOut => {
                debug!("LSS fastscan: Verify phase saw an unrelated reply or timed out");
                self.fail_to_waiting();
                LssStatus::ScanFailed
            }
            FastscanPoll::Ack => {
                let sub = self.fastscan.sub_field;
                let value = self.fastscan.accumulator;
                self.fastscan.address = self.fastscan.address.with_field(sub, value);
                let next = self.fastscan.next_field;
                if next == sub {
                    self.finish();
                    self.state = SessionState::SelectedOne;
                    info!(
                        "LSS session -> SelectedOne (fastscan finished: {:?})",
                        self.fastscan.address
                    );
                    LssStatus::ScanFinished(self.fastscan.address)
                } else {
                    debug!("LSS fastscan: sub-field {} verified, advancing to {}", sub, next);
                    self.enter_subfield(next);
                    LssStatus::AwaitingSlave
                }
            }
        }
    }

    /// Advance the bit under test after a Scan-phase reply (`bit_is_one == false`) or timeout
    /// (`bit_is_one == true`), per spec.md §4.F.2.
    fn advance_scan_bit(&mut self, bit_is_one: bool) -> LssStatus {
        if bit_is_one {
            self.fastscan.accumulator |= 1u32 << self.fastscan.bit_index;
        }
        if self.fastscan.bit_index == 0 {
            self.fastscan.phase = FastscanPhase::Verify;
            self.emit_verify_frame();
        } else {
            self.fastscan.bit_index -= 1;
            self.emit_scan_frame();
        }
        LssStatus::AwaitingSlave
    }

    /// Begin processing sub-field `idx`: either the 32-bit binary search (`Scan`) or a direct
    /// Verify of a caller-supplied value (`Match`).
    fn enter_subfield(&mut self, idx: u8) {
        self.fastscan.sub_field = idx;
        match self.fastscan.directives[idx as usize] {
            FastscanDirective::Scan => {
                self.fastscan.phase = FastscanPhase::Scan;
                self.fastscan.bit_index = 31;
                self.fastscan.accumulator = 0;
                self.emit_scan_frame();
            }
            FastscanDirective::Match(value) => {
                self.fastscan.phase = FastscanPhase::Verify;
                self.fastscan.accumulator = value;
                self.emit_verify_frame();
            }
            FastscanDirective::Skip => unreachable!("skip sub-fields are never entered"),
        }
    }

    fn emit_scan_frame(&mut self) {
        let sub = self.fastscan.sub_field;
        self.send_frame(LssRequest::FastScan {
            id_number: self.fastscan.accumulator,
            bit_check: self.fastscan.bit_index,
            lss_sub: sub,
            lss_next: sub,
        });
        self.timeout.reset();
    }

    fn emit_verify_frame(&mut self) {
        let sub = self.fastscan.sub_field;
        let next = next_active(&self.fastscan.directives, sub + 1).unwrap_or(sub);
        self.fastscan.next_field = next;
        self.send_frame(LssRequest::FastScan {
            id_number: self.fastscan.accumulator,
            bit_check: 0,
            lss_sub: sub,
            lss_next: next,
        });
        self.timeout.reset();
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
            50,
            CanId::Std(0x7E5),
            CanId::Std(0x7E4),
        )
        .unwrap()
    }

    /// Drives a full Fastscan run to completion against an in-memory slave model, using the same
    /// "absence of reply encodes bit one" oracle the real slave uses.
    fn run_fastscan(session: &mut Session<'_, RecordingSender>, io: &FastscanIo, address: LssAddress) -> LssStatus {
        let mut status = session.identify_fastscan(0, io);
        assert_eq!(status, LssStatus::AwaitingSlave);
        loop {
            let frame = session.sender.sent.last().unwrap();
            let request = LssRequest::from_bytes(&frame.data).unwrap();
            match request {
                LssRequest::FastScan {
                    id_number,
                    bit_check,
                    lss_sub,
                    ..
                } => {
                    let field_value = address.field(lss_sub);
                    let acks = if bit_check == FASTSCAN_CHECK_BIT {
                        true
                    } else {
                        let mask = 0xFFFF_FFFFu32 << bit_check;
                        (id_number & mask) == (field_value & mask)
                    };
                    if acks {
                        session.mbox.arm();
                        session.mbox.on_frame_received(
                            LssResponse::IdentifySlave.to_frame(CanId::Std(0x7E4)).data,
                        );
                        status = session.identify_fastscan(1, io);
                    } else {
                        // advance past the timeout window in one jump
                        status = session.identify_fastscan(1_000_000, io);
                    }
                }
                _ => unreachable!(),
            }
            if status.is_terminal() {
                return status;
            }
        }
    }

    #[test]
    fn fastscan_finds_single_slave() {
        let mbox = Mailbox::new();
        let mut session = new_session(&mbox);
        let address = LssAddress::new(1, 2, 3, 4);
        let status = run_fastscan(&mut session, &FastscanIo::scan_all(), address);
        assert_eq!(status, LssStatus::ScanFinished(address));
        assert_eq!(session.session_state(), SessionState::SelectedOne);
        // 1 Check + 4 * (32 Scan + 1 Verify) = 133 frames.
        assert_eq!(session.sender.sent.len(), 133);
    }

    #[test]
    fn fastscan_no_ack_on_check() {
        let mbox = Mailbox::new();
        let mut session = new_session(&mbox);
        let status = session.identify_fastscan(0, &FastscanIo::scan_all());
        assert_eq!(status, LssStatus::AwaitingSlave);
        let status = session.identify_fastscan(1_000_000, &FastscanIo::scan_all());
        assert_eq!(status, LssStatus::ScanNoAck);
        assert_eq!(session.session_state(), SessionState::Waiting);
        assert_eq!(session.pending_command(), PendingCommand::None);
    }

    #[test]
    fn fastscan_rejects_vendor_skip() {
        let mbox = Mailbox::new();
        let mut session = new_session(&mbox);
        let mut io = FastscanIo::scan_all();
        io.directives[0] = FastscanDirective::Skip;
        assert_eq!(
            session.identify_fastscan(0, &io),
            LssStatus::IllegalArgument
        );
    }

    #[test]
    fn fastscan_rejects_too_many_skips() {
        let mbox = Mailbox::new();
        let mut session = new_session(&mbox);
        let io = FastscanIo {
            directives: [
                FastscanDirective::Scan,
                FastscanDirective::Skip,
                FastscanDirective::Skip,
                FastscanDirective::Skip,
            ],
        };
        assert_eq!(
            session.identify_fastscan(0, &io),
            LssStatus::IllegalArgument
        );
    }

    #[test]
    fn fastscan_with_match_skips_binary_search() {
        let mbox = Mailbox::new();
        let mut session = new_session(&mbox);
        let address = LssAddress::new(1, 2, 3, 4);
        let io = FastscanIo {
            directives: [
                FastscanDirective::Match(1),
                FastscanDirective::Scan,
                FastscanDirective::Scan,
                FastscanDirective::Scan,
            ],
        };
        let status = run_fastscan(&mut session, &io, address);
        assert_eq!(status, LssStatus::ScanFinished(address));
        // 1 Check + 1 Verify(vendor) + 3 * (32 Scan + 1 Verify) = 101.
        assert_eq!(session.sender.sent.len(), 101);
    }
}
