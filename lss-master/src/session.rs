//! The session record and the top-level state machine (spec.md §3, §4.D).

use defmt_or_log::{debug, warn};
use lss_common::{
    can::CanId,
    lss::{LssAddress, LssMode, LssRequest},
    traits::CanSender,
};

use crate::{fastscan::FastscanProgress, mailbox::Mailbox, status::LssStatus, timeout::TimeoutAccumulator};

/// The top-level session state (spec.md §4.D).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// The default state. No slave is selected and no global configuration mode is active.
    Waiting,
    /// Exactly one slave has been put into configuration mode via a selective switch or a
    /// completed Fastscan.
    SelectedOne,
    /// All slaves on the bus are in configuration mode (global switch).
    GlobalConfig,
}

/// The confirmed (or Fastscan) service currently awaiting a reply, if any (spec.md §3).
///
/// `pendingCommand == None` is the session's idle state; invariant 1 in spec.md §3 ties it
/// one-to-one with "the master is not awaiting any slave reply".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingCommand {
    None,
    SwitchState,
    CfgBitTiming,
    CfgNodeId,
    CfgStore,
    InquireVendor,
    InquireProduct,
    InquireRev,
    InquireSerial,
    InquireGeneric,
    Fastscan,
}

/// The LSS master session: one instance per CAN interface (spec.md §3, "process-wide mutable
/// record, singleton per CAN interface").
///
/// `S` is the caller's transmit binding (spec.md §4.A's preallocated tx descriptor); `'a` ties
/// the session to the [`Mailbox`] the CAN driver's receive callback writes into.
#[allow(missing_debug_implementations)]
pub struct Session<'a, S: CanSender> {
    pub(crate) sender: S,
    pub(crate) mbox: &'a Mailbox,
    pub(crate) master_id: CanId,
    pub(crate) slave_id: CanId,
    pub(crate) state: SessionState,
    pub(crate) pending: PendingCommand,
    pub(crate) timeout: TimeoutAccumulator,
    pub(crate) fastscan: FastscanProgress,
    /// Sub-field cursor for [`Session::inquire_lss_address`]'s composed four-step inquiry
    /// (0=vendor..3=serial). Unrelated to `fastscanState`'s own `subField`.
    pub(crate) inquire_step: u8,
    pub(crate) inquire_accum: LssAddress,
}

impl<'a, S: CanSender> Session<'a, S> {
    /// Bind a session to its mailbox and transmit path (spec.md §4.A).
    ///
    /// Fails with [`LssStatus::IllegalArgument`] if `timeout_ms` is zero, the two CAN
    /// identifiers are identical (a CAN driver handle cannot be "null" in Rust the way spec.md's
    /// abstract signature frames it, so that part of the guard is enforced by the type system
    /// instead — see `DESIGN.md`), or either identifier is not a standard 11-bit ID within LSS's
    /// own filter mask (spec.md §6).
    pub fn init(
        mbox: &'a Mailbox,
        sender: S,
        timeout_ms: u32,
        master_id: CanId,
        slave_id: CanId,
    ) -> Result<Self, LssStatus> {
        if timeout_ms == 0
            || master_id == slave_id
            || !master_id.is_valid_lss_id()
            || !slave_id.is_valid_lss_id()
        {
            return Err(LssStatus::IllegalArgument);
        }
        let timeout_us = timeout_ms
            .checked_mul(1000)
            .ok_or(LssStatus::IllegalArgument)?;
        Ok(Self {
            sender,
            mbox,
            master_id,
            slave_id,
            state: SessionState::Waiting,
            pending: PendingCommand::None,
            timeout: TimeoutAccumulator::new(timeout_us),
            fastscan: FastscanProgress::default(),
            inquire_step: 0,
            inquire_accum: LssAddress::new(0, 0, 0, 0),
        })
    }

    /// Live-update the timeout window (spec.md §3: "live-settable").
    pub fn change_timeout(&mut self, timeout_ms: u32) -> LssStatus {
        match timeout_ms.checked_mul(1000) {
            Some(0) | None => LssStatus::IllegalArgument,
            Some(window_us) => {
                self.timeout.set_window_us(window_us);
                LssStatus::Ok
            }
        }
    }

    /// Register the host wake-signal callback (spec.md §4.A/§9, component G).
    pub fn set_wake_signal(&self, callback: &'static (dyn Fn() + Sync)) {
        self.mbox.set_wake_signal(callback);
    }

    /// Number of frames dropped by the receive callback (spec.md §9's recommended diagnostic).
    pub fn dropped_frame_count(&self) -> u32 {
        self.mbox.dropped_frame_count()
    }

    pub fn session_state(&self) -> SessionState {
        self.state
    }

    pub fn pending_command(&self) -> PendingCommand {
        self.pending
    }

    /// Unconditionally return every slave on the bus to `Waiting` mode (spec.md §5,
    /// "Cancellation / deselect").
    ///
    /// This is a non-confirmed service: it completes synchronously and is always safe to call,
    /// including twice in a row (spec.md §8, "Deselect idempotence").
    pub fn deselect(&mut self) -> LssStatus {
        self.send_global(LssMode::Waiting);
        self.mbox.disarm();
        self.pending = PendingCommand::None;
        self.state = SessionState::Waiting;
        debug!("LSS session -> Waiting (deselect)");
        LssStatus::Ok
    }

    /// Put every slave on the bus into configuration mode (spec.md §4.D,
    /// "Waiting -> switchGlobal(Config) sent -> GlobalConfig").
    ///
    /// Only legal from `Waiting` with no command pending; use [`Session::deselect`] first to
    /// leave `SelectedOne`.
    pub fn switch_global_config(&mut self) -> LssStatus {
        if self.state != SessionState::Waiting || self.pending != PendingCommand::None {
            return LssStatus::InvalidState;
        }
        self.send_global(LssMode::Configuration);
        self.state = SessionState::GlobalConfig;
        debug!("LSS session -> GlobalConfig");
        LssStatus::Ok
    }

    fn send_global(&mut self, mode: LssMode) {
        self.send_frame(LssRequest::SwitchModeGlobal { mode });
    }

    /// Encode and transmit a request frame to the slave(s). Non-blocking; a transmit failure
    /// (e.g. a full hardware FIFO) is logged and the frame is simply lost, same as a frame lost
    /// to bus noise — the timeout accumulator is what eventually surfaces that to the caller.
    pub(crate) fn send_frame(&mut self, request: LssRequest) {
        let frame = request.to_frame(self.master_id);
        if self.sender.send(frame).is_err() {
            warn!("LSS master: failed to transmit frame");
        }
    }

    /// Begin waiting for a reply to `cmd`: stamp `pendingCommand`, reset the timeout, and arm the
    /// mailbox (spec.md §4.E, "Idle + state-guard OK").
    pub(crate) fn begin(&mut self, cmd: PendingCommand) {
        self.pending = cmd;
        self.timeout.reset();
        self.mbox.arm();
    }

    /// Stop waiting: clear `pendingCommand` and disarm the mailbox.
    pub(crate) fn finish(&mut self) {
        self.pending = PendingCommand::None;
        self.mbox.disarm();
    }

    /// Reset to `Waiting` on any error worse than `Ok*` (spec.md §7).
    pub(crate) fn fail_to_waiting(&mut self) {
        self.finish();
        self.state = SessionState::Waiting;
        debug!("LSS session -> Waiting (confirmed service failed)");
    }
}
