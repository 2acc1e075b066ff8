//! The return status set (spec.md §7).

use lss_common::lss::LssAddress;

/// The outcome of polling an LSS master entry point.
///
/// This is not a `std::error::Error` type — `AwaitingSlave`, `Ok`, and the `Ok*` variants are not
/// failures, they are the normal shape of a poll-driven confirmed service. Only the variants from
/// `Timeout` onward represent something the caller should treat as not-succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LssStatus {
    /// The service completed successfully.
    Ok,
    /// The slave reported a manufacturer-specific error code (spec.md §4.B, error byte `0xFF`).
    /// The `u8` is the manufacturer error code carried in the second payload byte.
    OkManufacturer(u8),
    /// The slave rejected the request with a standardized nonzero error code. Spec.md §9 notes
    /// that preserving this byte (rather than collapsing it to a bare marker) is a strict
    /// improvement over the reference behavior; this implementation does so.
    OkIllegalArg(u8),
    /// The service is in flight; poll again.
    AwaitingSlave,
    /// The expected reply did not arrive within the timeout window.
    Timeout,
    /// The requested service is not legal in the current session/pending-command state.
    InvalidState,
    /// A caller-supplied argument was out of range.
    IllegalArgument,
    /// Fastscan's Check phase found no unconfigured slaves listening.
    ScanNoAck,
    /// Fastscan's Scan or Verify phase saw a malformed response or an invalid directive vector.
    ScanFailed,
    /// Fastscan completed; exactly one slave was selected and is now in `SelectedOne`.
    ScanFinished(LssAddress),
}

impl LssStatus {
    /// True for every variant except `AwaitingSlave` — i.e. this tick's call is "done", whether
    /// it succeeded or not.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, LssStatus::AwaitingSlave)
    }

    /// True for the three success-ish variants (`Ok`, `OkManufacturer`, `OkIllegalArg`).
    ///
    /// Note this does *not* imply the slave accepted the argument — `OkIllegalArg` means the
    /// slave understood the request and rejected the value, which is a successfully completed
    /// round trip from the protocol's point of view, just not from the caller's.
    pub fn completed_round_trip(&self) -> bool {
        matches!(
            self,
            LssStatus::Ok | LssStatus::OkManufacturer(_) | LssStatus::OkIllegalArg(_)
        )
    }
}
