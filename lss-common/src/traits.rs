//! Traits the LSS master uses to reach the CAN driver.
//!
//! The CAN driver itself lives outside this crate (spec.md §1, "Out of scope — external
//! collaborators"); this is the seam the master's transmit path is written against.

use crate::can::CanFrame;

/// Transmits frames onto the bus. Implementations must not block (spec.md §5: "No entry point
/// ever blocks").
pub trait CanSender {
    /// Send a single frame. Returns the frame back on failure (e.g. a full hardware FIFO) so the
    /// caller can decide what to do; the LSS master itself never retries a send
    /// (spec.md §7, "the engine never retries internally").
    fn send(&mut self, frame: CanFrame) -> Result<(), CanFrame>;
}
