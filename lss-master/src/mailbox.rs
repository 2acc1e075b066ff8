//! The single-slot receive mailbox shared between the CAN driver's receive path and the session's
//! own tick (spec.md §3, §5).
//!
//! This is the only concurrency surface in the crate: everything else is single-threaded,
//! cooperative, and touched only from the host's tick. [`Mailbox`] is deliberately a standalone
//! type (not a field buried inside [`crate::Session`]) so a `'static` instance can be created
//! once and handed both to the driver's receive callback and to the [`Session`](crate::Session)
//! that polls it, mirroring how `zencan_node::node_mbox::NodeMbox` is split out from `Node` for
//! the same reason.

use lss_common::AtomicCell;

type WakeFn = dyn Fn() + Sync;

/// The mailbox's "new frame present" slot plus the housekeeping the receive callback needs.
pub struct Mailbox {
    slot: AtomicCell<Option<[u8; 8]>>,
    awaiting: AtomicCell<bool>,
    dropped_frames: AtomicCell<u32>,
    wake: AtomicCell<Option<&'static WakeFn>>,
}

impl Mailbox {
    pub const fn new() -> Self {
        Self {
            slot: AtomicCell::new(None),
            awaiting: AtomicCell::new(false),
            dropped_frames: AtomicCell::new(0),
            wake: AtomicCell::new(None),
        }
    }

    /// Register a callback to be invoked (from the receive path) whenever a frame is accepted
    /// into the mailbox. This is spec.md §4.G, the "signal-to-host hook".
    pub fn set_wake_signal(&self, callback: &'static WakeFn) {
        self.wake.store(Some(callback));
    }

    /// Number of frames the receive callback has silently dropped, either because no command was
    /// pending or because the slot was already full (spec.md §9, the recommended diagnostic for
    /// the "wake signal under receive-drop" open question).
    pub fn dropped_frame_count(&self) -> u32 {
        self.dropped_frames.load()
    }

    /// Called from the CAN driver's receive path with an inbound frame's data.
    ///
    /// Implements the contract in spec.md §4.A: if a command is pending and the slot is empty,
    /// the frame is copied in and the wake signal (if any) fires; otherwise the frame is
    /// silently dropped (and counted).
    pub fn on_frame_received(&self, data: [u8; 8]) {
        if !self.awaiting.load() {
            self.dropped_frames.fetch_add(1);
            return;
        }
        let accepted = self
            .slot
            .fetch_update(|cur| match cur {
                None => Some(Some(data)),
                Some(_) => None,
            })
            .is_ok();
        if accepted {
            if let Some(wake) = self.wake.load() {
                wake();
            }
        } else {
            self.dropped_frames.fetch_add(1);
        }
    }

    /// Mark that the session is now awaiting a reply; frames are only accepted while this is set.
    pub(crate) fn arm(&self) {
        self.awaiting.store(true);
    }

    /// Stop accepting frames and discard anything left in the slot. Called once the session is
    /// done waiting (reply consumed, timed out, or the command was aborted).
    pub(crate) fn disarm(&self) {
        self.awaiting.store(false);
        self.slot.take();
    }

    /// Take the pending frame, if any, clearing the slot.
    pub(crate) fn take(&self) -> Option<[u8; 8]> {
        self.slot.take()
    }
}

impl Default for Mailbox {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn drops_when_not_awaiting() {
        let mbox = Mailbox::new();
        mbox.on_frame_received([1; 8]);
        assert_eq!(mbox.dropped_frame_count(), 1);
        assert!(mbox.take().is_none());
    }

    #[test]
    fn accepts_one_then_drops_until_taken() {
        let mbox = Mailbox::new();
        mbox.arm();
        mbox.on_frame_received([1; 8]);
        mbox.on_frame_received([2; 8]);
        assert_eq!(mbox.dropped_frame_count(), 1, "second frame must be dropped");
        assert_eq!(mbox.take(), Some([1; 8]));
        mbox.on_frame_received([3; 8]);
        assert_eq!(mbox.take(), Some([3; 8]));
    }

    #[test]
    fn wake_signal_fires_only_on_accept() {
        static COUNT: AtomicU32 = AtomicU32::new(0);
        let mbox = Mailbox::new();
        mbox.set_wake_signal(&|| {
            COUNT.fetch_add(1, Ordering::SeqCst);
        });
        mbox.on_frame_received([1; 8]); // not armed, dropped, no wake
        assert_eq!(COUNT.load(Ordering::SeqCst), 0);
        mbox.arm();
        mbox.on_frame_received([1; 8]);
        assert_eq!(COUNT.load(Ordering::SeqCst), 1);
        mbox.on_frame_received([2; 8]); // slot full, dropped, no wake
        assert_eq!(COUNT.load(Ordering::SeqCst), 1);
    }
}
