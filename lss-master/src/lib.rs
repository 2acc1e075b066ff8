//! LSS master state machines: discover, select, and configure CiA DSP-305 slaves over CAN.
//!
//! [`Session`] is the entry point. Bind it to a [`Mailbox`] and a [`CanSender`] with
//! [`Session::init`], then poll its service methods once per tick with the elapsed
//! microseconds. [`Session::identify_fastscan`] drives the 128-bit binary-search
//! identification; everything else is a confirmed request/reply pair implemented in
//! [`engine`].
#![cfg_attr(not(feature = "std"), no_std)]

pub mod engine;
pub mod fastscan;
mod mailbox;
mod session;
mod status;
mod timeout;

pub use engine::InquireKind;
pub use fastscan::{FastscanDirective, FastscanIo};
pub use mailbox::Mailbox;
pub use session::{PendingCommand, Session, SessionState};
pub use status::LssStatus;
pub use timeout::{TimeoutAccumulator, TimeoutTick};

pub use lss_common::can::{CanFrame, CanId};
pub use lss_common::lss::LssAddress;
pub use lss_common::traits::CanSender;
