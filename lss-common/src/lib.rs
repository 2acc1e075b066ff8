//! Shared wire-level types for the CiA DSP-305 Layer Setting Services (LSS) protocol.
//!
//! This crate has no state machines in it — just the frame codec ([`lss`]), the CAN identifier
//! types ([`can`]), the node ID newtype ([`node_id`]), the driver-facing traits ([`traits`]), and
//! the [`AtomicCell`] primitive the master's single-slot mailbox is built on. The stateful engine
//! lives in the `lss-master` crate.
#![cfg_attr(not(feature = "std"), no_std)]

mod atomic_cell;
pub use atomic_cell::AtomicCell;

pub mod can;
pub mod lss;
pub mod node_id;
pub mod traits;

pub use can::{CanFrame, CanId};
pub use node_id::NodeId;
