//! Agent side of the audit protocol: clearance polling against the
//! receiving contract's events.

pub mod logs;
pub mod poller;

pub use poller::{Clearance, ClearanceLogSource, ClearancePoller};
