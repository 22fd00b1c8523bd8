//! Direct USB CCID protocol support.
//!
//! This module implements the CCID (Chip Card Interface Device) bulk
//! protocol used to reach a smart card through a USB reader, without any
//! middleware in between.
//!
//! # Architecture
//!
//! The CCID protocol uses USB bulk transfers:
//! - Bulk OUT endpoint: host sends commands (APDUs) to the reader
//! - Bulk IN endpoint: reader sends card responses back to the host
//!
//! Each CCID message has a 10-byte header followed by optional data.

pub mod descriptor;
pub mod transceiver;

pub use descriptor::{CcidDescription, Voltage};
pub use transceiver::{BulkTransfer, CcidDataBlock, CcidTransceiver};
