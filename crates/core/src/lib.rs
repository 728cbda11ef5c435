// abtag
//
// a native rust client for Allen-Bradley PLCs over EtherNet/IP and CIP.
// Copyright: 2025-2026, the abtag project authors
// License: MIT

//! # abtag-core
//!
//! A native protocol engine for Allen-Bradley (and compatible) PLCs.
//! Tags, the named and typed regions of controller memory, are exposed as
//! [`RawTag`] handles that applications read and write; all traffic to a
//! given gateway is multiplexed over a single TCP connection and a shared
//! EtherNet/IP session by a background coordinator per PLC.
//!
//! Supported families: ControlLogix/CompactLogix (symbolic CIP tags,
//! connected messaging with Forward Open), Micro800, Omron NJ/NX, and the
//! PCCC generation (PLC-5, SLC 500, MicroLogix) over CIP-tunneled DF1.
//!
//! ```rust,no_run
//! use abtag_core::RawTag;
//!
//! let path = "protocol=ab_eip&cpu=controllogix&path=1,0&gateway=192.168.1.120&name=Count&elem_count=1";
//! let timeout = 500;
//! let tag = RawTag::new(path, timeout).unwrap();
//!
//! let status = tag.read(timeout);
//! assert!(status.is_ok());
//! println!("Count = {}", tag.get_i32(0).unwrap());
//! ```

#![warn(missing_docs)]

mod attr;
pub mod builder;
mod byte_order;
mod cip;
mod debug;
mod eip;
mod layer;
mod pccc;
mod plc;
mod status;
mod tag;
#[cfg(feature = "value")]
mod value;
mod wire;

/// library result
pub type Result<T> = std::result::Result<T, Status>;

pub use debug::DebugLevel;
pub use status::{ErrorKind, Status};
pub use tag::{RawTag, TagId};

#[cfg(feature = "value")]
pub use value::{Decode, Encode};
