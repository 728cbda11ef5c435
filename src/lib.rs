// abtag
//
// a native rust client for Allen-Bradley PLCs over EtherNet/IP and CIP.
// Copyright: 2025-2026, the abtag project authors
// License: MIT

#![doc = include_str!("../README.md")]

#[doc(inline)]
pub use abtag_core::*;

#[cfg(feature = "async")]
#[doc(inline)]
pub use abtag_async as futures;
