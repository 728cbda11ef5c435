// abtag
//
// a native rust client for Allen-Bradley PLCs over EtherNet/IP and CIP.
// Copyright: 2025-2026, the abtag project authors
// License: MIT

//! the `@raw` tag: the data buffer IS the CIP service request, and the
//! literal response bytes replace it.

use crate::tag::{Continuation, OpKind, PlcContext, TagBase, TagOps};
use crate::{ErrorKind, Result};

pub(crate) struct RawCipOps {
    /// exact byte count of the last response
    payload_size: usize,
}

impl RawCipOps {
    pub fn new() -> Self {
        Self { payload_size: 0 }
    }
}

impl TagOps for RawCipOps {
    fn build_request(
        &mut self,
        base: &mut TagBase,
        _op: OpKind,
        out: &mut Vec<u8>,
        ctx: &mut PlcContext,
    ) -> Result<()> {
        if base.data.is_empty() {
            log::warn!("raw CIP tag has no request staged in its buffer");
            return Err(ErrorKind::NoData.into());
        }
        if base.size() > ctx.max_payload {
            log::warn!("raw CIP command too large to fit");
            return Err(ErrorKind::TooLarge.into());
        }

        out.extend_from_slice(&base.data);
        Ok(())
    }

    fn handle_response(
        &mut self,
        base: &mut TagBase,
        _op: OpKind,
        payload: &[u8],
        _ctx: &mut PlcContext,
    ) -> Result<Continuation> {
        base.data = payload.to_vec();
        self.payload_size = payload.len();
        base.trans_offset = 0;
        Ok(Continuation::Done)
    }

    fn get_int_attr(&self, _base: &TagBase, name: &str) -> Option<i64> {
        match name {
            "payload_size" => Some(self.payload_size as i64),
            _ => None,
        }
    }
}
