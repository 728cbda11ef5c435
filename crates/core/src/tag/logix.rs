// abtag
//
// a native rust client for Allen-Bradley PLCs over EtherNet/IP and CIP.
// Copyright: 2025-2026, the abtag project authors
// License: MIT

//! symbolic CIP tags for the Logix-class PLCs (ControlLogix, CompactLogix,
//! Micro800, Omron NJ/NX).

use crate::cip::{
    self, CIP_CMD_OK, CIP_CMD_READ, CIP_CMD_READ_FRAG, CIP_CMD_RMW, CIP_CMD_WRITE,
    CIP_CMD_WRITE_FRAG, CIP_STATUS_FRAG,
};
use crate::tag::{Continuation, OpKind, PlcContext, TagBase, TagOps};
use crate::{ErrorKind, Result};

pub(crate) struct LogixOps {
    encoded_name: Vec<u8>,
    /// CIP type info captured from the first read: two bytes for atomic
    /// types, four for structured ones
    type_info: Vec<u8>,
}

impl LogixOps {
    pub fn new(encoded_name: Vec<u8>) -> Self {
        Self {
            encoded_name,
            type_info: vec![],
        }
    }

    fn build_read(&self, base: &TagBase, out: &mut Vec<u8>) {
        // the first request is a plain read; continuations are fragmented
        if base.trans_offset == 0 {
            out.push(CIP_CMD_READ);
        } else {
            out.push(CIP_CMD_READ_FRAG);
        }
        out.extend_from_slice(&self.encoded_name);
        out.extend_from_slice(&(base.elem_count as u16).to_le_bytes());
        if base.trans_offset != 0 {
            out.extend_from_slice(&(base.trans_offset as u32).to_le_bytes());
        }
    }

    fn build_bit_write(&self, base: &TagBase, out: &mut Vec<u8>) -> Result<()> {
        let elem_size = base.elem_size;
        if elem_size == 0 || elem_size > 8 {
            return Err(ErrorKind::Unsupported.into());
        }

        let bit = base.bit as usize;
        if bit >= elem_size * 8 {
            return Err(ErrorKind::OutOfBounds.into());
        }

        let byte = bit / 8;
        if byte >= base.size() {
            return Err(ErrorKind::OutOfBounds.into());
        }
        let value = base.data[byte] & (1 << (bit % 8)) != 0;

        let mut or_mask = vec![0u8; elem_size];
        let mut and_mask = vec![0xFFu8; elem_size];
        if value {
            or_mask[byte] |= 1 << (bit % 8);
        } else {
            and_mask[byte] &= !(1 << (bit % 8));
        }

        out.push(CIP_CMD_RMW);
        out.extend_from_slice(&self.encoded_name);
        out.extend_from_slice(&(elem_size as u16).to_le_bytes());
        out.extend_from_slice(&or_mask);
        out.extend_from_slice(&and_mask);

        Ok(())
    }

    fn build_write(&self, base: &mut TagBase, out: &mut Vec<u8>, ctx: &PlcContext) -> Result<()> {
        if self.type_info.is_empty() {
            // the write path needs the type learned by a read first
            log::warn!("tag {:?} has no type info for a write", base.name);
            return Err(ErrorKind::NoData.into());
        }

        let remaining = base.size() - base.trans_offset;
        let plain_overhead = 1 + self.encoded_name.len() + self.type_info.len() + 2;

        // first chunk is a plain write only when the whole remainder fits;
        // everything else, continuations included, is fragmented
        let use_frag = base.trans_offset != 0 || plain_overhead + remaining > ctx.max_payload;

        let trans_size = if use_frag {
            let overhead = plain_overhead + 4;
            if ctx.max_payload <= overhead {
                return Err(ErrorKind::TooSmall.into());
            }
            // fragments land on 4-byte boundaries
            let budget = (ctx.max_payload - overhead) & !3usize;
            let clamped = budget.min(remaining);
            if clamped == 0 {
                return Err(ErrorKind::TooSmall.into());
            }
            clamped
        } else {
            remaining
        };

        if use_frag {
            out.push(CIP_CMD_WRITE_FRAG);
        } else {
            out.push(CIP_CMD_WRITE);
        }
        out.extend_from_slice(&self.encoded_name);
        out.extend_from_slice(&self.type_info);
        out.extend_from_slice(&(base.elem_count as u16).to_le_bytes());
        if use_frag {
            out.extend_from_slice(&(base.trans_offset as u32).to_le_bytes());
        }
        out.extend_from_slice(&base.data[base.trans_offset..base.trans_offset + trans_size]);

        base.trans_offset += trans_size;

        Ok(())
    }

    fn handle_read(&mut self, base: &mut TagBase, payload: &[u8]) -> Result<Continuation> {
        let (status, mut offset) = cip::parse_response_header(
            payload,
            &[CIP_CMD_OK | CIP_CMD_READ, CIP_CMD_OK | CIP_CMD_READ_FRAG],
        )?;

        // capture the data type
        let first = *payload.get(offset).ok_or(ErrorKind::TooSmall)?;
        let type_len = if first < 0xA0 { 2 } else { 4 };
        let type_info = payload
            .get(offset..offset + type_len)
            .ok_or(ErrorKind::TooSmall)?;
        self.type_info = type_info.to_vec();
        offset += type_len;

        // a boolean reply promotes the tag to a bit tag
        if first == 0xC1 && !base.is_bit {
            base.is_bit = true;
            base.bit = self.type_info[1];
        }

        let data = &payload[offset..];

        // Logix tags grow to fit the response
        if base.trans_offset + data.len() > base.size() {
            log::debug!(
                "expanding tag data buffer from {} to {} bytes",
                base.size(),
                base.trans_offset + data.len()
            );
            base.data.resize(base.trans_offset + data.len(), 0);
        }
        base.data[base.trans_offset..base.trans_offset + data.len()].copy_from_slice(data);
        base.trans_offset += data.len();

        if status == CIP_STATUS_FRAG || base.trans_offset < base.size() {
            return Ok(Continuation::More);
        }

        // done; infer the element stride if the tag was created without one
        base.trans_offset = 0;
        if base.elem_size == 0 && base.elem_count > 0 && base.size() % base.elem_count == 0 {
            base.elem_size = base.size() / base.elem_count;
        }

        Ok(Continuation::Done)
    }

    fn handle_write(&mut self, base: &mut TagBase, payload: &[u8]) -> Result<Continuation> {
        let _ = cip::parse_response_header(
            payload,
            &[
                CIP_CMD_OK | CIP_CMD_WRITE,
                CIP_CMD_OK | CIP_CMD_WRITE_FRAG,
                CIP_CMD_OK | CIP_CMD_RMW,
            ],
        )?;

        if base.is_bit {
            base.trans_offset = 0;
            return Ok(Continuation::Done);
        }

        if base.trans_offset < base.size() {
            return Ok(Continuation::More);
        }

        base.trans_offset = 0;
        Ok(Continuation::Done)
    }
}

impl TagOps for LogixOps {
    fn build_request(
        &mut self,
        base: &mut TagBase,
        op: OpKind,
        out: &mut Vec<u8>,
        ctx: &mut PlcContext,
    ) -> Result<()> {
        match op {
            OpKind::Read => {
                self.build_read(base, out);
                Ok(())
            }
            OpKind::Write => {
                if base.is_bit {
                    self.build_bit_write(base, out)
                } else {
                    self.build_write(base, out, ctx)
                }
            }
        }
    }

    fn handle_response(
        &mut self,
        base: &mut TagBase,
        op: OpKind,
        payload: &[u8],
        _ctx: &mut PlcContext,
    ) -> Result<Continuation> {
        match op {
            OpKind::Read => self.handle_read(base, payload),
            OpKind::Write => self.handle_write(base, payload),
        }
    }

    fn packable(&self) -> bool {
        true
    }

    fn write_requires_read(&self, base: &TagBase) -> bool {
        self.type_info.is_empty() && (!base.is_bit || base.elem_size == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::byte_order::LOGIX;
    use crate::cip::name::encode_tag_name;
    use crate::debug::DebugLevel;
    use crate::Status;

    fn base_for(name: &str, elem_size: usize, elem_count: usize) -> (TagBase, LogixOps) {
        let encoded = encode_tag_name(name).unwrap();
        let base = TagBase {
            name: name.to_owned(),
            data: vec![0u8; elem_size * elem_count],
            elem_size,
            elem_count,
            is_bit: encoded.is_bit,
            bit: encoded.bit,
            status: Status::Ok,
            read_in_flight: false,
            write_in_flight: false,
            trans_offset: 0,
            byte_order: &LOGIX,
            read_cache_ms: 0,
            read_cache_expire: None,
            write_after_read: false,
            pending_write_data: None,
            debug_level: DebugLevel::None,
        };
        (base, LogixOps::new(encoded.bytes))
    }

    fn ctx(tsn: &mut u16) -> PlcContext {
        PlcContext {
            max_payload: 504,
            tsn,
        }
    }

    #[test]
    fn test_read_request_bytes() {
        let (mut base, mut ops) = base_for("Count", 4, 1);
        let mut tsn = 0;
        let mut out = vec![];
        ops.build_request(&mut base, OpKind::Read, &mut out, &mut ctx(&mut tsn))
            .unwrap();
        assert_eq!(
            out,
            vec![0x4C, 0x04, 0x91, 0x05, b'C', b'o', b'u', b'n', b't', 0x00, 0x01, 0x00]
        );
    }

    #[test]
    fn test_read_response_atomic() {
        let (mut base, mut ops) = base_for("Count", 4, 1);
        let mut tsn = 0;
        let payload = [0xCC, 0x00, 0x00, 0x00, 0xC4, 0x00, 0x2A, 0x00, 0x00, 0x00];
        let cont = ops
            .handle_response(&mut base, OpKind::Read, &payload, &mut ctx(&mut tsn))
            .unwrap();
        assert_eq!(cont, Continuation::Done);
        assert_eq!(base.data, vec![0x2A, 0x00, 0x00, 0x00]);
        assert_eq!(ops.type_info, vec![0xC4, 0x00]);
        assert_eq!(base.trans_offset, 0);
    }

    #[test]
    fn test_read_infers_elem_size() {
        let (mut base, mut ops) = base_for("Count", 0, 1);
        base.data = vec![];
        let mut tsn = 0;
        let payload = [0xCC, 0x00, 0x00, 0x00, 0xC4, 0x00, 0x2A, 0x00, 0x00, 0x00];
        let cont = ops
            .handle_response(&mut base, OpKind::Read, &payload, &mut ctx(&mut tsn))
            .unwrap();
        assert_eq!(cont, Continuation::Done);
        assert_eq!(base.elem_size, 4);
        assert_eq!(base.size(), 4);
    }

    #[test]
    fn test_fragmented_read_continues() {
        let (mut base, mut ops) = base_for("Big", 1000, 1);
        let mut tsn = 0;

        // first response: frag status, 600 bytes
        let mut payload = vec![0xCC, 0x00, 0x06, 0x00, 0xC4, 0x00];
        payload.extend(std::iter::repeat(0x11).take(600));
        let cont = ops
            .handle_response(&mut base, OpKind::Read, &payload, &mut ctx(&mut tsn))
            .unwrap();
        assert_eq!(cont, Continuation::More);
        assert_eq!(base.trans_offset, 600);

        // the continuation request must be a fragmented read with the offset
        let mut out = vec![];
        ops.build_request(&mut base, OpKind::Read, &mut out, &mut ctx(&mut tsn))
            .unwrap();
        assert_eq!(out[0], 0x52);
        assert_eq!(&out[out.len() - 4..], &600u32.to_le_bytes());

        // second response completes the tag
        let mut payload = vec![0xD2, 0x00, 0x00, 0x00, 0xC4, 0x00];
        payload.extend(std::iter::repeat(0x22).take(400));
        let cont = ops
            .handle_response(&mut base, OpKind::Read, &payload, &mut ctx(&mut tsn))
            .unwrap();
        assert_eq!(cont, Continuation::Done);
        assert_eq!(base.trans_offset, 0);
        assert_eq!(base.data[599], 0x11);
        assert_eq!(base.data[600], 0x22);
    }

    #[test]
    fn test_write_plain_when_it_fits() {
        let (mut base, mut ops) = base_for("Count", 4, 1);
        ops.type_info = vec![0xC4, 0x00];
        base.data = vec![0x2A, 0, 0, 0];
        let mut tsn = 0;
        let mut out = vec![];
        ops.build_request(&mut base, OpKind::Write, &mut out, &mut ctx(&mut tsn))
            .unwrap();
        assert_eq!(out[0], 0x4D);
        assert_eq!(&out[out.len() - 4..], &[0x2A, 0, 0, 0]);
        assert_eq!(base.trans_offset, 4);
    }

    #[test]
    fn test_write_fragments_when_large() {
        let (mut base, mut ops) = base_for("Big", 4, 500);
        ops.type_info = vec![0xC4, 0x00];
        let mut tsn = 0;

        // 2000 bytes cannot fit a 504-byte payload: first chunk already frag
        let mut out = vec![];
        ops.build_request(&mut base, OpKind::Write, &mut out, &mut ctx(&mut tsn))
            .unwrap();
        assert_eq!(out[0], 0x53);
        let first_chunk = base.trans_offset;
        assert!(first_chunk > 0 && first_chunk % 4 == 0);
        assert!(first_chunk < 2000);

        // confirmation with remaining data queues another fragment
        let payload = [0xD3, 0x00, 0x00, 0x00];
        let cont = ops
            .handle_response(&mut base, OpKind::Write, &payload, &mut ctx(&mut tsn))
            .unwrap();
        assert_eq!(cont, Continuation::More);

        let mut out = vec![];
        ops.build_request(&mut base, OpKind::Write, &mut out, &mut ctx(&mut tsn))
            .unwrap();
        assert_eq!(out[0], 0x53);
        let off_pos = 1 + ops.encoded_name.len() + 2 + 2;
        assert_eq!(
            &out[off_pos..off_pos + 4],
            &(first_chunk as u32).to_le_bytes()
        );
    }

    #[test]
    fn test_write_without_type_info_fails() {
        let (mut base, mut ops) = base_for("Count", 4, 1);
        assert!(ops.write_requires_read(&base));
        let mut tsn = 0;
        let mut out = vec![];
        let res = ops.build_request(&mut base, OpKind::Write, &mut out, &mut ctx(&mut tsn));
        assert!(res.is_err());
    }

    #[test]
    fn test_bit_write_masks() {
        let (mut base, mut ops) = base_for("Flags.7", 4, 1);
        ops.type_info = vec![0xC4, 0x00];
        assert!(base.is_bit);
        base.data = vec![0x80, 0, 0, 0]; // bit 7 set

        let mut tsn = 0;
        let mut out = vec![];
        ops.build_request(&mut base, OpKind::Write, &mut out, &mut ctx(&mut tsn))
            .unwrap();
        assert_eq!(out[0], 0x4E);
        let name_len = ops.encoded_name.len();
        assert_eq!(&out[1 + name_len..3 + name_len], &[4, 0]);
        // OR mask sets the bit, AND mask keeps everything
        assert_eq!(&out[3 + name_len..7 + name_len], &[0x80, 0, 0, 0]);
        assert_eq!(&out[7 + name_len..11 + name_len], &[0xFF, 0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn test_remote_error_surfaces() {
        let (mut base, mut ops) = base_for("Count", 4, 1);
        let mut tsn = 0;
        // general status 0x04: not found
        let payload = [0xCC, 0x00, 0x04, 0x00];
        let err = ops
            .handle_response(&mut base, OpKind::Read, &payload, &mut ctx(&mut tsn))
            .unwrap_err();
        assert_eq!(err.err_kind(), Some(ErrorKind::NotFound));
    }
}
