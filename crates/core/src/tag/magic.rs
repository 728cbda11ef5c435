// abtag
//
// a native rust client for Allen-Bradley PLCs over EtherNet/IP and CIP.
// Copyright: 2025-2026, the abtag project authors
// License: MIT

//! the metadata tags: `@tags` listing, `@udt/<id>` template fetch and
//! `@change` tag-table change detection. Logix-class PLCs only.

use crate::cip::{self, CIP_CMD_GET_ATTRIBS, CIP_CMD_LIST_TAGS, CIP_CMD_OK, CIP_CMD_READ, CIP_STATUS_FRAG};
use crate::tag::{Continuation, OpKind, PlcContext, TagBase, TagOps};
use crate::{wire, ErrorKind, Result};

/* ------------------------------------------------------------------ */
/* @tags                                                               */
/* ------------------------------------------------------------------ */

pub(crate) struct ListTagsOps {
    /// encoded program segments when listing program-scoped tags
    prefix: Vec<u8>,
    /// resume point: one past the last instance ID already received
    last_id: u32,
}

impl ListTagsOps {
    pub fn new(name: &str) -> Result<Self> {
        let prefix = if name.eq_ignore_ascii_case("@tags") {
            vec![]
        } else {
            // "Program:<prog>.@tags": encode the program as a symbolic path
            let program = &name[..name.len() - ".@tags".len()];
            let encoded = cip::name::encode_tag_name(program)?;
            // skip the word-count byte; the request has its own path size
            encoded.bytes[1..].to_vec()
        };

        Ok(Self { prefix, last_id: 0 })
    }
}

impl TagOps for ListTagsOps {
    fn build_request(
        &mut self,
        base: &mut TagBase,
        _op: OpKind,
        out: &mut Vec<u8>,
        _ctx: &mut PlcContext,
    ) -> Result<()> {
        if base.trans_offset == 0 {
            // a fresh listing starts over
            base.data.clear();
            self.last_id = 0;
        }

        out.push(CIP_CMD_LIST_TAGS);
        out.push(((6 + self.prefix.len()) / 2) as u8);
        out.extend_from_slice(&self.prefix);
        out.extend_from_slice(&[0x20, 0x6B, 0x25, 0x00]);
        out.extend_from_slice(&(self.last_id as u16).to_le_bytes());

        /* four attributes: symbol type, element length, array dims, name */
        out.extend_from_slice(&[0x04, 0x00, 0x02, 0x00, 0x07, 0x00, 0x08, 0x00, 0x01, 0x00]);

        Ok(())
    }

    fn handle_response(
        &mut self,
        base: &mut TagBase,
        _op: OpKind,
        payload: &[u8],
        _ctx: &mut PlcContext,
    ) -> Result<Continuation> {
        let (status, offset) =
            cip::parse_response_header(payload, &[CIP_CMD_OK | CIP_CMD_LIST_TAGS])?;

        let data = &payload[offset..];

        // walk the entries to find the resume point
        let cap = data.len();
        let mut cursor = 0;
        while cursor < cap {
            let instance_id = wire::get_u32_le(data, &mut cursor, cap)?;
            let _symbol_type = wire::get_u16_le(data, &mut cursor, cap)?;
            let _elem_length = wire::get_u16_le(data, &mut cursor, cap)?;
            for _ in 0..3 {
                let _dim = wire::get_u32_le(data, &mut cursor, cap)?;
            }
            let name_len = wire::get_u16_le(data, &mut cursor, cap)? as usize;
            if cursor + name_len > cap {
                return Err(ErrorKind::Decode.into());
            }
            cursor += name_len;

            self.last_id = instance_id + 1;
        }

        base.data.extend_from_slice(data);
        base.trans_offset = base.data.len();

        if status == CIP_STATUS_FRAG {
            Ok(Continuation::More)
        } else {
            base.trans_offset = 0;
            Ok(Continuation::Done)
        }
    }

    fn supports_write(&self) -> bool {
        false
    }
}

/* ------------------------------------------------------------------ */
/* @udt/<id>                                                           */
/* ------------------------------------------------------------------ */

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum UdtPhase {
    /// fetch the template attributes
    Info,
    /// read the template definition bytes
    Template,
}

/// result buffer layout: a 16-byte header (UDT id, struct handle, member
/// count, reserved, instance size, definition size) followed by the raw
/// template definition bytes.
const UDT_HEADER_SIZE: usize = 16;

pub(crate) struct UdtOps {
    udt_id: u16,
    phase: UdtPhase,
    struct_handle: u16,
    field_count: u16,
    instance_size: u32,
    /// template definition length in bytes
    def_size: u32,
}

impl UdtOps {
    pub fn new(name: &str) -> Result<Self> {
        let id: u32 = name[5..].parse().map_err(|_| ErrorKind::BadParam)?;
        if id > 4095 {
            log::warn!("UDT id must be 0..=4095, was {}", id);
            return Err(ErrorKind::BadParam.into());
        }
        Ok(Self {
            udt_id: id as u16,
            phase: UdtPhase::Info,
            struct_handle: 0,
            field_count: 0,
            instance_size: 0,
            def_size: 0,
        })
    }
}

impl TagOps for UdtOps {
    fn build_request(
        &mut self,
        base: &mut TagBase,
        _op: OpKind,
        out: &mut Vec<u8>,
        ctx: &mut PlcContext,
    ) -> Result<()> {
        if base.trans_offset == 0 {
            self.phase = UdtPhase::Info;
        }

        match self.phase {
            UdtPhase::Info => {
                out.push(CIP_CMD_GET_ATTRIBS);
                out.extend_from_slice(&[0x03, 0x20, 0x6C, 0x25, 0x00]);
                out.extend_from_slice(&self.udt_id.to_le_bytes());
                /* struct handle, member count, definition size, instance size */
                out.extend_from_slice(&[0x04, 0x00, 0x01, 0x00, 0x02, 0x00, 0x04, 0x00, 0x05, 0x00]);
            }
            UdtPhase::Template => {
                let read_offset = (base.trans_offset - UDT_HEADER_SIZE) as u32;
                let remaining = self.def_size.saturating_sub(read_offset);
                let budget = ctx.max_payload.saturating_sub(16) as u32;
                let count = remaining.min(budget).min(u16::MAX as u32) as u16;
                if count == 0 {
                    return Err(ErrorKind::NoData.into());
                }

                out.push(CIP_CMD_READ);
                out.extend_from_slice(&[0x03, 0x20, 0x6C, 0x25, 0x00]);
                out.extend_from_slice(&self.udt_id.to_le_bytes());
                out.extend_from_slice(&read_offset.to_le_bytes());
                out.extend_from_slice(&count.to_le_bytes());
            }
        }
        Ok(())
    }

    fn handle_response(
        &mut self,
        base: &mut TagBase,
        _op: OpKind,
        payload: &[u8],
        _ctx: &mut PlcContext,
    ) -> Result<Continuation> {
        match self.phase {
            UdtPhase::Info => {
                let (_, offset) =
                    cip::parse_response_header(payload, &[CIP_CMD_OK | CIP_CMD_GET_ATTRIBS])?;
                let data = payload;
                let cap = data.len();
                let mut cursor = offset;

                let attrib_count = wire::get_u16_le(data, &mut cursor, cap)?;
                for _ in 0..attrib_count {
                    let attrib_id = wire::get_u16_le(data, &mut cursor, cap)?;
                    let attrib_status = wire::get_u16_le(data, &mut cursor, cap)?;
                    if attrib_status != 0 {
                        log::warn!("UDT attribute {} returned status {}", attrib_id, attrib_status);
                        return Err(ErrorKind::RemoteErr.into());
                    }
                    match attrib_id {
                        0x01 => self.struct_handle = wire::get_u16_le(data, &mut cursor, cap)?,
                        0x02 => self.field_count = wire::get_u16_le(data, &mut cursor, cap)?,
                        0x04 => {
                            /* definition size is counted in 32-bit words; the
                            readable bytes are 23 short of that */
                            let dints = wire::get_u32_le(data, &mut cursor, cap)?;
                            self.def_size = (dints * 4).saturating_sub(23);
                        }
                        0x05 => self.instance_size = wire::get_u32_le(data, &mut cursor, cap)?,
                        other => {
                            log::warn!("unexpected UDT attribute {}", other);
                            return Err(ErrorKind::Decode.into());
                        }
                    }
                }

                base.data.clear();
                base.data.resize(UDT_HEADER_SIZE, 0);
                base.data[0..2].copy_from_slice(&self.udt_id.to_le_bytes());
                base.data[2..4].copy_from_slice(&self.struct_handle.to_le_bytes());
                base.data[4..6].copy_from_slice(&self.field_count.to_le_bytes());
                base.data[8..12].copy_from_slice(&self.instance_size.to_le_bytes());
                base.data[12..16].copy_from_slice(&self.def_size.to_le_bytes());
                base.trans_offset = UDT_HEADER_SIZE;

                if self.def_size == 0 {
                    base.trans_offset = 0;
                    return Ok(Continuation::Done);
                }

                self.phase = UdtPhase::Template;
                Ok(Continuation::More)
            }
            UdtPhase::Template => {
                let (status, offset) =
                    cip::parse_response_header(payload, &[CIP_CMD_OK | CIP_CMD_READ])?;
                let data = &payload[offset..];

                if base.trans_offset + data.len() > base.data.len() {
                    base.data.resize(base.trans_offset + data.len(), 0);
                }
                base.data[base.trans_offset..base.trans_offset + data.len()].copy_from_slice(data);
                base.trans_offset += data.len();

                let got = (base.trans_offset - UDT_HEADER_SIZE) as u32;
                if status == CIP_STATUS_FRAG && got < self.def_size {
                    Ok(Continuation::More)
                } else {
                    base.trans_offset = 0;
                    self.phase = UdtPhase::Info;
                    Ok(Continuation::Done)
                }
            }
        }
    }

    fn supports_write(&self) -> bool {
        false
    }

    fn get_int_attr(&self, _base: &TagBase, name: &str) -> Option<i64> {
        match name {
            "udt_id" => Some(self.udt_id as i64),
            "field_count" => Some(self.field_count as i64),
            "instance_size" => Some(self.instance_size as i64),
            _ => None,
        }
    }
}

/* ------------------------------------------------------------------ */
/* @change                                                             */
/* ------------------------------------------------------------------ */

pub(crate) struct ChangeDetectionOps;

impl ChangeDetectionOps {
    pub fn new() -> Self {
        Self
    }
}

impl TagOps for ChangeDetectionOps {
    fn build_request(
        &mut self,
        _base: &mut TagBase,
        _op: OpKind,
        out: &mut Vec<u8>,
        _ctx: &mut PlcContext,
    ) -> Result<()> {
        out.push(CIP_CMD_GET_ATTRIBS);
        /* class 0xAC instance 1 */
        out.extend_from_slice(&[0x03, 0x20, 0xAC, 0x25, 0x00, 0x01, 0x00]);
        /* five attributes; changes to 1-4 and 10 track tag-table edits */
        out.extend_from_slice(&[
            0x05, 0x00, 0x01, 0x00, 0x02, 0x00, 0x03, 0x00, 0x04, 0x00, 0x0A, 0x00,
        ]);
        Ok(())
    }

    fn handle_response(
        &mut self,
        base: &mut TagBase,
        _op: OpKind,
        payload: &[u8],
        _ctx: &mut PlcContext,
    ) -> Result<Continuation> {
        let (_, offset) = cip::parse_response_header(payload, &[CIP_CMD_OK | CIP_CMD_GET_ATTRIBS])?;
        base.data = payload[offset..].to_vec();
        base.trans_offset = 0;
        Ok(Continuation::Done)
    }

    fn supports_write(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::byte_order::LOGIX;
    use crate::debug::DebugLevel;
    use crate::Status;

    fn base(name: &str) -> TagBase {
        TagBase {
            name: name.to_owned(),
            data: vec![],
            elem_size: 1,
            elem_count: 1,
            is_bit: false,
            bit: 0,
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
        }
    }

    fn ctx(tsn: &mut u16) -> PlcContext {
        PlcContext {
            max_payload: 504,
            tsn,
        }
    }

    fn tag_entry(id: u32, name: &str) -> Vec<u8> {
        let mut entry = vec![];
        entry.extend_from_slice(&id.to_le_bytes());
        entry.extend_from_slice(&0x00C4u16.to_le_bytes());
        entry.extend_from_slice(&4u16.to_le_bytes());
        entry.extend_from_slice(&[0u8; 12]);
        entry.extend_from_slice(&(name.len() as u16).to_le_bytes());
        entry.extend_from_slice(name.as_bytes());
        entry
    }

    #[test]
    fn test_list_tags_request() {
        let mut ops = ListTagsOps::new("@tags").unwrap();
        let mut b = base("@tags");
        let mut tsn = 0;
        let mut out = vec![];
        ops.build_request(&mut b, OpKind::Read, &mut out, &mut ctx(&mut tsn))
            .unwrap();
        assert_eq!(out[0], 0x55);
        assert_eq!(out[1], 3);
        assert_eq!(&out[2..6], &[0x20, 0x6B, 0x25, 0x00]);
        assert_eq!(&out[6..8], &[0, 0]);
        assert_eq!(&out[8..10], &[0x04, 0x00]);
    }

    #[test]
    fn test_list_tags_program_prefix() {
        let mut ops = ListTagsOps::new("Program:Main.@tags").unwrap();
        let mut b = base("Program:Main.@tags");
        let mut tsn = 0;
        let mut out = vec![];
        ops.build_request(&mut b, OpKind::Read, &mut out, &mut ctx(&mut tsn))
            .unwrap();
        assert_eq!(out[0], 0x55);
        // "Program:Main" is 12 chars: 0x91 + len + 12 bytes = 14 prefix bytes
        assert_eq!(out[1], 10);
        assert_eq!(out[2], 0x91);
        assert_eq!(out[3], 12);
        assert_eq!(&out[4..16], b"Program:Main");
    }

    #[test]
    fn test_list_tags_resume_and_accumulate() {
        let mut ops = ListTagsOps::new("@tags").unwrap();
        let mut b = base("@tags");
        let mut tsn = 0;

        let mut payload = vec![0xD5, 0x00, 0x06, 0x00];
        payload.extend(tag_entry(40, "Alpha"));
        payload.extend(tag_entry(42, "Beta"));
        let cont = ops
            .handle_response(&mut b, OpKind::Read, &payload, &mut ctx(&mut tsn))
            .unwrap();
        assert_eq!(cont, Continuation::More);
        assert_eq!(ops.last_id, 43);

        // the continuation starts at the next instance
        let mut out = vec![];
        ops.build_request(&mut b, OpKind::Read, &mut out, &mut ctx(&mut tsn))
            .unwrap();
        assert_eq!(&out[6..8], &43u16.to_le_bytes());

        let mut payload = vec![0xD5, 0x00, 0x00, 0x00];
        payload.extend(tag_entry(50, "Gamma"));
        let cont = ops
            .handle_response(&mut b, OpKind::Read, &payload, &mut ctx(&mut tsn))
            .unwrap();
        assert_eq!(cont, Continuation::Done);

        // all three entries accumulated in the buffer
        assert_eq!(
            b.data.len(),
            tag_entry(40, "Alpha").len() + tag_entry(42, "Beta").len() + tag_entry(50, "Gamma").len()
        );
    }

    #[test]
    fn test_udt_two_phase() {
        let mut ops = UdtOps::new("@udt/17").unwrap();
        let mut b = base("@udt/17");
        let mut tsn = 0;

        let mut out = vec![];
        ops.build_request(&mut b, OpKind::Read, &mut out, &mut ctx(&mut tsn))
            .unwrap();
        assert_eq!(out[0], 0x03);
        assert_eq!(&out[1..6], &[0x03, 0x20, 0x6C, 0x25, 0x00]);
        assert_eq!(&out[6..8], &17u16.to_le_bytes());

        // info reply: handle 0xBEEF, 2 members, definition 10 DINTs, 24 bytes
        let mut payload = vec![0x83, 0x00, 0x00, 0x00];
        payload.extend_from_slice(&4u16.to_le_bytes());
        payload.extend_from_slice(&[0x01, 0x00, 0x00, 0x00]);
        payload.extend_from_slice(&0xBEEFu16.to_le_bytes());
        payload.extend_from_slice(&[0x02, 0x00, 0x00, 0x00]);
        payload.extend_from_slice(&2u16.to_le_bytes());
        payload.extend_from_slice(&[0x04, 0x00, 0x00, 0x00]);
        payload.extend_from_slice(&10u32.to_le_bytes());
        payload.extend_from_slice(&[0x05, 0x00, 0x00, 0x00]);
        payload.extend_from_slice(&24u32.to_le_bytes());

        let cont = ops
            .handle_response(&mut b, OpKind::Read, &payload, &mut ctx(&mut tsn))
            .unwrap();
        assert_eq!(cont, Continuation::More);
        assert_eq!(ops.def_size, 10 * 4 - 23);
        assert_eq!(b.data.len(), UDT_HEADER_SIZE);
        assert_eq!(&b.data[2..4], &0xBEEFu16.to_le_bytes());

        // template read request carries the offset and count
        let mut out = vec![];
        ops.build_request(&mut b, OpKind::Read, &mut out, &mut ctx(&mut tsn))
            .unwrap();
        assert_eq!(out[0], 0x4C);
        assert_eq!(&out[8..12], &0u32.to_le_bytes());
        assert_eq!(&out[12..14], &(ops.def_size as u16).to_le_bytes());

        // template bytes complete the read
        let mut payload = vec![0xCC, 0x00, 0x00, 0x00];
        payload.extend(std::iter::repeat(0x5A).take(ops.def_size as usize));
        let cont = ops
            .handle_response(&mut b, OpKind::Read, &payload, &mut ctx(&mut tsn))
            .unwrap();
        assert_eq!(cont, Continuation::Done);
        assert_eq!(b.data.len(), UDT_HEADER_SIZE + ops.def_size as usize);
        assert_eq!(b.data[UDT_HEADER_SIZE], 0x5A);
    }

    #[test]
    fn test_udt_id_bounds() {
        assert!(UdtOps::new("@udt/0").is_ok());
        assert!(UdtOps::new("@udt/4095").is_ok());
        assert!(UdtOps::new("@udt/4096").is_err());
        assert!(UdtOps::new("@udt/x").is_err());
    }

    #[test]
    fn test_change_detection() {
        let mut ops = ChangeDetectionOps::new();
        let mut b = base("@change");
        let mut tsn = 0;

        let mut out = vec![];
        ops.build_request(&mut b, OpKind::Read, &mut out, &mut ctx(&mut tsn))
            .unwrap();
        assert_eq!(out[0], 0x03);
        assert_eq!(&out[2..4], &[0x20, 0xAC]);
        assert!(!ops.supports_write());

        let mut payload = vec![0x83, 0x00, 0x00, 0x00];
        payload.extend_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        let cont = ops
            .handle_response(&mut b, OpKind::Read, &payload, &mut ctx(&mut tsn))
            .unwrap();
        assert_eq!(cont, Continuation::Done);
        assert_eq!(b.data, vec![1, 2, 3, 4, 5, 6, 7, 8]);
    }
}
