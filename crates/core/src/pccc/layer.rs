// abtag
//
// a native rust client for Allen-Bradley PLCs over EtherNet/IP and CIP.
// Copyright: 2025-2026, the abtag project authors
// License: MIT

//! PCCC-over-CIP layer.
//!
//! Wraps the DF1 command with the PCCC object execute service: `0x4B`, a
//! two-word path to the PCCC object (class 0x67, instance 1), and the
//! seven-byte requester ID (length, vendor ID, vendor serial number). The
//! reply echoes the requester ID before the DF1 response bytes.

use crate::cip::{VENDOR_ID, VENDOR_SERIAL};
use crate::layer::{require, Layer, LayerResponse, PacketBuf};
use crate::{cip, wire, ErrorKind, Result};

const CIP_PCCC_CMD_EXECUTE: u8 = 0x4B;
const PCCC_OBJECT_PATH: [u8; 4] = [0x20, 0x67, 0x24, 0x01];

/* service + path words + path + requester id */
const PCCC_HEADER_SIZE: usize = 1 + 1 + 4 + 7;
/* the reply has the 4-byte CIP response header, then the requester id echo */
const PCCC_RESPONSE_HEADER_SIZE: usize = 4 + 7;

pub(crate) struct PcccLayer {
    /* saved for the fix-up pass */
    payload_start: usize,
}

impl PcccLayer {
    pub fn new() -> Self {
        Self { payload_start: 0 }
    }
}

impl Layer for PcccLayer {
    fn initialize(&mut self) -> Result<()> {
        log::debug!("initializing PCCC layer");
        self.payload_start = 0;
        Ok(())
    }

    fn reserve_space(&mut self, buf: &mut PacketBuf) -> Result<()> {
        require(buf.payload_len() > PCCC_HEADER_SIZE, ErrorKind::TooSmall)?;
        buf.set_payload_start(buf.payload_start() + PCCC_HEADER_SIZE);
        self.payload_start = buf.payload_start();
        Ok(())
    }

    fn fix_up_request(&mut self, buf: &mut PacketBuf) -> Result<()> {
        if buf.payload_start() != self.payload_start {
            log::warn!(
                "start of next payload, {}, is not where it was reserved, {}",
                buf.payload_start(),
                self.payload_start
            );
            return Err(ErrorKind::NoMatch.into());
        }

        let base = self.payload_start - PCCC_HEADER_SIZE;
        let cap = buf.capacity();
        let mut offset = base;
        let data = buf.data_mut();

        wire::set_u8(data, &mut offset, cap, CIP_PCCC_CMD_EXECUTE)?;
        wire::set_u8(data, &mut offset, cap, 2)?;
        wire::set_bytes(data, &mut offset, cap, &PCCC_OBJECT_PATH)?;

        /* requester ID: seven bytes counting the length byte */
        wire::set_u8(data, &mut offset, cap, 7)?;
        wire::set_u16_le(data, &mut offset, cap, VENDOR_ID)?;
        wire::set_u32_le(data, &mut offset, cap, VENDOR_SERIAL)?;

        buf.set_payload_start(base);

        Ok(())
    }

    fn process_response(&mut self, buf: &mut PacketBuf) -> Result<LayerResponse> {
        if buf.payload_len() < PCCC_RESPONSE_HEADER_SIZE {
            return Ok(LayerResponse::Partial);
        }

        let cap = buf.payload_end();
        let mut offset = buf.payload_start();
        let data = buf.data();

        let service = wire::get_u8(data, &mut offset, cap)?;
        let _reserved = wire::get_u8(data, &mut offset, cap)?;
        let status = wire::get_u8(data, &mut offset, cap)?;
        let extra_words = wire::get_u8(data, &mut offset, cap)? as usize;

        if service != (CIP_PCCC_CMD_EXECUTE | cip::CIP_CMD_OK) {
            log::warn!("unexpected PCCC execute reply service {:02x}", service);
            return Err(ErrorKind::BadReply.into());
        }

        if status != cip::CIP_STATUS_OK {
            let mut extended = 0;
            if extra_words > 0 {
                extended = wire::get_u16_le(data, &mut offset, cap)?;
            }
            log::warn!(
                "PCCC execute failed: {}",
                cip::decode_error_short(status, extended)
            );
            return Err(cip::decode_error_code(status, extended).into());
        }

        /* requester ID echo */
        let id_len = wire::get_u8(data, &mut offset, cap)? as usize;
        if id_len < 7 {
            log::warn!("short requester id echo, length {}", id_len);
            return Err(ErrorKind::BadReply.into());
        }
        offset += id_len - 1;
        if offset > cap {
            return Err(ErrorKind::Decode.into());
        }

        buf.set_payload_start(offset);
        Ok(LayerResponse::Forward)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execute_wrapper_bytes() {
        let mut layer = PcccLayer::new();

        let mut buf = PacketBuf::new(300);
        layer.reserve_space(&mut buf).unwrap();
        assert_eq!(buf.payload_start(), PCCC_HEADER_SIZE);

        let mut off = buf.payload_start();
        let cap = buf.payload_end();
        wire::set_bytes(buf.data_mut(), &mut off, cap, &[0x0F, 0x00, 0x34, 0x12]).unwrap();
        buf.set_payload_end(off);
        layer.fix_up_request(&mut buf).unwrap();

        let pkt = buf.packet();
        assert_eq!(&pkt[..6], &[0x4B, 0x02, 0x20, 0x67, 0x24, 0x01]);
        assert_eq!(pkt[6], 0x07);
        assert_eq!(&pkt[7..9], &VENDOR_ID.to_le_bytes());
        assert_eq!(&pkt[9..13], &VENDOR_SERIAL.to_le_bytes());
        assert_eq!(&pkt[13..], &[0x0F, 0x00, 0x34, 0x12]);
    }

    #[test]
    fn test_response_peel() {
        let mut layer = PcccLayer::new();

        let mut reply = vec![0xCB, 0x00, 0x00, 0x00, 0x07];
        reply.extend_from_slice(&VENDOR_ID.to_le_bytes());
        reply.extend_from_slice(&VENDOR_SERIAL.to_le_bytes());
        reply.extend_from_slice(&[0x4F, 0x00, 0x34, 0x12, 0xAA, 0xBB]);

        let mut buf = PacketBuf::from_bytes(reply);
        assert_eq!(
            layer.process_response(&mut buf).unwrap(),
            LayerResponse::Forward
        );
        assert_eq!(buf.payload(), &[0x4F, 0x00, 0x34, 0x12, 0xAA, 0xBB]);
    }

    #[test]
    fn test_response_error_status() {
        let mut layer = PcccLayer::new();

        // unsupported service status
        let reply = vec![0xCB, 0x00, 0x08, 0x00, 0x07, 0, 0, 0, 0, 0, 0];
        let mut buf = PacketBuf::from_bytes(reply);
        let err = layer.process_response(&mut buf).unwrap_err();
        assert_eq!(err.err_kind(), Some(ErrorKind::Unsupported));
    }
}
