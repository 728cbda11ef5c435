// abtag
//
// a native rust client for Allen-Bradley PLCs over EtherNet/IP and CIP.
// Copyright: 2025-2026, the abtag project authors
// License: MIT

//! EtherNet/IP encapsulation layer.
//!
//! 24-byte header, little-endian: `u16 command | u16 length |
//! u32 session_handle | u32 status | u64 sender_context | u32 options`.

use crate::layer::{require, Layer, LayerResponse, PacketBuf};
use crate::{wire, ErrorKind, Result};
use rand::Rng;

pub(crate) const EIP_DEFAULT_PORT: u16 = 44818;
const EIP_VERSION: u16 = 1;

pub(crate) const EIP_HEADER_SIZE: usize = 24;
const MAX_EIP_PAYLOAD_SIZE: usize = 0x10000; /* 64k */
const SESSION_REQUEST_SIZE: usize = 28;

const REGISTER_SESSION_CMD: u16 = 0x0065;
const UNREGISTER_SESSION_CMD: u16 = 0x0066;

const SEND_UNCONNECTED_DATA_CMD: u16 = 0x006F;
const SEND_CONNECTED_DATA_CMD: u16 = 0x0070;

pub(crate) struct EipLayer {
    is_connected: bool,

    session_handle: u32,
    session_context: u64,

    /* saved for checking */
    payload_start: usize,
}

impl EipLayer {
    pub fn new() -> Self {
        Self {
            is_connected: false,
            session_handle: 0,
            session_context: 0,
            payload_start: 0,
        }
    }

    #[cfg(test)]
    pub fn session_handle(&self) -> u32 {
        self.session_handle
    }
}

impl Layer for EipLayer {
    fn initialize(&mut self) -> Result<()> {
        log::debug!("initializing EIP layer");

        self.is_connected = false;
        self.session_handle = 0;
        self.session_context = rand::thread_rng().gen();

        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.is_connected
    }

    fn connect(&mut self, buf: &mut PacketBuf) -> Result<bool> {
        log::debug!("building EIP session registration packet");

        if self.is_connected {
            log::warn!("connect called while the EIP session is already registered");
            return Err(ErrorKind::Open.into());
        }

        require(buf.capacity() >= SESSION_REQUEST_SIZE, ErrorKind::TooSmall)?;

        // this layer starts at the beginning of the whole buffer
        buf.set_payload_start(0);
        let cap = buf.capacity();
        let mut offset = 0;
        let data = buf.data_mut();

        wire::set_u16_le(data, &mut offset, cap, REGISTER_SESSION_CMD)?;
        // payload length
        wire::set_u16_le(data, &mut offset, cap, 4)?;
        // session handle, zero here
        wire::set_u32_le(data, &mut offset, cap, 0)?;
        // session status, zero here
        wire::set_u32_le(data, &mut offset, cap, 0)?;
        // sender context, zero here
        wire::set_u64_le(data, &mut offset, cap, 0)?;
        // options, unused
        wire::set_u32_le(data, &mut offset, cap, 0)?;
        // requested EIP version and options
        wire::set_u16_le(data, &mut offset, cap, EIP_VERSION)?;
        wire::set_u16_le(data, &mut offset, cap, 0)?;

        buf.set_payload_end(offset);

        log::trace!("session registration request: {:02X?}", buf.packet());

        Ok(true)
    }

    fn disconnect(&mut self, buf: &mut PacketBuf) -> Result<bool> {
        if !self.is_connected {
            return Ok(false);
        }

        log::debug!("building EIP session unregistration packet");

        buf.set_payload_start(0);
        let cap = buf.capacity();
        let mut offset = 0;
        let data = buf.data_mut();

        wire::set_u16_le(data, &mut offset, cap, UNREGISTER_SESSION_CMD)?;
        wire::set_u16_le(data, &mut offset, cap, 0)?;
        wire::set_u32_le(data, &mut offset, cap, self.session_handle)?;
        wire::set_u32_le(data, &mut offset, cap, 0)?;
        wire::set_u64_le(data, &mut offset, cap, 0)?;
        wire::set_u32_le(data, &mut offset, cap, 0)?;

        buf.set_payload_end(offset);
        self.is_connected = false;

        Ok(true)
    }

    /* called from the bottom up */
    fn reserve_space(&mut self, buf: &mut PacketBuf) -> Result<()> {
        require(buf.capacity() >= EIP_HEADER_SIZE, ErrorKind::TooSmall)?;

        // set the payload boundaries for the next layer up
        buf.set_payload_start(EIP_HEADER_SIZE);

        if buf.capacity() > MAX_EIP_PAYLOAD_SIZE + EIP_HEADER_SIZE {
            log::trace!("clamping total packet payload capacity to 64k for EIP");
            buf.set_payload_end(MAX_EIP_PAYLOAD_SIZE + EIP_HEADER_SIZE);
        } else {
            buf.set_payload_end(buf.capacity());
        }

        self.payload_start = EIP_HEADER_SIZE;

        Ok(())
    }

    /* called top down, the payload end is the end of the whole packet */
    fn fix_up_request(&mut self, buf: &mut PacketBuf) -> Result<()> {
        if !self.is_connected {
            log::warn!("EIP session is not registered");
            return Err(ErrorKind::BadConnection.into());
        }

        let payload_size = buf.payload_end().saturating_sub(self.payload_start);

        /* MAGIC - need some amount of payload! */
        require(payload_size >= 10, ErrorKind::TooSmall)?;

        if buf.payload_start() != self.payload_start {
            log::warn!(
                "start of next payload, {}, is not where it was reserved, {}",
                buf.payload_start(),
                self.payload_start
            );
            return Err(ErrorKind::NoMatch.into());
        }

        // what kind of request is it? Cheat and peek at the CPF address item type.
        let data = buf.data();
        let address_item_type =
            data[EIP_HEADER_SIZE + 8] as u16 | ((data[EIP_HEADER_SIZE + 9] as u16) << 8);

        let command = if address_item_type == 0 {
            SEND_UNCONNECTED_DATA_CMD
        } else {
            SEND_CONNECTED_DATA_CMD
        };

        let cap = buf.payload_end();
        let mut offset = 0;
        let session_handle = self.session_handle;
        let context = if command == SEND_CONNECTED_DATA_CMD {
            0
        } else {
            self.session_context = self.session_context.wrapping_add(1);
            self.session_context
        };

        let data = buf.data_mut();
        wire::set_u16_le(data, &mut offset, cap, command)?;
        wire::set_u16_le(data, &mut offset, cap, payload_size as u16)?;
        wire::set_u32_le(data, &mut offset, cap, session_handle)?;
        wire::set_u32_le(data, &mut offset, cap, 0)?;
        wire::set_u64_le(data, &mut offset, cap, context)?;
        wire::set_u32_le(data, &mut offset, cap, 0)?;

        if offset != self.payload_start {
            log::warn!(
                "actual header size is {} bytes but {} bytes were reserved",
                offset,
                self.payload_start
            );
            return Err(ErrorKind::BadData.into());
        }

        buf.set_payload_start(0);

        log::trace!("EIP request packet: {:02X?}", buf.packet());

        Ok(())
    }

    /* bottom up */
    fn process_response(&mut self, buf: &mut PacketBuf) -> Result<LayerResponse> {
        if buf.payload_len() < EIP_HEADER_SIZE {
            log::trace!("need more data for the EIP header");
            return Ok(LayerResponse::Partial);
        }

        let cap = buf.payload_end();
        let data = buf.data();
        let mut offset = buf.payload_start();

        let command = wire::get_u16_le(data, &mut offset, cap)?;
        let payload_size = wire::get_u16_le(data, &mut offset, cap)? as usize;
        let session_handle = wire::get_u32_le(data, &mut offset, cap)?;
        let status = wire::get_u32_le(data, &mut offset, cap)?;

        // do we have the whole packet?
        let total = payload_size + EIP_HEADER_SIZE;
        if buf.payload_len() < total {
            log::trace!(
                "need {} bytes for the whole packet, have {}",
                total,
                buf.payload_len()
            );
            return Ok(LayerResponse::Partial);
        }

        if buf.payload_len() > total {
            log::warn!(
                "unexpected packet with too many bytes, expected {} and have {}",
                total,
                buf.payload_len()
            );
            return Err(ErrorKind::BadData.into());
        }

        if status != 0 {
            return match status {
                3 => {
                    log::warn!("EIP error: command not understood");
                    Err(ErrorKind::Unsupported.into())
                }
                _ => {
                    log::warn!("got bad EIP status {}", status);
                    Err(ErrorKind::RemoteErr.into())
                }
            };
        }

        log::trace!("EIP response packet: {:02X?}", buf.payload());

        if command == REGISTER_SESSION_CMD {
            self.session_handle = session_handle;
            self.is_connected = true;

            log::debug!("EIP session registered, handle {:08x}", session_handle);

            // the whole payload is consumed
            let end = buf.payload_start();
            buf.set_payload_end(end);
            Ok(LayerResponse::Consumed)
        } else {
            // other layers will need to process this
            buf.set_payload_start(buf.payload_start() + EIP_HEADER_SIZE);
            Ok(LayerResponse::Forward)
        }
    }
}
