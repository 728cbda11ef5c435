// abtag
//
// a native rust client for Allen-Bradley PLCs over EtherNet/IP and CIP.
// Copyright: 2025-2026, the abtag project authors
// License: MIT

//! CIP connection layer.
//!
//! Two framings over the EIP payload. Unconnected messages use the common
//! packet format with a null address item and a 0xB2 data item, wrapping
//! the payload in Unconnected Send when a route path is configured.
//! Connected messages carry the connection ID in a 0xA1 address item and a
//! 16-bit monotone sequence number in the 0xB1 data item, after a Forward
//! Open handshake has negotiated the connection ID pair and payload size.

use crate::cip::{
    self, CIP_PATH_CONNECTION_MANAGER, CIP_PATH_MESSAGE_ROUTER, VENDOR_ID, VENDOR_SERIAL,
};
use crate::layer::{require, Layer, LayerResponse, PacketBuf};
use crate::{wire, ErrorKind, Result};
use rand::Rng;

/* CPF item types */
const CPF_ITEM_NULL_ADDRESS: u16 = 0x0000;
const CPF_ITEM_CONNECTED_ADDRESS: u16 = 0x00A1;
const CPF_ITEM_CONNECTED_DATA: u16 = 0x00B1;
const CPF_ITEM_UNCONNECTED_DATA: u16 = 0x00B2;

/* CPF header bytes: interface handle + router timeout + item count */
const CPF_PREFIX_SIZE: usize = 8;
const CPF_UNCONNECTED_HEADER_SIZE: usize = CPF_PREFIX_SIZE + 4 + 4;
const CPF_CONNECTED_HEADER_SIZE: usize = CPF_PREFIX_SIZE + 4 + 4 + 4 + 2;

/* Unconnected Send wrapper before the embedded payload */
const UCS_HEADER_SIZE: usize = 10;

const FORWARD_OPEN_SECS_PER_TICK: u8 = 10;
const FORWARD_OPEN_TIMEOUT_TICKS: u8 = 5;
const FORWARD_OPEN_TIMEOUT_MULTIPLIER: u8 = 1;
const FORWARD_OPEN_RPI_US: u32 = 1_000_000;
const TRANSPORT_CLASS_T3: u8 = 0xA3;

/// usable CIP payload on a standard Forward Open
pub(crate) const CIP_STD_PAYLOAD: usize = 504;
/// usable CIP payload on an extended Forward Open
pub(crate) const CIP_MAX_PAYLOAD: usize = 4002;

pub(crate) struct CipLayer {
    use_connected: bool,
    forward_open_ex: bool,
    route: Vec<u8>,
    payload_size: usize,

    is_connected: bool,
    awaiting_forward_open: bool,

    ot_conn_id: u32,
    to_conn_id: u32,
    conn_serial: u16,
    conn_seq: u16,
    last_seq_sent: u16,

    /* saved for the fix-up pass */
    payload_start: usize,
}

impl CipLayer {
    pub fn new(use_connected: bool, forward_open_ex: bool, payload_size: usize, route: Vec<u8>) -> Self {
        Self {
            use_connected,
            forward_open_ex,
            route,
            payload_size,
            is_connected: false,
            awaiting_forward_open: false,
            ot_conn_id: 0,
            to_conn_id: 0,
            conn_serial: 0,
            conn_seq: 0,
            last_seq_sent: 0,
            payload_start: 0,
        }
    }

    fn header_size(&self) -> usize {
        if self.use_connected && self.is_connected {
            CPF_CONNECTED_HEADER_SIZE
        } else if self.route.is_empty() {
            CPF_UNCONNECTED_HEADER_SIZE
        } else {
            CPF_UNCONNECTED_HEADER_SIZE + UCS_HEADER_SIZE
        }
    }

    /// trailing bytes reserved for the Unconnected Send route path
    fn tail_size(&self) -> usize {
        if self.use_connected && self.is_connected {
            0
        } else if self.route.is_empty() {
            0
        } else {
            2 + self.route.len() + (self.route.len() & 1)
        }
    }

    /// write the CPF prefix plus an unconnected item pair around
    /// `data_size` bytes of data item content
    fn write_unconnected_cpf(
        &self,
        data: &mut [u8],
        offset: &mut usize,
        cap: usize,
        data_size: usize,
    ) -> Result<()> {
        // interface handle and router timeout
        wire::set_u32_le(data, offset, cap, 0)?;
        wire::set_u16_le(data, offset, cap, 1)?;
        // two items: null address, unconnected data
        wire::set_u16_le(data, offset, cap, 2)?;
        wire::set_u16_le(data, offset, cap, CPF_ITEM_NULL_ADDRESS)?;
        wire::set_u16_le(data, offset, cap, 0)?;
        wire::set_u16_le(data, offset, cap, CPF_ITEM_UNCONNECTED_DATA)?;
        wire::set_u16_le(data, offset, cap, data_size as u16)?;
        Ok(())
    }

    /// full connection path: route, then the message router
    fn connection_path(&self) -> Vec<u8> {
        let mut path = self.route.clone();
        if path.len() & 1 != 0 {
            path.push(0);
        }
        path.extend_from_slice(&CIP_PATH_MESSAGE_ROUTER);
        path
    }

    fn process_forward_open_reply(&mut self, buf: &mut PacketBuf) -> Result<LayerResponse> {
        let cap = buf.payload_end();
        let mut offset = buf.payload_start();
        let data = buf.data();

        let service = wire::get_u8(data, &mut offset, cap)?;
        let _reserved = wire::get_u8(data, &mut offset, cap)?;
        let status = wire::get_u8(data, &mut offset, cap)?;
        let extra_words = wire::get_u8(data, &mut offset, cap)?;

        let expected = if self.forward_open_ex {
            cip::CIP_CMD_FORWARD_OPEN_EX | cip::CIP_CMD_OK
        } else {
            cip::CIP_CMD_FORWARD_OPEN | cip::CIP_CMD_OK
        };
        if service != expected {
            log::warn!("unexpected Forward Open reply service {:02x}", service);
            return Err(ErrorKind::BadReply.into());
        }

        if status != 0 {
            let mut extended = 0;
            if extra_words > 0 {
                extended = wire::get_u16_le(data, &mut offset, cap)?;
            }
            log::warn!(
                "Forward Open failed: {}",
                cip::decode_error_short(status, extended)
            );
            return Err(cip::decode_error_code(status, extended).into());
        }

        self.ot_conn_id = wire::get_u32_le(data, &mut offset, cap)?;
        self.to_conn_id = wire::get_u32_le(data, &mut offset, cap)?;
        let _serial_echo = wire::get_u16_le(data, &mut offset, cap)?;

        self.awaiting_forward_open = false;
        self.is_connected = true;

        log::debug!(
            "CIP connection open, O->T {:08x}, T->O {:08x}, payload {}",
            self.ot_conn_id,
            self.to_conn_id,
            self.payload_size
        );

        let end = buf.payload_start();
        buf.set_payload_end(end);
        Ok(LayerResponse::Consumed)
    }
}

impl Layer for CipLayer {
    fn initialize(&mut self) -> Result<()> {
        log::debug!("initializing CIP layer");

        self.is_connected = false;
        self.awaiting_forward_open = false;
        self.ot_conn_id = 0;
        self.to_conn_id = rand::thread_rng().gen();
        self.conn_serial = rand::thread_rng().gen();
        self.conn_seq = rand::thread_rng().gen();

        Ok(())
    }

    fn is_connected(&self) -> bool {
        // unconnected messaging needs no handshake
        !self.use_connected || self.is_connected
    }

    fn connect(&mut self, buf: &mut PacketBuf) -> Result<bool> {
        if !self.use_connected {
            return Ok(false);
        }

        log::debug!("building Forward Open packet");

        let base = buf.payload_start();
        let cap = buf.payload_end();
        let conn_path = self.connection_path();
        let forward_open_ex = self.forward_open_ex;
        let payload_size = self.payload_size;
        let to_conn_id = self.to_conn_id;
        let conn_serial = self.conn_serial;

        let mut offset = base + CPF_UNCONNECTED_HEADER_SIZE;
        let body_start = offset;
        {
            let data = buf.data_mut();

            let service = if forward_open_ex {
                cip::CIP_CMD_FORWARD_OPEN_EX
            } else {
                cip::CIP_CMD_FORWARD_OPEN
            };
            wire::set_u8(data, &mut offset, cap, service)?;
            wire::set_u8(data, &mut offset, cap, 2)?;
            wire::set_bytes(data, &mut offset, cap, &CIP_PATH_CONNECTION_MANAGER)?;

            wire::set_u8(data, &mut offset, cap, FORWARD_OPEN_SECS_PER_TICK)?;
            wire::set_u8(data, &mut offset, cap, FORWARD_OPEN_TIMEOUT_TICKS)?;
            // O->T connection ID is assigned by the target
            wire::set_u32_le(data, &mut offset, cap, 0)?;
            wire::set_u32_le(data, &mut offset, cap, to_conn_id)?;
            wire::set_u16_le(data, &mut offset, cap, conn_serial)?;
            wire::set_u16_le(data, &mut offset, cap, VENDOR_ID)?;
            wire::set_u32_le(data, &mut offset, cap, VENDOR_SERIAL)?;
            wire::set_u8(data, &mut offset, cap, FORWARD_OPEN_TIMEOUT_MULTIPLIER)?;
            // three reserved bytes
            wire::set_bytes(data, &mut offset, cap, &[0, 0, 0])?;

            // connection parameters: variable size, class 3, size field
            if forward_open_ex {
                let params: u32 = 0x4200_0000 | (payload_size as u32 & 0xFFFF);
                wire::set_u32_le(data, &mut offset, cap, FORWARD_OPEN_RPI_US)?;
                wire::set_u32_le(data, &mut offset, cap, params)?;
                wire::set_u32_le(data, &mut offset, cap, FORWARD_OPEN_RPI_US)?;
                wire::set_u32_le(data, &mut offset, cap, params)?;
            } else {
                let params: u16 = 0x4200 | (payload_size as u16 & 0x01FF);
                wire::set_u32_le(data, &mut offset, cap, FORWARD_OPEN_RPI_US)?;
                wire::set_u16_le(data, &mut offset, cap, params)?;
                wire::set_u32_le(data, &mut offset, cap, FORWARD_OPEN_RPI_US)?;
                wire::set_u16_le(data, &mut offset, cap, params)?;
            }

            wire::set_u8(data, &mut offset, cap, TRANSPORT_CLASS_T3)?;
            wire::set_u8(data, &mut offset, cap, (conn_path.len() / 2) as u8)?;
            wire::set_bytes(data, &mut offset, cap, &conn_path)?;
        }
        let body_size = offset - body_start;

        // frame it with the unconnected CPF items
        let mut cpf_offset = base;
        self.write_unconnected_cpf(buf.data_mut(), &mut cpf_offset, cap, body_size)?;

        buf.set_payload_end(offset);
        self.awaiting_forward_open = true;

        log::trace!("Forward Open packet: {:02X?}", buf.payload());

        Ok(true)
    }

    fn disconnect(&mut self, buf: &mut PacketBuf) -> Result<bool> {
        if !self.use_connected || !self.is_connected {
            return Ok(false);
        }

        log::debug!("building Forward Close packet");

        let base = buf.payload_start();
        let cap = buf.payload_end();
        let conn_path = self.connection_path();
        let conn_serial = self.conn_serial;

        let mut offset = base + CPF_UNCONNECTED_HEADER_SIZE;
        let body_start = offset;
        {
            let data = buf.data_mut();
            wire::set_u8(data, &mut offset, cap, cip::CIP_CMD_FORWARD_CLOSE)?;
            wire::set_u8(data, &mut offset, cap, 2)?;
            wire::set_bytes(data, &mut offset, cap, &CIP_PATH_CONNECTION_MANAGER)?;
            wire::set_u8(data, &mut offset, cap, FORWARD_OPEN_SECS_PER_TICK)?;
            wire::set_u8(data, &mut offset, cap, FORWARD_OPEN_TIMEOUT_TICKS)?;
            wire::set_u16_le(data, &mut offset, cap, conn_serial)?;
            wire::set_u16_le(data, &mut offset, cap, VENDOR_ID)?;
            wire::set_u32_le(data, &mut offset, cap, VENDOR_SERIAL)?;
            wire::set_u8(data, &mut offset, cap, (conn_path.len() / 2) as u8)?;
            wire::set_u8(data, &mut offset, cap, 0)?;
            wire::set_bytes(data, &mut offset, cap, &conn_path)?;
        }
        let body_size = offset - body_start;

        let mut cpf_offset = base;
        self.write_unconnected_cpf(buf.data_mut(), &mut cpf_offset, cap, body_size)?;

        buf.set_payload_end(offset);
        self.is_connected = false;

        Ok(true)
    }

    fn reserve_space(&mut self, buf: &mut PacketBuf) -> Result<()> {
        let header = self.header_size();
        let tail = self.tail_size();

        require(buf.payload_len() > header + tail, ErrorKind::TooSmall)?;

        buf.set_payload_start(buf.payload_start() + header);
        buf.set_payload_end(buf.payload_end() - tail);

        // clamp what the application may use to the negotiated size
        if buf.payload_len() > self.payload_size {
            let start = buf.payload_start();
            buf.set_payload_end(start + self.payload_size);
        }

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

        let header = self.header_size();
        let base = self.payload_start - header;
        let payload_size = buf.payload_len();
        let cap = buf.capacity();

        if self.use_connected && self.is_connected {
            self.conn_seq = self.conn_seq.wrapping_add(1);
            self.last_seq_sent = self.conn_seq;

            let ot_conn_id = self.ot_conn_id;
            let conn_seq = self.conn_seq;
            let mut offset = base;
            let data = buf.data_mut();

            wire::set_u32_le(data, &mut offset, cap, 0)?;
            wire::set_u16_le(data, &mut offset, cap, 0)?;
            wire::set_u16_le(data, &mut offset, cap, 2)?;
            wire::set_u16_le(data, &mut offset, cap, CPF_ITEM_CONNECTED_ADDRESS)?;
            wire::set_u16_le(data, &mut offset, cap, 4)?;
            wire::set_u32_le(data, &mut offset, cap, ot_conn_id)?;
            wire::set_u16_le(data, &mut offset, cap, CPF_ITEM_CONNECTED_DATA)?;
            wire::set_u16_le(data, &mut offset, cap, (payload_size + 2) as u16)?;
            wire::set_u16_le(data, &mut offset, cap, conn_seq)?;
        } else if self.route.is_empty() {
            let mut offset = base;
            self.write_unconnected_cpf(buf.data_mut(), &mut offset, cap, payload_size)?;
        } else {
            // Unconnected Send: route path rides behind the embedded payload
            let route_words = (self.route.len() + (self.route.len() & 1)) / 2;
            let route = self.route.clone();

            let mut tail_offset = buf.payload_end();
            {
                let data = buf.data_mut();
                wire::set_u8(data, &mut tail_offset, cap, route_words as u8)?;
                wire::set_u8(data, &mut tail_offset, cap, 0)?;
                wire::set_bytes(data, &mut tail_offset, cap, &route)?;
                if route.len() & 1 != 0 {
                    wire::set_u8(data, &mut tail_offset, cap, 0)?;
                }
            }

            let mut offset = base;
            let data_item_size = UCS_HEADER_SIZE + payload_size + (tail_offset - buf.payload_end());
            self.write_unconnected_cpf(buf.data_mut(), &mut offset, cap, data_item_size)?;
            {
                let data = buf.data_mut();
                wire::set_u8(data, &mut offset, cap, cip::CIP_CMD_UNCONNECTED_SEND)?;
                wire::set_u8(data, &mut offset, cap, 2)?;
                wire::set_bytes(data, &mut offset, cap, &CIP_PATH_CONNECTION_MANAGER)?;
                wire::set_u8(data, &mut offset, cap, FORWARD_OPEN_SECS_PER_TICK)?;
                wire::set_u8(data, &mut offset, cap, FORWARD_OPEN_TIMEOUT_TICKS)?;
                wire::set_u16_le(data, &mut offset, cap, payload_size as u16)?;
            }

            buf.set_payload_end(tail_offset);
        }

        buf.set_payload_start(base);

        Ok(())
    }

    fn process_response(&mut self, buf: &mut PacketBuf) -> Result<LayerResponse> {
        let cap = buf.payload_end();
        let mut offset = buf.payload_start();
        let data = buf.data();

        if buf.payload_len() < CPF_UNCONNECTED_HEADER_SIZE {
            return Ok(LayerResponse::Partial);
        }

        let _interface_handle = wire::get_u32_le(data, &mut offset, cap)?;
        let _router_timeout = wire::get_u16_le(data, &mut offset, cap)?;
        let item_count = wire::get_u16_le(data, &mut offset, cap)?;
        if item_count != 2 {
            log::warn!("expected 2 CPF items, got {}", item_count);
            return Err(ErrorKind::BadData.into());
        }

        let addr_type = wire::get_u16_le(data, &mut offset, cap)?;
        let addr_len = wire::get_u16_le(data, &mut offset, cap)? as usize;

        match addr_type {
            CPF_ITEM_NULL_ADDRESS => {
                let data_type = wire::get_u16_le(data, &mut offset, cap)?;
                let _data_len = wire::get_u16_le(data, &mut offset, cap)?;
                if data_type != CPF_ITEM_UNCONNECTED_DATA {
                    log::warn!("expected unconnected data item, got {:04x}", data_type);
                    return Err(ErrorKind::BadData.into());
                }

                buf.set_payload_start(offset);

                if self.awaiting_forward_open {
                    return self.process_forward_open_reply(buf);
                }

                Ok(LayerResponse::Forward)
            }
            CPF_ITEM_CONNECTED_ADDRESS => {
                if addr_len != 4 {
                    return Err(ErrorKind::BadData.into());
                }
                let conn_id = wire::get_u32_le(data, &mut offset, cap)?;
                let data_type = wire::get_u16_le(data, &mut offset, cap)?;
                let _data_len = wire::get_u16_le(data, &mut offset, cap)?;
                let seq = wire::get_u16_le(data, &mut offset, cap)?;

                if data_type != CPF_ITEM_CONNECTED_DATA {
                    log::warn!("expected connected data item, got {:04x}", data_type);
                    return Err(ErrorKind::BadData.into());
                }
                if conn_id != self.to_conn_id {
                    log::warn!(
                        "connected response for connection {:08x}, expected {:08x}",
                        conn_id,
                        self.to_conn_id
                    );
                    return Err(ErrorKind::NoMatch.into());
                }
                if seq != self.last_seq_sent {
                    log::warn!(
                        "connected response sequence {} does not match sent {}",
                        seq,
                        self.last_seq_sent
                    );
                    return Err(ErrorKind::NoMatch.into());
                }

                buf.set_payload_start(offset);
                Ok(LayerResponse::Forward)
            }
            other => {
                log::warn!("unexpected CPF address item type {:04x}", other);
                Err(ErrorKind::BadData.into())
            }
        }
    }
}

/// assemble a Multiple Service Packet from pre-built request bodies
pub(crate) fn build_multi_service(
    bodies: &[Vec<u8>],
    data: &mut [u8],
    offset: &mut usize,
    cap: usize,
) -> Result<()> {
    wire::set_u8(data, offset, cap, cip::CIP_CMD_MULTI)?;
    wire::set_u8(data, offset, cap, 2)?;
    wire::set_bytes(data, offset, cap, &CIP_PATH_MESSAGE_ROUTER)?;

    let count_pos = *offset;
    wire::set_u16_le(data, offset, cap, bodies.len() as u16)?;

    // the offsets are relative to the service-count field
    let mut body_offset = 2 + 2 * bodies.len();
    for body in bodies {
        wire::set_u16_le(data, offset, cap, body_offset as u16)?;
        body_offset += body.len();
    }
    for body in bodies {
        wire::set_bytes(data, offset, cap, body)?;
    }

    debug_assert_eq!(*offset - count_pos, body_offset);

    Ok(())
}

/// split a Multiple Service Packet reply into its per-request payload ranges,
/// relative to `payload`
pub(crate) fn split_multi_service(payload: &[u8]) -> Result<Vec<(usize, usize)>> {
    let cap = payload.len();
    let mut offset = 0;

    let service = wire::get_u8(payload, &mut offset, cap)?;
    let _reserved = wire::get_u8(payload, &mut offset, cap)?;
    let status = wire::get_u8(payload, &mut offset, cap)?;
    let extra_words = wire::get_u8(payload, &mut offset, cap)? as usize;

    if service != (cip::CIP_CMD_MULTI | cip::CIP_CMD_OK) {
        log::warn!("unexpected multiple-service reply {:02x}", service);
        return Err(ErrorKind::NoMatch.into());
    }
    // 0x1E means at least one embedded service failed; the per-service
    // statuses still follow, so keep splitting.
    if status != cip::CIP_STATUS_OK && status != 0x1E {
        let mut extended = 0;
        if extra_words > 0 {
            extended = wire::get_u16_le(payload, &mut offset, cap)?;
        }
        return Err(cip::decode_error_code(status, extended).into());
    }
    offset += extra_words * 2;

    let base = offset;
    let count = wire::get_u16_le(payload, &mut offset, cap)? as usize;
    let mut starts = Vec::with_capacity(count);
    for _ in 0..count {
        starts.push(base + wire::get_u16_le(payload, &mut offset, cap)? as usize);
    }

    let mut ranges = Vec::with_capacity(count);
    for (i, &start) in starts.iter().enumerate() {
        let end = if i + 1 < count { starts[i + 1] } else { cap };
        if start > end || end > cap {
            return Err(ErrorKind::Decode.into());
        }
        ranges.push((start, end));
    }

    Ok(ranges)
}
