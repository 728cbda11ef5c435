// abtag
//
// a native rust client for Allen-Bradley PLCs over EtherNet/IP and CIP.
// Copyright: 2025-2026, the abtag project authors
// License: MIT

//! CIP services, status codes and the connection layer.

pub(crate) mod layer;
pub(crate) mod name;

use crate::ErrorKind;

/* tag services */
pub(crate) const CIP_CMD_MULTI: u8 = 0x0A;
pub(crate) const CIP_CMD_GET_ATTRIBS: u8 = 0x03;
pub(crate) const CIP_CMD_READ: u8 = 0x4C;
pub(crate) const CIP_CMD_WRITE: u8 = 0x4D;
pub(crate) const CIP_CMD_RMW: u8 = 0x4E;
pub(crate) const CIP_CMD_READ_FRAG: u8 = 0x52;
pub(crate) const CIP_CMD_WRITE_FRAG: u8 = 0x53;
pub(crate) const CIP_CMD_LIST_TAGS: u8 = 0x55;

/* flag set on the service code when the reply is OK */
pub(crate) const CIP_CMD_OK: u8 = 0x80;

pub(crate) const CIP_STATUS_OK: u8 = 0x00;
pub(crate) const CIP_STATUS_FRAG: u8 = 0x06;

/* connection manager services */
pub(crate) const CIP_CMD_FORWARD_OPEN: u8 = 0x54;
pub(crate) const CIP_CMD_FORWARD_OPEN_EX: u8 = 0x5B;
pub(crate) const CIP_CMD_FORWARD_CLOSE: u8 = 0x4E;
pub(crate) const CIP_CMD_UNCONNECTED_SEND: u8 = 0x52;

/* well-known class paths, two words each */
pub(crate) const CIP_PATH_CONNECTION_MANAGER: [u8; 4] = [0x20, 0x06, 0x24, 0x01];
pub(crate) const CIP_PATH_MESSAGE_ROUTER: [u8; 4] = [0x20, 0x02, 0x24, 0x01];

/* identity the library presents in Forward Open and PCCC requests */
pub(crate) const VENDOR_ID: u16 = 0xF33D;
pub(crate) const VENDOR_SERIAL: u32 = 0x21504345;

/// parse the four-byte CIP service response header at the start of
/// `payload`.
///
/// Verifies the reply service is one of `expected` (already OR'd with
/// [`CIP_CMD_OK`]) and that the general status is OK or the fragmentation
/// status. Returns the status byte and the offset of the response data.
pub(crate) fn parse_response_header(
    payload: &[u8],
    expected: &[u8],
) -> crate::Result<(u8, usize)> {
    use crate::wire;

    let cap = payload.len();
    let mut offset = 0;

    let service = wire::get_u8(payload, &mut offset, cap)?;
    let _reserved = wire::get_u8(payload, &mut offset, cap)?;
    let status = wire::get_u8(payload, &mut offset, cap)?;
    let extra_words = wire::get_u8(payload, &mut offset, cap)?;

    if !expected.contains(&service) {
        log::warn!("unexpected CIP service response type {:02x}", service);
        return Err(ErrorKind::NoMatch.into());
    }

    if status != CIP_STATUS_OK && status != CIP_STATUS_FRAG {
        let mut extended = 0;
        if extra_words > 0 {
            extended = wire::get_u16_le(payload, &mut offset, cap)?;
        }
        log::warn!(
            "error response from the PLC: {}",
            decode_error_short(status, extended)
        );
        return Err(decode_error_code(status, extended).into());
    }

    Ok((status, offset))
}

/// map a CIP general status (+ extended status) onto an error kind
pub(crate) fn decode_error_code(status: u8, extended: u16) -> ErrorKind {
    match status {
        0x01 => match extended {
            0x0103 => ErrorKind::Unsupported,
            0x0204 => ErrorKind::Timeout,
            0x0311 | 0x0312 | 0x0315 => ErrorKind::BadParam,
            0x0100 | 0x0113 | 0x011A => ErrorKind::NoMem,
            _ => ErrorKind::RemoteErr,
        },
        0x04 => ErrorKind::NotFound,
        0x05 => ErrorKind::BadParam,
        0x08 => ErrorKind::Unsupported,
        0x09 => ErrorKind::BadParam,
        0x0A => ErrorKind::RemoteErr,
        0x0C => ErrorKind::NotAllowed,
        0x10 => ErrorKind::NotAllowed,
        0x11 => ErrorKind::TooLarge,
        0x13 => ErrorKind::TooSmall,
        0x1E => ErrorKind::RemoteErr,
        0x20 => ErrorKind::BadParam,
        0x26 => ErrorKind::BadParam,
        0xFF => ErrorKind::RemoteErr,
        _ => ErrorKind::BadStatus,
    }
}

/// short diagnostic string for a CIP general status
pub(crate) fn decode_error_short(status: u8, extended: u16) -> &'static str {
    match status {
        0x01 => match extended {
            0x0103 => "CIP connection failed, unsupported transport",
            0x0204 => "CIP connection timed out",
            0x0311 => "invalid port in connection path",
            0x0312 => "invalid link address in connection path",
            0x0315 => "invalid segment type in connection path",
            _ => "CIP connection failure",
        },
        0x04 => "segment or object not found",
        0x05 => "path destination unknown",
        0x08 => "unsupported service",
        0x09 => "invalid attribute value",
        0x0A => "attribute list error",
        0x0C => "object state conflict",
        0x10 => "device state conflict",
        0x11 => "reply data too large",
        0x13 => "insufficient request data",
        0x1E => "embedded service error",
        0x20 => "invalid request parameter",
        0x26 => "invalid path size",
        0xFF => "general error",
        _ => "unrecognized CIP status",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_error() {
        assert_eq!(decode_error_code(0x00, 0), ErrorKind::BadStatus);
        assert_eq!(decode_error_code(0x04, 0), ErrorKind::NotFound);
        assert_eq!(decode_error_code(0x08, 0), ErrorKind::Unsupported);
        assert_eq!(decode_error_code(0x01, 0x0204), ErrorKind::Timeout);
        assert_eq!(decode_error_code(0x7A, 0), ErrorKind::BadStatus);
    }
}
