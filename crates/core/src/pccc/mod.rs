// abtag
//
// a native rust client for Allen-Bradley PLCs over EtherNet/IP and CIP.
// Copyright: 2025-2026, the abtag project authors
// License: MIT

//! PCCC/DF1 data-table addressing for the PLC-5, SLC 500 and MicroLogix
//! families: the logical-address grammar, the per-file-type defaults, and
//! the two wire encodings.
//!
//! ```text
//! addr       ::= file-type file-num ':' elem-num ( ('.' mnemonic) | ('/' bit) )?
//! file-type  ::= 'N' | 'F' | 'B' | 'T' | 'C' | 'R' | 'I' | 'O' | 'S' | 'ST'
//!              | 'SC' | 'L' | 'A' | 'D' | 'MG' | 'PD' | 'BT'
//! ```

pub(crate) mod layer;

use crate::{wire, ErrorKind, Result};

pub(crate) const DF1_TYPED_CMD: u8 = 0x0F;
/* flag set on the command byte in replies */
pub(crate) const DF1_CMD_OK: u8 = 0x40;

pub(crate) const PLC5_RANGE_READ_FUNC: u8 = 0x01;
pub(crate) const PLC5_RANGE_WRITE_FUNC: u8 = 0x00;
pub(crate) const SLC_PROTECTED_TYPED_READ_3_ADDR: u8 = 0xA2;
pub(crate) const SLC_PROTECTED_TYPED_WRITE_3_ADDR: u8 = 0xAA;
/* protected typed logical write with mask, used for bit writes */
pub(crate) const PCCC_RMW_FUNC: u8 = 0x26;

pub(crate) const PLC5_WORD_RANGE_READ_MAX_PAYLOAD: usize = 240;
pub(crate) const PLC5_WORD_RANGE_WRITE_MAX_PAYLOAD: usize = 242;
pub(crate) const SLC_PROTECTED_READ_MAX_PAYLOAD: usize = 225;
pub(crate) const SLC_PROTECTED_WRITE_MAX_PAYLOAD: usize = 223;

/// data-table file types
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FileType {
    Ascii,
    Bcd,
    Bit,
    BlockTransfer,
    Counter,
    Control,
    Float,
    Input,
    Int,
    LongInt,
    Message,
    Output,
    Pid,
    Sfc,
    Status,
    String,
    Timer,
}

impl FileType {
    /// the DF1 file-type byte used in SLC protected typed commands
    pub(crate) fn slc_type_byte(&self) -> u8 {
        match self {
            FileType::BlockTransfer => 0x83,
            FileType::Status => 0x84,
            FileType::Bit => 0x85,
            FileType::Timer => 0x86,
            FileType::Counter => 0x87,
            FileType::Control => 0x88,
            FileType::Int => 0x89,
            FileType::Float => 0x8A,
            FileType::Output => 0x8B,
            FileType::Input => 0x8C,
            FileType::String => 0x8D,
            FileType::Ascii => 0x8E,
            FileType::Bcd => 0x8F,
            FileType::Sfc => 0x90,
            FileType::LongInt => 0x91,
            FileType::Message => 0x92,
            FileType::Pid => 0x93,
        }
    }

    /// element stride in bytes when the user does not override `elem_size`
    pub(crate) fn default_elem_size(&self) -> usize {
        match self {
            FileType::Ascii
            | FileType::Bcd
            | FileType::Bit
            | FileType::Input
            | FileType::Int
            | FileType::Output
            | FileType::Status => 2,
            FileType::Float | FileType::LongInt => 4,
            FileType::Counter | FileType::Control | FileType::Sfc | FileType::Timer => 6,
            FileType::BlockTransfer => 12,
            FileType::Message => 50,
            FileType::Pid => 46,
            FileType::String => 84,
        }
    }
}

/// a parsed `N7:12/3`-style logical address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalAddress {
    pub file_type: FileType,
    pub file_num: u16,
    pub elem_num: u16,
    /// mnemonic sub-element, e.g. `.ACC`
    pub sub_elem: Option<u16>,
    /// `/bit` selector was present
    pub is_bit: bool,
    pub bit: u8,
}

/// parse a PCCC logical address
pub fn parse_logical_address(name: &str) -> Result<LogicalAddress> {
    let bytes = name.as_bytes();
    let mut pos = 0;

    let file_type = parse_file_type(bytes, &mut pos)?;
    let file_num = parse_num(bytes, &mut pos).ok_or(ErrorKind::BadParam)?;

    if bytes.get(pos) != Some(&b':') {
        log::warn!("expected data-table element number in {:?}", name);
        return Err(ErrorKind::BadParam.into());
    }
    pos += 1;
    let elem_num = parse_num(bytes, &mut pos).ok_or(ErrorKind::BadParam)?;

    let mut addr = LogicalAddress {
        file_type,
        file_num,
        elem_num,
        sub_elem: None,
        is_bit: false,
        bit: 0,
    };

    match bytes.get(pos) {
        None => Ok(addr),
        Some(b'/') => {
            pos += 1;
            let bit = parse_num(bytes, &mut pos).ok_or(ErrorKind::BadParam)?;
            if pos != bytes.len() || bit > 255 {
                return Err(ErrorKind::BadParam.into());
            }
            addr.is_bit = true;
            addr.bit = bit as u8;
            Ok(addr)
        }
        Some(b'.') => {
            pos += 1;
            let mnemonic = &name[pos..];
            addr.sub_elem = Some(parse_mnemonic(file_type, mnemonic)?);
            Ok(addr)
        }
        Some(_) => {
            log::warn!("bad sub-element field in logical address {:?}", name);
            Err(ErrorKind::BadParam.into())
        }
    }
}

fn parse_file_type(bytes: &[u8], pos: &mut usize) -> Result<FileType> {
    let first = *bytes.get(*pos).ok_or(ErrorKind::BadParam)? as char;
    let second = bytes.get(*pos + 1).map(|&b| b as char);

    let two_letter = |pos: &mut usize| *pos += 2;

    let ft = match first.to_ascii_uppercase() {
        'A' => {
            *pos += 1;
            FileType::Ascii
        }
        'B' => match second {
            Some(c) if c.is_ascii_digit() => {
                *pos += 1;
                FileType::Bit
            }
            Some('T') | Some('t') => {
                two_letter(pos);
                FileType::BlockTransfer
            }
            _ => return Err(ErrorKind::BadParam.into()),
        },
        'C' => {
            *pos += 1;
            FileType::Counter
        }
        'D' => {
            *pos += 1;
            FileType::Bcd
        }
        'F' => {
            *pos += 1;
            FileType::Float
        }
        'I' => {
            *pos += 1;
            FileType::Input
        }
        'L' => {
            *pos += 1;
            FileType::LongInt
        }
        'M' => match second {
            Some('G') | Some('g') => {
                two_letter(pos);
                FileType::Message
            }
            _ => return Err(ErrorKind::BadParam.into()),
        },
        'N' => {
            *pos += 1;
            FileType::Int
        }
        'O' => {
            *pos += 1;
            FileType::Output
        }
        'P' => match second {
            Some('D') | Some('d') => {
                two_letter(pos);
                FileType::Pid
            }
            _ => return Err(ErrorKind::BadParam.into()),
        },
        'R' => {
            *pos += 1;
            FileType::Control
        }
        'S' => match second {
            Some(c) if c.is_ascii_digit() => {
                *pos += 1;
                FileType::Status
            }
            Some('C') | Some('c') => {
                two_letter(pos);
                FileType::Sfc
            }
            Some('T') | Some('t') => {
                two_letter(pos);
                FileType::String
            }
            _ => return Err(ErrorKind::BadParam.into()),
        },
        'T' => {
            *pos += 1;
            FileType::Timer
        }
        _ => return Err(ErrorKind::BadParam.into()),
    };

    Ok(ft)
}

fn parse_num(bytes: &[u8], pos: &mut usize) -> Option<u16> {
    let start = *pos;
    let mut val: u32 = 0;
    while *pos < bytes.len() && bytes[*pos].is_ascii_digit() && val < 65535 {
        val = val * 10 + (bytes[*pos] - b'0') as u32;
        *pos += 1;
    }
    if *pos == start || val > 65535 {
        None
    } else {
        Some(val as u16)
    }
}

/// sub-element index for a per-file-type mnemonic
fn parse_mnemonic(file_type: FileType, mnemonic: &str) -> Result<u16> {
    let m = mnemonic.to_ascii_lowercase();
    let sub = match file_type {
        FileType::BlockTransfer => match m.as_str() {
            "con" => 0,
            "rlen" => 1,
            "dlen" => 2,
            "df" => 3,
            "elem" => 4,
            "rgs" => 5,
            _ => return Err(ErrorKind::BadParam.into()),
        },
        FileType::Counter | FileType::Timer => match m.as_str() {
            "con" => 0,
            "pre" => 1,
            "acc" => 2,
            _ => return Err(ErrorKind::BadParam.into()),
        },
        FileType::Control => match m.as_str() {
            "con" => 0,
            "len" => 1,
            "pos" => 2,
            _ => return Err(ErrorKind::BadParam.into()),
        },
        FileType::Pid => match m.as_str() {
            "con" => 0,
            "sp" => 2,
            "kp" => 4,
            "ki" => 6,
            "kd" => 8,
            "pv" => 26,
            _ => return Err(ErrorKind::BadParam.into()),
        },
        FileType::Message => match m.as_str() {
            "con" => 0,
            "err" => 1,
            "rlen" => 2,
            "dlen" => 3,
            _ => return Err(ErrorKind::BadParam.into()),
        },
        FileType::String => match m.as_str() {
            "len" => 0,
            "data" => 1,
            _ => return Err(ErrorKind::BadParam.into()),
        },
        _ => {
            log::warn!("unsupported mnemonic {:?} for this file type", mnemonic);
            return Err(ErrorKind::BadParam.into());
        }
    };
    Ok(sub)
}

#[inline]
fn encode_level(buf: &mut [u8], offset: &mut usize, capacity: usize, val: u16) -> Result<()> {
    if val <= 0xFE {
        wire::set_u8(buf, offset, capacity, val as u8)
    } else {
        wire::set_u8(buf, offset, capacity, 0xFF)?;
        wire::set_u16_le(buf, offset, capacity, val)
    }
}

/// PLC-5 wire form: level bitmap, then file / element / sub-element.
///
/// 0x0E = 0b1110 = levels 1, 2 and 3 (3 = sub-element); 0x06 = levels 1 and 2.
pub(crate) fn encode_plc5_address(
    buf: &mut [u8],
    offset: &mut usize,
    capacity: usize,
    addr: &LogicalAddress,
) -> Result<()> {
    match addr.sub_elem {
        Some(sub) if sub > 0 => wire::set_u8(buf, offset, capacity, 0x0E)?,
        _ => wire::set_u8(buf, offset, capacity, 0x06)?,
    }

    encode_level(buf, offset, capacity, addr.file_num)?;
    encode_level(buf, offset, capacity, addr.elem_num)?;

    if let Some(sub) = addr.sub_elem {
        encode_level(buf, offset, capacity, sub)?;
    }

    Ok(())
}

/// SLC wire form: file number, file-type byte, element, sub-element (0 when absent)
pub(crate) fn encode_slc_address(
    buf: &mut [u8],
    offset: &mut usize,
    capacity: usize,
    addr: &LogicalAddress,
) -> Result<()> {
    encode_level(buf, offset, capacity, addr.file_num)?;
    wire::set_u8(buf, offset, capacity, addr.file_type.slc_type_byte())?;
    encode_level(buf, offset, capacity, addr.elem_num)?;
    encode_level(buf, offset, capacity, addr.sub_elem.unwrap_or(0))?;
    Ok(())
}

/// human-readable text for a DF1 error status byte
pub(crate) fn decode_error(status: u8, extended: u16) -> &'static str {
    let code = if status == 0xF0 {
        extended as u32 | 0x100
    } else {
        status as u32
    };
    match code {
        1 => "Error converting block address.",
        2 => "Less levels specified in address than minimum for any address.",
        3 => "More levels specified in address than system supports",
        4 => "Symbol not found.",
        5 => "Symbol is of improper format.",
        6 => "Address doesn't point to something usable.",
        7 => "File is wrong size.",
        8 => "Cannot complete request, situation has changed since the start of the command.",
        9 => "File is too large.",
        0x0A => "Transaction size plus word address is too large.",
        0x0B => "Access denied, improper privilege.",
        0x0C => "Condition cannot be generated - resource is not available.",
        0x0D => "Condition already exists - resource is already available.",
        0x0E => "Command could not be executed.",
        0x0F => "Histogram overflow.",
        0x10 => "No access.",
        _ => "Unrecognized PCCC error.",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_int_file() {
        let addr = parse_logical_address("N7:12").unwrap();
        assert_eq!(addr.file_type, FileType::Int);
        assert_eq!(addr.file_num, 7);
        assert_eq!(addr.elem_num, 12);
        assert_eq!(addr.sub_elem, None);
        assert!(!addr.is_bit);
    }

    #[test]
    fn test_parse_bit_selector() {
        let addr = parse_logical_address("B3:5/7").unwrap();
        assert_eq!(addr.file_type, FileType::Bit);
        assert_eq!(addr.file_num, 3);
        assert_eq!(addr.elem_num, 5);
        assert!(addr.is_bit);
        assert_eq!(addr.bit, 7);
        assert_eq!(addr.sub_elem, None);
    }

    #[test]
    fn test_parse_mnemonics() {
        let addr = parse_logical_address("C5:0.ACC").unwrap();
        assert_eq!(addr.file_type, FileType::Counter);
        assert_eq!(addr.sub_elem, Some(2));

        let addr = parse_logical_address("T4:1.PRE").unwrap();
        assert_eq!(addr.sub_elem, Some(1));

        let addr = parse_logical_address("R6:0.POS").unwrap();
        assert_eq!(addr.sub_elem, Some(2));

        let addr = parse_logical_address("PD10:2.KI").unwrap();
        assert_eq!(addr.file_type, FileType::Pid);
        assert_eq!(addr.sub_elem, Some(6));

        let addr = parse_logical_address("PD10:2.PV").unwrap();
        assert_eq!(addr.sub_elem, Some(26));

        let addr = parse_logical_address("MG14:0.DLEN").unwrap();
        assert_eq!(addr.sub_elem, Some(3));

        let addr = parse_logical_address("BT9:0.RLEN").unwrap();
        assert_eq!(addr.file_type, FileType::BlockTransfer);
        assert_eq!(addr.sub_elem, Some(1));

        let addr = parse_logical_address("ST15:0.LEN").unwrap();
        assert_eq!(addr.file_type, FileType::String);
        assert_eq!(addr.sub_elem, Some(0));
    }

    #[test]
    fn test_parse_rejects() {
        assert!(parse_logical_address("N7").is_err());
        assert!(parse_logical_address("X7:0").is_err());
        assert!(parse_logical_address("N7:0.BOGUS").is_err());
        assert!(parse_logical_address("N:0").is_err());
        assert!(parse_logical_address("N7:0/999").is_err());
        assert!(parse_logical_address("N7:0.ACC").is_err()); // no mnemonics on plain int files
    }

    #[test]
    fn test_two_letter_types() {
        assert_eq!(
            parse_logical_address("SC2:0").unwrap().file_type,
            FileType::Sfc
        );
        assert_eq!(
            parse_logical_address("S2:1").unwrap().file_type,
            FileType::Status
        );
        assert_eq!(
            parse_logical_address("st9:0").unwrap().file_type,
            FileType::String
        );
    }

    fn addr(file_num: u16, elem_num: u16, sub: Option<u16>) -> LogicalAddress {
        LogicalAddress {
            file_type: FileType::Int,
            file_num,
            elem_num,
            sub_elem: sub,
            is_bit: false,
            bit: 0,
        }
    }

    #[test]
    fn test_plc5_encoding() {
        let mut buf = [0u8; 16];

        let mut off = 0;
        encode_plc5_address(&mut buf, &mut off, 16, &addr(7, 0, None)).unwrap();
        assert_eq!(&buf[..off], &[0x06, 0x07, 0x00]);

        let mut off = 0;
        encode_plc5_address(&mut buf, &mut off, 16, &addr(0xFE, 0xFF, None)).unwrap();
        assert_eq!(&buf[..off], &[0x06, 0xFE, 0xFF, 0xFF, 0x00]);

        let mut off = 0;
        encode_plc5_address(&mut buf, &mut off, 16, &addr(0x100, 0xFFFF, Some(2))).unwrap();
        assert_eq!(
            &buf[..off],
            &[0x0E, 0xFF, 0x00, 0x01, 0xFF, 0xFF, 0xFF, 0x02]
        );

        let mut off = 0;
        encode_plc5_address(&mut buf, &mut off, 16, &addr(0, 0, None)).unwrap();
        assert_eq!(&buf[..off], &[0x06, 0x00, 0x00]);
    }

    #[test]
    fn test_slc_encoding() {
        let mut buf = [0u8; 16];

        let mut off = 0;
        let a = LogicalAddress {
            file_type: FileType::Bit,
            file_num: 3,
            elem_num: 5,
            sub_elem: None,
            is_bit: true,
            bit: 7,
        };
        encode_slc_address(&mut buf, &mut off, 16, &a).unwrap();
        assert_eq!(&buf[..off], &[0x03, 0x85, 0x05, 0x00]);

        let mut off = 0;
        let a = LogicalAddress {
            file_type: FileType::Int,
            file_num: 0xFF,
            elem_num: 0x100,
            sub_elem: Some(0xFFFF),
            is_bit: false,
            bit: 0,
        };
        encode_slc_address(&mut buf, &mut off, 16, &a).unwrap();
        assert_eq!(
            &buf[..off],
            &[0xFF, 0xFF, 0x00, 0x89, 0xFF, 0x00, 0x01, 0xFF, 0xFF, 0xFF]
        );
    }

    #[test]
    fn test_default_elem_sizes() {
        assert_eq!(FileType::Int.default_elem_size(), 2);
        assert_eq!(FileType::Float.default_elem_size(), 4);
        assert_eq!(FileType::Timer.default_elem_size(), 6);
        assert_eq!(FileType::String.default_elem_size(), 84);
    }
}
