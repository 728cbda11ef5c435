// abtag
//
// a native rust client for Allen-Bradley PLCs over EtherNet/IP and CIP.
// Copyright: 2025-2026, the abtag project authors
// License: MIT

//! bounds-checked little-endian accessors over raw packet buffers.
//!
//! Every accessor takes the buffer, a cursor that is advanced on success,
//! and an explicit capacity. An access that would cross the capacity fails
//! with [`ErrorKind::OutOfBounds`] and leaves the cursor untouched.

use crate::{ErrorKind, Result};
use byteorder::{ByteOrder, LittleEndian};

#[inline]
fn check(offset: usize, len: usize, capacity: usize) -> Result<()> {
    if offset.checked_add(len).map_or(true, |end| end > capacity) {
        return Err(ErrorKind::OutOfBounds.into());
    }
    Ok(())
}

/// read one byte at `*offset`, advancing the cursor
#[inline]
pub fn get_u8(buf: &[u8], offset: &mut usize, capacity: usize) -> Result<u8> {
    check(*offset, 1, capacity.min(buf.len()))?;
    let val = buf[*offset];
    *offset += 1;
    Ok(val)
}

/// read a little-endian u16 at `*offset`, advancing the cursor
#[inline]
pub fn get_u16_le(buf: &[u8], offset: &mut usize, capacity: usize) -> Result<u16> {
    check(*offset, 2, capacity.min(buf.len()))?;
    let val = LittleEndian::read_u16(&buf[*offset..]);
    *offset += 2;
    Ok(val)
}

/// read a little-endian u32 at `*offset`, advancing the cursor
#[inline]
pub fn get_u32_le(buf: &[u8], offset: &mut usize, capacity: usize) -> Result<u32> {
    check(*offset, 4, capacity.min(buf.len()))?;
    let val = LittleEndian::read_u32(&buf[*offset..]);
    *offset += 4;
    Ok(val)
}

/// read a little-endian u64 at `*offset`, advancing the cursor
#[inline]
pub fn get_u64_le(buf: &[u8], offset: &mut usize, capacity: usize) -> Result<u64> {
    check(*offset, 8, capacity.min(buf.len()))?;
    let val = LittleEndian::read_u64(&buf[*offset..]);
    *offset += 8;
    Ok(val)
}

/// write one byte at `*offset`, advancing the cursor
#[inline]
pub fn set_u8(buf: &mut [u8], offset: &mut usize, capacity: usize, val: u8) -> Result<()> {
    check(*offset, 1, capacity.min(buf.len()))?;
    buf[*offset] = val;
    *offset += 1;
    Ok(())
}

/// write a little-endian u16 at `*offset`, advancing the cursor
#[inline]
pub fn set_u16_le(buf: &mut [u8], offset: &mut usize, capacity: usize, val: u16) -> Result<()> {
    check(*offset, 2, capacity.min(buf.len()))?;
    LittleEndian::write_u16(&mut buf[*offset..], val);
    *offset += 2;
    Ok(())
}

/// write a little-endian u32 at `*offset`, advancing the cursor
#[inline]
pub fn set_u32_le(buf: &mut [u8], offset: &mut usize, capacity: usize, val: u32) -> Result<()> {
    check(*offset, 4, capacity.min(buf.len()))?;
    LittleEndian::write_u32(&mut buf[*offset..], val);
    *offset += 4;
    Ok(())
}

/// write a little-endian u64 at `*offset`, advancing the cursor
#[inline]
pub fn set_u64_le(buf: &mut [u8], offset: &mut usize, capacity: usize, val: u64) -> Result<()> {
    check(*offset, 8, capacity.min(buf.len()))?;
    LittleEndian::write_u64(&mut buf[*offset..], val);
    *offset += 8;
    Ok(())
}

/// read an IEEE-754 f32 via the u32 path
#[allow(dead_code)]
#[inline]
pub fn get_f32_le(buf: &[u8], offset: &mut usize, capacity: usize) -> Result<f32> {
    let bits = get_u32_le(buf, offset, capacity)?;
    Ok(f32::from_bits(bits))
}

/// read an IEEE-754 f64 via the u64 path
#[allow(dead_code)]
#[inline]
pub fn get_f64_le(buf: &[u8], offset: &mut usize, capacity: usize) -> Result<f64> {
    let bits = get_u64_le(buf, offset, capacity)?;
    Ok(f64::from_bits(bits))
}

/// write an IEEE-754 f32 via the u32 path
#[allow(dead_code)]
#[inline]
pub fn set_f32_le(buf: &mut [u8], offset: &mut usize, capacity: usize, val: f32) -> Result<()> {
    set_u32_le(buf, offset, capacity, val.to_bits())
}

/// write an IEEE-754 f64 via the u64 path
#[allow(dead_code)]
#[inline]
pub fn set_f64_le(buf: &mut [u8], offset: &mut usize, capacity: usize, val: f64) -> Result<()> {
    set_u64_le(buf, offset, capacity, val.to_bits())
}

/// copy a byte slice at `*offset`, advancing the cursor
#[inline]
pub fn set_bytes(buf: &mut [u8], offset: &mut usize, capacity: usize, src: &[u8]) -> Result<()> {
    check(*offset, src.len(), capacity.min(buf.len()))?;
    buf[*offset..*offset + src.len()].copy_from_slice(src);
    *offset += src.len();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let mut buf = [0u8; 32];
        let mut off = 0;
        set_u8(&mut buf, &mut off, 32, 0xA5).unwrap();
        set_u16_le(&mut buf, &mut off, 32, 0x1234).unwrap();
        set_u32_le(&mut buf, &mut off, 32, 0xDEADBEEF).unwrap();
        set_u64_le(&mut buf, &mut off, 32, 0x0102030405060708).unwrap();
        assert_eq!(off, 15);
        assert_eq!(&buf[..7], &[0xA5, 0x34, 0x12, 0xEF, 0xBE, 0xAD, 0xDE]);

        let mut off = 0;
        assert_eq!(get_u8(&buf, &mut off, 32).unwrap(), 0xA5);
        assert_eq!(get_u16_le(&buf, &mut off, 32).unwrap(), 0x1234);
        assert_eq!(get_u32_le(&buf, &mut off, 32).unwrap(), 0xDEADBEEF);
        assert_eq!(get_u64_le(&buf, &mut off, 32).unwrap(), 0x0102030405060708);
    }

    #[test]
    fn test_float_bits() {
        let mut buf = [0u8; 16];
        let mut off = 0;
        set_f32_le(&mut buf, &mut off, 16, 1.5f32).unwrap();
        set_f64_le(&mut buf, &mut off, 16, -2.25f64).unwrap();

        let mut off = 0;
        assert_eq!(get_f32_le(&buf, &mut off, 16).unwrap(), 1.5f32);
        assert_eq!(get_f64_le(&buf, &mut off, 16).unwrap(), -2.25f64);
    }

    #[test]
    fn test_out_of_bounds() {
        let mut buf = [0u8; 4];
        let mut off = 2;
        let res = set_u32_le(&mut buf, &mut off, 4, 1);
        assert!(res.is_err());
        // cursor untouched after a failed access
        assert_eq!(off, 2);

        let mut off = 3;
        assert!(get_u16_le(&buf, &mut off, 4).is_err());
        assert_eq!(off, 3);
    }

    #[test]
    fn test_capacity_caps_below_len() {
        let buf = [1u8, 2, 3, 4];
        let mut off = 0;
        assert!(get_u32_le(&buf, &mut off, 2).is_err());
        assert_eq!(get_u16_le(&buf, &mut off, 2).unwrap(), 0x0201);
    }
}
