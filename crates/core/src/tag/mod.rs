// abtag
//
// a native rust client for Allen-Bradley PLCs over EtherNet/IP and CIP.
// Copyright: 2025-2026, the abtag project authors
// License: MIT

//! tag state and the public tag handle.

pub(crate) mod logix;
pub(crate) mod magic;
pub(crate) mod pccc;
pub(crate) mod raw;

use crate::attr::AttributeSet;
use crate::builder::PlcKind;
use crate::byte_order::ByteOrderSpec;
use crate::debug::DebugLevel;
use crate::plc::{self, Plc, PlcOptions};
use crate::{ErrorKind, Result, Status};
use parking_lot::lock_api::RawMutex as _;
use parking_lot::RawMutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Tag Identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TagId(pub(crate) u64);

/// which operation a request performs
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum OpKind {
    Read,
    Write,
}

/// what a response callback wants next
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum Continuation {
    /// the operation is complete
    Done,
    /// queue another request for the same operation
    More,
}

/// coordinator state a tag callback may use while building or handling
pub(crate) struct PlcContext<'a> {
    /// application payload budget for one request body
    pub max_payload: usize,
    /// PCCC transport sequence number counter
    pub tsn: &'a mut u16,
}

impl PlcContext<'_> {
    /// allocate the next PCCC TNS
    pub fn next_tsn(&mut self) -> u16 {
        *self.tsn = self.tsn.wrapping_add(1);
        *self.tsn
    }
}

/// state common to every tag variant, guarded by the owning PLC's mutex
pub(crate) struct TagBase {
    pub name: String,
    pub data: Vec<u8>,
    /// element stride in bytes; 0 until inferred from the first read
    pub elem_size: usize,
    pub elem_count: usize,
    pub is_bit: bool,
    pub bit: u8,
    pub status: Status,
    pub read_in_flight: bool,
    pub write_in_flight: bool,
    /// current transfer offset while an operation is fragmented
    pub trans_offset: usize,
    pub byte_order: &'static ByteOrderSpec,
    pub read_cache_ms: u64,
    pub read_cache_expire: Option<Instant>,
    /// a write is waiting on a type-learning read
    pub write_after_read: bool,
    /// data staged by the application, preserved across a pre-write read
    pub pending_write_data: Option<Vec<u8>>,
    pub debug_level: DebugLevel,
}

impl TagBase {
    pub(crate) fn size(&self) -> usize {
        self.data.len()
    }

    /// arm the read cache after a completed read
    pub(crate) fn arm_read_cache(&mut self) {
        if self.read_cache_ms > 0 {
            self.read_cache_expire = Some(Instant::now() + Duration::from_millis(self.read_cache_ms));
        }
    }
}

/// per-variant operation callbacks, the tag's dispatch table
pub(crate) trait TagOps: Send {
    /// write one request body for `op` into `out`
    fn build_request(
        &mut self,
        base: &mut TagBase,
        op: OpKind,
        out: &mut Vec<u8>,
        ctx: &mut PlcContext,
    ) -> Result<()>;

    /// consume one response payload for `op`
    fn handle_response(
        &mut self,
        base: &mut TagBase,
        op: OpKind,
        payload: &[u8],
        ctx: &mut PlcContext,
    ) -> Result<Continuation>;

    /// the tag may share a Multiple Service Packet with other tags
    fn packable(&self) -> bool {
        false
    }

    /// writing is meaningful for this tag kind
    fn supports_write(&self) -> bool {
        true
    }

    /// a write must be preceded by a type-learning read
    fn write_requires_read(&self, _base: &TagBase) -> bool {
        false
    }

    /// variant-specific integer attribute
    fn get_int_attr(&self, _base: &TagBase, _name: &str) -> Option<i64> {
        None
    }
}

pub(crate) struct TagEntry {
    pub base: TagBase,
    pub ops: Box<dyn TagOps>,
}

/// a tag handle: a named, typed region of controller memory.
///
/// # Examples
/// ```rust,no_run
/// use abtag_core::RawTag;
///
/// let path = "protocol=ab_eip&cpu=controllogix&path=1,0&gateway=192.168.1.120&name=MyTag1&elem_count=1";
/// let timeout = 100;
/// let tag = RawTag::new(path, timeout).unwrap();
/// let status = tag.read(timeout);
/// assert!(status.is_ok());
/// let value = tag.get_u32(0).unwrap();
/// println!("tag value: {}", value);
/// ```
pub struct RawTag {
    plc: Arc<Plc>,
    id: TagId,
    api_mutex: RawMutex,
}

impl RawTag {
    /// create a new tag.
    ///
    /// Parses the attribute string, resolves or creates the PLC
    /// coordinator, and kicks off an initial read when the element size is
    /// unknown. With `timeout > 0` the call blocks until the tag is usable
    /// or the timeout expires; with `timeout = 0` it returns immediately
    /// and the tag may still be [`Status::Pending`].
    pub fn new(path: impl AsRef<str>, timeout: u32) -> Result<Self> {
        let attrs = AttributeSet::parse(path.as_ref())?;
        let (options, entry, initial_read) = build_tag(&attrs)?;

        let (plc, id) = plc::create_tag(options, entry)?;
        let tag = Self {
            plc,
            id,
            api_mutex: RawMutex::INIT,
        };

        if initial_read {
            let status = tag.plc.start_op(tag.id, OpKind::Read);
            if status.is_err() {
                return Err(status);
            }
            if timeout > 0 {
                let deadline = Instant::now() + Duration::from_millis(timeout as u64);
                let status = tag.plc.wait_op(tag.id, Some(deadline));
                if status.is_err() {
                    return Err(status);
                }
            }
        }

        Ok(tag)
    }

    /// tag id
    #[inline(always)]
    pub fn id(&self) -> TagId {
        self.id
    }

    /// perform a read operation.
    /// - blocking read if timeout > 0
    /// - non-blocking read if timeout = 0
    pub fn read(&self, timeout: u32) -> Status {
        let status = self.plc.start_op(self.id, OpKind::Read);
        if !status.is_pending() || timeout == 0 {
            return status;
        }
        let deadline = Instant::now() + Duration::from_millis(timeout as u64);
        self.plc.wait_op(self.id, Some(deadline))
    }

    /// perform a write operation.
    /// - blocking write if timeout > 0
    /// - non-blocking write if timeout = 0
    pub fn write(&self, timeout: u32) -> Status {
        let status = self.plc.start_op(self.id, OpKind::Write);
        if !status.is_pending() || timeout == 0 {
            return status;
        }
        let deadline = Instant::now() + Duration::from_millis(timeout as u64);
        self.plc.wait_op(self.id, Some(deadline))
    }

    /// wait until not pending, blocking
    pub fn wait(&self, timeout: Option<Duration>) -> Status {
        let deadline = timeout.map(|t| Instant::now() + t);
        self.plc.wait_op(self.id, deadline)
    }

    /// poll tag status
    #[inline(always)]
    pub fn status(&self) -> Status {
        self.plc.status_of(self.id)
    }

    /// abort the pending operation, if any
    pub fn abort(&self) -> Result<()> {
        self.plc.abort_tag(self.id, Status::Ok).into_result()
    }

    /// take the tag's API lock for a multi-call sequence
    pub fn lock(&self) {
        self.api_mutex.lock();
    }

    /// release the tag's API lock
    ///
    /// # Safety contract
    /// must pair with a previous [`RawTag::lock`] on the same thread.
    pub fn unlock(&self) {
        unsafe { self.api_mutex.unlock() }
    }

    /// tag size in bytes
    pub fn size(&self) -> Result<u32> {
        self.plc.with_tag(self.id, |base, _| base.size() as u32)
    }

    /// resize the tag data buffer, returning the old size.
    /// Useful for staging `@raw` request payloads.
    pub fn set_size(&self, size: u32) -> Result<u32> {
        self.plc.with_tag(self.id, |base, _| {
            let old = base.size() as u32;
            base.data.resize(size as usize, 0);
            old
        })
    }

    /// element size in bytes
    #[inline(always)]
    pub fn elem_size(&self) -> Result<i32> {
        self.get_attr("elem_size", 0).map(|v| v as i32)
    }

    /// element count
    #[inline(always)]
    pub fn elem_count(&self) -> Result<i32> {
        self.get_attr("elem_count", 1).map(|v| v as i32)
    }

    /// get an integer attribute
    pub fn get_attr(&self, attr: impl AsRef<str>, default_value: i64) -> Result<i64> {
        let name = attr.as_ref().to_ascii_lowercase();
        if name == "idle_timeout_ms" {
            return Ok(self.plc.idle_timeout_ms() as i64);
        }
        self.plc.with_tag(self.id, |base, ops| match name.as_str() {
            "elem_size" => base.elem_size as i64,
            "elem_count" => base.elem_count as i64,
            "size" => base.size() as i64,
            "read_cache_ms" => base.read_cache_ms as i64,
            "debug" => base.debug_level as u8 as i64,
            other => ops.get_int_attr(base, other).unwrap_or(default_value),
        })
    }

    /// set an integer attribute
    pub fn set_attr(&self, attr: impl AsRef<str>, value: i64) -> Result<()> {
        let name = attr.as_ref().to_ascii_lowercase();
        if name == "idle_timeout_ms" {
            if value < 0 {
                return Err(ErrorKind::BadParam.into());
            }
            self.plc.set_idle_timeout_ms(value as u64);
            return Ok(());
        }
        self.plc.with_tag(self.id, |base, _| match name.as_str() {
            "read_cache_ms" => {
                if value < 0 {
                    return Err(Status::from(ErrorKind::BadParam));
                }
                base.read_cache_ms = value as u64;
                Ok(())
            }
            "debug" => {
                base.debug_level = DebugLevel::from(value as u8);
                Ok(())
            }
            _ => Err(Status::from(ErrorKind::Unsupported)),
        })?
    }

    /// get bit value.
    /// For a bit tag the tag's own bit index is used; otherwise
    /// `bit_offset` selects a bit within the whole data buffer.
    pub fn get_bit(&self, bit_offset: u32) -> Result<bool> {
        self.plc.with_tag(self.id, |base, _| {
            let bit = if base.is_bit {
                base.bit as usize
            } else {
                bit_offset as usize
            };
            let byte = bit / 8;
            if byte >= base.size() {
                base.status = Status::Err(ErrorKind::OutOfBounds);
                return Err(Status::from(ErrorKind::OutOfBounds));
            }
            Ok(base.data[byte] & (1 << (bit % 8)) != 0)
        })?
    }

    /// set bit value
    pub fn set_bit(&self, bit_offset: u32, value: bool) -> Result<()> {
        self.plc.with_tag(self.id, |base, _| {
            let bit = if base.is_bit {
                base.bit as usize
            } else {
                bit_offset as usize
            };
            let byte = bit / 8;
            if byte >= base.size() {
                base.status = Status::Err(ErrorKind::OutOfBounds);
                return Err(Status::from(ErrorKind::OutOfBounds));
            }
            if value {
                base.data[byte] |= 1 << (bit % 8);
            } else {
                base.data[byte] &= !(1 << (bit % 8));
            }
            Ok(())
        })?
    }

    /// get bool value
    #[inline(always)]
    pub fn get_bool(&self, byte_offset: u32) -> Result<bool> {
        let value = self.get_u8(byte_offset)?;
        Ok(value > 0)
    }

    /// set bool value
    #[inline(always)]
    pub fn set_bool(&self, byte_offset: u32, value: bool) -> Result<()> {
        self.set_u8(byte_offset, if value { 1 } else { 0 })
    }

    /// get raw bytes.
    /// Fails with out-of-bounds if the span exceeds the tag buffer.
    pub fn get_bytes_unchecked(&self, byte_offset: u32, buf: &mut [u8]) -> Result<usize> {
        self.plc.with_tag(self.id, |base, _| {
            let start = byte_offset as usize;
            let end = start + buf.len();
            if end > base.size() {
                base.status = Status::Err(ErrorKind::OutOfBounds);
                return Err(Status::from(ErrorKind::OutOfBounds));
            }
            buf.copy_from_slice(&base.data[start..end]);
            Ok(buf.len())
        })?
    }

    /// get raw bytes, clamped to the end of the tag buffer
    pub fn get_bytes(&self, byte_offset: u32, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let size = self.size()? as usize;
        if byte_offset as usize >= size {
            return Ok(0);
        }
        let len = std::cmp::min(size - byte_offset as usize, buf.len());
        self.get_bytes_unchecked(byte_offset, &mut buf[..len])
    }

    /// set raw bytes.
    /// Fails with out-of-bounds if the span exceeds the tag buffer.
    pub fn set_bytes_unchecked(&self, byte_offset: u32, buf: &[u8]) -> Result<usize> {
        self.plc.with_tag(self.id, |base, _| {
            let start = byte_offset as usize;
            let end = start + buf.len();
            if end > base.size() {
                base.status = Status::Err(ErrorKind::OutOfBounds);
                return Err(Status::from(ErrorKind::OutOfBounds));
            }
            base.data[start..end].copy_from_slice(buf);
            Ok(buf.len())
        })?
    }

    /// set raw bytes, clamped to the end of the tag buffer
    pub fn set_bytes(&self, byte_offset: u32, buf: &[u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let size = self.size()? as usize;
        if byte_offset as usize >= size {
            return Ok(0);
        }
        let len = std::cmp::min(size - byte_offset as usize, buf.len());
        self.set_bytes_unchecked(byte_offset, &buf[..len])
    }

    /// string character count at the offset
    pub fn get_string_length(&self, byte_offset: u32) -> Result<u32> {
        self.plc.with_tag(self.id, |base, _| {
            base.byte_order
                .str_length(&base.data, byte_offset as usize)
                .map(|v| v as u32)
        })?
    }

    /// string capacity at the offset
    pub fn get_string_capacity(&self, byte_offset: u32) -> Result<u32> {
        self.plc.with_tag(self.id, |base, _| {
            base.byte_order
                .str_capacity(&base.data, byte_offset as usize)
                .map(|v| v as u32)
        })?
    }

    /// total bytes a string occupies at the offset
    pub fn get_string_total_length(&self, byte_offset: u32) -> Result<u32> {
        self.plc.with_tag(self.id, |base, _| {
            base.byte_order
                .str_total_length(&base.data, byte_offset as usize)
                .map(|v| v as u32)
        })?
    }

    /// read a string into `buf`, returning the character count
    pub fn get_string(&self, byte_offset: u32, buf: &mut [u8]) -> Result<usize> {
        self.plc.with_tag(self.id, |base, _| {
            let res = base.byte_order.get_string(&base.data, byte_offset as usize, buf);
            if let Err(status) = res {
                base.status = status;
            }
            res
        })?
    }

    /// write a string at the offset
    pub fn set_string(&self, byte_offset: u32, value: impl AsRef<[u8]>) -> Result<()> {
        self.plc.with_tag(self.id, |base, _| {
            let res = base
                .byte_order
                .set_string(&mut base.data, byte_offset as usize, value.as_ref());
            if let Err(status) = res {
                base.status = status;
            }
            res
        })?
    }

    /// get tag value of `T` that implements [`Decode`](crate::Decode)
    #[cfg(feature = "value")]
    #[inline]
    pub fn get_value<T: crate::Decode>(&self, byte_offset: u32) -> Result<T> {
        T::decode(self, byte_offset)
    }

    /// set tag value that implements [`Encode`](crate::Encode)
    #[cfg(feature = "value")]
    #[inline]
    pub fn set_value<T: crate::Encode>(&self, byte_offset: u32, value: T) -> Result<()> {
        value.encode(self, byte_offset)
    }
}

macro_rules! accessor_impl {
    ($unsigned:ident, $signed:ident, $get_u:ident, $set_u:ident, $get_s:ident, $set_s:ident, $width:literal) => {
        impl RawTag {
            #[doc = concat!("get ", stringify!($unsigned), " value")]
            pub fn $get_u(&self, byte_offset: u32) -> Result<$unsigned> {
                self.plc.with_tag(self.id, |base, _| {
                    match base.byte_order.get_uint_n(&base.data, byte_offset as usize, $width) {
                        Ok(v) => Ok(v as $unsigned),
                        Err(status) => {
                            base.status = status;
                            Err(status)
                        }
                    }
                })?
            }

            #[doc = concat!("set ", stringify!($unsigned), " value")]
            pub fn $set_u(&self, byte_offset: u32, value: $unsigned) -> Result<()> {
                self.plc.with_tag(self.id, |base, _| {
                    match base.byte_order.set_uint_n(
                        &mut base.data,
                        byte_offset as usize,
                        $width,
                        value as u64,
                    ) {
                        Ok(()) => Ok(()),
                        Err(status) => {
                            base.status = status;
                            Err(status)
                        }
                    }
                })?
            }

            #[doc = concat!("get ", stringify!($signed), " value")]
            #[inline(always)]
            pub fn $get_s(&self, byte_offset: u32) -> Result<$signed> {
                self.$get_u(byte_offset).map(|v| v as $signed)
            }

            #[doc = concat!("set ", stringify!($signed), " value")]
            #[inline(always)]
            pub fn $set_s(&self, byte_offset: u32, value: $signed) -> Result<()> {
                self.$set_u(byte_offset, value as $unsigned)
            }
        }
    };
}

accessor_impl!(u8, i8, get_u8, set_u8, get_i8, set_i8, 1);
accessor_impl!(u16, i16, get_u16, set_u16, get_i16, set_i16, 2);
accessor_impl!(u32, i32, get_u32, set_u32, get_i32, set_i32, 4);
accessor_impl!(u64, i64, get_u64, set_u64, get_i64, set_i64, 8);

impl RawTag {
    /// get f32 value
    pub fn get_f32(&self, byte_offset: u32) -> Result<f32> {
        self.plc.with_tag(self.id, |base, _| {
            match base.byte_order.get_f32(&base.data, byte_offset as usize) {
                Ok(v) => Ok(v),
                Err(status) => {
                    base.status = status;
                    Err(status)
                }
            }
        })?
    }

    /// set f32 value
    pub fn set_f32(&self, byte_offset: u32, value: f32) -> Result<()> {
        self.plc.with_tag(self.id, |base, _| {
            match base.byte_order.set_f32(&mut base.data, byte_offset as usize, value) {
                Ok(()) => Ok(()),
                Err(status) => {
                    base.status = status;
                    Err(status)
                }
            }
        })?
    }

    /// get f64 value
    pub fn get_f64(&self, byte_offset: u32) -> Result<f64> {
        self.plc.with_tag(self.id, |base, _| {
            match base.byte_order.get_f64(&base.data, byte_offset as usize) {
                Ok(v) => Ok(v),
                Err(status) => {
                    base.status = status;
                    Err(status)
                }
            }
        })?
    }

    /// set f64 value
    pub fn set_f64(&self, byte_offset: u32, value: f64) -> Result<()> {
        self.plc.with_tag(self.id, |base, _| {
            match base.byte_order.set_f64(&mut base.data, byte_offset as usize, value) {
                Ok(()) => Ok(()),
                Err(status) => {
                    base.status = status;
                    Err(status)
                }
            }
        })?
    }
}

impl Drop for RawTag {
    fn drop(&mut self) {
        self.plc.remove_tag(self.id);
    }
}

impl std::fmt::Debug for RawTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawTag").field("id", &self.id).finish()
    }
}

/// build the PLC options and the tag entry from a parsed attribute set
fn build_tag(attrs: &AttributeSet) -> Result<(PlcOptions, TagEntry, bool)> {
    let protocol = match attrs.get_str("protocol") {
        Some(p) if matches!(p.to_ascii_lowercase().as_str(), "ab_eip" | "ab-eip" | "ab_cip" | "ab-cip") => {
            p.to_ascii_lowercase().replace('-', "_")
        }
        Some(other) => {
            log::warn!("unsupported protocol {:?}", other);
            return Err(ErrorKind::BadParam.into());
        }
        None => return Err(ErrorKind::BadParam.into()),
    };

    let gateway = attrs.get_str("gateway").ok_or(ErrorKind::BadParam)?;
    let (host, port) = match gateway.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() => (
            host.to_owned(),
            port.parse::<u16>().map_err(|_| ErrorKind::BadParam)?,
        ),
        _ => (gateway.to_owned(), crate::eip::EIP_DEFAULT_PORT),
    };

    let kind = match attrs.get_str("cpu") {
        Some(cpu) => PlcKind::parse(cpu).ok_or(ErrorKind::BadParam)?,
        None => return Err(ErrorKind::BadParam.into()),
    };

    let name = attrs.get_str("name").ok_or(ErrorKind::BadParam)?.to_owned();
    if name.is_empty() {
        log::warn!("tag name is missing or empty, you must have a tag name");
        return Err(ErrorKind::BadParam.into());
    }

    let elem_count = attrs.get_int("elem_count", 1)?;
    if elem_count < 1 {
        log::warn!("element count must be greater than zero");
        return Err(ErrorKind::BadParam.into());
    }
    let elem_count = elem_count as usize;
    let elem_size = attrs.get_int("elem_size", 0)?;
    if elem_size < 0 {
        return Err(ErrorKind::BadParam.into());
    }
    let elem_size = elem_size as usize;

    let route = parse_route(attrs.get_str("path"))?;
    if kind == PlcKind::Micro800 && !route.is_empty() {
        log::warn!("micro800 connections must not have a path attribute");
        return Err(ErrorKind::BadParam.into());
    }

    let is_pccc = matches!(kind, PlcKind::PLC5 | PlcKind::SLC500 | PlcKind::MicroLogix);

    let default_connected = !is_pccc;
    let use_connected = attrs.get_bool("use_connected_msg", default_connected)?;

    let forward_open_ex = attrs.get_bool("forward_open_ex_enabled", kind == PlcKind::ControlLogix)?;
    let default_payload = if forward_open_ex {
        crate::cip::layer::CIP_MAX_PAYLOAD
    } else {
        crate::cip::layer::CIP_STD_PAYLOAD
    };
    let cip_payload = attrs.get_int("cip_payload", default_payload as i64)?;
    if cip_payload < 16 || cip_payload as usize > crate::cip::layer::CIP_MAX_PAYLOAD {
        return Err(ErrorKind::BadParam.into());
    }

    let read_cache_ms = attrs.get_int("read_cache_ms", 0)?;
    if read_cache_ms < 0 {
        return Err(ErrorKind::BadParam.into());
    }
    let idle_timeout_ms = attrs.get_int("idle_timeout_ms", 5000)?;
    if idle_timeout_ms < 0 {
        return Err(ErrorKind::BadParam.into());
    }
    let debug_level = DebugLevel::from(attrs.get_int("debug", 0)? as u8);

    let options = PlcOptions {
        protocol,
        host,
        port,
        kind,
        route,
        use_connected,
        forward_open_ex,
        cip_payload: cip_payload as usize,
        has_pccc: is_pccc,
        idle_timeout_ms: idle_timeout_ms as u64,
        share_session: attrs.get_bool("share_session", true)?,
        connection_group_id: attrs.get_int("connection_group_id", 0)?,
    };

    // build the variant
    let byte_order: &'static ByteOrderSpec = match kind {
        PlcKind::PLC5 => &crate::byte_order::PLC5,
        PlcKind::SLC500 | PlcKind::MicroLogix => &crate::byte_order::SLC,
        PlcKind::OmronNjnx => &crate::byte_order::OMRON,
        _ => &crate::byte_order::LOGIX,
    };

    let mut base = TagBase {
        name: name.clone(),
        data: vec![],
        elem_size,
        elem_count,
        is_bit: false,
        bit: 0,
        status: Status::Ok,
        read_in_flight: false,
        write_in_flight: false,
        trans_offset: 0,
        byte_order,
        read_cache_ms: read_cache_ms as u64,
        read_cache_expire: None,
        write_after_read: false,
        pending_write_data: None,
        debug_level,
    };

    let ops: Box<dyn TagOps> = if is_pccc {
        let addr = crate::pccc::parse_logical_address(&name)?;
        if base.elem_size == 0 {
            base.elem_size = addr.file_type.default_elem_size();
        }
        base.is_bit = addr.is_bit;
        base.bit = addr.bit;
        base.data = vec![0u8; base.elem_size * base.elem_count];
        if kind == PlcKind::PLC5 {
            Box::new(pccc::Plc5Ops::new(addr))
        } else {
            Box::new(pccc::SlcOps::new(addr))
        }
    } else if name.eq_ignore_ascii_case("@raw") {
        base.elem_size = 1;
        Box::new(raw::RawCipOps::new())
    } else if name.eq_ignore_ascii_case("@tags")
        || (name.len() >= 13
            && name.get(..8).map_or(false, |p| p.eq_ignore_ascii_case("Program:"))
            && name
                .get(name.len() - 5..)
                .map_or(false, |s| s.eq_ignore_ascii_case("@tags")))
    {
        base.elem_size = 1;
        Box::new(magic::ListTagsOps::new(&name)?)
    } else if name.len() > 5 && name.get(..5).map_or(false, |p| p.eq_ignore_ascii_case("@udt/")) {
        base.elem_size = 1;
        Box::new(magic::UdtOps::new(&name)?)
    } else if name.eq_ignore_ascii_case("@change") {
        base.elem_size = 1;
        Box::new(magic::ChangeDetectionOps::new())
    } else {
        let encoded = crate::cip::name::encode_tag_name(&name)?;
        log::debug!(
            "tag name {:?} encoded as {:?}",
            crate::cip::name::format_encoded_name(&encoded.bytes).unwrap_or_default(),
            encoded.bytes
        );
        base.is_bit = encoded.is_bit;
        base.bit = encoded.bit;
        if base.elem_size > 0 {
            base.data = vec![0u8; base.elem_size * base.elem_count];
        }
        Box::new(logix::LogixOps::new(encoded.bytes))
    };

    // an initial read learns the element size when it is unknown
    let initial_read = base.elem_size == 0 && !name.starts_with('@');

    Ok((options, TagEntry { base, ops }, initial_read))
}

/// parse a `1,0`-style comma separated CIP route into port segment bytes
fn parse_route(path: Option<&str>) -> Result<Vec<u8>> {
    let path = match path {
        Some(p) if !p.trim().is_empty() => p,
        _ => return Ok(vec![]),
    };

    let mut route = vec![];
    for part in path.split(',') {
        let val: u8 = part.trim().parse().map_err(|_| ErrorKind::BadParam)?;
        route.push(val);
    }
    if route.len() & 1 != 0 {
        log::warn!("CIP route {:?} must have an even number of segments", path);
        return Err(ErrorKind::BadParam.into());
    }
    Ok(route)
}
