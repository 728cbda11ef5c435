// abtag
//
// a native rust client for Allen-Bradley PLCs over EtherNet/IP and CIP.
// Copyright: 2025-2026, the abtag project authors
// License: MIT

//! builders for tag attribute strings

pub use crate::debug::DebugLevel;
use core::fmt;

type Result<T> = std::result::Result<T, Error>;

/// attribute builder error
#[derive(Debug)]
pub struct Error(&'static str);

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for Error {}

/// builder for the full tag attribute string
///
/// # Examples
/// ```rust,no_run
/// use abtag_core::builder::*;
/// use abtag_core::RawTag;
///
/// let timeout = 100;
/// let path = PathBuilder::default()
///     .protocol(Protocol::EIP)
///     .gateway("192.168.1.120")
///     .plc(PlcKind::ControlLogix)
///     .name("MyTag1")
///     .element_count(1)
///     .path("1,0")
///     .read_cache_ms(0)
///     .build()
///     .unwrap();
/// let tag = RawTag::new(path, timeout).unwrap();
/// let status = tag.status();
/// assert!(status.is_ok());
/// ```
#[derive(Default, Debug)]
pub struct PathBuilder {
    protocol: Option<Protocol>,
    debug: Option<DebugLevel>,
    elem_count: Option<usize>,
    elem_size: Option<usize>,
    read_cache_ms: Option<usize>,
    plc: Option<PlcKind>,
    name: Option<String>,
    path: Option<String>,
    gateway: Option<String>,
    use_connected_msg: Option<bool>,
    forward_open_ex_enabled: Option<bool>,
    cip_payload: Option<usize>,
    idle_timeout_ms: Option<usize>,
    connection_group_id: Option<usize>,
    share_session: Option<bool>,
}

impl PathBuilder {
    /// generic attribute.
    /// defines the debugging verbosity recorded on the tag.
    #[inline]
    pub fn debug(&mut self, level: DebugLevel) -> &mut Self {
        self.debug = Some(level);
        self
    }

    /// generic attribute.
    /// Required. Determines the wire protocol flavor.
    #[inline]
    pub fn protocol(&mut self, protocol: Protocol) -> &mut Self {
        self.protocol = Some(protocol);
        self
    }

    /// generic attribute.
    /// Optional. All tags are treated as arrays; this sets how many elements the tag has. Defaults to one (1).
    #[inline]
    pub fn element_count(&mut self, count: usize) -> &mut Self {
        self.elem_count = Some(count);
        self
    }

    /// generic attribute.
    /// Required for the PCCC-family PLCs, inferred from the first read on Logix-class PLCs.
    #[inline]
    pub fn element_size(&mut self, size: usize) -> &mut Self {
        self.elem_size = Some(size);
        self
    }

    /// generic attribute.
    /// Optional. Milliseconds during which a completed read satisfies further read calls without wire traffic.
    #[inline]
    pub fn read_cache_ms(&mut self, millis: usize) -> &mut Self {
        self.read_cache_ms = Some(millis);
        self
    }

    /// Required. Determines the PLC family.
    #[inline]
    pub fn plc(&mut self, plc: PlcKind) -> &mut Self {
        self.plc = Some(plc);
        self
    }

    /// IP address or host name, with an optional `:port` suffix.
    /// This tells the library what host to use for the PLC or the gateway to the PLC.
    #[inline]
    pub fn gateway(&mut self, gateway: impl AsRef<str>) -> &mut Self {
        self.gateway = Some(gateway.as_ref().to_owned());
        self
    }

    /// The full name of the tag, e.g. `MyTag`, `Program:prog.Counter[3]` or a
    /// data-table address like `N7:12/3`. Special names: `@raw`, `@tags`,
    /// `@udt/<n>`, `@change`.
    #[inline]
    pub fn name(&mut self, name: impl AsRef<str>) -> &mut Self {
        self.name = Some(name.as_ref().to_owned());
        self
    }

    /// comma-separated CIP route to the PLC CPU, e.g. `1,0` = backplane, slot 0.
    /// Required for CompactLogix/ControlLogix; must not be set for Micro800.
    #[inline]
    pub fn path(&mut self, path: impl AsRef<str>) -> &mut Self {
        self.path = Some(path.as_ref().to_owned());
        self
    }

    /// Optional. 1 = use a CIP connection, 0 = use UCMM.
    /// Defaults are family-specific: connected for Logix-class and Micro800, unconnected for the PCCC families.
    #[inline]
    pub fn use_connected_msg(&mut self, yes: bool) -> &mut Self {
        self.use_connected_msg = Some(yes);
        self
    }

    /// Optional. Request the extended Forward Open so payloads up to 4002 bytes can be negotiated.
    #[inline]
    pub fn forward_open_ex_enabled(&mut self, yes: bool) -> &mut Self {
        self.forward_open_ex_enabled = Some(yes);
        self
    }

    /// Optional. Requested CIP connection payload size in bytes.
    #[inline]
    pub fn cip_payload(&mut self, bytes: usize) -> &mut Self {
        self.cip_payload = Some(bytes);
        self
    }

    /// Optional. Idle milliseconds after which the coordinator closes its socket. Default 5000.
    #[inline]
    pub fn idle_timeout_ms(&mut self, millis: usize) -> &mut Self {
        self.idle_timeout_ms = Some(millis);
        self
    }

    /// Optional. Distinct group IDs split otherwise-sharable coordinators.
    #[inline]
    pub fn connection_group_id(&mut self, id: usize) -> &mut Self {
        self.connection_group_id = Some(id);
        self
    }

    /// Optional. 0 = do not share the PLC coordinator with other tags on this gateway.
    #[inline]
    pub fn share_session(&mut self, yes: bool) -> &mut Self {
        self.share_session = Some(yes);
        self
    }

    /// check required attributes or conflicting attributes
    fn check(&self) -> Result<()> {
        if self.protocol.is_none() {
            return Err(Error("protocol required"));
        }
        if self.gateway.is_none() {
            return Err(Error("gateway required"));
        }
        if self.name.is_none() {
            return Err(Error("name required"));
        }
        let plc = match self.plc {
            Some(plc) => plc,
            None => return Err(Error("plc kind required")),
        };
        match plc {
            PlcKind::ControlLogix => {
                if self.path.is_none() {
                    return Err(Error("path required for controllogix"));
                }
                // elem_size is inferred from the first read
                Ok(())
            }
            PlcKind::Micro800 => {
                if self.path.is_some() {
                    return Err(Error("path must not be provided for micro800"));
                }
                Ok(())
            }
            PlcKind::OmronNjnx => Ok(()),
            PlcKind::PLC5 | PlcKind::SLC500 | PlcKind::MicroLogix => Ok(()),
        }
    }

    /// build the full attribute string
    pub fn build(&self) -> Result<String> {
        self.check()?;
        let mut buf = vec![];
        let protocol = self.protocol.unwrap();
        buf.push(format!("protocol={}", protocol));

        if let Some(plc) = self.plc {
            buf.push(format!("cpu={}", plc));
        }
        if let Some(ref gateway) = self.gateway {
            buf.push(format!("gateway={}", gateway));
        }
        if let Some(ref path) = self.path {
            buf.push(format!("path={}", path));
        }
        if let Some(ref name) = self.name {
            buf.push(format!("name={}", name));
        }
        if let Some(elem_count) = self.elem_count {
            buf.push(format!("elem_count={}", elem_count));
        }
        if let Some(elem_size) = self.elem_size {
            buf.push(format!("elem_size={}", elem_size));
        }
        if let Some(read_cache_ms) = self.read_cache_ms {
            buf.push(format!("read_cache_ms={}", read_cache_ms));
        }
        if let Some(yes) = self.use_connected_msg {
            buf.push(format!("use_connected_msg={}", yes as u8));
        }
        if let Some(yes) = self.forward_open_ex_enabled {
            buf.push(format!("forward_open_ex_enabled={}", yes as u8));
        }
        if let Some(bytes) = self.cip_payload {
            buf.push(format!("cip_payload={}", bytes));
        }
        if let Some(millis) = self.idle_timeout_ms {
            buf.push(format!("idle_timeout_ms={}", millis));
        }
        if let Some(id) = self.connection_group_id {
            buf.push(format!("connection_group_id={}", id));
        }
        if let Some(yes) = self.share_session {
            buf.push(format!("share_session={}", yes as u8));
        }
        if let Some(debug) = self.debug {
            buf.push(format!("debug={}", debug as u8));
        }
        Ok(buf.join("&"))
    }
}

/// library supported protocol flavors
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Protocol {
    /// EtherNet/IP encapsulation (`ab_eip`)
    EIP,
    /// alias accepted for the same stack (`ab_cip`)
    CIP,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::EIP => write!(f, "ab_eip"),
            Protocol::CIP => write!(f, "ab_cip"),
        }
    }
}

/// PLC family, required for tag creation
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum PlcKind {
    /// ControlLogix/CompactLogix/FlexLogix-class PLC
    ControlLogix,
    /// PLC/5 PLC
    PLC5,
    /// SLC 500 PLC
    SLC500,
    /// MicroLogix PLC
    MicroLogix,
    /// Micro800-class PLC
    Micro800,
    /// Omron NJ/NX controller speaking the CIP path
    OmronNjnx,
}

impl fmt::Display for PlcKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlcKind::ControlLogix => write!(f, "controllogix"),
            PlcKind::PLC5 => write!(f, "plc5"),
            PlcKind::SLC500 => write!(f, "slc500"),
            PlcKind::MicroLogix => write!(f, "micrologix"),
            PlcKind::Micro800 => write!(f, "micro800"),
            PlcKind::OmronNjnx => write!(f, "omron-njnx"),
        }
    }
}

impl PlcKind {
    /// parse a `cpu` attribute value, accepting the historical aliases
    pub fn parse(value: &str) -> Option<PlcKind> {
        match value.to_ascii_lowercase().as_str() {
            "plc" | "plc5" => Some(PlcKind::PLC5),
            "slc" | "slc500" => Some(PlcKind::SLC500),
            "micrologix" | "mlgx" => Some(PlcKind::MicroLogix),
            "compactlogix" | "clgx" | "lgx" | "controllogix" | "contrologix" | "flexlogix"
            | "flgx" => Some(PlcKind::ControlLogix),
            "micro800" => Some(PlcKind::Micro800),
            "omron-njnx" => Some(PlcKind::OmronNjnx),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eip_builder() {
        let path = PathBuilder::default()
            .protocol(Protocol::EIP)
            .gateway("192.168.1.120")
            .plc(PlcKind::ControlLogix)
            .name("MyTag1")
            .element_count(1)
            .path("1,0")
            .read_cache_ms(0)
            .build()
            .unwrap();
        assert_eq!(
            path,
            "protocol=ab_eip&cpu=controllogix&gateway=192.168.1.120&path=1,0&name=MyTag1&elem_count=1&read_cache_ms=0"
        );
    }

    #[test]
    fn test_micro800_rejects_path() {
        let res = PathBuilder::default()
            .protocol(Protocol::EIP)
            .gateway("192.168.1.10")
            .plc(PlcKind::Micro800)
            .name("MyTag")
            .path("1,0")
            .build();
        assert!(res.is_err());
    }

    #[test]
    fn test_controllogix_requires_path() {
        let res = PathBuilder::default()
            .protocol(Protocol::EIP)
            .gateway("192.168.1.10")
            .plc(PlcKind::ControlLogix)
            .name("MyTag")
            .build();
        assert!(res.is_err());
    }

    #[test]
    fn test_cpu_aliases() {
        assert_eq!(PlcKind::parse("LGX"), Some(PlcKind::ControlLogix));
        assert_eq!(PlcKind::parse("contrologix"), Some(PlcKind::ControlLogix));
        assert_eq!(PlcKind::parse("plc"), Some(PlcKind::PLC5));
        assert_eq!(PlcKind::parse("slc"), Some(PlcKind::SLC500));
        assert_eq!(PlcKind::parse("mlgx"), Some(PlcKind::MicroLogix));
        assert_eq!(PlcKind::parse("omron-njnx"), Some(PlcKind::OmronNjnx));
        assert_eq!(PlcKind::parse("s7-1200"), None);
    }
}
