// abtag
//
// a native rust client for Allen-Bradley PLCs over EtherNet/IP and CIP.
// Copyright: 2025-2026, the abtag project authors
// License: MIT

//! parser for the `key=value&key=value` attribute strings accepted by
//! [`RawTag::new`](crate::RawTag::new). Keys are case-insensitive; values
//! keep their case. Parsing never touches global state.

use crate::{ErrorKind, Result};
use std::collections::HashMap;

/// a parsed attribute string
#[derive(Debug, Clone, Default)]
pub struct AttributeSet {
    entries: HashMap<String, String>,
}

impl AttributeSet {
    /// parse an ampersand separated attribute string
    pub fn parse(input: &str) -> Result<Self> {
        let mut entries = HashMap::new();

        for part in input.split('&') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let (key, value) = part.split_once('=').ok_or(ErrorKind::BadParam)?;
            let key = key.trim().to_ascii_lowercase();
            if key.is_empty() {
                return Err(ErrorKind::BadParam.into());
            }
            entries.insert(key, value.trim().to_owned());
        }

        Ok(Self { entries })
    }

    /// string attribute, if present
    #[inline]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.entries.get(&key.to_ascii_lowercase()).map(|v| v.as_str())
    }

    /// integer attribute, with a default when absent.
    /// A present but non-numeric value is a [`ErrorKind::BadParam`] error.
    pub fn get_int(&self, key: &str, default_value: i64) -> Result<i64> {
        match self.get_str(key) {
            Some(v) => v.parse().map_err(|_| ErrorKind::BadParam.into()),
            None => Ok(default_value),
        }
    }

    /// boolean attribute: 1/0, with a default when absent
    pub fn get_bool(&self, key: &str, default_value: bool) -> Result<bool> {
        match self.get_int(key, if default_value { 1 } else { 0 })? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(ErrorKind::BadParam.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic() {
        let attrs =
            AttributeSet::parse("protocol=ab_eip&gateway=10.0.0.1&name=MyTag&elem_count=4")
                .unwrap();
        assert_eq!(attrs.get_str("protocol"), Some("ab_eip"));
        assert_eq!(attrs.get_str("name"), Some("MyTag"));
        assert_eq!(attrs.get_int("elem_count", 1).unwrap(), 4);
        assert_eq!(attrs.get_int("elem_size", 0).unwrap(), 0);
    }

    #[test]
    fn test_keys_case_insensitive() {
        let attrs = AttributeSet::parse("Protocol=ab_eip&GATEWAY=plc.example").unwrap();
        assert_eq!(attrs.get_str("protocol"), Some("ab_eip"));
        assert_eq!(attrs.get_str("gateway"), Some("plc.example"));
    }

    #[test]
    fn test_values_keep_case() {
        let attrs = AttributeSet::parse("name=Program:MainProgram.Speed").unwrap();
        assert_eq!(attrs.get_str("name"), Some("Program:MainProgram.Speed"));
    }

    #[test]
    fn test_malformed() {
        assert!(AttributeSet::parse("protocol").is_err());
        assert!(AttributeSet::parse("=value").is_err());
        let attrs = AttributeSet::parse("count=abc").unwrap();
        assert!(attrs.get_int("count", 0).is_err());
    }

    #[test]
    fn test_bool() {
        let attrs = AttributeSet::parse("share_session=0&forward_open_ex_enabled=1").unwrap();
        assert!(!attrs.get_bool("share_session", true).unwrap());
        assert!(attrs.get_bool("forward_open_ex_enabled", false).unwrap());
        assert!(attrs.get_bool("missing", true).unwrap());
    }
}
