// abtag
//
// a native rust client for Allen-Bradley PLCs over EtherNet/IP and CIP.
// Copyright: 2025-2026, the abtag project authors
// License: MIT

//! end-to-end tests for the metadata tags and the raw CIP tag.

mod common;

use abtag_core::{ErrorKind, RawTag};
use common::{MockPlc, MockReply};

fn logix_path(gateway: &str, name: &str) -> String {
    format!(
        "protocol=ab_eip&cpu=controllogix&path=1,0&gateway={}&name={}",
        gateway, name
    )
}

fn listing_entry(id: u32, name: &str) -> Vec<u8> {
    let mut entry = vec![];
    entry.extend_from_slice(&id.to_le_bytes());
    entry.extend_from_slice(&0x00C4u16.to_le_bytes()); // symbol type
    entry.extend_from_slice(&4u16.to_le_bytes()); // element length
    entry.extend_from_slice(&[0u8; 12]); // array dimensions
    entry.extend_from_slice(&(name.len() as u16).to_le_bytes());
    entry.extend_from_slice(name.as_bytes());
    entry
}

#[test]
fn test_tag_listing_resumes_until_complete() {
    let mock = MockPlc::start(Box::new(|req| {
        assert_eq!(req[0], 0x55);
        let start_id = u16::from_le_bytes([req[6], req[7]]) as u32;

        if start_id == 0 {
            // first batch, more to come
            let mut reply = vec![0xD5, 0x00, 0x06, 0x00];
            reply.extend(listing_entry(10, "Motor"));
            reply.extend(listing_entry(12, "Pump"));
            MockReply::Bytes(reply)
        } else {
            assert_eq!(start_id, 13);
            let mut reply = vec![0xD5, 0x00, 0x00, 0x00];
            reply.extend(listing_entry(20, "Valve"));
            MockReply::Bytes(reply)
        }
    }));

    let tag = RawTag::new(logix_path(&mock.gateway, "@tags"), 1000).unwrap();

    let status = tag.read(5000);
    assert!(status.is_ok(), "listing failed: {}", status);
    assert_eq!(mock.payload_count(), 2);

    let expected: Vec<u8> = [
        listing_entry(10, "Motor"),
        listing_entry(12, "Pump"),
        listing_entry(20, "Valve"),
    ]
    .concat();
    let mut buf = vec![0u8; expected.len()];
    tag.get_bytes(0, &mut buf).unwrap();
    assert_eq!(buf, expected);

    // writes make no sense on a listing tag
    let status = tag.write(1000);
    assert_eq!(status.err_kind(), Some(ErrorKind::Unsupported));
}

#[test]
fn test_udt_fetch() {
    const DEF_DINTS: u32 = 12;
    let def_len = (DEF_DINTS * 4 - 23) as usize;

    let mock = MockPlc::start(Box::new(move |req| match req[0] {
        0x03 => {
            assert_eq!(&req[1..6], &[0x03, 0x20, 0x6C, 0x25, 0x00]);
            assert_eq!(&req[6..8], &31u16.to_le_bytes());

            let mut reply = vec![0x83, 0x00, 0x00, 0x00];
            reply.extend_from_slice(&4u16.to_le_bytes());
            reply.extend_from_slice(&[0x01, 0x00, 0x00, 0x00]);
            reply.extend_from_slice(&0xCAFEu16.to_le_bytes());
            reply.extend_from_slice(&[0x02, 0x00, 0x00, 0x00]);
            reply.extend_from_slice(&3u16.to_le_bytes());
            reply.extend_from_slice(&[0x04, 0x00, 0x00, 0x00]);
            reply.extend_from_slice(&DEF_DINTS.to_le_bytes());
            reply.extend_from_slice(&[0x05, 0x00, 0x00, 0x00]);
            reply.extend_from_slice(&16u32.to_le_bytes());
            MockReply::Bytes(reply)
        }
        0x4C => {
            let mut reply = vec![0xCC, 0x00, 0x00, 0x00];
            reply.extend((0..def_len).map(|i| (i % 7) as u8));
            MockReply::Bytes(reply)
        }
        other => panic!("unexpected service {:02x}", other),
    }));

    let tag = RawTag::new(logix_path(&mock.gateway, "@udt/31"), 1000).unwrap();

    let status = tag.read(5000);
    assert!(status.is_ok(), "udt fetch failed: {}", status);

    // header: id, struct handle, member count, then the sizes
    assert_eq!(tag.get_u16(0).unwrap(), 31);
    assert_eq!(tag.get_u16(2).unwrap(), 0xCAFE);
    assert_eq!(tag.get_u16(4).unwrap(), 3);
    assert_eq!(tag.get_u32(8).unwrap(), 16);
    assert_eq!(tag.get_u32(12).unwrap(), def_len as u32);
    assert_eq!(tag.size().unwrap() as usize, 16 + def_len);

    assert_eq!(tag.get_attr("field_count", 0).unwrap(), 3);
    assert_eq!(tag.get_attr("instance_size", 0).unwrap(), 16);
}

#[test]
fn test_change_detection_snapshot() {
    let mock = MockPlc::start(Box::new(|req| {
        assert_eq!(req[0], 0x03);
        assert_eq!(&req[2..4], &[0x20, 0xAC]);

        let mut reply = vec![0x83, 0x00, 0x00, 0x00];
        reply.extend_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF, 0x01, 0x02, 0x03, 0x04]);
        MockReply::Bytes(reply)
    }));

    let tag = RawTag::new(logix_path(&mock.gateway, "@change"), 1000).unwrap();

    let status = tag.read(2000);
    assert!(status.is_ok(), "change read failed: {}", status);
    assert_eq!(tag.size().unwrap(), 8);

    let mut buf = [0u8; 8];
    tag.get_bytes(0, &mut buf).unwrap();
    assert_eq!(&buf, &[0xDE, 0xAD, 0xBE, 0xEF, 0x01, 0x02, 0x03, 0x04]);
}

#[test]
fn test_raw_cip_round_trip() {
    let mock = MockPlc::start(Box::new(|req| {
        // identity object get-attributes-all
        assert_eq!(req, &[0x01, 0x02, 0x20, 0x01, 0x24, 0x01]);
        MockReply::Bytes(vec![0x81, 0x00, 0x00, 0x00, 0x3D, 0xF3, 0x0C, 0x00])
    }));

    let tag = RawTag::new(logix_path(&mock.gateway, "@raw"), 1000).unwrap();

    // stage the literal request bytes
    tag.set_size(6).unwrap();
    tag.set_bytes(0, &[0x01, 0x02, 0x20, 0x01, 0x24, 0x01]).unwrap();

    let status = tag.read(2000);
    assert!(status.is_ok(), "raw exchange failed: {}", status);

    // the response replaced the buffer and its exact size is exposed
    assert_eq!(tag.get_attr("payload_size", 0).unwrap(), 8);
    assert_eq!(tag.size().unwrap(), 8);
    let mut buf = [0u8; 8];
    tag.get_bytes(0, &mut buf).unwrap();
    assert_eq!(&buf, &[0x81, 0x00, 0x00, 0x00, 0x3D, 0xF3, 0x0C, 0x00]);
}
