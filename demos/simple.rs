// abtag
//
// a native rust client for Allen-Bradley PLCs over EtherNet/IP and CIP.
// Copyright: 2025-2026, the abtag project authors
// License: MIT

use abtag::RawTag;

fn main() {
    let timeout = 500; //ms
    let path = "protocol=ab_eip&cpu=controllogix&path=1,0&gateway=192.168.1.120&name=MyTag1&elem_count=1"; // YOUR TAG DEFINITION
    let tag = RawTag::new(path, timeout).unwrap();
    //read tag
    let status = tag.read(timeout);
    assert!(status.is_ok());
    let offset = 0;
    let value: u32 = tag.get_value(offset).unwrap();
    println!("tag value: {}", value);
    let value = value + 10;
    tag.set_value(offset, value).unwrap();
    //write tag
    let status = tag.write(timeout);
    assert!(status.is_ok());
    println!("write done!");
    // tag will be destroyed when out of scope or manually call drop()
    drop(tag);
}
