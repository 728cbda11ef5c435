// abtag
//
// a native rust client for Allen-Bradley PLCs over EtherNet/IP and CIP.
// Copyright: 2025-2026, the abtag project authors
// License: MIT

use abtag::futures::TagEntry;
use tokio::runtime::Runtime;

fn main() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async move {
        let path = "protocol=ab_eip&cpu=controllogix&path=1,0&gateway=192.168.1.120&name=MyTag1&elem_count=1"; // YOUR TAG DEFINITION
        let tag = TagEntry::create(path).await.unwrap();
        let tag_ref = tag.get().await;
        let offset = 0;
        //write tag
        tag_ref.write_value(offset, 100u32).await.unwrap();
        // read tag
        let value: u32 = tag_ref.read_value(offset).await.unwrap();
        assert_eq!(value, 100);
    });
}
