// abtag
//
// a native rust client for Allen-Bradley PLCs over EtherNet/IP and CIP.
// Copyright: 2025-2026, the abtag project authors
// License: MIT

/*!
# abtag-async

tokio based async wrapper for `abtag-core`.

## How to use

Add `abtag-async` to your Cargo.toml

```toml
[dependencies]
abtag-async = "0.1"
```

## Examples

```rust,no_run
use abtag_async::TagEntry;

# async fn run() -> abtag_async::Result<()> {
let path = "protocol=ab_eip&cpu=controllogix&path=1,0&gateway=192.168.1.120&name=MyTag1&elem_count=1";

let tag = TagEntry::create(path).await?;
let tag_ref = tag.get().await;
let value: u16 = tag_ref.read_value(0).await?;
println!("tag value: {}", value);

tag_ref.write_value(0, value + 10).await?;
# Ok(())
# }
```

## Thread-safety

It's safe to share [`TagEntry`] and [`Pool`] across tasks and threads;
each wire operation holds the tag's async lock for its whole duration.
*/
#![warn(missing_docs)]

mod entry;
mod pool;

pub use entry::{TagEntry, TagRef};
pub use pool::Pool;

use abtag_core::Status;
use std::fmt;
use tokio::task::JoinError;

/// result for `abtag-async`
pub type Result<T> = std::result::Result<T, Error>;

/// errors for `abtag-async`
#[derive(Debug)]
pub enum Error {
    /// plc tag error
    TagError(Status),
    /// tokio task join error
    JoinError(JoinError),
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::TagError(_) => None,
            Error::JoinError(e) => Some(e),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::TagError(e) => write!(f, "TagError - {}", e),
            Error::JoinError(e) => write!(f, "{}", e),
        }
    }
}

impl From<Status> for Error {
    fn from(s: Status) -> Self {
        Error::TagError(s)
    }
}

impl From<JoinError> for Error {
    fn from(e: JoinError) -> Self {
        Error::JoinError(e)
    }
}
