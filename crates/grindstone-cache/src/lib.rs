//! # Grindstone Cache
//!
//! The two low-latency caches the recognizer leans on: a small LRU of
//! recent screen captures and a TTL-bounded store of recognition results
//! keyed by capture identity. Both are safe under concurrent access from
//! scheduling loops sharing one application.
//!
//! Neither cache knows anything about scheduling or states; staleness
//! policy is the whole contract. A capture older than the device's current
//! screen is useless no matter how recently it was read, and a recognition
//! result past its TTL is recomputed, never served.

pub mod captures;
pub mod results;

pub use captures::CaptureCache;
pub use results::{CacheLookup, ResultCache};
