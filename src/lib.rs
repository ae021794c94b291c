//! A fixed-size, lock-free histogram for `u64` observations such as
//! latencies.
//!
//! Values are classified into `BUCKET_COUNT` buckets whose upper bounds
//! grow by 1.5x and are rounded to two significant digits, covering the
//! whole `u64` range. Any number of threads may call `Histogram::insert`
//! and the statistics accessors concurrently through a shared reference.
//!
//! ```
//! use histobucket::Histogram;
//!
//! let histogram = Histogram::new();
//! for latency in &[120_u64, 340, 95, 2_000] {
//!     histogram.insert(*latency);
//! }
//! assert_eq!(histogram.count(), 4);
//! assert_eq!(histogram.max(), 2_000);
//! println!("p99: {}", histogram.percentile(99.));
//! ```
#![deny(missing_debug_implementations)]

pub use bucket_map::{BucketMap, BUCKET_COUNT};
pub use histo::Histogram;

mod bucket_map;
mod histo;
