pub mod builder;
pub mod seek;
pub mod store;

pub use builder::{IndexEntry, TimestampIndex, DEFAULT_BUCKET_SIZE};
pub use seek::{resolve, SeekPoint, SeekPrecision};
