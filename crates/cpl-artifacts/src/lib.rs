pub mod atomic;
pub mod cache;
pub mod checkpoint;
pub mod manifest;
pub mod store;

pub use atomic::{write_bytes, write_json, AtomicWriteError};
pub use cache::*;
pub use checkpoint::*;
pub use manifest::*;
pub use store::*;
