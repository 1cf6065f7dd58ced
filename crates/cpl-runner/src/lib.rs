pub mod collab;
pub mod config;
pub mod media;
pub mod runner;
pub mod util;

pub use collab::*;
pub use config::*;
pub use media::*;
pub use runner::*;
pub use util::*;
