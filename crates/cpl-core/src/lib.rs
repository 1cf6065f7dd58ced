pub mod digest;
pub mod ids;
pub mod lexicon;
pub mod model;
pub mod tone;

pub use digest::*;
pub use ids::*;
pub use lexicon::*;
pub use model::*;
pub use tone::*;
