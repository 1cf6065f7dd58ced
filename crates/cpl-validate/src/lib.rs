pub mod engine;
pub mod gates;
pub mod rule;
pub mod types;

pub use engine::{GateEngine, GateEngineError};
pub use gates::{standard_gates, GATE_ORDER};
pub use rule::{Gate, GateInput, GateOutcome};
pub use types::*;
