//! Error taxonomy for elaboration and simulation

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SimError>;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("Invalid width {width} for {name} (expected 1..=64)")]
    InvalidWidth { name: String, width: u32 },

    #[error("Duplicate name '{name}' in {scope}")]
    DuplicateName { scope: String, name: String },

    #[error("Unknown signal: {0}")]
    UnknownSignal(String),

    #[error("Width mismatch: {lhs} is {lhs_width} bits, {rhs} is {rhs_width} bits")]
    WidthMismatch {
        lhs: String,
        lhs_width: u32,
        rhs: String,
        rhs_width: u32,
    },

    #[error("Net {net} has multiple drivers: {drivers:?}")]
    MultipleDrivers { net: String, drivers: Vec<String> },

    #[error("Input port {0} is not driven")]
    Undriven(String),

    #[error("Combinational loop through blocks: {}", blocks.join(", "))]
    CombinationalLoop { blocks: Vec<String> },

    #[error("Combinational logic did not settle after {passes} passes")]
    Unsettled { passes: usize },

    #[error("Block {block} accessed undeclared signal {signal}")]
    UndeclaredAccess { block: String, signal: String },

    #[error("Signal {0} is driven by an update block and cannot be poked")]
    DrivenSignal(String),

    #[error("IR error: {0}")]
    Ir(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Test failure: {0}")]
    TestFailure(String),
}
