//! Cycle-based RTL interpreter
//!
//! Designs are built as a tree of components holding ports, wires and
//! update blocks. Elaboration flattens the tree into nets and orders the
//! combinational blocks by their declared read and write sets:
//! - Union-find net merging with single-driver checks
//! - Topological block schedule, combinational loops rejected up front
//! - Change-driven settling bounded by a pass limit
//! - Two-phase clock edge (all registers sample pre-edge values, then commit)
//!
//! A JSON module description can be loaded in place of hand-built
//! components, and the C ABI in [`ffi`] exposes such simulators to other
//! languages.

pub mod bits;
pub mod block;
pub mod config;
pub mod core;
pub mod designs;
pub mod error;
pub mod ffi;
pub mod harness;
pub mod ir;
pub mod netlist;
pub mod primitives;
pub mod schedule;
pub mod trace;

pub use crate::bits::Bits;
pub use crate::block::{BlockCtx, BlockKind};
pub use crate::config::SimConfig;
pub use crate::core::Simulator;
pub use crate::error::{Result, SimError};
pub use crate::netlist::{BlockId, ComponentId, Design, Direction, NetId, SignalId};
pub use crate::trace::SimView;
