//! Payload circuits
//!
//! Each design comes in several abstraction levels (functional, cycle-level
//! and register-transfer) that share a port interface, so the same tests
//! drive all of them.

pub mod gcd;
pub mod regincr;
pub mod sort;
