//! Line tracing and value dumps
//!
//! A line tracer is a closure that renders one cycle of a design as a single
//! line of text. It receives a [`SimView`], which can read values but never
//! change them.

use crate::bits::Bits;
use crate::core::Simulator;
use crate::harness::StreamPorts;
use crate::netlist::SignalId;

pub type LineTraceFn = Box<dyn Fn(&SimView<'_>) -> String>;

/// Read-only access to a running simulation
pub struct SimView<'a> {
    sim: &'a Simulator,
}

impl<'a> SimView<'a> {
    #[inline]
    pub fn peek(&self, sig: SignalId) -> Bits {
        self.sim.peek(sig)
    }

    #[inline]
    pub fn is_set(&self, sig: SignalId) -> bool {
        !self.sim.peek(sig).is_zero()
    }

    pub fn cycle(&self) -> u64 {
        self.sim.cycle()
    }
}

impl Simulator {
    pub fn view(&self) -> SimView<'_> {
        SimView { sim: self }
    }

    /// Install the design's line tracer, replacing any previous one
    pub fn set_line_trace<F>(&mut self, f: F)
    where
        F: Fn(&SimView<'_>) -> String + 'static,
    {
        self.tracer = Some(Box::new(f));
    }

    /// Current cycle rendered as `"{cycle:>3}: {text}"`
    pub fn line_trace(&self) -> String {
        let text = match &self.tracer {
            Some(f) => f(&self.view()),
            None => String::new(),
        };
        format!("{:>3}: {}", self.cycle(), text)
    }

    /// Every signal and its value, one per line
    pub fn dump_signals(&self) -> String {
        let mut out = String::new();
        for (name, value) in self.signals() {
            out.push_str(&format!("{} = {}\n", name, value));
        }
        out
    }
}

/// `{a,b,c,d}` when `val` is set, otherwise blanks of the same width
pub fn trace_val_elems(val: bool, elems: &[Bits]) -> String {
    let parts: Vec<String> = elems.iter().map(|e| e.to_string()).collect();
    let text = format!("{{{}}}", parts.join(","));
    if val {
        text
    } else {
        " ".repeat(text.len())
    }
}

/// One side of a val/rdy handshake, padded to the width of `msg`:
/// the message on a transfer, `#` when stalled, blank when waiting for
/// input and `.` when neither side is ready.
pub fn trace_valrdy(val: bool, rdy: bool, msg: &str) -> String {
    let width = msg.len().max(1);
    match (val, rdy) {
        (true, true) => msg.to_string(),
        (true, false) => format!("{:<width$}", "#", width = width),
        (false, true) => " ".repeat(width),
        (false, false) => format!("{:<width$}", ".", width = width),
    }
}

/// `trace_valrdy` for a stream interface, message printed in hex
pub fn trace_stream(view: &SimView<'_>, ports: &StreamPorts) -> String {
    let msg = view.peek(ports.msg).to_string();
    trace_valrdy(view.is_set(ports.val), view.is_set(ports.rdy), &msg)
}
