//! Update blocks
//!
//! An update block is a closure over a declared read-set and write-set. The
//! closure only ever sees the netlist through a [`BlockCtx`], which resolves
//! signals to nets and enforces the declared sets.

use crate::bits::{mask, Bits};
use crate::netlist::{ComponentId, NetId, SignalId};

/// Combinational blocks re-run when their inputs change within a cycle;
/// sequential blocks run once per clock edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Comb,
    Seq,
}

pub type UpdateFn = Box<dyn FnMut(&mut BlockCtx<'_>)>;

/// Block as declared on a component
pub struct BlockDef {
    pub name: String,
    pub owner: ComponentId,
    pub kind: BlockKind,
    pub reads: Vec<SignalId>,
    pub writes: Vec<SignalId>,
    pub(crate) func: UpdateFn,
}

/// Block after elaboration, with signals resolved to nets
pub(crate) struct CompiledBlock {
    pub name: String,
    pub kind: BlockKind,
    pub reads: Vec<NetId>,
    pub writes: Vec<NetId>,
    pub func: UpdateFn,
}

/// Contract violations detected while a block runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Violation {
    Undeclared(SignalId),
    Width { signal: SignalId, got: u32 },
}

/// Where block writes land
enum WriteMode<'a> {
    /// Combinational: straight into the net, changed nets are recorded
    Immediate(&'a mut Vec<NetId>),
    /// Sequential: buffered until the edge commits
    Deferred(&'a mut Vec<(NetId, u64)>),
}

pub struct BlockCtx<'a> {
    values: &'a mut [u64],
    signal_net: &'a [NetId],
    net_widths: &'a [u32],
    reads: &'a [NetId],
    writes: &'a [NetId],
    mode: WriteMode<'a>,
    violation: Option<Violation>,
}

impl<'a> BlockCtx<'a> {
    pub(crate) fn comb(
        values: &'a mut [u64],
        signal_net: &'a [NetId],
        net_widths: &'a [u32],
        reads: &'a [NetId],
        writes: &'a [NetId],
        changed: &'a mut Vec<NetId>,
    ) -> Self {
        Self {
            values,
            signal_net,
            net_widths,
            reads,
            writes,
            mode: WriteMode::Immediate(changed),
            violation: None,
        }
    }

    pub(crate) fn seq(
        values: &'a mut [u64],
        signal_net: &'a [NetId],
        net_widths: &'a [u32],
        reads: &'a [NetId],
        writes: &'a [NetId],
        pending: &'a mut Vec<(NetId, u64)>,
    ) -> Self {
        Self {
            values,
            signal_net,
            net_widths,
            reads,
            writes,
            mode: WriteMode::Deferred(pending),
            violation: None,
        }
    }

    pub(crate) fn into_violation(self) -> Option<Violation> {
        self.violation
    }

    #[inline]
    fn flag(&mut self, v: Violation) {
        if self.violation.is_none() {
            self.violation = Some(v);
        }
    }

    /// Raw value of a signal
    #[inline]
    pub fn get(&mut self, sig: SignalId) -> u64 {
        let net = self.signal_net[sig.index()];
        // Blocks may read back what they write
        if !self.reads.contains(&net) && !self.writes.contains(&net) {
            self.flag(Violation::Undeclared(sig));
        }
        self.values[net.index()]
    }

    #[inline]
    pub fn read(&mut self, sig: SignalId) -> Bits {
        let width = self.net_widths[self.signal_net[sig.index()].index()];
        Bits::new(width, self.get(sig))
    }

    /// Convenience for 1-bit control signals
    #[inline]
    pub fn is_set(&mut self, sig: SignalId) -> bool {
        self.get(sig) != 0
    }

    /// Write a value, truncated to the signal width
    #[inline]
    pub fn write(&mut self, sig: SignalId, value: u64) {
        let net = self.signal_net[sig.index()];
        if !self.writes.contains(&net) {
            self.flag(Violation::Undeclared(sig));
            return;
        }
        let value = value & mask(self.net_widths[net.index()]);
        match &mut self.mode {
            WriteMode::Immediate(changed) => {
                let slot = &mut self.values[net.index()];
                if *slot != value {
                    *slot = value;
                    changed.push(net);
                }
            }
            WriteMode::Deferred(pending) => pending.push((net, value)),
        }
    }

    pub fn write_bits(&mut self, sig: SignalId, value: Bits) {
        let width = self.net_widths[self.signal_net[sig.index()].index()];
        if value.width() != width {
            self.flag(Violation::Width { signal: sig, got: value.width() });
            return;
        }
        self.write(sig, value.value());
    }
}
