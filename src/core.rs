//! Core simulator
//!
//! Holds the frozen netlist (nets, scheduled combinational blocks, clocked
//! blocks) and the current value of every net. Structure never changes after
//! elaboration; only values do.

use indexmap::IndexMap;

use crate::bits::{mask, Bits};
use crate::block::{BlockCtx, BlockKind, CompiledBlock, Violation};
use crate::config::SimConfig;
use crate::error::{Result, SimError};
use crate::netlist::{Design, NetId, SignalId};
use crate::schedule::Schedule;
use crate::trace::LineTraceFn;

pub struct Simulator {
    /// Full hierarchical signal names, declaration order
    pub(crate) signal_names: Vec<String>,
    /// Net of each signal
    pub(crate) signal_net: Vec<NetId>,
    /// Signal name to id mapping
    name_to_signal: IndexMap<String, SignalId>,
    /// Net names (first member signal)
    net_names: Vec<String>,
    /// Net widths
    pub(crate) net_widths: Vec<u32>,
    /// Nets written by some block
    net_driven: Vec<bool>,
    /// Combinational blocks in evaluation order
    comb_blocks: Vec<CompiledBlock>,
    /// Clocked blocks in declaration order
    seq_blocks: Vec<CompiledBlock>,
    schedule: Schedule,
    reset_net: NetId,
    /// Current net values
    pub(crate) values: Vec<u64>,
    /// Comb blocks needing evaluation, by position
    stale: Vec<bool>,
    /// Buffered clocked writes
    pending: Vec<(NetId, u64)>,
    /// Nets changed by the running comb block
    changed: Vec<NetId>,
    pub(crate) cycle: u64,
    config: SimConfig,
    pub(crate) tracer: Option<LineTraceFn>,
}

impl Simulator {
    pub(crate) fn new(design: Design, config: SimConfig) -> Result<Self> {
        let flat = design.flatten(&config)?;

        let (comb, seq_blocks): (Vec<CompiledBlock>, Vec<CompiledBlock>) =
            flat.blocks.into_iter().partition(|b| b.kind == BlockKind::Comb);

        let net_count = flat.net_widths.len();
        let schedule = Schedule::build(&comb, net_count)?;

        let mut slots: Vec<Option<CompiledBlock>> = comb.into_iter().map(Some).collect();
        let comb_blocks: Vec<CompiledBlock> = schedule
            .order
            .iter()
            .filter_map(|&i| slots[i].take())
            .collect();

        tracing::debug!(
            "elaborated {} signals into {} nets, {} comb blocks ({} levels), {} seq blocks",
            flat.signal_names.len(),
            net_count,
            comb_blocks.len(),
            schedule.depth(),
            seq_blocks.len()
        );

        let stale = vec![true; comb_blocks.len()];

        Ok(Self {
            signal_names: flat.signal_names,
            signal_net: flat.signal_net,
            name_to_signal: flat.name_to_signal,
            net_names: flat.net_names,
            net_widths: flat.net_widths,
            net_driven: flat.driven,
            comb_blocks,
            seq_blocks,
            schedule,
            reset_net: flat.top_reset,
            values: vec![0; net_count],
            stale,
            pending: Vec::new(),
            changed: Vec::new(),
            cycle: 0,
            config,
            tracer: None,
        })
    }

    // ========================================================================
    // Evaluation
    // ========================================================================

    /// Settle combinational logic
    ///
    /// Blocks run in topological order and a change only ever marks blocks
    /// later in that order, so one pass settles any set of pokes or commits.
    /// Only a bound of zero can report `Unsettled`.
    pub fn eval_combinational(&mut self) -> Result<()> {
        let mut passes = 0;
        while self.stale.iter().any(|&s| s) {
            if passes == self.config.max_settle_passes {
                return Err(SimError::Unsettled { passes });
            }
            passes += 1;
            for pos in 0..self.comb_blocks.len() {
                if !self.stale[pos] {
                    continue;
                }
                self.stale[pos] = false;
                self.run_comb(pos)?;
                for net in self.changed.drain(..) {
                    for &reader in &self.schedule.fanout[net.index()] {
                        if reader != pos {
                            self.stale[reader] = true;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn run_comb(&mut self, pos: usize) -> Result<()> {
        let block = &mut self.comb_blocks[pos];
        tracing::trace!("eval {}", block.name);
        let mut ctx = BlockCtx::comb(
            &mut self.values,
            &self.signal_net,
            &self.net_widths,
            &block.reads,
            &block.writes,
            &mut self.changed,
        );
        (block.func)(&mut ctx);
        match ctx.into_violation() {
            Some(v) => Err(violation_error(&self.signal_names, &self.net_widths, &self.signal_net, &block.name, v)),
            None => Ok(()),
        }
    }

    /// One clock edge
    pub fn tick(&mut self) -> Result<()> {
        self.eval_combinational()?;

        if self.config.line_trace {
            tracing::info!("{}", self.line_trace());
        }

        // Every clocked block sees the same pre-edge values
        self.pending.clear();
        for block in self.seq_blocks.iter_mut() {
            let mut ctx = BlockCtx::seq(
                &mut self.values,
                &self.signal_net,
                &self.net_widths,
                &block.reads,
                &block.writes,
                &mut self.pending,
            );
            (block.func)(&mut ctx);
            if let Some(v) = ctx.into_violation() {
                return Err(violation_error(&self.signal_names, &self.net_widths, &self.signal_net, &block.name, v));
            }
        }

        for (net, value) in self.pending.drain(..) {
            let slot = &mut self.values[net.index()];
            if *slot != value {
                *slot = value;
                for &reader in &self.schedule.fanout[net.index()] {
                    self.stale[reader] = true;
                }
            }
        }

        self.eval_combinational()?;
        self.cycle += 1;
        Ok(())
    }

    /// Advance `n` clock edges
    pub fn run(&mut self, n: u64) -> Result<()> {
        for _ in 0..n {
            self.tick()?;
        }
        Ok(())
    }

    /// Hold `reset` high for the configured number of edges
    pub fn reset(&mut self) -> Result<()> {
        self.stale.fill(true);
        self.set_net(self.reset_net, 1);
        for _ in 0..self.config.reset_cycles {
            self.tick()?;
        }
        self.set_net(self.reset_net, 0);
        self.eval_combinational()?;
        self.cycle = 0;
        Ok(())
    }

    fn set_net(&mut self, net: NetId, value: u64) {
        let value = value & mask(self.net_widths[net.index()]);
        if self.values[net.index()] != value {
            self.values[net.index()] = value;
            for &reader in &self.schedule.fanout[net.index()] {
                self.stale[reader] = true;
            }
        }
    }

    // ========================================================================
    // Value access
    // ========================================================================

    fn check_signal(&self, sig: SignalId) -> Result<NetId> {
        self.signal_net
            .get(sig.index())
            .copied()
            .ok_or_else(|| SimError::UnknownSignal(format!("#{}", sig.index())))
    }

    /// Drive an undriven net from outside; the value is masked to its width
    pub fn poke(&mut self, sig: SignalId, value: u64) -> Result<()> {
        let net = self.check_signal(sig)?;
        if self.net_driven[net.index()] {
            return Err(SimError::DrivenSignal(self.signal_names[sig.index()].clone()));
        }
        self.set_net(net, value);
        Ok(())
    }

    pub fn poke_bits(&mut self, sig: SignalId, value: Bits) -> Result<()> {
        let net = self.check_signal(sig)?;
        let width = self.net_widths[net.index()];
        if value.width() != width {
            return Err(SimError::WidthMismatch {
                lhs: self.signal_names[sig.index()].clone(),
                lhs_width: width,
                rhs: format!("poked value {}", value),
                rhs_width: value.width(),
            });
        }
        self.poke(sig, value.value())
    }

    pub fn poke_by_name(&mut self, name: &str, value: u64) -> Result<()> {
        let sig = self.signal_id(name)?;
        self.poke(sig, value)
    }

    /// Current value of `sig`
    ///
    /// Panics if `sig` comes from another design; [`Simulator::try_peek`]
    /// reports `UnknownSignal` instead, as `poke` does.
    pub fn peek(&self, sig: SignalId) -> Bits {
        let net = self.signal_net[sig.index()];
        Bits::new(self.net_widths[net.index()], self.values[net.index()])
    }

    pub fn try_peek(&self, sig: SignalId) -> Result<Bits> {
        let net = self.check_signal(sig)?;
        Ok(Bits::new(self.net_widths[net.index()], self.values[net.index()]))
    }

    pub fn peek_by_name(&self, name: &str) -> Result<Bits> {
        let sig = self.signal_id(name)?;
        self.try_peek(sig)
    }

    pub fn signal_name(&self, sig: SignalId) -> &str {
        &self.signal_names[sig.index()]
    }

    /// Name of the root component
    pub fn top_name(&self) -> &str {
        let first = &self.signal_names[0];
        first.split('.').next().unwrap_or(first)
    }

    pub fn signal_id(&self, name: &str) -> Result<SignalId> {
        self.name_to_signal
            .get(name)
            .copied()
            .ok_or_else(|| SimError::UnknownSignal(name.to_string()))
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn signal_count(&self) -> usize {
        self.signal_names.len()
    }

    pub fn net_count(&self) -> usize {
        self.net_names.len()
    }

    pub fn block_count(&self) -> usize {
        self.comb_blocks.len() + self.seq_blocks.len()
    }

    /// Combinational block names in evaluation order
    pub fn comb_order(&self) -> Vec<&str> {
        self.comb_blocks.iter().map(|b| b.name.as_str()).collect()
    }

    /// Level of each block in `comb_order`
    pub fn levels(&self) -> &[usize] {
        &self.schedule.levels
    }

    /// Every signal with its current value, declaration order
    pub fn signals(&self) -> Vec<(&str, Bits)> {
        self.signal_names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.as_str(), self.peek(SignalId(i))))
            .collect()
    }
}

fn violation_error(
    signal_names: &[String],
    net_widths: &[u32],
    signal_net: &[NetId],
    block: &str,
    v: Violation,
) -> SimError {
    match v {
        Violation::Undeclared(sig) => SimError::UndeclaredAccess {
            block: block.to_string(),
            signal: signal_names[sig.index()].clone(),
        },
        Violation::Width { signal, got } => SimError::WidthMismatch {
            lhs: signal_names[signal.index()].clone(),
            lhs_width: net_widths[signal_net[signal.index()].index()],
            rhs: format!("value written by {}", block),
            rhs_width: got,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// in_ -> reg -> +1 -> out, the smallest design with both block kinds
    fn reg_incr() -> (Simulator, SignalId, SignalId) {
        let mut d = Design::new("top");
        let top = d.top();
        let in_ = d.in_port(top, "in_", 8).unwrap();
        let out = d.out_port(top, "out", 8).unwrap();
        let q = d.wire(top, "q", 8).unwrap();
        d.seq(top, "reg", &[in_], &[q], move |s| {
            let v = s.get(in_);
            s.write(q, v)
        })
        .unwrap();
        d.comb(top, "incr", &[q], &[out], move |s| {
            let v = s.read(q) + 1;
            s.write_bits(out, v)
        })
        .unwrap();
        (d.elaborate(SimConfig::default()).unwrap(), in_, out)
    }

    #[test]
    fn test_registered_incrementer() {
        let (mut sim, in_, out) = reg_incr();
        sim.reset().unwrap();
        assert_eq!(sim.cycle(), 0);
        sim.poke(in_, 0x10).unwrap();
        sim.eval_combinational().unwrap();
        assert_eq!(sim.peek(out).value(), 1);
        sim.tick().unwrap();
        assert_eq!(sim.peek(out).value(), 0x11);
        sim.poke(in_, 0xff).unwrap();
        sim.tick().unwrap();
        assert_eq!(sim.peek(out).value(), 0);
        assert_eq!(sim.cycle(), 2);
    }

    #[test]
    fn test_poke_masks_and_rejects_driven() {
        let (mut sim, in_, out) = reg_incr();
        sim.poke(in_, 0x1ff).unwrap();
        assert_eq!(sim.peek(in_).value(), 0xff);
        assert!(matches!(sim.poke(out, 1), Err(SimError::DrivenSignal(_))));
        assert!(matches!(sim.poke_bits(in_, Bits::new(4, 1)), Err(SimError::WidthMismatch { .. })));
        assert!(matches!(sim.peek_by_name("top.nope"), Err(SimError::UnknownSignal(_))));
        sim.poke_by_name("top.in_", 3).unwrap();
        assert_eq!(sim.peek_by_name("top.in_").unwrap(), 3);
    }

    #[test]
    fn test_clocked_blocks_see_pre_edge_values() {
        // Two-register swap: both must read the old values
        let mut d = Design::new("top");
        let top = d.top();
        let a = d.wire(top, "a", 4).unwrap();
        let b = d.wire(top, "b", 4).unwrap();
        let reset = d.reset(top);
        d.seq(top, "reg_a", &[b, reset], &[a], move |s| {
            let v = if s.is_set(reset) { 1 } else { s.get(b) };
            s.write(a, v)
        })
        .unwrap();
        d.seq(top, "reg_b", &[a, reset], &[b], move |s| {
            let v = if s.is_set(reset) { 2 } else { s.get(a) };
            s.write(b, v)
        })
        .unwrap();
        let mut sim = d.elaborate(SimConfig::default()).unwrap();
        sim.reset().unwrap();
        assert_eq!((sim.peek(a).value(), sim.peek(b).value()), (1, 2));
        sim.tick().unwrap();
        assert_eq!((sim.peek(a).value(), sim.peek(b).value()), (2, 1));
        sim.tick().unwrap();
        assert_eq!((sim.peek(a).value(), sim.peek(b).value()), (1, 2));
    }

    #[test]
    fn test_comb_order_follows_dependencies() {
        let mut d = Design::new("top");
        let top = d.top();
        let x = d.in_port(top, "x", 8).unwrap();
        let y = d.wire(top, "y", 8).unwrap();
        let z = d.out_port(top, "z", 8).unwrap();
        // Declared consumer first
        d.comb(top, "double", &[y], &[z], move |s| {
            let v = s.get(y) * 2;
            s.write(z, v)
        })
        .unwrap();
        d.comb(top, "plus_one", &[x], &[y], move |s| {
            let v = s.get(x) + 1;
            s.write(y, v)
        })
        .unwrap();
        let mut sim = d.elaborate(SimConfig::default()).unwrap();
        assert_eq!(sim.comb_order(), vec!["top.plus_one", "top.double"]);
        assert_eq!(sim.levels(), &[0, 1]);
        sim.poke(x, 4).unwrap();
        sim.eval_combinational().unwrap();
        assert_eq!(sim.peek(z).value(), 10);
    }

    #[test]
    fn test_combinational_loop_rejected() {
        let mut d = Design::new("top");
        let top = d.top();
        let p = d.wire(top, "p", 1).unwrap();
        let q = d.wire(top, "q", 1).unwrap();
        d.comb(top, "inv_p", &[p], &[q], move |s| {
            let v = !s.get(p) & 1;
            s.write(q, v)
        })
        .unwrap();
        d.comb(top, "inv_q", &[q], &[p], move |s| {
            let v = !s.get(q) & 1;
            s.write(p, v)
        })
        .unwrap();
        match d.elaborate(SimConfig::default()) {
            Err(SimError::CombinationalLoop { blocks }) => {
                assert_eq!(blocks, vec!["top.inv_p", "top.inv_q"]);
            }
            Err(e) => panic!("unexpected error {}", e),
            Ok(_) => panic!("expected CombinationalLoop"),
        }
    }

    #[test]
    fn test_undeclared_read_reported() {
        let mut d = Design::new("top");
        let top = d.top();
        let a = d.in_port(top, "a", 1).unwrap();
        let b = d.out_port(top, "b", 1).unwrap();
        d.comb(top, "sneaky", &[], &[b], move |s| {
            let v = s.get(a);
            s.write(b, v)
        })
        .unwrap();
        let mut sim = d.elaborate(SimConfig::default()).unwrap();
        match sim.eval_combinational() {
            Err(SimError::UndeclaredAccess { block, signal }) => {
                assert_eq!(block, "top.sneaky");
                assert_eq!(signal, "top.a");
            }
            _ => panic!("expected UndeclaredAccess"),
        }
    }

    #[test]
    fn test_undeclared_write_discarded() {
        let mut d = Design::new("top");
        let top = d.top();
        let a = d.wire(top, "a", 4).unwrap();
        d.seq(top, "rogue", &[], &[], move |s| s.write(a, 7)).unwrap();
        let mut sim = d.elaborate(SimConfig::default()).unwrap();
        assert!(matches!(sim.tick(), Err(SimError::UndeclaredAccess { .. })));
        assert_eq!(sim.peek(a).value(), 0);
    }

    #[test]
    fn test_width_checked_write() {
        let mut d = Design::new("top");
        let top = d.top();
        let a = d.out_port(top, "a", 4).unwrap();
        d.comb(top, "wide", &[], &[a], move |s| s.write_bits(a, Bits::new(8, 1))).unwrap();
        let mut sim = d.elaborate(SimConfig::default()).unwrap();
        match sim.eval_combinational() {
            Err(SimError::WidthMismatch { lhs, lhs_width, rhs_width, .. }) => {
                assert_eq!(lhs, "top.a");
                assert_eq!((lhs_width, rhs_width), (4, 8));
            }
            _ => panic!("expected WidthMismatch"),
        }
    }

    #[test]
    fn test_blocks_rerun_only_on_change() {
        let mut d = Design::new("top");
        let top = d.top();
        let a = d.wire(top, "a", 8).unwrap();
        let b = d.wire(top, "b", 8).unwrap();
        d.comb(top, "count", &[a], &[b], move |s| {
            let v = s.get(a) + 1;
            s.write(b, v)
        })
        .unwrap();
        let mut calls = 0u64;
        d.comb(top, "bump", &[], &[a], move |s| {
            calls += 1;
            s.write(a, calls)
        })
        .unwrap();
        let mut sim = d.elaborate(SimConfig::default()).unwrap();
        sim.eval_combinational().unwrap();
        assert_eq!(sim.peek(b).value(), 2);
        // Nothing stale, so "bump" does not run again
        sim.eval_combinational().unwrap();
        assert_eq!(sim.peek(a).value(), 1);
    }

    #[test]
    fn test_single_pass_bound() {
        let mut d = Design::new("top");
        let top = d.top();
        let x = d.in_port(top, "x", 8).unwrap();
        let mut prev = x;
        for i in 0..4 {
            let next = d.wire(top, &format!("w{}", i), 8).unwrap();
            d.comb(top, &format!("inc{}", i), &[prev], &[next], move |s| {
                let v = s.get(prev) + 1;
                s.write(next, v)
            })
            .unwrap();
            prev = next;
        }
        let last = prev;
        let config = SimConfig { max_settle_passes: 1, ..SimConfig::default() };
        let mut sim = d.elaborate(config).unwrap();
        for v in [0, 7, 250] {
            sim.poke(x, v).unwrap();
            sim.eval_combinational().unwrap();
            assert_eq!(sim.peek(last).value(), (v + 4) & 0xff);
        }
        sim.run(3).unwrap();
    }

    #[test]
    fn test_foreign_signal_id() {
        let (mut sim, _, _) = reg_incr();
        let mut other = Design::new("other");
        let top = other.top();
        let mut foreign = None;
        for i in 0..8 {
            foreign = Some(other.wire(top, &format!("w{}", i), 1).unwrap());
        }
        let foreign = foreign.unwrap();
        assert!(matches!(sim.try_peek(foreign), Err(SimError::UnknownSignal(_))));
        assert!(matches!(sim.poke(foreign, 1), Err(SimError::UnknownSignal(_))));
    }

    #[test]
    fn test_unsettled_bound() {
        let mut d = Design::new("top");
        let top = d.top();
        let a = d.out_port(top, "a", 1).unwrap();
        d.connect_const(a, 1).unwrap();
        let config = SimConfig { max_settle_passes: 0, ..SimConfig::default() };
        let mut sim = d.elaborate(config).unwrap();
        assert!(matches!(sim.eval_combinational(), Err(SimError::Unsettled { passes: 0 })));
    }

    #[test]
    fn test_introspection() {
        let (mut sim, in_, _) = reg_incr();
        assert_eq!(sim.signal_count(), 4);
        assert_eq!(sim.net_count(), 4);
        assert_eq!(sim.block_count(), 2);
        sim.poke(in_, 5).unwrap();
        let signals = sim.signals();
        assert_eq!(signals[0].0, "top.reset");
        assert_eq!(signals[1], ("top.in_", Bits::new(8, 5)));
        sim.run(3).unwrap();
        assert_eq!(sim.cycle(), 3);
    }
}
