//! Registered incrementers
//!
//! `RegIncr` registers an 8-bit input and adds one. Chaining `n` of them
//! gives an `n`-stage pipeline whose output is the input plus `n`, `n`
//! cycles later.

use std::collections::VecDeque;

use crate::core::Simulator;
use crate::error::Result;
use crate::harness::TestVectorTable;
use crate::netlist::{ComponentId, Design, SignalId};
use crate::trace::SimView;

pub const WIDTH: u32 = 8;

#[derive(Debug, Clone, Copy)]
pub struct RegIncr {
    pub comp: ComponentId,
    pub in_: SignalId,
    pub reg_out: SignalId,
    pub out: SignalId,
}

/// Single registered incrementer as a child of `parent`
pub fn reg_incr(d: &mut Design, parent: ComponentId, name: &str) -> Result<RegIncr> {
    let comp = d.add_child(parent, name)?;
    let in_ = d.in_port(comp, "in_", WIDTH)?;
    let out = d.out_port(comp, "out", WIDTH)?;
    let reg_out = d.wire(comp, "reg_out", WIDTH)?;
    let reset = d.reset(comp);

    d.seq(comp, "up_reg", &[reset, in_], &[reg_out], move |s| {
        let v = if s.is_set(reset) { 0 } else { s.get(in_) };
        s.write(reg_out, v)
    })?;
    d.comb(comp, "up_incr", &[reg_out], &[out], move |s| {
        let v = s.read(reg_out) + 1;
        s.write_bits(out, v)
    })?;

    Ok(RegIncr { comp, in_, reg_out, out })
}

/// `nstages` incrementers in a row
#[derive(Debug, Clone)]
pub struct RegIncrNstage {
    pub comp: ComponentId,
    pub in_: SignalId,
    pub out: SignalId,
    pub stages: Vec<RegIncr>,
}

impl RegIncrNstage {
    /// Populate `comp` with `in_`/`out` ports and the chained stages.
    /// A request for 0 stages builds 1.
    pub fn build(d: &mut Design, comp: ComponentId, nstages: usize) -> Result<Self> {
        let in_ = d.in_port(comp, "in_", WIDTH)?;
        let out = d.out_port(comp, "out", WIDTH)?;
        let mut stages: Vec<RegIncr> = Vec::with_capacity(nstages);
        let mut prev = in_;
        for i in 0..nstages.max(1) {
            let stage = reg_incr(d, comp, &format!("reg_incr{}", i))?;
            d.connect(prev, stage.in_)?;
            prev = stage.out;
            stages.push(stage);
        }
        d.connect(prev, out)?;
        Ok(Self { comp, in_, out, stages })
    }

    /// Two-stage variant
    pub fn build_2stage(d: &mut Design, comp: ComponentId) -> Result<Self> {
        Self::build(d, comp, 2)
    }

    /// Elaborate a standalone pipeline as the top component
    pub fn elaborate(nstages: usize) -> Result<(Simulator, Self)> {
        let mut d = Design::new("top");
        let top = d.top();
        let unit = Self::build(&mut d, top, nstages)?;
        let mut sim = d.elaborate(Default::default())?;
        let tracer = unit.clone();
        sim.set_line_trace(move |v| tracer.line_trace(v));
        Ok((sim, unit))
    }

    pub fn nstages(&self) -> usize {
        self.stages.len()
    }

    /// `in_ (r0|r1|...) out`
    pub fn line_trace(&self, v: &SimView<'_>) -> String {
        let regs: Vec<String> = self.stages.iter().map(|s| v.peek(s.reg_out).to_string()).collect();
        format!("{} ({}) {}", v.peek(self.in_), regs.join("|"), v.peek(self.out))
    }
}

/// Inputs followed by `nstages` zeros; each output is its input plus
/// `nstages` (mod 256), `nstages` rows later
pub fn mk_test_vector_table(sim: &Simulator, nstages: usize, inputs: &[u64]) -> Result<TestVectorTable> {
    let mut table = TestVectorTable::new(sim, "in_ out*")?;
    let mut last: VecDeque<Option<u64>> = VecDeque::from(vec![None; nstages]);
    for &input in inputs.iter().chain(std::iter::repeat(&0).take(nstages)) {
        let expected = last.pop_front().flatten();
        table.row(&[Some(input), expected])?;
        last.push_back(Some((input + nstages as u64) & 0xff));
    }
    Ok(table)
}
