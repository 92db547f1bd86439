//! Four-element sort unit
//!
//! Sorts four `nbits` values into ascending order with a three-stage bitonic
//! network: sort pairs (0,1) and (2,3), then (0,2) and (1,3), then the middle
//! two. `in_val` travels down the pipeline alongside the data.

use std::collections::VecDeque;

use crate::bits::Bits;
use crate::core::Simulator;
use crate::error::Result;
use crate::harness::TestVectorTable;
use crate::netlist::{ComponentId, Design, SignalId};
use crate::primitives::{min_max_unit, reg, reg_rst};
use crate::trace::{trace_val_elems, SimView};

pub const HEADER: &str = "in_val in_0 in_1 in_2 in_3 out_val* out_0* out_1* out_2* out_3*";

pub fn sort_fl(elems: &[u64]) -> Vec<u64> {
    let mut sorted = elems.to_vec();
    sorted.sort_unstable();
    sorted
}

#[inline]
fn min_max(a: u64, b: u64) -> (u64, u64) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

type PortFn = fn(&mut Design, ComponentId, &str, u32) -> Result<SignalId>;

fn port_array(d: &mut Design, comp: ComponentId, prefix: &str, width: u32, f: PortFn) -> Result<[SignalId; 4]> {
    Ok([
        f(d, comp, &format!("{}_0", prefix), width)?,
        f(d, comp, &format!("{}_1", prefix), width)?,
        f(d, comp, &format!("{}_2", prefix), width)?,
        f(d, comp, &format!("{}_3", prefix), width)?,
    ])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortModel {
    Fl,
    /// Cycle-level with the given number of stages; 0 is built as 1
    Cl(usize),
    FlatRtl,
    StructRtl,
}

impl SortModel {
    pub fn latency(&self) -> usize {
        match self {
            SortModel::Fl => 1,
            SortModel::Cl(n) => (*n).max(1),
            SortModel::FlatRtl | SortModel::StructRtl => 3,
        }
    }
}

/// Ports of a sort unit plus the pipeline registers shown in its trace
#[derive(Debug, Clone)]
pub struct SortUnit {
    pub comp: ComponentId,
    pub in_val: SignalId,
    pub in_: [SignalId; 4],
    pub out_val: SignalId,
    pub out: [SignalId; 4],
    stages: Vec<(SignalId, [SignalId; 4])>,
}

impl SortUnit {
    /// Populate `comp` with the chosen model
    pub fn build(d: &mut Design, comp: ComponentId, model: SortModel, nbits: u32) -> Result<Self> {
        let mut unit = SortUnit {
            comp,
            in_val: d.in_port(comp, "in_val", 1)?,
            in_: port_array(d, comp, "in", nbits, Design::in_port)?,
            out_val: d.out_port(comp, "out_val", 1)?,
            out: port_array(d, comp, "out", nbits, Design::out_port)?,
            stages: Vec::new(),
        };
        match model {
            SortModel::Fl => unit.build_fl(d)?,
            SortModel::Cl(n) => unit.build_cl(d, n)?,
            SortModel::FlatRtl => unit.build_flat_rtl(d, nbits)?,
            SortModel::StructRtl => unit.build_struct_rtl(d, nbits)?,
        }
        Ok(unit)
    }

    /// Elaborate a standalone unit as the top component
    pub fn elaborate(model: SortModel, nbits: u32) -> Result<(Simulator, SortUnit)> {
        let mut d = Design::new("top");
        let top = d.top();
        let unit = SortUnit::build(&mut d, top, model, nbits)?;
        let mut sim = d.elaborate(Default::default())?;
        let tracer = unit.clone();
        sim.set_line_trace(move |v| tracer.line_trace(v));
        Ok((sim, unit))
    }

    /// `in|S1|S2|S3|out` for the RTL models, `in|out` otherwise
    pub fn line_trace(&self, v: &SimView<'_>) -> String {
        let render = |val: SignalId, elems: &[SignalId; 4]| {
            let bits: Vec<Bits> = elems.iter().map(|&e| v.peek(e)).collect();
            trace_val_elems(v.is_set(val), &bits)
        };
        let mut parts = vec![render(self.in_val, &self.in_)];
        for (val, elems) in &self.stages {
            parts.push(render(*val, elems));
        }
        parts.push(render(self.out_val, &self.out));
        parts.join("|")
    }

    fn build_fl(&mut self, d: &mut Design) -> Result<()> {
        let (in_val, in_, out_val, out) = (self.in_val, self.in_, self.out_val, self.out);
        let mut reads = vec![in_val];
        reads.extend(in_);
        let mut writes = vec![out_val];
        writes.extend(out);
        d.seq(self.comp, "up_fl", &reads, &writes, move |s| {
            let v = s.get(in_val);
            s.write(out_val, v);
            let elems: Vec<u64> = in_.iter().map(|&i| s.get(i)).collect();
            for (&o, e) in out.iter().zip(sort_fl(&elems)) {
                s.write(o, e);
            }
        })?;
        Ok(())
    }

    fn build_cl(&mut self, d: &mut Design, nstages: usize) -> Result<()> {
        let (in_val, in_, out_val, out) = (self.in_val, self.in_, self.out_val, self.out);
        let reset = d.reset(self.comp);
        let depth = nstages.max(1) - 1;
        let mut pipe: VecDeque<[u64; 5]> = VecDeque::from(vec![[0; 5]; depth]);

        let mut reads = vec![reset, in_val];
        reads.extend(in_);
        let mut writes = vec![out_val];
        writes.extend(out);
        d.seq(self.comp, "up_cl", &reads, &writes, move |s| {
            let data = if s.is_set(reset) {
                pipe = VecDeque::from(vec![[0; 5]; depth]);
                [0; 5]
            } else {
                let elems: Vec<u64> = in_.iter().map(|&i| s.get(i)).collect();
                let mut entry = [s.get(in_val), 0, 0, 0, 0];
                entry[1..].copy_from_slice(&sort_fl(&elems));
                pipe.push_back(entry);
                pipe.pop_front().unwrap_or_default()
            };
            s.write(out_val, data[0]);
            for (&o, &e) in out.iter().zip(&data[1..]) {
                s.write(o, e);
            }
        })?;
        Ok(())
    }

    fn build_flat_rtl(&mut self, d: &mut Design, nbits: u32) -> Result<()> {
        let comp = self.comp;
        let reset = d.reset(comp);

        let mut val = self.in_val;
        let mut elm = self.in_;
        for stage in 1..=3 {
            // Pipeline registers feeding this stage
            let val_s = d.wire(comp, &format!("val_S{}", stage), 1)?;
            let elm_s = port_array(d, comp, &format!("elm_S{}", stage), nbits, Design::wire)?;
            let (val_in, elm_in) = (val, elm);
            let mut reads = vec![reset, val_in];
            reads.extend(elm_in);
            let mut writes = vec![val_s];
            writes.extend(elm_s);
            d.seq(comp, &format!("pipereg_S{}", stage), &reads, &writes, move |s| {
                let v = if s.is_set(reset) { 0 } else { s.get(val_in) };
                s.write(val_s, v);
                for (&o, &i) in elm_s.iter().zip(&elm_in) {
                    let e = s.get(i);
                    s.write(o, e);
                }
            })?;
            self.stages.push((val_s, elm_s));

            // Compare-and-swap network for this stage
            let next = port_array(d, comp, &format!("elm_next_S{}", stage), nbits, Design::wire)?;
            let pairs: &'static [(usize, usize)] = match stage {
                1 => &[(0, 1), (2, 3)],
                2 => &[(0, 2), (1, 3)],
                _ => &[(1, 2)],
            };
            d.comb(comp, &format!("stage_S{}", stage), &elm_s, &next, move |s| {
                let mut e = [0u64; 4];
                for (slot, &sig) in e.iter_mut().zip(&elm_s) {
                    *slot = s.get(sig);
                }
                for &(lo, hi) in pairs {
                    (e[lo], e[hi]) = min_max(e[lo], e[hi]);
                }
                for (&o, &v) in next.iter().zip(&e) {
                    s.write(o, v);
                }
            })?;

            val = val_s;
            elm = next;
        }

        d.connect(self.out_val, val)?;
        for (&o, &e) in self.out.iter().zip(&elm) {
            d.connect(o, e)?;
        }
        Ok(())
    }

    fn build_struct_rtl(&mut self, d: &mut Design, nbits: u32) -> Result<()> {
        let comp = self.comp;

        // S0 -> S1
        let val_s0s1 = reg_rst(d, comp, "val_S0S1", 1, 0)?;
        d.connect(self.in_val, val_s0s1.in_)?;
        let mut elm_s0s1 = Vec::with_capacity(4);
        for i in 0..4 {
            let r = reg(d, comp, &format!("elm_S0S1_{}", i), nbits)?;
            d.connect(self.in_[i], r.in_)?;
            elm_s0s1.push(r.out);
        }

        let mm0_s1 = min_max_unit(d, comp, "minmax0_S1", nbits)?;
        d.connect(elm_s0s1[0], mm0_s1.in0)?;
        d.connect(elm_s0s1[1], mm0_s1.in1)?;
        let mm1_s1 = min_max_unit(d, comp, "minmax1_S1", nbits)?;
        d.connect(elm_s0s1[2], mm1_s1.in0)?;
        d.connect(elm_s0s1[3], mm1_s1.in1)?;

        // S1 -> S2
        let val_s1s2 = reg_rst(d, comp, "val_S1S2", 1, 0)?;
        d.connect(val_s0s1.out, val_s1s2.in_)?;
        let s1_out = [mm0_s1.out_min, mm0_s1.out_max, mm1_s1.out_min, mm1_s1.out_max];
        let mut elm_s1s2 = Vec::with_capacity(4);
        for (i, &src) in s1_out.iter().enumerate() {
            let r = reg(d, comp, &format!("elm_S1S2_{}", i), nbits)?;
            d.connect(src, r.in_)?;
            elm_s1s2.push(r.out);
        }

        let mm0_s2 = min_max_unit(d, comp, "minmax0_S2", nbits)?;
        d.connect(elm_s1s2[0], mm0_s2.in0)?;
        d.connect(elm_s1s2[2], mm0_s2.in1)?;
        let mm1_s2 = min_max_unit(d, comp, "minmax1_S2", nbits)?;
        d.connect(elm_s1s2[1], mm1_s2.in0)?;
        d.connect(elm_s1s2[3], mm1_s2.in1)?;

        // S2 -> S3
        let val_s2s3 = reg_rst(d, comp, "val_S2S3", 1, 0)?;
        d.connect(val_s1s2.out, val_s2s3.in_)?;
        let s2_out = [mm0_s2.out_min, mm0_s2.out_max, mm1_s2.out_min, mm1_s2.out_max];
        let mut elm_s2s3 = Vec::with_capacity(4);
        for (i, &src) in s2_out.iter().enumerate() {
            let r = reg(d, comp, &format!("elm_S2S3_{}", i), nbits)?;
            d.connect(src, r.in_)?;
            elm_s2s3.push(r.out);
        }

        let mm_s3 = min_max_unit(d, comp, "minmax_S3", nbits)?;
        d.connect(elm_s2s3[1], mm_s3.in0)?;
        d.connect(elm_s2s3[2], mm_s3.in1)?;

        d.connect(self.out_val, val_s2s3.out)?;
        d.connect(self.out[0], elm_s2s3[0])?;
        d.connect(self.out[1], mm_s3.out_min)?;
        d.connect(self.out[2], mm_s3.out_max)?;
        d.connect(self.out[3], elm_s2s3[3])?;

        let as_array = |v: &[SignalId]| [v[0], v[1], v[2], v[3]];
        self.stages.push((val_s0s1.out, as_array(&elm_s0s1)));
        self.stages.push((val_s1s2.out, as_array(&elm_s1s2)));
        self.stages.push((val_s2s3.out, as_array(&elm_s2s3)));
        Ok(())
    }
}

/// Table that feeds `inputs` back to back, then `latency` idle rows, and
/// expects each sorted result `latency` rows after its input
pub fn mk_test_vector_table(sim: &Simulator, latency: usize, inputs: &[[u64; 4]]) -> Result<TestVectorTable> {
    let mut table = TestVectorTable::new(sim, HEADER)?;
    let mut expected: VecDeque<Option<Vec<u64>>> = VecDeque::from(vec![None; latency]);
    let idle = [0u64; 4];
    let rows = inputs.iter().map(|i| (1, i)).chain(std::iter::repeat((0, &idle)).take(latency));
    for (val, elems) in rows {
        let mut row: Vec<Option<u64>> = vec![Some(val)];
        row.extend(elems.iter().map(|&e| Some(e)));
        match expected.pop_front().flatten() {
            Some(sorted) => {
                row.push(Some(1));
                row.extend(sorted.into_iter().map(Some));
            }
            None => {
                row.push(Some(0));
                row.extend([None; 4]);
            }
        }
        expected.push_back(if val == 1 { Some(sort_fl(elems)) } else { None });
        table.row(&row)?;
    }
    Ok(table)
}
