//! Basic RTL building blocks
//!
//! Each constructor adds a child component under `parent` and returns the ids
//! of its ports so the caller can wire them up.

use crate::bits::Bits;
use crate::error::Result;
use crate::netlist::{ComponentId, Design, SignalId};

/// Plain register: `out` takes `in_` on every edge
#[derive(Debug, Clone, Copy)]
pub struct Reg {
    pub comp: ComponentId,
    pub in_: SignalId,
    pub out: SignalId,
}

pub fn reg(d: &mut Design, parent: ComponentId, name: &str, width: u32) -> Result<Reg> {
    let comp = d.add_child(parent, name)?;
    let in_ = d.in_port(comp, "in_", width)?;
    let out = d.out_port(comp, "out", width)?;
    d.seq(comp, "up_reg", &[in_], &[out], move |s| {
        let v = s.get(in_);
        s.write(out, v)
    })?;
    Ok(Reg { comp, in_, out })
}

/// Register that loads `reset_value` while reset is high
pub fn reg_rst(d: &mut Design, parent: ComponentId, name: &str, width: u32, reset_value: u64) -> Result<Reg> {
    let comp = d.add_child(parent, name)?;
    let in_ = d.in_port(comp, "in_", width)?;
    let out = d.out_port(comp, "out", width)?;
    let reset = d.reset(comp);
    d.seq(comp, "up_regrst", &[in_, reset], &[out], move |s| {
        let v = if s.is_set(reset) { reset_value } else { s.get(in_) };
        s.write(out, v)
    })?;
    Ok(Reg { comp, in_, out })
}

#[derive(Debug, Clone, Copy)]
pub struct RegEn {
    pub comp: ComponentId,
    pub en: SignalId,
    pub in_: SignalId,
    pub out: SignalId,
}

/// Register that only loads when `en` is high
pub fn reg_en(d: &mut Design, parent: ComponentId, name: &str, width: u32) -> Result<RegEn> {
    let comp = d.add_child(parent, name)?;
    let en = d.in_port(comp, "en", 1)?;
    let in_ = d.in_port(comp, "in_", width)?;
    let out = d.out_port(comp, "out", width)?;
    d.seq(comp, "up_regen", &[en, in_], &[out], move |s| {
        if s.is_set(en) {
            let v = s.get(in_);
            s.write(out, v);
        }
    })?;
    Ok(RegEn { comp, en, in_, out })
}

#[derive(Debug, Clone)]
pub struct Mux {
    pub comp: ComponentId,
    pub sel: SignalId,
    pub in_: Vec<SignalId>,
    pub out: SignalId,
}

/// Bits needed to select among `n` inputs
pub fn sel_width(n: usize) -> u32 {
    if n <= 2 {
        1
    } else {
        usize::BITS - (n - 1).leading_zeros()
    }
}

/// `n`-input mux; out-of-range selects read as zero
pub fn mux(d: &mut Design, parent: ComponentId, name: &str, width: u32, n: usize) -> Result<Mux> {
    let comp = d.add_child(parent, name)?;
    let sel = d.in_port(comp, "sel", sel_width(n))?;
    let mut in_ = Vec::with_capacity(n);
    for i in 0..n {
        in_.push(d.in_port(comp, &format!("in_{}", i), width)?);
    }
    let out = d.out_port(comp, "out", width)?;

    let mut reads = in_.clone();
    reads.push(sel);
    let inputs = in_.clone();
    d.comb(comp, "up_mux", &reads, &[out], move |s| {
        let idx = s.get(sel) as usize;
        let v = match inputs.get(idx) {
            Some(&sig) => s.get(sig),
            None => 0,
        };
        s.write(out, v)
    })?;
    Ok(Mux { comp, sel, in_, out })
}

/// Single-input unit: `in_` -> `out`
#[derive(Debug, Clone, Copy)]
pub struct Unary {
    pub comp: ComponentId,
    pub in_: SignalId,
    pub out: SignalId,
}

/// Two-input unit: `in0`, `in1` -> `out`
#[derive(Debug, Clone, Copy)]
pub struct Binary {
    pub comp: ComponentId,
    pub in0: SignalId,
    pub in1: SignalId,
    pub out: SignalId,
}

fn binary<F>(d: &mut Design, parent: ComponentId, name: &str, width: u32, out_width: u32, f: F) -> Result<Binary>
where
    F: Fn(Bits, Bits) -> u64 + 'static,
{
    let comp = d.add_child(parent, name)?;
    let in0 = d.in_port(comp, "in0", width)?;
    let in1 = d.in_port(comp, "in1", width)?;
    let out = d.out_port(comp, "out", out_width)?;
    d.comb(comp, "up_out", &[in0, in1], &[out], move |s| {
        let (a, b) = (s.read(in0), s.read(in1));
        s.write(out, f(a, b))
    })?;
    Ok(Binary { comp, in0, in1, out })
}

pub fn zero_comparator(d: &mut Design, parent: ComponentId, name: &str, width: u32) -> Result<Unary> {
    let comp = d.add_child(parent, name)?;
    let in_ = d.in_port(comp, "in_", width)?;
    let out = d.out_port(comp, "out", 1)?;
    d.comb(comp, "up_zero", &[in_], &[out], move |s| {
        let v = s.get(in_) == 0;
        s.write(out, v as u64)
    })?;
    Ok(Unary { comp, in_, out })
}

pub fn lt_comparator(d: &mut Design, parent: ComponentId, name: &str, width: u32) -> Result<Binary> {
    binary(d, parent, name, width, 1, |a, b| (a < b) as u64)
}

pub fn eq_comparator(d: &mut Design, parent: ComponentId, name: &str, width: u32) -> Result<Binary> {
    binary(d, parent, name, width, 1, |a, b| (a == b) as u64)
}

/// Wrapping `in0 - in1`
pub fn subtractor(d: &mut Design, parent: ComponentId, name: &str, width: u32) -> Result<Binary> {
    binary(d, parent, name, width, width, |a, b| (a - b).value())
}

/// Wrapping `in0 + in1`
pub fn adder(d: &mut Design, parent: ComponentId, name: &str, width: u32) -> Result<Binary> {
    binary(d, parent, name, width, width, |a, b| (a + b).value())
}

/// Wrapping `in_ + amount`
pub fn incrementer(d: &mut Design, parent: ComponentId, name: &str, width: u32, amount: u64) -> Result<Unary> {
    let comp = d.add_child(parent, name)?;
    let in_ = d.in_port(comp, "in_", width)?;
    let out = d.out_port(comp, "out", width)?;
    d.comb(comp, "up_incr", &[in_], &[out], move |s| {
        let v = s.read(in_) + amount;
        s.write_bits(out, v)
    })?;
    Ok(Unary { comp, in_, out })
}

#[derive(Debug, Clone, Copy)]
pub struct MinMax {
    pub comp: ComponentId,
    pub in0: SignalId,
    pub in1: SignalId,
    pub out_min: SignalId,
    pub out_max: SignalId,
}

/// Smaller input on `out_min`, larger on `out_max`
pub fn min_max_unit(d: &mut Design, parent: ComponentId, name: &str, width: u32) -> Result<MinMax> {
    let comp = d.add_child(parent, name)?;
    let in0 = d.in_port(comp, "in0", width)?;
    let in1 = d.in_port(comp, "in1", width)?;
    let out_min = d.out_port(comp, "out_min", width)?;
    let out_max = d.out_port(comp, "out_max", width)?;
    d.comb(comp, "up_minmax", &[in0, in1], &[out_min, out_max], move |s| {
        let (a, b) = (s.get(in0), s.get(in1));
        s.write(out_min, a.min(b));
        s.write(out_max, a.max(b));
    })?;
    Ok(MinMax { comp, in0, in1, out_min, out_max })
}
