//! JSON module description
//!
//! A flat module (ports, nets, registers, continuous assigns and clocked
//! processes) described in JSON is elaborated into ordinary update blocks:
//! one combinational block per assign and one clocked block per process.

use indexmap::IndexMap;
use serde::Deserialize;

use crate::bits::{mask, MAX_WIDTH};
use crate::block::BlockCtx;
use crate::config::SimConfig;
use crate::core::Simulator;
use crate::error::{Result, SimError};
use crate::netlist::{ComponentId, Design, Direction, SignalId};

// ============================================================================
// JSON schema
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortDirection {
    In,
    Out,
}

/// Port definition
#[derive(Debug, Clone, Deserialize)]
pub struct PortDef {
    pub name: String,
    pub direction: PortDirection,
    pub width: u32,
}

/// Wire/net definition
#[derive(Debug, Clone, Deserialize)]
pub struct NetDef {
    pub name: String,
    pub width: u32,
}

/// Register definition
#[derive(Debug, Clone, Deserialize)]
pub struct RegDef {
    pub name: String,
    pub width: u32,
    #[serde(default)]
    pub reset_value: Option<u64>,
}

/// Expression types (JSON deserialization)
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExprDef {
    Signal { name: String, width: u32 },
    Literal { value: i64, width: u32 },
    UnaryOp { op: String, operand: Box<ExprDef>, width: u32 },
    BinaryOp { op: String, left: Box<ExprDef>, right: Box<ExprDef>, width: u32 },
    Mux { condition: Box<ExprDef>, when_true: Box<ExprDef>, when_false: Box<ExprDef>, width: u32 },
    Slice { base: Box<ExprDef>, low: u32, high: u32, width: u32 },
    Concat { parts: Vec<ExprDef>, width: u32 },
    Resize { expr: Box<ExprDef>, width: u32 },
}

impl ExprDef {
    fn width(&self) -> u32 {
        match self {
            ExprDef::Signal { width, .. }
            | ExprDef::Literal { width, .. }
            | ExprDef::UnaryOp { width, .. }
            | ExprDef::BinaryOp { width, .. }
            | ExprDef::Mux { width, .. }
            | ExprDef::Slice { width, .. }
            | ExprDef::Concat { width, .. }
            | ExprDef::Resize { width, .. } => *width,
        }
    }
}

/// Assignment (combinational)
#[derive(Debug, Clone, Deserialize)]
pub struct AssignDef {
    pub target: String,
    pub expr: ExprDef,
}

/// Process: clocked processes update on the edge, others are combinational
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessDef {
    pub name: String,
    #[serde(default)]
    pub clock: Option<String>,
    pub clocked: bool,
    pub statements: Vec<AssignDef>,
}

/// Complete module IR
#[derive(Debug, Clone, Deserialize)]
pub struct ModuleIR {
    pub name: String,
    pub ports: Vec<PortDef>,
    #[serde(default)]
    pub nets: Vec<NetDef>,
    #[serde(default)]
    pub regs: Vec<RegDef>,
    #[serde(default)]
    pub assigns: Vec<AssignDef>,
    #[serde(default)]
    pub processes: Vec<ProcessDef>,
}

impl ModuleIR {
    pub fn from_json(json: &str) -> Result<Self> {
        let mut deserializer = serde_json::Deserializer::from_str(json);
        deserializer.disable_recursion_limit();
        serde::Deserialize::deserialize(&mut deserializer)
            .map_err(|e| SimError::Ir(format!("Failed to parse IR JSON: {}", e)))
    }
}

// ============================================================================
// Compiled expressions
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum UnaryOp {
    Not,
    LogicalNot,
    ReduceAnd,
    ReduceOr,
    ReduceXor,
}

#[derive(Debug, Clone, Copy)]
enum BinaryOp {
    And,
    Or,
    Xor,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Shl,
    Shr,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

/// Expression with names resolved to signals and widths folded into masks
#[derive(Debug, Clone)]
enum Expr {
    Signal(SignalId),
    Const(u64),
    Unary { op: UnaryOp, operand: Box<Expr>, operand_mask: u64, mask: u64 },
    Binary { op: BinaryOp, left: Box<Expr>, right: Box<Expr>, mask: u64 },
    Mux { cond: Box<Expr>, when_true: Box<Expr>, when_false: Box<Expr>, mask: u64 },
    Slice { base: Box<Expr>, low: u32, mask: u64 },
    /// Parts least significant first, with their widths
    Concat { parts: Vec<(Expr, u32)>, mask: u64 },
    Resize { expr: Box<Expr>, mask: u64 },
}

impl Expr {
    fn eval(&self, s: &mut BlockCtx<'_>) -> u64 {
        match self {
            Expr::Signal(sig) => s.get(*sig),
            Expr::Const(v) => *v,
            Expr::Unary { op, operand, operand_mask, mask } => {
                let v = operand.eval(s) & operand_mask;
                let r = match op {
                    UnaryOp::Not => !v,
                    UnaryOp::LogicalNot => (v == 0) as u64,
                    UnaryOp::ReduceAnd => (v == *operand_mask) as u64,
                    UnaryOp::ReduceOr => (v != 0) as u64,
                    UnaryOp::ReduceXor => (v.count_ones() & 1) as u64,
                };
                r & mask
            }
            Expr::Binary { op, left, right, mask } => {
                let (l, r) = (left.eval(s), right.eval(s));
                let v = match op {
                    BinaryOp::And => l & r,
                    BinaryOp::Or => l | r,
                    BinaryOp::Xor => l ^ r,
                    BinaryOp::Add => l.wrapping_add(r),
                    BinaryOp::Sub => l.wrapping_sub(r),
                    BinaryOp::Mul => l.wrapping_mul(r),
                    BinaryOp::Div => l.checked_div(r).unwrap_or(0),
                    BinaryOp::Mod => l.checked_rem(r).unwrap_or(0),
                    BinaryOp::Shl => u32::try_from(r).ok().and_then(|r| l.checked_shl(r)).unwrap_or(0),
                    BinaryOp::Shr => u32::try_from(r).ok().and_then(|r| l.checked_shr(r)).unwrap_or(0),
                    BinaryOp::Eq => (l == r) as u64,
                    BinaryOp::Ne => (l != r) as u64,
                    BinaryOp::Lt => (l < r) as u64,
                    BinaryOp::Gt => (l > r) as u64,
                    BinaryOp::Le => (l <= r) as u64,
                    BinaryOp::Ge => (l >= r) as u64,
                };
                v & mask
            }
            Expr::Mux { cond, when_true, when_false, mask } => {
                let v = if cond.eval(s) != 0 { when_true.eval(s) } else { when_false.eval(s) };
                v & mask
            }
            Expr::Slice { base, low, mask } => base.eval(s).checked_shr(*low).unwrap_or(0) & mask,
            Expr::Concat { parts, mask } => {
                let mut acc = 0u64;
                let mut shift = 0u32;
                for (part, width) in parts {
                    let v = part.eval(s) & crate::bits::mask(*width);
                    acc |= v.checked_shl(shift).unwrap_or(0);
                    shift = shift.saturating_add(*width);
                }
                acc & mask
            }
            Expr::Resize { expr, mask } => expr.eval(s) & mask,
        }
    }

    fn collect_signals(&self, out: &mut Vec<SignalId>) {
        match self {
            Expr::Signal(sig) => out.push(*sig),
            Expr::Const(_) => {}
            Expr::Unary { operand, .. } => operand.collect_signals(out),
            Expr::Binary { left, right, .. } => {
                left.collect_signals(out);
                right.collect_signals(out);
            }
            Expr::Mux { cond, when_true, when_false, .. } => {
                cond.collect_signals(out);
                when_true.collect_signals(out);
                when_false.collect_signals(out);
            }
            Expr::Slice { base, .. } => base.collect_signals(out),
            Expr::Concat { parts, .. } => {
                for (part, _) in parts {
                    part.collect_signals(out);
                }
            }
            Expr::Resize { expr, .. } => expr.collect_signals(out),
        }
    }
}

struct Compiler<'a> {
    names: &'a IndexMap<String, SignalId>,
    design: &'a Design,
}

impl Compiler<'_> {
    fn resolve(&self, name: &str) -> Result<SignalId> {
        self.names
            .get(name)
            .copied()
            .ok_or_else(|| SimError::UnknownSignal(name.to_string()))
    }

    fn compile(&self, expr: &ExprDef) -> Result<Expr> {
        Ok(match expr {
            ExprDef::Signal { name, .. } => Expr::Signal(self.resolve(name)?),
            ExprDef::Literal { value, width } => Expr::Const((*value as u64) & mask(*width)),
            ExprDef::UnaryOp { op, operand, width } => {
                let op = match op.as_str() {
                    "~" | "not" => UnaryOp::Not,
                    "!" => UnaryOp::LogicalNot,
                    "&" | "reduce_and" => UnaryOp::ReduceAnd,
                    "|" | "reduce_or" => UnaryOp::ReduceOr,
                    "^" | "reduce_xor" => UnaryOp::ReduceXor,
                    other => return Err(SimError::Ir(format!("Unknown unary operator '{}'", other))),
                };
                Expr::Unary {
                    op,
                    operand_mask: mask(self.width_of(operand)),
                    operand: Box::new(self.compile(operand)?),
                    mask: mask(*width),
                }
            }
            ExprDef::BinaryOp { op, left, right, width } => {
                let op = match op.as_str() {
                    "&" => BinaryOp::And,
                    "|" => BinaryOp::Or,
                    "^" => BinaryOp::Xor,
                    "+" => BinaryOp::Add,
                    "-" => BinaryOp::Sub,
                    "*" => BinaryOp::Mul,
                    "/" => BinaryOp::Div,
                    "%" => BinaryOp::Mod,
                    "<<" => BinaryOp::Shl,
                    ">>" => BinaryOp::Shr,
                    "==" => BinaryOp::Eq,
                    "!=" => BinaryOp::Ne,
                    "<" => BinaryOp::Lt,
                    ">" => BinaryOp::Gt,
                    "<=" | "le" => BinaryOp::Le,
                    ">=" => BinaryOp::Ge,
                    other => return Err(SimError::Ir(format!("Unknown binary operator '{}'", other))),
                };
                Expr::Binary {
                    op,
                    left: Box::new(self.compile(left)?),
                    right: Box::new(self.compile(right)?),
                    mask: mask(*width),
                }
            }
            ExprDef::Mux { condition, when_true, when_false, width } => Expr::Mux {
                cond: Box::new(self.compile(condition)?),
                when_true: Box::new(self.compile(when_true)?),
                when_false: Box::new(self.compile(when_false)?),
                mask: mask(*width),
            },
            ExprDef::Slice { base, low, high, width } => {
                if low > high {
                    return Err(SimError::Ir(format!("Slice [{}:{}] is reversed", high, low)));
                }
                let base_width = self.width_of(base);
                if *high >= base_width.min(MAX_WIDTH) {
                    return Err(SimError::Ir(format!(
                        "Slice [{}:{}] is out of range for a {}-bit value",
                        high, low, base_width
                    )));
                }
                if *width != high - low + 1 {
                    return Err(SimError::Ir(format!(
                        "Slice [{}:{}] declared {} bits wide",
                        high, low, width
                    )));
                }
                Expr::Slice { base: Box::new(self.compile(base)?), low: *low, mask: mask(*width) }
            }
            ExprDef::Concat { parts, width } => {
                let total: u64 = parts.iter().map(|p| u64::from(self.width_of(p))).sum();
                if total > u64::from(MAX_WIDTH) {
                    return Err(SimError::Ir(format!(
                        "Concat of {} parts is {} bits wide (limit {})",
                        parts.len(),
                        total,
                        MAX_WIDTH
                    )));
                }
                // Parts are listed most significant first
                let mut compiled = Vec::with_capacity(parts.len());
                for part in parts.iter().rev() {
                    compiled.push((self.compile(part)?, self.width_of(part)));
                }
                Expr::Concat { parts: compiled, mask: mask(*width) }
            }
            ExprDef::Resize { expr, width } => Expr::Resize {
                expr: Box::new(self.compile(expr)?),
                mask: mask(*width),
            },
        })
    }

    /// Declared signal width wins over the width recorded in the expression
    fn width_of(&self, expr: &ExprDef) -> u32 {
        match expr {
            ExprDef::Signal { name, width } => self
                .names
                .get(name)
                .map(|&sig| self.design.width(sig))
                .unwrap_or(*width),
            other => other.width(),
        }
    }
}

// ============================================================================
// Elaboration
// ============================================================================

/// A loaded module: its component and its signals by local name
#[derive(Debug, Clone)]
pub struct IrModule {
    pub comp: ComponentId,
    pub ports: Vec<(String, Direction, SignalId)>,
    pub signals: IndexMap<String, SignalId>,
}

/// Elaborate `json` as a child component of `parent`
pub fn load_module(d: &mut Design, parent: ComponentId, json: &str) -> Result<IrModule> {
    let ir = ModuleIR::from_json(json)?;
    let comp = d.add_child(parent, &ir.name)?;
    let reset = d.reset(comp);

    let mut signals: IndexMap<String, SignalId> = IndexMap::new();
    signals.insert("reset".to_string(), reset);
    let mut ports = Vec::with_capacity(ir.ports.len());
    for port in &ir.ports {
        // The implicit reset stands in for a declared one
        if port.name == "reset" && port.direction == PortDirection::In && port.width == 1 {
            continue;
        }
        let (sig, dir) = match port.direction {
            PortDirection::In => (d.in_port(comp, &port.name, port.width)?, Direction::In),
            PortDirection::Out => (d.out_port(comp, &port.name, port.width)?, Direction::Out),
        };
        signals.insert(port.name.clone(), sig);
        ports.push((port.name.clone(), dir, sig));
    }
    for net in &ir.nets {
        let sig = d.wire(comp, &net.name, net.width)?;
        signals.insert(net.name.clone(), sig);
    }
    let mut reset_values: IndexMap<SignalId, u64> = IndexMap::new();
    for r in &ir.regs {
        let sig = d.wire(comp, &r.name, r.width)?;
        signals.insert(r.name.clone(), sig);
        reset_values.insert(sig, r.reset_value.unwrap_or(0) & mask(r.width));
    }

    // Compile before registering any block
    let (assigns, processes) = {
        let compiler = Compiler { names: &signals, design: &*d };
        let compile_all = |stmts: &[AssignDef]| -> Result<Vec<(SignalId, Expr)>> {
            stmts
                .iter()
                .map(|a| Ok((compiler.resolve(&a.target)?, compiler.compile(&a.expr)?)))
                .collect()
        };
        let assigns = compile_all(&ir.assigns)?;
        let mut processes = Vec::with_capacity(ir.processes.len());
        for p in &ir.processes {
            processes.push((p.name.clone(), p.clocked, compile_all(&p.statements)?));
        }
        (assigns, processes)
    };

    for (i, (target, expr)) in assigns.into_iter().enumerate() {
        let mut reads = Vec::new();
        expr.collect_signals(&mut reads);
        let name = format!("assign{}_{}", i, d.signal(target).name);
        d.comb(comp, &name, &reads, &[target], move |s| {
            let v = expr.eval(s);
            s.write(target, v)
        })?;
    }

    for (name, clocked, stmts) in processes {
        let mut reads = Vec::new();
        for (_, expr) in &stmts {
            expr.collect_signals(&mut reads);
        }
        let writes: Vec<SignalId> = stmts.iter().map(|(t, _)| *t).collect();
        if clocked {
            reads.push(reset);
            let resets: Vec<Option<u64>> = writes.iter().map(|t| reset_values.get(t).copied()).collect();
            d.seq(comp, &name, &reads, &writes, move |s| {
                let in_reset = s.is_set(reset);
                for ((target, expr), reset_value) in stmts.iter().zip(&resets) {
                    let v = match reset_value {
                        Some(rv) if in_reset => *rv,
                        _ => expr.eval(s),
                    };
                    s.write(*target, v);
                }
            })?;
        } else {
            d.comb(comp, &name, &reads, &writes, move |s| {
                for (target, expr) in &stmts {
                    let v = expr.eval(s);
                    s.write(*target, v);
                }
            })?;
        }
    }

    tracing::debug!(
        "loaded IR module {} ({} ports, {} nets, {} regs, {} assigns, {} processes)",
        ir.name,
        ir.ports.len(),
        ir.nets.len(),
        ir.regs.len(),
        ir.assigns.len(),
        ir.processes.len()
    );

    Ok(IrModule { comp, ports, signals })
}

impl Simulator {
    /// Top component wrapping one IR module, with its ports re-exported
    /// under the same names
    pub fn from_ir_json(json: &str, config: SimConfig) -> Result<Self> {
        let mut d = Design::new("top");
        let top = d.top();
        let module = load_module(&mut d, top, json)?;
        for (name, dir, sig) in &module.ports {
            let width = d.width(*sig);
            let port = match dir {
                Direction::In => d.in_port(top, name, width)?,
                Direction::Out => d.out_port(top, name, width)?,
            };
            d.connect(port, *sig)?;
        }
        d.elaborate(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COUNTER: &str = r#"{
        "name": "counter",
        "ports": [
            {"name": "clk", "direction": "in", "width": 1},
            {"name": "reset", "direction": "in", "width": 1},
            {"name": "en", "direction": "in", "width": 1},
            {"name": "count", "direction": "out", "width": 4},
            {"name": "wrapped", "direction": "out", "width": 1}
        ],
        "nets": [],
        "regs": [{"name": "count_reg", "width": 4, "reset_value": 3}],
        "assigns": [
            {"target": "count", "expr": {"type": "signal", "name": "count_reg", "width": 4}},
            {"target": "wrapped", "expr": {"type": "unary_op", "op": "&", "width": 1,
                "operand": {"type": "signal", "name": "count_reg", "width": 4}}}
        ],
        "processes": [{
            "name": "seq_logic",
            "clock": "clk",
            "clocked": true,
            "statements": [{
                "target": "count_reg",
                "expr": {
                    "type": "mux", "width": 4,
                    "condition": {"type": "signal", "name": "en", "width": 1},
                    "when_true": {"type": "binary_op", "op": "+", "width": 4,
                        "left": {"type": "signal", "name": "count_reg", "width": 4},
                        "right": {"type": "literal", "value": 1, "width": 4}},
                    "when_false": {"type": "signal", "name": "count_reg", "width": 4}
                }
            }]
        }]
    }"#;

    #[test]
    fn test_counter_module() {
        let mut sim = Simulator::from_ir_json(COUNTER, SimConfig::default()).unwrap();
        sim.reset().unwrap();
        assert_eq!(sim.peek_by_name("top.count").unwrap().value(), 3);
        sim.poke_by_name("top.en", 1).unwrap();
        sim.run(12).unwrap();
        assert_eq!(sim.peek_by_name("top.count").unwrap().value(), 15);
        assert_eq!(sim.peek_by_name("top.wrapped").unwrap().value(), 1);
        sim.tick().unwrap();
        assert_eq!(sim.peek_by_name("top.count").unwrap().value(), 0);
        sim.poke_by_name("top.en", 0).unwrap();
        sim.run(3).unwrap();
        assert_eq!(sim.peek_by_name("top.count").unwrap().value(), 0);
    }

    #[test]
    fn test_slice_concat_expressions() {
        let json = r#"{
            "name": "swap",
            "ports": [
                {"name": "a", "direction": "in", "width": 8},
                {"name": "y", "direction": "out", "width": 8},
                {"name": "ne", "direction": "out", "width": 1}
            ],
            "assigns": [
                {"target": "y", "expr": {"type": "concat", "width": 8, "parts": [
                    {"type": "slice", "base": {"type": "signal", "name": "a", "width": 8}, "low": 0, "high": 3, "width": 4},
                    {"type": "slice", "base": {"type": "signal", "name": "a", "width": 8}, "low": 4, "high": 7, "width": 4}
                ]}},
                {"target": "ne", "expr": {"type": "binary_op", "op": "!=", "width": 1,
                    "left": {"type": "signal", "name": "a", "width": 8},
                    "right": {"type": "signal", "name": "y", "width": 8}}}
            ]
        }"#;
        let mut sim = Simulator::from_ir_json(json, SimConfig::default()).unwrap();
        sim.poke_by_name("top.a", 0x3c).unwrap();
        sim.eval_combinational().unwrap();
        assert_eq!(sim.peek_by_name("top.y").unwrap().value(), 0xc3);
        assert_eq!(sim.peek_by_name("top.ne").unwrap().value(), 1);
        sim.poke_by_name("top.a", 0x77).unwrap();
        sim.eval_combinational().unwrap();
        assert_eq!(sim.peek_by_name("top.ne").unwrap().value(), 0);
        // The != assign reads y, so it is scheduled after the concat
        assert_eq!(sim.comb_order(), vec!["top.swap.assign0_y", "top.swap.assign1_ne"]);
    }

    #[test]
    fn test_bad_input() {
        assert!(matches!(Simulator::from_ir_json("{", SimConfig::default()), Err(SimError::Ir(_))));
        let unknown = r#"{"name": "m", "ports": [{"name": "y", "direction": "out", "width": 1}],
            "assigns": [{"target": "y", "expr": {"type": "signal", "name": "ghost", "width": 1}}]}"#;
        assert!(matches!(
            Simulator::from_ir_json(unknown, SimConfig::default()),
            Err(SimError::UnknownSignal(name)) if name == "ghost"
        ));
        let bad_op = r#"{"name": "m", "ports": [{"name": "y", "direction": "out", "width": 1}],
            "assigns": [{"target": "y", "expr": {"type": "unary_op", "op": "?", "width": 1,
                "operand": {"type": "literal", "value": 0, "width": 1}}}]}"#;
        assert!(matches!(Simulator::from_ir_json(bad_op, SimConfig::default()), Err(SimError::Ir(_))));
    }

    fn slice_module(low: u32, high: u32, width: u32) -> String {
        format!(
            r#"{{"name": "m",
                "ports": [
                    {{"name": "a", "direction": "in", "width": 8}},
                    {{"name": "y", "direction": "out", "width": 4}}
                ],
                "assigns": [{{"target": "y", "expr": {{"type": "slice", "low": {}, "high": {}, "width": {},
                    "base": {{"type": "signal", "name": "a", "width": 8}}}}}}]}}"#,
            low, high, width
        )
    }

    #[test]
    fn test_slice_bounds() {
        assert!(Simulator::from_ir_json(&slice_module(4, 7, 4), SimConfig::default()).is_ok());
        for (low, high, width) in [(64, 67, 4), (6, 9, 4), (2, 1, 4), (0, 3, 2)] {
            let result = Simulator::from_ir_json(&slice_module(low, high, width), SimConfig::default());
            assert!(matches!(result, Err(SimError::Ir(_))), "[{}:{}] width {}", high, low, width);
        }
    }

    #[test]
    fn test_concat_too_wide() {
        let json = r#"{"name": "m",
            "ports": [
                {"name": "a", "direction": "in", "width": 64},
                {"name": "b", "direction": "in", "width": 8},
                {"name": "y", "direction": "out", "width": 64}
            ],
            "assigns": [{"target": "y", "expr": {"type": "concat", "width": 64, "parts": [
                {"type": "signal", "name": "b", "width": 8},
                {"type": "signal", "name": "a", "width": 64}
            ]}}]}"#;
        match Simulator::from_ir_json(json, SimConfig::default()) {
            Err(SimError::Ir(msg)) => assert!(msg.contains("72 bits"), "{}", msg),
            other => panic!("expected Ir error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_two_assigns_to_one_target() {
        let json = r#"{"name": "m",
            "ports": [{"name": "y", "direction": "out", "width": 1}],
            "assigns": [
                {"target": "y", "expr": {"type": "literal", "value": 0, "width": 1}},
                {"target": "y", "expr": {"type": "literal", "value": 1, "width": 1}}
            ]}"#;
        match Simulator::from_ir_json(json, SimConfig::default()) {
            Err(SimError::MultipleDrivers { drivers, .. }) => {
                assert_eq!(drivers, vec!["top.m.assign0_y", "top.m.assign1_y"]);
            }
            other => panic!("expected MultipleDrivers, got {:?}", other.map(|_| ())),
        }
    }
}
