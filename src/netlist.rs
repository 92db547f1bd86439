//! Structural description: components, signals, connections and update blocks
//!
//! A [`Design`] is built by structural composition calls and then frozen into
//! a [`Simulator`] by [`Design::elaborate`]. Connected signals collapse into a
//! single net (union-find over the connection list); the net is what update
//! blocks actually read and write.

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;
use petgraph::unionfind::UnionFind;

use crate::bits::{check_width, mask};
use crate::block::{BlockCtx, BlockDef, BlockKind, CompiledBlock};
use crate::config::SimConfig;
use crate::core::Simulator;
use crate::error::{Result, SimError};

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub(crate) usize);

        impl $name {
            #[inline(always)]
            pub fn index(self) -> usize {
                self.0
            }
        }
    };
}

id_type!(
    /// Component in the design tree
    ComponentId
);
id_type!(
    /// Declared signal (port or wire)
    SignalId
);
id_type!(
    /// Declared update block
    BlockId
);
id_type!(
    /// Equivalence class of connected signals
    NetId
);

/// Port direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Port(Direction),
    Wire,
}

#[derive(Debug, Clone)]
pub struct SignalDef {
    pub name: String,
    pub width: u32,
    pub owner: ComponentId,
    pub kind: SignalKind,
}

#[derive(Debug, Clone)]
pub struct ComponentDef {
    pub name: String,
    pub parent: Option<ComponentId>,
    pub children: IndexMap<String, ComponentId>,
    pub signals: IndexMap<String, SignalId>,
    pub blocks: IndexMap<String, BlockId>,
    pub reset: SignalId,
}

impl ComponentDef {
    fn has_name(&self, name: &str) -> bool {
        self.children.contains_key(name)
            || self.signals.contains_key(name)
            || self.blocks.contains_key(name)
    }
}

// ============================================================================
// Design - the mutable structural description
// ============================================================================

pub struct Design {
    components: Vec<ComponentDef>,
    signals: Vec<SignalDef>,
    blocks: Vec<BlockDef>,
    connections: Vec<(SignalId, SignalId)>,
}

impl Design {
    /// New design whose root component is named `top_name`
    pub fn new(top_name: &str) -> Self {
        let mut design = Self {
            components: Vec::new(),
            signals: Vec::new(),
            blocks: Vec::new(),
            connections: Vec::new(),
        };
        design.push_component(top_name, None);
        design
    }

    fn push_component(&mut self, name: &str, parent: Option<ComponentId>) -> ComponentId {
        let id = ComponentId(self.components.len());
        let reset = SignalId(self.signals.len());
        self.signals.push(SignalDef {
            name: "reset".to_string(),
            width: 1,
            owner: id,
            kind: SignalKind::Port(Direction::In),
        });
        let mut signals = IndexMap::new();
        signals.insert("reset".to_string(), reset);
        self.components.push(ComponentDef {
            name: name.to_string(),
            parent,
            children: IndexMap::new(),
            signals,
            blocks: IndexMap::new(),
            reset,
        });
        id
    }

    pub fn top(&self) -> ComponentId {
        ComponentId(0)
    }

    pub fn component(&self, comp: ComponentId) -> &ComponentDef {
        &self.components[comp.0]
    }

    pub fn signal(&self, sig: SignalId) -> &SignalDef {
        &self.signals[sig.0]
    }

    pub fn width(&self, sig: SignalId) -> u32 {
        self.signals[sig.0].width
    }

    /// Implicit reset input of a component
    pub fn reset(&self, comp: ComponentId) -> SignalId {
        self.components[comp.0].reset
    }

    fn check_free_name(&self, comp: ComponentId, name: &str) -> Result<()> {
        if self.components[comp.0].has_name(name) {
            return Err(SimError::DuplicateName {
                scope: self.component_name(comp),
                name: name.to_string(),
            });
        }
        Ok(())
    }

    /// Add a child component; its reset follows the parent's
    pub fn add_child(&mut self, parent: ComponentId, name: &str) -> Result<ComponentId> {
        self.check_free_name(parent, name)?;
        let id = self.push_component(name, Some(parent));
        self.components[parent.0].children.insert(name.to_string(), id);
        let (parent_reset, child_reset) = (self.reset(parent), self.reset(id));
        self.connections.push((parent_reset, child_reset));
        Ok(id)
    }

    fn add_signal(&mut self, comp: ComponentId, name: &str, width: u32, kind: SignalKind) -> Result<SignalId> {
        check_width(name, width)?;
        self.check_free_name(comp, name)?;
        let id = SignalId(self.signals.len());
        self.signals.push(SignalDef { name: name.to_string(), width, owner: comp, kind });
        self.components[comp.0].signals.insert(name.to_string(), id);
        Ok(id)
    }

    pub fn in_port(&mut self, comp: ComponentId, name: &str, width: u32) -> Result<SignalId> {
        self.add_signal(comp, name, width, SignalKind::Port(Direction::In))
    }

    pub fn out_port(&mut self, comp: ComponentId, name: &str, width: u32) -> Result<SignalId> {
        self.add_signal(comp, name, width, SignalKind::Port(Direction::Out))
    }

    pub fn wire(&mut self, comp: ComponentId, name: &str, width: u32) -> Result<SignalId> {
        self.add_signal(comp, name, width, SignalKind::Wire)
    }

    /// Alias two signals into one net
    pub fn connect(&mut self, a: SignalId, b: SignalId) -> Result<()> {
        let (wa, wb) = (self.width(a), self.width(b));
        if wa != wb {
            return Err(SimError::WidthMismatch {
                lhs: self.full_name(a),
                lhs_width: wa,
                rhs: self.full_name(b),
                rhs_width: wb,
            });
        }
        self.connections.push((a, b));
        Ok(())
    }

    /// Tie a signal to a constant
    pub fn connect_const(&mut self, sig: SignalId, value: u64) -> Result<BlockId> {
        let owner = self.signals[sig.0].owner;
        let name = format!("tie_{}", self.signals[sig.0].name);
        let value = value & mask(self.width(sig));
        self.comb(owner, &name, &[], &[sig], move |s| s.write(sig, value))
    }

    fn add_block<F>(
        &mut self,
        comp: ComponentId,
        name: &str,
        kind: BlockKind,
        reads: &[SignalId],
        writes: &[SignalId],
        f: F,
    ) -> Result<BlockId>
    where
        F: FnMut(&mut BlockCtx<'_>) + 'static,
    {
        self.check_free_name(comp, name)?;
        let id = BlockId(self.blocks.len());
        self.blocks.push(BlockDef {
            name: name.to_string(),
            owner: comp,
            kind,
            reads: reads.to_vec(),
            writes: writes.to_vec(),
            func: Box::new(f),
        });
        self.components[comp.0].blocks.insert(name.to_string(), id);
        Ok(id)
    }

    /// Register a combinational update block
    pub fn comb<F>(&mut self, comp: ComponentId, name: &str, reads: &[SignalId], writes: &[SignalId], f: F) -> Result<BlockId>
    where
        F: FnMut(&mut BlockCtx<'_>) + 'static,
    {
        self.add_block(comp, name, BlockKind::Comb, reads, writes, f)
    }

    /// Register a clocked update block
    pub fn seq<F>(&mut self, comp: ComponentId, name: &str, reads: &[SignalId], writes: &[SignalId], f: F) -> Result<BlockId>
    where
        F: FnMut(&mut BlockCtx<'_>) + 'static,
    {
        self.add_block(comp, name, BlockKind::Seq, reads, writes, f)
    }

    pub fn component_name(&self, comp: ComponentId) -> String {
        let mut parts = Vec::new();
        let mut cur = Some(comp);
        while let Some(c) = cur {
            parts.push(self.components[c.0].name.as_str());
            cur = self.components[c.0].parent;
        }
        parts.reverse();
        parts.join(".")
    }

    pub fn full_name(&self, sig: SignalId) -> String {
        let def = &self.signals[sig.0];
        format!("{}.{}", self.component_name(def.owner), def.name)
    }

    fn block_name(&self, block: BlockId) -> String {
        let def = &self.blocks[block.0];
        format!("{}.{}", self.component_name(def.owner), def.name)
    }

    /// Look up a signal by hierarchical name, e.g. `top.dpath.a_reg.out`
    pub fn find_signal(&self, path: &str) -> Option<SignalId> {
        let mut parts = path.split('.');
        if parts.next()? != self.components[0].name {
            return None;
        }
        let segments: Vec<&str> = parts.collect();
        let (last, prefix) = segments.split_last()?;
        let mut comp = self.top();
        for seg in prefix {
            comp = *self.components[comp.0].children.get(*seg)?;
        }
        self.components[comp.0].signals.get(*last).copied()
    }

    pub fn elaborate(self, config: SimConfig) -> Result<Simulator> {
        Simulator::new(self, config)
    }

    // ========================================================================
    // Flattening
    // ========================================================================

    /// Resolve connections into nets and check drivers
    pub(crate) fn flatten(self, config: &SimConfig) -> Result<Flattened> {
        let n = self.signals.len();
        let mut sets: UnionFind<usize> = UnionFind::new(n);
        for &(a, b) in &self.connections {
            sets.union(a.0, b.0);
        }

        // Dense net numbering in signal declaration order; the first signal
        // of each class names the net.
        let mut root_to_net: HashMap<usize, NetId> = HashMap::new();
        let mut signal_net = Vec::with_capacity(n);
        let mut net_names = Vec::new();
        let mut net_widths = Vec::new();
        for (i, sig) in self.signals.iter().enumerate() {
            let root = sets.find(i);
            let net = *root_to_net.entry(root).or_insert_with(|| {
                net_names.push(self.full_name(SignalId(i)));
                net_widths.push(sig.width);
                NetId(net_widths.len() - 1)
            });
            signal_net.push(net);
        }
        let net_count = net_widths.len();

        // Nets holding a top-level port are driven from outside
        let top = self.top();
        let mut external: HashSet<NetId> = HashSet::new();
        let mut external_inputs: HashSet<NetId> = HashSet::new();
        for (i, sig) in self.signals.iter().enumerate() {
            if sig.owner == top {
                if let SignalKind::Port(dir) = sig.kind {
                    external.insert(signal_net[i]);
                    if dir == Direction::In {
                        external_inputs.insert(signal_net[i]);
                    }
                }
            }
        }

        let mut net_drivers: Vec<Vec<String>> = vec![Vec::new(); net_count];
        for i in 0..self.blocks.len() {
            let name = self.block_name(BlockId(i));
            let mut seen = HashSet::new();
            for w in &self.blocks[i].writes {
                let net = signal_net[w.0];
                if seen.insert(net) {
                    net_drivers[net.0].push(name.clone());
                }
            }
        }
        for (net, drivers) in net_drivers.iter().enumerate() {
            let driven_outside = external_inputs.contains(&NetId(net));
            if drivers.len() > 1 || (driven_outside && !drivers.is_empty()) {
                let mut drivers = drivers.clone();
                if driven_outside {
                    drivers.insert(0, "<top-level input>".to_string());
                }
                return Err(SimError::MultipleDrivers { net: net_names[net].clone(), drivers });
            }
        }

        for (i, sig) in self.signals.iter().enumerate() {
            let net = signal_net[i];
            let is_child_input = sig.owner != top && sig.kind == SignalKind::Port(Direction::In);
            if is_child_input && net_drivers[net.0].is_empty() && !external.contains(&net) {
                let name = self.full_name(SignalId(i));
                if config.strict_undriven {
                    return Err(SimError::Undriven(name));
                }
                tracing::warn!("input port {} is not driven, it will read as zero", name);
            }
        }

        let signal_names: Vec<String> = (0..n).map(|i| self.full_name(SignalId(i))).collect();
        let block_names: Vec<String> = (0..self.blocks.len()).map(|i| self.block_name(BlockId(i))).collect();
        let signal_widths: Vec<u32> = self.signals.iter().map(|s| s.width).collect();
        let top_reset = signal_net[self.reset(top).0];
        let driven: Vec<bool> = net_drivers.iter().map(|d| !d.is_empty()).collect();

        let mut name_to_signal = IndexMap::with_capacity(n);
        for (i, name) in signal_names.iter().enumerate() {
            name_to_signal.insert(name.clone(), SignalId(i));
        }

        let blocks = self
            .blocks
            .into_iter()
            .zip(block_names)
            .map(|(def, name)| {
                let resolve = |sigs: &[SignalId]| {
                    let mut nets: Vec<NetId> = sigs.iter().map(|s| signal_net[s.0]).collect();
                    nets.sort();
                    nets.dedup();
                    nets
                };
                CompiledBlock {
                    reads: resolve(&def.reads),
                    writes: resolve(&def.writes),
                    name,
                    kind: def.kind,
                    func: def.func,
                }
            })
            .collect();

        Ok(Flattened {
            signal_names,
            signal_widths,
            signal_net,
            name_to_signal,
            net_names,
            net_widths,
            driven,
            blocks,
            top_reset,
        })
    }
}

/// Netlist after connection resolution, consumed by the simulator
pub(crate) struct Flattened {
    pub signal_names: Vec<String>,
    pub signal_widths: Vec<u32>,
    pub signal_net: Vec<NetId>,
    pub name_to_signal: IndexMap<String, SignalId>,
    pub net_names: Vec<String>,
    pub net_widths: Vec<u32>,
    pub driven: Vec<bool>,
    pub blocks: Vec<CompiledBlock>,
    pub top_reset: NetId,
}
