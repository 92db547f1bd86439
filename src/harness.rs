//! Test harness: val/rdy stream sources and sinks, and test-vector tables
//!
//! Sources and sinks are ordinary components built from update blocks, so
//! they run inside the same simulation as the design under test.

use std::cell::RefCell;
use std::rc::Rc;

use crate::core::Simulator;
use crate::error::{Result, SimError};
use crate::netlist::{ComponentId, Design, SignalId};

const INDEX_WIDTH: u32 = 32;

// ============================================================================
// Stream interface
// ============================================================================

/// Latency-insensitive val/rdy interface; a message moves on an edge where
/// both `val` and `rdy` are high.
#[derive(Debug, Clone, Copy)]
pub struct StreamPorts {
    pub msg: SignalId,
    pub val: SignalId,
    pub rdy: SignalId,
}

impl StreamPorts {
    /// Receiving side: `msg`/`val` in, `rdy` out
    pub fn recv(d: &mut Design, comp: ComponentId, prefix: &str, width: u32) -> Result<Self> {
        Ok(Self {
            msg: d.in_port(comp, &format!("{}_msg", prefix), width)?,
            val: d.in_port(comp, &format!("{}_val", prefix), 1)?,
            rdy: d.out_port(comp, &format!("{}_rdy", prefix), 1)?,
        })
    }

    /// Sending side: `msg`/`val` out, `rdy` in
    pub fn send(d: &mut Design, comp: ComponentId, prefix: &str, width: u32) -> Result<Self> {
        Ok(Self {
            msg: d.out_port(comp, &format!("{}_msg", prefix), width)?,
            val: d.out_port(comp, &format!("{}_val", prefix), 1)?,
            rdy: d.in_port(comp, &format!("{}_rdy", prefix), 1)?,
        })
    }

    pub fn connect(d: &mut Design, a: &StreamPorts, b: &StreamPorts) -> Result<()> {
        d.connect(a.msg, b.msg)?;
        d.connect(a.val, b.val)?;
        d.connect(a.rdy, b.rdy)
    }

    pub fn fire(&self, sim: &Simulator) -> bool {
        !sim.peek(self.val).is_zero() && !sim.peek(self.rdy).is_zero()
    }
}

// ============================================================================
// Source
// ============================================================================

#[derive(Debug, Clone)]
pub struct TestSource {
    pub comp: ComponentId,
    pub send: StreamPorts,
    idx: SignalId,
    len: usize,
}

impl TestSource {
    /// Sends `msgs` in order, waiting `initial_delay` cycles after reset and
    /// `interval_delay` cycles between messages
    pub fn new(
        d: &mut Design,
        parent: ComponentId,
        name: &str,
        width: u32,
        msgs: Vec<u64>,
        initial_delay: u32,
        interval_delay: u32,
    ) -> Result<Self> {
        let comp = d.add_child(parent, name)?;
        let send = StreamPorts::send(d, comp, "send", width)?;
        let idx = d.wire(comp, "idx", INDEX_WIDTH)?;
        let count = d.wire(comp, "count", INDEX_WIDTH)?;
        let reset = d.reset(comp);
        let len = msgs.len();

        d.seq(comp, "up_src", &[reset, send.val, send.rdy, idx, count], &[idx, count], move |s| {
            if s.is_set(reset) {
                s.write(idx, 0);
                s.write(count, initial_delay as u64);
            } else if s.is_set(send.val) && s.is_set(send.rdy) {
                let next = s.get(idx) + 1;
                s.write(idx, next);
                s.write(count, interval_delay as u64);
            } else {
                let c = s.get(count);
                if c > 0 {
                    s.write(count, c - 1);
                }
            }
        })?;

        d.comb(comp, "up_src_out", &[idx, count], &[send.val, send.msg], move |s| {
            let i = s.get(idx) as usize;
            let valid = i < msgs.len() && s.get(count) == 0;
            s.write(send.val, valid as u64);
            s.write(send.msg, if valid { msgs[i] } else { 0 });
        })?;

        Ok(Self { comp, send, idx, len })
    }

    /// Every message has been sent
    pub fn done(&self, sim: &Simulator) -> bool {
        sim.peek(self.idx).value() as usize >= self.len
    }
}

// ============================================================================
// Sink
// ============================================================================

#[derive(Debug, Default)]
struct SinkLog {
    received: usize,
    matched: usize,
    first_mismatch: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TestSink {
    pub comp: ComponentId,
    pub recv: StreamPorts,
    name: String,
    idx: SignalId,
    len: usize,
    log: Rc<RefCell<SinkLog>>,
}

impl TestSink {
    /// Accepts messages after `initial_delay` cycles and then every
    /// `interval_delay` cycles, comparing each against `expected` in order
    pub fn new(
        d: &mut Design,
        parent: ComponentId,
        name: &str,
        width: u32,
        expected: Vec<u64>,
        initial_delay: u32,
        interval_delay: u32,
    ) -> Result<Self> {
        let comp = d.add_child(parent, name)?;
        let recv = StreamPorts::recv(d, comp, "recv", width)?;
        let idx = d.wire(comp, "idx", INDEX_WIDTH)?;
        let count = d.wire(comp, "count", INDEX_WIDTH)?;
        let reset = d.reset(comp);
        let len = expected.len();
        let log = Rc::new(RefCell::new(SinkLog::default()));
        let full_name = d.component_name(comp);

        let sink_log = log.clone();
        let sink_name = full_name.clone();
        d.seq(
            comp,
            "up_sink",
            &[reset, recv.val, recv.rdy, recv.msg, idx, count],
            &[idx, count],
            move |s| {
                if s.is_set(reset) {
                    s.write(idx, 0);
                    s.write(count, initial_delay as u64);
                    *sink_log.borrow_mut() = SinkLog::default();
                } else if s.is_set(recv.val) && s.is_set(recv.rdy) {
                    let i = s.get(idx) as usize;
                    let got = s.read(recv.msg);
                    let mut log = sink_log.borrow_mut();
                    log.received += 1;
                    match expected.get(i) {
                        Some(&exp) if got == exp => log.matched += 1,
                        other => {
                            if log.first_mismatch.is_none() {
                                let exp = other.map_or_else(|| "nothing".to_string(), |e| format!("{:x}", e));
                                log.first_mismatch =
                                    Some(format!("{} message {}: expected {}, got {}", sink_name, i, exp, got));
                            }
                        }
                    }
                    s.write(idx, i as u64 + 1);
                    s.write(count, interval_delay as u64);
                } else {
                    let c = s.get(count);
                    if c > 0 {
                        s.write(count, c - 1);
                    }
                }
            },
        )?;

        d.comb(comp, "up_sink_rdy", &[idx, count], &[recv.rdy], move |s| {
            let ready = (s.get(idx) as usize) < len && s.get(count) == 0;
            s.write(recv.rdy, ready as u64)
        })?;

        Ok(Self { comp, recv, name: full_name, idx, len, log })
    }

    /// Every expected message has arrived
    pub fn done(&self, sim: &Simulator) -> bool {
        sim.peek(self.idx).value() as usize >= self.len
    }

    pub fn received(&self) -> usize {
        self.log.borrow().received
    }

    /// First mismatch seen, as a test failure
    pub fn check(&self) -> Result<()> {
        match &self.log.borrow().first_mismatch {
            Some(msg) => Err(SimError::TestFailure(msg.clone())),
            None => Ok(()),
        }
    }

    pub fn summary(&self) -> String {
        let log = self.log.borrow();
        format!("{}: expected={}, received={}, matched={}", self.name, self.len, log.received, log.matched)
    }
}

/// Reset, then tick until every sink is done. Fails on the first sink
/// mismatch or after `max_cycles`. Returns the cycle count.
pub fn run_sim(sim: &mut Simulator, sinks: &[TestSink], max_cycles: u64) -> Result<u64> {
    sim.reset()?;
    while !sinks.iter().all(|s| s.done(sim)) {
        if sim.cycle() >= max_cycles {
            return Err(SimError::TestFailure(format!("timeout after {} cycles", max_cycles)));
        }
        sim.tick()?;
        for sink in sinks {
            sink.check()?;
        }
    }
    for sink in sinks {
        tracing::debug!("{}", sink.summary());
    }
    Ok(sim.cycle())
}

// ============================================================================
// Test vectors
// ============================================================================

/// Port table for cycle-by-cycle test vectors
///
/// The header lists top-level port names; outputs are marked with a
/// trailing `*`, e.g. `"in_ out*"`.
#[derive(Debug, Clone)]
pub struct TestVectorTable {
    inputs: Vec<SignalId>,
    outputs: Vec<SignalId>,
    columns: Vec<(bool, usize)>,
    rows: Vec<Vec<Option<u64>>>,
}

impl TestVectorTable {
    pub fn new(sim: &Simulator, header: &str) -> Result<Self> {
        let top = sim.top_name().to_string();
        let mut inputs = Vec::new();
        let mut outputs = Vec::new();
        let mut columns = Vec::new();
        for name in header.split_whitespace() {
            match name.strip_suffix('*') {
                Some(out) => {
                    columns.push((false, outputs.len()));
                    outputs.push(sim.signal_id(&format!("{}.{}", top, out))?);
                }
                None => {
                    columns.push((true, inputs.len()));
                    inputs.push(sim.signal_id(&format!("{}.{}", top, name))?);
                }
            }
        }
        Ok(Self { inputs, outputs, columns, rows: Vec::new() })
    }

    /// One row in header order; `None` is a don't-care output or a held input
    pub fn row(&mut self, values: &[Option<u64>]) -> Result<()> {
        if values.len() != self.columns.len() {
            return Err(SimError::TestFailure(format!(
                "row has {} values, header has {} columns",
                values.len(),
                self.columns.len()
            )));
        }
        self.rows.push(values.to_vec());
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Reset, then for every row: poke inputs, settle, check outputs, tick
pub fn run_test_vector_sim(sim: &mut Simulator, table: &TestVectorTable) -> Result<()> {
    sim.reset()?;
    for (n, row) in table.rows.iter().enumerate() {
        for (&(is_input, i), value) in table.columns.iter().zip(row) {
            if let (true, Some(v)) = (is_input, value) {
                sim.poke(table.inputs[i], *v)?;
            }
        }
        sim.eval_combinational()?;
        tracing::debug!("{}", sim.line_trace());

        for (&(is_input, i), value) in table.columns.iter().zip(row) {
            if let (false, Some(expected)) = (is_input, value) {
                let sig = table.outputs[i];
                let got = sim.peek(sig);
                if got != *expected {
                    return Err(SimError::TestFailure(format!(
                        "row {}: {} expected {:x}, got {}",
                        n,
                        sim.signal_name(sig),
                        expected,
                        got
                    )));
                }
            }
        }
        sim.tick()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimConfig;

    /// Source wired straight into a sink
    fn loopback(msgs: Vec<u64>, expected: Vec<u64>, delays: (u32, u32, u32, u32)) -> (Simulator, TestSource, TestSink) {
        let mut d = Design::new("top");
        let top = d.top();
        let src = TestSource::new(&mut d, top, "src", 16, msgs, delays.0, delays.1).unwrap();
        let sink = TestSink::new(&mut d, top, "sink", 16, expected, delays.2, delays.3).unwrap();
        StreamPorts::connect(&mut d, &src.send, &sink.recv).unwrap();
        (d.elaborate(SimConfig::default()).unwrap(), src, sink)
    }

    #[test]
    fn test_source_to_sink() {
        let msgs = vec![1, 2, 3, 4];
        let (mut sim, src, sink) = loopback(msgs.clone(), msgs, (0, 0, 0, 0));
        let cycles = run_sim(&mut sim, std::slice::from_ref(&sink), 100).unwrap();
        assert!(src.done(&sim));
        assert_eq!(sink.received(), 4);
        assert_eq!(cycles, 4);
    }

    #[test]
    fn test_delays_stretch_the_run() {
        let msgs = vec![1, 2, 3, 4];
        let (mut fast, _, fast_sink) = loopback(msgs.clone(), msgs.clone(), (0, 0, 0, 0));
        let (mut slow, _, slow_sink) = loopback(msgs.clone(), msgs, (3, 2, 1, 3));
        let fast_cycles = run_sim(&mut fast, std::slice::from_ref(&fast_sink), 100).unwrap();
        let slow_cycles = run_sim(&mut slow, std::slice::from_ref(&slow_sink), 100).unwrap();
        assert!(slow_cycles > fast_cycles);
        assert_eq!(slow_sink.received(), 4);
    }

    #[test]
    fn test_sink_reports_mismatch() {
        let (mut sim, _, sink) = loopback(vec![1, 2], vec![1, 5], (0, 0, 0, 0));
        match run_sim(&mut sim, std::slice::from_ref(&sink), 100) {
            Err(SimError::TestFailure(msg)) => assert!(msg.contains("message 1"), "{}", msg),
            other => panic!("expected TestFailure, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_timeout() {
        // The sink expects more than the source will send
        let (mut sim, _, sink) = loopback(vec![1], vec![1, 2], (0, 0, 0, 0));
        assert!(matches!(
            run_sim(&mut sim, std::slice::from_ref(&sink), 20),
            Err(SimError::TestFailure(_))
        ));
    }

    #[test]
    fn test_vector_table() {
        let mut d = Design::new("top");
        let top = d.top();
        let a = d.in_port(top, "a", 8).unwrap();
        let b = d.out_port(top, "b", 8).unwrap();
        d.comb(top, "inv", &[a], &[b], move |s| {
            let v = !s.get(a);
            s.write(b, v)
        })
        .unwrap();
        let mut sim = d.elaborate(SimConfig::default()).unwrap();

        let mut table = TestVectorTable::new(&sim, "a b*").unwrap();
        table.row(&[Some(0x00), Some(0xff)]).unwrap();
        table.row(&[Some(0x0f), None]).unwrap();
        table.row(&[Some(0xf0), Some(0x0f)]).unwrap();
        assert_eq!(table.len(), 3);
        run_test_vector_sim(&mut sim, &table).unwrap();

        table.row(&[Some(0x01), Some(0x00)]).unwrap();
        assert!(matches!(run_test_vector_sim(&mut sim, &table), Err(SimError::TestFailure(_))));
        assert!(table.row(&[Some(1)]).is_err());
        assert!(TestVectorTable::new(&sim, "a nope*").is_err());
    }
}
