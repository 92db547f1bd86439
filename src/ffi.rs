//! C ABI function exports
//!
//! A simulator built from a JSON module description behind an opaque
//! pointer. Signal names may be given in full (`top.count`) or relative to
//! the top component (`count`).

use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int, c_ulong, c_ulonglong};
use std::ptr;
use std::slice;

use crate::config::SimConfig;
use crate::core::Simulator;
use crate::error::Result;
use crate::netlist::SignalId;

// ============================================================================
// Simulator Context
// ============================================================================

/// Opaque simulator context passed to all FFI functions
pub struct RtlSimContext {
    pub sim: Simulator,
}

impl RtlSimContext {
    pub fn new(json: &str) -> Result<Self> {
        let sim = Simulator::from_ir_json(json, SimConfig::default())?;
        Ok(Self { sim })
    }

    fn resolve(&self, name: &str) -> Result<SignalId> {
        self.sim
            .signal_id(name)
            .or_else(|_| self.sim.signal_id(&format!("{}.{}", self.sim.top_name(), name)))
    }
}

fn into_c_string(s: String) -> *mut c_char {
    // Interior NULs cannot cross the boundary
    let s = s.replace('\0', " ");
    match CString::new(s) {
        Ok(c) => c.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

unsafe fn write_error(error_out: *mut *mut c_char, msg: String) {
    if !error_out.is_null() {
        *error_out = into_c_string(msg);
    }
}

unsafe fn name_arg<'a>(name: *const c_char) -> Option<&'a str> {
    if name.is_null() {
        return None;
    }
    CStr::from_ptr(name).to_str().ok()
}

// ============================================================================
// Core FFI Functions
// ============================================================================

/// Create a new simulator from JSON
/// Returns null on error, error message written to error_out if provided
#[no_mangle]
pub unsafe extern "C" fn rtl_sim_create(
    json: *const c_char,
    json_len: usize,
    error_out: *mut *mut c_char,
) -> *mut RtlSimContext {
    if json.is_null() {
        write_error(error_out, "Null JSON pointer".to_string());
        return ptr::null_mut();
    }
    let json_slice = slice::from_raw_parts(json as *const u8, json_len);
    let json_str = match std::str::from_utf8(json_slice) {
        Ok(s) => s,
        Err(e) => {
            write_error(error_out, format!("Invalid UTF-8 in JSON: {}", e));
            return ptr::null_mut();
        }
    };

    match RtlSimContext::new(json_str) {
        Ok(ctx) => Box::into_raw(Box::new(ctx)),
        Err(e) => {
            write_error(error_out, e.to_string());
            ptr::null_mut()
        }
    }
}

/// Destroy a simulator
#[no_mangle]
pub unsafe extern "C" fn rtl_sim_destroy(ctx: *mut RtlSimContext) {
    if !ctx.is_null() {
        drop(Box::from_raw(ctx));
    }
}

/// Free a string returned by rtl_sim functions (errors and line traces)
#[no_mangle]
pub unsafe extern "C" fn rtl_sim_free_string(s: *mut c_char) {
    if !s.is_null() {
        drop(CString::from_raw(s));
    }
}

/// Poke a signal value
/// Returns 0 on success, -1 on error (unknown or driven signal)
#[no_mangle]
pub unsafe extern "C" fn rtl_sim_poke(
    ctx: *mut RtlSimContext,
    name: *const c_char,
    value: c_ulong,
) -> c_int {
    if ctx.is_null() {
        return -1;
    }
    let ctx = &mut *ctx;
    let Some(name) = name_arg(name) else {
        return -1;
    };
    let result = ctx.resolve(name).and_then(|sig| ctx.sim.poke(sig, value as u64));
    match result {
        Ok(()) => 0,
        Err(e) => {
            tracing::warn!("rtl_sim_poke({}): {}", name, e);
            -1
        }
    }
}

/// Peek a signal value into `value_out`
/// Returns 0 on success, -1 on error (unknown signal)
#[no_mangle]
pub unsafe extern "C" fn rtl_sim_peek(
    ctx: *const RtlSimContext,
    name: *const c_char,
    value_out: *mut c_ulonglong,
) -> c_int {
    if ctx.is_null() || value_out.is_null() {
        return -1;
    }
    let ctx = &*ctx;
    let Some(name) = name_arg(name) else {
        return -1;
    };
    match ctx.resolve(name).and_then(|sig| ctx.sim.try_peek(sig)) {
        Ok(bits) => {
            *value_out = bits.value() as c_ulonglong;
            0
        }
        Err(_) => -1,
    }
}

/// Settle combinational logic
#[no_mangle]
pub unsafe extern "C" fn rtl_sim_eval(ctx: *mut RtlSimContext) -> c_int {
    if ctx.is_null() {
        return -1;
    }
    status((*ctx).sim.eval_combinational())
}

/// One clock edge
#[no_mangle]
pub unsafe extern "C" fn rtl_sim_tick(ctx: *mut RtlSimContext) -> c_int {
    if ctx.is_null() {
        return -1;
    }
    status((*ctx).sim.tick())
}

/// `n` clock edges
#[no_mangle]
pub unsafe extern "C" fn rtl_sim_run(ctx: *mut RtlSimContext, n: c_ulong) -> c_int {
    if ctx.is_null() {
        return -1;
    }
    status((*ctx).sim.run(n as u64))
}

/// Pulse reset and zero the cycle counter
#[no_mangle]
pub unsafe extern "C" fn rtl_sim_reset(ctx: *mut RtlSimContext) -> c_int {
    if ctx.is_null() {
        return -1;
    }
    status((*ctx).sim.reset())
}

/// Cycles since the last reset
#[no_mangle]
pub unsafe extern "C" fn rtl_sim_cycle(ctx: *const RtlSimContext) -> c_ulonglong {
    if ctx.is_null() {
        return 0;
    }
    (*ctx).sim.cycle() as c_ulonglong
}

/// Current line trace; release with rtl_sim_free_string
#[no_mangle]
pub unsafe extern "C" fn rtl_sim_line_trace(ctx: *const RtlSimContext) -> *mut c_char {
    if ctx.is_null() {
        return ptr::null_mut();
    }
    into_c_string((*ctx).sim.line_trace())
}

fn status(result: Result<()>) -> c_int {
    match result {
        Ok(()) => 0,
        Err(e) => {
            tracing::error!("{}", e);
            -1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PASSTHRU: &str = r#"{
        "name": "passthru",
        "ports": [
            {"name": "a", "direction": "in", "width": 8},
            {"name": "q", "direction": "out", "width": 8}
        ],
        "regs": [{"name": "q_reg", "width": 8, "reset_value": 0}],
        "assigns": [{"target": "q", "expr": {"type": "signal", "name": "q_reg", "width": 8}}],
        "processes": [{"name": "seq", "clocked": true, "statements": [
            {"target": "q_reg", "expr": {"type": "signal", "name": "a", "width": 8}}
        ]}]
    }"#;

    fn create(json: &str) -> (*mut RtlSimContext, *mut c_char) {
        let mut err: *mut c_char = ptr::null_mut();
        let ctx = unsafe { rtl_sim_create(json.as_ptr() as *const c_char, json.len(), &mut err) };
        (ctx, err)
    }

    #[test]
    fn test_round_trip_through_c_abi() {
        let (ctx, err) = create(PASSTHRU);
        assert!(!ctx.is_null());
        assert!(err.is_null());
        unsafe {
            assert_eq!(rtl_sim_reset(ctx), 0);
            let a = CString::new("a").unwrap();
            let q = CString::new("top.q").unwrap();
            assert_eq!(rtl_sim_poke(ctx, a.as_ptr(), 0x1ab), 0);
            assert_eq!(rtl_sim_tick(ctx), 0);
            let mut value: c_ulonglong = 0;
            assert_eq!(rtl_sim_peek(ctx, q.as_ptr(), &mut value), 0);
            assert_eq!(value, 0xab);
            assert_eq!(rtl_sim_run(ctx, 4), 0);
            assert_eq!(rtl_sim_cycle(ctx), 5);

            // q is driven by the module
            assert_eq!(rtl_sim_poke(ctx, q.as_ptr(), 1), -1);
            let ghost = CString::new("ghost").unwrap();
            assert_eq!(rtl_sim_peek(ctx, ghost.as_ptr(), &mut value), -1);

            let trace = rtl_sim_line_trace(ctx);
            assert!(!trace.is_null());
            assert_eq!(CStr::from_ptr(trace).to_str().unwrap(), "  5: ");
            rtl_sim_free_string(trace);
            rtl_sim_destroy(ctx);
        }
    }

    #[test]
    fn test_create_error() {
        let (ctx, err) = create("{\"name\": ");
        assert!(ctx.is_null());
        assert!(!err.is_null());
        unsafe {
            let msg = CStr::from_ptr(err).to_str().unwrap().to_string();
            assert!(msg.contains("Failed to parse IR JSON"), "{}", msg);
            rtl_sim_free_string(err);
        }
    }

    #[test]
    fn test_null_context() {
        unsafe {
            assert_eq!(rtl_sim_tick(ptr::null_mut()), -1);
            assert_eq!(rtl_sim_cycle(ptr::null()), 0);
            assert!(rtl_sim_line_trace(ptr::null()).is_null());
            rtl_sim_destroy(ptr::null_mut());
        }
    }
}
