//! Per-hook enter/leave handlers.
//!
//! Everything here runs on the traced thread inside the interceptor's
//! trampoline: no locks, no allocation, bounded work. Failures turn into
//! counters, never into control flow the target could observe.
//!
//! Sequence pairing happens here, on the producing thread: `index_seq`
//! counts every accepted index event, `detail_seq` every reserved detail
//! record, and the two records cross-reference each other by those ordinals
//! before either enters a ring.

use crate::session::AgentSession;
use crate::stack_capture::{capture_stack, StackBounds};
use crate::tls::{current_thread_id, STATE};
use ada_trace::{
    detail_flags, DetailEventHeader, DetailEventType, EventKind, IndexEvent,
    DETAIL_HEADER_SIZE, INDEX_EVENT_SIZE, MAX_STACK_CAPTURE_BYTES, NO_DETAIL,
};
use std::sync::atomic::Ordering;

/// Largest detail record the hot path ever builds: header, eight argument
/// registers, maximum stack window.
const MAX_DETAIL_RECORD: usize = DETAIL_HEADER_SIZE + 8 * 8 + MAX_STACK_CAPTURE_BYTES as usize;

/// Everything the interceptor knows at a hook site.
#[derive(Debug, Clone, Copy)]
pub struct HookContext<'a> {
    /// Stable function id baked in at planning time.
    pub function_id: u64,
    /// Symbol name, for marking-policy evaluation.
    pub symbol: &'a str,
    /// ABI argument registers at entry.
    pub arg_regs: [u64; 8],
    /// Return-value registers at exit.
    pub ret_regs: [u64; 2],
    /// Declared stack geometry, when the interceptor could resolve it.
    pub stack: Option<StackBounds>,
    /// Whether this function's window policy asks for detail capture.
    pub capture_detail: bool,
}

impl<'a> HookContext<'a> {
    /// Context with no registers, no stack, no detail.
    pub fn new(function_id: u64, symbol: &'a str) -> Self {
        Self {
            function_id,
            symbol,
            arg_regs: [0; 8],
            ret_regs: [0; 2],
            stack: None,
            capture_detail: false,
        }
    }
}

impl AgentSession {
    /// Function-entry handler.
    #[inline]
    pub fn on_enter(&self, ctx: &HookContext<'_>) {
        self.handle(ctx, EventKind::Call);
    }

    /// Function-exit handler.
    #[inline]
    pub fn on_leave(&self, ctx: &HookContext<'_>) {
        self.handle(ctx, EventKind::Return);
    }

    /// Unwind-past-the-hook handler. Never captures detail.
    #[inline]
    pub fn on_exception(&self, ctx: &HookContext<'_>) {
        self.handle(ctx, EventKind::Exception);
    }

    fn handle(&self, ctx: &HookContext<'_>, kind: EventKind) {
        STATE.with(|state| {
            // Reentrancy guard: an allocator or libc hook reached from our
            // own handler must not recurse into event construction.
            if state.in_handler.get() {
                if state.registered.get() {
                    self.fabric()
                        .registry()
                        .slot(state.slot_index.get())
                        .counters
                        .reentrancy_blocked
                        .fetch_add(1, Ordering::Relaxed);
                }
                return;
            }
            state.in_handler.set(true);

            if !state.registered.get() || state.token.get() != self.token() {
                let tid = current_thread_id();
                match self.fabric().registry().register(tid) {
                    Ok(slot) => state.rebind(self.token(), slot, tid),
                    Err(_) => {
                        state.in_handler.set(false);
                        return;
                    }
                }
            }

            let lanes = self.fabric().lanes(state.slot_index.get());

            // Shutdown gate: relaxed, so a flip may be missed by a few
            // events; those are accepted and the rest are counted here.
            if !lanes.slot().accepting_events() {
                lanes
                    .index_pool()
                    .counters()
                    .events_dropped_shutdown
                    .fetch_add(1, Ordering::Relaxed);
                state.in_handler.set(false);
                return;
            }

            let depth = match kind {
                EventKind::Call => {
                    let d = state.call_depth.get() + 1;
                    state.call_depth.set(d);
                    d
                }
                EventKind::Return | EventKind::Exception => {
                    let d = state.call_depth.get();
                    state.call_depth.set(d.saturating_sub(1));
                    d
                }
            };

            let timestamp_ns = ada_trace::monotonic_ns();
            let want_detail = ctx.capture_detail && kind != EventKind::Exception;

            // Reserve the sequence pair before either record is written.
            let idx_seq = state.index_seq.get();
            state.index_seq.set(idx_seq + 1);
            let det_seq = if want_detail {
                let s = state.detail_seq.get();
                state.detail_seq.set(s + 1);
                s as u32
            } else {
                NO_DETAIL
            };

            let event = IndexEvent {
                timestamp_ns,
                function_id: ctx.function_id,
                thread_id: state.thread_id.get(),
                event_kind: kind as u32,
                call_depth: depth,
                detail_seq: det_seq,
            };
            let mut buf = [0u8; INDEX_EVENT_SIZE];
            event.write_to(&mut buf);
            lanes.index_pool().write_record(&buf);

            if want_detail {
                self.write_detail(&lanes, ctx, kind, idx_seq as u32, timestamp_ns, state);
            }

            state.in_handler.set(false);
        });
    }

    fn write_detail(
        &self,
        lanes: &ada_trace::ThreadLanes<'_>,
        ctx: &HookContext<'_>,
        kind: EventKind,
        index_seq: u32,
        timestamp: u64,
        state: &crate::tls::ThreadState,
    ) {
        let mut rec = [0u8; MAX_DETAIL_RECORD];

        let (event_type, regs): (DetailEventType, &[u64]) = match kind {
            EventKind::Call => (DetailEventType::FunctionCall, &ctx.arg_regs[..]),
            _ => (DetailEventType::FunctionReturn, &ctx.ret_regs[..]),
        };

        let mut off = DETAIL_HEADER_SIZE;
        for reg in regs {
            rec[off..off + 8].copy_from_slice(&reg.to_le_bytes());
            off += 8;
        }

        // The stack window is captured the same way on entry and exit; only
        // the register set differs between the two record types.
        let mut stack_len = 0usize;
        let want = self.fabric().config().stack_capture_bytes;
        if want > 0 {
            if let Some(bounds) = &ctx.stack {
                stack_len = capture_stack(bounds, want, &mut rec[off..off + want as usize]);
                if stack_len == 0 {
                    lanes
                        .slot()
                        .counters
                        .stack_capture_failures
                        .fetch_add(1, Ordering::Relaxed);
                }
                off += stack_len;
            }
        }

        let header = DetailEventHeader {
            total_length: off as u32,
            event_type: event_type as u16,
            flags: detail_flags::pack(regs.len() as u16, stack_len > 0),
            index_seq,
            thread_id: state.thread_id.get(),
            timestamp,
        };
        header.write_to(&mut rec);

        let detail = lanes.detail_pool();
        detail.write_record(&rec[..off]);

        // Evaluate the trigger after the record is in the ring, so the
        // window containing this event is the one elected for persistence.
        if self.marking().matches(ctx.symbol) {
            detail.set_marked();
        }
    }
}
