//! End-to-end pipeline tests: agent handlers → lanes → drain → trace files.
//!
//! Agent and controller share one process here (anonymous arenas); the data
//! path is identical to the cross-process deployment.

use ada_agent::{current_thread_id, AgentSession, HookContext};
use ada_collector::{
    ControllerSession, DetailFileHeader, DrainConfig, IndexFileFooter, IndexFileHeader,
    SessionConfig, FLAG_HAS_DETAIL_FILE,
};
use ada_trace::{
    make_function_id, DetailEventHeader, EventKind, Fabric, FabricConfig, IndexEvent,
    MarkingPolicy, TriggerPattern, DETAIL_HEADER_SIZE, INDEX_EVENT_SIZE, NO_DETAIL,
};
use std::fs;
use std::path::Path;
use std::sync::Arc;

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Big enough rings that a live drain never drops.
fn roomy_config() -> FabricConfig {
    FabricConfig::new(8, 12, 4, 6, 2, 640, 0)
}

fn session_config(dir: &Path, fabric: FabricConfig) -> SessionConfig {
    SessionConfig {
        fabric,
        drain: DrainConfig::default(),
        session_dir: dir.to_path_buf(),
    }
}

fn read_index_file(dir: &Path, tid: u32) -> (IndexFileHeader, Vec<IndexEvent>, IndexFileFooter) {
    let bytes = fs::read(dir.join(format!("thread_{tid}/index.atf"))).unwrap();
    let header = IndexFileHeader::decode(bytes[..64].try_into().unwrap()).unwrap();
    let footer_off = bytes.len() - 64;
    let footer = IndexFileFooter::decode(bytes[footer_off..].try_into().unwrap()).unwrap();
    let events = bytes[64..footer_off]
        .chunks_exact(INDEX_EVENT_SIZE)
        .map(|c| IndexEvent::read_from(c.try_into().unwrap()))
        .collect();
    (header, events, footer)
}

fn read_detail_records(dir: &Path, tid: u32) -> (DetailFileHeader, Vec<(DetailEventHeader, Vec<u8>)>) {
    let bytes = fs::read(dir.join(format!("thread_{tid}/detail.atf"))).unwrap();
    let header = DetailFileHeader::decode(bytes[..64].try_into().unwrap()).unwrap();
    let mut records = Vec::new();
    let mut off = 64;
    for _ in 0..header.event_count {
        let rec_hdr = DetailEventHeader::read_from(&bytes[off..]);
        let payload = bytes[off + DETAIL_HEADER_SIZE..off + rec_hdr.total_length as usize].to_vec();
        records.push((rec_hdr, payload));
        off += rec_hdr.total_length as usize;
    }
    (header, records)
}

#[test]
fn single_thread_ten_events_no_detail() {
    init_logging();
    let tmp = tempfile::tempdir().unwrap();
    let controller =
        ControllerSession::start_in_process(session_config(tmp.path(), roomy_config())).unwrap();
    let agent = AgentSession::with_fabric(controller.fabric(), MarkingPolicy::disabled());

    let fid = make_function_id(10, 1);
    for _ in 0..10 {
        agent.on_enter(&HookContext::new(fid, "traced_fn"));
    }
    let tid = current_thread_id();
    let summary = controller.shutdown().unwrap();
    assert!(summary.clean_shutdown);

    let path = tmp.path().join(format!("thread_{tid}/index.atf"));
    assert_eq!(fs::metadata(&path).unwrap().len(), 64 + 320 + 64);
    assert!(!tmp.path().join(format!("thread_{tid}/detail.atf")).exists());

    let (header, events, footer) = read_index_file(tmp.path(), tid);
    assert_eq!(header.event_count, 10);
    assert_eq!(header.flags & FLAG_HAS_DETAIL_FILE, 0);
    assert_eq!(footer.event_count, 10);
    assert_eq!(footer.bytes_written, 320);
    assert!(events.iter().all(|e| e.detail_seq == NO_DETAIL));
    assert!(events.iter().all(|e| e.function_id == fid));
    assert_eq!(summary.metrics.totals.events_captured, 10);

    // summary.json landed next to the thread directories.
    assert!(tmp.path().join("summary.json").exists());
}

#[test]
fn alternating_detail_links_hold_both_directions() {
    let tmp = tempfile::tempdir().unwrap();
    let controller =
        ControllerSession::start_in_process(session_config(tmp.path(), roomy_config())).unwrap();
    let agent = AgentSession::with_fabric(controller.fabric(), MarkingPolicy::disabled());

    let fid = make_function_id(11, 1);
    // Leave events carry a 16-byte return-register payload and no stack.
    let mut with_detail = HookContext::new(fid, "detailed_fn");
    with_detail.capture_detail = true;
    with_detail.ret_regs = [0xAA, 0xBB];
    let plain = HookContext::new(fid, "plain_fn");

    agent.on_leave(&with_detail); // index 0 -> detail 0
    agent.on_leave(&plain); // index 1, no detail
    agent.on_leave(&with_detail); // index 2 -> detail 1

    // Force the detail active ring to be elected for the final drain.
    let tid = current_thread_id();
    let slot = agent.fabric().registry().find(tid).unwrap();
    agent.fabric().lanes(slot).detail_pool().set_marked();

    controller.shutdown().unwrap();

    let (_, events, _) = read_index_file(tmp.path(), tid);
    let detail_seqs: Vec<u32> = events.iter().map(|e| e.detail_seq).collect();
    assert_eq!(detail_seqs, vec![0, NO_DETAIL, 1]);

    let (dheader, records) = read_detail_records(tmp.path(), tid);
    assert_eq!(dheader.event_count, 2);
    let back_links: Vec<u32> = records.iter().map(|(h, _)| h.index_seq).collect();
    assert_eq!(back_links, vec![0, 2]);
    for (hdr, payload) in &records {
        assert_eq!(hdr.total_length as usize, DETAIL_HEADER_SIZE + 16);
        assert_eq!(payload.len(), 16);
        assert_eq!(u64::from_le_bytes(payload[0..8].try_into().unwrap()), 0xAA);
    }

    // Round trip both directions: index[e.index_seq].detail_seq == e's ordinal.
    for (ordinal, (hdr, _)) in records.iter().enumerate() {
        assert_eq!(events[hdr.index_seq as usize].detail_seq, ordinal as u32);
    }
}

#[test]
fn burst_swaps_rings_without_losing_order() {
    let tmp = tempfile::tempdir().unwrap();
    // 16-slot index rings x4: a 40-event burst must swap but cannot drop.
    let config = FabricConfig::new(8, 4, 4, 3, 2, 640, 0);
    let controller =
        ControllerSession::start_in_process(session_config(tmp.path(), config)).unwrap();
    let agent = AgentSession::with_fabric(controller.fabric(), MarkingPolicy::disabled());

    for i in 1..=40u32 {
        agent.on_enter(&HookContext::new(make_function_id(12, i), "burst_fn"));
    }
    let tid = current_thread_id();
    let slot = agent.fabric().registry().find(tid).unwrap();
    let swaps = agent.fabric().lanes(slot).index_pool().counters().snapshot().ring_swaps;
    assert!(swaps >= 1, "a 40-event burst must fill at least one 16-slot ring");

    let summary = controller.shutdown().unwrap();
    assert!(summary.clean_shutdown);

    let (_, events, footer) = read_index_file(tmp.path(), tid);
    assert_eq!(footer.event_count, 40);
    let ordinals: Vec<u32> = events.iter().map(|e| ada_trace::function_ordinal(e.function_id)).collect();
    assert_eq!(ordinals, (1..=40).collect::<Vec<_>>(), "invocation order preserved");

    let snap = agent.fabric().lanes(slot).index_pool().counters().snapshot();
    assert_eq!(snap.events_dropped, 0);
}

#[test]
fn exhaustion_without_drain_drops_oldest_then_finalizes() {
    let tmp = tempfile::tempdir().unwrap();
    // Tiny index rings, and no drain running yet: the pool must exhaust.
    let config = FabricConfig::new(4, 3, 2, 3, 2, 640, 0);
    let fabric = Arc::new(Fabric::create_anonymous(config).unwrap());
    let agent = AgentSession::with_fabric(Arc::clone(&fabric), MarkingPolicy::disabled());

    for i in 1..=40u32 {
        agent.on_enter(&HookContext::new(make_function_id(13, i), "flood_fn"));
    }
    let tid = current_thread_id();
    let slot = fabric.registry().find(tid).unwrap();
    let snap = fabric.lanes(slot).index_pool().counters().snapshot();
    assert!(snap.pool_exhaustion_count > 0);
    assert!(snap.events_dropped > 0);
    assert_eq!(snap.events_written + snap.events_dropped, 40);

    // Bring the drain up afterwards; it must persist exactly the survivors.
    let controller = ControllerSession::start_with_shared_fabric(
        Arc::clone(&fabric),
        session_config(tmp.path(), config),
    )
    .unwrap();
    let summary = controller.shutdown().unwrap();
    assert!(summary.clean_shutdown);

    let (_, events, footer) = read_index_file(tmp.path(), tid);
    assert_eq!(u64::from(footer.event_count), snap.events_written);
    // Oldest events were sacrificed; the newest survived.
    let last = ada_trace::function_ordinal(events.last().unwrap().function_id);
    assert_eq!(last, 40);
}

#[test]
fn preroll_window_is_persisted_exactly_once() {
    let tmp = tempfile::tempdir().unwrap();
    // 8-slot detail rings (7 usable): small enough to recycle many times.
    let config = FabricConfig::new(4, 12, 4, 3, 2, 640, 0);
    let fabric = Arc::new(Fabric::create_anonymous(config).unwrap());
    let agent = AgentSession::with_fabric(
        Arc::clone(&fabric),
        MarkingPolicy::new(&[TriggerPattern::literal("target_fn")]),
    );

    let mut noise = HookContext::new(make_function_id(14, 1), "noise_fn");
    noise.capture_detail = true;
    let mut target = HookContext::new(make_function_id(14, 2), "target_fn");
    target.capture_detail = true;

    for _ in 0..1000 {
        agent.on_enter(&noise);
    }
    let tid = current_thread_id();
    let slot = fabric.registry().find(tid).unwrap();
    {
        let detail = fabric.lanes(slot).detail_pool();
        let snap = detail.counters().snapshot();
        assert_eq!(snap.ring_swaps, 0, "unmarked windows must only recycle");
        assert!(snap.records_recycled > 0);
    }

    agent.on_enter(&target);
    for _ in 0..100 {
        agent.on_enter(&noise);
    }
    {
        let detail = fabric.lanes(slot).detail_pool();
        let snap = detail.counters().snapshot();
        assert_eq!(snap.ring_swaps, 1, "exactly one window elected");
        assert!(!detail.marked_event_seen(), "flag cleared on submission");
    }

    let controller = ControllerSession::start_with_shared_fabric(
        Arc::clone(&fabric),
        session_config(tmp.path(), config),
    )
    .unwrap();
    controller.shutdown().unwrap();

    let (dheader, records) = read_detail_records(tmp.path(), tid);
    // One full ring: 7 records, the marked event plus its pre-roll.
    assert_eq!(dheader.event_count, 7);
    // target_fn was the 1001st invocation, index ordinal 1000.
    assert!(records.iter().any(|(h, _)| h.index_seq == 1000));
    let (_, events, _) = read_index_file(tmp.path(), tid);
    assert_eq!(events[1000].detail_seq, 1000, "detail ordinals count every reserved record");
}

#[test]
fn two_threads_shut_down_cleanly() {
    init_logging();
    let tmp = tempfile::tempdir().unwrap();
    let controller =
        ControllerSession::start_in_process(session_config(tmp.path(), roomy_config())).unwrap();
    let agent = Arc::new(AgentSession::with_fabric(
        controller.fabric(),
        MarkingPolicy::disabled(),
    ));

    let mut handles = Vec::new();
    for t in 0..2u32 {
        let agent = Arc::clone(&agent);
        handles.push(std::thread::spawn(move || {
            let fid = make_function_id(15, t + 1);
            for _ in 0..500 {
                let ctx = HookContext::new(fid, "worker_fn");
                agent.on_enter(&ctx);
                agent.on_leave(&ctx);
            }
            current_thread_id()
        }));
    }
    let tids: Vec<u32> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let summary = controller.shutdown().unwrap();
    assert!(summary.clean_shutdown);
    assert_eq!(summary.metrics.totals.events_dropped, 0);
    assert_eq!(summary.metrics.totals.events_captured, 2000);

    for tid in tids {
        let (header, events, footer) = read_index_file(tmp.path(), tid);
        assert_eq!(header.event_count, 1000);
        assert_eq!(footer.event_count, 1000);
        assert_eq!(events.len(), 1000);
        // Per-thread invocation order: strict call/return alternation.
        for pair in events.chunks_exact(2) {
            assert_eq!(pair[0].event_kind, EventKind::Call as u32);
            assert_eq!(pair[1].event_kind, EventKind::Return as u32);
        }
        // Single-thread file order follows single-thread time order.
        for w in events.windows(2) {
            assert!(w[0].timestamp_ns <= w[1].timestamp_ns);
        }
    }
}

#[test]
fn registry_rejects_threads_beyond_capacity() {
    let tmp = tempfile::tempdir().unwrap();
    let config = FabricConfig::new(1, 6, 2, 3, 2, 640, 0);
    let controller =
        ControllerSession::start_in_process(session_config(tmp.path(), config)).unwrap();
    let agent = Arc::new(AgentSession::with_fabric(
        controller.fabric(),
        MarkingPolicy::disabled(),
    ));

    // First thread claims the only slot.
    agent.on_enter(&HookContext::new(make_function_id(16, 1), "fits"));

    let agent2 = Arc::clone(&agent);
    std::thread::spawn(move || {
        // No slot left: the handler becomes a silent no-op on this thread.
        agent2.on_enter(&HookContext::new(make_function_id(16, 2), "rejected"));
    })
    .join()
    .unwrap();

    assert_eq!(agent.fabric().registry().thread_count(), 1);
    let summary = controller.shutdown().unwrap();
    assert_eq!(summary.metrics.totals.events_captured, 1);
}
