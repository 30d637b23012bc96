//! End-to-end capture scenarios: drive the hooks the way a host adapter
//! would, then decode the finished trace file and check what landed.

use guesttrace_capture::{
    DecodedInsn, InstrumentationHooks, MemoryAccess, SessionConfig, TraceSession,
};
use guesttrace_format::{FrameEncoding, FrameReader, MemoryKind, TraceRecord};
use std::path::PathBuf;

fn insn(vaddr: u64, opcode: u32, len: u8) -> DecodedInsn {
    DecodedInsn { vaddr, opcode, len }
}

fn scratch(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!(
        "guesttrace-capture-{}-{}.zst",
        std::process::id(),
        name
    ))
}

fn config(path: &PathBuf, max_inst: u64) -> SessionConfig {
    SessionConfig {
        tracefile: path.clone(),
        max_inst,
        ..SessionConfig::default()
    }
}

fn read_records(path: &PathBuf) -> Vec<TraceRecord> {
    FrameReader::open(path)
        .unwrap()
        .read_all()
        .unwrap()
        .into_iter()
        .flat_map(|f| f.records)
        .collect()
}

#[test]
fn straight_line_capped_at_three() {
    let _ = env_logger::builder().is_test(true).try_init();
    let path = scratch("straight-line");

    let session = TraceSession::install(config(&path, 3)).unwrap();
    session.begin();
    session.on_vcpu_init(0);

    let ids = session.on_block_translated(&[
        insn(0x1000, 0x13, 4),
        insn(0x1004, 0x13, 4),
        insn(0x1008, 0x13, 4),
    ]);
    for id in &ids {
        session.on_insn_retired(0, *id);
    }

    // A fourth instruction is over budget: nothing changes.
    let extra = session.on_block_translated(&[insn(0x100c, 0x13, 4)]);
    assert!(extra.is_empty());

    let summary = session.uninstall();
    assert_eq!(summary.instructions_traced, 3);
    assert_eq!(summary.frames_written, 1, "exactly one flush at the cap");

    let records = read_records(&path);
    assert_eq!(records.len(), 3);
    for (i, rec) in records.iter().enumerate() {
        assert_eq!(rec.virtual_pc, 0x1000 + i as u64 * 4);
        assert!(!rec.branch_taken);
    }
    let _ = std::fs::remove_file(&path);
}

#[test]
fn taken_branch_records_successor_address() {
    let path = scratch("taken-branch");

    let session = TraceSession::install(config(&path, 100)).unwrap();
    session.begin();

    let a = session.on_block_translated(&[insn(0x2000, 0x6f, 4)]);
    let b = session.on_block_translated(&[insn(0x3000, 0x13, 4)]);
    session.on_insn_retired(0, a[0]);
    session.on_insn_retired(0, b[0]);

    session.uninstall();

    let records = read_records(&path);
    assert_eq!(records.len(), 2);
    assert!(records[0].branch_taken);
    assert_eq!(records[0].branch_target, 0x3000);
    assert!(!records[1].branch_taken, "no successor observed");
    let _ = std::fs::remove_file(&path);
}

#[test]
fn load_populates_memory_fact() {
    let path = scratch("load-fact");

    let session = TraceSession::install(config(&path, 100)).unwrap();
    session.begin();

    let ids = session.on_block_translated(&[insn(0x4000, 0x3003, 4), insn(0x4004, 0x13, 4)]);
    session.on_memory_access(
        0,
        ids[0],
        MemoryAccess {
            vaddr: 0xa000,
            is_store: false,
            size: 8,
            paddr: None,
        },
    );
    session.on_insn_retired(0, ids[0]);
    session.on_insn_retired(0, ids[1]);

    session.uninstall();

    let records = read_records(&path);
    let fact = records[0].memory_fact().expect("load must carry a fact");
    assert_eq!(fact.address, 0xa000);
    assert_eq!(fact.kind, MemoryKind::Load);
    assert_eq!(fact.size, 8);
    assert_eq!(records[0].physical_pc, records[0].virtual_pc);
    assert!(
        records[1].memory_fact().is_none(),
        "no access hook, no fact"
    );
    let _ = std::fs::remove_file(&path);
}

#[test]
fn compressed_roundtrip_is_exact() {
    let path = scratch("roundtrip");

    let session = TraceSession::install(config(&path, 500)).unwrap();
    session.begin();

    let a = session.on_block_translated(&[insn(0x1000, 0x11, 4), insn(0x1004, 0x22, 4)]);
    let b = session.on_block_translated(&[insn(0x3000, 0x33, 2), insn(0x3002, 0x44, 4)]);

    session.on_insn_retired(0, a[0]);
    session.on_memory_access(
        0,
        a[1],
        MemoryAccess {
            vaddr: 0xbeef,
            is_store: true,
            size: 4,
            paddr: Some(0x7_0000),
        },
    );
    session.on_insn_retired(0, a[1]);
    session.on_insn_retired(0, b[0]);
    session.on_insn_retired(0, b[1]);

    session.uninstall();

    let mut expected = vec![
        TraceRecord::from_translation(0x1000, 0x11, 4),
        TraceRecord::from_translation(0x1004, 0x22, 4),
        TraceRecord::from_translation(0x3000, 0x33, 2),
        TraceRecord::from_translation(0x3002, 0x44, 4),
    ];
    // 0x1000 fell through to 0x1004.
    expected[0].branch_taken = false;
    // The store at 0x1004 branched to 0x3000 and resolved its physical pc.
    expected[1].physical_pc = 0x7_0000;
    expected[1].exec = Some(guesttrace_format::ExecData::Memory(
        guesttrace_format::MemoryFact {
            address: 0xbeef,
            kind: MemoryKind::Store,
            size: 4,
        },
    ));
    expected[1].branch_taken = true;
    expected[1].branch_target = 0x3000;
    // The two-byte instruction at 0x3000 fell through to 0x3002; the final
    // record stays unresolved.

    let frames = FrameReader::open(&path).unwrap().read_all().unwrap();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].encoding, FrameEncoding::Zstd);
    assert_eq!(frames[0].records, expected);
    let _ = std::fs::remove_file(&path);
}

#[test]
fn capacity_threshold_splits_frames() {
    let path = scratch("threshold");

    let session = TraceSession::install(SessionConfig {
        tracefile: path.clone(),
        max_inst: 100,
        flush_threshold: 4,
        ..SessionConfig::default()
    })
    .unwrap();
    session.begin();

    let insns: Vec<_> = (0..10u64).map(|i| insn(0x1000 + i * 4, 0x13, 4)).collect();
    let ids = session.on_block_translated(&insns);
    for id in &ids {
        session.on_insn_retired(0, *id);
    }

    let summary = session.uninstall();
    assert_eq!(summary.frames_written, 3, "4 + 4 + remainder of 2");

    let records = read_records(&path);
    assert_eq!(records.len(), 10);
    for (i, rec) in records.iter().enumerate() {
        assert_eq!(rec.virtual_pc, 0x1000 + i as u64 * 4);
    }
    let _ = std::fs::remove_file(&path);
}

#[test]
fn budget_is_shared_across_vcpus() {
    let path = scratch("two-vcpus");

    let session = TraceSession::install(config(&path, 100)).unwrap();
    session.begin();

    std::thread::scope(|scope| {
        for vcpu in 0..2u32 {
            let session = &session;
            scope.spawn(move || {
                let base = 0x10_0000 * (vcpu as u64 + 1);
                let insns: Vec<_> =
                    (0..80u64).map(|i| insn(base + i * 4, 0x13, 4)).collect();
                let ids = session.on_block_translated(&insns);
                for id in &ids {
                    session.on_insn_retired(vcpu, *id);
                }
            });
        }
    });

    let summary = session.uninstall();
    assert_eq!(summary.instructions_traced, 100);
    assert_eq!(summary.vcpus.len(), 2);
    assert_eq!(
        summary.vcpus.iter().map(|v| v.instructions).sum::<u64>(),
        100
    );

    assert_eq!(read_records(&path).len(), 100);
    let _ = std::fs::remove_file(&path);
}

#[test]
fn empty_session_writes_header_only() {
    let path = scratch("empty");

    let session = TraceSession::install(config(&path, 100)).unwrap();
    session.begin();
    let summary = session.uninstall();

    assert_eq!(summary.instructions_traced, 0);
    assert_eq!(summary.frames_written, 0);

    let mut reader = FrameReader::open(&path).unwrap();
    assert!(reader.next_frame().unwrap().is_none());
    let _ = std::fs::remove_file(&path);
}

#[test]
fn hooks_are_inert_before_begin() {
    let path = scratch("inert");

    let session = TraceSession::install(config(&path, 100)).unwrap();
    let ids = session.on_block_translated(&[insn(0x1000, 0x13, 4)]);
    assert!(ids.is_empty());

    session.begin();
    let summary = session.uninstall();
    assert_eq!(summary.instructions_traced, 0);
    let _ = std::fs::remove_file(&path);
}
