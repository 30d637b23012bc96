// Example: capture a synthetic guest instruction stream.
//
// Stands in for a host-runtime adapter: "translates" a tiny guest program
// once, then replays its execution (a counting loop with a load and a
// store per iteration), driving the same hooks a real adapter would.
//
// Run with: cargo run --example synthetic_guest
// Inspect the output with: guesttrace-dump summary --trace synthetic.zst

use guesttrace_capture::{
    DecodedInsn, InstrumentationHooks, MemoryAccess, SessionConfig, TraceSession,
};

fn main() {
    env_logger::init();

    let config = SessionConfig::from_args(["tracefile=synthetic.zst", "traceinst=1000"]);
    let session = match TraceSession::install(config) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("install failed: {}", e);
            std::process::exit(1);
        }
    };
    session.begin();
    session.on_vcpu_init(0);

    // Loop body at 0x1000: load counter, store counter, decrement, branch
    // back to 0x1000 until done, then one trailing instruction.
    let body = [
        DecodedInsn { vaddr: 0x1000, opcode: 0x0000_3083, len: 4 },
        DecodedInsn { vaddr: 0x1004, opcode: 0x0062_3023, len: 4 },
        DecodedInsn { vaddr: 0x1008, opcode: 0xfff3_0313, len: 4 },
        DecodedInsn { vaddr: 0x100c, opcode: 0xfe03_1ce3, len: 4 },
    ];
    let exit = [DecodedInsn { vaddr: 0x1010, opcode: 0x0000_0013, len: 4 }];

    let body_ids = session.on_block_translated(&body);
    let exit_ids = session.on_block_translated(&exit);

    let iterations = 64u64;
    for i in 0..iterations {
        session.on_memory_access(
            0,
            body_ids[0],
            MemoryAccess { vaddr: 0x8000, is_store: false, size: 8, paddr: Some(0x4_8000) },
        );
        session.on_insn_retired(0, body_ids[0]);

        session.on_memory_access(
            0,
            body_ids[1],
            MemoryAccess { vaddr: 0x8008, is_store: true, size: 8, paddr: Some(0x4_8008) },
        );
        session.on_insn_retired(0, body_ids[1]);

        session.on_insn_retired(0, body_ids[2]);
        session.on_insn_retired(0, body_ids[3]);

        if i + 1 == iterations {
            session.on_insn_retired(0, exit_ids[0]);
        }
    }

    let summary = session.uninstall();
    print!("{}", summary);
}
