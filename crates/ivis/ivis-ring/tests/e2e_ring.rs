//! Two-process torn-read test for the shared-memory ring.
//!
//! The same test executable re-invokes itself with role environment
//! variables: a writer process fills slots with a homogeneous byte value
//! while a reader process snapshots the latest slot concurrently. Every
//! snapshot the reader obtains must be internally homogeneous (first,
//! middle and last byte equal); a single mixed buffer means the generation
//! pre/post check let a torn read through.
//!
//! ```bash
//! cargo test -p ivis-ring --test e2e_ring -- --nocapture
//! ```

use std::env;
use std::io::Write;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use ivis_ring::{RingOptions, ShmRing};

macro_rules! log {
    ($($arg:tt)*) => {{
        let _ = writeln!(std::io::stderr(), $($arg)*);
        let _ = std::io::stderr().flush();
    }};
}

const ENV_ROLE: &str = "IVIS_E2E_ROLE";
const ENV_DATA: &str = "IVIS_E2E_DATA";
const ENV_META: &str = "IVIS_E2E_META";

const ROLE_WRITER: &str = "writer";
const ROLE_READER: &str = "reader";

/// Big enough that a memcpy takes real time, so a racing writer has a
/// chance to land mid-copy if the protocol were broken.
const SLOT_SIZE: u32 = 1 << 20;
const SLOT_COUNT: u32 = 4;

const WRITE_SECONDS: u64 = 3;
const READ_SECONDS: u64 = 2;

fn opts(data: &str, meta: &str, owner: bool) -> RingOptions {
    RingOptions {
        data_name: data.to_string(),
        meta_name: meta.to_string(),
        slot_size: SLOT_SIZE,
        slot_count: SLOT_COUNT,
        owner,
        recreate_on_mismatch: owner,
    }
}

fn run_writer(data: &str, meta: &str) {
    let mut ring = ShmRing::open_or_create(opts(data, meta, true)).expect("writer: create ring");
    log!("[WRITER] ring created ({SLOT_COUNT} x {SLOT_SIZE} bytes)");

    let deadline = Instant::now() + Duration::from_secs(WRITE_SECONDS);
    let mut payload = vec![0u8; SLOT_SIZE as usize];
    let mut writes: u64 = 0;
    while Instant::now() < deadline {
        let value = (writes % 256) as u8;
        payload.fill(value);
        ring.write(&payload).expect("writer: write");
        writes += 1;
    }
    log!("[WRITER] done, {writes} writes");
    assert!(writes > 0, "writer produced no frames");
}

fn run_reader(data: &str, meta: &str) {
    // The writer creates the segments; retry attach until they appear.
    let open_deadline = Instant::now() + Duration::from_secs(5);
    let ring = loop {
        match ShmRing::open_or_create(opts(data, meta, false)) {
            Ok(r) => break r,
            Err(_) if Instant::now() < open_deadline => {
                std::thread::sleep(Duration::from_millis(2));
            }
            Err(e) => panic!("[READER] failed to attach: {e}"),
        }
    };
    log!("[READER] attached");

    let deadline = Instant::now() + Duration::from_secs(READ_SECONDS);
    let mut snapshots: u64 = 0;
    let mut misses: u64 = 0;
    while Instant::now() < deadline {
        match ring.read_latest() {
            Some((bytes, slot, generation)) => {
                let first = bytes[0];
                let mid = bytes[bytes.len() / 2];
                let last = bytes[bytes.len() - 1];
                assert!(
                    first == mid && mid == last,
                    "torn read: slot={slot} gen={generation} bytes=({first},{mid},{last})"
                );
                snapshots += 1;
            }
            None => misses += 1,
        }
    }
    log!("[READER] done, {snapshots} consistent snapshots, {misses} misses");
    assert!(snapshots > 0, "reader never obtained a snapshot");
}

#[test]
fn e2e_two_process_torn_read_resistance() {
    if let Ok(role) = env::var(ENV_ROLE) {
        let data = env::var(ENV_DATA).expect("IVIS_E2E_DATA not set");
        let meta = env::var(ENV_META).expect("IVIS_E2E_META not set");
        match role.as_str() {
            ROLE_WRITER => run_writer(&data, &meta),
            ROLE_READER => run_reader(&data, &meta),
            other => panic!("unknown role: {other}"),
        }
        return;
    }

    let pid = std::process::id();
    let data = format!("ivis_e2e_ring_{pid}_data");
    let meta = format!("ivis_e2e_ring_{pid}_meta");
    let exe = env::current_exe().expect("current exe");

    log!("[ORCHESTRATOR] spawning writer...");
    let mut writer = Command::new(&exe)
        .arg("--exact")
        .arg("e2e_two_process_torn_read_resistance")
        .env(ENV_ROLE, ROLE_WRITER)
        .env(ENV_DATA, &data)
        .env(ENV_META, &meta)
        .stderr(Stdio::inherit())
        .spawn()
        .expect("spawn writer");

    std::thread::sleep(Duration::from_millis(50));

    log!("[ORCHESTRATOR] spawning reader (concurrent)...");
    let mut reader = Command::new(&exe)
        .arg("--exact")
        .arg("e2e_two_process_torn_read_resistance")
        .env(ENV_ROLE, ROLE_READER)
        .env(ENV_DATA, &data)
        .env(ENV_META, &meta)
        .stderr(Stdio::inherit())
        .spawn()
        .expect("spawn reader");

    let writer_status = writer.wait().expect("wait writer");
    let reader_status = reader.wait().expect("wait reader");

    let _ = ivis_ring::cleanup(&data, &meta);

    assert!(writer_status.success(), "writer failed: {writer_status}");
    assert!(reader_status.success(), "reader failed: {reader_status}");
}
