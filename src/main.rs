use std::fs::File;
use std::io::{self, BufReader, Write};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use clap::Parser;

use netoflow::capture::{self, CaptureExit, CaptureOptions, ReadRetry};
use netoflow::cli::{AccountingArgs, CaptureArgs, Cli, Command, ReplayArgs};
use netoflow::config::Settings;
use netoflow::error::NetoflowError;
use netoflow::model::flow::Snapshot;
use netoflow::output;
use netoflow::packet::{PacketDescriptor, now_micros};
use netoflow::replay;
use netoflow::state::{self, FlowTable};

/// Global shutdown flag, set by signal handlers.
static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

extern "C" fn signal_handler(_sig: libc::c_int) {
    SHUTDOWN_REQUESTED.store(true, Ordering::Relaxed);
}

fn install_signal_handlers() {
    unsafe {
        libc::signal(
            libc::SIGTERM,
            signal_handler as *const () as libc::sighandler_t,
        );
        libc::signal(
            libc::SIGINT,
            signal_handler as *const () as libc::sighandler_t,
        );
    }
}

fn exit_code(err: &NetoflowError) -> i32 {
    match err {
        NetoflowError::InvalidAddressFormat(_)
        | NetoflowError::InvalidPrefixLength(_)
        | NetoflowError::InvalidCidr(_)
        | NetoflowError::Config(_)
        | NetoflowError::ConfigIo(_) => 2,
        NetoflowError::InsufficientPermission(_) | NetoflowError::CaptureDevice(_) => 3,
        _ => 4,
    }
}

fn main() {
    env_logger::init();

    let cli = Cli::parse();

    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| run(cli)));

    match result {
        Ok(Ok(())) => std::process::exit(0),
        Ok(Err(e)) => {
            eprintln!("error: {e}");
            std::process::exit(exit_code(&e));
        }
        Err(_) => {
            eprintln!("error: fatal: unexpected panic");
            std::process::exit(4);
        }
    }
}

fn run(cli: Cli) -> Result<(), NetoflowError> {
    // 0. Install signal handlers for graceful shutdown.
    install_signal_handlers();

    // 1. Resolve configuration and build the local network registry.
    let settings = Settings::resolve(cli.command.accounting())?;
    let local = settings.build_registry()?;
    log::info!(
        "Local networks: {}; local hosts: {}; refresh {}s",
        local
            .blocks()
            .iter()
            .map(|b| b.to_string())
            .collect::<Vec<_>>()
            .join(","),
        local.hosts().len(),
        settings.refresh.as_secs()
    );

    let table = Arc::new(FlowTable::new(Arc::new(local)));

    match cli.command {
        Command::Capture(args) => run_capture(&args, &settings, table),
        Command::Replay(args) => run_replay(&args, &table),
    }
}

// ---------------------------------------------------------------------------
// Replay mode
// ---------------------------------------------------------------------------

fn run_replay(args: &ReplayArgs, table: &FlowTable) -> Result<(), NetoflowError> {
    let stats = if args.input == Path::new("-") {
        replay::replay(io::stdin().lock(), table)?
    } else {
        let file = File::open(&args.input).map_err(NetoflowError::Input)?;
        replay::replay(BufReader::new(file), table)?
    };
    log::info!(
        "Replay: {} descriptors, {} flows, {} malformed",
        stats.lines,
        table.len(),
        stats.malformed
    );

    publish(&table.snapshot(now_micros()), &args.accounting)
}

// ---------------------------------------------------------------------------
// Capture mode
// ---------------------------------------------------------------------------

fn run_capture(
    args: &CaptureArgs,
    settings: &Settings,
    table: Arc<FlowTable>,
) -> Result<(), NetoflowError> {
    // 1. Check raw socket access.
    capture::check_capture_access()?;

    // 2. Open capture devices.
    let options = CaptureOptions {
        snaplen: args.snaplen,
        promisc: args.promisc,
    };
    let captures = capture::open_capture_devices(&args.interface, options)?;
    if captures.is_empty() {
        return Err(NetoflowError::CaptureDevice(
            "failed to open any capture devices".to_string(),
        ));
    }
    log::info!("Opened {} capture device(s)", captures.len());

    // 3. Set up packet channel.
    // Capacity 8: each batch fills during a 500ms read timeout,
    // so 8 batches = 4s of headroom before backpressure starts.
    let (pkt_tx, pkt_rx) = mpsc::sync_channel::<Vec<PacketDescriptor>>(8);

    // 4. Spawn capture threads.
    let mut capture_handles = Vec::new();
    for mut cap in captures {
        let tx = pkt_tx.clone();
        let h = thread::Builder::new()
            .name("netoflow-capture".into())
            .spawn(move || {
                let iface = cap.interface().to_string();
                capture::run_capture_loop(
                    &iface,
                    |buf| cap.read_packets(buf),
                    &tx,
                    &SHUTDOWN_REQUESTED,
                    ReadRetry::default(),
                )
            })
            .map_err(|e| NetoflowError::Fatal(format!("spawn capture thread: {e}")))?;
        capture_handles.push(h);
    }
    drop(pkt_tx); // only capture threads hold senders

    // 5. Spawn ingestion thread.
    let table_for_ingest = Arc::clone(&table);
    let ingest_handle = thread::Builder::new()
        .name("netoflow-ingest".into())
        .spawn(move || {
            ingest_loop(&pkt_rx, &table_for_ingest);
        })
        .map_err(|e| NetoflowError::Fatal(format!("spawn ingest thread: {e}")))?;

    // 6. Spawn classifier thread.
    let shared = state::new_shared_snapshot();
    let table_for_classify = Arc::clone(&table);
    let shared_for_classify = Arc::clone(&shared);
    let accounting = args.accounting.clone();
    let refresh = settings.refresh;
    let classify_handle = thread::Builder::new()
        .name("netoflow-classify".into())
        .spawn(move || {
            state::run_classifier(
                &table_for_classify,
                &shared_for_classify,
                refresh,
                &SHUTDOWN_REQUESTED,
                |snapshot| publish(snapshot, &accounting),
            );
        })
        .map_err(|e| NetoflowError::Fatal(format!("spawn classify thread: {e}")))?;

    // 7. Wait for shutdown. Capture threads exit on the flag (reads time out
    // after 500ms); the ingest thread exits once every sender is gone.
    let exits: Vec<CaptureExit> = capture_handles
        .into_iter()
        .map(|h| h.join().unwrap_or(CaptureExit::Failed))
        .collect();
    let requested = SHUTDOWN_REQUESTED.swap(true, Ordering::Relaxed);
    let _ = ingest_handle.join();
    let _ = classify_handle.join();

    // 8. Final snapshot covers everything ingested before shutdown.
    shared.store(Arc::new(table.snapshot(now_micros())));
    let snapshot = shared.load_full();
    log::info!(
        "Shutdown: {} flows, {} dropped descriptors",
        snapshot.flows.len(),
        snapshot.dropped_descriptors
    );
    publish(&snapshot, &args.accounting)?;

    if requested {
        Ok(())
    } else {
        Err(NetoflowError::CaptureDevice(format!(
            "every capture device stopped without a shutdown request: {exits:?}"
        )))
    }
}

/// Render a snapshot to `--output` or stdout.
fn publish(snapshot: &Snapshot, args: &AccountingArgs) -> Result<(), NetoflowError> {
    match &args.output {
        Some(path) => output::publish_to_path(snapshot, args.format, path),
        None => {
            let mut out = io::stdout().lock();
            output::write_snapshot(snapshot, args.format, &mut out)?;
            out.flush().map_err(NetoflowError::Serialization)
        }
    }
}

// ---------------------------------------------------------------------------
// Ingestion thread
// ---------------------------------------------------------------------------

/// Drain batches into the flow table until every capture thread has exited.
fn ingest_loop(pkt_rx: &mpsc::Receiver<Vec<PacketDescriptor>>, table: &FlowTable) {
    let mut batches: u64 = 0;
    let mut packets: u64 = 0;

    loop {
        match pkt_rx.recv_timeout(Duration::from_millis(100)) {
            Ok(batch) => {
                batches += 1;
                packets += batch.len() as u64;
                let counts = table.record_batch(&batch);
                log::debug!(
                    "Batch of {}: created={}, merged={}, dropped={}",
                    batch.len(),
                    counts.created,
                    counts.merged,
                    counts.dropped
                );
            }
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    log::info!(
        "Ingest exit: {} batches, {} packets, {} flows",
        batches,
        packets,
        table.len()
    );
}
