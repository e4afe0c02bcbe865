use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use flexlink_engine::{
    DispatchMode, PeripheralMapping, PeripheralTable, SlaveDispatcher, WordStore,
};
use serde::Serialize;
use tracing::info;

use crate::cmd::{open_engine, parse_duration, MemorySpec, ServeArgs};
use crate::exit::{engine_error, CliError, CliResult, FAILURE, INTERNAL, SUCCESS};
use crate::output::{hex_u32, print_fields, print_json, OutputFormat};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Serialize)]
struct ServeOutput {
    device: String,
    regions: Vec<RegionOutput>,
    slave_frames: u64,
    master_frames: u64,
    uptime_ms: u64,
}

#[derive(Serialize)]
struct RegionOutput {
    base: String,
    size: u32,
}

pub fn run(args: ServeArgs, format: OutputFormat) -> CliResult<i32> {
    let limit = args.duration.as_deref().map(parse_duration).transpose()?;
    let dispatcher = build_dispatcher(&args.memories)?;
    let regions: Vec<RegionOutput> = dispatcher
        .table()
        .iter()
        .map(|mapping| RegionOutput {
            base: hex_u32(mapping.base()),
            size: mapping.size(),
        })
        .collect();

    let mut config = args.link.engine_config()?;
    config.slave_enable_register = args.enable_register;
    if let Some(depth) = args.queue_depth {
        config.dispatch = DispatchMode::Queued { depth };
    }
    let engine = open_engine(&args.link.device, config)?;
    engine.register_slave_callback(dispatcher);
    engine
        .slave_enable(true)
        .map_err(|err| engine_error("slave enable failed", err))?;
    info!(regions = regions.len(), "serving slave requests");

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let start = Instant::now();
    while running.load(Ordering::SeqCst) {
        if limit.is_some_and(|limit| start.elapsed() >= limit) {
            break;
        }
        if !engine.is_open() {
            return Err(CliError::new(
                FAILURE,
                format!(
                    "link lost: {}",
                    engine.failure().unwrap_or_else(|| "closed".to_string())
                ),
            ));
        }
        thread::sleep(POLL_INTERVAL);
    }

    engine
        .unregister_slave_callback()
        .map_err(|err| engine_error("slave disable failed", err))?;
    let stats = engine.stats();
    engine.close();

    let out = ServeOutput {
        device: args.link.device.clone(),
        regions,
        slave_frames: stats.slave_frames,
        master_frames: stats.master_frames,
        uptime_ms: start.elapsed().as_millis() as u64,
    };
    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table | OutputFormat::Pretty => {
            let regions = out
                .regions
                .iter()
                .map(|r| format!("{}+{:#x}", r.base, r.size))
                .collect::<Vec<_>>()
                .join(", ");
            print_fields(
                "Serve Summary",
                &[
                    ("Device", out.device.clone()),
                    ("Regions", regions),
                    ("Slave frames", out.slave_frames.to_string()),
                    ("Uptime", format!("{}ms", out.uptime_ms)),
                ],
                format,
            );
        }
    }
    Ok(SUCCESS)
}

fn build_dispatcher(memories: &[MemorySpec]) -> CliResult<SlaveDispatcher> {
    let mappings = memories
        .iter()
        .map(|spec| {
            let store = Arc::new(WordStore::new(spec.size as usize));
            PeripheralMapping::new(spec.base, spec.size, store)
        })
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| engine_error("invalid memory region", err))?;
    let table =
        PeripheralTable::new(mappings).map_err(|err| engine_error("invalid memory map", err))?;
    Ok(SlaveDispatcher::new(table))
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
