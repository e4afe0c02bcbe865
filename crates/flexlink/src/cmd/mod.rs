use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand, ValueEnum};
use flexlink_engine::{Engine, EngineConfig};
use flexlink_frame::Width;

use crate::exit::{engine_error, CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod info;
pub mod load;
pub mod read;
pub mod serve;
pub mod version;
pub mod write;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Read the hardware id and report the gateware version.
    Info(InfoArgs),
    /// Read consecutive values from target memory.
    Read(ReadArgs),
    /// Write consecutive values to target memory.
    Write(WriteArgs),
    /// Load a binary image into target memory and verify it.
    Load(LoadArgs),
    /// Emulate memory peripherals for target-initiated accesses.
    Serve(ServeArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Info(args) => info::run(args, format),
        Command::Read(args) => read::run(args, format),
        Command::Write(args) => write::run(args, format),
        Command::Load(args) => load::run(args, format),
        Command::Serve(args) => serve::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

/// Device selection and link tuning shared by every target command.
#[derive(Args, Debug)]
pub struct LinkArgs {
    /// Device id: `sim`, `host[:port]`, or `unix:<path>`.
    pub device: String,
    /// Pipeline batch bound in bytes.
    #[arg(long, default_value_t = flexlink_engine::config::DEFAULT_CHUNK_SIZE)]
    pub chunk_size: usize,
    /// Response timeout (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

impl LinkArgs {
    pub fn engine_config(&self) -> CliResult<EngineConfig> {
        Ok(EngineConfig {
            chunk_size: self.chunk_size,
            response_timeout: Some(parse_duration(&self.timeout)?),
            ..EngineConfig::default()
        })
    }
}

pub fn open_engine(device: &str, config: EngineConfig) -> CliResult<Engine> {
    Engine::open_with_config(device, config).map_err(|err| engine_error("open failed", err))
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum WidthArg {
    #[value(name = "b", alias = "byte")]
    Byte,
    #[value(name = "h", alias = "half")]
    Half,
    #[value(name = "w", alias = "word")]
    Word,
}

impl From<WidthArg> for Width {
    fn from(width: WidthArg) -> Self {
        match width {
            WidthArg::Byte => Width::Byte,
            WidthArg::Half => Width::Half,
            WidthArg::Word => Width::Word,
        }
    }
}

#[derive(Args, Debug)]
pub struct InfoArgs {
    #[command(flatten)]
    pub link: LinkArgs,
}

#[derive(Args, Debug)]
pub struct ReadArgs {
    #[command(flatten)]
    pub link: LinkArgs,
    /// Start address (decimal or 0x hex).
    #[arg(value_parser = parse_u32)]
    pub address: u32,
    /// Access width.
    #[arg(long, short = 'w', value_enum, default_value = "w")]
    pub width: WidthArg,
    /// Number of values to read.
    #[arg(long, short = 'n', default_value_t = 1)]
    pub count: usize,
}

#[derive(Args, Debug)]
pub struct WriteArgs {
    #[command(flatten)]
    pub link: LinkArgs,
    /// Start address (decimal or 0x hex).
    #[arg(value_parser = parse_u32)]
    pub address: u32,
    /// Values to write at consecutive addresses.
    #[arg(required = true, value_parser = parse_u32)]
    pub values: Vec<u32>,
    /// Access width.
    #[arg(long, short = 'w', value_enum, default_value = "w")]
    pub width: WidthArg,
}

#[derive(Args, Debug)]
pub struct LoadArgs {
    #[command(flatten)]
    pub link: LinkArgs,
    /// Binary image to load.
    pub file: PathBuf,
    /// Word-aligned load address.
    #[arg(long, value_parser = parse_u32)]
    pub addr: u32,
    /// Skip reading the image back.
    #[arg(long)]
    pub no_verify: bool,
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    #[command(flatten)]
    pub link: LinkArgs,
    /// Memory peripheral as BASE:SIZE (repeatable).
    #[arg(long = "memory", value_name = "BASE:SIZE", required = true, value_parser = parse_memory)]
    pub memories: Vec<MemorySpec>,
    /// Dispatch slave requests on a separate thread with this queue depth.
    #[arg(long)]
    pub queue_depth: Option<usize>,
    /// Target register that gates slave traffic.
    #[arg(long, value_parser = parse_u32)]
    pub enable_register: Option<u32>,
    /// Stop after this long instead of waiting for Ctrl-C (e.g. 10s).
    #[arg(long)]
    pub duration: Option<String>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// A memory region served by `serve`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemorySpec {
    pub base: u32,
    pub size: u32,
}

/// Parse a decimal or `0x`-prefixed hex number. Underscores are ignored.
pub fn parse_u32(input: &str) -> Result<u32, String> {
    let cleaned: String = input.trim().chars().filter(|c| *c != '_').collect();
    let parsed = match cleaned
        .strip_prefix("0x")
        .or_else(|| cleaned.strip_prefix("0X"))
    {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => cleaned.parse::<u32>(),
    };
    parsed.map_err(|_| format!("invalid 32-bit number: {input}"))
}

fn parse_memory(input: &str) -> Result<MemorySpec, String> {
    let (base, size) = input
        .split_once(':')
        .ok_or_else(|| format!("expected BASE:SIZE, got {input}"))?;
    let spec = MemorySpec {
        base: parse_u32(base)?,
        size: parse_u32(size)?,
    };
    if spec.size == 0 {
        return Err(format!("memory at {base} has zero size"));
    }
    Ok(spec)
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(match unit {
        "ms" => Duration::from_millis(value),
        _ => Duration::from_secs(value),
    })
}
