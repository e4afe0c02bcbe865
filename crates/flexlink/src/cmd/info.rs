use flexlink_engine::HWID_MAGIC;
use serde::Serialize;

use crate::cmd::{open_engine, InfoArgs};
use crate::exit::{engine_error, CliError, CliResult, DATA_INVALID, SUCCESS};
use crate::output::{hex_u32, print_fields, print_json, OutputFormat};

#[derive(Serialize)]
struct InfoOutput {
    device: String,
    transport: &'static str,
    hardware_id: String,
    valid: bool,
    version: u16,
    chunk_bound: usize,
}

pub fn run(args: InfoArgs, format: OutputFormat) -> CliResult<i32> {
    let engine = open_engine(&args.link.device, args.link.engine_config()?)?;
    let id = engine
        .hardware_id()
        .map_err(|err| engine_error("hardware id read failed", err))?;

    let out = InfoOutput {
        device: args.link.device.clone(),
        transport: engine.transport_name(),
        hardware_id: hex_u32(id.0),
        valid: id.is_valid(),
        version: id.version(),
        chunk_bound: engine.chunk_bound(),
    };
    engine.close();
    print_info(&out, format);

    if !out.valid {
        return Err(CliError::new(
            DATA_INVALID,
            format!(
                "hardware id {} does not carry magic {}",
                out.hardware_id,
                hex_u32(HWID_MAGIC)
            ),
        ));
    }
    Ok(SUCCESS)
}

fn print_info(out: &InfoOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(out),
        OutputFormat::Table | OutputFormat::Pretty => print_fields(
            "Target Info",
            &[
                ("Device", out.device.clone()),
                ("Transport", out.transport.to_string()),
                ("Hardware id", out.hardware_id.clone()),
                ("Valid", out.valid.to_string()),
                ("Version", out.version.to_string()),
                ("Chunk bound", format!("{} bytes", out.chunk_bound)),
            ],
            format,
        ),
    }
}
