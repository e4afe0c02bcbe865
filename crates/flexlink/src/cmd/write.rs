use flexlink_engine::{BusValue, Engine};
use flexlink_frame::Width;
use serde::Serialize;

use crate::cmd::{open_engine, WidthArg, WriteArgs};
use crate::exit::{engine_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{hex_u32, print_json, width_name, OutputFormat};

#[derive(Serialize)]
struct WriteOutput {
    address: String,
    width: &'static str,
    count: usize,
}

pub fn run(args: WriteArgs, format: OutputFormat) -> CliResult<i32> {
    let width = Width::from(args.width);
    check_range(width, &args.values)?;

    let engine = open_engine(&args.link.device, args.link.engine_config()?)?;
    match args.width {
        WidthArg::Byte => write_as::<u8>(&engine, args.address, &args.values)?,
        WidthArg::Half => write_as::<u16>(&engine, args.address, &args.values)?,
        WidthArg::Word => write_as::<u32>(&engine, args.address, &args.values)?,
    }
    engine.close();

    let out = WriteOutput {
        address: hex_u32(args.address),
        width: width_name(width),
        count: args.values.len(),
    };
    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table | OutputFormat::Pretty => {
            println!(
                "wrote {} value(s) of width {} at {}",
                out.count, out.width, out.address
            );
        }
    }
    Ok(SUCCESS)
}

fn check_range(width: Width, values: &[u32]) -> CliResult<()> {
    match values.iter().find(|value| **value & !width.value_mask() != 0) {
        Some(value) => Err(CliError::new(
            USAGE,
            format!(
                "value {value:#x} does not fit width {}",
                width_name(width)
            ),
        )),
        None => Ok(()),
    }
}

fn write_as<T: BusValue>(engine: &Engine, address: u32, values: &[u32]) -> CliResult<()> {
    let data: Vec<T> = values.iter().map(|value| T::from_bus(*value)).collect();
    engine
        .write(address, &data)
        .map_err(|err| engine_error("write failed", err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_must_fit_the_width() {
        assert!(check_range(Width::Byte, &[0, 0xFF]).is_ok());
        assert_eq!(check_range(Width::Byte, &[0x100]).unwrap_err().code, USAGE);
        assert!(check_range(Width::Half, &[0xFFFF]).is_ok());
        assert!(check_range(Width::Word, &[u32::MAX]).is_ok());
    }
}
