use flexlink_engine::{BusValue, Engine};
use tracing::debug;

use crate::cmd::{open_engine, ReadArgs, WidthArg};
use crate::exit::{engine_error, CliResult, SUCCESS};
use crate::output::{print_values, OutputFormat};

pub fn run(args: ReadArgs, format: OutputFormat) -> CliResult<i32> {
    let engine = open_engine(&args.link.device, args.link.engine_config()?)?;
    let values = match args.width {
        WidthArg::Byte => read_as::<u8>(&engine, args.address, args.count)?,
        WidthArg::Half => read_as::<u16>(&engine, args.address, args.count)?,
        WidthArg::Word => read_as::<u32>(&engine, args.address, args.count)?,
    };
    debug!(count = values.len(), stats = ?engine.stats(), "read complete");
    engine.close();

    print_values(args.address, args.width.into(), &values, format);
    Ok(SUCCESS)
}

fn read_as<T: BusValue>(engine: &Engine, address: u32, count: usize) -> CliResult<Vec<u32>> {
    engine
        .read_vec::<T>(address, count)
        .map(|values| values.into_iter().map(T::to_bus).collect())
        .map_err(|err| engine_error("read failed", err))
}
