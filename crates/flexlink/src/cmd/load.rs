use std::fs;
use std::time::Instant;

use serde::Serialize;
use tracing::info;

use crate::cmd::{open_engine, LoadArgs};
use crate::exit::{engine_error, io_error, CliError, CliResult, DATA_INVALID, SUCCESS, USAGE};
use crate::output::{hex_u32, print_fields, print_json, OutputFormat};

#[derive(Serialize)]
struct LoadOutput {
    file: String,
    address: String,
    bytes: usize,
    words: usize,
    verified: bool,
    elapsed_ms: f64,
}

pub fn run(args: LoadArgs, format: OutputFormat) -> CliResult<i32> {
    if args.addr & 3 != 0 {
        return Err(CliError::new(
            USAGE,
            format!("load address {} is not word aligned", hex_u32(args.addr)),
        ));
    }
    let image = fs::read(&args.file)
        .map_err(|err| io_error(&format!("failed reading {}", args.file.display()), err))?;
    let words = image_words(&image);

    let engine = open_engine(&args.link.device, args.link.engine_config()?)?;
    let start = Instant::now();
    engine
        .write_words(args.addr, &words)
        .map_err(|err| engine_error("load failed", err))?;

    let verified = !args.no_verify;
    if verified {
        let back = engine
            .read_vec::<u32>(args.addr, words.len())
            .map_err(|err| engine_error("verify read failed", err))?;
        if let Some(index) = first_mismatch(&words, &back) {
            return Err(CliError::new(
                DATA_INVALID,
                format!(
                    "verify failed at {}: wrote {}, read {}",
                    hex_u32(args.addr.wrapping_add(4 * index as u32)),
                    hex_u32(words[index]),
                    hex_u32(back[index])
                ),
            ));
        }
    }
    let elapsed = start.elapsed();
    info!(
        bytes = image.len(),
        addr = format_args!("{:#010x}", args.addr),
        elapsed_ms = elapsed.as_millis() as u64,
        "image loaded"
    );
    engine.close();

    let out = LoadOutput {
        file: args.file.display().to_string(),
        address: hex_u32(args.addr),
        bytes: image.len(),
        words: words.len(),
        verified,
        elapsed_ms: (elapsed.as_secs_f64() * 1000.0 * 100.0).round() / 100.0,
    };
    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table | OutputFormat::Pretty => print_fields(
            "Image Loaded",
            &[
                ("File", out.file.clone()),
                ("Address", out.address.clone()),
                ("Bytes", out.bytes.to_string()),
                ("Words", out.words.to_string()),
                ("Verified", out.verified.to_string()),
                ("Elapsed", format!("{:.2}ms", out.elapsed_ms)),
            ],
            format,
        ),
    }
    Ok(SUCCESS)
}

/// Zero-pad an image to whole words, little-endian within each word.
fn image_words(image: &[u8]) -> Vec<u32> {
    image
        .chunks(4)
        .map(|chunk| {
            let mut bytes = [0u8; 4];
            bytes[..chunk.len()].copy_from_slice(chunk);
            u32::from_le_bytes(bytes)
        })
        .collect()
}

fn first_mismatch(expected: &[u32], actual: &[u32]) -> Option<usize> {
    expected
        .iter()
        .zip(actual)
        .position(|(want, got)| want != got)
        .or_else(|| (expected.len() != actual.len()).then(|| expected.len().min(actual.len())))
}
