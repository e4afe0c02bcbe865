use std::io::IsTerminal;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use flexlink_frame::Width;
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct ValuesOutput<'a> {
    address: String,
    width: &'a str,
    count: usize,
    values: Vec<String>,
}

/// Words per line in pretty dumps.
const PRETTY_PER_LINE: usize = 4;

/// Print values read from consecutive addresses.
pub fn print_values(address: u32, width: Width, values: &[u32], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = ValuesOutput {
                address: hex_u32(address),
                width: width_name(width),
                count: values.len(),
                values: values.iter().map(|v| hex_value(width, *v)).collect(),
            };
            print_json(&out);
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["ADDRESS", "VALUE", "DECIMAL"]);
            for (index, value) in values.iter().enumerate() {
                table.add_row(vec![
                    hex_u32(element_address(address, width, index)),
                    hex_value(width, *value),
                    value.to_string(),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            let per_line = PRETTY_PER_LINE * 4 / width.bytes();
            for (line, chunk) in values.chunks(per_line).enumerate() {
                let cells: Vec<String> = chunk.iter().map(|v| hex_value(width, *v)).collect();
                println!(
                    "{}: {}",
                    hex_u32(element_address(address, width, line * per_line)),
                    cells.join(" ")
                );
            }
        }
    }
}

/// Print a serializable record as one JSON line.
pub fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

/// Print `(field, value)` pairs as a two-column table or aligned lines.
pub fn print_fields(title: &str, fields: &[(&str, String)], format: OutputFormat) {
    match format {
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["FIELD", "VALUE"]);
            for (name, value) in fields {
                table.add_row(vec![name.to_string(), value.clone()]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty | OutputFormat::Json => {
            println!("{title}:");
            let pad = fields.iter().map(|(name, _)| name.len()).max().unwrap_or(0) + 1;
            for (name, value) in fields {
                println!("  {:<pad$} {value}", format!("{name}:"));
            }
        }
    }
}

pub fn hex_u32(value: u32) -> String {
    format!("{value:#010x}")
}

pub fn width_name(width: Width) -> &'static str {
    match width {
        Width::Byte => "b",
        Width::Half => "h",
        Width::Word => "w",
    }
}

fn hex_value(width: Width, value: u32) -> String {
    match width {
        Width::Byte => format!("{value:#04x}"),
        Width::Half => format!("{value:#06x}"),
        Width::Word => format!("{value:#010x}"),
    }
}

fn element_address(base: u32, width: Width, index: usize) -> u32 {
    base.wrapping_add((index * width.bytes()) as u32)
}
