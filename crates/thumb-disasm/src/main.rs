use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use std::fmt::Write as _;
use std::path::Path;

use thumb_rs::disasm::{decode_range, disassemble, target_of, DisasmLine};
use thumb_rs::labels::LabelTable;
use thumb_rs::isa::thumb::ThumbDecoder;

use thumb_disasm::{label_pairs, label_table, load_raw_bin, LabelKV};

#[derive(Parser, Debug)]
#[command(author, version, about = "Thumb (Cortex-M0) disassembler CLI", long_about = None)]
struct Cli {
    /// Load address for the binary in target address space
    #[arg(long, default_value = "0x08000300", value_parser = parse_u32)]
    base: u32,
    /// Skip N bytes at start of file before loading
    #[arg(long, default_value_t = 0usize)]
    skip: usize,
    /// Input binary path
    #[arg(value_name = "BINFILE")]
    input: String,
    /// Limit bytes loaded (default: to EOF after --skip)
    #[arg(long)]
    len: Option<usize>,
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List loaded sections (a single section for raw .bin)
    Sections,
    /// Disassemble a range [start, end) in bytes
    Range {
        /// Start address (hex or dec); defaults to --base
        #[arg(value_parser = parse_u32)]
        start: Option<u32>,
        /// End address (hex or dec, exclusive); defaults to the end of the image
        #[arg(value_parser = parse_u32)]
        end: Option<u32>,
        /// Show instruction halfwords
        #[arg(long)]
        show_bytes: bool,
        /// Name unlabeled branch and literal targets `loc_XXXXXXXX`
        #[arg(long)]
        auto_labels: bool,
        /// Output format: text or json
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
        /// Import labels from JSON (Vec<{ addr, name }>)
        #[arg(long, value_name = "FILE")]
        labels_in: Option<String>,
        /// Export labels to JSON (Vec<{ addr, name }>)
        #[arg(long, value_name = "FILE")]
        labels_out: Option<String>,
        /// Write output to file instead of stdout
        #[arg(long, value_name = "FILE")]
        out: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

fn parse_u32(s: &str) -> Result<u32> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Ok(u32::from_str_radix(hex, 16)?)
    } else {
        Ok(s.parse::<u32>()?)
    }
}

fn read_labels(path: &str) -> Result<Vec<LabelKV>> {
    let txt = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&txt)?)
}

fn render_text(lines: &[DisasmLine], labels: &LabelTable, show_bytes: bool) -> Result<String, std::fmt::Error> {
    let mut buf = String::new();
    for line in lines {
        if let Some(name) = labels.name_at(line.addr) {
            writeln!(buf, "{name}:")?;
        }
        if show_bytes {
            writeln!(buf, "  {:08x}: {line}", line.addr)?;
        } else {
            writeln!(buf, "  {:08x}: {}", line.addr, line.text)?;
        }
    }
    Ok(buf)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut img = load_raw_bin(Path::new(&cli.input), cli.base, cli.skip, cli.len)?;

    match cli.cmd {
        Command::Sections => {
            println!("{:<10} {:<10} {:<10} {:<6} {:<6}", "name", "start", "end", "perms", "kind");
            for s in &img.sections {
                println!("{:<10} {:08x}   {:08x}   {:<6} {:<6}", s.name, s.base, s.end(), s.perms, s.kind);
            }
        }
        Command::Range { start, end, show_bytes, auto_labels, format, labels_in, labels_out, out } => {
            let img_end = img.sections.iter().map(|s| s.end()).max().unwrap_or(cli.base);
            let start = start.unwrap_or(cli.base);
            let end = end.unwrap_or(img_end);
            anyhow::ensure!(end >= start, "end must be >= start");

            let mut pairs = match &labels_in {
                Some(path) => read_labels(path)?,
                None => Vec::new(),
            };
            let dec = ThumbDecoder::new();
            if auto_labels {
                for (addr, d) in decode_range(&mut img, &dec, start, end - start) {
                    if let Some(t) = target_of(&d.instr, addr) {
                        if img.is_mapped(t) && !pairs.iter().any(|kv| kv.addr == t) {
                            pairs.push(LabelKV { addr: t, name: format!("loc_{t:08x}") });
                        }
                    }
                }
            }
            let labels = label_table(&pairs);
            let lines = disassemble(&mut img, &dec, start, end - start, Some(&labels));

            let buf = match format {
                OutputFormat::Json => serde_json::to_string_pretty(&lines)? + "\n",
                OutputFormat::Text => render_text(&lines, &labels, show_bytes)?,
            };
            if let Some(path) = &labels_out {
                std::fs::write(path, serde_json::to_string_pretty(&label_pairs(&labels))?)?;
            }
            if let Some(path) = out {
                std::fs::write(path, buf)?;
            } else {
                print!("{buf}");
            }
        }
    }

    Ok(())
}
