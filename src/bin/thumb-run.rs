use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use thumb_rs::sim::{Halt, Snapshot};
use thumb_rs::{Diagnostic, SimConfig, Simulator};

#[derive(Copy, Clone, Debug, ValueEnum)]
enum Format {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Assemble a Thumb source file and run it on the thumb-rs simulator"
)]
struct Opts {
    #[arg(value_name = "SOURCE")]
    input: PathBuf,
    /// Simulator configuration (JSON); defaults apply to missing fields
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, default_value_t = 10_000_000)]
    max_steps: u64,
    /// Breakpoint: label, hex address or `line:N` (repeatable)
    #[arg(long = "break", value_name = "WHERE")]
    breaks: Vec<String>,
    /// Keep running even when header directives are missing
    #[arg(long)]
    force: bool,
    #[arg(long, value_enum, default_value_t = Format::Text)]
    format: Format,
}

#[derive(Serialize)]
struct Report<'a> {
    diagnostics: &'a [Diagnostic],
    halt: &'a Halt,
    registers: Snapshot,
}

fn parse_addr(sim: &Simulator, s: &str) -> Result<u32> {
    if let Some(addr) = sim.labels().addr_of(s) {
        return Ok(addr);
    }
    let digits = s.trim_start_matches("0x").trim_start_matches('$');
    u32::from_str_radix(digits, 16).with_context(|| format!("bad breakpoint \"{s}\""))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();
    let cfg: SimConfig = match &opts.config {
        Some(path) => {
            let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?
        }
        None => SimConfig::default(),
    };
    let src = std::fs::read_to_string(&opts.input).with_context(|| format!("reading {}", opts.input.display()))?;

    let mut sim = Simulator::new(cfg)?;
    let assembly = sim.assemble(&src);
    if matches!(opts.format, Format::Text) {
        for d in &assembly.diagnostics {
            eprintln!("{}:{d}", opts.input.display());
        }
    }
    if assembly.segments.is_empty() {
        bail!("assembly failed");
    }
    if !assembly.ok && !opts.force {
        bail!("assembly incomplete; use --force to run anyway");
    }

    for b in &opts.breaks {
        match b.strip_prefix("line:") {
            Some(n) => {
                sim.set_breakpoint_line(n.parse().with_context(|| format!("bad line \"{n}\""))?)?;
            }
            None => {
                let addr = parse_addr(&sim, b)?;
                sim.set_breakpoint(addr);
            }
        }
    }

    let halt = sim.run_until_halt(opts.max_steps);
    match opts.format {
        Format::Text => {
            match &halt {
                Halt::Breakpoint { pc } => println!("breakpoint at {pc:08x}"),
                Halt::Trap(t) => println!("{t}"),
                Halt::Stopped => println!("stopped"),
                Halt::StepLimit => println!("step limit ({}) reached", opts.max_steps),
            }
            println!("{}", sim.snapshot());
        }
        Format::Json => {
            let report = Report { diagnostics: &assembly.diagnostics, halt: &halt, registers: sim.snapshot() };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    Ok(())
}
