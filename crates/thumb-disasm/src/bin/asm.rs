use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use std::fs;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use thumb_disasm::label_pairs;
use thumb_rs::asm::{assemble_with, AsmLayout, DATA_START, TEXT_START};

#[derive(Copy, Clone, Debug, ValueEnum)]
enum Format {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Thumb (Cortex-M0 subset) assembler")]
struct Opts {
    /// Input assembly file (one instruction or directive per line)
    #[arg(short, long)]
    input: PathBuf,
    /// Output directory; one `<stem>_<origin>.bin` per segment
    #[arg(short, long, default_value = ".")]
    out_dir: PathBuf,
    /// Start of `.text`
    #[arg(long, default_value_t = TEXT_START)]
    text_start: u32,
    /// Start of `.data`
    #[arg(long, default_value_t = DATA_START)]
    data_start: u32,
    /// Print an address/bytes/source listing
    #[arg(long)]
    listing: bool,
    /// Export labels to JSON (Vec<{ addr, name }>)
    #[arg(long, value_name = "FILE")]
    labels_out: Option<PathBuf>,
    /// Fail when header directives are missing
    #[arg(long)]
    strict: bool,
    /// Diagnostics format
    #[arg(long, value_enum, default_value_t = Format::Text)]
    format: Format,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();
    let src = fs::read_to_string(&opts.input).with_context(|| format!("reading {}", opts.input.display()))?;
    let layout = AsmLayout { text_start: opts.text_start, data_start: opts.data_start };

    let program = match assemble_with(&src, &layout) {
        Ok(p) => p,
        Err(e) => {
            match opts.format {
                Format::Text => eprintln!("{}:{}", opts.input.display(), e.diagnostic()),
                Format::Json => println!("{}", serde_json::to_string_pretty(&[e.diagnostic()])?),
            }
            bail!("assembly failed");
        }
    };
    match opts.format {
        Format::Text => {
            for d in &program.diagnostics {
                eprintln!("{}:{d}", opts.input.display());
            }
        }
        Format::Json => println!("{}", serde_json::to_string_pretty(&program.diagnostics)?),
    }
    if opts.strict && !program.is_complete() {
        bail!("missing header directives");
    }

    let stem = opts.input.file_stem().and_then(|s| s.to_str()).unwrap_or("out");
    fs::create_dir_all(&opts.out_dir)?;
    for seg in &program.segments {
        let path = opts.out_dir.join(format!("{stem}_{:08x}.bin", seg.origin));
        fs::write(&path, &seg.bytes).with_context(|| format!("writing {}", path.display()))?;
        eprintln!("{:?} {:08x}..{:08x} -> {}", seg.kind, seg.origin, seg.end(), path.display());
    }
    if let Some(path) = &opts.labels_out {
        fs::write(path, serde_json::to_string_pretty(&label_pairs(&program.labels))?)?;
    }
    if opts.listing {
        print!("{}", program.render_listing());
    }
    Ok(())
}
