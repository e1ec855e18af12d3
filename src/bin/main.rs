// src/bin/main.rs
use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use colored::*;
use std::fs::{File, OpenOptions};
use std::io::{self, Cursor, Write};
use std::path::PathBuf;

use cimpl_stream::{HostStream, SeekMode, StreamError, cimpl_stream_init_tracing, cimpl_stream_outstanding};

#[derive(Parser, Debug)]
#[command(name = "cimpl-stream")]
#[command(about = "Drive host I/O through the cimpl_stream callback bridge")]
struct Cli {
    /// Install the tracing subscriber (filter from CIMPL_STREAM_LOG)
    #[arg(long, short)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write text into an in-memory stream, rewind, and read it back
    Roundtrip { text: String },
    /// Copy one file into another through two bridged streams
    Copy { src: PathBuf, dst: PathBuf },
    /// Print a window of a file, read through the bridge
    Head {
        file: PathBuf,
        #[arg(long, default_value_t = 0)]
        offset: u64,
        #[arg(long, default_value_t = 64)]
        bytes: usize,
    },
}

struct StreamCli;

impl StreamCli {
    fn roundtrip(&self, text: &str) -> Result<()> {
        let mut stream = HostStream::new(Cursor::new(Vec::new()))?;

        let mut written = 0;
        while written < text.len() {
            let n = stream.write(&text.as_bytes()[written..])?;
            if n == 0 {
                return Err(anyhow!("stream accepted no bytes after {written}"));
            }
            written += n;
        }
        stream.flush()?;
        println!("✍️  wrote {} bytes", written.to_string().cyan());

        stream.seek(0, SeekMode::Start)?;
        let mut back = Vec::with_capacity(written);
        loop {
            let chunk = stream.read(16)?;
            if chunk.is_empty() {
                break;
            }
            back.extend_from_slice(&chunk);
        }

        let back = String::from_utf8_lossy(&back);
        println!("📖 read back: {}", back.green());
        if back != text {
            return Err(anyhow!("round trip mismatch"));
        }
        println!("{}", "✅ round trip ok".green());
        Ok(())
    }

    fn copy(&self, src: &PathBuf, dst: &PathBuf) -> Result<()> {
        let input = File::open(src)
            .with_context(|| format!("opening {}", src.display()))?;
        let output = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(dst)
            .with_context(|| format!("creating {}", dst.display()))?;

        let mut reader = HostStream::new(input)?;
        let mut writer = HostStream::new(output)?;
        let copied = io::copy(&mut reader, &mut writer)?;
        Write::flush(&mut writer)?;

        println!(
            "📦 copied {} bytes {} → {}",
            copied.to_string().cyan(),
            src.display(),
            dst.display()
        );
        Ok(())
    }

    fn head(&self, file: &PathBuf, offset: u64, bytes: usize) -> Result<()> {
        let handle = File::open(file)
            .with_context(|| format!("opening {}", file.display()))?;
        let mut stream = HostStream::new(handle)?;

        let size = stream.seek(0, SeekMode::End)?;
        let start = i64::try_from(offset).map_err(|_| anyhow!("offset {offset} is too large"))?;
        stream.seek(start, SeekMode::Start)?;
        let window = stream.read(bytes)?;

        println!("📄 {} ({} bytes)", file.display(), size.to_string().cyan());
        println!("  offset {offset}, showing {} bytes", window.len());
        println!("{}", "────────────────────────────────────────────────────────────".dimmed());
        println!("{}", String::from_utf8_lossy(&window));
        Ok(())
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        cimpl_stream_init_tracing();
    }

    let app = StreamCli;
    let outcome = match &cli.command {
        Commands::Roundtrip { text } => app.roundtrip(text),
        Commands::Copy { src, dst } => app.copy(src, dst),
        Commands::Head { file, offset, bytes } => app.head(file, *offset, *bytes),
    };

    if let Err(e) = &outcome {
        if let Some(stream_err) = e.downcast_ref::<StreamError>() {
            eprintln!("{} {} (code {})", "❌".red(), stream_err, stream_err.code().as_i32());
        }
    }

    let leaked = cimpl_stream_outstanding();
    if leaked > 0 {
        eprintln!("{}", format!("⚠️  {leaked} bridge allocations not freed").yellow());
    }

    outcome
}
