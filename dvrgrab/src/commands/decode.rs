use anyhow::{Context, Result};
use clap::Args;
use log::info;
use std::{
    fs::File,
    io::{BufReader, BufWriter},
    path::PathBuf,
};
use ts_envelope::EnvelopeDecoder;

/// Decrypt an already-downloaded envelope into a transport stream.
#[derive(Debug, Args)]
pub struct Decode {
    /// Input envelope file.
    #[arg(required = true)]
    input: PathBuf,

    /// Media access key the recording was encrypted under.
    #[arg(short, long)]
    mak: String,

    /// Output path. Defaults to the input with a .ts extension.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Print the envelope's metadata chunks to stdout.
    #[arg(long)]
    dump_metadata: bool,
}

impl Decode {
    pub fn execute(self) -> Result<()> {
        let output = self
            .output
            .unwrap_or_else(|| self.input.with_extension("ts"));

        let input = BufReader::new(
            File::open(&self.input)
                .with_context(|| format!("couldn't open {}", self.input.display()))?,
        );
        let mut outfile = BufWriter::new(File::create(&output)?);

        let summary = EnvelopeDecoder::new(&self.mak)
            .decode(input, &mut outfile)
            .context("problem decoding the recording")?;

        if self.dump_metadata {
            for chunk in &summary.chunks {
                println!("{}", String::from_utf8_lossy(&chunk.payload));
            }
        }

        info!(
            "Decoded {} chunk(s) and {} stream byte(s) to {}",
            summary.chunks.len(),
            summary.stream_bytes,
            output.display()
        );

        Ok(())
    }
}
