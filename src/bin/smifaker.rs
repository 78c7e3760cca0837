//! smifaker - stands in for `nvidia-smi -q -x` inside test pods
//!
//! Serves a canned diagnostic document on stdout so clusters without real
//! GPUs can exercise the full discovery pipeline. Point the controller's
//! exec at a container whose `nvidia-smi` is a shim invoking this binary.

use std::io::Write;
use std::path::PathBuf;

use clap::Parser;

use gpuscout::faker::{self, FakeSmi};

#[derive(Parser, Debug)]
#[command(name = "smifaker", version, about, long_about = None)]
struct Cli {
    /// Path to the XML document to serve
    #[arg(
        short = 'f',
        long = "file",
        env = "SMIFAKER_CONTENT_PATH",
        default_value = "/data/nvidia-smi.xml"
    )]
    file: PathBuf,

    /// Synthesize a document instead of reading one: number of chassis
    /// (0 = chassis-less host)
    #[arg(long)]
    chassis: Option<usize>,

    /// GPUs per chassis when synthesizing
    #[arg(long, default_value_t = 8)]
    gpus: usize,
}

fn main() {
    let cli = Cli::parse();

    let xml = match cli.chassis {
        Some(chassis) => faker::synthesize(chassis, cli.gpus),
        None => match FakeSmi::from_file(&cli.file) {
            Ok(fake) => fake.content().to_string(),
            Err(err) => {
                eprintln!("smifaker: {err}");
                std::process::exit(2);
            }
        },
    };

    if let Err(err) = std::io::stdout().write_all(xml.as_bytes()) {
        eprintln!("smifaker: failed to write to stdout: {err}");
        std::process::exit(1);
    }
}
