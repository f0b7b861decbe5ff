//! Sample sink and diagnostic stream selection.

use crate::config::OutputTarget;
use anyhow::{Context, Result};
use lib_tunnel_ffi::LogForwarder;
use std::io::{BufWriter, Write};

/// Open the byte sink samples are written to.
///
/// The driver flushes after every sample, so a buffered file writer still
/// hands each sample to the OS before the next read.
pub fn open_sink(target: &OutputTarget) -> Result<Box<dyn Write>> {
    let sink: Box<dyn Write> = match target {
        OutputTarget::Stderr => Box::new(std::io::stderr()),
        OutputTarget::Stdout => Box::new(std::io::stdout()),
        OutputTarget::File { path } => {
            let file = std::fs::File::create(path)
                .with_context(|| format!("Failed to create output file: {:?}", path))?;
            tracing::info!("Writing samples to {:?}", path);
            Box::new(BufWriter::new(file))
        }
    };
    Ok(sink)
}

/// Build the vendor log forwarder, keeping it off the sample stream.
pub fn log_forwarder(target: &OutputTarget, max_level: i32) -> LogForwarder {
    match target {
        OutputTarget::Stdout => LogForwarder::stderr(max_level),
        _ => LogForwarder::stdout(max_level),
    }
}
