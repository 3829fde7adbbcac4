//! Transparent decompression for compressed event logs.
//!
//! Spark writes `spark.eventLog.compress`-ed logs with the codec as file
//! extension. gzip and zstd are decoded in a streaming fashion; the
//! decompressed text is never materialized as a whole.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use flate2::read::MultiGzDecoder;

use crate::error::{PipelineError, Result};

/// Read buffer for decoder output.
const DECODE_BUFFER: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    Plain,
    Gzip,
    Zstd,
}

impl Codec {
    /// Pick the codec from the file extension.
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());

        match ext.as_deref() {
            Some("gz") | Some("gzip") => Ok(Codec::Gzip),
            Some("zst") | Some("zstd") => Ok(Codec::Zstd),
            Some("lz4") | Some("lzf") | Some("snappy") => Err(PipelineError::InvalidInput {
                path: path.to_path_buf(),
                reason: format!(
                    "unsupported event log codec '{}' (supported: gzip, zstd, uncompressed)",
                    ext.unwrap_or_default()
                ),
            }),
            _ => Ok(Codec::Plain),
        }
    }

    pub fn is_compressed(self) -> bool {
        self != Codec::Plain
    }
}

/// Open `path` as a line reader, decompressing on the fly.
pub fn open_reader(path: &Path, codec: Codec) -> Result<Box<dyn BufRead + Send>> {
    let file = File::open(path)?;
    let reader: Box<dyn BufRead + Send> = match codec {
        Codec::Plain => Box::new(BufReader::with_capacity(DECODE_BUFFER, file)),
        Codec::Gzip => Box::new(BufReader::with_capacity(
            DECODE_BUFFER,
            MultiGzDecoder::new(file),
        )),
        Codec::Zstd => Box::new(BufReader::with_capacity(
            DECODE_BUFFER,
            zstd::stream::read::Decoder::new(file)?,
        )),
    };
    Ok(reader)
}
