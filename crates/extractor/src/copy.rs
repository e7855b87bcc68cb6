//! Chunked stream copy with throttled progress and cooperative cancellation.

use crate::error::ExtractError;
use crate::types::ExtractConfig;
use std::io::{ErrorKind, Read, Write};

/// Copies a source stream into a destination one chunk at a time.
///
/// The chunk buffer is allocated once and reused for every entry of a run.
pub struct StreamCopier {
    buf: Vec<u8>,
    report_threshold: u64,
}

impl StreamCopier {
    pub fn new(chunk_size: usize, report_threshold: u64) -> Self {
        Self {
            buf: vec![0; chunk_size.max(1)],
            report_threshold,
        }
    }

    pub fn from_config(config: &ExtractConfig) -> Self {
        Self::new(config.chunk_size, config.report_threshold)
    }

    /// Copy everything left in `source` into `destination`.
    ///
    /// `on_progress` receives the running byte total whenever at least
    /// `report_threshold` bytes were copied since the previous report.
    /// `is_cancelled` is polled after every chunk; a `true` answer stops the
    /// copy with [`ExtractError::Cancelled`] and leaves the partial output in
    /// place. Neither stream is closed.
    ///
    /// Returns the number of bytes copied.
    pub fn copy<R, W, P, C>(
        &mut self,
        source: &mut R,
        destination: &mut W,
        mut on_progress: P,
        is_cancelled: C,
    ) -> Result<u64, ExtractError>
    where
        R: Read + ?Sized,
        W: Write + ?Sized,
        P: FnMut(u64),
        C: Fn() -> bool,
    {
        let mut total: u64 = 0;
        let mut last_reported: u64 = 0;

        loop {
            let n = fill_chunk(source, &mut self.buf)?;
            if n == 0 {
                break;
            }

            destination.write_all(&self.buf[..n])?;
            total += n as u64;

            if total - last_reported >= self.report_threshold {
                on_progress(total);
                last_reported = total;
            }

            if is_cancelled() {
                return Err(ExtractError::Cancelled);
            }
        }

        Ok(total)
    }
}

/// Read until `buf` is full or the source is exhausted.
///
/// Short reads from decompressors are common; filling whole chunks keeps the
/// progress cadence independent of how the source splits its data.
fn fill_chunk<R: Read + ?Sized>(source: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

impl Default for StreamCopier {
    fn default() -> Self {
        Self::from_config(&ExtractConfig::default())
    }
}
