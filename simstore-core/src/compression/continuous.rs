use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};
use tracing::{debug, warn};

use crate::compression::{CompressedRead, CompressedWrite, OpenMode};
use crate::core::errors::{Result, SimStoreError};

const OUTPUT_CHUNK: usize = 64 * 1024;
const INPUT_CHUNK: usize = 64 * 1024;

/// zlib stream writer. Each session appends one complete frame.
pub struct ContinuousWriter {
    path: PathBuf,
    sink: Option<BufWriter<File>>,
    compress: Compress,
    buffer: Vec<u8>,
    threshold: usize,
    out: Vec<u8>,
}

impl ContinuousWriter {
    pub fn open(path: &Path, threshold: usize, mode: OpenMode) -> Result<Self> {
        let mut options = OpenOptions::new();
        options.create(true);
        match mode {
            OpenMode::Create => options.write(true).truncate(true),
            OpenMode::Append => options.append(true),
        };
        let file = options
            .open(path)
            .map_err(|e| SimStoreError::io(format!("open {}", path.display()), e))?;

        Ok(ContinuousWriter {
            path: path.to_path_buf(),
            sink: Some(BufWriter::new(file)),
            compress: Compress::new(Compression::default(), true),
            buffer: Vec::with_capacity(threshold.min(OUTPUT_CHUNK * 16)),
            threshold: threshold.max(1),
            out: Vec::with_capacity(OUTPUT_CHUNK),
        })
    }

    fn ensure_open(&self) -> Result<()> {
        if self.sink.is_none() {
            return Err(SimStoreError::HandleClosed(format!(
                "zlib writer {}",
                self.path.display()
            )));
        }
        Ok(())
    }

    /// Run the compressor over `input`, writing everything it emits.
    fn deflate(&mut self, mut input: &[u8], finish: bool) -> Result<()> {
        let flush = if finish {
            FlushCompress::Finish
        } else {
            FlushCompress::None
        };
        let sink = self
            .sink
            .as_mut()
            .ok_or_else(|| SimStoreError::HandleClosed("zlib writer".to_string()))?;

        loop {
            self.out.clear();
            let before = self.compress.total_in();
            let status = self.compress.compress_vec(input, &mut self.out, flush)?;
            let consumed = (self.compress.total_in() - before) as usize;
            input = &input[consumed..];

            sink.write_all(&self.out)
                .map_err(|e| SimStoreError::io(format!("write {}", self.path.display()), e))?;

            match status {
                Status::StreamEnd => return Ok(()),
                Status::BufError if !finish => return Ok(()),
                _ => {}
            }
            let output_full = self.out.len() == self.out.capacity();
            if !finish && input.is_empty() && !output_full {
                return Ok(());
            }
            if finish && consumed == 0 && self.out.is_empty() {
                return Err(SimStoreError::Compression {
                    code: crate::core::errors::ErrorCode::CompressionFailed,
                    message: format!("zlib finish stalled for {}", self.path.display()),
                });
            }
        }
    }
}

impl CompressedWrite for ContinuousWriter {
    fn write(&mut self, mut bytes: &[u8]) -> Result<()> {
        self.ensure_open()?;
        while !bytes.is_empty() {
            let room = self.threshold - self.buffer.len();
            let take = room.min(bytes.len());
            self.buffer.extend_from_slice(&bytes[..take]);
            bytes = &bytes[take..];
            if self.buffer.len() >= self.threshold {
                self.flush()?;
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.ensure_open()?;
        if self.buffer.is_empty() {
            return Ok(());
        }
        let buffer = std::mem::take(&mut self.buffer);
        let result = self.deflate(&buffer, false);
        self.buffer = buffer;
        self.buffer.clear();
        result
    }

    fn close(&mut self) -> Result<()> {
        self.flush()?;
        self.deflate(&[], true)?;

        if let Some(mut sink) = self.sink.take() {
            sink.flush()
                .map_err(|e| SimStoreError::io(format!("flush {}", self.path.display()), e))?;
            let file = sink
                .into_inner()
                .map_err(|e| SimStoreError::io(format!("flush {}", self.path.display()), e.into_error()))?;
            file.sync_all()
                .map_err(|e| SimStoreError::io(format!("sync {}", self.path.display()), e))?;
        }
        debug!(
            "Closed zlib stream {} ({} bytes in, {} bytes out)",
            self.path.display(),
            self.compress.total_in(),
            self.compress.total_out()
        );
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.sink.is_none()
    }
}

impl Drop for ContinuousWriter {
    fn drop(&mut self) {
        if self.sink.is_some() {
            if let Err(e) = self.close() {
                warn!("Dropping unclosed zlib writer {}: {}", self.path.display(), e);
            }
        }
    }
}

/// zlib stream reader that walks across concatenated frames.
pub struct ContinuousReader {
    path: PathBuf,
    source: Option<File>,
    input: Vec<u8>,
    in_pos: usize,
    in_len: usize,
    decompress: Decompress,
    frame_open: bool,
    eof: bool,
}

impl ContinuousReader {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .map_err(|e| SimStoreError::io(format!("open {}", path.display()), e))?;
        Ok(ContinuousReader {
            path: path.to_path_buf(),
            source: Some(file),
            input: vec![0u8; INPUT_CHUNK],
            in_pos: 0,
            in_len: 0,
            decompress: Decompress::new(true),
            frame_open: false,
            eof: false,
        })
    }

    fn refill(&mut self) -> Result<()> {
        let source = self
            .source
            .as_mut()
            .ok_or_else(|| SimStoreError::HandleClosed(format!("zlib reader {}", self.path.display())))?;
        self.in_len = source
            .read(&mut self.input)
            .map_err(|e| SimStoreError::io(format!("read {}", self.path.display()), e))?;
        self.in_pos = 0;
        if self.in_len == 0 {
            self.eof = true;
        }
        Ok(())
    }
}

impl CompressedRead for ContinuousReader {
    fn read_into(&mut self, n: usize, out: &mut Vec<u8>) -> Result<usize> {
        if self.source.is_none() {
            return Err(SimStoreError::HandleClosed(format!(
                "zlib reader {}",
                self.path.display()
            )));
        }
        let start = out.len();
        let target = start + n;

        while out.len() < target {
            if self.in_pos == self.in_len && !self.eof {
                self.refill()?;
            }
            if self.in_pos == self.in_len && self.eof && !self.frame_open {
                break;
            }

            let filled = out.len();
            out.resize(target, 0);
            let before_in = self.decompress.total_in();
            let before_out = self.decompress.total_out();
            let status = self.decompress.decompress(
                &self.input[self.in_pos..self.in_len],
                &mut out[filled..],
                FlushDecompress::None,
            );
            let consumed = (self.decompress.total_in() - before_in) as usize;
            let produced = (self.decompress.total_out() - before_out) as usize;
            out.truncate(filled + produced);

            let status = status.map_err(|e| SimStoreError::corrupted(&self.path, e.to_string()))?;
            self.in_pos += consumed;
            if consumed > 0 {
                self.frame_open = true;
            }

            match status {
                Status::StreamEnd => {
                    // next frame, if any, starts right after this one
                    self.decompress.reset(true);
                    self.frame_open = false;
                }
                _ if consumed == 0 && produced == 0 => {
                    if self.eof && self.in_pos == self.in_len {
                        return Err(SimStoreError::corrupted(&self.path, "truncated zlib frame"));
                    }
                    if self.in_pos < self.in_len {
                        return Err(SimStoreError::corrupted(&self.path, "zlib decoder made no progress"));
                    }
                }
                _ => {}
            }
        }

        Ok(out.len() - start)
    }

    fn close(&mut self) {
        self.source = None;
    }
}
