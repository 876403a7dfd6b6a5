//! Where response bytes go: the in-memory buffer pair or a resumable file.
//!
//! # Design
//! `Sink` is an enum so a connection can never write to memory and to a file
//! at the same time. `DestinationFile` keeps the size the file had when it
//! was last opened; that size is the resume checkpoint, so no metadata file
//! is needed.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::buffer::TransferBuffers;

#[derive(Debug, Default)]
pub enum Sink {
    /// Nothing to write into yet: the request has not been sent.
    #[default]
    Unset,
    Memory(TransferBuffers),
    File(DestinationFile),
}

impl Sink {
    pub fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        match self {
            Sink::Unset => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "response sink is not open",
            )),
            Sink::Memory(buffers) => {
                buffers.append(bytes);
                Ok(())
            }
            Sink::File(file) => file.write(bytes),
        }
    }

    /// Release the file handle, if any. Buffered memory stays readable.
    pub fn close(&mut self) -> io::Result<()> {
        match self {
            Sink::File(file) => file.close(),
            _ => Ok(()),
        }
    }

    pub fn buffers_mut(&mut self) -> Option<&mut TransferBuffers> {
        match self {
            Sink::Memory(buffers) => Some(buffers),
            _ => None,
        }
    }

    pub fn buffered_len(&self) -> usize {
        match self {
            Sink::Memory(buffers) => buffers.len(),
            _ => 0,
        }
    }
}

/// A destination file opened for appending.
#[derive(Debug)]
pub struct DestinationFile {
    path: PathBuf,
    resume: bool,
    file: Option<File>,
    existing_len: u64,
}

impl DestinationFile {
    /// Open `path` for appending. In resume mode existing content is kept and
    /// its length recorded; otherwise the file starts out empty.
    pub fn open(path: impl Into<PathBuf>, resume: bool) -> io::Result<Self> {
        let mut dst = Self {
            path: path.into(),
            resume,
            file: None,
            existing_len: 0,
        };
        dst.reopen()?;
        Ok(dst)
    }

    fn reopen(&mut self) -> io::Result<()> {
        let mut existing_len = match fs::metadata(&self.path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => 0,
            Err(e) => return Err(e),
        };
        if existing_len > 0 && !self.resume {
            fs::remove_file(&self.path)?;
            existing_len = 0;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.file = Some(file);
        self.existing_len = existing_len;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn resume(&self) -> bool {
        self.resume
    }

    /// Bytes that were already on disk when the file was last opened.
    pub fn existing_len(&self) -> u64 {
        self.existing_len
    }

    #[cfg(test)]
    fn is_open(&self) -> bool {
        self.file.is_some()
    }

    pub fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.write_all(bytes),
            None => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "destination file is closed",
            )),
        }
    }

    pub fn close(&mut self) -> io::Result<()> {
        match self.file.take() {
            Some(mut file) => file.flush(),
            None => Ok(()),
        }
    }

    /// Close and delete the file.
    pub fn remove(&mut self) -> io::Result<()> {
        self.close()?;
        self.existing_len = 0;
        match fs::remove_file(&self.path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }

    /// Throw away the partial content and start again from an empty file.
    pub fn restart(&mut self) -> io::Result<()> {
        self.remove()?;
        self.reopen()
    }
}
