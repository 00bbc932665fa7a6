//! Single-file snapshot persistence.
//!
//! Every save rewrites the whole file; there is no journaling.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct FileOperator {
    path: PathBuf,
    file: Option<File>,
}

impl FileOperator {
    /// Opens (creating if needed) the snapshot file for reading and writing.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        Ok(Self {
            path,
            file: Some(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn file(&mut self) -> io::Result<&mut File> {
        self.file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "snapshot file is closed"))
    }

    /// Truncates the file and rewinds to the start.
    pub fn clear(&mut self) -> io::Result<()> {
        let file = self.file()?;
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        Ok(())
    }

    /// Whole file contents.
    pub fn load(&mut self) -> io::Result<Vec<u8>> {
        let file = self.file()?;
        file.seek(SeekFrom::Start(0))?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        Ok(data)
    }

    /// Replaces the file contents with `data`.
    pub fn save(&mut self, data: &[u8]) -> io::Result<()> {
        self.clear()?;
        let file = self.file()?;
        file.write_all(data)?;
        file.flush()?;
        Ok(())
    }

    /// Syncs and releases the handle. Later calls fail with `NotConnected`;
    /// closing twice is a no-op.
    pub fn close(&mut self) -> io::Result<()> {
        match self.file.take() {
            Some(file) => file.sync_all(),
            None => Ok(()),
        }
    }
}
