use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use super::error::EvtFileError;
use super::ring_item::RingItem;

/// A single NSCLDAQ .evt file, read one ring item at a time
#[derive(Debug)]
pub struct EvtFile {
    reader: BufReader<File>,
    path: PathBuf,
    size_bytes: u64,
    is_eof: bool,
}

impl EvtFile {
    pub fn new(path: &Path) -> Result<Self, EvtFileError> {
        if !path.exists() {
            return Err(EvtFileError::BadFilePath(path.to_path_buf()));
        }
        let file = File::open(path)?;
        let size_bytes = file.metadata()?.len();
        Ok(Self {
            reader: BufReader::new(file),
            path: path.to_path_buf(),
            size_bytes,
            is_eof: size_bytes == 0,
        })
    }

    /// Get the next ring item, or `EvtFileError::EndOfFile` once the file is exhausted
    pub fn get_next_item(&mut self) -> Result<RingItem, EvtFileError> {
        if self.is_eof {
            return Err(EvtFileError::EndOfFile);
        }
        match RingItem::read_from(&mut self.reader)? {
            Some(ring) => Ok(ring),
            None => {
                self.is_eof = true;
                Err(EvtFileError::EndOfFile)
            }
        }
    }

    pub fn is_eof(&self) -> bool {
        self.is_eof
    }

    pub fn get_size_bytes(&self) -> u64 {
        self.size_bytes
    }

    pub fn get_filename(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ring_item;
    use std::io::Write;

    #[test]
    fn test_file_reads_until_eof() {
        let path =
            std::env::temp_dir().join(format!("hit_builder_evt_file_{}.evt", std::process::id()));
        let item = ring_item(30, None, &[4, 5]);
        std::fs::File::create(&path).unwrap().write_all(&item).unwrap();

        let mut file = EvtFile::new(&path).unwrap();
        assert_eq!(file.get_filename(), path.as_path());
        assert_eq!(file.get_size_bytes(), item.len() as u64);
        assert_eq!(file.get_next_item().unwrap().body, vec![4, 5]);
        assert!(matches!(file.get_next_item(), Err(EvtFileError::EndOfFile)));
        assert!(file.is_eof());
        std::fs::remove_file(&path).unwrap();
    }
}
