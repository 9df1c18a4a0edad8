use super::error::{EvtFileError, EvtStackError};
use super::evt_file::EvtFile;
use super::ring_item::RingItem;

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

/// The raw event source for one run.
///
/// NSCLDAQ .evt files are split every 2.0GB for legacy reasons. The stack is the collection of
/// all segments of a run, read in order as if they were one file.
#[derive(Debug)]
pub struct EvtStack {
    file_stack: VecDeque<PathBuf>,
    active_file: EvtFile,
    total_stack_size_bytes: u64,
    bytes_read: u64,
    is_ended: bool,
}

impl EvtStack {
    /// Create a new EvtStack for a given NSCLDAQ run directory
    pub fn new(path: &Path) -> Result<Self, EvtStackError> {
        let (mut stack, bytes) = Self::get_file_stack(path)?;
        if let Some(file_path) = stack.pop_front() {
            Ok(EvtStack {
                file_stack: stack,
                active_file: EvtFile::new(&file_path)?,
                total_stack_size_bytes: bytes,
                bytes_read: 0,
                is_ended: false,
            })
        } else {
            Err(EvtStackError::NoMatchingFiles)
        }
    }

    /// Get the next ring item in the file stack
    ///
    /// Returns a `Result<Option<RingItem>>`. The Option is None if the stack has
    /// no more data.
    pub fn get_next_ring_item(&mut self) -> Result<Option<RingItem>, EvtStackError> {
        loop {
            if self.is_ended {
                return Ok(None);
            }

            match self.active_file.get_next_item() {
                Ok(ring) => {
                    self.bytes_read += ring.size as u64;
                    return Ok(Some(ring));
                }
                Err(EvtFileError::EndOfFile) => {
                    self.move_to_next_file()?;
                }
                Err(e) => return Err(EvtStackError::FileError(e)),
            };
        }
    }

    pub fn get_total_stack_size_bytes(&self) -> u64 {
        self.total_stack_size_bytes
    }

    pub fn get_bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Get all of the associated .evt files and put them in the stack
    fn get_file_stack(parent_path: &Path) -> Result<(VecDeque<PathBuf>, u64), EvtStackError> {
        let mut file_list: Vec<PathBuf> = Vec::new();
        let start_pattern = "run-";
        let end_pattern = ".evt";
        for item in parent_path.read_dir()? {
            let item_path = item?.path();
            let name = match item_path.file_name() {
                Some(name) => name.to_string_lossy().into_owned(),
                None => continue,
            };
            if name.starts_with(start_pattern) && name.ends_with(end_pattern) {
                file_list.push(item_path);
            }
        }

        if file_list.is_empty() {
            return Err(EvtStackError::NoMatchingFiles);
        }

        let mut total_stack_size_bytes = 0;
        for path in file_list.iter() {
            total_stack_size_bytes += path.metadata()?.len();
        }

        file_list.sort(); // Can sort standard. The only change should be the number at the tail.
        let stack = file_list.into();

        Ok((stack, total_stack_size_bytes))
    }

    ///Move to the next file in the stack
    fn move_to_next_file(&mut self) -> Result<(), EvtStackError> {
        loop {
            if let Some(next_file_path) = self.file_stack.pop_front() {
                let next_file = EvtFile::new(&next_file_path)?;
                if !next_file.is_eof() {
                    spdlog::info!(
                        "Moving to evt file {} ({})",
                        next_file.get_filename().display(),
                        human_bytes::human_bytes(next_file.get_size_bytes() as f64)
                    );
                    self.active_file = next_file;
                    return Ok(());
                }
            } else {
                self.is_ended = true;
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring_item::RingType;
    use crate::testing::ring_item;
    use std::io::Write;

    #[test]
    fn test_segments_read_in_order() {
        let dir = std::env::temp_dir().join(format!("hit_builder_evt_stack_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let segments = [
            ("run-0007-01.evt", vec![ring_item(30, None, &[2])]),
            ("run-0007-00.evt", vec![ring_item(1, None, &[0; 97]), ring_item(30, None, &[1])]),
            ("run-0007-02.evt", vec![]),
            ("notes.txt", vec![ring_item(30, None, &[9])]),
        ];
        for (name, items) in segments.iter() {
            let mut file = std::fs::File::create(dir.join(name)).unwrap();
            for item in items {
                file.write_all(item).unwrap();
            }
        }

        let mut stack = EvtStack::new(&dir).unwrap();
        let mut seen = Vec::new();
        while let Some(ring) = stack.get_next_ring_item().unwrap() {
            seen.push((ring.ring_type, ring.body.first().copied()));
        }
        std::fs::remove_dir_all(&dir).unwrap();

        assert_eq!(
            seen,
            vec![
                (RingType::BeginRun, Some(0)),
                (RingType::Physics, Some(1)),
                (RingType::Physics, Some(2)),
            ]
        );
        assert_eq!(stack.get_bytes_read(), stack.get_total_stack_size_bytes());
    }
}
