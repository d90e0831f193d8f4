use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use super::error::CaptureFileError;
use super::packet::{PacketHeader, PacketLayout};

/// A single capture (.dat) file of back-to-back packet records.
///
/// The layout is read from the first record when the file is opened; every block read later is
/// a whole number of records of that layout.
#[derive(Debug)]
pub struct CaptureFile {
    file_handle: BufReader<File>,
    file_path: PathBuf,
    size_bytes: u64,
    layout: PacketLayout,
    is_eof: bool,
}

impl CaptureFile {
    /// Open a capture file and peek at its first record
    pub fn new(path: &Path) -> Result<Self, CaptureFileError> {
        if !path.exists() {
            return Err(CaptureFileError::BadFilePath(path.to_path_buf()));
        }
        let file = File::open(path)?;
        let size_bytes = file.metadata()?.len();
        let mut file_handle = BufReader::new(file);

        let mut lead = [0u8; 8];
        if size_bytes < lead.len() as u64 {
            return Err(CaptureFileError::EmptyFile(path.to_path_buf()));
        }
        file_handle.read_exact(&mut lead)?;
        let layout = PacketLayout::peek(&lead)?;
        file_handle.seek(SeekFrom::Start(0))?;

        Ok(Self {
            file_handle,
            file_path: path.to_path_buf(),
            size_bytes,
            layout,
            is_eof: false,
        })
    }

    pub fn layout(&self) -> &PacketLayout {
        &self.layout
    }

    pub fn get_filename(&self) -> &Path {
        &self.file_path
    }

    pub fn get_size_bytes(&self) -> u64 {
        self.size_bytes
    }

    /// Number of whole records in the file
    pub fn packet_count(&self) -> u64 {
        self.size_bytes / self.layout.packet_len() as u64
    }

    pub fn is_eof(&self) -> bool {
        self.is_eof
    }

    /// Drop a trailing partial record left by an interrupted capture
    fn trim_partial_record(&self, buffer: &mut Vec<u8>) {
        let tail = buffer.len() % self.layout.packet_len();
        if tail != 0 {
            log::warn!(
                "{} ends with a partial record; ignoring the last {} bytes",
                self.file_path.display(),
                tail
            );
            buffer.truncate(buffer.len() - tail);
        }
    }

    /// Read the next block of at most `budget` bytes, rounded down to whole records.
    ///
    /// Returns None at end of file. A trailing partial record is dropped with a warning.
    pub fn read_block(&mut self, budget: usize) -> Result<Option<Vec<u8>>, CaptureFileError> {
        if self.is_eof {
            return Ok(None);
        }
        let block_size = self.layout.align_block_size(budget);
        let mut buffer = Vec::with_capacity(block_size);
        self.file_handle
            .by_ref()
            .take(block_size as u64)
            .read_to_end(&mut buffer)?;
        if buffer.len() < block_size {
            self.is_eof = true;
            self.trim_partial_record(&mut buffer);
        }
        if buffer.is_empty() {
            Ok(None)
        } else {
            Ok(Some(buffer))
        }
    }

    /// Read the whole remaining file, whole records only
    pub fn read_all(&mut self) -> Result<Vec<u8>, CaptureFileError> {
        let mut buffer = Vec::with_capacity(self.size_bytes as usize);
        self.file_handle.read_to_end(&mut buffer)?;
        self.is_eof = true;
        self.trim_partial_record(&mut buffer);
        Ok(buffer)
    }

    /// Decode the header of record `index` without disturbing block reads
    pub fn read_header_at(&mut self, index: u64) -> Result<PacketHeader, CaptureFileError> {
        let resume = self.file_handle.stream_position()?;
        let packet_len = self.layout.packet_len();
        self.file_handle
            .seek(SeekFrom::Start(index * packet_len as u64))?;
        let mut record = vec![0u8; self.layout.header_len()];
        self.file_handle.read_exact(&mut record)?;
        self.file_handle.seek(SeekFrom::Start(resume))?;
        Ok(PacketHeader::read(&record)?)
    }

    /// Go back to the first record
    pub fn rewind(&mut self) -> Result<(), CaptureFileError> {
        self.file_handle.seek(SeekFrom::Start(0))?;
        self.is_eof = false;
        Ok(())
    }
}

/// A block of records read from a CaptureStack
#[derive(Debug, Clone)]
pub struct CaptureBlock {
    pub bytes: Vec<u8>,
    /// Position of the originating file in the stack
    pub file_index: usize,
    /// True for the first block of each file
    pub starts_file: bool,
}

/// The ordered collection of capture files making up one acquisition.
///
/// Files are read strictly in the order given, since sequence checking depends on seeing
/// packets in wire order. Every file must share the layout of the first.
#[derive(Debug)]
pub struct CaptureStack {
    file_stack: VecDeque<PathBuf>,
    active_file: CaptureFile,
    active_index: usize,
    active_started: bool,
    layout: PacketLayout,
    total_stack_size_bytes: u64,
    bytes_read: u64,
    is_ended: bool,
}

impl CaptureStack {
    /// Create a stack over the given files, in order
    pub fn new(paths: &[PathBuf]) -> Result<Self, CaptureFileError> {
        let mut stack: VecDeque<PathBuf> = paths.iter().cloned().collect();
        let first = stack.pop_front().ok_or(CaptureFileError::NoFiles)?;
        let active_file = CaptureFile::new(&first)?;
        let layout = *active_file.layout();

        let mut total_stack_size_bytes = active_file.get_size_bytes();
        for path in stack.iter() {
            if !path.exists() {
                return Err(CaptureFileError::BadFilePath(path.clone()));
            }
            total_stack_size_bytes += path.metadata()?.len();
        }

        Ok(Self {
            file_stack: stack,
            active_file,
            active_index: 0,
            active_started: false,
            layout,
            total_stack_size_bytes,
            bytes_read: 0,
            is_ended: false,
        })
    }

    pub fn layout(&self) -> &PacketLayout {
        &self.layout
    }

    pub fn get_total_size_bytes(&self) -> u64 {
        self.total_stack_size_bytes
    }

    pub fn get_bytes_read(&self) -> u64 {
        self.bytes_read
    }

    pub fn get_active_file(&self) -> &CaptureFile {
        &self.active_file
    }

    /// Get the next block in the stack.
    ///
    /// Returns a `Result<Option<CaptureBlock>>`. The Option is None once every file is consumed.
    pub fn get_next_block(
        &mut self,
        budget: usize,
    ) -> Result<Option<CaptureBlock>, CaptureFileError> {
        loop {
            if self.is_ended {
                return Ok(None);
            }
            match self.active_file.read_block(budget)? {
                Some(bytes) => {
                    self.bytes_read += bytes.len() as u64;
                    let starts_file = !self.active_started;
                    self.active_started = true;
                    return Ok(Some(CaptureBlock {
                        bytes,
                        file_index: self.active_index,
                        starts_file,
                    }));
                }
                None => self.move_to_next_file()?,
            }
        }
    }

    /// Move to the next file in the stack, skipping empty ones
    fn move_to_next_file(&mut self) -> Result<(), CaptureFileError> {
        loop {
            if let Some(next_path) = self.file_stack.pop_front() {
                self.active_index += 1;
                let next_file = match CaptureFile::new(&next_path) {
                    Ok(file) => file,
                    Err(CaptureFileError::EmptyFile(path)) => {
                        log::warn!("Skipping empty capture file {}", path.display());
                        continue;
                    }
                    Err(e) => return Err(e),
                };
                if *next_file.layout() != self.layout {
                    return Err(CaptureFileError::LayoutChanged(next_path));
                }
                log::info!("Reading {}", next_path.display());
                self.active_file = next_file;
                self.active_started = false;
                return Ok(());
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
    use crate::packet::{encode_packet, MessageKind, PacketHeader};
    use std::io::Write;

    fn write_capture(path: &Path, sequences: &[u64], tail: &[u8]) -> PacketLayout {
        let layout = PacketLayout::with_samples(MessageKind::Threshold, 14);
        let mut file = File::create(path).unwrap();
        for (pkt, seq) in sequences.iter().enumerate() {
            let header = PacketHeader::new(&layout, *seq, 1_700_000_000, pkt as u32 * 56_000);
            let steps = vec![[pkt as i32; 32]; layout.samples_per_packet];
            file.write_all(&encode_packet(&header, &steps)).unwrap();
        }
        file.write_all(tail).unwrap();
        layout
    }

    #[test]
    fn test_partial_last_record_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("interrupted.dat");
        let tail = [0x50, 0x53, 0x4E, 0x42, 0, 0, 5, 0, 1, 2];
        let layout = write_capture(&path, &[1, 2, 3, 4], &tail);

        let mut file = CaptureFile::new(&path).unwrap();
        assert_eq!(file.packet_count(), 4);
        // a budget of 3 records leaves the partial record in the second block
        let first = file.read_block(3 * layout.packet_len()).unwrap().unwrap();
        assert_eq!(first.len(), 3 * layout.packet_len());
        let second = file.read_block(3 * layout.packet_len()).unwrap().unwrap();
        assert_eq!(second.len(), layout.packet_len());
        assert!(file.read_block(3 * layout.packet_len()).unwrap().is_none());

        file.rewind().unwrap();
        assert_eq!(file.read_all().unwrap().len(), 4 * layout.packet_len());
    }

    #[test]
    fn test_stack_reads_files_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("a.dat");
        let second = dir.path().join("b.dat");
        let layout = write_capture(&first, &[1, 2], &[]);
        write_capture(&second, &[3, 4, 5], &[9, 9, 9]);

        let mut stack = CaptureStack::new(&[first, second]).unwrap();
        let mut records = 0;
        let mut starts = Vec::new();
        while let Some(block) = stack.get_next_block(layout.packet_len() * 8).unwrap() {
            records += block.bytes.len() / layout.packet_len();
            starts.push((block.file_index, block.starts_file));
        }
        assert_eq!(records, 5);
        assert_eq!(starts, vec![(0, true), (1, true)]);
        assert_eq!(stack.get_bytes_read(), 5 * layout.packet_len() as u64);
    }
}
