use ndarray::Array1;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::capture::{CaptureFile, CaptureStack};
use super::channel::{Abscissa, ChannelInfo, DataChannel};
use super::constants::{DEFAULT_BLOCK_SIZE, DEFAULT_SAMPLE_RATE, NUMBER_OF_CHANNELS};
use super::dataset::DataSet;
use super::error::{CaptureFileError, DataSetError, LookupError};
use super::packet::{PacketBlock, PacketLayout};
use super::sequence::SequenceChecker;

/// Decode one channel of a block of records, appending the raw counts to `out`
fn append_channel(
    bytes: &[u8],
    layout: &PacketLayout,
    channel: usize,
    checker: &mut SequenceChecker,
    out: &mut Vec<i32>,
) -> Result<(), CaptureFileError> {
    let block = PacketBlock::parse(bytes, layout)?;
    checker.check(&block.sequences());
    out.extend(block.channel(channel)?);
    Ok(())
}

/// Raw counts of one channel (0 to 31) across a sequence of capture files read in order
pub fn extract_channel(paths: &[PathBuf], channel: usize) -> Result<Vec<i32>, CaptureFileError> {
    let mut stack = CaptureStack::new(paths)?;
    let layout = *stack.layout();
    let mut checker = SequenceChecker::new();
    let mut counts = Vec::new();
    while let Some(block) = stack.get_next_block(DEFAULT_BLOCK_SIZE)? {
        append_channel(&block.bytes, &layout, channel, &mut checker, &mut counts)?;
    }
    if checker.gap_count() > 0 {
        log::warn!(
            "Channel {} has {} sequence gaps ({} packets missing)",
            channel + 1,
            checker.gap_count(),
            checker.missing_count()
        );
    }
    Ok(counts)
}

/// A single capture file viewed as 32 channels of raw counts.
///
/// Channels are named `ch1` to `ch32`. The time step is the mean interval between the first
/// and last packet divided by the samples per packet.
#[derive(Debug)]
pub struct RawPacketStream {
    file: Option<Mutex<CaptureFile>>,
    layout: PacketLayout,
    packet_count: u64,
    start_time: f64,
    index: Vec<ChannelInfo>,
}

impl RawPacketStream {
    pub fn new(path: &Path) -> Result<Self, DataSetError> {
        let mut file = CaptureFile::new(path)?;
        let layout = *file.layout();
        let packet_count = file.packet_count();
        if packet_count == 0 {
            return Err(CaptureFileError::EmptyFile(path.to_path_buf()).into());
        }
        let first = file.read_header_at(0)?;
        let last = file.read_header_at(packet_count - 1)?;

        let spp = layout.samples_per_packet as f64;
        let inc = if packet_count > 1 {
            let span_ns = last.sample_time_ns().saturating_sub(first.sample_time_ns());
            span_ns as f64 * 1e-9 / (packet_count - 1) as f64 / spp
        } else {
            log::warn!(
                "{} holds a single packet; assuming {} Hz",
                path.display(),
                DEFAULT_SAMPLE_RATE
            );
            1.0 / DEFAULT_SAMPLE_RATE
        };

        let index = (0..NUMBER_OF_CHANNELS)
            .map(|chan| {
                let name = format!("ch{}", chan + 1);
                let mut info = ChannelInfo {
                    label: name.clone(),
                    unit: String::from("adc"),
                    abscissa: Abscissa {
                        min: 0.0,
                        inc,
                        ..Default::default()
                    },
                    ..Default::default()
                };
                info.ids[0] = name;
                info
            })
            .collect();

        Ok(Self {
            file: Some(Mutex::new(file)),
            layout,
            packet_count,
            start_time: first.sample_time(),
            index,
        })
    }

    pub fn layout(&self) -> &PacketLayout {
        &self.layout
    }

    pub fn packet_count(&self) -> u64 {
        self.packet_count
    }

    /// Sample time of the first packet, seconds since the epoch
    pub fn start_time(&self) -> f64 {
        self.start_time
    }
}

impl DataSet for RawPacketStream {
    fn len(&self) -> usize {
        self.index.len()
    }

    fn info_at(&self, index: usize) -> Option<&ChannelInfo> {
        self.index.get(index)
    }

    fn read_at(&self, index: usize) -> Result<DataChannel, DataSetError> {
        let lock = self.file.as_ref().ok_or(DataSetError::Closed)?;
        let info = self
            .index
            .get(index)
            .ok_or(LookupError::IndexOutOfRange {
                index,
                len: self.index.len(),
            })?;
        let mut file = lock.lock().map_err(|_| DataSetError::Closed)?;

        file.rewind()?;
        let mut checker = SequenceChecker::new();
        let mut counts = Vec::with_capacity(
            self.packet_count as usize * self.layout.samples_per_packet,
        );
        while let Some(bytes) = file.read_block(DEFAULT_BLOCK_SIZE)? {
            append_channel(&bytes, &self.layout, index, &mut checker, &mut counts)?;
        }
        let values = Array1::from_iter(counts.into_iter().map(f64::from));
        Ok(DataChannel::new(values, info.clone()))
    }

    fn close(&mut self) {
        self.file = None;
    }
}
