//! Capture file utilities: a first-packet summary, a whole file gap report, and gap repair.
use std::fmt::Display;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use super::capture::CaptureFile;
use super::constants::{BYTES_PER_SAMPLE, DEFAULT_BLOCK_SIZE, LEAD_HEADER_SIZE};
use super::converter::format_epoch;
use super::error::{CaptureFileError, PacketError};
use super::packet::{MessageKind, PacketBlock, PacketHeader};
use super::sequence::{find_gaps, repair_gaps, GapPosition, RepairReport, SequenceGap};

/// Read one whole record (lead header plus body). None at end of file.
fn read_record<R: Read>(reader: &mut R) -> Result<Option<Vec<u8>>, CaptureFileError> {
    let mut record = vec![0u8; LEAD_HEADER_SIZE];
    match reader.read_exact(&mut record) {
        Ok(()) => (),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let body_len = u32::from_be_bytes([record[4], record[5], record[6], record[7]]) as usize;
    record.resize(LEAD_HEADER_SIZE + body_len, 0);
    reader.read_exact(&mut record[LEAD_HEADER_SIZE..])?;
    Ok(Some(record))
}

/// What the first packets of a capture file say about the acquisition
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureSummary {
    pub path: PathBuf,
    pub kind: MessageKind,
    pub first: PacketHeader,
    /// Channels enabled in the first packet's mask
    pub active_channels: usize,
    pub samples_per_packet: usize,
    /// Receive time minus sample time of the first packet, seconds
    pub receive_offset: f64,
    /// Estimated from the first two packets, None for a single packet file
    pub sample_rate: Option<f64>,
}

impl Display for CaptureSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{}", self.path.display())?;
        writeln!(f, "  msgid: 0x{:04x}", self.kind.tag())?;
        writeln!(
            f,
            "  T0: {} (0x{:08x}, 0x{:08x})",
            format_epoch(self.first.sample_time()),
            self.first.sample_sec,
            self.first.sample_ns
        )?;
        writeln!(
            f,
            "  Tr: {} Tr-T0: {} s",
            format_epoch(self.first.receive_time()),
            self.receive_offset
        )?;
        writeln!(
            f,
            "  #chan: {} samp/chan: {}",
            self.active_channels, self.samples_per_packet
        )?;
        match self.sample_rate {
            Some(rate) => write!(f, "  Fsamp: {rate} Hz"),
            None => write!(f, "  Fsamp: unknown (single packet)"),
        }
    }
}

/// Summarize a capture file from its first two packets.
///
/// Only the headers are trusted here, so files with partial channel masks can still be
/// described even though they cannot be converted.
pub fn summarize_capture(path: &Path) -> Result<CaptureSummary, CaptureFileError> {
    if !path.exists() {
        return Err(CaptureFileError::BadFilePath(path.to_path_buf()));
    }
    let mut reader = BufReader::new(File::open(path)?);
    let record =
        read_record(&mut reader)?.ok_or_else(|| CaptureFileError::EmptyFile(path.to_path_buf()))?;
    let first = PacketHeader::read(&record)?;
    let kind = MessageKind::try_from(first.kind_tag)
        .map_err(|found| PacketError::UnknownMessageKind { index: 0, found })?;

    let active_channels = first.active_channels();
    let payload = (first.body_len as usize).saturating_sub(kind.body_header_size());
    let samples_per_packet = if active_channels == 0 {
        0
    } else {
        payload / BYTES_PER_SAMPLE / active_channels
    };
    let receive_offset = first.receive_time() - first.sample_time();

    let sample_rate = match read_record(&mut reader)? {
        Some(second_record) => {
            let second = PacketHeader::read(&second_record)?;
            if second.kind_tag != first.kind_tag {
                return Err(PacketError::MixedMessageKinds {
                    index: 1,
                    expected: first.kind_tag,
                    found: second.kind_tag,
                }
                .into());
            }
            let dt_ns = second.sample_time_ns() as f64 - first.sample_time_ns() as f64;
            (dt_ns > 0.0 && samples_per_packet > 0)
                .then(|| 1e9 / (dt_ns / samples_per_packet as f64))
        }
        None => None,
    };

    Ok(CaptureSummary {
        path: path.to_path_buf(),
        kind,
        first,
        active_channels,
        samples_per_packet,
        receive_offset,
        sample_rate,
    })
}

/// One discontinuity found by [`check_capture`]
#[derive(Debug, Clone, PartialEq)]
pub struct Jump {
    pub gap: SequenceGap,
    /// Sample time of the packet before the jump
    pub time: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GapReport {
    pub path: PathBuf,
    pub packets: u64,
    pub jumps: Vec<Jump>,
}

impl Display for GapReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{}", self.path.display())?;
        write!(
            f,
            "found {} skips of {}",
            self.jumps.len(),
            self.packets.saturating_sub(1)
        )?;
        for jump in self.jumps.iter() {
            write!(
                f,
                "\njump at {} {}, {} packets missed",
                jump.time,
                format_epoch(jump.time),
                jump.gap.missing()
            )?;
        }
        Ok(())
    }
}

/// Scan a whole capture file for sequence discontinuities
pub fn check_capture(path: &Path) -> Result<GapReport, CaptureFileError> {
    let mut file = CaptureFile::new(path)?;
    let layout = *file.layout();
    let mut report = GapReport {
        path: path.to_path_buf(),
        packets: 0,
        jumps: Vec::new(),
    };
    let mut last: Option<(u64, f64)> = None;
    while let Some(bytes) = file.read_block(DEFAULT_BLOCK_SIZE)? {
        let block = PacketBlock::parse(&bytes, &layout)?;
        if block.is_empty() {
            continue;
        }
        for gap in find_gaps(&block.sequences(), last.map(|(seq, _)| seq)) {
            let time = match gap.position {
                GapPosition::Within(idx) => block.header(idx)?.sample_time(),
                GapPosition::Boundary => last.map_or(0.0, |(_, time)| time),
            };
            report.jumps.push(Jump { gap, time });
        }
        let tail = block.len() - 1;
        last = Some((block.sequence(tail), block.header(tail)?.sample_time()));
        report.packets += block.len() as u64;
    }
    Ok(report)
}

/// Write a copy of `input` with every forward sequence gap filled by synthetic packets
pub fn repair_capture(input: &Path, output: &Path) -> Result<RepairReport, CaptureFileError> {
    let mut file = CaptureFile::new(input)?;
    let layout = *file.layout();
    let bytes = file.read_all()?;
    let block = PacketBlock::parse(&bytes, &layout)?;
    let gaps = find_gaps(&block.sequences(), None);
    log::info!(
        "{} -> {}: found {} skips of {}",
        input.display(),
        output.display(),
        gaps.len(),
        block.len().saturating_sub(1)
    );
    let (repaired, report) = repair_gaps(&block, &gaps)?;
    std::fs::write(output, repaired)?;
    Ok(report)
}
