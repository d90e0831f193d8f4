use std::time::Instant;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use super::calibration::CombinedCalibration;
use super::capture::CaptureStack;
use super::error::ConverterError;
use super::packet::{PacketBlock, PacketLayout};
use super::sequence::SequenceChecker;
use super::sink::{SampleSink, SinkAttributes, SinkShape};

/// Totals for a finished conversion
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversionSummary {
    pub blocks: u64,
    pub packets: u64,
    pub rows: u64,
    pub gaps: u64,
    pub missing_packets: u64,
    /// Sample time of the first packet of the first file, seconds since the epoch
    pub start_time: Option<f64>,
}

/// Render an epoch time for the log, falling back to the raw number
pub fn format_epoch(seconds: f64) -> String {
    OffsetDateTime::from_unix_timestamp_nanos((seconds * 1e9) as i128)
        .ok()
        .and_then(|t| t.format(&Rfc3339).ok())
        .unwrap_or_else(|| format!("{seconds:.9}"))
}

/// Streams packet blocks through decode, sequence check and calibration into a sink.
///
/// Blocks are bounded by the byte budget and aligned to whole packets, so memory stays flat
/// regardless of acquisition length. Sequence gaps are logged and counted but do not stop the
/// conversion.
#[derive(Debug)]
pub struct BlockConverter {
    calibration: CombinedCalibration,
    block_size: usize,
    checker: SequenceChecker,
    summary: ConversionSummary,
    timer: Instant,
}

impl BlockConverter {
    pub fn new(calibration: CombinedCalibration, block_size: usize) -> Self {
        Self {
            calibration,
            block_size,
            checker: SequenceChecker::new(),
            summary: ConversionSummary::default(),
            timer: Instant::now(),
        }
    }

    pub fn summary(&self) -> &ConversionSummary {
        &self.summary
    }

    /// Start the sink with the output shape implied by the stack
    pub fn begin(
        &mut self,
        stack: &CaptureStack,
        attributes: &SinkAttributes,
        sink: &mut dyn SampleSink,
    ) -> Result<(), ConverterError> {
        let layout = stack.layout();
        let block_size = layout.align_block_size(self.block_size);
        let packets_per_block = block_size / layout.packet_len();
        let total_packets = stack.get_total_size_bytes() as usize / layout.packet_len();
        let shape = SinkShape {
            total_rows: total_packets * layout.samples_per_packet,
            block_rows: packets_per_block * layout.samples_per_packet,
        };
        log::debug!(
            "packet length {}, {} samples per packet, {} packets per block",
            layout.packet_len(),
            layout.samples_per_packet,
            packets_per_block
        );
        log::info!(
            "Reading {} ({} total)",
            stack.get_active_file().get_filename().display(),
            human_bytes::human_bytes(stack.get_total_size_bytes() as f64)
        );
        sink.begin(attributes, shape)?;
        self.timer = Instant::now();
        Ok(())
    }

    /// Convert one packet-aligned block of bytes
    pub fn convert_block(
        &mut self,
        bytes: &[u8],
        layout: &PacketLayout,
        sink: &mut dyn SampleSink,
    ) -> Result<(), ConverterError> {
        let block = PacketBlock::parse(bytes, layout)?;
        if block.is_empty() {
            return Ok(());
        }
        let gaps = self.checker.check(&block.sequences());

        if self.summary.start_time.is_none() {
            let t0 = block.header(0)?.sample_time();
            log::info!("Acquisition starts at {}", format_epoch(t0));
            sink.set_start_time(t0)?;
            self.summary.start_time = Some(t0);
        }

        let values = self.calibration.apply(&block.sample_matrix());
        sink.append(&values)?;

        self.summary.blocks += 1;
        self.summary.packets += block.len() as u64;
        self.summary.rows += values.nrows() as u64;
        self.summary.gaps += gaps.len() as u64;
        self.summary.missing_packets += gaps.iter().map(|gap| gap.missing()).sum::<u64>();
        Ok(())
    }

    /// Convert the next block of the stack. Returns false once the stack is exhausted.
    pub fn convert_next_block(
        &mut self,
        stack: &mut CaptureStack,
        sink: &mut dyn SampleSink,
    ) -> Result<bool, ConverterError> {
        let layout = *stack.layout();
        match stack.get_next_block(self.block_size)? {
            Some(block) => {
                self.convert_block(&block.bytes, &layout, sink)?;
                log::debug!(
                    ". {:.2}s {}/{}",
                    self.timer.elapsed().as_secs_f64(),
                    human_bytes::human_bytes(stack.get_bytes_read() as f64),
                    human_bytes::human_bytes(stack.get_total_size_bytes() as f64)
                );
                self.timer = Instant::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Finish the sink and report the totals
    pub fn finish(self, sink: &mut dyn SampleSink) -> Result<ConversionSummary, ConverterError> {
        sink.finish()?;
        if self.summary.gaps > 0 {
            log::warn!(
                "{} sequence gaps, {} packets missing",
                self.summary.gaps,
                self.summary.missing_packets
            );
        }
        log::info!(
            "Converted {} packets into {} rows",
            self.summary.packets,
            self.summary.rows
        );
        Ok(self.summary)
    }

    /// Convert a whole stack in one call
    pub fn run(
        mut self,
        stack: &mut CaptureStack,
        attributes: &SinkAttributes,
        sink: &mut dyn SampleSink,
    ) -> Result<ConversionSummary, ConverterError> {
        self.begin(stack, attributes, sink)?;
        while self.convert_next_block(stack, sink)? {}
        self.finish(sink)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::{combine, Affine, Calibration, ChannelCalibration};
    use crate::packet::{encode_packet, MessageKind, PacketHeader};
    use crate::sink::MemorySink;

    fn stream(layout: &PacketLayout, sequences: &[u64]) -> Vec<u8> {
        let mut bytes = Vec::new();
        for (pkt, seq) in sequences.iter().enumerate() {
            let header = PacketHeader::new(layout, *seq, 1_700_000_000 + pkt as u32, 250);
            let steps: Vec<[i32; 32]> = (0..layout.samples_per_packet)
                .map(|step| [(pkt * layout.samples_per_packet + step) as i32; 32])
                .collect();
            bytes.extend(encode_packet(&header, &steps));
        }
        bytes
    }

    #[test]
    fn test_blocks_carry_sequence_and_start_time() {
        let layout = PacketLayout::with_samples(MessageKind::Plain, 2);
        let mut scale = Calibration::default();
        scale.set_channel(
            0,
            ChannelCalibration {
                coeffs: Affine::new(1.0, 10.0),
                ..Default::default()
            },
        );
        let combined = combine(&Calibration::default(), &scale);
        let attributes =
            SinkAttributes::new(&Calibration::default(), &scale, &combined, 250e3, "t");
        let mut sink = MemorySink::new();
        sink.begin(
            &attributes,
            SinkShape {
                total_rows: 10,
                block_rows: 4,
            },
        )
        .unwrap();

        let mut converter = BlockConverter::new(combined, 1024);
        let first = stream(&layout, &[1, 2]);
        let second = stream(&layout, &[3, 6, 7]);
        converter.convert_block(&first, &layout, &mut sink).unwrap();
        converter.convert_block(&second, &layout, &mut sink).unwrap();
        let summary = converter.finish(&mut sink).unwrap();

        assert_eq!(summary.blocks, 2);
        assert_eq!(summary.packets, 5);
        assert_eq!(summary.rows, 10);
        assert_eq!(summary.gaps, 1);
        assert_eq!(summary.missing_packets, 2);
        assert!((summary.start_time.unwrap() - 1_700_000_000.0).abs() < 1e-6);
        assert_eq!(sink.start_time, summary.start_time);
        assert!(sink.is_finished);

        let values = sink.to_array();
        assert_eq!(values.shape(), &[10, 32]);
        assert_eq!(values[[3, 0]], 31.0);
        assert_eq!(values[[3, 1]], 3.0);
        // the second block's counts restart at zero
        assert_eq!(values[[5, 0]], 11.0);
        assert_eq!(values[[9, 2]], 5.0);
    }

    #[test]
    fn test_format_epoch() {
        assert_eq!(format_epoch(0.0), "1970-01-01T00:00:00Z");
    }
}
