use std::fmt::Display;

use super::constants::{MAX_FILL_PACKETS, SENTINEL_SAMPLE_BYTE, SYNTHETIC_STATUS_FLAG};
use super::error::PacketError;
use super::packet::{MessageKind, PacketBlock, PacketHeader, Thresholds};

/// Where a sequence discontinuity was seen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GapPosition {
    /// Between the last packet of the previous block (or file) and the first of this one
    Boundary,
    /// Between packet `index` and packet `index + 1` of the block
    Within(usize),
}

/// A place where the sequence number did not advance by exactly one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceGap {
    pub position: GapPosition,
    pub before: u64,
    pub after: u64,
}

impl SequenceGap {
    /// Number of packets missing from the stream. Zero for repeats and backward jumps.
    pub fn missing(&self) -> u64 {
        self.after.saturating_sub(self.before).saturating_sub(1)
    }

    /// The counter repeated or went backwards
    pub fn is_regression(&self) -> bool {
        self.after <= self.before
    }
}

impl Display for SequenceGap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.position {
            GapPosition::Boundary => write!(f, "between blocks")?,
            GapPosition::Within(idx) => write!(f, "after packet {idx}")?,
        }
        write!(
            f,
            ": {} -> {} ({} missing packets)",
            self.before,
            self.after,
            self.missing()
        )
    }
}

/// Find every place where `seq[i+1] - seq[i] != 1`, including the step from `previous`
/// (the last sequence number of the preceding block) to the first entry
pub fn find_gaps(sequences: &[u64], previous: Option<u64>) -> Vec<SequenceGap> {
    let mut gaps = Vec::new();
    if let (Some(before), Some(after)) = (previous, sequences.first()) {
        if before.wrapping_add(1) != *after {
            gaps.push(SequenceGap {
                position: GapPosition::Boundary,
                before,
                after: *after,
            });
        }
    }
    for (idx, pair) in sequences.windows(2).enumerate() {
        if pair[0].wrapping_add(1) != pair[1] {
            gaps.push(SequenceGap {
                position: GapPosition::Within(idx),
                before: pair[0],
                after: pair[1],
            });
        }
    }
    gaps
}

/// Checks a stream of blocks for sequence gaps, carrying the last seen sequence number
/// across block and file boundaries. Gaps are advisory: they are logged and returned,
/// never treated as errors.
#[derive(Debug, Clone, Default)]
pub struct SequenceChecker {
    last: Option<u64>,
    gap_count: u64,
    missing_count: u64,
}

impl SequenceChecker {
    pub fn new() -> Self {
        Self::default()
    }

    /// The last sequence number seen so far
    pub fn last(&self) -> Option<u64> {
        self.last
    }

    pub fn gap_count(&self) -> u64 {
        self.gap_count
    }

    pub fn missing_count(&self) -> u64 {
        self.missing_count
    }

    /// Check the sequence column of the next block in wire order
    pub fn check(&mut self, sequences: &[u64]) -> Vec<SequenceGap> {
        let gaps = find_gaps(sequences, self.last);
        for gap in gaps.iter() {
            log::warn!("Sequence discontinuity {gap}");
            self.gap_count += 1;
            self.missing_count += gap.missing();
        }
        if let Some(last) = sequences.last() {
            self.last = Some(*last);
        }
        gaps
    }
}

/// Summary of a gap repair
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepairReport {
    /// Gaps that were filled
    pub filled: usize,
    /// Gaps left alone (backward jumps, block boundaries)
    pub skipped: usize,
    /// Synthetic packets written
    pub inserted: u64,
}

/// Interpolate a timestamp (ns) `step` of `steps` of the way from `start` to `end`
fn interpolate_ns(start: u64, end: u64, step: u64, steps: u64) -> u64 {
    if end <= start || steps == 0 {
        return start;
    }
    start + ((end - start) as u128 * step as u128 / steps as u128) as u64
}

/// Build a placeholder packet. The framing fields come from `template` (the first packet of the
/// capture), the status word carries the synthetic marker, and every sample byte is the sentinel.
fn synthetic_packet(template: &PacketHeader, sequence: u64, time_ns: u64, packet_len: usize) -> Vec<u8> {
    let header = PacketHeader {
        sync: template.sync,
        kind_tag: template.kind_tag,
        body_len: template.body_len,
        rx_sec: 0,
        rx_ns: 0,
        status: SYNTHETIC_STATUS_FLAG,
        channel_mask: template.channel_mask,
        sequence,
        sample_sec: (time_ns / 1_000_000_000) as u32,
        sample_ns: (time_ns % 1_000_000_000) as u32,
        thresholds: match MessageKind::try_from(template.kind_tag) {
            Ok(MessageKind::Threshold) => Some(Thresholds::default()),
            _ => None,
        },
    };
    let mut bytes = Vec::with_capacity(packet_len);
    // Writing into a Vec cannot fail
    let _ = header.write(&mut bytes);
    bytes.resize(packet_len, SENTINEL_SAMPLE_BYTE);
    bytes
}

/// Produce a copy of `block` with each gap filled by synthetic placeholder packets.
///
/// The placeholders restore contiguous sequence numbers and whole-record alignment so that the
/// result decodes as one stream. They do not recover the lost samples: their samples are the
/// sentinel fill, their status word has `SYNTHETIC_STATUS_FLAG` set, and their sample time is
/// interpolated between the packets around the gap.
pub fn repair_gaps(
    block: &PacketBlock,
    gaps: &[SequenceGap],
) -> Result<(Vec<u8>, RepairReport), PacketError> {
    let mut report = RepairReport::default();
    if block.is_empty() {
        return Ok((Vec::new(), report));
    }
    let packet_len = block.layout().packet_len();
    let template = block.header(0)?;
    let bytes = block.as_bytes();

    let mut within: Vec<(usize, &SequenceGap)> = Vec::new();
    for gap in gaps {
        match gap.position {
            _ if gap.missing() > MAX_FILL_PACKETS => {
                log::warn!(
                    "Gap {gap} exceeds {MAX_FILL_PACKETS} packets; leaving it in place"
                );
                report.skipped += 1;
            }
            GapPosition::Within(idx) if idx + 1 < block.len() && !gap.is_regression() => {
                within.push((idx, gap))
            }
            _ => {
                log::warn!("Gap {gap} cannot be filled; leaving it in place");
                report.skipped += 1;
            }
        }
    }
    within.sort_by_key(|(idx, _)| *idx);

    let extra: u64 = within.iter().map(|(_, gap)| gap.missing()).sum();
    let extra_bytes = usize::try_from(extra)
        .ok()
        .and_then(|packets| packets.checked_mul(packet_len))
        .unwrap_or(0);
    let mut repaired = Vec::with_capacity(bytes.len().saturating_add(extra_bytes));
    let mut next = 0;
    for (idx, gap) in within {
        repaired.extend_from_slice(&bytes[next * packet_len..(idx + 1) * packet_len]);
        next = idx + 1;

        let start_ns = block.header(idx)?.sample_time_ns();
        let end_ns = block.header(idx + 1)?.sample_time_ns();
        let steps = gap.after - gap.before;
        for step in 1..steps {
            let time_ns = interpolate_ns(start_ns, end_ns, step, steps);
            repaired.extend(synthetic_packet(&template, gap.before + step, time_ns, packet_len));
        }
        log::info!("Filled {gap}");
        report.filled += 1;
        report.inserted += gap.missing();
    }
    repaired.extend_from_slice(&bytes[next * packet_len..]);

    Ok((repaired, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::NUMBER_OF_CHANNELS;
    use crate::packet::{encode_packet, PacketLayout};

    #[test]
    fn test_single_gap() {
        let gaps = find_gaps(&[1, 2, 3, 5, 6], None);
        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].position, GapPosition::Within(2));
        assert_eq!(gaps[0].missing(), 1);
    }

    #[test]
    fn test_boundary_carry() {
        let mut checker = SequenceChecker::new();
        assert!(checker.check(&[10, 11, 12]).is_empty());
        assert!(checker.check(&[13, 14]).is_empty());
        let gaps = checker.check(&[20, 21]);
        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].position, GapPosition::Boundary);
        assert_eq!(gaps[0].missing(), 5);
        assert_eq!(checker.last(), Some(21));
        assert_eq!(checker.gap_count(), 1);
        assert_eq!(checker.missing_count(), 5);
    }

    #[test]
    fn test_regression_is_a_gap() {
        let gaps = find_gaps(&[5, 6, 6, 3], None);
        assert_eq!(gaps.len(), 2);
        assert!(gaps.iter().all(|gap| gap.is_regression() && gap.missing() == 0));
    }

    #[test]
    fn test_repair_fills_gaps() {
        let layout = PacketLayout::with_samples(MessageKind::Threshold, 2);
        let mut bytes = Vec::new();
        for (seq, ns) in [(1u64, 0u32), (2, 100), (5, 400), (6, 500)] {
            let header = PacketHeader::new(&layout, seq, 7, ns);
            bytes.extend(encode_packet(&header, &[[3; NUMBER_OF_CHANNELS]; 2]));
        }
        let block = PacketBlock::parse(&bytes, &layout).unwrap();
        let gaps = find_gaps(&block.sequences(), None);

        let (repaired, report) = repair_gaps(&block, &gaps).unwrap();
        assert_eq!(report.filled, 1);
        assert_eq!(report.inserted, 2);

        let fixed = PacketBlock::parse(&repaired, &layout).unwrap();
        assert_eq!(fixed.sequences(), vec![1, 2, 3, 4, 5, 6]);
        assert!(find_gaps(&fixed.sequences(), None).is_empty());

        let filler = fixed.header(2).unwrap();
        assert!(filler.is_synthetic());
        assert_eq!(filler.sample_sec, 7);
        assert_eq!(filler.sample_ns, 200);
        assert_eq!(fixed.header(3).unwrap().sample_ns, 300);
        assert!(!fixed.header(4).unwrap().is_synthetic());

        let samples = fixed.sample_matrix();
        assert_eq!(samples[[0, 0]], 3);
        // 0x7F7F7F
        assert_eq!(samples[[4, 5]], 8355711);
    }

    #[test]
    fn test_repair_leaves_corrupt_jump() {
        let layout = PacketLayout::with_samples(MessageKind::Threshold, 2);
        let mut bytes = Vec::new();
        for (seq, ns) in [(1u64, 0u32), (2, 100), (1 << 40, 200), ((1 << 40) + 1, 300)] {
            let header = PacketHeader::new(&layout, seq, 7, ns);
            bytes.extend(encode_packet(&header, &[[3; NUMBER_OF_CHANNELS]; 2]));
        }
        let block = PacketBlock::parse(&bytes, &layout).unwrap();
        let gaps = find_gaps(&block.sequences(), None);
        assert_eq!(gaps.len(), 1);

        let (repaired, report) = repair_gaps(&block, &gaps).unwrap();
        assert_eq!(report.filled, 0);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.inserted, 0);
        assert_eq!(repaired, bytes);
    }
}
