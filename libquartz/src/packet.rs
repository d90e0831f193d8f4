//! The PSC "fast data" packet format.
//!
//! Every record is big-endian and laid out as
//!
//! ```text
//! sync(2) msgKind(2) bodyLen(4) rxSec(4) rxNs(4)            <- 16 byte lead header
//! status(4) chMask(4) seq(8) sampSec(4) sampNs(4)           <- counted in bodyLen
//! [hihi(4) hi(4) lo(4) lolo(4)]                             <- only for 0x4E42
//! samples: samplesPerPacket x 32 channels x 3 bytes         <- packed i24, channel-interleaved
//! ```
use bitvec::prelude::*;
use byteorder::{BigEndian, ByteOrder, WriteBytesExt};
use ndarray::{Array1, Array2, Array3};
use std::io::Write;

use super::constants::*;
use super::error::PacketError;

/// The two supported data message variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Plain,
    Threshold,
}

impl MessageKind {
    pub fn tag(&self) -> u16 {
        match self {
            Self::Plain => MSG_KIND_PLAIN,
            Self::Threshold => MSG_KIND_THRESHOLD,
        }
    }

    /// Size of the fixed part of the body, before the samples
    pub fn body_header_size(&self) -> usize {
        match self {
            Self::Plain => BODY_HEADER_SIZE_PLAIN,
            Self::Threshold => BODY_HEADER_SIZE_THRESHOLD,
        }
    }
}

impl TryFrom<u16> for MessageKind {
    type Error = u16;
    fn try_from(tag: u16) -> Result<Self, Self::Error> {
        match tag {
            MSG_KIND_PLAIN => Ok(Self::Plain),
            MSG_KIND_THRESHOLD => Ok(Self::Threshold),
            _ => Err(tag),
        }
    }
}

/// Fixed record geometry shared by every packet of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketLayout {
    pub kind: MessageKind,
    pub body_len: u32,
    pub samples_per_packet: usize,
}

impl PacketLayout {
    /// Derive the layout from a message kind and the declared body length
    pub fn new(kind: MessageKind, body_len: u32) -> Result<Self, PacketError> {
        let body = body_len as usize;
        let header = kind.body_header_size();
        if body < header + BYTES_PER_SAMPLE {
            return Err(PacketError::BadBodyLength(body_len));
        }
        let payload = body - header;
        if payload % BYTES_PER_TIME_STEP != 0 {
            return Err(PacketError::BadBodyLength(body_len));
        }
        Ok(Self {
            kind,
            body_len,
            samples_per_packet: payload / BYTES_PER_TIME_STEP,
        })
    }

    /// Layout of packets carrying `samples_per_packet` time steps
    pub fn with_samples(kind: MessageKind, samples_per_packet: usize) -> Self {
        let body_len = kind.body_header_size() + samples_per_packet * BYTES_PER_TIME_STEP;
        Self {
            kind,
            body_len: body_len as u32,
            samples_per_packet,
        }
    }

    /// Read the layout from the lead header of the first record in `bytes`
    pub fn peek(bytes: &[u8]) -> Result<Self, PacketError> {
        if bytes.len() < 8 {
            return Err(PacketError::BufferTooShort {
                len: bytes.len(),
                needed: 8,
            });
        }
        let sync = BigEndian::read_u16(&bytes[0..2]);
        if sync != SYNC_WORD {
            return Err(PacketError::BadSync {
                index: 0,
                found: sync,
            });
        }
        let tag = BigEndian::read_u16(&bytes[2..4]);
        let kind = MessageKind::try_from(tag)
            .map_err(|found| PacketError::UnknownMessageKind { index: 0, found })?;
        Self::new(kind, BigEndian::read_u32(&bytes[4..8]))
    }

    /// Total length of one record in bytes
    pub fn packet_len(&self) -> usize {
        LEAD_HEADER_SIZE + self.body_len as usize
    }

    /// Offset of the first sample byte within a record
    pub fn header_len(&self) -> usize {
        LEAD_HEADER_SIZE + self.kind.body_header_size()
    }

    /// Round a byte budget down to whole records (never below one record)
    pub fn align_block_size(&self, budget: usize) -> usize {
        let packet_len = self.packet_len();
        (budget - budget % packet_len).max(packet_len)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Thresholds {
    pub hihi: u32,
    pub hi: u32,
    pub lo: u32,
    pub lolo: u32,
}

/// Decoded header fields of a single record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketHeader {
    pub sync: u16,
    pub kind_tag: u16,
    pub body_len: u32,
    pub rx_sec: u32,
    pub rx_ns: u32,
    pub status: u32,
    pub channel_mask: u32,
    pub sequence: u64,
    pub sample_sec: u32,
    pub sample_ns: u32,
    pub thresholds: Option<Thresholds>,
}

impl PacketHeader {
    /// A well formed header for the given layout with every other field zeroed
    pub fn new(layout: &PacketLayout, sequence: u64, sample_sec: u32, sample_ns: u32) -> Self {
        Self {
            sync: SYNC_WORD,
            kind_tag: layout.kind.tag(),
            body_len: layout.body_len,
            rx_sec: 0,
            rx_ns: 0,
            status: 0,
            channel_mask: FULL_CHANNEL_MASK,
            sequence,
            sample_sec,
            sample_ns,
            thresholds: match layout.kind {
                MessageKind::Plain => None,
                MessageKind::Threshold => Some(Thresholds::default()),
            },
        }
    }

    /// Decode the header at the start of `buf`. Only the length is checked; the field values
    /// are reported as found.
    pub fn read(buf: &[u8]) -> Result<Self, PacketError> {
        let needed = LEAD_HEADER_SIZE + BODY_HEADER_SIZE_PLAIN;
        if buf.len() < needed {
            return Err(PacketError::BufferTooShort {
                len: buf.len(),
                needed,
            });
        }
        let kind_tag = BigEndian::read_u16(&buf[2..4]);
        let thresholds = if kind_tag == MSG_KIND_THRESHOLD {
            if buf.len() < LEAD_HEADER_SIZE + BODY_HEADER_SIZE_THRESHOLD {
                return Err(PacketError::BufferTooShort {
                    len: buf.len(),
                    needed: LEAD_HEADER_SIZE + BODY_HEADER_SIZE_THRESHOLD,
                });
            }
            Some(Thresholds {
                hihi: BigEndian::read_u32(&buf[40..44]),
                hi: BigEndian::read_u32(&buf[44..48]),
                lo: BigEndian::read_u32(&buf[48..52]),
                lolo: BigEndian::read_u32(&buf[52..56]),
            })
        } else {
            None
        };
        Ok(Self {
            sync: BigEndian::read_u16(&buf[0..2]),
            kind_tag,
            body_len: BigEndian::read_u32(&buf[4..8]),
            rx_sec: BigEndian::read_u32(&buf[8..12]),
            rx_ns: BigEndian::read_u32(&buf[12..16]),
            status: BigEndian::read_u32(&buf[16..20]),
            channel_mask: BigEndian::read_u32(&buf[20..24]),
            sequence: BigEndian::read_u64(&buf[24..32]),
            sample_sec: BigEndian::read_u32(&buf[32..36]),
            sample_ns: BigEndian::read_u32(&buf[36..40]),
            thresholds,
        })
    }

    /// Serialize the header fields (everything before the samples)
    pub fn write<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_u16::<BigEndian>(self.sync)?;
        writer.write_u16::<BigEndian>(self.kind_tag)?;
        writer.write_u32::<BigEndian>(self.body_len)?;
        writer.write_u32::<BigEndian>(self.rx_sec)?;
        writer.write_u32::<BigEndian>(self.rx_ns)?;
        writer.write_u32::<BigEndian>(self.status)?;
        writer.write_u32::<BigEndian>(self.channel_mask)?;
        writer.write_u64::<BigEndian>(self.sequence)?;
        writer.write_u32::<BigEndian>(self.sample_sec)?;
        writer.write_u32::<BigEndian>(self.sample_ns)?;
        if let Some(th) = &self.thresholds {
            writer.write_u32::<BigEndian>(th.hihi)?;
            writer.write_u32::<BigEndian>(th.hi)?;
            writer.write_u32::<BigEndian>(th.lo)?;
            writer.write_u32::<BigEndian>(th.lolo)?;
        }
        Ok(())
    }

    /// Time of the first sample in this packet, seconds since the epoch
    pub fn sample_time(&self) -> f64 {
        self.sample_sec as f64 + self.sample_ns as f64 * 1e-9
    }

    /// Time the packet was received, seconds since the epoch
    pub fn receive_time(&self) -> f64 {
        self.rx_sec as f64 + self.rx_ns as f64 * 1e-9
    }

    /// Sample time in integer nanoseconds
    pub fn sample_time_ns(&self) -> u64 {
        self.sample_sec as u64 * 1_000_000_000 + self.sample_ns as u64
    }

    /// Indices of the channels enabled in the mask
    pub fn enabled_channels(&self) -> Vec<usize> {
        self.channel_mask.view_bits::<Lsb0>().iter_ones().collect()
    }

    /// Number of channels enabled in the mask
    pub fn active_channels(&self) -> usize {
        self.channel_mask.view_bits::<Lsb0>().count_ones()
    }

    /// Placeholder packets inserted by gap repair carry this marker
    pub fn is_synthetic(&self) -> bool {
        self.status & SYNTHETIC_STATUS_FLAG != 0
    }
}

/// Reconstruct a signed 24-bit big-endian triplet, sign extending to 32 bits
pub fn sign_extend_24(triplet: &[u8]) -> i32 {
    BigEndian::read_i24(triplet)
}

/// Serialize one record from a header and one `[i32; 32]` row per time step. Values are
/// clamped to the signed 24-bit range.
pub fn encode_packet(header: &PacketHeader, samples: &[[i32; NUMBER_OF_CHANNELS]]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(
        LEAD_HEADER_SIZE + BODY_HEADER_SIZE_THRESHOLD + samples.len() * BYTES_PER_TIME_STEP,
    );
    // Writing into a Vec cannot fail
    let _ = header.write(&mut buf);
    for step in samples {
        for value in step {
            let _ = buf.write_i24::<BigEndian>((*value).clamp(-0x80_0000, 0x7F_FFFF));
        }
    }
    buf
}

/// A validated view over a buffer holding a whole number of records
#[derive(Debug, Clone, Copy)]
pub struct PacketBlock<'a> {
    layout: PacketLayout,
    bytes: &'a [u8],
}

impl<'a> PacketBlock<'a> {
    /// Validate every record in `bytes` against `layout`.
    ///
    /// The first record that fails is reported with its index; the block is rejected as a whole.
    pub fn parse(bytes: &'a [u8], layout: &PacketLayout) -> Result<Self, PacketError> {
        let packet_len = layout.packet_len();
        if bytes.len() % packet_len != 0 {
            return Err(PacketError::TruncatedBlock {
                len: bytes.len(),
                packet_len,
            });
        }
        let expected_tag = layout.kind.tag();
        for (index, record) in bytes.chunks_exact(packet_len).enumerate() {
            let sync = BigEndian::read_u16(&record[0..2]);
            if sync != SYNC_WORD {
                return Err(PacketError::BadSync { index, found: sync });
            }
            let tag = BigEndian::read_u16(&record[2..4]);
            if tag != expected_tag {
                return Err(match MessageKind::try_from(tag) {
                    Ok(_) => PacketError::MixedMessageKinds {
                        index,
                        expected: expected_tag,
                        found: tag,
                    },
                    Err(found) => PacketError::UnknownMessageKind { index, found },
                });
            }
            let body_len = BigEndian::read_u32(&record[4..8]);
            if body_len != layout.body_len {
                return Err(PacketError::BodyLengthMismatch {
                    index,
                    expected: layout.body_len,
                    found: body_len,
                });
            }
            let mask = BigEndian::read_u32(&record[20..24]);
            if mask != FULL_CHANNEL_MASK {
                return Err(PacketError::PartialChannelMask { index, mask });
            }
        }
        Ok(Self {
            layout: *layout,
            bytes,
        })
    }

    /// Parse a block taking the layout from its first record
    pub fn from_bytes(bytes: &'a [u8]) -> Result<Self, PacketError> {
        let layout = PacketLayout::peek(bytes)?;
        Self::parse(bytes, &layout)
    }

    pub fn layout(&self) -> &PacketLayout {
        &self.layout
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Number of packets
    pub fn len(&self) -> usize {
        self.bytes.len() / self.layout.packet_len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Number of time steps across all packets
    pub fn total_samples(&self) -> usize {
        self.len() * self.layout.samples_per_packet
    }

    /// Raw bytes of one record
    pub fn record(&self, index: usize) -> &'a [u8] {
        let packet_len = self.layout.packet_len();
        &self.bytes[index * packet_len..(index + 1) * packet_len]
    }

    pub fn header(&self, index: usize) -> Result<PacketHeader, PacketError> {
        PacketHeader::read(self.record(index))
    }

    pub fn sequence(&self, index: usize) -> u64 {
        BigEndian::read_u64(&self.record(index)[24..32])
    }

    /// Sequence number column of the block
    pub fn sequences(&self) -> Vec<u64> {
        (0..self.len()).map(|idx| self.sequence(idx)).collect()
    }

    fn sample_at(&self, packet: usize, step: usize, channel: usize) -> i32 {
        let offset = packet * self.layout.packet_len()
            + self.layout.header_len()
            + step * BYTES_PER_TIME_STEP
            + channel * BYTES_PER_SAMPLE;
        sign_extend_24(&self.bytes[offset..offset + BYTES_PER_SAMPLE])
    }

    /// Reconstructed samples shaped `[packets, samples_per_packet, 32]`
    pub fn samples(&self) -> Array3<i32> {
        let shape = (self.len(), self.layout.samples_per_packet, NUMBER_OF_CHANNELS);
        Array3::from_shape_fn(shape, |(pkt, step, chan)| self.sample_at(pkt, step, chan))
    }

    /// Reconstructed samples with packets concatenated, shaped `[total_samples, 32]`
    pub fn sample_matrix(&self) -> Array2<i32> {
        let spp = self.layout.samples_per_packet;
        Array2::from_shape_fn((self.total_samples(), NUMBER_OF_CHANNELS), |(row, chan)| {
            self.sample_at(row / spp, row % spp, chan)
        })
    }

    /// Reconstructed samples of one channel (0 to 31)
    pub fn channel(&self, channel: usize) -> Result<Array1<i32>, PacketError> {
        if channel >= NUMBER_OF_CHANNELS {
            return Err(PacketError::BadChannel(channel));
        }
        let spp = self.layout.samples_per_packet;
        Ok(Array1::from_shape_fn(self.total_samples(), |row| {
            self.sample_at(row / spp, row % spp, channel)
        }))
    }
}

/// Decode a buffer of records of the given kind into a `[total_samples, 32]` matrix
pub fn decode_block(bytes: &[u8], kind: MessageKind) -> Result<Array2<i32>, PacketError> {
    let layout = PacketLayout::peek(bytes)?;
    if layout.kind != kind {
        return Err(PacketError::MixedMessageKinds {
            index: 0,
            expected: kind.tag(),
            found: layout.kind.tag(),
        });
    }
    Ok(PacketBlock::parse(bytes, &layout)?.sample_matrix())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_stream(layout: &PacketLayout, sequences: &[u64]) -> Vec<u8> {
        let mut bytes = Vec::new();
        for (pkt, seq) in sequences.iter().enumerate() {
            let header = PacketHeader::new(layout, *seq, 1_700_000_000, (pkt * 1000) as u32);
            let steps: Vec<[i32; 32]> = (0..layout.samples_per_packet)
                .map(|step| {
                    let mut row = [0i32; 32];
                    for (chan, value) in row.iter_mut().enumerate() {
                        let n = (pkt * layout.samples_per_packet + step) as i32;
                        *value = if chan % 2 == 0 { n * 100 + chan as i32 } else { -n - chan as i32 };
                    }
                    row
                })
                .collect();
            bytes.extend(encode_packet(&header, &steps));
        }
        bytes
    }

    #[test]
    fn test_sign_extension() {
        assert_eq!(sign_extend_24(&[0x80, 0x00, 0x00]), -8388608);
        assert_eq!(sign_extend_24(&[0x7F, 0xFF, 0xFF]), 8388607);
        assert_eq!(sign_extend_24(&[0x00, 0x00, 0x01]), 1);
        assert_eq!(sign_extend_24(&[0xFF, 0xFF, 0xFF]), -1);
    }

    #[test]
    fn test_layout_from_body_length() {
        // 14 samples per packet as produced by the digitizer
        let layout = PacketLayout::new(MessageKind::Threshold, 40 + 14 * 96).unwrap();
        assert_eq!(layout.samples_per_packet, 14);
        assert_eq!(layout.packet_len(), 1400);
        assert_eq!(layout.header_len(), 56);

        let layout = PacketLayout::new(MessageKind::Plain, 24 + 14 * 96).unwrap();
        assert_eq!(layout.packet_len(), 1384);
        assert_eq!(layout.align_block_size(10_000), 9688);
        assert_eq!(layout.align_block_size(10), 1384);

        assert!(matches!(
            PacketLayout::new(MessageKind::Plain, 24 + 95),
            Err(PacketError::BadBodyLength(_))
        ));
    }

    #[test]
    fn test_header_round_trip() {
        let layout = PacketLayout::with_samples(MessageKind::Threshold, 2);
        let mut header = PacketHeader::new(&layout, 42, 10, 20);
        header.thresholds = Some(Thresholds {
            hihi: 1,
            hi: 2,
            lo: 3,
            lolo: 4,
        });
        let bytes = encode_packet(&header, &[[0; 32], [0; 32]]);
        assert_eq!(bytes.len(), layout.packet_len());
        assert_eq!(PacketHeader::read(&bytes).unwrap(), header);
        assert_eq!(PacketLayout::peek(&bytes).unwrap(), layout);
    }

    #[test]
    fn test_interleave_and_shape() {
        let layout = PacketLayout::with_samples(MessageKind::Plain, 3);
        let bytes = make_stream(&layout, &[1, 2, 3, 4]);
        let block = PacketBlock::parse(&bytes, &layout).unwrap();
        assert_eq!(block.len(), 4);
        assert_eq!(block.samples().shape(), &[4, 3, 32]);

        let matrix = block.sample_matrix();
        assert_eq!(matrix.shape(), &[12, 32]);
        // row 7 is packet 2, step 1
        assert_eq!(matrix[[7, 0]], 700);
        assert_eq!(matrix[[7, 4]], 704);
        assert_eq!(matrix[[7, 1]], -8);
        assert_eq!(block.channel(1).unwrap()[7], -8);
        assert_eq!(block.sequences(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_decode_is_idempotent() {
        let layout = PacketLayout::with_samples(MessageKind::Threshold, 14);
        let bytes = make_stream(&layout, &[10, 11, 12]);
        let first = decode_block(&bytes, MessageKind::Threshold).unwrap();
        let second = decode_block(&bytes, MessageKind::Threshold).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_first_violation_is_reported() {
        let layout = PacketLayout::with_samples(MessageKind::Plain, 1);
        let mut bytes = make_stream(&layout, &[1, 2, 3, 4]);
        let len = layout.packet_len();

        let mut bad_sync = bytes.clone();
        bad_sync[2 * len] = b'X';
        bad_sync[3 * len] = b'X';
        match PacketBlock::parse(&bad_sync, &layout) {
            Err(PacketError::BadSync { index, .. }) => assert_eq!(index, 2),
            other => panic!("unexpected {other:?}"),
        }

        let mut mixed = bytes.clone();
        mixed[len + 3] = 0x42;
        match PacketBlock::parse(&mixed, &layout) {
            Err(e @ PacketError::MixedMessageKinds { index: 1, .. }) => assert!(e.is_unsupported()),
            other => panic!("unexpected {other:?}"),
        }

        let mut unknown = bytes.clone();
        unknown[3] = 0x00;
        assert!(matches!(
            PacketBlock::parse(&unknown, &layout),
            Err(PacketError::UnknownMessageKind { index: 0, .. })
        ));

        bytes[3 * len + 23] = 0xFE;
        match PacketBlock::parse(&bytes, &layout) {
            Err(PacketError::PartialChannelMask { index, mask }) => {
                assert_eq!(index, 3);
                assert_eq!(mask, 0xFFFF_FFFE);
            }
            other => panic!("unexpected {other:?}"),
        }

        assert!(matches!(
            PacketBlock::parse(&bytes[..len + 5], &layout),
            Err(PacketError::TruncatedBlock { .. })
        ));
    }

    #[test]
    fn test_channel_mask_helpers() {
        let layout = PacketLayout::with_samples(MessageKind::Plain, 1);
        let mut header = PacketHeader::new(&layout, 0, 0, 0);
        assert_eq!(header.active_channels(), 32);
        header.channel_mask = 0b1010;
        assert_eq!(header.active_channels(), 2);
        assert_eq!(header.enabled_channels(), vec![1, 3]);
        assert!(!header.is_synthetic());
    }
}
