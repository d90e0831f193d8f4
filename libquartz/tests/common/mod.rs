#![allow(dead_code)]
use libquartz::packet::{encode_packet, MessageKind, PacketHeader, PacketLayout};
use std::io::Write;
use std::path::Path;

pub const SAMPLES_PER_PACKET: usize = 14;
pub const START_SEC: u32 = 1_700_000_000;

pub fn layout() -> PacketLayout {
    PacketLayout::with_samples(MessageKind::Threshold, SAMPLES_PER_PACKET)
}

/// Raw count of `channel` at acquisition-wide sample `n`
pub fn count(n: usize, channel: usize) -> i32 {
    (n + 1000 * channel) as i32
}

/// Write one capture file. `first_packet` is the acquisition-wide index of the first packet
/// so samples and timestamps continue across files; packets are sampled at 250 kHz.
pub fn write_capture(path: &Path, first_packet: usize, sequences: &[u64]) {
    let layout = layout();
    let mut file = std::fs::File::create(path).unwrap();
    for (offset, seq) in sequences.iter().enumerate() {
        let pkt = first_packet + offset;
        let first_sample = pkt * SAMPLES_PER_PACKET;
        let ns = (first_sample * 4000) as u32;
        let header = PacketHeader::new(&layout, *seq, START_SEC, ns);
        let steps: Vec<[i32; 32]> = (0..SAMPLES_PER_PACKET)
            .map(|step| std::array::from_fn(|chan| count(first_sample + step, chan)))
            .collect();
        file.write_all(&encode_packet(&header, &steps)).unwrap();
    }
}
