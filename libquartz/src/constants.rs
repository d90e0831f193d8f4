// Wire constants for the PSC "fast data" capture format

/// ASCII "PS"
pub const SYNC_WORD: u16 = 0x5053;
/// Plain data message
pub const MSG_KIND_PLAIN: u16 = 0x4E41;
/// Data message with the four threshold words
pub const MSG_KIND_THRESHOLD: u16 = 0x4E42;

/// sync, msgKind, bodyLen, rxSec, rxNs. Not counted in bodyLen.
pub const LEAD_HEADER_SIZE: usize = 16;
/// status, channelMask, sequence, sampSec, sampNs
pub const BODY_HEADER_SIZE_PLAIN: usize = 24;
/// Plain body header plus hihi, hi, lo, lolo
pub const BODY_HEADER_SIZE_THRESHOLD: usize = 40;

pub const NUMBER_OF_CHANNELS: usize = 32;
pub const BYTES_PER_SAMPLE: usize = 3;
/// Bytes used by one time step of all channels
pub const BYTES_PER_TIME_STEP: usize = NUMBER_OF_CHANNELS * BYTES_PER_SAMPLE;
pub const FULL_CHANNEL_MASK: u32 = 0xFFFF_FFFF;

/// Fill byte for the samples of synthetic packets inserted by gap repair
pub const SENTINEL_SAMPLE_BYTE: u8 = 0x7F;
/// Status word bit set on synthetic packets inserted by gap repair
pub const SYNTHETIC_STATUS_FLAG: u32 = 0x8000_0000;
/// Largest gap (in packets) gap repair will fill; bigger jumps are treated as corrupt sequence
/// words and left in place
pub const MAX_FILL_PACKETS: u64 = 65_536;

/// Default conversion block budget, 64 MiB
pub const DEFAULT_BLOCK_SIZE: usize = 64 * 1024 * 1024;
/// Default digitizer sample rate in Hz
pub const DEFAULT_SAMPLE_RATE: f64 = 250e3;

// Plausible instrument sample rates, Hz
pub const MIN_SAMPLE_RATE: f64 = 1.0;
pub const MAX_SAMPLE_RATE: f64 = 10e6;

/// Size of the per-channel cache file header: u32 version, 2x u32 reserved, u64 size
pub const CACHE_HEADER_SIZE: usize = 20;
pub const CACHE_FORMAT_VERSION: u32 = 1;

/// Line framing every UFF dataset
pub const UFF_DELIMITER: &[u8] = b"    -1";
/// Leading tag of a binary type 58 header line
pub const UFF_TYPE_58B: &[u8] = b"    58b";
/// Number of header lines following line 0 in a 58b record
pub const UFF_58_HEADER_LINES: usize = 11;
