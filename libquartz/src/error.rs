use std::path::PathBuf;
use thiserror::Error;

use super::constants::*;

#[derive(Debug, Clone, Error)]
pub enum PacketError {
    #[error("Packet buffer of {len} bytes is too short; needed at least {needed}")]
    BufferTooShort { len: usize, needed: usize },
    #[error("Bad sync word 0x{found:04x} in packet {index}; expected 0x{exp:04x}", exp=SYNC_WORD)]
    BadSync { index: usize, found: u16 },
    #[error("Unknown message kind 0x{found:04x} in packet {index}; expected 0x{exp1:04x} or 0x{exp2:04x}", exp1=MSG_KIND_PLAIN, exp2=MSG_KIND_THRESHOLD)]
    UnknownMessageKind { index: usize, found: u16 },
    #[error("Mixed message kinds in one stream -- packet {index} has 0x{found:04x}, expected 0x{expected:04x}")]
    MixedMessageKinds {
        index: usize,
        expected: u16,
        found: u16,
    },
    #[error("Body length mismatch in packet {index} -- found {found}, expected {expected}")]
    BodyLengthMismatch {
        index: usize,
        expected: u32,
        found: u32,
    },
    #[error("Packet {index} has channel mask 0x{mask:08x}; only the full mask 0x{exp:08x} is supported", exp=FULL_CHANNEL_MASK)]
    PartialChannelMask { index: usize, mask: u32 },
    #[error("Body length {0} does not hold a whole number of 32 channel samples")]
    BadBodyLength(u32),
    #[error("Block of {len} bytes is not a whole number of {packet_len} byte packets")]
    TruncatedBlock { len: usize, packet_len: usize },
    #[error("Channel {0} is out of range; channels are 0 to 31")]
    BadChannel(usize),
}

impl PacketError {
    /// True when the input is well formed but uses a feature that is rejected (kind/mask),
    /// false when the bytes themselves are corrupt
    pub fn is_unsupported(&self) -> bool {
        matches!(
            self,
            Self::UnknownMessageKind { .. }
                | Self::MixedMessageKinds { .. }
                | Self::PartialChannelMask { .. }
        )
    }
}

#[derive(Debug, Error)]
pub enum CaptureFileError {
    #[error("Could not open capture file because file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Capture file {0:?} does not contain a single packet")]
    EmptyFile(PathBuf),
    #[error("CaptureStack was given no capture files")]
    NoFiles,
    #[error("Capture file {0:?} does not use the packet layout of the first file")]
    LayoutChanged(PathBuf),
    #[error("Capture file failed due to bad packet: {0}")]
    BadPacket(#[from] PacketError),
    #[error("Capture file failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("Calibration failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Calibration file could not parse line {line}: {reason}")]
    BadLine { line: usize, reason: String },
    #[error("Calibration file names channel {channel} on line {line}; channels are 1 to 32")]
    BadChannel { line: usize, channel: i64 },
}

#[derive(Debug, Error)]
pub enum UffError {
    #[error("UFF failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("UFF is missing the expected block delimiter before byte {0}")]
    MissingDelimiter(u64),
    #[error("UFF dataset type {0:?} is not supported; only binary 58 is")]
    UnsupportedType(String),
    #[error("UFF header ended early at byte {0}")]
    TruncatedHeader(u64),
    #[error("UFF record {record} has an unparsable {field} field: {value:?}")]
    BadField {
        record: usize,
        field: &'static str,
        value: String,
    },
    #[error("UFF endianness code {0} is not supported; expected 1 or 2")]
    UnknownEndianness(i64),
    #[error("UFF element type {0} is not supported; expected 2 (f32) or 4 (f64)")]
    UnsupportedElementType(i64),
    #[error("UFF body size mismatch -- header declares {declared} bytes, points require {computed}")]
    BodySizeMismatch { declared: u64, computed: u64 },
    #[error("UFF dataset has abscissa spacing {0}; only even spacing (1) can be read")]
    NonUniformSpacing(i64),
}

#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error("Acquisition failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Acquisition manifest could not be parsed: {0}")]
    ParsingError(#[from] serde_json::Error),
    #[error("Acquisition sample rate {0} Hz is outside the instrument range")]
    BadSampleRate(f64),
    #[error("Acquisition manifest has no capture files for chassis {0}")]
    UnknownChassis(u32),
    #[error("Acquisition manifest lists chassis {0} more than once")]
    DuplicateChassis(u32),
    #[error("Signal addresses channel {0}; channels are 1 to 32")]
    BadChannel(u32),
    #[error("Cache file version {0} is not supported")]
    BadCacheVersion(u32),
    #[error("Cache file declares {declared} bytes of samples but holds {found}")]
    BadCacheSize { declared: u64, found: u64 },
    #[error("Acquisition failed reading capture data: {0}")]
    CaptureError(#[from] CaptureFileError),
}

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("No such dataset {0}")]
    NotFound(String),
    #[error("More than one dataset matches {pattern}: {matches:?}")]
    Ambiguous { pattern: String, matches: Vec<usize> },
    #[error("Dataset index {index} is out of range for {len} datasets")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("Datasets are looked up by index or ID pattern, not by {0}")]
    WrongKeyType(String),
    #[error("Bad ID pattern: {0}")]
    BadPattern(#[from] glob::PatternError),
}

#[derive(Debug, Clone, Error)]
pub enum ChannelError {
    #[error("No samples fall within the abscissa range [{start}, {end})")]
    EmptySlice { start: f64, end: f64 },
    #[error("Decimation factor must be at least 1, got {0}")]
    BadDecimationFactor(usize),
    #[error("Could not design the decimation filter: {0}")]
    FilterDesign(String),
}

#[derive(Debug, Error)]
pub enum DataSetError {
    #[error("DataSet failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("DataSet lookup failed: {0}")]
    Lookup(#[from] LookupError),
    #[error("DataSet failed due to UFF error: {0}")]
    Uff(#[from] UffError),
    #[error("DataSet failed due to Acquisition error: {0}")]
    Acquisition(#[from] AcquisitionError),
    #[error("DataSet failed due to capture file error: {0}")]
    Capture(#[from] CaptureFileError),
    #[error("DataSet failed due to packet error: {0}")]
    Packet(#[from] PacketError),
    #[error("Could not open DataSet because file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("File {path:?} has unrecognized magic {magic:?}")]
    BadMagic { path: PathBuf, magic: String },
    #[error("DataSet has already been closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Sink failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[cfg(feature = "hdf5")]
    #[error("Sink failed due to HDF5 error: {0}")]
    HDF5Error(#[from] hdf5::Error),
    #[error("Sink failed to convert to yaml: {0}")]
    ParsingError(#[from] serde_yaml::Error),
    #[error("Sink received rows of width {0}; expected 32")]
    BadRowWidth(usize),
    #[error("Sink could not store attribute {0}")]
    BadAttribute(String),
    #[error("Sink received rows before it was started")]
    NotStarted,
    #[error("This build does not include support for {0} output")]
    Unsupported(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration as file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Config failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Config failed to parse YAML: {0}")]
    ParsingError(#[from] serde_yaml::Error),
    #[error("Config block size {0} is zero")]
    BadBlockSize(usize),
    #[error("Config lists no capture files")]
    NoCaptureFiles,
}

#[derive(Debug, Error)]
pub enum ConverterError {
    #[error("Converter failed due to capture file error: {0}")]
    CaptureError(#[from] CaptureFileError),
    #[error("Converter failed due to packet error: {0}")]
    PacketError(#[from] PacketError),
    #[error("Converter failed due to sink error: {0}")]
    SinkError(#[from] SinkError),
}

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("Processor failed due to Config error: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("Processor failed due to Calibration error: {0}")]
    CalibrationError(#[from] CalibrationError),
    #[error("Processor failed due to capture file error: {0}")]
    CaptureError(#[from] CaptureFileError),
    #[error("Processor failed due to Converter error: {0}")]
    ConverterError(#[from] ConverterError),
    #[error("Processor failed due to Sink error: {0}")]
    SinkError(#[from] SinkError),
    #[error("Processor failed due to IO error: {0}")]
    IoError(#[from] std::io::Error),
}
