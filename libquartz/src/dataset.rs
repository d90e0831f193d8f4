use glob::Pattern;
use std::fmt::Display;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use super::acquisition::AcquisitionSession;
use super::channel::{ChannelInfo, DataChannel};
use super::error::{DataSetError, LookupError};
use super::raw_stream::RawPacketStream;
use super::uff::Uff58Archive;

/// Bytes read from the start of a file to pick its backend
const SNIFF_LENGTH: usize = 512;

/// How a channel is selected: by position in the index, or by a shell style pattern matched
/// against every ID line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelKey {
    Index(usize),
    Pattern(String),
}

impl From<usize> for ChannelKey {
    fn from(value: usize) -> Self {
        Self::Index(value)
    }
}

impl From<&str> for ChannelKey {
    fn from(value: &str) -> Self {
        Self::Pattern(value.to_string())
    }
}

impl From<String> for ChannelKey {
    fn from(value: String) -> Self {
        Self::Pattern(value)
    }
}

impl From<&ChannelKey> for ChannelKey {
    fn from(value: &ChannelKey) -> Self {
        value.clone()
    }
}

/// Keys coming from loosely typed sources (JSON requests, scripts). Only non-negative integers
/// and strings are keys; anything else is a type error.
impl TryFrom<&serde_json::Value> for ChannelKey {
    type Error = LookupError;
    fn try_from(value: &serde_json::Value) -> Result<Self, Self::Error> {
        match value {
            serde_json::Value::String(pattern) => Ok(Self::Pattern(pattern.clone())),
            serde_json::Value::Number(number) => number
                .as_u64()
                .map(|idx| Self::Index(idx as usize))
                .ok_or_else(|| LookupError::WrongKeyType(number.to_string())),
            other => Err(LookupError::WrongKeyType(other.to_string())),
        }
    }
}

impl ChannelKey {
    /// Command line form: anything that parses as an integer is an index
    pub fn parse(text: &str) -> Self {
        match text.parse::<usize>() {
            Ok(idx) => Self::Index(idx),
            Err(_) => Self::Pattern(text.to_string()),
        }
    }
}

impl Display for ChannelKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Index(idx) => write!(f, "#{idx}"),
            Self::Pattern(pattern) => write!(f, "{pattern:?}"),
        }
    }
}

/// A read-only collection of channels, indexed at open time and materialized on demand.
///
/// Implementors provide the index and per-channel reads; lookup by [`ChannelKey`] is shared.
pub trait DataSet {
    /// Number of channels in the index
    fn len(&self) -> usize;

    fn info_at(&self, index: usize) -> Option<&ChannelInfo>;

    /// Read channel `index`. Every call goes back to the underlying storage.
    fn read_at(&self, index: usize) -> Result<DataChannel, DataSetError>;

    /// Release the underlying file handle. Later reads fail with [`DataSetError::Closed`].
    fn close(&mut self);

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every channel's metadata in index order
    fn index(&self) -> Vec<&ChannelInfo> {
        (0..self.len()).filter_map(|idx| self.info_at(idx)).collect()
    }

    /// Every index matching `key`. A pattern with no matches gives an empty list; each channel
    /// appears once even when several of its IDs match.
    fn lookup_all<K: Into<ChannelKey>>(&self, key: K) -> Result<Vec<usize>, LookupError>
    where
        Self: Sized,
    {
        match key.into() {
            ChannelKey::Index(index) => {
                if index < self.len() {
                    Ok(vec![index])
                } else {
                    Err(LookupError::IndexOutOfRange {
                        index,
                        len: self.len(),
                    })
                }
            }
            ChannelKey::Pattern(pattern) => {
                // text that is not a valid pattern (`[a`) is matched literally
                let pattern = Pattern::new(&pattern)
                    .or_else(|_| Pattern::new(&Pattern::escape(&pattern)))?;
                Ok((0..self.len())
                    .filter(|idx| {
                        self.info_at(*idx)
                            .is_some_and(|info| info.ids().any(|id| pattern.matches(id)))
                    })
                    .collect())
            }
        }
    }

    /// The single index matching `key`
    fn lookup<K: Into<ChannelKey>>(&self, key: K) -> Result<usize, LookupError>
    where
        Self: Sized,
    {
        let key = key.into();
        let matches = self.lookup_all(&key)?;
        match matches.len() {
            0 => Err(LookupError::NotFound(key.to_string())),
            1 => Ok(matches[0]),
            _ => Err(LookupError::Ambiguous {
                pattern: key.to_string(),
                matches,
            }),
        }
    }

    fn info<K: Into<ChannelKey>>(&self, key: K) -> Result<&ChannelInfo, DataSetError>
    where
        Self: Sized,
    {
        let key = key.into();
        let idx = self.lookup(&key)?;
        Ok(self
            .info_at(idx)
            .ok_or_else(|| LookupError::NotFound(key.to_string()))?)
    }

    fn infos<K: Into<ChannelKey>>(&self, key: K) -> Result<Vec<&ChannelInfo>, DataSetError>
    where
        Self: Sized,
    {
        Ok(self
            .lookup_all(key)?
            .into_iter()
            .filter_map(|idx| self.info_at(idx))
            .collect())
    }

    fn channel<K: Into<ChannelKey>>(&self, key: K) -> Result<DataChannel, DataSetError>
    where
        Self: Sized,
    {
        self.read_at(self.lookup(key)?)
    }

    fn channels<K: Into<ChannelKey>>(&self, key: K) -> Result<Vec<DataChannel>, DataSetError>
    where
        Self: Sized,
    {
        self.lookup_all(key)?
            .into_iter()
            .map(|idx| self.read_at(idx))
            .collect()
    }
}

/// The storage backends a file can be opened as
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    RawPacketStream,
    AcquisitionSession,
    Uff58Archive,
}

/// A test on the leading bytes of a file
#[derive(Debug, Clone, Copy)]
pub enum SniffRule {
    /// The file starts with these bytes
    Prefix(&'static [u8]),
    /// The first non-whitespace byte
    FirstByte(u8),
    /// The first line, without trailing whitespace, equals these bytes
    FirstLine(&'static [u8]),
}

impl SniffRule {
    pub fn matches(&self, head: &[u8]) -> bool {
        match self {
            Self::Prefix(prefix) => head.starts_with(prefix),
            Self::FirstByte(byte) => head
                .iter()
                .find(|b| !b.is_ascii_whitespace())
                .is_some_and(|b| b == byte),
            Self::FirstLine(line) => {
                let first = head.split(|b| *b == b'\n').next().unwrap_or_default();
                let end = first
                    .iter()
                    .rposition(|b| !b.is_ascii_whitespace())
                    .map_or(0, |p| p + 1);
                &first[..end] == *line
            }
        }
    }
}

/// Sniff rules in the order they are tried
pub const SNIFF_RULES: &[(SniffRule, Backend)] = &[
    (SniffRule::Prefix(b"PS"), Backend::RawPacketStream),
    (SniffRule::FirstByte(b'{'), Backend::AcquisitionSession),
    (
        SniffRule::FirstLine(super::constants::UFF_DELIMITER),
        Backend::Uff58Archive,
    ),
];

/// Pick a backend for a file from its first bytes
pub fn sniff(head: &[u8]) -> Option<Backend> {
    SNIFF_RULES
        .iter()
        .find(|(rule, _)| rule.matches(head))
        .map(|(_, backend)| *backend)
}

/// Any opened dataset
#[derive(Debug)]
pub enum DataSource {
    Raw(RawPacketStream),
    Session(AcquisitionSession),
    Uff(Uff58Archive),
}

impl DataSource {
    pub fn backend(&self) -> Backend {
        match self {
            Self::Raw(_) => Backend::RawPacketStream,
            Self::Session(_) => Backend::AcquisitionSession,
            Self::Uff(_) => Backend::Uff58Archive,
        }
    }
}

/// Open a file as whichever dataset its leading bytes identify
pub fn open(path: &Path) -> Result<DataSource, DataSetError> {
    if !path.exists() {
        return Err(DataSetError::BadFilePath(path.to_path_buf()));
    }
    let mut head = Vec::with_capacity(SNIFF_LENGTH);
    File::open(path)?
        .take(SNIFF_LENGTH as u64)
        .read_to_end(&mut head)?;

    match sniff(&head) {
        Some(Backend::RawPacketStream) => Ok(DataSource::Raw(RawPacketStream::new(path)?)),
        Some(Backend::AcquisitionSession) => {
            Ok(DataSource::Session(AcquisitionSession::new(path)?))
        }
        Some(Backend::Uff58Archive) => Ok(DataSource::Uff(Uff58Archive::new(path)?)),
        None => {
            let first = head.split(|b| *b == b'\n').next().unwrap_or_default();
            let magic = String::from_utf8_lossy(&first[..first.len().min(16)]).to_string();
            Err(DataSetError::BadMagic {
                path: path.to_path_buf(),
                magic,
            })
        }
    }
}

impl DataSet for DataSource {
    fn len(&self) -> usize {
        match self {
            Self::Raw(ds) => ds.len(),
            Self::Session(ds) => ds.len(),
            Self::Uff(ds) => ds.len(),
        }
    }

    fn info_at(&self, index: usize) -> Option<&ChannelInfo> {
        match self {
            Self::Raw(ds) => ds.info_at(index),
            Self::Session(ds) => ds.info_at(index),
            Self::Uff(ds) => ds.info_at(index),
        }
    }

    fn read_at(&self, index: usize) -> Result<DataChannel, DataSetError> {
        match self {
            Self::Raw(ds) => ds.read_at(index),
            Self::Session(ds) => ds.read_at(index),
            Self::Uff(ds) => ds.read_at(index),
        }
    }

    fn close(&mut self) {
        match self {
            Self::Raw(ds) => ds.close(),
            Self::Session(ds) => ds.close(),
            Self::Uff(ds) => ds.close(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Abscissa;
    use ndarray::Array1;
    use serde_json::json;

    /// In-memory dataset for exercising the shared lookup logic
    struct Fixture {
        infos: Vec<ChannelInfo>,
    }

    impl Fixture {
        fn new(names: &[[&str; 2]]) -> Self {
            let infos = names
                .iter()
                .map(|[id1, id2]| {
                    let mut info = ChannelInfo {
                        abscissa: Abscissa::default(),
                        ..Default::default()
                    };
                    info.ids[0] = id1.to_string();
                    info.ids[1] = id2.to_string();
                    info
                })
                .collect();
            Self { infos }
        }
    }

    impl DataSet for Fixture {
        fn len(&self) -> usize {
            self.infos.len()
        }
        fn info_at(&self, index: usize) -> Option<&ChannelInfo> {
            self.infos.get(index)
        }
        fn read_at(&self, index: usize) -> Result<DataChannel, DataSetError> {
            Ok(DataChannel::new(
                Array1::from_elem(3, index as f64),
                self.infos[index].clone(),
            ))
        }
        fn close(&mut self) {}
    }

    #[test]
    fn test_pattern_lookup() {
        let ds = Fixture::new(&[
            ["513-UPSTREAM_CM1", "Upstream CM1"],
            ["514-UPSTREAM_CM2", "Upstream CM2"],
            ["601-DOWN", "Downstream CM1 duplicate"],
        ]);
        assert_eq!(ds.lookup("*CM2").unwrap(), 1);
        assert_eq!(ds.lookup("*-UPSTREAM_CM1").unwrap(), 0);
        assert_eq!(ds.lookup_all("*CM1*").unwrap(), vec![0, 2]);
        assert!(ds.lookup_all("nothing").unwrap().is_empty());
        assert!(matches!(ds.lookup("nothing"), Err(LookupError::NotFound(_))));
        match ds.lookup("*CM1*") {
            Err(LookupError::Ambiguous { matches, .. }) => assert_eq!(matches, vec![0, 2]),
            other => panic!("unexpected {other:?}"),
        }
        // both ID lines match, still one entry
        assert_eq!(ds.lookup_all("*CM1").unwrap(), vec![0]);
        assert_eq!(ds.channels("*CM*").unwrap().len(), 3);
        assert_eq!(ds.channel(2usize).unwrap().values()[0], 2.0);
        assert_eq!(ds.info("514*").unwrap().ids[1], "Upstream CM2");
        assert_eq!(ds.infos("5*").unwrap().len(), 2);
        assert_eq!(ds.index().len(), 3);
    }

    #[test]
    fn test_index_and_type_errors() {
        let ds = Fixture::new(&[["a", "b"]]);
        assert!(matches!(
            ds.lookup(1usize),
            Err(LookupError::IndexOutOfRange { index: 1, len: 1 })
        ));
        assert!(matches!(ds.lookup("[a"), Err(LookupError::NotFound(_))));
        let bracketed = Fixture::new(&[["[a", "b"], ["a", "[b]"]]);
        assert_eq!(bracketed.lookup("[a").unwrap(), 0);
        assert_eq!(bracketed.lookup("[[]b]").unwrap(), 1);

        assert_eq!(ChannelKey::try_from(&json!(0)).unwrap(), ChannelKey::Index(0));
        assert_eq!(
            ChannelKey::try_from(&json!("a*")).unwrap(),
            ChannelKey::Pattern(String::from("a*"))
        );
        for bad in [json!(1.5), json!(-1), json!([1]), json!(null), json!({"k": 1})] {
            assert!(matches!(
                ChannelKey::try_from(&bad),
                Err(LookupError::WrongKeyType(_))
            ));
        }
        assert_eq!(ChannelKey::parse("12"), ChannelKey::Index(12));
        assert_eq!(ChannelKey::parse("ch1*"), ChannelKey::Pattern(String::from("ch1*")));
    }

    #[test]
    fn test_sniff() {
        assert_eq!(sniff(b"PSNA\x00\x00"), Some(Backend::RawPacketStream));
        assert_eq!(sniff(b"{\n  \"AcquisitionId\""), Some(Backend::AcquisitionSession));
        assert_eq!(sniff(b"  {}"), Some(Backend::AcquisitionSession));
        assert_eq!(sniff(b"    -1\n    58b"), Some(Backend::Uff58Archive));
        assert_eq!(sniff(b"    -1   \r\n"), Some(Backend::Uff58Archive));
        assert_eq!(sniff(b"GIF89a"), None);
        assert_eq!(sniff(b""), None);
    }
}
