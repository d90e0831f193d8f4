//! Acquisition sessions described by a JSON manifest.
//!
//! The manifest names each signal's digitizer address, its linear scaling to engineering units,
//! and optionally a per-channel cache file (`.j`) holding the already extracted raw counts. When
//! the cache file is missing or unreadable the counts are extracted from the chassis capture
//! files instead.
use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use fxhash::FxHashMap;
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};

use super::calibration::{Affine, Calibration, ChannelCalibration};
use super::channel::{Abscissa, ChannelInfo, DataChannel};
use super::constants::{
    CACHE_FORMAT_VERSION, MAX_SAMPLE_RATE, MIN_SAMPLE_RATE, NUMBER_OF_CHANNELS,
};
use super::dataset::DataSet;
use super::error::{AcquisitionError, DataSetError, LookupError};
use super::raw_stream::extract_channel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Address {
    pub chassis: u32,
    /// 1 to 32
    pub channel: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Signal {
    pub address: Address,
    pub slope: f64,
    pub intercept: f64,
    pub egu: String,
    pub name: String,
    #[serde(default)]
    pub desc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub out_data_file: Option<PathBuf>,
}

impl Signal {
    pub fn scaling(&self) -> Affine {
        Affine::new(self.intercept, self.slope)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ChassisFiles {
    pub chassis: u32,
    /// Capture files in acquisition order, relative to the manifest
    pub dat: Vec<PathBuf>,
}

/// The acquisition manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Manifest {
    #[serde(default)]
    pub acquisition_id: String,
    pub sample_rate: f64,
    pub signals: Vec<Signal>,
    #[serde(default)]
    pub chassis: Vec<ChassisFiles>,
}

impl Manifest {
    pub fn parse(contents: &str) -> Result<Self, AcquisitionError> {
        let manifest: Self = serde_json::from_str(contents)?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn read(path: &Path) -> Result<Self, AcquisitionError> {
        let manifest: Self = serde_json::from_reader(BufReader::new(File::open(path)?))?;
        manifest.validate()?;
        Ok(manifest)
    }

    fn validate(&self) -> Result<(), AcquisitionError> {
        if !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&self.sample_rate) {
            return Err(AcquisitionError::BadSampleRate(self.sample_rate));
        }
        if let Some(sig) = self
            .signals
            .iter()
            .find(|sig| sig.address.channel < 1 || sig.address.channel > NUMBER_OF_CHANNELS as u32)
        {
            return Err(AcquisitionError::BadChannel(sig.address.channel));
        }
        let mut seen: FxHashMap<u32, usize> = FxHashMap::default();
        for entry in self.chassis.iter() {
            *seen.entry(entry.chassis).or_default() += 1;
        }
        if let Some((chassis, _)) = seen.into_iter().find(|(_, count)| *count > 1) {
            return Err(AcquisitionError::DuplicateChassis(chassis));
        }
        Ok(())
    }

    /// Signals wired to one chassis, ordered by channel
    pub fn signals_for_chassis(&self, chassis: u32) -> Vec<&Signal> {
        let mut signals: Vec<&Signal> = self
            .signals
            .iter()
            .filter(|sig| sig.address.chassis == chassis)
            .collect();
        signals.sort_by_key(|sig| sig.address.channel);
        signals
    }

    /// Capture files recorded by one chassis
    pub fn capture_files(&self, chassis: u32) -> Result<&[PathBuf], AcquisitionError> {
        self.chassis
            .iter()
            .find(|entry| entry.chassis == chassis)
            .map(|entry| entry.dat.as_slice())
            .ok_or(AcquisitionError::UnknownChassis(chassis))
    }

    /// Every chassis number referenced by a signal, ascending
    pub fn chassis_numbers(&self) -> Vec<u32> {
        let mut numbers: Vec<u32> = self.signals.iter().map(|sig| sig.address.chassis).collect();
        numbers.sort_unstable();
        numbers.dedup();
        numbers
    }

    /// The scale stage for one chassis built from its signals' slope, intercept, unit and name
    pub fn scale_calibration(&self, chassis: u32) -> Calibration {
        let mut scale = Calibration::default();
        for sig in self.signals_for_chassis(chassis) {
            scale.set_channel(
                (sig.address.channel - 1) as usize,
                ChannelCalibration {
                    coeffs: sig.scaling(),
                    unit: Some(sig.egu.clone()),
                    label: Some(sig.name.clone()),
                },
            );
        }
        scale
    }
}

/// Read the raw counts stored in a per-channel cache file
pub fn read_cache_file<R: Read>(reader: &mut R) -> Result<Vec<i32>, AcquisitionError> {
    let version = reader.read_u32::<LittleEndian>()?;
    if version != CACHE_FORMAT_VERSION {
        return Err(AcquisitionError::BadCacheVersion(version));
    }
    let _reserved = reader.read_u32::<LittleEndian>()?;
    let _reserved = reader.read_u32::<LittleEndian>()?;
    let size_bytes = reader.read_u64::<LittleEndian>()?;

    // the declared size is only trusted as far as the file actually goes
    let mut body = Vec::new();
    reader.take(size_bytes).read_to_end(&mut body)?;
    if body.len() as u64 != size_bytes || size_bytes % 4 != 0 {
        return Err(AcquisitionError::BadCacheSize {
            declared: size_bytes,
            found: body.len() as u64,
        });
    }
    let mut counts = vec![0i32; body.len() / 4];
    LittleEndian::read_i32_into(&body, &mut counts);
    Ok(counts)
}

/// Write raw counts in the per-channel cache format
pub fn write_cache_file<W: Write>(writer: &mut W, counts: &[i32]) -> Result<(), AcquisitionError> {
    writer.write_u32::<LittleEndian>(CACHE_FORMAT_VERSION)?;
    writer.write_u32::<LittleEndian>(0)?;
    writer.write_u32::<LittleEndian>(0)?;
    writer.write_u64::<LittleEndian>(counts.len() as u64 * 4)?;
    for count in counts {
        writer.write_i32::<LittleEndian>(*count)?;
    }
    Ok(())
}

/// An acquisition opened through its manifest. Channels follow the manifest's signal order.
#[derive(Debug)]
pub struct AcquisitionSession {
    base: PathBuf,
    manifest: Manifest,
    index: Vec<ChannelInfo>,
    is_closed: bool,
}

impl AcquisitionSession {
    pub fn new(path: &Path) -> Result<Self, DataSetError> {
        if !path.exists() {
            return Err(DataSetError::BadFilePath(path.to_path_buf()));
        }
        let manifest = Manifest::read(path)?;
        let base = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Ok(Self::from_manifest(manifest, base))
    }

    /// Session over an already parsed manifest whose relative paths resolve against `base`
    pub fn from_manifest(manifest: Manifest, base: PathBuf) -> Self {
        let inc = 1.0 / manifest.sample_rate;
        let index = manifest
            .signals
            .iter()
            .map(|sig| {
                let mut info = ChannelInfo {
                    label: sig.desc.clone(),
                    unit: sig.egu.clone(),
                    abscissa: Abscissa {
                        min: 0.0,
                        inc,
                        ..Default::default()
                    },
                    ..Default::default()
                };
                info.ids[0] = sig.name.clone();
                info.ids[1] = sig.desc.clone();
                info
            })
            .collect();
        Self {
            base,
            manifest,
            index,
            is_closed: false,
        }
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    fn read_cached(&self, cache: &Path) -> Result<Vec<i32>, AcquisitionError> {
        let mut reader = BufReader::new(File::open(self.base.join(cache))?);
        read_cache_file(&mut reader)
    }

    fn read_counts(&self, sig: &Signal) -> Result<Vec<i32>, AcquisitionError> {
        if let Some(cache) = &sig.out_data_file {
            match self.read_cached(cache) {
                Ok(counts) => return Ok(counts),
                Err(e) => log::error!(
                    "Unable to read cache file {}: {e}; falling back to capture files",
                    cache.display()
                ),
            }
        }
        let files: Vec<PathBuf> = self
            .manifest
            .capture_files(sig.address.chassis)?
            .iter()
            .map(|file| self.base.join(file))
            .collect();
        if files.len() > 1 {
            log::info!(
                "Concatenating {} capture files for chassis {}",
                files.len(),
                sig.address.chassis
            );
        }
        Ok(extract_channel(&files, (sig.address.channel - 1) as usize)?)
    }
}

impl DataSet for AcquisitionSession {
    fn len(&self) -> usize {
        self.index.len()
    }

    fn info_at(&self, index: usize) -> Option<&ChannelInfo> {
        self.index.get(index)
    }

    fn read_at(&self, index: usize) -> Result<DataChannel, DataSetError> {
        if self.is_closed {
            return Err(DataSetError::Closed);
        }
        let (info, sig) = self
            .index
            .get(index)
            .zip(self.manifest.signals.get(index))
            .ok_or(LookupError::IndexOutOfRange {
                index,
                len: self.index.len(),
            })?;
        let scaling = sig.scaling();
        let counts = self.read_counts(sig)?;
        // Counts pass through f32 as the cache format stores them
        let values = Array1::from_iter(
            counts
                .into_iter()
                .map(|count| scaling.apply(count as f32 as f64)),
        );
        Ok(DataChannel::new(values, info.clone()))
    }

    fn close(&mut self) {
        self.is_closed = true;
    }
}
