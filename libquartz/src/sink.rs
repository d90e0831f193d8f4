use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use super::calibration::{Calibration, CombinedCalibration};
use super::constants::NUMBER_OF_CHANNELS;
use super::error::SinkError;

/// Description stored alongside the acquisition start time
pub const T0_DESCRIPTION: &str = "time of first sample in acquisition";

/// Everything a sink records about the converted samples
#[derive(Debug, Clone, PartialEq)]
pub struct SinkAttributes {
    pub title: String,
    pub units: Vec<String>,
    pub labels: Vec<String>,
    /// `[2, 32]` device calibration, offsets then slopes
    pub calibration: Array2<f64>,
    /// `[2, 32]` scale to engineering units, offsets then slopes
    pub scale: Array2<f64>,
    /// Hz
    pub sample_rate: f64,
}

impl SinkAttributes {
    pub fn new(
        calibration: &Calibration,
        scale: &Calibration,
        combined: &CombinedCalibration,
        sample_rate: f64,
        title: &str,
    ) -> Self {
        Self {
            title: title.to_string(),
            units: combined.units.clone(),
            labels: combined.labels.clone(),
            calibration: calibration.coefficients(),
            scale: scale.coefficients(),
            sample_rate,
        }
    }
}

/// Size of the output, known before the first row arrives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkShape {
    pub total_rows: usize,
    pub block_rows: usize,
}

/// Destination of converted `[rows, 32]` sample blocks
pub trait SampleSink {
    /// Called once, before anything else
    fn begin(&mut self, attributes: &SinkAttributes, shape: SinkShape) -> Result<(), SinkError>;
    /// Record the sample time of the first packet, seconds since the epoch
    fn set_start_time(&mut self, t0: f64) -> Result<(), SinkError>;
    /// Append rows in acquisition order
    fn append(&mut self, rows: &Array2<f32>) -> Result<(), SinkError>;
    fn finish(&mut self) -> Result<(), SinkError>;
}

fn check_width(rows: &Array2<f32>) -> Result<(), SinkError> {
    if rows.ncols() != NUMBER_OF_CHANNELS {
        return Err(SinkError::BadRowWidth(rows.ncols()));
    }
    Ok(())
}

/// Keeps everything in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    pub attributes: Option<SinkAttributes>,
    pub shape: Option<SinkShape>,
    pub start_time: Option<f64>,
    pub is_finished: bool,
    data: Vec<f32>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> usize {
        self.data.len() / NUMBER_OF_CHANNELS
    }

    /// The appended samples as a `[rows, 32]` matrix
    pub fn to_array(&self) -> Array2<f32> {
        Array2::from_shape_fn((self.rows(), NUMBER_OF_CHANNELS), |(row, chan)| {
            self.data[row * NUMBER_OF_CHANNELS + chan]
        })
    }
}

impl SampleSink for MemorySink {
    fn begin(&mut self, attributes: &SinkAttributes, shape: SinkShape) -> Result<(), SinkError> {
        self.attributes = Some(attributes.clone());
        self.shape = Some(shape);
        self.data.reserve(shape.total_rows * NUMBER_OF_CHANNELS);
        Ok(())
    }

    fn set_start_time(&mut self, t0: f64) -> Result<(), SinkError> {
        self.start_time = Some(t0);
        Ok(())
    }

    fn append(&mut self, rows: &Array2<f32>) -> Result<(), SinkError> {
        if self.attributes.is_none() {
            return Err(SinkError::NotStarted);
        }
        check_width(rows)?;
        self.data.extend(rows.iter());
        Ok(())
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        self.is_finished = true;
        Ok(())
    }
}

/// The YAML sidecar written next to a flat sample file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatFileInfo {
    pub title: String,
    pub rows: usize,
    pub columns: usize,
    pub dtype: String,
    pub units: Vec<String>,
    pub labels: Vec<String>,
    pub calib: Vec<Vec<f64>>,
    pub scale: Vec<Vec<f64>>,
    #[serde(rename = "Fsamp")]
    pub fsamp: f64,
    #[serde(rename = "T0")]
    pub t0: Option<f64>,
    #[serde(rename = "T0_desc")]
    pub t0_desc: String,
}

impl FlatFileInfo {
    pub fn read(path: &Path) -> Result<Self, SinkError> {
        let yaml_str = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str::<Self>(&yaml_str)?)
    }
}

fn matrix_rows(matrix: &Array2<f64>) -> Vec<Vec<f64>> {
    matrix.rows().into_iter().map(|row| row.to_vec()).collect()
}

/// Path of the YAML sidecar for a flat sample file
pub fn sidecar_path(path: &Path) -> PathBuf {
    path.with_extension("yml")
}

/// Writes samples as row-major little-endian f32 with a YAML sidecar of attributes
#[derive(Debug)]
pub struct FlatFileSink {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    info: Option<FlatFileInfo>,
}

impl FlatFileSink {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            writer: None,
            info: None,
        }
    }
}

impl SampleSink for FlatFileSink {
    fn begin(&mut self, attributes: &SinkAttributes, _shape: SinkShape) -> Result<(), SinkError> {
        self.writer = Some(BufWriter::new(File::create(&self.path)?));
        self.info = Some(FlatFileInfo {
            title: attributes.title.clone(),
            rows: 0,
            columns: NUMBER_OF_CHANNELS,
            dtype: String::from("<f4"),
            units: attributes.units.clone(),
            labels: attributes.labels.clone(),
            calib: matrix_rows(&attributes.calibration),
            scale: matrix_rows(&attributes.scale),
            fsamp: attributes.sample_rate,
            t0: None,
            t0_desc: String::from(T0_DESCRIPTION),
        });
        Ok(())
    }

    fn set_start_time(&mut self, t0: f64) -> Result<(), SinkError> {
        let info = self.info.as_mut().ok_or(SinkError::NotStarted)?;
        info.t0 = Some(t0);
        Ok(())
    }

    fn append(&mut self, rows: &Array2<f32>) -> Result<(), SinkError> {
        check_width(rows)?;
        let (writer, info) = match (self.writer.as_mut(), self.info.as_mut()) {
            (Some(writer), Some(info)) => (writer, info),
            _ => return Err(SinkError::NotStarted),
        };
        for value in rows.iter() {
            writer.write_f32::<LittleEndian>(*value)?;
        }
        info.rows += rows.nrows();
        Ok(())
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }
        let info = self.info.as_ref().ok_or(SinkError::NotStarted)?;
        let mut sidecar = File::create(sidecar_path(&self.path))?;
        sidecar.write_all(serde_yaml::to_string(info)?.as_bytes())?;
        Ok(())
    }
}

/// Load a flat sample file written by [`FlatFileSink`], using its sidecar for the shape
pub fn read_flat_file(path: &Path) -> Result<(FlatFileInfo, Array2<f32>), SinkError> {
    let info = FlatFileInfo::read(&sidecar_path(path))?;
    let mut reader = BufReader::new(File::open(path)?);
    let mut data = vec![0f32; info.rows * info.columns];
    reader.read_f32_into::<LittleEndian>(&mut data)?;
    let samples = Array2::from_shape_fn((info.rows, info.columns), |(row, col)| {
        data[row * info.columns + col]
    });
    Ok((info, samples))
}
