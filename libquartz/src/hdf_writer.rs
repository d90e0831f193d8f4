use hdf5::types::VarLenUnicode;
use hdf5::{Dataset, File};
use ndarray::{s, Array2};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use super::constants::NUMBER_OF_CHANNELS;
use super::error::SinkError;
use super::sink::{SampleSink, SinkAttributes, SinkShape, T0_DESCRIPTION};

const SAMPLES_NAME: &str = "adc";

// Structure
// adc(dset) [N, 32] f32 - units, labels, calib, scale, Fsamp, T0, T0_desc, title
// N starts at 0 and grows with every appended block

fn to_unicode(text: &str) -> Result<VarLenUnicode, SinkError> {
    VarLenUnicode::from_str(text).map_err(|e| SinkError::BadAttribute(format!("{text:?}: {e}")))
}

/// Writes converted samples to the `adc` dataset of an HDF5 file
#[derive(Debug)]
pub struct Hdf5Sink {
    file_path: PathBuf,
    file_handle: Option<File>,
    samples: Option<Dataset>,
    rows_written: usize,
}

impl Hdf5Sink {
    pub fn new(path: &Path) -> Self {
        Self {
            file_path: path.to_path_buf(),
            file_handle: None,
            samples: None,
            rows_written: 0,
        }
    }
}

impl SampleSink for Hdf5Sink {
    fn begin(&mut self, attributes: &SinkAttributes, shape: SinkShape) -> Result<(), SinkError> {
        let file_handle = File::create(&self.file_path)?;
        let chunk_rows = shape.block_rows.min(shape.total_rows).max(1);
        let samples = file_handle
            .new_dataset::<f32>()
            .shape((0.., NUMBER_OF_CHANNELS))
            .chunk((chunk_rows, NUMBER_OF_CHANNELS))
            .create(SAMPLES_NAME)?;

        let units = attributes
            .units
            .iter()
            .map(|unit| to_unicode(unit))
            .collect::<Result<Vec<_>, _>>()?;
        let labels = attributes
            .labels
            .iter()
            .map(|label| to_unicode(label))
            .collect::<Result<Vec<_>, _>>()?;
        samples
            .new_attr_builder()
            .with_data(units.as_slice())
            .create("units")?;
        samples
            .new_attr_builder()
            .with_data(labels.as_slice())
            .create("labels")?;
        samples
            .new_attr_builder()
            .with_data(&attributes.calibration)
            .create("calib")?;
        samples
            .new_attr_builder()
            .with_data(&attributes.scale)
            .create("scale")?;
        samples
            .new_attr::<f64>()
            .create("Fsamp")?
            .write_scalar(&attributes.sample_rate)?;
        samples
            .new_attr::<VarLenUnicode>()
            .create("T0_desc")?
            .write_scalar(&to_unicode(T0_DESCRIPTION)?)?;
        samples
            .new_attr::<VarLenUnicode>()
            .create("title")?
            .write_scalar(&to_unicode(&attributes.title)?)?;

        self.file_handle = Some(file_handle);
        self.samples = Some(samples);
        Ok(())
    }

    fn set_start_time(&mut self, t0: f64) -> Result<(), SinkError> {
        let samples = self.samples.as_ref().ok_or(SinkError::NotStarted)?;
        samples.new_attr::<f64>().create("T0")?.write_scalar(&t0)?;
        Ok(())
    }

    fn append(&mut self, rows: &Array2<f32>) -> Result<(), SinkError> {
        if rows.ncols() != NUMBER_OF_CHANNELS {
            return Err(SinkError::BadRowWidth(rows.ncols()));
        }
        let samples = self.samples.as_ref().ok_or(SinkError::NotStarted)?;
        let start = self.rows_written;
        let end = start + rows.nrows();
        samples.resize((end, NUMBER_OF_CHANNELS))?;
        samples.write_slice(rows, s![start..end, ..])?;
        self.rows_written = end;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        self.samples = None;
        if let Some(file_handle) = self.file_handle.take() {
            file_handle.close()?;
        }
        log::info!(
            "{} rows written to {}",
            self.rows_written,
            self.file_path.display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::{combine, Calibration};

    #[test]
    fn test_dataset_grows_with_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.h5");
        let cal = Calibration::default();
        let attributes = SinkAttributes::new(&cal, &cal, &combine(&cal, &cal), 250e3, "t");
        let mut sink = Hdf5Sink::new(&path);
        sink.begin(
            &attributes,
            SinkShape {
                total_rows: 4,
                block_rows: 2,
            },
        )
        .unwrap();
        sink.set_start_time(12.5).unwrap();
        sink.append(&Array2::from_elem((2, NUMBER_OF_CHANNELS), 1.0)).unwrap();
        sink.append(&Array2::from_elem((3, NUMBER_OF_CHANNELS), 2.0)).unwrap();
        sink.finish().unwrap();

        let file = File::open(&path).unwrap();
        let samples = file.dataset(SAMPLES_NAME).unwrap();
        assert_eq!(samples.shape(), vec![5, NUMBER_OF_CHANNELS]);
        let values: Array2<f32> = samples.read_2d().unwrap();
        assert_eq!(values[[1, 0]], 1.0);
        assert_eq!(values[[4, 31]], 2.0);
        assert_eq!(samples.attr("T0").unwrap().read_scalar::<f64>().unwrap(), 12.5);
    }
}
