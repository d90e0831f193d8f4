use std::sync::{Arc, Mutex};

use super::calibration::{combine, Calibration};
use super::capture::CaptureStack;
use super::config::{ConvertConfig, OutputFormat};
use super::converter::{BlockConverter, ConversionSummary};
use super::error::{ProcessorError, SinkError};
use super::sink::{FlatFileSink, SampleSink, SinkAttributes};

/// Build the sink named by the config
fn create_sink(config: &ConvertConfig) -> Result<Box<dyn SampleSink>, SinkError> {
    match config.output_format {
        OutputFormat::Flat => Ok(Box::new(FlatFileSink::new(&config.output_path))),
        #[cfg(feature = "hdf5")]
        OutputFormat::Hdf5 => Ok(Box::new(super::hdf_writer::Hdf5Sink::new(
            &config.output_path,
        ))),
        #[cfg(not(feature = "hdf5"))]
        OutputFormat::Hdf5 => Err(SinkError::Unsupported(String::from("hdf5"))),
    }
}

/// The main loop of quartz conversion.
///
/// This takes in a config (and progress monitor) and converts every capture file it names
/// into one calibrated output file.
pub fn process(
    config: ConvertConfig,
    status: Arc<Mutex<f32>>,
) -> Result<ConversionSummary, ProcessorError> {
    config.validate()?;
    let calibration = Calibration::new(config.calibration_path.as_deref())?;
    let scale = Calibration::new(config.scale_path.as_deref())?;
    let combined = combine(&calibration, &scale);
    let attributes = SinkAttributes::new(
        &calibration,
        &scale,
        &combined,
        config.sample_rate,
        &config.title,
    );

    let mut stack = CaptureStack::new(&config.capture_paths)?;
    let mut sink = create_sink(&config)?;
    let total_bytes = stack.get_total_size_bytes().max(1) as f32;

    log::info!(
        "Converting {} capture files into {}",
        config.capture_paths.len(),
        config.output_path.display()
    );

    let mut converter = BlockConverter::new(combined, config.block_size);
    converter.begin(&stack, &attributes, sink.as_mut())?;
    while converter.convert_next_block(&mut stack, sink.as_mut())? {
        if let Ok(mut bar) = status.lock() {
            *bar = stack.get_bytes_read() as f32 / total_bytes;
        }
    }
    let summary = converter.finish(sink.as_mut())?;

    if let Ok(mut bar) = status.lock() {
        *bar = 1.0;
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigError;

    #[test]
    fn test_rejects_bad_config() {
        let config = ConvertConfig {
            capture_paths: vec![],
            ..Default::default()
        };
        let status = Arc::new(Mutex::new(0.0));
        assert!(matches!(
            process(config, status),
            Err(ProcessorError::ConfigError(ConfigError::NoCaptureFiles))
        ));
    }

    #[cfg(not(feature = "hdf5"))]
    #[test]
    fn test_hdf5_needs_feature() {
        let config = ConvertConfig {
            output_format: OutputFormat::Hdf5,
            ..Default::default()
        };
        assert!(matches!(
            create_sink(&config),
            Err(SinkError::Unsupported(_))
        ));
    }
}
