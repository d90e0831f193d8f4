// Two stage affine calibration:
//   V  = calSlope*ADC + calOffset          (device calibration)
//   EU = scaleSlope*V + scaleOffset        (scale to engineering units)
// which compose to
//   EU = (scaleSlope*calSlope)*ADC + (scaleSlope*calOffset + scaleOffset)
use ndarray::{Array2, Axis, Zip};
use std::path::Path;

use super::constants::NUMBER_OF_CHANNELS;
use super::error::CalibrationError;

const DEFAULT_UNIT: &str = "adc";
const MIN_ENTRIES_PER_LINE: usize = 3; // channel, offset, slope

/// `value = raw*slope + offset`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Affine {
    pub offset: f64,
    pub slope: f64,
}

impl Default for Affine {
    fn default() -> Self {
        Self::identity()
    }
}

impl Affine {
    pub fn new(offset: f64, slope: f64) -> Self {
        Self { offset, slope }
    }

    pub fn identity() -> Self {
        Self {
            offset: 0.0,
            slope: 1.0,
        }
    }

    pub fn apply(&self, raw: f64) -> f64 {
        raw * self.slope + self.offset
    }

    /// The single transform equivalent to applying `self` and then `next`
    pub fn then(&self, next: &Affine) -> Affine {
        Affine {
            slope: next.slope * self.slope,
            offset: next.slope * self.offset + next.offset,
        }
    }
}

/// One channel's entry in a calibration or scale file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelCalibration {
    pub coeffs: Affine,
    pub unit: Option<String>,
    pub label: Option<String>,
}

/// Per channel affine coefficients plus optional unit and label strings.
///
/// Files are comma separated, one channel per line, with `#` comments:
///
/// ```text
/// # chan, offset, slope, unit, label
///  1, 0.0, 11834.3195266272, Pascal, CM1
/// ```
///
/// Channels not named in the file keep the identity transform.
#[derive(Debug, Clone, PartialEq)]
pub struct Calibration {
    channels: Vec<ChannelCalibration>,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            channels: vec![ChannelCalibration::default(); NUMBER_OF_CHANNELS],
        }
    }
}

fn non_empty(entry: Option<&&str>) -> Option<String> {
    entry
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(String::from)
}

impl Calibration {
    /// Read a calibration file. If the path is None every channel is the identity.
    pub fn new(path: Option<&Path>) -> Result<Self, CalibrationError> {
        match path {
            Some(p) => Self::parse(&std::fs::read_to_string(p)?),
            None => Ok(Self::default()),
        }
    }

    pub fn parse(contents: &str) -> Result<Self, CalibrationError> {
        let mut cal = Self::default();
        for (row, line) in contents.lines().enumerate() {
            let line_number = row + 1;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let entries: Vec<&str> = line.split(',').map(|e| e.trim()).collect();
            if entries.len() < MIN_ENTRIES_PER_LINE {
                return Err(CalibrationError::BadLine {
                    line: line_number,
                    reason: format!("expected at least {MIN_ENTRIES_PER_LINE} columns"),
                });
            }
            let channel: i64 = entries[0].parse().map_err(|_| CalibrationError::BadLine {
                line: line_number,
                reason: format!("bad channel {:?}", entries[0]),
            })?;
            if channel < 1 || channel > NUMBER_OF_CHANNELS as i64 {
                return Err(CalibrationError::BadChannel {
                    line: line_number,
                    channel,
                });
            }
            let parse_float = |text: &str| {
                text.parse::<f64>().map_err(|e| CalibrationError::BadLine {
                    line: line_number,
                    reason: format!("{text:?}: {e}"),
                })
            };
            cal.channels[(channel - 1) as usize] = ChannelCalibration {
                coeffs: Affine::new(parse_float(entries[1])?, parse_float(entries[2])?),
                unit: non_empty(entries.get(3)),
                label: non_empty(entries.get(4)),
            };
        }
        Ok(cal)
    }

    /// Entry for channel index 0 to 31
    pub fn channel(&self, index: usize) -> &ChannelCalibration {
        &self.channels[index]
    }

    pub fn set_channel(&mut self, index: usize, entry: ChannelCalibration) {
        self.channels[index] = entry;
    }

    /// Render the channels that differ from the identity in the format [`Calibration::parse`]
    /// reads back
    pub fn to_file_string(&self) -> String {
        let mut contents = String::from("# chan, offset, slope, unit, label\n");
        for (idx, entry) in self.channels.iter().enumerate() {
            if *entry == ChannelCalibration::default() {
                continue;
            }
            contents.push_str(&format!(
                "{}, {}, {}, {}, {}\n",
                idx + 1,
                entry.coeffs.offset,
                entry.coeffs.slope,
                entry.unit.as_deref().unwrap_or_default(),
                entry.label.as_deref().unwrap_or_default()
            ));
        }
        contents
    }

    pub fn write_file(&self, path: &Path) -> Result<(), CalibrationError> {
        std::fs::write(path, self.to_file_string())?;
        Ok(())
    }

    /// Coefficients as a `[2, 32]` matrix: offsets in row 0, slopes in row 1
    pub fn coefficients(&self) -> Array2<f64> {
        Array2::from_shape_fn((2, NUMBER_OF_CHANNELS), |(row, chan)| {
            let coeffs = &self.channels[chan].coeffs;
            if row == 0 {
                coeffs.offset
            } else {
                coeffs.slope
            }
        })
    }
}

/// The device calibration and scale composed into one transform per channel, with the
/// resolved unit and label strings
#[derive(Debug, Clone, PartialEq)]
pub struct CombinedCalibration {
    pub coeffs: Vec<Affine>,
    pub units: Vec<String>,
    pub labels: Vec<String>,
}

impl Default for CombinedCalibration {
    fn default() -> Self {
        combine(&Calibration::default(), &Calibration::default())
    }
}

/// Compose calibration and scale. Strings prefer the scale entry, then the calibration entry,
/// then a generated default (`chN`, `adc`).
pub fn combine(cal: &Calibration, scale: &Calibration) -> CombinedCalibration {
    let mut combined = CombinedCalibration {
        coeffs: Vec::with_capacity(NUMBER_OF_CHANNELS),
        units: Vec::with_capacity(NUMBER_OF_CHANNELS),
        labels: Vec::with_capacity(NUMBER_OF_CHANNELS),
    };
    for (idx, (c, s)) in cal.channels.iter().zip(scale.channels.iter()).enumerate() {
        combined.coeffs.push(c.coeffs.then(&s.coeffs));
        combined.units.push(
            s.unit
                .clone()
                .or_else(|| c.unit.clone())
                .unwrap_or_else(|| String::from(DEFAULT_UNIT)),
        );
        combined.labels.push(
            s.label
                .clone()
                .or_else(|| c.label.clone())
                .unwrap_or_else(|| format!("ch{}", idx + 1)),
        );
    }
    combined
}

impl CombinedCalibration {
    /// Convert a `[samples, 32]` matrix of raw counts into engineering units
    pub fn apply(&self, raw: &Array2<i32>) -> Array2<f32> {
        let mut values = Array2::<f32>::zeros(raw.raw_dim());
        for ((mut out, counts), coeffs) in values
            .axis_iter_mut(Axis(1))
            .zip(raw.axis_iter(Axis(1)))
            .zip(self.coeffs.iter())
        {
            Zip::from(&mut out)
                .and(&counts)
                .for_each(|v, &c| *v = coeffs.apply(c as f64) as f32);
        }
        values
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_composition() {
        let combined = Affine::new(1.0, 2.0).then(&Affine::new(10.0, 3.0));
        assert_eq!(combined, Affine::new(13.0, 6.0));
    }

    #[test]
    fn test_identity_default() {
        let combined = CombinedCalibration::default();
        assert!(combined.coeffs.iter().all(|c| *c == Affine::identity()));
        assert_eq!(combined.units[0], "adc");
        assert_eq!(combined.labels[31], "ch32");
        assert_eq!(Calibration::new(None).unwrap(), Calibration::default());
    }

    #[test]
    fn test_parse_and_resolve_strings() {
        let cal = Calibration::parse(
            "# calibration\n\n1, 1.0, 2.0, V\n 2 , 0.5, 4.0, V, Mic\n",
        )
        .unwrap();
        let scale = Calibration::parse("1, 10, 3, Pascal, CM1\n2, 0, 1,  , \n").unwrap();
        let combined = combine(&cal, &scale);

        assert_eq!(combined.coeffs[0], Affine::new(13.0, 6.0));
        assert_eq!(combined.units[0], "Pascal");
        assert_eq!(combined.labels[0], "CM1");
        assert_eq!(combined.units[1], "V");
        assert_eq!(combined.labels[1], "Mic");
        assert_eq!(combined.units[2], "adc");
        assert_eq!(combined.labels[2], "ch3");

        let coefficients = cal.coefficients();
        assert_eq!(coefficients.shape(), &[2, 32]);
        assert_eq!(coefficients[[0, 1]], 0.5);
        assert_eq!(coefficients[[1, 1]], 4.0);
    }

    #[test]
    fn test_file_string_reads_back() {
        let mut scale = Calibration::default();
        scale.set_channel(
            4,
            ChannelCalibration {
                coeffs: Affine::new(-0.25, 11834.3195266272),
                unit: Some(String::from("Pascal")),
                label: Some(String::from("CM1")),
            },
        );
        let contents = scale.to_file_string();
        assert_eq!(contents.lines().count(), 2);
        assert_eq!(Calibration::parse(&contents).unwrap(), scale);
    }

    #[test]
    fn test_bad_lines() {
        assert!(matches!(
            Calibration::parse("33, 0, 1\n"),
            Err(CalibrationError::BadChannel { line: 1, channel: 33 })
        ));
        assert!(matches!(
            Calibration::parse("# x\n1, zero, 1\n"),
            Err(CalibrationError::BadLine { line: 2, .. })
        ));
        assert!(matches!(
            Calibration::parse("1, 0\n"),
            Err(CalibrationError::BadLine { line: 1, .. })
        ));
    }

    #[test]
    fn test_apply() {
        let mut scale = Calibration::default();
        scale.set_channel(
            1,
            ChannelCalibration {
                coeffs: Affine::new(-1.0, 0.5),
                ..Default::default()
            },
        );
        let combined = combine(&Calibration::default(), &scale);
        let mut raw = Array2::<i32>::zeros((2, 32));
        raw[[0, 0]] = 7;
        raw[[0, 1]] = 4;
        raw[[1, 1]] = -2;
        let values = combined.apply(&raw);
        assert_eq!(values.shape(), &[2, 32]);
        assert_eq!(values.column(0).to_owned(), array![7.0f32, 0.0]);
        assert_eq!(values.column(1).to_owned(), array![1.0f32, -2.0]);
    }
}
