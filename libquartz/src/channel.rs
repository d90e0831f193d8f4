use biquad::{Biquad, Coefficients, DirectForm1, ToHertz};
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use super::error::ChannelError;
use super::uff::UffRecordInfo;

/// Number of free text ID lines carried by each channel
pub const ID_LINES: usize = 5;
/// Second order sections in the decimation low-pass (filter order is twice this)
const DECIMATION_SECTIONS: usize = 4;
/// Decimation cutoff as a fraction of the decimated Nyquist frequency
const DECIMATION_CUTOFF: f64 = 0.8;
/// Samples of odd extension added at each end before filtering
const DECIMATION_PAD: usize = 27;
/// Settling samples per unit of decimation factor run before each filter pass
const DECIMATION_SETTLE_PER_FACTOR: usize = 64;

/// Description of the independent axis (typically time) of a channel.
///
/// Only evenly spaced abscissas (`spacing == 1`) are materialized, as `index*inc + min`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Abscissa {
    pub min: f64,
    pub inc: f64,
    pub spacing: i64,
    pub label: String,
    pub unit: String,
}

impl Default for Abscissa {
    fn default() -> Self {
        Self {
            min: 0.0,
            inc: 1.0,
            spacing: 1,
            label: String::from("Time"),
            unit: String::from("s"),
        }
    }
}

/// Metadata of one channel, common to every dataset backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelInfo {
    /// The ID lines (id1 to id5); pattern lookups match against these
    pub ids: [String; ID_LINES],
    pub label: String,
    pub unit: String,
    pub abscissa: Abscissa,
    /// Header fields only present for channels stored in a UFF58 archive
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uff: Option<UffRecordInfo>,
}

impl Default for ChannelInfo {
    fn default() -> Self {
        Self {
            ids: std::array::from_fn(|_| String::from("NONE")),
            label: String::new(),
            unit: String::new(),
            abscissa: Abscissa::default(),
            uff: None,
        }
    }
}

impl ChannelInfo {
    /// The first ID line, the channel's name by convention
    pub fn id1(&self) -> &str {
        &self.ids[0]
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.ids.iter().map(|id| id.as_str())
    }
}

/// A materialized channel: sample values plus the metadata describing them.
///
/// The abscissa is never stored; it is recomputed from `abscissa.min` and `abscissa.inc` on
/// every call. Slicing and decimating return new channels that share nothing with the source.
#[derive(Debug, Clone, PartialEq)]
pub struct DataChannel {
    values: Array1<f64>,
    info: ChannelInfo,
}

impl DataChannel {
    pub fn new(values: Array1<f64>, info: ChannelInfo) -> Self {
        Self { values, info }
    }

    pub fn values(&self) -> &Array1<f64> {
        &self.values
    }

    pub fn into_values(self) -> Array1<f64> {
        self.values
    }

    pub fn info(&self) -> &ChannelInfo {
        &self.info
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The abscissa (usually time base) of every sample
    pub fn abscissa(&self) -> Array1<f64> {
        let (min, inc) = (self.info.abscissa.min, self.info.abscissa.inc);
        Array1::from_shape_fn(self.values.len(), |idx| idx as f64 * inc + min)
    }

    /// Alias of abscissa for the common case
    pub fn time(&self) -> Array1<f64> {
        self.abscissa()
    }

    pub fn max(&self) -> Option<f64> {
        self.values.iter().copied().reduce(f64::max)
    }

    pub fn min(&self) -> Option<f64> {
        self.values.iter().copied().reduce(f64::min)
    }

    /// Keep the samples whose abscissa lies in `[start, end)`
    pub fn slice(&self, start: f64, end: f64) -> Result<DataChannel, ChannelError> {
        let abscissa = self.abscissa();
        let keep: Vec<usize> = abscissa
            .iter()
            .enumerate()
            .filter(|(_, x)| **x >= start && **x < end)
            .map(|(idx, _)| idx)
            .collect();
        let first = keep
            .first()
            .copied()
            .ok_or(ChannelError::EmptySlice { start, end })?;

        let mut info = self.info.clone();
        info.abscissa.min = abscissa[first];
        let values = Array1::from_iter(keep.iter().map(|idx| self.values[*idx]));
        Ok(DataChannel { values, info })
    }

    /// Low-pass filter then keep every `factor`th sample.
    ///
    /// The anti-alias filter is an 8th order Butterworth low-pass at 0.8 of the new Nyquist
    /// frequency, run forward then backward for zero phase. The signal is padded at both ends
    /// with its odd extension to limit edge transients. The abscissa increment grows by
    /// `factor`; its start is unchanged.
    pub fn decimate(&self, factor: usize) -> Result<DataChannel, ChannelError> {
        if factor == 0 {
            return Err(ChannelError::BadDecimationFactor(factor));
        }
        let mut info = self.info.clone();
        info.abscissa.inc *= factor as f64;
        if factor == 1 || self.values.is_empty() {
            return Ok(DataChannel {
                values: self.values.clone(),
                info,
            });
        }

        let sections = lowpass_sections(factor)?;
        let x = self.values.to_vec();
        let n = x.len();
        let pad = DECIMATION_PAD.min(n - 1);
        let mut extended = Vec::with_capacity(n + 2 * pad);
        extended.extend((1..=pad).rev().map(|i| 2.0 * x[0] - x[i]));
        extended.extend_from_slice(&x);
        extended.extend((1..=pad).map(|i| 2.0 * x[n - 1] - x[n - 1 - i]));

        let settle = DECIMATION_SETTLE_PER_FACTOR * factor;
        let forward = filter_pass(&sections, &extended, settle);
        let reversed: Vec<f64> = forward.into_iter().rev().collect();
        let backward = filter_pass(&sections, &reversed, settle);

        let values = Array1::from_iter(
            backward
                .into_iter()
                .rev()
                .skip(pad)
                .take(n)
                .step_by(factor),
        );
        Ok(DataChannel { values, info })
    }
}

/// Second order sections of the decimation low-pass, normalized to a sample rate of 2 so the
/// Nyquist frequency is 1
fn lowpass_sections(factor: usize) -> Result<Vec<Coefficients<f64>>, ChannelError> {
    let cutoff = DECIMATION_CUTOFF / factor as f64;
    let order = 2 * DECIMATION_SECTIONS;
    (0..DECIMATION_SECTIONS)
        .map(|k| {
            // Butterworth pole pair k of an order `order` filter
            let angle = (2 * k + 1) as f64 * PI / (2 * order) as f64;
            let q = 1.0 / (2.0 * angle.sin());
            Coefficients::<f64>::from_params(
                biquad::Type::LowPass,
                2.0f64.hz(),
                cutoff.hz(),
                q,
            )
            .map_err(|e| ChannelError::FilterDesign(format!("{e:?}")))
        })
        .collect()
}

/// Run `input` through the cascade once. The filters are first settled on the initial value
/// so a constant signal passes without a start-up transient.
fn filter_pass(sections: &[Coefficients<f64>], input: &[f64], settle: usize) -> Vec<f64> {
    let mut filters: Vec<DirectForm1<f64>> =
        sections.iter().map(|c| DirectForm1::<f64>::new(*c)).collect();
    let mut run = |x: f64| filters.iter_mut().fold(x, |v, filter| filter.run(v));
    if let Some(first) = input.first() {
        for _ in 0..settle {
            run(*first);
        }
    }
    input.iter().map(|x| run(*x)).collect()
}
