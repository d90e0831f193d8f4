//! # quartz
//!
//! quartz reads the "fast data" produced by PSC UDP digitizers, written in Rust. The
//! digitizers stream 32 channels of 24-bit samples as UDP packets; the acquisition
//! software records the packets verbatim into capture files (.dat). quartz decodes those
//! files, checks packet sequence continuity, applies a two stage calibration, and streams
//! the result into an HDF5 or flat binary file. It can also open acquisition manifests
//! (.json) and UFF58 archives (.uff) behind one dataset interface.
//!
//! ## Installation
//!
//! Currently the only method of install is from source. If you have not used Rust
//! before, see the [Rust docs](https://www.rust-lang.org/tools/install) for toolchain
//! installation instructions.
//!
//! ### HDF5
//!
//! HDF5 output is optional and enabled with the `hdf5` feature. Without it quartz only
//! writes flat files and needs no system libraries. When the feature is enabled HDF5 must
//! be installed, typically with a package manager (homebrew, apt, etc). If the Rust
//! libraries cannot find a custom install, write the following into `.cargo/config.toml`:
//!
//! ```toml
//! [env]
//! HDF5_DIR="/path/to/my/hdf5/install/"
//!
//! [build]
//! rustflags="-C link-args=-Wl,-rpath,/path/to/my/hdf5/install/lib"
//! ```
//!
//! ### Building & Install
//!
//! To build and install the CLI use `cargo install --path ./quartz_cli` (add
//! `--features hdf5` for HDF5 output) from the top level repository.
//!
//! ## Configuration
//!
//! Conversions are driven by a YAML file (see [`config::ConvertConfig`]):
//!
//! - capture_paths: The capture files of one acquisition, in order
//! - output_path: Where the converted samples are written
//! - output_format: `flat` (little-endian f32 plus a .yml sidecar) or `hdf5`
//! - calibration_path: Optional device calibration file (ADC counts to volts)
//! - scale_path: Optional scale file (volts to engineering units)
//! - sample_rate: Nominal sample rate recorded in the output, default 250 kHz
//! - block_size: Byte budget of each block read from the capture files, default 64 MiB
//! - title: Free text recorded in the output
//!
//! Calibration and scale files are comma separated text, one channel per line:
//! `channel(1-32), offset, slope[, unit[, label]]`, with `#` comments.
//!
//! ## Output format
//!
//! Both output formats hold one `[N, 32]` array of f32 samples in engineering units,
//! with the attributes `units`, `labels`, `calib`, `scale`, `Fsamp`, `T0`, `T0_desc`
//! and `title`. In HDF5 these are attributes of the dataset `adc`; in the flat format
//! they are keys of the YAML sidecar.
//!
//! ## Datasets
//!
//! [`dataset::open`] picks a backend from the first bytes of a file and returns something
//! implementing [`dataset::DataSet`]. Channels are found by index or by a glob pattern
//! matched against their ID lines:
//!
//! ```no_run
//! use libquartz::dataset::{open, DataSet};
//!
//! let dataset = open(std::path::Path::new("run_0001.json")).unwrap();
//! let mic = dataset.channel("*CM1").unwrap();
//! println!("{} points of {}", mic.len(), mic.info().unit);
//! ```
pub mod acquisition;
pub mod calibration;
pub mod capture;
pub mod channel;
pub mod config;
pub mod constants;
pub mod converter;
pub mod dataset;
pub mod error;
#[cfg(feature = "hdf5")]
pub mod hdf_writer;
pub mod inspect;
pub mod packet;
pub mod process;
pub mod raw_stream;
pub mod sequence;
pub mod sink;
pub mod uff;
