//! Universal File Format dataset 58, binary variant ("58b").
//!
//! An archive is a sequence of records framed by `    -1` delimiter lines:
//!
//! ```text
//!     -1
//!     58b     1     2          11      317168     0     0           0           0
//! <ID line 1>
//! ... 5 ID lines ...
//!     1         0    0         0 Volt             769   2 NONE             769   2
//!          2     79292         1 0.00000E+000 4.00000E-005 0.00000E+000
//!         17    0    0    0 Time                 s
//!          1    0    0    0 Sound pressure       Pa
//! <records 10 and 11>
//! <binary body: point count x element size bytes>    -1
//! ```
//!
//! The index is built by reading each header and seeking over the body, so opening an archive
//! never reads sample data.
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Mutex;

use super::channel::{Abscissa, ChannelInfo, DataChannel, ID_LINES};
use super::constants::{UFF_58_HEADER_LINES, UFF_DELIMITER, UFF_TYPE_58B};
use super::dataset::DataSet;
use super::error::{DataSetError, LookupError, UffError};

// Zero based positions of the decoded records among the header lines following line 0
const RECORD_FUNCTION: usize = 5;
const RECORD_ABSCISSA_DATA: usize = 6;
const RECORD_ABSCISSA_AXIS: usize = 7;
const RECORD_ORDINATE_AXIS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Endianness {
    Little,
    Big,
}

impl Endianness {
    pub fn from_code(code: i64) -> Result<Self, UffError> {
        match code {
            1 => Ok(Self::Little),
            2 => Ok(Self::Big),
            _ => Err(UffError::UnknownEndianness(code)),
        }
    }

    pub fn code(&self) -> i64 {
        match self {
            Self::Little => 1,
            Self::Big => 2,
        }
    }
}

/// Ordinate element type. Complex types (5, 6) are not supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElementType {
    F32,
    F64,
}

impl ElementType {
    pub fn from_code(code: i64) -> Result<Self, UffError> {
        match code {
            2 => Ok(Self::F32),
            4 => Ok(Self::F64),
            _ => Err(UffError::UnsupportedElementType(code)),
        }
    }

    pub fn code(&self) -> i64 {
        match self {
            Self::F32 => 2,
            Self::F64 => 4,
        }
    }

    pub fn size(&self) -> u64 {
        match self {
            Self::F32 => 4,
            Self::F64 => 8,
        }
    }
}

/// Decoded 58b header fields that have no counterpart in the other backends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UffRecordInfo {
    pub endianness: Endianness,
    pub element_type: ElementType,
    pub point_count: usize,
    pub body_bytes: u64,
    pub function_type: i64,
    pub function_number: i64,
    pub load_case: i64,
    pub response_name: String,
    pub response_node: i64,
    pub response_direction: i64,
    pub reference_name: String,
    pub reference_node: i64,
    pub reference_direction: i64,
    pub abscissa_z: f64,
}

/// One dataset of an archive: where its header and body start, and what the header said
#[derive(Debug, Clone, PartialEq)]
pub struct UffIndexEntry {
    pub header_offset: u64,
    pub body_offset: u64,
    pub info: ChannelInfo,
}

impl UffIndexEntry {
    fn record(&self) -> Result<&UffRecordInfo, UffError> {
        self.info
            .uff
            .as_ref()
            .ok_or(UffError::TruncatedHeader(self.header_offset))
    }
}

/// Walks a fixed-width Fortran style line field by field
struct FieldReader<'a> {
    line: &'a [u8],
    pos: usize,
    record: usize,
}

impl<'a> FieldReader<'a> {
    fn new(line: &'a [u8], record: usize) -> Self {
        Self {
            line,
            pos: 0,
            record,
        }
    }

    fn take(&mut self, width: usize) -> &'a [u8] {
        let start = self.pos.min(self.line.len());
        let end = (self.pos + width).min(self.line.len());
        self.pos += width;
        &self.line[start..end]
    }

    fn skip(&mut self, width: usize) {
        self.pos += width;
    }

    fn text(&mut self, width: usize) -> String {
        String::from_utf8_lossy(self.take(width)).trim().to_string()
    }

    fn int(&mut self, width: usize, field: &'static str) -> Result<i64, UffError> {
        let record = self.record;
        let value = self.text(width);
        value.parse().map_err(|_| UffError::BadField {
            record,
            field,
            value,
        })
    }

    fn float(&mut self, width: usize, field: &'static str) -> Result<f64, UffError> {
        let record = self.record;
        let value = self.text(width);
        value
            .replace(['D', 'd'], "E")
            .parse()
            .map_err(|_| UffError::BadField {
                record,
                field,
                value,
            })
    }
}

/// Read one line without its terminator. None at end of input.
fn read_line<R: BufRead>(reader: &mut R) -> Result<Option<Vec<u8>>, UffError> {
    let mut line = Vec::new();
    if reader.read_until(b'\n', &mut line)? == 0 {
        return Ok(None);
    }
    while matches!(line.last(), Some(b'\n' | b'\r')) {
        line.pop();
    }
    Ok(Some(line))
}

fn is_delimiter(line: &[u8]) -> bool {
    let end = line.iter().rposition(|b| *b != b' ').map_or(0, |p| p + 1);
    &line[..end] == UFF_DELIMITER
}

/// Axis record (I10,3I5,2(1X,20A1)): specific type, label, unit
fn decode_axis(line: &[u8], record: usize) -> Result<(i64, String, String), UffError> {
    let mut fields = FieldReader::new(line, record);
    let stype = fields.int(10, "specific data type")?;
    fields.skip(15);
    fields.skip(1);
    let label = fields.text(20);
    fields.skip(1);
    let unit = fields.text(20);
    Ok((stype, label, unit))
}

/// Decode one 58b header starting at line 0. The reader is left at the start of the body.
fn read_header<R: BufRead + Seek>(
    reader: &mut R,
    header_offset: u64,
) -> Result<(ChannelInfo, u64), UffError> {
    let line0 = read_line(reader)?.ok_or(UffError::TruncatedHeader(header_offset))?;
    if !line0.starts_with(UFF_TYPE_58B) {
        let tag = String::from_utf8_lossy(&line0[..line0.len().min(10)]).to_string();
        return Err(UffError::UnsupportedType(tag));
    }
    // (I6,1A1,I6,I6,I12,I12,I6,I6,I12,I12)
    let mut fields = FieldReader::new(&line0, 0);
    fields.skip(7);
    let endianness = Endianness::from_code(fields.int(6, "endianness")?)?;
    let _element_code = fields.int(6, "element type")?;
    let line_count = fields.int(12, "line count")?;
    let body_bytes = fields.int(12, "byte count")?;
    if line_count < (RECORD_ORDINATE_AXIS + 1) as i64 || body_bytes < 0 {
        return Err(UffError::BadField {
            record: 0,
            field: "line count",
            value: format!("{line_count} lines, {body_bytes} bytes"),
        });
    }
    let body_bytes = body_bytes as u64;

    // line_count comes from the file, so the Vec grows only as lines are actually read
    let mut lines = Vec::new();
    for _ in 0..line_count {
        let pos = reader.stream_position()?;
        lines.push(read_line(reader)?.ok_or(UffError::TruncatedHeader(pos))?);
    }

    let mut ids: [String; ID_LINES] = Default::default();
    for (id, line) in ids.iter_mut().zip(lines.iter()) {
        *id = String::from_utf8_lossy(line).trim_end().to_string();
    }
    log::debug!("id1 {}", ids[0]);

    // (2(I5,I10),2(1X,10A1,I10,I4))
    let mut fields = FieldReader::new(&lines[RECORD_FUNCTION], RECORD_FUNCTION + 1);
    let function_type = fields.int(5, "function type")?;
    let function_number = fields.int(10, "function number")?;
    fields.skip(5);
    let load_case = fields.int(10, "load case")?;
    fields.skip(1);
    let response_name = fields.text(10);
    let response_node = fields.int(10, "response node")?;
    let response_direction = fields.int(4, "response direction")?;
    fields.skip(1);
    let reference_name = fields.text(10);
    let reference_node = fields.int(10, "reference node")?;
    let reference_direction = fields.int(4, "reference direction")?;

    // (3I10,3E13.5)
    let mut fields = FieldReader::new(&lines[RECORD_ABSCISSA_DATA], RECORD_ABSCISSA_DATA + 1);
    let element_type = ElementType::from_code(fields.int(10, "ordinate data type")?)?;
    let point_count = fields.int(10, "point count")?;
    let spacing = fields.int(10, "abscissa spacing")?;
    let abscissa_min = fields.float(13, "abscissa minimum")?;
    let abscissa_inc = fields.float(13, "abscissa increment")?;
    let abscissa_z = fields.float(13, "z axis value")?;
    if point_count < 0 {
        return Err(UffError::BadField {
            record: RECORD_ABSCISSA_DATA + 1,
            field: "point count",
            value: point_count.to_string(),
        });
    }

    let (_, abscissa_label, abscissa_unit) =
        decode_axis(&lines[RECORD_ABSCISSA_AXIS], RECORD_ABSCISSA_AXIS + 1)?;
    let (_, label, unit) = decode_axis(&lines[RECORD_ORDINATE_AXIS], RECORD_ORDINATE_AXIS + 1)?;

    let computed = element_type.size() * point_count as u64;
    if computed != body_bytes {
        return Err(UffError::BodySizeMismatch {
            declared: body_bytes,
            computed,
        });
    }

    let info = ChannelInfo {
        ids,
        label,
        unit,
        abscissa: Abscissa {
            min: abscissa_min,
            inc: abscissa_inc,
            spacing,
            label: abscissa_label,
            unit: abscissa_unit,
        },
        uff: Some(UffRecordInfo {
            endianness,
            element_type,
            point_count: point_count as usize,
            body_bytes,
            function_type,
            function_number,
            load_case,
            response_name,
            response_node,
            response_direction,
            reference_name,
            reference_node,
            reference_direction,
            abscissa_z,
        }),
    };
    Ok((info, body_bytes))
}

/// Scan an archive from the current position, recording where each dataset lives.
///
/// Sample bodies are skipped with a seek, never read.
pub fn build_index<R: BufRead + Seek>(reader: &mut R) -> Result<Vec<UffIndexEntry>, UffError> {
    let mut index = Vec::new();
    loop {
        let marker_pos = reader.stream_position()?;
        match read_line(reader)? {
            None => break,
            Some(line) if is_delimiter(&line) => (),
            Some(_) => return Err(UffError::MissingDelimiter(marker_pos)),
        }

        let header_offset = reader.stream_position()?;
        let (info, body_bytes) = read_header(reader, header_offset)?;
        let body_offset = reader.stream_position()?;

        log::debug!("skip {body_bytes}");
        reader.seek(SeekFrom::Current(body_bytes as i64))?;

        let end_pos = reader.stream_position()?;
        match read_line(reader)? {
            Some(line) if is_delimiter(&line) => (),
            _ => return Err(UffError::MissingDelimiter(end_pos)),
        }

        index.push(UffIndexEntry {
            header_offset,
            body_offset,
            info,
        });
    }
    Ok(index)
}

/// Read the samples of one indexed dataset
pub fn read_values<R: Read + Seek>(
    reader: &mut R,
    entry: &UffIndexEntry,
) -> Result<Array1<f64>, UffError> {
    if entry.info.abscissa.spacing != 1 {
        return Err(UffError::NonUniformSpacing(entry.info.abscissa.spacing));
    }
    let record = entry.record()?;
    reader.seek(SeekFrom::Start(entry.body_offset))?;
    let mut body = vec![0u8; record.body_bytes as usize];
    reader.read_exact(&mut body)?;

    let values = match (record.element_type, record.endianness) {
        (ElementType::F32, endianness) => {
            let mut points = vec![0f32; record.point_count];
            match endianness {
                Endianness::Little => LittleEndian::read_f32_into(&body, &mut points),
                Endianness::Big => BigEndian::read_f32_into(&body, &mut points),
            }
            points.into_iter().map(f64::from).collect()
        }
        (ElementType::F64, endianness) => {
            let mut points = vec![0f64; record.point_count];
            match endianness {
                Endianness::Little => LittleEndian::read_f64_into(&body, &mut points),
                Endianness::Big => BigEndian::read_f64_into(&body, &mut points),
            }
            points
        }
    };
    Ok(Array1::from(values))
}

/// Access to a UFF file containing only 58b datasets.
///
/// The index is built when the archive is opened and the file handle is held until
/// [`DataSet::close`].
#[derive(Debug)]
pub struct Uff58Archive<R = BufReader<File>> {
    reader: Option<Mutex<R>>,
    index: Vec<UffIndexEntry>,
}

impl Uff58Archive<BufReader<File>> {
    pub fn new(path: &Path) -> Result<Self, DataSetError> {
        if !path.exists() {
            return Err(DataSetError::BadFilePath(path.to_path_buf()));
        }
        Ok(Self::from_reader(BufReader::new(File::open(path)?))?)
    }
}

impl<R: BufRead + Seek> Uff58Archive<R> {
    pub fn from_reader(mut reader: R) -> Result<Self, UffError> {
        let index = build_index(&mut reader)?;
        Ok(Self {
            reader: Some(Mutex::new(reader)),
            index,
        })
    }

    pub fn entries(&self) -> &[UffIndexEntry] {
        &self.index
    }
}

impl<R: BufRead + Seek> DataSet for Uff58Archive<R> {
    fn len(&self) -> usize {
        self.index.len()
    }

    fn info_at(&self, index: usize) -> Option<&ChannelInfo> {
        self.index.get(index).map(|entry| &entry.info)
    }

    fn read_at(&self, index: usize) -> Result<DataChannel, DataSetError> {
        let lock = self.reader.as_ref().ok_or(DataSetError::Closed)?;
        let entry = self
            .index
            .get(index)
            .ok_or(LookupError::IndexOutOfRange {
                index,
                len: self.index.len(),
            })?;
        let mut reader = lock.lock().map_err(|_| DataSetError::Closed)?;
        let values = read_values(&mut *reader, entry)?;
        Ok(DataChannel::new(values, entry.info.clone()))
    }

    fn close(&mut self) {
        self.reader = None;
    }
}

/// Format like Fortran `Ew.d`: `-1.23450E-005`
fn fortran_exp(value: f64, width: usize, precision: usize) -> String {
    let formatted = format!("{value:.precision$e}");
    let (mantissa, exponent) = formatted.split_once('e').unwrap_or((&formatted, "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);
    let sign = if exponent < 0 { '-' } else { '+' };
    format!(
        "{:>width$}",
        format!("{mantissa}E{sign}{:03}", exponent.abs())
    )
}

fn fixed_text(text: &str, width: usize) -> String {
    let clipped: String = text.chars().take(width).collect();
    format!("{clipped:<width$}")
}

/// Writes channels as little-endian f32 58b records
#[derive(Debug)]
pub struct UffWriter<W: Write> {
    writer: W,
}

impl<W: Write> UffWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Append one record. ID lines come from the channel; `response_node` goes in record 6.
    pub fn write_channel(
        &mut self,
        channel: &DataChannel,
        response_node: i64,
    ) -> Result<(), UffError> {
        let info = channel.info();
        let body_bytes = channel.len() as u64 * ElementType::F32.size();
        let w = &mut self.writer;

        w.write_all(UFF_DELIMITER)?;
        w.write_all(b"\n")?;
        writeln!(
            w,
            "    58b{:6}{:6}{:12}{:12}     0     0           0           0",
            Endianness::Little.code(),
            ElementType::F32.code(),
            UFF_58_HEADER_LINES,
            body_bytes
        )?;
        for id in info.ids.iter() {
            writeln!(w, "{}", fixed_text(id, 80).trim_end())?;
        }
        writeln!(
            w,
            "{:5}{:10}{:5}{:10} {}{:10}{:4} {}{:10}{:4}",
            1,
            0,
            0,
            0,
            fixed_text(&info.unit, 10),
            response_node,
            0,
            fixed_text("NONE", 10),
            0,
            0
        )?;
        writeln!(
            w,
            "{:10}{:10}{:10}{}{}{}",
            ElementType::F32.code(),
            channel.len(),
            1,
            fortran_exp(info.abscissa.min, 13, 5),
            fortran_exp(info.abscissa.inc, 13, 5),
            fortran_exp(0.0, 13, 5)
        )?;
        let axes = [
            (17, info.abscissa.label.as_str(), info.abscissa.unit.as_str()),
            (1, info.label.as_str(), info.unit.as_str()),
            (0, "NONE", "NONE"),
            (0, "NONE", "NONE"),
        ];
        for (stype, label, unit) in axes {
            writeln!(
                w,
                "{:10}{:5}{:5}{:5} {} {}",
                stype,
                0,
                0,
                0,
                fixed_text(label, 20),
                fixed_text(unit, 20)
            )?;
        }
        let mut body = vec![0u8; body_bytes as usize];
        let points: Vec<f32> = channel.values().iter().map(|v| *v as f32).collect();
        LittleEndian::write_f32_into(&points, &mut body);
        w.write_all(&body)?;
        w.write_all(UFF_DELIMITER)?;
        w.write_all(b"\n")?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}
