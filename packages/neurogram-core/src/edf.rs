// EDF (European Data Format) and EDF+ reading and writing
// Specification: https://www.edfplus.info/specs/edf.html
//                https://www.edfplus.info/specs/edfplus.html

use crate::error::{CoreError, Result};
use crate::types::{sample_count, Annotation, Recording};
use rayon::prelude::*;
use std::fmt::Display;
use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::Path;
use std::str::FromStr;

/// Label of the EDF+ signal that carries time-stamped annotation lists
pub const ANNOTATION_LABEL: &str = "EDF Annotations";

const DIGITAL_MIN: i64 = -32768;
const DIGITAL_MAX: i64 = 32767;

// TAL separators
const TAL_DURATION: u8 = 0x15;
const TAL_FIELD: u8 = 0x14;
const TAL_END: u8 = 0x00;

#[derive(Debug, Clone)]
pub struct EdfHeader {
    pub version: String,              // 8 bytes: version of this data format (0)
    pub patient_id: String,           // 80 bytes: local patient identification
    pub recording_id: String,         // 80 bytes: local recording identification
    pub start_date: String,           // 8 bytes: startdate of recording (dd.mm.yy)
    pub start_time: String,           // 8 bytes: starttime of recording (hh.mm.ss)
    pub header_bytes: usize,          // 8 bytes: number of bytes in header record
    pub reserved: String,             // 44 bytes: "EDF+C" / "EDF+D" for EDF+
    pub num_data_records: i64,        // 8 bytes: number of data records (-1 if unknown)
    pub duration_of_data_record: f64, // 8 bytes: duration of a data record, in seconds
    pub num_signals: usize,           // 4 bytes: number of signals (channels)
}

impl EdfHeader {
    pub fn is_edf_plus(&self) -> bool {
        self.reserved.starts_with("EDF+")
    }
}

#[derive(Debug, Clone)]
pub struct EdfSignalHeader {
    pub label: String,                 // 16 bytes
    pub transducer_type: String,       // 80 bytes
    pub physical_dimension: String,    // 8 bytes
    pub physical_minimum: f64,         // 8 bytes
    pub physical_maximum: f64,         // 8 bytes
    pub digital_minimum: i64,          // 8 bytes
    pub digital_maximum: i64,          // 8 bytes
    pub prefiltering: String,          // 80 bytes
    pub num_samples_per_record: usize, // 8 bytes
    pub reserved: String,              // 32 bytes
}

impl EdfSignalHeader {
    pub fn sample_frequency(&self, record_duration: f64) -> f64 {
        self.num_samples_per_record as f64 / record_duration
    }

    pub fn gain(&self) -> f64 {
        (self.physical_maximum - self.physical_minimum)
            / (self.digital_maximum - self.digital_minimum) as f64
    }

    pub fn offset(&self) -> f64 {
        self.physical_maximum - self.gain() * self.digital_maximum as f64
    }

    pub fn is_annotation(&self) -> bool {
        self.label == ANNOTATION_LABEL
    }
}

/// Parsed EDF file. Headers are decoded eagerly; the data records are kept as
/// raw bytes until `into_recording`.
pub struct EdfReader {
    pub header: EdfHeader,
    pub signal_headers: Vec<EdfSignalHeader>,
    data: Vec<u8>,
    num_records: usize,
}

impl EdfReader {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => {
                CoreError::InvalidInput(format!("recording not found: {}", path.display()))
            }
            _ => CoreError::Io(e),
        })?;
        let mut reader = BufReader::new(file);

        let header = Self::read_header(&mut reader)?;
        let signal_headers = Self::read_signal_headers(&mut reader, header.num_signals)?;

        let expected_header_bytes = 256 * (header.num_signals + 1);
        if header.header_bytes != expected_header_bytes {
            return Err(CoreError::CorruptFile(format!(
                "header declares {} bytes, expected {} for {} signals",
                header.header_bytes, expected_header_bytes, header.num_signals
            )));
        }

        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;

        let record_bytes: usize = signal_headers
            .iter()
            .map(|sh| sh.num_samples_per_record * 2)
            .sum();
        if record_bytes == 0 {
            return Err(CoreError::CorruptFile("data records are empty".to_string()));
        }

        let available = data.len() / record_bytes;
        let num_records = if header.num_data_records < 0 {
            log::warn!(
                "EDF header has unknown record count, using {} from file size",
                available
            );
            available
        } else {
            header.num_data_records as usize
        };
        if num_records > available {
            return Err(CoreError::CorruptFile(format!(
                "header declares {} data records but the file holds {}",
                num_records, available
            )));
        }

        log::debug!(
            "EDF opened: {} signals, {} records of {}s, EDF+={}",
            header.num_signals,
            num_records,
            header.duration_of_data_record,
            header.is_edf_plus()
        );

        Ok(Self {
            header,
            signal_headers,
            data,
            num_records,
        })
    }

    fn read_header<R: Read>(reader: &mut R) -> Result<EdfHeader> {
        let version = read_field(reader, 8)?;
        if version != "0" {
            return Err(CoreError::UnsupportedFormat(format!(
                "EDF version field '{}' (only EDF/EDF+ are supported)",
                version
            )));
        }

        let patient_id = read_field(reader, 80)?;
        let recording_id = read_field(reader, 80)?;
        let start_date = read_field(reader, 8)?;
        let start_time = read_field(reader, 8)?;
        let header_bytes = parse_field(&read_field(reader, 8)?, "header bytes")?;
        let reserved = read_field(reader, 44)?;
        let num_data_records = parse_field(&read_field(reader, 8)?, "number of data records")?;
        let duration_of_data_record = parse_field(&read_field(reader, 8)?, "record duration")?;
        let num_signals = parse_field(&read_field(reader, 4)?, "number of signals")?;

        Ok(EdfHeader {
            version,
            patient_id,
            recording_id,
            start_date,
            start_time,
            header_bytes,
            reserved,
            num_data_records,
            duration_of_data_record,
            num_signals,
        })
    }

    fn read_signal_headers<R: Read>(reader: &mut R, ns: usize) -> Result<Vec<EdfSignalHeader>> {
        // Each field is stored for all signals before the next field starts
        let labels = read_column(reader, ns, 16)?;
        let transducer_types = read_column(reader, ns, 80)?;
        let physical_dimensions = read_column(reader, ns, 8)?;
        let physical_minimums = read_column(reader, ns, 8)?;
        let physical_maximums = read_column(reader, ns, 8)?;
        let digital_minimums = read_column(reader, ns, 8)?;
        let digital_maximums = read_column(reader, ns, 8)?;
        let prefilterings = read_column(reader, ns, 80)?;
        let samples_per_record = read_column(reader, ns, 8)?;
        let reserveds = read_column(reader, ns, 32)?;

        (0..ns)
            .map(|i| {
                let signal = EdfSignalHeader {
                    label: labels[i].clone(),
                    transducer_type: transducer_types[i].clone(),
                    physical_dimension: physical_dimensions[i].clone(),
                    physical_minimum: parse_field(&physical_minimums[i], "physical minimum")?,
                    physical_maximum: parse_field(&physical_maximums[i], "physical maximum")?,
                    digital_minimum: parse_field(&digital_minimums[i], "digital minimum")?,
                    digital_maximum: parse_field(&digital_maximums[i], "digital maximum")?,
                    prefiltering: prefilterings[i].clone(),
                    num_samples_per_record: parse_field(&samples_per_record[i], "samples per record")?,
                    reserved: reserveds[i].clone(),
                };
                if signal.digital_maximum <= signal.digital_minimum {
                    return Err(CoreError::CorruptFile(format!(
                        "signal '{}' has an empty digital range",
                        signal.label
                    )));
                }
                Ok(signal)
            })
            .collect()
    }

    /// Labels of the ordinary (non-annotation) signals
    pub fn labels(&self) -> Vec<String> {
        self.signal_headers
            .iter()
            .filter(|sh| !sh.is_annotation())
            .map(|sh| sh.label.clone())
            .collect()
    }

    pub fn num_records(&self) -> usize {
        self.num_records
    }

    /// Common sample rate of all ordinary signals
    pub fn sample_rate(&self) -> Result<f64> {
        let duration = self.header.duration_of_data_record;
        let mut rates = self
            .signal_headers
            .iter()
            .filter(|sh| !sh.is_annotation())
            .map(|sh| sh.num_samples_per_record);

        let Some(first) = rates.next() else {
            return Err(CoreError::CorruptFile("file has no data signals".to_string()));
        };
        if !(duration > 0.0) {
            return Err(CoreError::CorruptFile(format!(
                "invalid record duration {}",
                duration
            )));
        }
        if rates.any(|spr| spr != first) {
            return Err(CoreError::UnsupportedFormat(
                "signals with different sample rates".to_string(),
            ));
        }
        Ok(first as f64 / duration)
    }

    /// Decode every data record into a recording
    pub fn into_recording(self) -> Result<Recording> {
        let sample_rate = self.sample_rate()?;
        let record_bytes: usize = self
            .signal_headers
            .iter()
            .map(|sh| sh.num_samples_per_record * 2)
            .sum();

        // Byte offset of each signal inside a record
        let offsets: Vec<usize> = self
            .signal_headers
            .iter()
            .scan(0, |acc, sh| {
                let start = *acc;
                *acc += sh.num_samples_per_record * 2;
                Some(start)
            })
            .collect();

        let records = &self.data[..self.num_records * record_bytes];

        let ordinary: Vec<usize> = (0..self.signal_headers.len())
            .filter(|&i| !self.signal_headers[i].is_annotation())
            .collect();

        let data: Vec<Vec<f64>> = ordinary
            .par_iter()
            .map(|&signal_idx| {
                let sh = &self.signal_headers[signal_idx];
                let (gain, offset) = (sh.gain(), sh.offset());
                let len = sh.num_samples_per_record * 2;

                let mut samples = Vec::with_capacity(self.num_records * sh.num_samples_per_record);
                for record in records.chunks_exact(record_bytes) {
                    let bytes = &record[offsets[signal_idx]..offsets[signal_idx] + len];
                    samples.extend(
                        bytes
                            .chunks_exact(2)
                            .map(|b| gain * i16::from_le_bytes([b[0], b[1]]) as f64 + offset),
                    );
                }
                samples
            })
            .collect();

        let mut annotations = Vec::new();
        for (signal_idx, sh) in self.signal_headers.iter().enumerate() {
            if !sh.is_annotation() {
                continue;
            }
            let len = sh.num_samples_per_record * 2;
            for record in records.chunks_exact(record_bytes) {
                let bytes = &record[offsets[signal_idx]..offsets[signal_idx] + len];
                annotations.extend(parse_tals(bytes)?);
            }
        }

        let labels = self.labels();
        log::info!(
            "Read EDF recording: {} channels, {} samples at {} Hz, {} annotations",
            labels.len(),
            sample_count(&data),
            sample_rate,
            annotations.len()
        );

        Ok(Recording {
            data,
            labels,
            sample_rate,
            annotations,
        })
    }
}

/// Read an EDF/EDF+ file into memory
pub fn read_edf<P: AsRef<Path>>(path: P) -> Result<Recording> {
    EdfReader::open(path)?.into_recording()
}

fn read_field<R: Read>(reader: &mut R, size: usize) -> Result<String> {
    let mut buffer = vec![0u8; size];
    reader.read_exact(&mut buffer).map_err(|e| match e.kind() {
        ErrorKind::UnexpectedEof => CoreError::CorruptFile("file ends inside the header".to_string()),
        _ => CoreError::Io(e),
    })?;
    Ok(String::from_utf8_lossy(&buffer).trim().to_string())
}

fn read_column<R: Read>(reader: &mut R, count: usize, size: usize) -> Result<Vec<String>> {
    (0..count).map(|_| read_field(reader, size)).collect()
}

fn parse_field<T>(value: &str, what: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    value
        .trim()
        .parse::<T>()
        .map_err(|e| CoreError::CorruptFile(format!("invalid {} '{}': {}", what, value, e)))
}

/// Parse the time-stamped annotation lists of one annotation record.
///
/// Each TAL is `+onset[\x15duration]\x14text\x14...\x14\x00`; a TAL without
/// text is a record timekeeping stamp and yields nothing.
fn parse_tals(bytes: &[u8]) -> Result<Vec<Annotation>> {
    let mut annotations = Vec::new();

    for tal in bytes.split(|&b| b == TAL_END).filter(|tal| !tal.is_empty()) {
        let mut fields = tal.split(|&b| b == TAL_FIELD);
        let Some(timing) = fields.next() else {
            continue;
        };

        let mut timing = timing.split(|&b| b == TAL_DURATION);
        let onset_text = String::from_utf8_lossy(timing.next().unwrap_or_default());
        let onset: f64 = parse_field(&onset_text, "annotation onset")?;
        let duration: f64 = match timing.next() {
            Some(d) if !d.is_empty() => parse_field(&String::from_utf8_lossy(d), "annotation duration")?,
            _ => 0.0,
        };

        for text in fields.filter(|text| !text.is_empty()) {
            annotations.push(Annotation {
                onset,
                duration,
                description: String::from_utf8_lossy(text).to_string(),
            });
        }
    }

    Ok(annotations)
}

/// Writes recordings as EDF+C with one-second data records
pub struct EdfWriter;

impl EdfWriter {
    /// Write `recording` to `path`.
    ///
    /// Samples are padded with each channel's last value up to a whole number
    /// of records. Annotations go into an extra `EDF Annotations` signal.
    pub fn write<P: AsRef<Path>>(path: P, recording: &Recording) -> Result<()> {
        Self::validate(recording)?;

        let spr = recording.sample_rate as usize;
        let num_samples = recording.num_samples();
        let num_records = num_samples.div_ceil(spr);

        let bounds: Vec<(f64, f64)> = recording
            .data
            .par_iter()
            .map(|channel| physical_bounds(channel))
            .collect();

        let tal_records = annotation_records(&recording.annotations, num_records);
        let tal_bytes = tal_records.iter().map(Vec::len).max().unwrap_or(0);
        let tal_spr = tal_bytes.div_ceil(2).max(1);

        let num_signals = recording.num_channels() + 1;
        let file = File::create(path.as_ref())?;
        let mut writer = BufWriter::new(file);

        // Main header
        write_fixed_string(&mut writer, "0", 8)?;
        write_fixed_string(&mut writer, "X X X X", 80)?;
        write_fixed_string(&mut writer, "Startdate X X X X", 80)?;
        write_fixed_string(&mut writer, "01.01.85", 8)?;
        write_fixed_string(&mut writer, "00.00.00", 8)?;
        write_fixed_string(&mut writer, &(256 * (num_signals + 1)).to_string(), 8)?;
        write_fixed_string(&mut writer, "EDF+C", 44)?;
        write_fixed_string(&mut writer, &num_records.to_string(), 8)?;
        write_fixed_string(&mut writer, "1", 8)?;
        write_fixed_string(&mut writer, &num_signals.to_string(), 4)?;

        // Signal headers, field by field
        let mut signal_headers: Vec<EdfSignalHeader> = recording
            .labels
            .iter()
            .zip(&bounds)
            .map(|(label, &(physical_minimum, physical_maximum))| EdfSignalHeader {
                label: label.clone(),
                transducer_type: String::new(),
                physical_dimension: "uV".to_string(),
                physical_minimum,
                physical_maximum,
                digital_minimum: DIGITAL_MIN,
                digital_maximum: DIGITAL_MAX,
                prefiltering: String::new(),
                num_samples_per_record: spr,
                reserved: String::new(),
            })
            .collect();
        signal_headers.push(EdfSignalHeader {
            label: ANNOTATION_LABEL.to_string(),
            transducer_type: String::new(),
            physical_dimension: String::new(),
            physical_minimum: -1.0,
            physical_maximum: 1.0,
            digital_minimum: DIGITAL_MIN,
            digital_maximum: DIGITAL_MAX,
            prefiltering: String::new(),
            num_samples_per_record: tal_spr,
            reserved: String::new(),
        });
        write_signal_headers(&mut writer, &signal_headers)?;

        let digital: Vec<Vec<i16>> = recording
            .data
            .par_iter()
            .zip(signal_headers.par_iter())
            .map(|(channel, sh)| to_digital(channel, sh, num_records * spr))
            .collect();

        for (record_idx, tal) in tal_records.iter().enumerate() {
            let range = record_idx * spr..(record_idx + 1) * spr;
            for channel in &digital {
                for value in &channel[range.clone()] {
                    writer.write_all(&value.to_le_bytes())?;
                }
            }

            let mut padded = tal.clone();
            padded.resize(tal_spr * 2, 0);
            writer.write_all(&padded)?;
        }

        writer.flush()?;
        log::info!(
            "Wrote EDF+ file {}: {} channels, {} records, {} annotations",
            path.as_ref().display(),
            recording.num_channels(),
            num_records,
            recording.annotations.len()
        );
        Ok(())
    }

    fn validate(recording: &Recording) -> Result<()> {
        if recording.data.is_empty() {
            return Err(CoreError::InvalidInput("no channels to write".to_string()));
        }
        if recording.labels.len() != recording.num_channels() {
            return Err(CoreError::InvalidInput(format!(
                "{} channels but {} labels",
                recording.num_channels(),
                recording.labels.len()
            )));
        }
        let samples = recording.num_samples();
        if samples == 0 {
            return Err(CoreError::InvalidInput("no samples to write".to_string()));
        }
        if recording.data.iter().any(|channel| channel.len() != samples) {
            return Err(CoreError::InvalidInput(
                "all channels must have the same number of samples for EDF".to_string(),
            ));
        }
        let rate = recording.sample_rate;
        if !(rate >= 1.0) || rate.fract() != 0.0 {
            return Err(CoreError::UnsupportedFormat(format!(
                "EDF with one-second records needs a whole-number sample rate, got {}",
                rate
            )));
        }
        Ok(())
    }
}

/// Write a recording as EDF+C
pub fn write_edf<P: AsRef<Path>>(path: P, recording: &Recording) -> Result<()> {
    EdfWriter::write(path, recording)
}

fn write_fixed_string<W: Write>(writer: &mut W, s: &str, size: usize) -> Result<()> {
    let mut buffer = vec![b' '; size];
    let bytes = s.as_bytes();
    let copy_len = bytes.len().min(size);
    buffer[..copy_len].copy_from_slice(&bytes[..copy_len]);
    writer.write_all(&buffer)?;
    Ok(())
}

fn write_signal_headers<W: Write>(writer: &mut W, headers: &[EdfSignalHeader]) -> Result<()> {
    for sh in headers {
        write_fixed_string(writer, &sh.label, 16)?;
    }
    for sh in headers {
        write_fixed_string(writer, &sh.transducer_type, 80)?;
    }
    for sh in headers {
        write_fixed_string(writer, &sh.physical_dimension, 8)?;
    }
    for sh in headers {
        write_fixed_string(writer, &format_number(sh.physical_minimum), 8)?;
    }
    for sh in headers {
        write_fixed_string(writer, &format_number(sh.physical_maximum), 8)?;
    }
    for sh in headers {
        write_fixed_string(writer, &sh.digital_minimum.to_string(), 8)?;
    }
    for sh in headers {
        write_fixed_string(writer, &sh.digital_maximum.to_string(), 8)?;
    }
    for sh in headers {
        write_fixed_string(writer, &sh.prefiltering, 80)?;
    }
    for sh in headers {
        write_fixed_string(writer, &sh.num_samples_per_record.to_string(), 8)?;
    }
    for sh in headers {
        write_fixed_string(writer, &sh.reserved, 32)?;
    }
    Ok(())
}

/// Shortest rendering of `value` that fits an 8-character header field
fn format_number(value: f64) -> String {
    let plain = value.to_string();
    if plain.len() <= 8 {
        return plain;
    }
    (0..=6)
        .rev()
        .map(|precision| format!("{:.*}", precision, value))
        .find(|s| s.len() <= 8)
        .unwrap_or_else(|| format!("{:.1e}", value))
}

/// Header value as a reader will see it
fn header_value(value: f64) -> f64 {
    format_number(value).parse().unwrap_or(value)
}

/// Physical range of a channel with a 10% margin, rounded to what the header
/// can hold so reader and writer agree on the calibration.
fn physical_bounds(channel: &[f64]) -> (f64, f64) {
    let (min, max) = channel
        .iter()
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    if !min.is_finite() {
        return (-1.0, 1.0);
    }

    let margin = (max - min).abs() * 0.1;
    let (mut lo, mut hi) = (header_value(min - margin), header_value(max + margin));
    if !(hi > lo) {
        lo = header_value(min - 1.0);
        hi = header_value(max + 1.0);
    }
    (lo, hi)
}

fn to_digital(channel: &[f64], sh: &EdfSignalHeader, total: usize) -> Vec<i16> {
    let (gain, offset) = (sh.gain(), sh.offset());
    let pad = channel.last().copied().unwrap_or(0.0);

    channel
        .iter()
        .copied()
        .chain(std::iter::repeat(pad))
        .take(total)
        .map(|physical| {
            ((physical - offset) / gain)
                .round()
                .clamp(sh.digital_minimum as f64, sh.digital_maximum as f64) as i16
        })
        .collect()
}

/// TAL bytes for every one-second record: a timekeeping stamp followed by the
/// annotations whose onset falls inside the record.
fn annotation_records(annotations: &[Annotation], num_records: usize) -> Vec<Vec<u8>> {
    let mut records: Vec<Vec<u8>> = (0..num_records)
        .map(|r| {
            let mut tal = format!("+{}", r).into_bytes();
            tal.extend([TAL_FIELD, TAL_FIELD, TAL_END]);
            tal
        })
        .collect();

    let last = num_records.saturating_sub(1) as f64;
    for annotation in annotations {
        let record = annotation.onset.floor().clamp(0.0, last) as usize;
        let Some(tal) = records.get_mut(record) else {
            continue;
        };

        tal.extend(format!("{:+}", annotation.onset).into_bytes());
        if annotation.duration > 0.0 {
            tal.push(TAL_DURATION);
            tal.extend(annotation.duration.to_string().into_bytes());
        }
        tal.push(TAL_FIELD);
        tal.extend(
            annotation
                .description
                .replace(['\u{14}', '\u{0}'], " ")
                .into_bytes(),
        );
        tal.extend([TAL_FIELD, TAL_END]);
    }

    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_recording(seconds: usize, rate: usize) -> Recording {
        let n = seconds * rate;
        Recording {
            data: vec![
                (0..n).map(|i| (i as f64 * 0.05).sin() * 50.0).collect(),
                (0..n).map(|i| (i % 17) as f64 - 8.0).collect(),
            ],
            labels: vec!["EEG FP1".to_string(), "EEG F3".to_string()],
            sample_rate: rate as f64,
            annotations: vec![Annotation {
                onset: 1.5,
                duration: 0.0,
                description: "Eyes closed".to_string(),
            }],
        }
    }

    #[test]
    fn test_signal_header_calculations() {
        let header = EdfSignalHeader {
            label: "Test".to_string(),
            transducer_type: "".to_string(),
            physical_dimension: "uV".to_string(),
            physical_minimum: -100.0,
            physical_maximum: 100.0,
            digital_minimum: -32768,
            digital_maximum: 32767,
            prefiltering: "".to_string(),
            num_samples_per_record: 256,
            reserved: "".to_string(),
        };

        assert_eq!(header.sample_frequency(1.0), 256.0);
        assert!((header.gain() - 0.00305).abs() < 0.001);
    }

    #[test]
    fn test_write_then_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rec.edf");
        let original = sample_recording(4, 128);

        write_edf(&path, &original).unwrap();
        let reader = EdfReader::open(&path).unwrap();
        assert!(reader.header.is_edf_plus());
        assert_eq!(reader.num_records(), 4);

        let read = reader.into_recording().unwrap();
        assert_eq!(read.labels, original.labels);
        assert_eq!(read.sample_rate, 128.0);
        assert_eq!(read.num_samples(), original.num_samples());

        for (written, restored) in original.data.iter().zip(&read.data) {
            let (lo, hi) = physical_bounds(written);
            let step = (hi - lo) / 65535.0;
            for (a, b) in written.iter().zip(restored) {
                assert!((a - b).abs() <= step, "{a} vs {b}");
            }
        }

        assert_eq!(read.annotations, original.annotations);
    }

    #[test]
    fn test_padding_to_whole_records() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("short.edf");
        let mut recording = sample_recording(2, 100);
        for channel in &mut recording.data {
            channel.truncate(150);
        }

        write_edf(&path, &recording).unwrap();
        let read = read_edf(&path).unwrap();

        assert_eq!(read.num_samples(), 200);
    }

    #[test]
    fn test_annotations_with_duration_and_late_onset() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ann.edf");
        let mut recording = sample_recording(3, 64);
        recording.annotations = vec![
            Annotation {
                onset: 0.25,
                duration: 1.75,
                description: "seizure".to_string(),
            },
            Annotation {
                onset: 2.5,
                duration: 0.5,
                description: "artifact".to_string(),
            },
            Annotation {
                onset: 2.5,
                duration: 0.0,
                description: "marker".to_string(),
            },
        ];

        write_edf(&path, &recording).unwrap();
        let read = read_edf(&path).unwrap();

        assert_eq!(read.annotations, recording.annotations);
    }

    #[test]
    fn test_constant_channel_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("flat.edf");
        let recording = Recording {
            data: vec![vec![12.5; 256]],
            labels: vec!["EEG CZ".to_string()],
            sample_rate: 256.0,
            annotations: vec![],
        };

        write_edf(&path, &recording).unwrap();
        let read = read_edf(&path).unwrap();

        assert!(read.data[0].iter().all(|v| (v - 12.5).abs() < 1e-3));
    }

    #[test]
    fn test_fractional_rate_rejected() {
        let dir = TempDir::new().unwrap();
        let mut recording = sample_recording(1, 100);
        recording.sample_rate = 100.5;

        assert!(matches!(
            write_edf(dir.path().join("x.edf"), &recording),
            Err(CoreError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_truncated_file_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rec.edf");
        write_edf(&path, &sample_recording(4, 128)).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 100]).unwrap();
        assert!(matches!(read_edf(&path), Err(CoreError::CorruptFile(_))));

        std::fs::write(&path, &bytes[..200]).unwrap();
        assert!(matches!(read_edf(&path), Err(CoreError::CorruptFile(_))));
    }

    #[test]
    fn test_mixed_sample_rates_unsupported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mixed.edf");
        write_edf(&path, &sample_recording(1, 100)).unwrap();

        // Patch the second signal's samples-per-record field (signals: FP1, F3, annotations)
        let mut bytes = std::fs::read(&path).unwrap();
        let ns = 3;
        let field_start = 256 + ns * (16 + 80 + 8 + 8 + 8 + 8 + 8 + 80) + 8;
        bytes[field_start..field_start + 8].copy_from_slice(b"50      ");
        std::fs::write(&path, &bytes).unwrap();

        assert!(matches!(
            read_edf(&path),
            Err(CoreError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_parse_tals() {
        let bytes = b"+0\x14\x14\x00+1.5\x1512\x14Spike\x14Second\x14\x00\x00\x00";
        let annotations = parse_tals(bytes).unwrap();

        assert_eq!(annotations.len(), 2);
        assert_eq!(annotations[0].onset, 1.5);
        assert_eq!(annotations[0].duration, 12.0);
        assert_eq!(annotations[1].description, "Second");
    }

    #[test]
    fn test_format_number_fits_field() {
        assert_eq!(format_number(-100.0), "-100");
        assert_eq!(format_number(0.123456789), "0.123457");
        assert!(format_number(-1234.56789).len() <= 8);
        assert!(format_number(123456789012.0).len() <= 8);
    }
}
