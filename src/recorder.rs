//! Session recording
//!
//! The recorder keeps one append-only stream per channel for the lifetime of a
//! session and serializes each non-empty stream to its own CSV file on flush.
//!
//! ```text
//! {base}-rr-{timestamp}.csv       time,heart rate,rr interval[,current_time][,std,state]
//! {base}-ecg-{timestamp}.csv      time[,current_time],timestamp,ecg
//! {base}-tapping-{timestamp}.csv  timestamp[,current_time]
//! ```

use crate::error::PulseError;
use crate::types::{EcgSample, HeartRateSample, HrvState, TapSample, WALL_CLOCK_FORMAT};
use chrono::{Local, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Timestamp format embedded in output file names
pub const FILE_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H-%M-%S";

/// Column switches fixed for the whole session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordOptions {
    /// Add a `current_time` column with the local time of day
    pub save_wall_clock: bool,
    /// Add `std` (sdNN) and `state` columns to the RR stream
    pub record_sdnn: bool,
}

/// Output stream kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Rr,
    Ecg,
    Tapping,
}

impl StreamKind {
    pub fn suffix(&self) -> &'static str {
        match self {
            StreamKind::Rr => "rr",
            StreamKind::Ecg => "ecg",
            StreamKind::Tapping => "tapping",
        }
    }
}

/// One RR row: the sample plus the derived values at the time it arrived
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RrRecord {
    pub sample: HeartRateSample,
    pub sdnn: Option<f64>,
    pub state: HrvState,
}

/// Append-only per-channel session streams
#[derive(Debug, Clone, Default)]
pub struct SessionRecorder {
    options: RecordOptions,
    rr: Vec<RrRecord>,
    ecg: Vec<EcgSample>,
    taps: Vec<TapSample>,
}

impl SessionRecorder {
    pub fn new(options: RecordOptions) -> Self {
        Self {
            options,
            rr: Vec::new(),
            ecg: Vec::new(),
            taps: Vec::new(),
        }
    }

    pub fn options(&self) -> RecordOptions {
        self.options
    }

    pub fn record_rr(&mut self, sample: HeartRateSample, sdnn: Option<f64>, state: HrvState) {
        self.rr.push(RrRecord {
            sample,
            sdnn,
            state,
        });
    }

    pub fn record_ecg(&mut self, sample: EcgSample) {
        self.ecg.push(sample);
    }

    pub fn record_tap(&mut self, sample: TapSample) {
        self.taps.push(sample);
    }

    pub fn rr_records(&self) -> &[RrRecord] {
        &self.rr
    }

    pub fn ecg_samples(&self) -> &[EcgSample] {
        &self.ecg
    }

    pub fn taps(&self) -> &[TapSample] {
        &self.taps
    }

    pub fn is_empty(&self) -> bool {
        self.rr.is_empty() && self.ecg.is_empty() && self.taps.is_empty()
    }

    /// Write every non-empty stream next to `base`, stamped with the current local time.
    ///
    /// The recorded data is left untouched, so a failed flush can be retried.
    pub fn flush(&self, base: &Path) -> Result<Vec<PathBuf>, PulseError> {
        let stamp = Local::now().format(FILE_TIMESTAMP_FORMAT).to_string();
        self.flush_with_stamp(base, &stamp)
    }

    /// Write every non-empty stream using an explicit file-name timestamp.
    ///
    /// All or nothing: when a stream fails, the files already written by this call
    /// are removed, so a retry with a fresh stamp leaves one file per stream.
    pub fn flush_with_stamp(&self, base: &Path, stamp: &str) -> Result<Vec<PathBuf>, PulseError> {
        let mut written = Vec::new();
        for kind in [StreamKind::Rr, StreamKind::Ecg, StreamKind::Tapping] {
            let path = stream_path(base, kind, stamp);
            match self.write_stream(kind, &path) {
                Ok(0) => {}
                Ok(rows) => {
                    log::info!("Saved {} {} rows to {}", rows, kind.suffix(), path.display());
                    written.push(path);
                }
                Err(e) => {
                    for done in &written {
                        if let Err(remove_err) = std::fs::remove_file(done) {
                            log::warn!("Failed to remove partial output {}: {}", done.display(), remove_err);
                        }
                    }
                    return Err(e);
                }
            }
        }
        Ok(written)
    }

    /// Rows written for `kind`; an empty stream creates no file
    fn write_stream(&self, kind: StreamKind, path: &Path) -> Result<usize, PulseError> {
        match kind {
            StreamKind::Rr if !self.rr.is_empty() => {
                self.write_rr(File::create(path)?)?;
                Ok(self.rr.len())
            }
            StreamKind::Ecg if !self.ecg.is_empty() => {
                self.write_ecg(File::create(path)?)?;
                Ok(self.ecg.len())
            }
            StreamKind::Tapping if !self.taps.is_empty() => {
                self.write_taps(File::create(path)?)?;
                Ok(self.taps.len())
            }
            _ => Ok(0),
        }
    }

    /// Header row of the RR stream for these options
    pub fn rr_header(&self) -> Vec<&'static str> {
        let mut header = vec!["time", "heart rate", "rr interval"];
        if self.options.save_wall_clock {
            header.push("current_time");
        }
        if self.options.record_sdnn {
            header.extend(["std", "state"]);
        }
        header
    }

    pub fn ecg_header(&self) -> Vec<&'static str> {
        let mut header = vec!["time"];
        if self.options.save_wall_clock {
            header.push("current_time");
        }
        header.extend(["timestamp", "ecg"]);
        header
    }

    pub fn tap_header(&self) -> Vec<&'static str> {
        let mut header = vec!["timestamp"];
        if self.options.save_wall_clock {
            header.push("current_time");
        }
        header
    }

    pub fn write_rr<W: Write>(&self, writer: W) -> Result<(), PulseError> {
        let mut csv = csv::Writer::from_writer(writer);
        csv.write_record(self.rr_header())?;

        for record in &self.rr {
            let mut row = vec![
                record.sample.t.to_string(),
                record.sample.payload.hr.to_string(),
                record.sample.payload.rr.to_string(),
            ];
            if self.options.save_wall_clock {
                row.push(wall_clock_cell(record.sample.wall_clock));
            }
            if self.options.record_sdnn {
                row.push(record.sdnn.map(|v| v.to_string()).unwrap_or_default());
                row.push(record.state.index().to_string());
            }
            csv.write_record(&row)?;
        }

        csv.flush()?;
        Ok(())
    }

    pub fn write_ecg<W: Write>(&self, writer: W) -> Result<(), PulseError> {
        let mut csv = csv::Writer::from_writer(writer);
        csv.write_record(self.ecg_header())?;

        for sample in &self.ecg {
            let mut row = vec![sample.t.to_string()];
            if self.options.save_wall_clock {
                row.push(wall_clock_cell(sample.wall_clock));
            }
            row.push(sample.payload.device_timestamp.to_string());
            row.push(sample.payload.ecg.to_string());
            csv.write_record(&row)?;
        }

        csv.flush()?;
        Ok(())
    }

    pub fn write_taps<W: Write>(&self, writer: W) -> Result<(), PulseError> {
        let mut csv = csv::Writer::from_writer(writer);
        csv.write_record(self.tap_header())?;

        for tap in &self.taps {
            let mut row = vec![tap.t.to_string()];
            if self.options.save_wall_clock {
                row.push(wall_clock_cell(tap.wall_clock));
            }
            csv.write_record(&row)?;
        }

        csv.flush()?;
        Ok(())
    }
}

/// `{base}-{kind}-{stamp}.csv`, keeping the directory part of `base`
pub fn stream_path(base: &Path, kind: StreamKind, stamp: &str) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(format!("-{}-{}.csv", kind.suffix(), stamp));
    PathBuf::from(name)
}

fn wall_clock_cell(time: Option<NaiveTime>) -> String {
    time.map(|t| t.format(WALL_CLOCK_FORMAT).to_string())
        .unwrap_or_default()
}
