use hdf5::types::VarLenUnicode;
use hdf5::{File, Group};
use ndarray::Array2;
use std::path::Path;
use std::str::FromStr;

use super::error::SinkError;
use super::event_builder::BuildWindow;
use super::ring_item::{BeginRunItem, EndRunItem, RunInfo};
use super::sink::{BuiltRecord, OutputSink, StreamHandle};

const STREAMS_NAME: &str = "streams";
/// Number of columns in a record dataset
const RECORD_COLUMNS: usize = 10;
/// Value of the build_window attribute for immediate streams
const IMMEDIATE_WINDOW: i64 = -1;
/// This is the version of the output format
const FORMAT_VERSION: &str = "1.0";

// Structure
// streams - version, run_number, run_title, run_start, run_stop, run_time
// |---- <stream name> - build_window, n_records, n_hits
// |    |---- record_#(dset) - timestamp
//
// Record columns: system, address, timestamp, charge, time, flags,
//                 back_address, back_charge, back_time, back_timestamp
// Hits without a back side have -1 in the back columns

#[derive(Debug)]
struct WriterStream {
    name: String,
    group: Group,
    n_records: u64,
    n_hits: u64,
    finalized: bool,
}

/// A simple struct which wraps around the hdf5-rust library.
///
/// Opens an HDF5 file for one run and writes every record of every stream as a dataset.
#[derive(Debug)]
pub struct HDFWriter {
    file_handle: File,
    streams_group: Group,
    streams: Vec<WriterStream>,
    closed: bool,
}

fn to_varlen(value: &str) -> Result<VarLenUnicode, SinkError> {
    VarLenUnicode::from_str(value).map_err(|e| SinkError::BadString(e.to_string()))
}

/// Convert a record to its data matrix, one row per hit
fn record_matrix(record: &BuiltRecord<'_>) -> Array2<i64> {
    let mut matrix = Array2::<i64>::from_elem([record.len(), RECORD_COLUMNS], -1);
    for (row, (system, hit)) in record.hits().enumerate() {
        matrix[[row, 0]] = system.system_id() as i64;
        matrix[[row, 1]] = hit.address as i64;
        matrix[[row, 2]] = hit.timestamp;
        matrix[[row, 3]] = hit.charge as i64;
        matrix[[row, 4]] = hit.time as i64;
        matrix[[row, 5]] = hit.flags.bits() as i64;
        if let Some(back) = &hit.back {
            matrix[[row, 6]] = back.address as i64;
            matrix[[row, 7]] = back.charge as i64;
            matrix[[row, 8]] = back.time as i64;
            matrix[[row, 9]] = back.timestamp;
        }
    }
    matrix
}

impl HDFWriter {
    /// Create the writer, opening a file at path and creating the streams group
    pub fn new(path: &Path) -> Result<Self, SinkError> {
        let file_handle = File::create(path)?;
        let version = format!("{}:{}", env!("CARGO_PKG_NAME"), FORMAT_VERSION);

        let streams_group = file_handle.create_group(STREAMS_NAME)?;
        streams_group
            .new_attr::<VarLenUnicode>()
            .create("version")?
            .write_scalar(&to_varlen(&version)?)?;

        Ok(Self {
            file_handle,
            streams_group,
            streams: Vec::new(),
            closed: false,
        })
    }

    /// Write meta information from the begin and end run items to the streams group
    pub fn write_run_info(&mut self, run_info: &RunInfo) -> Result<(), SinkError> {
        if self.closed {
            return Err(SinkError::ContainerClosed);
        }
        if let Some(BeginRunItem(begin)) = &run_info.begin {
            self.streams_group
                .new_attr::<u32>()
                .create("run_number")?
                .write_scalar(&begin.run)?;
            self.streams_group
                .new_attr::<u32>()
                .create("run_start")?
                .write_scalar(&begin.unix_time)?;
            self.streams_group
                .new_attr::<VarLenUnicode>()
                .create("run_title")?
                .write_scalar(&to_varlen(&begin.title)?)?;
        }
        if let Some(EndRunItem(end)) = &run_info.end {
            self.streams_group
                .new_attr::<u32>()
                .create("run_stop")?
                .write_scalar(&end.unix_time)?;
            self.streams_group
                .new_attr::<u32>()
                .create("run_time")?
                .write_scalar(&end.time_offset)?;
        }
        Ok(())
    }

    fn get_open(&mut self, stream: StreamHandle) -> Result<&mut WriterStream, SinkError> {
        if self.closed {
            return Err(SinkError::ContainerClosed);
        }
        let entry = self
            .streams
            .get_mut(stream.0)
            .ok_or(SinkError::UnknownStream(stream.0))?;
        if entry.finalized {
            return Err(SinkError::StreamFinalized(entry.name.clone()));
        }
        Ok(entry)
    }
}

impl OutputSink for HDFWriter {
    fn create_stream(
        &mut self,
        name: &str,
        window: &BuildWindow,
    ) -> Result<StreamHandle, SinkError> {
        if self.closed {
            return Err(SinkError::ContainerClosed);
        }
        if self.streams.iter().any(|s| s.name == name) {
            return Err(SinkError::DuplicateStream(name.to_string()));
        }
        let group = self.streams_group.create_group(name)?;
        let window_value = match window {
            BuildWindow::Immediate => IMMEDIATE_WINDOW,
            BuildWindow::Window(width) => *width,
        };
        group
            .new_attr::<i64>()
            .create("build_window")?
            .write_scalar(&window_value)?;
        group.new_attr::<u64>().create("n_records")?;
        group.new_attr::<u64>().create("n_hits")?;
        self.streams.push(WriterStream {
            name: name.to_string(),
            group,
            n_records: 0,
            n_hits: 0,
            finalized: false,
        });
        Ok(StreamHandle(self.streams.len() - 1))
    }

    fn accept(&mut self, stream: StreamHandle, record: &BuiltRecord<'_>) -> Result<(), SinkError> {
        let entry = self.get_open(stream)?;
        let data = record_matrix(record);
        let dset = entry
            .group
            .new_dataset_builder()
            .with_data(&data)
            .create(format!("record_{}", entry.n_records).as_str())?;
        dset.new_attr::<i64>()
            .create("timestamp")?
            .write_scalar(&record.timestamp)?;
        entry.n_records += 1;
        entry.n_hits += record.len() as u64;
        Ok(())
    }

    fn finalize(&mut self, stream: StreamHandle) -> Result<(), SinkError> {
        let entry = self.get_open(stream)?;
        entry.group.attr("n_records")?.write_scalar(&entry.n_records)?;
        entry.group.attr("n_hits")?.write_scalar(&entry.n_hits)?;
        entry.finalized = true;
        spdlog::info!(
            "Stream {} finalized with {} records ({} hits)",
            entry.name,
            entry.n_records,
            entry.n_hits
        );
        Ok(())
    }

    fn close_container(&mut self) -> Result<(), SinkError> {
        if self.closed {
            return Err(SinkError::ContainerClosed);
        }
        if let Some(open) = self.streams.iter().find(|s| !s.finalized) {
            spdlog::warn!("Closing output file with stream {} still open", open.name);
        }
        self.file_handle.flush()?;
        self.closed = true;
        Ok(())
    }
}
