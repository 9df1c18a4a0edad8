use std::path::PathBuf;
use thiserror::Error;

use super::constants::*;
use super::detector::DetectorKind;
use super::worker_status::WorkerStatus;

#[derive(Debug, Clone, Error)]
pub enum DecodeError {
    #[error("{0} buffer has {1} bytes, too few for a VM-USB header")]
    TruncatedHeader(DetectorKind, usize),
    #[error("{0} buffer header has a payload of {1} words; at least {min} are required", min=VME_TIMESTAMP_WORDS)]
    MalformedHeader(DetectorKind, u16),
}

/// A decoded buffer whose length did not match what its header promised.
///
/// This is not returned as an error; the decoder reports it and keeps what it could read.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("End of {system} read not equal to size of buffer given -- Buffer Size: {buffer_size} Expected Size: {expected_size} Read Cursor: {cursor} Packets: {n_packets}")]
pub struct BufferLengthMismatch {
    pub system: DetectorKind,
    pub buffer_size: usize,
    pub expected_size: usize,
    pub cursor: usize,
    pub n_packets: usize,
}

#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("Found invalid detector keyword: {0}")]
    InvalidKeyword(String),
    #[error("Found invalid array side: {0}")]
    InvalidSide(String),
}

#[derive(Debug, Error)]
pub enum ChannelMapError {
    #[error("ChannelMap failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("ChannelMap failed to parse an integer: {0}")]
    ParsingError(#[from] std::num::ParseIntError),
    #[error("ChannelMap failed to parse a detector field: {0}")]
    BadDetector(#[from] DetectorError),
    #[error("ChannelMap was given a file with the incorrect format; line {0} has the wrong number of columns")]
    BadFileFormat(usize),
    #[error("ChannelMap found address {0:#010x} more than once")]
    DuplicateAddress(u32),
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Output sink has no stream with handle {0}")]
    UnknownStream(usize),
    #[error("Output sink stream {0} was already finalized")]
    StreamFinalized(String),
    #[error("Output sink stream {0} already exists")]
    DuplicateStream(String),
    #[error("Output sink container was already closed")]
    ContainerClosed,
    #[cfg(feature = "hdf5")]
    #[error("Output sink failed due to HDF5 error: {0}")]
    HDF5Error(#[from] hdf5::Error),
    #[error("Output sink could not store string attribute: {0}")]
    BadString(String),
    #[error("Output sink failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Stream {0} was used after it was finalized")]
    StreamLifecycleViolation(String),
    #[error("Ledger failed due to output sink error: {0}")]
    SinkError(#[from] SinkError),
}

#[derive(Debug, Error)]
pub enum EvtItemError {
    #[error("Error parsing buffer into a NSCLDAQ RingItem: {0}")]
    IOError(#[from] std::io::Error),
    #[error("NSCLDAQ RingItem of type {0} could not be converted to {1}")]
    WrongType(u32, &'static str),
    #[error("In NSCLDAQ RingItem, the buffer has insufficent size and failed")]
    ItemSizeError,
}

#[derive(Debug, Error)]
pub enum EvtFileError {
    #[error("Reading item from NSCLDAQ EvtFile failed: {0}")]
    BadItem(#[from] EvtItemError),
    #[error("Could not open NSCLDAQ EvtFile because file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("NSCLDAQ EvtFile reached end-of-file")]
    EndOfFile,
    #[error("NSCLDAQ EvtFile recieved an IO error and failed: {0}")]
    IOError(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum EvtStackError {
    #[error("NSCLDAQ EvtStack failed with IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("NSCLDAQ EvtStack did not find any matching files in the Evt directory")]
    NoMatchingFiles,
    #[error("EvtStack failed due to EvtFile error: {0}")]
    FileError(#[from] EvtFileError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration as file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Config failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Config failed to parse YAML: {0}")]
    ParsingError(#[from] serde_yaml::Error),
    #[error("Config has no evt_path")]
    NoEvtPath,
}

#[derive(Debug, Error)]
pub enum BuilderError {
    #[error("HitBuilder recieved a buffer for detector system {0}, which is not configured")]
    UnconfiguredSystem(DetectorKind),
    #[error("HitBuilder failed due to Ledger error: {0}")]
    LedgerError(#[from] LedgerError),
    #[error("HitBuilder failed due to output sink error: {0}")]
    SinkError(#[from] SinkError),
}

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("Processor failed due to HitBuilder error: {0}")]
    BuilderError(#[from] BuilderError),
    #[error("Processor failed due to EvtStack error: {0}")]
    EvtError(#[from] EvtStackError),
    #[error("Processor failed due to EvtItem error: {0}")]
    BadRingConversion(#[from] EvtItemError),
    #[error("Processor failed due to output sink error: {0}")]
    SinkError(#[from] SinkError),
    #[error("Processor failed due to Config error: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("Processor failed due to ChannelMap error: {0}")]
    MapError(#[from] ChannelMapError),
    #[error("Processor failed due to Send error: {0}")]
    SendError(#[from] std::sync::mpsc::SendError<WorkerStatus>),
    #[error("Processor failed due to IO error: {0}")]
    IoError(#[from] std::io::Error),
}
