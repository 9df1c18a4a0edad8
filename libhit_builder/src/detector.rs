use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::ops::Range;
use std::str::FromStr;

use super::channel_map::ChannelResolver;
use super::constants::*;
use super::error::{BufferLengthMismatch, DecodeError, DetectorError};
use super::hit::{ChannelReading, Hit};
use super::janus::Janus;

/// The detector systems the builder knows how to decode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectorKind {
    Janus,
}

impl DetectorKind {
    /// System id packed into the top byte of every address of this system
    pub fn system_id(&self) -> u32 {
        match self {
            Self::Janus => JANUS_SYSTEM_ID,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Janus => "janus",
        }
    }

    /// Make the decoder/assembler for this system
    pub fn create_detector(&self, notice_limit: u64) -> Box<dyn Detector> {
        match self {
            Self::Janus => Box::new(Janus::new(notice_limit)),
        }
    }
}

impl Display for DetectorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for DetectorKind {
    type Err = DetectorError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "janus" | "JANUS" => Ok(Self::Janus),
            _ => Err(DetectorError::InvalidKeyword(s.to_string())),
        }
    }
}

/// One acquisition payload for one detector system
#[derive(Debug, Clone, Copy)]
pub struct RawBuffer<'a> {
    pub system: DetectorKind,
    pub sequence: u64,
    pub payload: &'a [u8],
}

/// Where a detector system is on the common time axis
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunClock {
    /// Last timestamp seen, used when a buffer has none of its own
    pub timestamp: i64,
    /// Added to every timestamp read from the hardware since the last restart
    pub offset: i64,
}

/// Result of decoding one buffer
#[derive(Debug, Clone, Default)]
pub struct DecodedBuffer {
    pub readings: Vec<ChannelReading>,
    pub timestamp: i64,
    /// Packets the header promised (readings are what survived validity and resolution)
    pub n_packets: usize,
    /// Set when the buffer came from a trigger other than the primary one
    pub foreign_trigger: bool,
    /// Set when the buffer size did not match its header; readings are still usable
    pub mismatch: Option<BufferLengthMismatch>,
}

/// Result of assembling one buffer's readings
#[derive(Debug, Clone, Default)]
pub struct Assembly {
    /// Zero or one composite hits
    pub hits: Vec<Hit>,
    /// Every working reading, winner or not, as an uncorrelated hit
    pub channels: Vec<Hit>,
}

/// Running tallies of what a decoder saw and threw away
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodeStats {
    pub buffers: u64,
    pub malformed: u64,
    pub foreign_triggers: u64,
    pub invalid_packets: u64,
    pub unknown_channels: u64,
    pub length_mismatches: u64,
}

impl Display for DecodeStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "buffers: {} malformed: {} foreign triggers: {} invalid packets: {} unknown channels: {} length mismatches: {}",
            self.buffers,
            self.malformed,
            self.foreign_triggers,
            self.invalid_packets,
            self.unknown_channels,
            self.length_mismatches
        )
    }
}

/// Per-system decode and coincidence logic.
///
/// Each detector system has its own packet layout and its own idea of which readings belong
/// together, so both halves are implemented per system.
pub trait Detector: Send + std::fmt::Debug {
    fn kind(&self) -> DetectorKind;

    /// Turn a raw buffer into resolved channel readings plus the buffer timestamp
    fn decode(
        &mut self,
        buffer: &RawBuffer<'_>,
        resolver: &dyn ChannelResolver,
        clock: &RunClock,
    ) -> Result<DecodedBuffer, DecodeError>;

    /// Correlate the readings of one buffer into hits
    fn assemble(
        &self,
        readings: &[ChannelReading],
        timestamp: i64,
        resolver: &dyn ChannelResolver,
    ) -> Assembly;

    fn stats(&self) -> &DecodeStats;
}

/// Storage for a detector system's hits, addressed by absolute index.
///
/// Indices keep counting up for the whole run. Once every consumer is done with a prefix of
/// the arena, it is released and the memory reused; indices are never reused.
#[derive(Debug, Clone, Default)]
pub struct HitArena {
    hits: Vec<Hit>,
    base: usize,
}

impl HitArena {
    pub fn push(&mut self, hit: Hit) -> usize {
        self.hits.push(hit);
        self.end() - 1
    }

    /// Absolute index of the oldest hit still held
    pub fn base(&self) -> usize {
        self.base
    }

    /// Absolute index one past the newest hit
    pub fn end(&self) -> usize {
        self.base + self.hits.len()
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    /// The hits in an absolute index range. Released or future indices are clamped away.
    pub fn slice(&self, range: Range<usize>) -> &[Hit] {
        let start = range.start.clamp(self.base, self.end()) - self.base;
        let stop = range.end.clamp(self.base, self.end()) - self.base;
        if start >= stop {
            return &[];
        }
        &self.hits[start..stop]
    }

    /// Drop every hit with an absolute index below `index`
    pub fn release_before(&mut self, index: usize) {
        let count = index.clamp(self.base, self.end()) - self.base;
        if count > 0 {
            self.hits.drain(..count);
            self.base += count;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Hit> {
        self.hits.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Hit> {
        self.hits.iter_mut()
    }
}

/// The mutable state of one detector system over a run
#[derive(Debug, Clone, Default)]
pub struct DetectorSystemState {
    pub hits: HitArena,
    /// All channels of the most recent buffer
    pub channels: Vec<Hit>,
    pub clock: RunClock,
    /// Wall clock of the last run start. None until the first restart.
    pub run_start: Option<u32>,
    pub hits_built: u64,
}

impl DetectorSystemState {
    /// Move the whole system to a new wall-clock reference.
    ///
    /// The offset `(unix_time - reference) * 1e9` is added to the running clock, to every hit
    /// still held, and to every timestamp read afterwards. Restarts must arrive in increasing
    /// wall-clock order; an earlier restart is applied as given and moves time backwards.
    /// Returns the offset applied.
    pub fn realign(&mut self, unix_time: u32) -> i64 {
        let previous = self.run_start.unwrap_or(RUN_START_EPOCH);
        let tdiff = unix_time as i64 - previous as i64;
        let delta = tdiff * TIMESTAMP_UNITS_PER_SECOND;

        self.clock.timestamp += delta;
        self.clock.offset += delta;
        for hit in self.hits.iter_mut() {
            hit.shift_timestamp(delta);
        }
        self.run_start = Some(unix_time);
        delta
    }
}

/// What a call to [`DetectorSystem::build_hits`] added
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildOutcome {
    pub system: DetectorKind,
    /// Absolute arena index of the first hit built from this buffer
    pub first_new: usize,
    pub n_hits: usize,
    pub timestamp: i64,
    pub foreign_trigger: bool,
}

/// A detector implementation bound to its state
#[derive(Debug)]
pub struct DetectorSystem {
    detector: Box<dyn Detector>,
    pub state: DetectorSystemState,
    discard_foreign_triggers: bool,
}

impl DetectorSystem {
    pub fn new(kind: DetectorKind, notice_limit: u64, discard_foreign_triggers: bool) -> Self {
        Self::with_detector(kind.create_detector(notice_limit), discard_foreign_triggers)
    }

    pub fn with_detector(detector: Box<dyn Detector>, discard_foreign_triggers: bool) -> Self {
        Self {
            detector,
            state: DetectorSystemState::default(),
            discard_foreign_triggers,
        }
    }

    pub fn kind(&self) -> DetectorKind {
        self.detector.kind()
    }

    /// Decode and assemble one buffer, appending any hits to the arena
    pub fn build_hits(
        &mut self,
        buffer: &RawBuffer<'_>,
        resolver: &dyn ChannelResolver,
    ) -> Result<BuildOutcome, DecodeError> {
        let decoded = self.detector.decode(buffer, resolver, &self.state.clock)?;
        let first_new = self.state.hits.end();
        if decoded.timestamp > self.state.clock.timestamp {
            self.state.clock.timestamp = decoded.timestamp;
        }

        if decoded.foreign_trigger && self.discard_foreign_triggers {
            self.state.channels.clear();
            return Ok(BuildOutcome {
                system: self.kind(),
                first_new,
                n_hits: 0,
                timestamp: decoded.timestamp,
                foreign_trigger: true,
            });
        }

        let assembly = self
            .detector
            .assemble(&decoded.readings, decoded.timestamp, resolver);
        let n_hits = assembly.hits.len();
        for hit in assembly.hits {
            self.state.hits.push(hit);
        }
        self.state.hits_built += n_hits as u64;
        self.state.channels = assembly.channels;

        Ok(BuildOutcome {
            system: self.kind(),
            first_new,
            n_hits,
            timestamp: decoded.timestamp,
            foreign_trigger: decoded.foreign_trigger,
        })
    }

    /// Apply a run restart at the given unix time. See [`DetectorSystemState::realign`].
    pub fn set_run_start(&mut self, unix_time: u32) -> i64 {
        if let Some(previous) = self.state.run_start {
            if unix_time < previous {
                spdlog::warn!(
                    "{} run restart at {} is earlier than the previous restart at {}; timestamps will move backwards",
                    self.kind(),
                    unix_time,
                    previous
                );
            }
        }
        self.state.realign(unix_time)
    }

    pub fn hits(&self) -> &HitArena {
        &self.state.hits
    }

    /// Every channel of the most recent buffer, including the ones that lost the coincidence
    pub fn channels(&self) -> &[Hit] {
        &self.state.channels
    }

    pub fn stats(&self) -> &DecodeStats {
        self.detector.stats()
    }

    pub fn log_summary(&self) {
        spdlog::info!("{} -- {}", self.kind(), self.stats());
        spdlog::info!("{} -- hits built: {}", self.kind(), self.state.hits_built);
    }
}
