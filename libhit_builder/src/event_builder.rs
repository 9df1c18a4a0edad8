use fxhash::FxHashMap;
use serde::{Deserialize, Serialize};

use super::detector::{BuildOutcome, DetectorKind, DetectorSystem};
use super::error::LedgerError;
use super::sink::{BuiltRecord, OutputSink, RecordSegment, StreamHandle};

/// How long a stream waits before calling its buffered hits complete
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildWindow {
    /// Every event is written as it is read
    Immediate,
    /// Build size, in timestamp units
    Window(i64),
}

/// Configuration of one output stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    pub name: String,
    pub build_window: BuildWindow,
    /// Detector systems feeding this stream. Empty means all of them.
    #[serde(default)]
    pub systems: Vec<DetectorKind>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Accumulating,
    ReadyToFlush,
    Finalized,
}

/// The build bookkeeping of one output stream.
///
/// Hits are not copied into the stream. For each detector system the stream remembers the
/// absolute arena index of the first hit it has not flushed yet; everything from there to the
/// end of the arena is its buffer.
#[derive(Debug, Clone)]
pub struct StreamBuildState {
    name: String,
    handle: StreamHandle,
    window: BuildWindow,
    window_close: i64,
    systems: Vec<DetectorKind>,
    cursors: FxHashMap<DetectorKind, usize>,
    state: StreamState,
    n_records: u64,
}

impl StreamBuildState {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn window(&self) -> BuildWindow {
        self.window
    }

    pub fn window_close_timestamp(&self) -> i64 {
        self.window_close
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn n_records(&self) -> u64 {
        self.n_records
    }

    pub fn takes(&self, system: DetectorKind) -> bool {
        self.systems.is_empty() || self.systems.contains(&system)
    }

    /// Does this stream build across more than one detector system?
    pub fn is_coincidence_stream(&self) -> bool {
        self.systems.len() != 1
    }

    fn cursor(&self, system: &DetectorSystem) -> usize {
        self.cursors
            .get(&system.kind())
            .copied()
            .unwrap_or(0)
            .max(system.hits().base())
    }

    /// Collect [cursor, stop) of a system into the record, returning where the cursor moves to
    fn segment<'a>(
        &self,
        system: &'a DetectorSystem,
        stop: usize,
        segments: &mut Vec<RecordSegment<'a>>,
    ) -> usize {
        let start = self.cursor(system);
        let hits = system.hits().slice(start..stop);
        if !hits.is_empty() {
            segments.push(RecordSegment {
                system: system.kind(),
                hits,
            });
        }
        stop.max(start)
    }

    fn check_open(&self) -> Result<(), LedgerError> {
        if self.state == StreamState::Finalized {
            return Err(LedgerError::StreamLifecycleViolation(self.name.clone()));
        }
        Ok(())
    }

    /// Feed one event to the stream
    fn update<S: OutputSink + ?Sized>(
        &mut self,
        event: &BuildOutcome,
        systems: &[DetectorSystem],
        sink: &mut S,
    ) -> Result<(), LedgerError> {
        self.check_open()?;
        let source = match systems.iter().find(|s| s.kind() == event.system) {
            Some(source) => source,
            None => return Ok(()),
        };

        match self.window {
            BuildWindow::Immediate => {
                let mut segments = Vec::new();
                let start = event.first_new.max(source.hits().base());
                let stop = source.hits().end();
                let hits = source.hits().slice(start..stop);
                if !hits.is_empty() {
                    segments.push(RecordSegment {
                        system: event.system,
                        hits,
                    });
                }
                let record = BuiltRecord {
                    stream: &self.name,
                    timestamp: event.timestamp,
                    segments,
                };
                sink.accept(self.handle, &record)?;
                self.n_records += 1;
                self.cursors.insert(event.system, stop);
            }
            BuildWindow::Window(width) => {
                if event.timestamp > self.window_close {
                    self.state = StreamState::ReadyToFlush;
                    // The incoming event opens the next window; only older hits are flushed
                    let mut segments = Vec::new();
                    let mut moved = Vec::new();
                    for system in systems.iter().filter(|s| self.takes(s.kind())) {
                        let stop = if system.kind() == event.system {
                            event.first_new
                        } else {
                            system.hits().end()
                        };
                        moved.push((system.kind(), self.segment(system, stop, &mut segments)));
                    }
                    let record = BuiltRecord {
                        stream: &self.name,
                        timestamp: event.timestamp,
                        segments,
                    };
                    if !record.is_empty() {
                        sink.accept(self.handle, &record)?;
                        self.n_records += 1;
                    }
                    for (kind, cursor) in moved {
                        self.cursors.insert(kind, cursor);
                    }
                    self.window_close = self.window_close.max(event.timestamp.saturating_add(width));
                    self.state = StreamState::Accumulating;
                }
            }
        }
        Ok(())
    }

    /// Flush what is left and close the stream
    fn finalize<S: OutputSink + ?Sized>(
        &mut self,
        systems: &[DetectorSystem],
        sink: &mut S,
    ) -> Result<(), LedgerError> {
        self.check_open()?;
        let mut segments = Vec::new();
        let mut moved = Vec::new();
        for system in systems.iter().filter(|s| self.takes(s.kind())) {
            let stop = system.hits().end();
            moved.push((system.kind(), self.segment(system, stop, &mut segments)));
        }
        let latest = segments
            .iter()
            .flat_map(|s| s.hits.iter())
            .map(|h| h.timestamp)
            .max();
        let record = BuiltRecord {
            stream: &self.name,
            timestamp: latest.unwrap_or_default(),
            segments,
        };
        if !record.is_empty() {
            sink.accept(self.handle, &record)?;
            self.n_records += 1;
        }
        for (kind, cursor) in moved {
            self.cursors.insert(kind, cursor);
        }
        sink.finalize(self.handle)?;
        self.state = StreamState::Finalized;
        Ok(())
    }
}

/// The Ledger decides, for every output stream, when buffered hits are complete.
///
/// Each stream is an independent state machine. Finite windows flush the hits gathered so far
/// when an event arrives past the window close, then open a new window at that event. Immediate
/// streams write a record for every event they take.
#[derive(Debug, Default)]
pub struct Ledger {
    streams: Vec<StreamBuildState>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a stream in the sink and start tracking it
    pub fn add_stream<S: OutputSink + ?Sized>(
        &mut self,
        config: &StreamConfig,
        sink: &mut S,
    ) -> Result<(), LedgerError> {
        let handle = sink.create_stream(&config.name, &config.build_window)?;
        self.streams.push(StreamBuildState {
            name: config.name.clone(),
            handle,
            window: config.build_window,
            window_close: i64::MIN,
            systems: config.systems.clone(),
            cursors: FxHashMap::default(),
            state: StreamState::Accumulating,
            n_records: 0,
        });
        Ok(())
    }

    pub fn streams(&self) -> &[StreamBuildState] {
        &self.streams
    }

    /// Offer one processed event to every stream that takes its detector system
    pub fn process_event<S: OutputSink + ?Sized>(
        &mut self,
        event: &BuildOutcome,
        systems: &[DetectorSystem],
        sink: &mut S,
    ) -> Result<(), LedgerError> {
        for stream in self.streams.iter_mut() {
            if stream.state == StreamState::Finalized {
                return Err(LedgerError::StreamLifecycleViolation(stream.name.clone()));
            }
            if stream.takes(event.system) {
                stream.update(event, systems, sink)?;
            }
        }
        Ok(())
    }

    /// Oldest arena index any stream still needs from a system. Everything before it can go.
    pub fn release_point(&self, system: &DetectorSystem) -> usize {
        self.streams
            .iter()
            .filter(|s| s.state != StreamState::Finalized && s.takes(system.kind()))
            .map(|s| s.cursor(system))
            .min()
            .unwrap_or_else(|| system.hits().end())
    }

    /// Flush the residue of every stream and close them all
    pub fn finalize<S: OutputSink + ?Sized>(
        &mut self,
        systems: &[DetectorSystem],
        sink: &mut S,
    ) -> Result<(), LedgerError> {
        for stream in self.streams.iter_mut() {
            stream.finalize(systems, sink)?;
        }
        Ok(())
    }
}
