use super::channel_map::ChannelResolver;
use super::constants::DEFAULT_NOTICE_LIMIT;
use super::detector::{BuildOutcome, DetectorKind, DetectorSystem, RawBuffer};
use super::error::BuilderError;
use super::event_builder::{Ledger, StreamConfig};
use super::sink::OutputSink;

/// Knobs that change how buffers are treated, as opposed to where they go
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuilderOptions {
    pub notice_limit: u64,
    pub discard_foreign_triggers: bool,
}

impl Default for BuilderOptions {
    fn default() -> Self {
        Self {
            notice_limit: DEFAULT_NOTICE_LIMIT,
            discard_foreign_triggers: false,
        }
    }
}

/// HitBuilder runs the decode -> assemble -> ledger chain for one run.
///
/// It owns every detector system, the ledger and the output sink, so everything that mutates
/// hits goes through `&mut self`. In particular a run restart can never overlap a flush.
pub struct HitBuilder<S: OutputSink> {
    resolver: Box<dyn ChannelResolver + Send>,
    systems: Vec<DetectorSystem>,
    ledger: Ledger,
    sink: S,
    sequence: u64,
}

impl<S: OutputSink> HitBuilder<S> {
    /// Create the builder and its streams.
    ///
    /// Detector systems are the union of `systems` and every system named by a stream.
    pub fn new(
        resolver: Box<dyn ChannelResolver + Send>,
        systems: &[DetectorKind],
        streams: &[StreamConfig],
        options: BuilderOptions,
        mut sink: S,
    ) -> Result<Self, BuilderError> {
        let mut kinds: Vec<DetectorKind> = systems.to_vec();
        for stream in streams.iter() {
            kinds.extend(stream.systems.iter().copied());
        }
        kinds.sort();
        kinds.dedup();

        let systems = kinds
            .into_iter()
            .map(|k| DetectorSystem::new(k, options.notice_limit, options.discard_foreign_triggers))
            .collect();

        let mut ledger = Ledger::new();
        for stream in streams.iter() {
            ledger.add_stream(stream, &mut sink)?;
        }

        Ok(Self {
            resolver,
            systems,
            ledger,
            sink,
            sequence: 0,
        })
    }

    /// Process one raw buffer.
    ///
    /// A buffer that cannot be decoded is logged and skipped (returns None); it never stops
    /// the run. Ledger and sink failures do.
    pub fn process_buffer(
        &mut self,
        system: DetectorKind,
        payload: &[u8],
    ) -> Result<Option<BuildOutcome>, BuilderError> {
        self.sequence += 1;
        let idx = self
            .systems
            .iter()
            .position(|s| s.kind() == system)
            .ok_or(BuilderError::UnconfiguredSystem(system))?;
        let buffer = RawBuffer {
            system,
            sequence: self.sequence,
            payload,
        };

        let outcome = match self.systems[idx].build_hits(&buffer, &*self.resolver) {
            Ok(outcome) => outcome,
            Err(e) => {
                spdlog::warn!("Skipping buffer {}: {e}", self.sequence);
                return Ok(None);
            }
        };

        self.ledger
            .process_event(&outcome, &self.systems, &mut self.sink)?;
        let release = self.ledger.release_point(&self.systems[idx]);
        self.systems[idx].state.hits.release_before(release);
        Ok(Some(outcome))
    }

    /// Realign every detector system to a new run start
    pub fn run_restart(&mut self, unix_time: u32) {
        for system in self.systems.iter_mut() {
            let delta = system.set_run_start(unix_time);
            spdlog::info!(
                "{} realigned to run start {} (offset {} ns, {} hits shifted)",
                system.kind(),
                unix_time,
                delta,
                system.hits().len()
            );
        }
    }

    pub fn systems(&self) -> &[DetectorSystem] {
        &self.systems
    }

    pub fn system(&self, kind: DetectorKind) -> Option<&DetectorSystem> {
        self.systems.iter().find(|s| s.kind() == kind)
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Number of buffers offered so far
    pub fn n_buffers(&self) -> u64 {
        self.sequence
    }

    /// Finalize every stream, close the container and hand the sink back
    pub fn finish(mut self) -> Result<S, BuilderError> {
        self.ledger.finalize(&self.systems, &mut self.sink)?;
        self.sink.close_container()?;
        for system in self.systems.iter() {
            system.log_summary();
        }
        Ok(self.sink)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel_map::ChannelMap;
    use crate::constants::*;
    use crate::event_builder::BuildWindow;
    use crate::hardware_id::generate_address;
    use crate::sink::MemorySink;
    use crate::testing::{caen_word, vmusb_buffer};

    fn builder(window: BuildWindow) -> HitBuilder<MemorySink> {
        let map = ChannelMap::new(None).unwrap();
        let streams = vec![StreamConfig {
            name: String::from("janus"),
            build_window: window,
            systems: vec![DetectorKind::Janus],
        }];
        HitBuilder::new(
            Box::new(map),
            &[],
            &streams,
            BuilderOptions::default(),
            MemorySink::new(),
        )
        .unwrap()
    }

    #[test]
    fn test_single_buffer_end_to_end() {
        let mut builder = builder(BuildWindow::Immediate);
        let a = generate_address(JANUS_SYSTEM_ID, JANUS_CRATE_ID, 5, 0);
        let b = generate_address(JANUS_SYSTEM_ID, JANUS_CRATE_ID, 6, 0);
        let packets = [caen_word(5, 0, 40, false, false), caen_word(6, 0, 20, false, false)];
        let bytes = vmusb_buffer(0, &packets, 50);
        // payload_words = 10 -> 2 packets
        assert_eq!(u16::from_le_bytes([bytes[0], bytes[1]]), 10);

        let outcome = builder
            .process_buffer(DetectorKind::Janus, &bytes)
            .unwrap()
            .expect("buffer was skipped");
        let expected_ts = 50 * VME_CLOCK_MULTIPLIER;
        assert_eq!(outcome.n_hits, 1);
        assert_eq!(outcome.timestamp, expected_ts);
        assert_eq!(builder.system(DetectorKind::Janus).unwrap().channels().len(), 2);

        let sink = builder.finish().unwrap();
        assert!(sink.is_closed());
        let stream = sink.stream("janus").unwrap();
        assert!(stream.finalized);
        assert_eq!(stream.records.len(), 1);
        let record = &stream.records[0];
        assert_eq!(record.hits.len(), 1);
        let (system, hit) = &record.hits[0];
        assert_eq!(*system, DetectorKind::Janus);
        assert_eq!(hit.address, a);
        assert_eq!(hit.charge, 40);
        assert_eq!(hit.timestamp, expected_ts);
        let back = hit.back.unwrap();
        assert_eq!(back.address, b);
        assert_eq!(back.charge, 20);
    }

    #[test]
    fn test_bad_buffers_do_not_stop_the_run() {
        let mut builder = builder(BuildWindow::Immediate);
        assert!(builder
            .process_buffer(DetectorKind::Janus, &[0xff])
            .unwrap()
            .is_none());
        let packets = [caen_word(5, 0, 40, false, false), caen_word(6, 0, 20, false, false)];
        let bytes = vmusb_buffer(0, &packets, 50);
        let outcome = builder
            .process_buffer(DetectorKind::Janus, &bytes[..bytes.len() - 1])
            .unwrap()
            .unwrap();
        // Partially decoded buffers are still used
        assert_eq!(outcome.n_hits, 1);
        let stats = builder.system(DetectorKind::Janus).unwrap().stats().clone();
        assert_eq!(stats.malformed, 1);
        assert_eq!(stats.length_mismatches, 1);
        assert_eq!(builder.n_buffers(), 2);
    }

    #[test]
    fn test_restart_shifts_buffered_and_future_hits() {
        let mut builder = builder(BuildWindow::Window(1_000_000));
        let packets = [caen_word(5, 1, 40, false, false), caen_word(6, 1, 20, false, false)];
        builder
            .process_buffer(DetectorKind::Janus, &vmusb_buffer(0, &packets, 100))
            .unwrap();
        builder.run_restart(RUN_START_EPOCH + 2);
        let delta = 2 * TIMESTAMP_UNITS_PER_SECOND;
        builder
            .process_buffer(DetectorKind::Janus, &vmusb_buffer(0, &packets, 200))
            .unwrap();

        let sink = builder.finish().unwrap();
        let stream = sink.stream("janus").unwrap();
        let timestamps: Vec<i64> = stream
            .records
            .iter()
            .flat_map(|r| r.hits.iter().map(|(_, h)| h.timestamp))
            .collect();
        assert_eq!(
            timestamps,
            vec![
                100 * VME_CLOCK_MULTIPLIER + delta,
                200 * VME_CLOCK_MULTIPLIER + delta
            ]
        );
    }

    #[test]
    fn test_discard_foreign_triggers() {
        let map = ChannelMap::new(None).unwrap();
        let streams = vec![StreamConfig {
            name: String::from("janus"),
            build_window: BuildWindow::Immediate,
            systems: vec![],
        }];
        let options = BuilderOptions {
            discard_foreign_triggers: true,
            ..Default::default()
        };
        let mut builder = HitBuilder::new(
            Box::new(map),
            &[DetectorKind::Janus],
            &streams,
            options,
            MemorySink::new(),
        )
        .unwrap();
        let packets = [caen_word(5, 0, 40, false, false), caen_word(6, 0, 20, false, false)];
        let outcome = builder
            .process_buffer(DetectorKind::Janus, &vmusb_buffer(1, &packets, 7))
            .unwrap()
            .unwrap();
        assert!(outcome.foreign_trigger);
        assert_eq!(outcome.n_hits, 0);
    }
}
