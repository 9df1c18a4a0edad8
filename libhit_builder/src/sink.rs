use super::detector::DetectorKind;
use super::error::SinkError;
use super::event_builder::BuildWindow;
use super::hit::Hit;

/// Opaque reference to a stream created by an [`OutputSink`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamHandle(pub usize);

/// The hits of one detector system within a record
#[derive(Debug, Clone, Copy)]
pub struct RecordSegment<'a> {
    pub system: DetectorKind,
    pub hits: &'a [Hit],
}

/// A batch of hits a stream considers complete.
///
/// Records borrow the detector hit storage and only live for the duration of the flush.
#[derive(Debug, Clone)]
pub struct BuiltRecord<'a> {
    pub stream: &'a str,
    /// Timestamp of the event that closed the record. The last record of a stream, closed by
    /// the end of the run, takes its latest hit.
    pub timestamp: i64,
    pub segments: Vec<RecordSegment<'a>>,
}

impl BuiltRecord<'_> {
    pub fn len(&self) -> usize {
        self.segments.iter().map(|s| s.hits.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hits(&self) -> impl Iterator<Item = (DetectorKind, &Hit)> + '_ {
        self.segments
            .iter()
            .flat_map(|s| s.hits.iter().map(move |h| (s.system, h)))
    }
}

/// Where built records go.
///
/// Per stream the lifecycle is create -> accept* -> finalize, and the container is closed once
/// after every stream is finalized.
pub trait OutputSink {
    fn create_stream(&mut self, name: &str, window: &BuildWindow)
        -> Result<StreamHandle, SinkError>;
    fn accept(&mut self, stream: StreamHandle, record: &BuiltRecord<'_>) -> Result<(), SinkError>;
    fn finalize(&mut self, stream: StreamHandle) -> Result<(), SinkError>;
    fn close_container(&mut self) -> Result<(), SinkError>;
}

/// An owned copy of a [`BuiltRecord`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedRecord {
    pub timestamp: i64,
    pub hits: Vec<(DetectorKind, Hit)>,
}

#[derive(Debug, Clone)]
pub struct MemoryStream {
    pub name: String,
    pub window: BuildWindow,
    pub records: Vec<OwnedRecord>,
    pub n_records: u64,
    pub n_hits: u64,
    pub finalized: bool,
}

/// A sink that keeps everything in memory.
///
/// Used by tests and library consumers. Built with [`MemorySink::tally`] it only counts records,
/// which is what a dry run wants.
#[derive(Debug, Clone)]
pub struct MemorySink {
    streams: Vec<MemoryStream>,
    retain: bool,
    closed: bool,
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySink {
    pub fn new() -> Self {
        Self {
            streams: Vec::new(),
            retain: true,
            closed: false,
        }
    }

    /// Count records without keeping them
    pub fn tally() -> Self {
        Self {
            retain: false,
            ..Self::new()
        }
    }

    pub fn streams(&self) -> &[MemoryStream] {
        &self.streams
    }

    pub fn stream(&self, name: &str) -> Option<&MemoryStream> {
        self.streams.iter().find(|s| s.name == name)
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn get_open(&mut self, stream: StreamHandle) -> Result<&mut MemoryStream, SinkError> {
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

impl OutputSink for MemorySink {
    fn create_stream(
        &mut self,
        name: &str,
        window: &BuildWindow,
    ) -> Result<StreamHandle, SinkError> {
        if self.closed {
            return Err(SinkError::ContainerClosed);
        }
        if self.stream(name).is_some() {
            return Err(SinkError::DuplicateStream(name.to_string()));
        }
        self.streams.push(MemoryStream {
            name: name.to_string(),
            window: *window,
            records: Vec::new(),
            n_records: 0,
            n_hits: 0,
            finalized: false,
        });
        Ok(StreamHandle(self.streams.len() - 1))
    }

    fn accept(&mut self, stream: StreamHandle, record: &BuiltRecord<'_>) -> Result<(), SinkError> {
        let retain = self.retain;
        let entry = self.get_open(stream)?;
        entry.n_records += 1;
        entry.n_hits += record.len() as u64;
        if retain {
            entry.records.push(OwnedRecord {
                timestamp: record.timestamp,
                hits: record.hits().map(|(k, h)| (k, h.clone())).collect(),
            });
        }
        Ok(())
    }

    fn finalize(&mut self, stream: StreamHandle) -> Result<(), SinkError> {
        let entry = self.get_open(stream)?;
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
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink_lifecycle() {
        let mut sink = MemorySink::new();
        let handle = sink.create_stream("janus", &BuildWindow::Immediate).unwrap();
        assert!(matches!(
            sink.create_stream("janus", &BuildWindow::Immediate),
            Err(SinkError::DuplicateStream(_))
        ));
        let hits = [Hit::new(1, 10), Hit::new(2, 11)];
        let record = BuiltRecord {
            stream: "janus",
            timestamp: 11,
            segments: vec![RecordSegment {
                system: DetectorKind::Janus,
                hits: &hits,
            }],
        };
        sink.accept(handle, &record).unwrap();
        sink.finalize(handle).unwrap();
        assert!(matches!(
            sink.accept(handle, &record),
            Err(SinkError::StreamFinalized(_))
        ));
        sink.close_container().unwrap();
        assert!(matches!(
            sink.close_container(),
            Err(SinkError::ContainerClosed)
        ));

        let stream = sink.stream("janus").unwrap();
        assert_eq!(stream.n_records, 1);
        assert_eq!(stream.records[0].hits.len(), 2);
    }

    #[test]
    fn test_tally_keeps_counts_only() {
        let mut sink = MemorySink::tally();
        let handle = sink.create_stream("all", &BuildWindow::Window(100)).unwrap();
        let hits = [Hit::new(1, 10)];
        let record = BuiltRecord {
            stream: "all",
            timestamp: 10,
            segments: vec![RecordSegment {
                system: DetectorKind::Janus,
                hits: &hits,
            }],
        };
        sink.accept(handle, &record).unwrap();
        let stream = &sink.streams()[0];
        assert_eq!(stream.n_hits, 1);
        assert!(stream.records.is_empty());
    }
}
