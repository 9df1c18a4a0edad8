use byteorder::{LittleEndian, ReadBytesExt};
use std::fmt::Display;
use std::io::{Cursor, Read};

use super::error::EvtItemError;

const RING_HEADER_SIZE: usize = 8; // size + type
const BODY_HEADER_SIZE: u32 = 20; // size + timestamp + source id + barrier
const TITLE_SIZE: usize = 81;
/// Anything larger is a corrupt size word, not a ring item
const MAX_RING_ITEM_SIZE: usize = 64 * 1024 * 1024;

/// NSCLDAQ ring item types we care about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingType {
    BeginRun,
    EndRun,
    PauseRun,
    ResumeRun,
    Format,
    Scalers,
    Physics,
    PhysicsCount,
    Unknown(u32),
}

impl From<u32> for RingType {
    fn from(value: u32) -> Self {
        match value {
            1 => Self::BeginRun,
            2 => Self::EndRun,
            3 => Self::PauseRun,
            4 => Self::ResumeRun,
            12 => Self::Format,
            20 => Self::Scalers,
            30 => Self::Physics,
            31 => Self::PhysicsCount,
            _ => Self::Unknown(value),
        }
    }
}

/// Event builder metadata some ring items carry in front of their body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BodyHeader {
    pub timestamp: u64,
    pub source_id: u32,
    pub barrier: u32,
}

/// One ring item as read from an .evt file
#[derive(Debug, Clone)]
pub struct RingItem {
    pub size: usize,
    pub ring_type: RingType,
    pub raw_type: u32,
    pub body_header: Option<BodyHeader>,
    pub body: Vec<u8>,
}

impl RingItem {
    /// Read the next ring item. Returns None on a clean end of input.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Option<Self>, EvtItemError> {
        let size = match reader.read_u32::<LittleEndian>() {
            Ok(size) => size as usize,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(EvtItemError::IOError(e)),
        };
        if !(RING_HEADER_SIZE + 4..=MAX_RING_ITEM_SIZE).contains(&size) {
            return Err(EvtItemError::ItemSizeError);
        }
        let mut rest = vec![0u8; size - 4];
        reader.read_exact(&mut rest)?;
        Self::parse(size, &rest).map(Some)
    }

    /// Parse the item from everything after its size word
    fn parse(size: usize, bytes: &[u8]) -> Result<Self, EvtItemError> {
        let mut cursor = Cursor::new(bytes);
        let raw_type = cursor.read_u32::<LittleEndian>()?;
        let body_header_size = cursor.read_u32::<LittleEndian>()?;
        // 0 (or just the size word itself) means no body header
        let body_header = if body_header_size > 4 {
            if body_header_size < BODY_HEADER_SIZE {
                return Err(EvtItemError::ItemSizeError);
            }
            let header = BodyHeader {
                timestamp: cursor.read_u64::<LittleEndian>()?,
                source_id: cursor.read_u32::<LittleEndian>()?,
                barrier: cursor.read_u32::<LittleEndian>()?,
            };
            // Skip any extension of the body header
            let extra = (body_header_size - BODY_HEADER_SIZE) as u64;
            cursor.set_position(cursor.position() + extra);
            Some(header)
        } else {
            None
        };

        let body_start = cursor.position() as usize;
        if body_start > bytes.len() {
            return Err(EvtItemError::ItemSizeError);
        }
        Ok(Self {
            size,
            ring_type: RingType::from(raw_type),
            raw_type,
            body_header,
            body: bytes[body_start..].to_vec(),
        })
    }

    pub fn source_id(&self) -> Option<u32> {
        self.body_header.map(|h| h.source_id)
    }
}

/// Body of a begin or end run item
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateChangeItem {
    pub run: u32,
    /// Seconds since the run began
    pub time_offset: u32,
    /// Wall clock when the item was made
    pub unix_time: u32,
    pub title: String,
}

impl StateChangeItem {
    fn parse(ring: &RingItem) -> Result<Self, EvtItemError> {
        let mut cursor = Cursor::new(ring.body.as_slice());
        let run = cursor.read_u32::<LittleEndian>()?;
        let time_offset = cursor.read_u32::<LittleEndian>()?;
        let unix_time = cursor.read_u32::<LittleEndian>()?;
        let _offset_divisor = cursor.read_u32::<LittleEndian>()?;
        let mut title_bytes = [0u8; TITLE_SIZE];
        let n_read = cursor.read(&mut title_bytes)?;
        let title_bytes = &title_bytes[..n_read];
        let end = title_bytes
            .iter()
            .position(|b| *b == 0)
            .unwrap_or(title_bytes.len());
        Ok(Self {
            run,
            time_offset,
            unix_time,
            title: String::from_utf8_lossy(&title_bytes[..end]).into_owned(),
        })
    }

    fn wall_clock(&self) -> String {
        match time::OffsetDateTime::from_unix_timestamp(self.unix_time as i64) {
            Ok(t) => t.to_string(),
            Err(_) => format!("unix {}", self.unix_time),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BeginRunItem(pub StateChangeItem);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndRunItem(pub StateChangeItem);

impl TryFrom<RingItem> for BeginRunItem {
    type Error = EvtItemError;
    fn try_from(ring: RingItem) -> Result<Self, Self::Error> {
        if ring.ring_type != RingType::BeginRun {
            return Err(EvtItemError::WrongType(ring.raw_type, "BeginRunItem"));
        }
        Ok(Self(StateChangeItem::parse(&ring)?))
    }
}

impl TryFrom<RingItem> for EndRunItem {
    type Error = EvtItemError;
    fn try_from(ring: RingItem) -> Result<Self, Self::Error> {
        if ring.ring_type != RingType::EndRun {
            return Err(EvtItemError::WrongType(ring.raw_type, "EndRunItem"));
        }
        Ok(Self(StateChangeItem::parse(&ring)?))
    }
}

/// The begin and end of a run, as far as the ring items told us
#[derive(Debug, Clone, Default)]
pub struct RunInfo {
    pub begin: Option<BeginRunItem>,
    pub end: Option<EndRunItem>,
}

impl RunInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn print_begin(&self) -> String {
        match &self.begin {
            Some(BeginRunItem(item)) => format!(
                "run: {} title: {} start: {}",
                item.run,
                item.title,
                item.wall_clock()
            ),
            None => String::from("no begin run"),
        }
    }

    pub fn print_end(&self) -> String {
        match &self.end {
            Some(EndRunItem(item)) => format!(
                "run: {} stop: {} elapsed: {} s",
                item.run,
                item.wall_clock(),
                item.time_offset
            ),
            None => String::from("no end run"),
        }
    }
}

impl Display for RunInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -- {}", self.print_begin(), self.print_end())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ring_item, state_change_body};

    #[test]
    fn test_physics_with_body_header() {
        let bytes = ring_item(30, Some((123456, 7)), &[1, 2, 3, 4]);
        let mut reader = Cursor::new(bytes);
        let ring = RingItem::read_from(&mut reader).unwrap().unwrap();
        assert_eq!(ring.ring_type, RingType::Physics);
        assert_eq!(ring.source_id(), Some(7));
        assert_eq!(ring.body_header.unwrap().timestamp, 123456);
        assert_eq!(ring.body, vec![1, 2, 3, 4]);
        assert!(RingItem::read_from(&mut reader).unwrap().is_none());
    }

    #[test]
    fn test_physics_without_body_header() {
        let bytes = ring_item(30, None, &[9, 8]);
        let ring = RingItem::read_from(&mut Cursor::new(bytes)).unwrap().unwrap();
        assert!(ring.body_header.is_none());
        assert_eq!(ring.body, vec![9, 8]);
    }

    #[test]
    fn test_begin_run() {
        let body = state_change_body(42, 0, 1453953500, "janus test");
        let bytes = ring_item(1, None, &body);
        let ring = RingItem::read_from(&mut Cursor::new(bytes)).unwrap().unwrap();
        let begin = BeginRunItem::try_from(ring.clone()).unwrap();
        assert_eq!(begin.0.run, 42);
        assert_eq!(begin.0.unix_time, 1453953500);
        assert_eq!(begin.0.title, "janus test");
        assert!(matches!(
            EndRunItem::try_from(ring),
            Err(EvtItemError::WrongType(1, _))
        ));
    }

    #[test]
    fn test_short_item() {
        let bytes = 6u32.to_le_bytes().to_vec();
        assert!(matches!(
            RingItem::read_from(&mut Cursor::new(bytes)),
            Err(EvtItemError::ItemSizeError)
        ));
    }

    #[test]
    fn test_oversized_item() {
        let mut bytes = 0xFFFF_FFF0u32.to_le_bytes().to_vec();
        bytes.extend_from_slice(&30u32.to_le_bytes());
        assert!(matches!(
            RingItem::read_from(&mut Cursor::new(bytes)),
            Err(EvtItemError::ItemSizeError)
        ));
    }
}
