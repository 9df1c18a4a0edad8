//! Layout of a VM-USB stack readout buffer.
//!
//! ```text
//! | header (u16) | packet (u32) * N | timestamp footer (u16 * 6) |
//! ```
//!
//! The header word count covers the packets and the footer, so
//! `N = payload_words / 2 - 3`. Everything is little-endian.
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

use super::constants::*;

/// The VM-USB event header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmusbHeader {
    pub stack: u8,
    pub payload_words: u16,
}

impl VmusbHeader {
    pub fn from_word(word: u16) -> Self {
        Self {
            stack: ((word & VMUSB_STACK_MASK) >> VMUSB_STACK_SHIFT) as u8,
            payload_words: word & VMUSB_SIZE_MASK,
        }
    }

    /// Number of CAEN packets promised by the header, or None if the payload cannot even hold the footer
    pub fn n_packets(&self) -> Option<usize> {
        let pairs = (self.payload_words / 2) as usize;
        pairs.checked_sub((VME_TIMESTAMP_WORDS / 2) as usize)
    }

    /// Total buffer size this header describes, header included
    pub fn expected_size(&self, n_packets: usize) -> usize {
        VMUSB_HEADER_SIZE + n_packets * CAEN_PACKET_SIZE + VME_TIMESTAMP_SIZE
    }

    pub fn is_primary_trigger(&self) -> bool {
        self.stack == PRIMARY_STACK
    }
}

/// One 32-bit CAEN V785 (ADC) / V775 (TDC) data word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaenPacket(pub u32);

impl CaenPacket {
    pub fn card_num(&self) -> u32 {
        (self.0 >> CAEN_GEO_SHIFT) & CAEN_GEO_MASK
    }

    pub fn word_type(&self) -> u8 {
        ((self.0 >> CAEN_TYPE_SHIFT) & CAEN_TYPE_MASK) as u8
    }

    pub fn channel_num(&self) -> u32 {
        (self.0 >> CAEN_CHANNEL_SHIFT) & CAEN_CHANNEL_MASK
    }

    pub fn underflow(&self) -> bool {
        self.0 & CAEN_UNDERFLOW_BIT != 0
    }

    pub fn overflow(&self) -> bool {
        self.0 & CAEN_OVERFLOW_BIT != 0
    }

    pub fn value(&self) -> i32 {
        (self.0 & CAEN_VALUE_MASK) as i32
    }

    /// Headers, end-of-block and invalid words all fail this
    pub fn is_valid(&self) -> bool {
        self.word_type() == CAEN_TYPE_DATUM
    }

    pub fn is_tdc(&self) -> bool {
        self.card_num() >= FIRST_TDC_SLOT
    }

    /// Slot of the ADC paired with this packet's card. TDCs sit 4 slots above their ADC.
    pub fn adc_card_num(&self) -> u32 {
        normalize_card(self.card_num())
    }
}

pub fn normalize_card(card_num: u32) -> u32 {
    if card_num >= FIRST_TDC_SLOT {
        card_num - TDC_SLOT_OFFSET
    } else {
        card_num
    }
}

/// Two 48-bit VME clock values. Only the first is used for timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmeTimestamp {
    pub ts1: u64,
    pub ts2: u64,
}

impl VmeTimestamp {
    fn read(cursor: &mut Cursor<&[u8]>) -> Result<Self, std::io::Error> {
        let mut words = [0u16; 6];
        cursor.read_u16_into::<LittleEndian>(&mut words)?;
        Ok(Self {
            ts1: words[0] as u64 | (words[1] as u64) << 16 | (words[2] as u64) << 32,
            ts2: words[3] as u64 | (words[4] as u64) << 16 | (words[5] as u64) << 32,
        })
    }
}

/// Everything that could be pulled out of one buffer, before any address resolution
#[derive(Debug, Clone)]
pub struct VmusbEvent {
    pub header: VmusbHeader,
    /// Packets the header promised
    pub n_packets: usize,
    /// Packets actually read. Only less than n_packets for a truncated buffer.
    pub packets: Vec<CaenPacket>,
    /// None if the buffer ended before the footer
    pub timestamp: Option<VmeTimestamp>,
    /// Byte offset where reading stopped
    pub cursor: usize,
    pub expected_size: usize,
}

impl VmusbEvent {
    /// Did the read land exactly on the end of the buffer?
    pub fn is_complete(&self, buffer_size: usize) -> bool {
        self.timestamp.is_some() && self.cursor == buffer_size && self.expected_size == buffer_size
    }
}

/// Why a buffer could not be walked at all
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderFault {
    Truncated,
    PayloadTooSmall(u16),
}

/// Walk one VM-USB buffer.
///
/// Packets that do not fit are not read; a missing footer leaves the timestamp as None. Only a
/// header that cannot be read, or that cannot describe a footer, fails.
pub fn read_event(bytes: &[u8]) -> Result<VmusbEvent, HeaderFault> {
    let mut cursor = Cursor::new(bytes);
    let header = match cursor.read_u16::<LittleEndian>() {
        Ok(word) => VmusbHeader::from_word(word),
        Err(_) => return Err(HeaderFault::Truncated),
    };
    let n_packets = header
        .n_packets()
        .ok_or(HeaderFault::PayloadTooSmall(header.payload_words))?;

    let mut packets: Vec<CaenPacket> = Vec::with_capacity(n_packets);
    for _ in 0..n_packets {
        match cursor.read_u32::<LittleEndian>() {
            Ok(word) => packets.push(CaenPacket(word)),
            Err(_) => break,
        }
    }
    // A failed partial read may have advanced the cursor; the footer starts after the last whole packet
    let footer_start = VMUSB_HEADER_SIZE + packets.len() * CAEN_PACKET_SIZE;
    cursor.set_position(footer_start as u64);

    let timestamp = if packets.len() == n_packets {
        VmeTimestamp::read(&mut cursor).ok()
    } else {
        None
    };
    let position = if timestamp.is_some() {
        footer_start + VME_TIMESTAMP_SIZE
    } else {
        footer_start
    };

    Ok(VmusbEvent {
        header,
        n_packets,
        packets,
        timestamp,
        cursor: position,
        expected_size: header.expected_size(n_packets),
    })
}

/// Format a buffer as rows of 16-bit words for the log
pub fn hex_dump(bytes: &[u8]) -> String {
    let shown = &bytes[..bytes.len().min(MAX_DUMP_BYTES)];
    let mut dump = String::new();
    for (row, chunk) in shown.chunks(16).enumerate() {
        dump.push_str(&format!("\n\t{:04x}:", row * 16));
        for word in chunk.chunks(2) {
            match word {
                [lo, hi] => dump.push_str(&format!(" {:04x}", u16::from_le_bytes([*lo, *hi]))),
                [lo] => dump.push_str(&format!(" {:02x}", lo)),
                _ => (),
            }
        }
    }
    if bytes.len() > shown.len() {
        dump.push_str(&format!("\n\t... {} more bytes", bytes.len() - shown.len()));
    }
    dump
}
