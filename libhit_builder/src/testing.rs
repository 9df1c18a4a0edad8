// Builders for synthetic VM-USB buffers and ring items used across the unit tests
use crate::constants::*;

pub fn caen_word(card: u32, channel: u32, value: u32, overflow: bool, underflow: bool) -> u32 {
    let mut word = (card & CAEN_GEO_MASK) << CAEN_GEO_SHIFT
        | (channel & CAEN_CHANNEL_MASK) << CAEN_CHANNEL_SHIFT
        | (value & CAEN_VALUE_MASK);
    if overflow {
        word |= CAEN_OVERFLOW_BIT;
    }
    if underflow {
        word |= CAEN_UNDERFLOW_BIT;
    }
    word
}

/// Header, packets and a footer whose first timestamp is `ts1`
pub fn vmusb_buffer(stack: u16, packets: &[u32], ts1: u64) -> Vec<u8> {
    let payload_words = (packets.len() * 2) as u16 + VME_TIMESTAMP_WORDS;
    let header = (stack << VMUSB_STACK_SHIFT) & VMUSB_STACK_MASK | payload_words;
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&header.to_le_bytes());
    for packet in packets {
        bytes.extend_from_slice(&packet.to_le_bytes());
    }
    for ts in [ts1, 0] {
        bytes.extend_from_slice(&(ts as u16).to_le_bytes());
        bytes.extend_from_slice(&((ts >> 16) as u16).to_le_bytes());
        bytes.extend_from_slice(&((ts >> 32) as u16).to_le_bytes());
    }
    bytes
}

/// A ring item with an optional body header carrying (timestamp, source id)
pub fn ring_item(ring_type: u32, body_header: Option<(u64, u32)>, body: &[u8]) -> Vec<u8> {
    let header_size: usize = match body_header {
        Some(_) => 20,
        None => 4,
    };
    let size = 8 + header_size + body.len();
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&(size as u32).to_le_bytes());
    bytes.extend_from_slice(&ring_type.to_le_bytes());
    match body_header {
        Some((timestamp, source_id)) => {
            bytes.extend_from_slice(&20u32.to_le_bytes());
            bytes.extend_from_slice(&timestamp.to_le_bytes());
            bytes.extend_from_slice(&source_id.to_le_bytes());
            bytes.extend_from_slice(&0u32.to_le_bytes());
        }
        None => bytes.extend_from_slice(&0u32.to_le_bytes()),
    }
    bytes.extend_from_slice(body);
    bytes
}

/// Body of a begin/end run item
pub fn state_change_body(run: u32, time_offset: u32, unix_time: u32, title: &str) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&run.to_le_bytes());
    body.extend_from_slice(&time_offset.to_le_bytes());
    body.extend_from_slice(&unix_time.to_le_bytes());
    body.extend_from_slice(&1u32.to_le_bytes());
    let mut title_bytes = [0u8; 81];
    for (dst, src) in title_bytes.iter_mut().zip(title.bytes()) {
        *dst = src;
    }
    body.extend_from_slice(&title_bytes);
    body
}
