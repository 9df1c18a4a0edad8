use super::detector::DetectorKind;
use super::error::DetectorError;
use std::str::FromStr;

/// Which face of a double-sided detector a channel reads out.
///
/// For JANUS the rings are the front face and the sectors the back face.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArraySide {
    Front,
    Back,
}

impl FromStr for ArraySide {
    type Err = DetectorError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "F" | "f" | "front" => Ok(Self::Front),
            "B" | "b" | "back" => Ok(Self::Back),
            _ => Err(DetectorError::InvalidSide(s.to_string())),
        }
    }
}

/// ChannelInfo is everything we know about one hardware address.
///
/// The electronics fields (system, crate, slot, channel) are kept alongside the detector
/// fields so that downstream consumers never need to unpack the address themselves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub address: u32,
    pub system: DetectorKind,
    pub crate_id: u8,
    pub slot: u8,
    pub channel: u8,
    pub detector: u8,
    pub side: ArraySide,
    pub strip: u16,
}

impl ChannelInfo {
    pub fn is_front(&self) -> bool {
        self.side == ArraySide::Front
    }
}

/// Pack a hardware location into the 32-bit address used everywhere downstream
///
/// Layout is `system << 24 | crate << 16 | slot << 8 | channel`
pub fn generate_address(system_id: u32, crate_id: u32, slot: u32, channel: u32) -> u32 {
    ((system_id & 0xff) << 24) + ((crate_id & 0xff) << 16) + ((slot & 0xff) << 8) + (channel & 0xff)
}

/// The (system, crate, slot, channel) packed into an address
pub fn split_address(address: u32) -> (u8, u8, u8, u8) {
    (
        (address >> 24) as u8,
        (address >> 16) as u8,
        (address >> 8) as u8,
        address as u8,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_packing() {
        let address = generate_address(2, 4, 5, 17);
        assert_eq!(address, 0x0204_0511);
        assert_eq!(split_address(address), (2, 4, 5, 17));
    }

    #[test]
    fn test_side_keywords() {
        assert_eq!(ArraySide::from_str("F").unwrap(), ArraySide::Front);
        assert_eq!(ArraySide::from_str("back").unwrap(), ArraySide::Back);
        assert!(ArraySide::from_str("sideways").is_err());
    }
}
