// The channel map is the only place that knows which electronics channel is which strip.
// General concept:
// [system, crate, slot, channel] -> ChannelInfo(.., detector, side, strip)
// keyed by the packed 32-bit address the decoder builds for every packet. The decoder and
// assembler only ever ask two questions: does this address exist, and which side is it on.
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

use fxhash::FxHashMap;

use super::detector::DetectorKind;
use super::error::ChannelMapError;
use super::hardware_id::{generate_address, ArraySide, ChannelInfo};

const ENTRIES_PER_LINE: usize = 7; //Number of elements in a single row in the CSV file

/// Load the default map for windows
#[cfg(target_family = "windows")]
fn load_default_map() -> String {
    String::from(include_str!("data\\default_janus_map.csv"))
}

/// Load the default map for macos and linux
#[cfg(target_family = "unix")]
fn load_default_map() -> String {
    String::from(include_str!("data/default_janus_map.csv"))
}

/// Anything that can turn a hardware address into channel metadata.
///
/// Unknown addresses are not an error; they return None and the caller decides how loud to be.
pub trait ChannelResolver {
    fn resolve(&self, address: u32) -> Option<&ChannelInfo>;
}

/// ChannelMap contains the mapping of packed hardware addresses to detector channels.
///
/// This can change from experiment to experiment, so ChannelMap reads in a CSV file where each
/// row contains 7 elements: system keyword, crate, slot, channel, detector number, side (F/B)
/// and strip number.
#[derive(Debug, Clone, Default)]
pub struct ChannelMap {
    map: FxHashMap<u32, ChannelInfo>,
}

impl ChannelMap {
    /// Create a new ChannelMap
    /// If the path is None, we load the default that is bundled with the builder
    pub fn new(path: Option<&Path>) -> Result<Self, ChannelMapError> {
        let mut contents = String::new();
        if let Some(p) = path {
            let mut file = File::open(p)?;
            file.read_to_string(&mut contents)?;
        } else {
            contents = load_default_map();
        }
        Self::from_csv_str(&contents)
    }

    /// Parse a map from the text of a CSV file (including its header line)
    pub fn from_csv_str(contents: &str) -> Result<Self, ChannelMapError> {
        let mut cm = ChannelMap::default();

        let mut lines = contents.lines().enumerate();
        lines.next(); // Skip the header
        for (line_number, line) in lines {
            if line.trim().is_empty() {
                continue;
            }
            let entries: Vec<&str> = line.split_terminator(',').map(|e| e.trim()).collect();
            if entries.len() != ENTRIES_PER_LINE {
                return Err(ChannelMapError::BadFileFormat(line_number + 1));
            }

            let system = DetectorKind::from_str(entries[0])?;
            let crate_id: u8 = entries[1].parse()?;
            let slot: u8 = entries[2].parse()?;
            let channel: u8 = entries[3].parse()?;
            let detector: u8 = entries[4].parse()?;
            let side = ArraySide::from_str(entries[5])?;
            let strip: u16 = entries[6].parse()?;

            let address = generate_address(
                system.system_id(),
                crate_id as u32,
                slot as u32,
                channel as u32,
            );
            let info = ChannelInfo {
                address,
                system,
                crate_id,
                slot,
                channel,
                detector,
                side,
                strip,
            };
            if cm.map.insert(address, info).is_some() {
                return Err(ChannelMapError::DuplicateAddress(address));
            }
        }

        Ok(cm)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl ChannelResolver for ChannelMap {
    fn resolve(&self, address: u32) -> Option<&ChannelInfo> {
        self.map.get(&address)
    }
}

//Unit tests
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_map() {
        let map = match ChannelMap::new(None) {
            Ok(m) => m,
            Err(_) => {
                panic!();
            }
        };
        assert_eq!(map.len(), 112);
        // Upstream detector sector 10
        let address = generate_address(2, 4, 6, 9);
        let info = match map.resolve(address) {
            Some(info) => info,
            None => panic!(),
        };
        assert_eq!(info.detector, 0);
        assert_eq!(info.side, ArraySide::Back);
        assert_eq!(info.strip, 10);
        // Rings only use 24 of the 32 channels
        assert!(map.resolve(generate_address(2, 4, 5, 24)).is_none());
    }

    #[test]
    fn test_bad_rows() {
        let short = "system,crate,slot,channel,detector,side,strip\njanus,4,5,0,0,F\n";
        assert!(matches!(
            ChannelMap::from_csv_str(short),
            Err(ChannelMapError::BadFileFormat(2))
        ));
        let duplicate = "header\njanus,4,5,0,0,F,1\njanus,4,5,0,1,B,1\n";
        assert!(matches!(
            ChannelMap::from_csv_str(duplicate),
            Err(ChannelMapError::DuplicateAddress(_))
        ));
        let bad_side = "header\njanus,4,5,0,0,X,1\n";
        assert!(matches!(
            ChannelMap::from_csv_str(bad_side),
            Err(ChannelMapError::BadDetector(_))
        ));
    }
}
