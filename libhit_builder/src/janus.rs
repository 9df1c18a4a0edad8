use fxhash::FxHashMap;

use super::channel_map::ChannelResolver;
use super::constants::*;
use super::detector::{
    Assembly, DecodeStats, DecodedBuffer, Detector, DetectorKind, RawBuffer, RunClock,
};
use super::error::{BufferLengthMismatch, DecodeError};
use super::hardware_id::generate_address;
use super::hit::{BackHit, ChannelReading, Hit, ReadingKind};
use super::notice::{Notice, NoticeLimiter};
use super::vmusb::{hex_dump, read_event, CaenPacket, HeaderFault};

/// Pack the JANUS address of a packet. ADC and TDC packets of the same physical channel
/// get the same address.
pub fn janus_address(packet: &CaenPacket) -> u32 {
    generate_address(
        JANUS_SYSTEM_ID,
        JANUS_CRATE_ID,
        packet.adc_card_num(),
        packet.channel_num(),
    )
}

/// Working readings for one side of the detector, one per address, in first-seen order
#[derive(Debug, Default)]
struct SideGroup {
    index: FxHashMap<u32, usize>,
    hits: Vec<Hit>,
}

impl SideGroup {
    fn entry(&mut self, address: u32, timestamp: i64) -> &mut Hit {
        let idx = match self.index.get(&address) {
            Some(idx) => *idx,
            None => {
                self.hits.push(Hit::new(address, timestamp));
                self.index.insert(address, self.hits.len() - 1);
                self.hits.len() - 1
            }
        };
        &mut self.hits[idx]
    }

    /// Largest charge wins; on a tie the earlier address keeps it
    fn best(&self) -> Option<&Hit> {
        let mut best: Option<&Hit> = None;
        for hit in self.hits.iter() {
            match best {
                Some(current) if hit.charge <= current.charge => (),
                _ => best = Some(hit),
            }
        }
        best
    }
}

/// The JANUS double-sided silicon pair, read out by CAEN V785 ADCs and V775 TDCs through a VM-USB.
///
/// Each trigger is one VM-USB buffer. Rings (front) and sectors (back) are correlated by
/// taking the largest charge on each side.
#[derive(Debug, Clone, Default)]
pub struct Janus {
    notices: NoticeLimiter,
    stats: DecodeStats,
}

impl Janus {
    pub fn new(notice_limit: u64) -> Self {
        Self {
            notices: NoticeLimiter::new(notice_limit),
            stats: DecodeStats::default(),
        }
    }

    fn report_unknown(&mut self, packet: &CaenPacket, address: u32) {
        self.stats.unknown_channels += 1;
        let notice = self.notices.record();
        let level = match notice.level() {
            Some(level) => level,
            None => return,
        };
        match notice {
            Notice::LimitReached => spdlog::log!(
                level,
                "{} janus channels were not in the channel map (latest address = {:#010x}). I'm going to stop telling you that the channel was unknown; the channel map probably does not match the electronics.",
                self.notices.count(),
                address
            ),
            _ => spdlog::log!(
                level,
                "Unknown janus channel (slot, channel): ({}, {}), address = {:#010x}",
                packet.adc_card_num(),
                packet.channel_num(),
                address
            ),
        }
    }
}

impl Detector for Janus {
    fn kind(&self) -> DetectorKind {
        DetectorKind::Janus
    }

    fn decode(
        &mut self,
        buffer: &RawBuffer<'_>,
        resolver: &dyn ChannelResolver,
        clock: &RunClock,
    ) -> Result<DecodedBuffer, DecodeError> {
        self.stats.buffers += 1;
        let payload = buffer.payload;
        let event = match read_event(payload) {
            Ok(event) => event,
            Err(HeaderFault::Truncated) => {
                self.stats.malformed += 1;
                return Err(DecodeError::TruncatedHeader(self.kind(), payload.len()));
            }
            Err(HeaderFault::PayloadTooSmall(words)) => {
                self.stats.malformed += 1;
                return Err(DecodeError::MalformedHeader(self.kind(), words));
            }
        };

        // This should ALWAYS be the i1 stack. If it is not, it is a malformed event.
        let foreign_trigger = !event.header.is_primary_trigger();
        if foreign_trigger {
            self.stats.foreign_triggers += 1;
            spdlog::debug!(
                "janus buffer {} was read by stack {}, expected stack {}",
                buffer.sequence,
                event.header.stack,
                PRIMARY_STACK
            );
        }

        let timestamp = match event.timestamp {
            Some(ts) => ts.ts1 as i64 * VME_CLOCK_MULTIPLIER + clock.offset,
            None => clock.timestamp,
        };

        let mut readings: Vec<ChannelReading> = Vec::with_capacity(event.packets.len());
        for packet in event.packets.iter() {
            if !packet.is_valid() {
                self.stats.invalid_packets += 1;
                continue;
            }
            let address = janus_address(packet);
            if resolver.resolve(address).is_none() {
                self.report_unknown(packet, address);
                continue;
            }
            readings.push(ChannelReading {
                address,
                timestamp,
                value: packet.value(),
                overflow: packet.overflow(),
                underflow: packet.underflow(),
                kind: if packet.is_tdc() {
                    ReadingKind::Time
                } else {
                    ReadingKind::Charge
                },
            });
        }

        let mismatch = if event.is_complete(payload.len()) {
            None
        } else {
            self.stats.length_mismatches += 1;
            let mismatch = BufferLengthMismatch {
                system: self.kind(),
                buffer_size: payload.len(),
                expected_size: event.expected_size,
                cursor: event.cursor,
                n_packets: event.n_packets,
            };
            spdlog::warn!(
                "{} (buffer {}){}",
                mismatch,
                buffer.sequence,
                hex_dump(payload)
            );
            Some(mismatch)
        };

        Ok(DecodedBuffer {
            readings,
            timestamp,
            n_packets: event.n_packets,
            foreign_trigger,
            mismatch,
        })
    }

    fn assemble(
        &self,
        readings: &[ChannelReading],
        timestamp: i64,
        resolver: &dyn ChannelResolver,
    ) -> Assembly {
        let mut fronts = SideGroup::default();
        let mut backs = SideGroup::default();
        for reading in readings.iter() {
            let info = match resolver.resolve(reading.address) {
                Some(info) => info,
                None => continue,
            };
            let group = if info.is_front() {
                &mut fronts
            } else {
                &mut backs
            };
            group.entry(reading.address, timestamp).apply(reading);
        }

        // No timing gate on either side; the largest charge wins regardless of its TDC value
        let hits = match (fronts.best(), backs.best()) {
            (Some(front), Some(back)) => {
                let mut hit = front.clone();
                hit.back = Some(BackHit {
                    address: back.address,
                    charge: back.charge,
                    time: back.time,
                    timestamp: back.timestamp,
                });
                vec![hit]
            }
            _ => Vec::new(),
        };

        let mut channels = fronts.hits;
        channels.append(&mut backs.hits);
        Assembly { hits, channels }
    }

    fn stats(&self) -> &DecodeStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel_map::ChannelMap;
    use crate::testing::{caen_word, vmusb_buffer};

    fn reading(slot: u32, channel: u32, value: i32, kind: ReadingKind) -> ChannelReading {
        ChannelReading {
            address: generate_address(JANUS_SYSTEM_ID, JANUS_CRATE_ID, slot, channel),
            timestamp: 500,
            value,
            overflow: false,
            underflow: false,
            kind,
        }
    }

    fn decode(janus: &mut Janus, map: &ChannelMap, bytes: &[u8]) -> DecodedBuffer {
        let buffer = RawBuffer {
            system: DetectorKind::Janus,
            sequence: 0,
            payload: bytes,
        };
        janus
            .decode(&buffer, map, &RunClock::default())
            .expect("decode failed")
    }

    #[test]
    fn test_adc_tdc_same_address() {
        for k in 5..=8 {
            let adc = CaenPacket(caen_word(k, 3, 0, false, false));
            let tdc = CaenPacket(caen_word(k + TDC_SLOT_OFFSET, 3, 0, false, false));
            assert!(!adc.is_tdc());
            assert!(tdc.is_tdc());
            assert_eq!(janus_address(&adc), janus_address(&tdc));
        }
    }

    #[test]
    fn test_decode_readings() {
        let map = ChannelMap::new(None).unwrap();
        let mut janus = Janus::default();
        let packets = [
            caen_word(5, 2, 400, false, false),
            caen_word(9, 2, 1200, false, true),
            // end-of-block word
            4 << CAEN_TYPE_SHIFT | 5 << CAEN_GEO_SHIFT,
            // ring channel 30 is not wired
            caen_word(5, 30, 77, false, false),
        ];
        let decoded = decode(&mut janus, &map, &vmusb_buffer(0, &packets, 1000));
        assert_eq!(decoded.n_packets, 4);
        assert_eq!(decoded.timestamp, 1000 * VME_CLOCK_MULTIPLIER);
        assert_eq!(decoded.readings.len(), 2);
        assert_eq!(decoded.readings[0].address, decoded.readings[1].address);
        assert_eq!(decoded.readings[0].kind, ReadingKind::Charge);
        assert_eq!(decoded.readings[1].kind, ReadingKind::Time);
        assert!(decoded.readings[1].underflow);
        assert!(!decoded.foreign_trigger);
        assert!(decoded.mismatch.is_none());
        assert_eq!(janus.stats().invalid_packets, 1);
        assert_eq!(janus.stats().unknown_channels, 1);
    }

    #[test]
    fn test_foreign_trigger_is_flagged_not_rejected() {
        let map = ChannelMap::new(None).unwrap();
        let mut janus = Janus::default();
        let packets = [caen_word(5, 0, 10, false, false)];
        let decoded = decode(&mut janus, &map, &vmusb_buffer(2, &packets, 5));
        assert!(decoded.foreign_trigger);
        assert_eq!(decoded.readings.len(), 1);
        assert_eq!(janus.stats().foreign_triggers, 1);
    }

    #[test]
    fn test_truncated_buffer_reports_mismatch() {
        let map = ChannelMap::new(None).unwrap();
        let mut janus = Janus::default();
        let packets = [caen_word(5, 0, 40, false, false), caen_word(6, 0, 20, false, false)];
        let bytes = vmusb_buffer(0, &packets, 77);
        let buffer = RawBuffer {
            system: DetectorKind::Janus,
            sequence: 3,
            payload: &bytes[..bytes.len() - 1],
        };
        let clock = RunClock {
            timestamp: 12345,
            offset: 0,
        };
        let decoded = janus.decode(&buffer, &map, &clock).unwrap();
        let mismatch = decoded.mismatch.expect("expected a length mismatch");
        assert_eq!(mismatch.buffer_size, bytes.len() - 1);
        assert_eq!(mismatch.expected_size, bytes.len());
        assert_eq!(decoded.readings.len(), 2);
        // No footer, so the running clock stands in
        assert_eq!(decoded.timestamp, 12345);
        assert_eq!(janus.stats().length_mismatches, 1);
    }

    #[test]
    fn test_malformed_header() {
        let map = ChannelMap::new(None).unwrap();
        let mut janus = Janus::default();
        let buffer = RawBuffer {
            system: DetectorKind::Janus,
            sequence: 0,
            payload: &[0x02, 0x00, 0x00, 0x00],
        };
        assert!(matches!(
            janus.decode(&buffer, &map, &RunClock::default()),
            Err(DecodeError::MalformedHeader(DetectorKind::Janus, 2))
        ));
        assert_eq!(janus.stats().malformed, 1);
    }

    #[test]
    fn test_unknown_channel_limit() {
        let map = ChannelMap::new(None).unwrap();
        let mut janus = Janus::new(2);
        let packets: Vec<u32> = (24..30).map(|ch| caen_word(5, ch, 1, false, false)).collect();
        let decoded = decode(&mut janus, &map, &vmusb_buffer(0, &packets, 1));
        assert!(decoded.readings.is_empty());
        assert_eq!(janus.stats().unknown_channels, 6);
    }

    #[test]
    fn test_max_charge_wins() {
        let map = ChannelMap::new(None).unwrap();
        let janus = Janus::default();
        let readings = vec![
            reading(5, 0, 10, ReadingKind::Charge),
            reading(5, 1, 50, ReadingKind::Charge),
            reading(5, 1, 900, ReadingKind::Time),
            reading(5, 2, 30, ReadingKind::Charge),
            reading(6, 4, 25, ReadingKind::Charge),
        ];
        let assembly = janus.assemble(&readings, 500, &map);
        assert_eq!(assembly.hits.len(), 1);
        let hit = &assembly.hits[0];
        assert_eq!(hit.address, readings[1].address);
        assert_eq!(hit.charge, 50);
        assert_eq!(hit.time, 900);
        assert_eq!(hit.timestamp, 500);
        let back = hit.back.expect("missing back hit");
        assert_eq!(back.address, readings[4].address);
        assert_eq!(back.charge, 25);
        assert_eq!(back.timestamp, 500);
        // Losers are still reported
        assert_eq!(assembly.channels.len(), 4);
    }

    #[test]
    fn test_no_one_sided_hits() {
        let map = ChannelMap::new(None).unwrap();
        let janus = Janus::default();
        let fronts_only = vec![
            reading(5, 0, 10, ReadingKind::Charge),
            reading(5, 1, 50, ReadingKind::Charge),
        ];
        let assembly = janus.assemble(&fronts_only, 0, &map);
        assert!(assembly.hits.is_empty());
        assert_eq!(assembly.channels.len(), 2);

        let backs_only = vec![reading(6, 0, 10, ReadingKind::Charge)];
        assert!(janus.assemble(&backs_only, 0, &map).hits.is_empty());
    }

    #[test]
    fn test_tie_goes_to_first_seen() {
        let map = ChannelMap::new(None).unwrap();
        let janus = Janus::default();
        let readings = vec![
            reading(5, 7, 60, ReadingKind::Charge),
            reading(5, 3, 60, ReadingKind::Charge),
            reading(6, 0, 0, ReadingKind::Charge),
        ];
        let assembly = janus.assemble(&readings, 0, &map);
        assert_eq!(assembly.hits[0].address, readings[0].address);
        // Zero charge still counts as a candidate
        assert_eq!(assembly.hits[0].back.unwrap().charge, 0);
    }

    #[test]
    fn test_repeated_packets_update() {
        let map = ChannelMap::new(None).unwrap();
        let janus = Janus::default();
        let readings = vec![
            reading(5, 0, 10, ReadingKind::Charge),
            reading(5, 0, 35, ReadingKind::Charge),
            reading(6, 0, 5, ReadingKind::Charge),
        ];
        let assembly = janus.assemble(&readings, 0, &map);
        assert_eq!(assembly.channels.len(), 2);
        assert_eq!(assembly.hits[0].charge, 35);
    }
}
