// VM-USB stack readout of the JANUS CAEN cards.
// Layout per buffer: 1 header word, N CAEN packets, 1 VME timestamp footer.

/// Size of the VM-USB event header in bytes (a single 16-bit word)
pub const VMUSB_HEADER_SIZE: usize = 2;
pub const VMUSB_STACK_MASK: u16 = 0xe000;
pub const VMUSB_STACK_SHIFT: u16 = 13;
pub const VMUSB_SIZE_MASK: u16 = 0x0fff;
/// The i1 trigger stack. Anything else is a foreign or malformed event.
pub const PRIMARY_STACK: u8 = 0;

/// Size of a CAEN V785/V775 data packet in bytes (one 32-bit word)
pub const CAEN_PACKET_SIZE: usize = 4;
pub const CAEN_GEO_SHIFT: u32 = 27;
pub const CAEN_GEO_MASK: u32 = 0x1f;
pub const CAEN_TYPE_SHIFT: u32 = 24;
pub const CAEN_TYPE_MASK: u32 = 0x7;
pub const CAEN_TYPE_DATUM: u8 = 0;
pub const CAEN_CHANNEL_SHIFT: u32 = 16;
pub const CAEN_CHANNEL_MASK: u32 = 0x1f;
pub const CAEN_UNDERFLOW_BIT: u32 = 0x2000;
pub const CAEN_OVERFLOW_BIT: u32 = 0x1000;
pub const CAEN_VALUE_MASK: u32 = 0x0fff;

/// Two 48-bit timestamps, each as three 16-bit words
pub const VME_TIMESTAMP_SIZE: usize = 12;
/// 16-bit words of the payload taken up by the timestamp footer
pub const VME_TIMESTAMP_WORDS: u16 = 6;

// Address packing
pub const JANUS_SYSTEM_ID: u32 = 2;
pub const JANUS_CRATE_ID: u32 = 4;
/// ADCs are in slots 5-8, TDCs in slots 9-12
pub const FIRST_TDC_SLOT: u32 = 9;
pub const TDC_SLOT_OFFSET: u32 = 4;

/// VME clock tick in ns
pub const VME_CLOCK_MULTIPLIER: i64 = 20;

/// Default reference for the first run restart: Wed Jan 27 22:57:09 2016
pub const RUN_START_EPOCH: u32 = 1453953429;
/// Timestamp units per second of wall clock
pub const TIMESTAMP_UNITS_PER_SECOND: i64 = 1_000_000_000;

/// Unknown channel notices shown before we give up and say the map is broken
pub const DEFAULT_NOTICE_LIMIT: u64 = 1000;
/// Largest chunk of a bad buffer dumped to the log
pub const MAX_DUMP_BYTES: usize = 256;
