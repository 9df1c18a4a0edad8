/// Which converter a reading came from. ADC packets carry charge, TDC packets carry time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadingKind {
    Charge,
    Time,
}

/// One decoded packet, after address normalization and resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelReading {
    pub address: u32,
    pub timestamp: i64,
    pub value: i32,
    pub overflow: bool,
    pub underflow: bool,
    pub kind: ReadingKind,
}

/// Over/underflow bits, kept separately for the charge and the time converter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HitFlags {
    pub adc_overflow: bool,
    pub adc_underflow: bool,
    pub tdc_overflow: bool,
    pub tdc_underflow: bool,
}

impl HitFlags {
    /// Pack the flags for columnar output (1: ADC overflow, 2: ADC underflow, 4: TDC overflow, 8: TDC underflow)
    pub fn bits(&self) -> u8 {
        (self.adc_overflow as u8)
            | (self.adc_underflow as u8) << 1
            | (self.tdc_overflow as u8) << 2
            | (self.tdc_underflow as u8) << 3
    }
}

/// The correlated partner of a Hit, e.g. the sector that fired with a ring
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackHit {
    pub address: u32,
    pub charge: i32,
    pub time: i32,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Hit {
    pub address: u32,
    pub timestamp: i64,
    pub charge: i32,
    pub time: i32,
    pub flags: HitFlags,
    pub back: Option<BackHit>,
}

impl Hit {
    pub fn new(address: u32, timestamp: i64) -> Self {
        Self {
            address,
            timestamp,
            ..Default::default()
        }
    }

    /// Fold a reading into this hit. Charge readings set the charge and ADC flags, time
    /// readings set the time and TDC flags.
    pub fn apply(&mut self, reading: &ChannelReading) {
        self.address = reading.address;
        self.timestamp = reading.timestamp;
        match reading.kind {
            ReadingKind::Charge => {
                self.charge = reading.value;
                self.flags.adc_overflow = reading.overflow;
                self.flags.adc_underflow = reading.underflow;
            }
            ReadingKind::Time => {
                self.time = reading.value;
                self.flags.tdc_overflow = reading.overflow;
                self.flags.tdc_underflow = reading.underflow;
            }
        }
    }

    /// Shift this hit (and its partner) along the time axis
    pub fn shift_timestamp(&mut self, delta: i64) {
        self.timestamp += delta;
        if let Some(back) = self.back.as_mut() {
            back.timestamp += delta;
        }
    }
}
