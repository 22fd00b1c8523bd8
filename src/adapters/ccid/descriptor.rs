//! USB CCID class descriptor parsing.
//!
//! The smart-card functional descriptor (type 0x21) sits in the extra
//! bytes of the CCID interface descriptor. It is read once at device
//! enumeration and drives the power-on voltage policy and message sizing.
//!
//! ```text
//! Offset  Size  Field
//! 0       1     bLength (0x36)
//! 1       1     bDescriptorType (0x21)
//! 5       1     bVoltageSupport (bit 0: 5V, bit 1: 3V, bit 2: 1.8V)
//! 6       4     dwProtocols (bit 0: T=0, bit 1: T=1)
//! 10      4     dwDefaultClock (kHz)
//! 40      4     dwFeatures
//! 44      4     dwMaxCCIDMessageLength
//! ```

/// Functional descriptor type for the CCID class.
const CCID_DESCRIPTOR_TYPE: u8 = 0x21;

/// Length of the CCID functional descriptor.
const CCID_DESCRIPTOR_LENGTH: usize = 0x36;

/// dwFeatures: reader selects the ICC voltage itself.
const FEATURE_AUTO_VOLTAGE_SELECTION: u32 = 0x0000_0008;

/// dwFeatures: reader negotiates PPS parameters itself.
const FEATURE_AUTO_PPS: u32 = 0x0000_0080;

/// ICC supply voltage, encoded as the bPowerSelect byte of
/// `PC_to_RDR_IccPowerOn`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Voltage {
    Automatic,
    Volts5,
    Volts3,
    Volts1_8,
}

impl Voltage {
    /// The bPowerSelect byte value.
    pub fn power_select_byte(self) -> u8 {
        match self {
            Voltage::Automatic => 0x00,
            Voltage::Volts5 => 0x01,
            Voltage::Volts3 => 0x02,
            Voltage::Volts1_8 => 0x03,
        }
    }

    /// Bit in bVoltageSupport advertising this voltage.
    fn support_bit(self) -> u8 {
        match self {
            Voltage::Automatic => 0,
            Voltage::Volts5 => 0x01,
            Voltage::Volts3 => 0x02,
            Voltage::Volts1_8 => 0x04,
        }
    }
}

impl std::fmt::Display for Voltage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Voltage::Automatic => write!(f, "automatic"),
            Voltage::Volts5 => write!(f, "5V"),
            Voltage::Volts3 => write!(f, "3V"),
            Voltage::Volts1_8 => write!(f, "1.8V"),
        }
    }
}

/// Parsed CCID class descriptor. Immutable after enumeration.
#[derive(Debug, Clone)]
pub struct CcidDescription {
    voltage_support: u8,
    protocols: u32,
    default_clock_khz: u32,
    features: u32,
    max_message_length: u32,
}

impl CcidDescription {
    /// Scan the interface's extra descriptor bytes for the CCID
    /// functional descriptor.
    ///
    /// Returns `None` when no well-formed descriptor is present; callers
    /// fall back to [`CcidDescription::permissive_default`].
    pub fn from_extra_descriptors(extra: &[u8]) -> Option<Self> {
        let mut pos = 0;
        while pos + 2 <= extra.len() {
            let length = extra[pos] as usize;
            if length < 2 || pos + length > extra.len() {
                return None;
            }
            let descriptor_type = extra[pos + 1];

            if descriptor_type == CCID_DESCRIPTOR_TYPE && length >= CCID_DESCRIPTOR_LENGTH {
                let d = &extra[pos..pos + length];
                return Some(Self {
                    voltage_support: d[5],
                    protocols: u32::from_le_bytes([d[6], d[7], d[8], d[9]]),
                    default_clock_khz: u32::from_le_bytes([d[10], d[11], d[12], d[13]]),
                    features: u32::from_le_bytes([d[40], d[41], d[42], d[43]]),
                    max_message_length: u32::from_le_bytes([d[44], d[45], d[46], d[47]]),
                });
            }

            pos += length;
        }
        None
    }

    /// Description for readers whose class descriptor could not be read:
    /// no automatic selection, all voltages eligible for fallback.
    pub fn permissive_default() -> Self {
        Self {
            voltage_support: 0x07,
            protocols: 0x0000_0003,
            default_clock_khz: 4000,
            features: 0,
            max_message_length: 2048,
        }
    }

    pub fn has_automatic_voltage_selection(&self) -> bool {
        self.features & FEATURE_AUTO_VOLTAGE_SELECTION != 0
    }

    pub fn has_automatic_pps(&self) -> bool {
        self.features & FEATURE_AUTO_PPS != 0
    }

    pub fn supports_t1(&self) -> bool {
        self.protocols & 0x0000_0002 != 0
    }

    pub fn default_clock_khz(&self) -> u32 {
        self.default_clock_khz
    }

    pub fn max_message_length(&self) -> usize {
        self.max_message_length as usize
    }

    /// Voltages to try at power-on, in order.
    ///
    /// Automatic selection collapses to a single `0x00` attempt; manual
    /// selection walks the advertised voltages from highest to lowest.
    pub fn power_on_voltages(&self) -> Vec<Voltage> {
        if self.has_automatic_voltage_selection() {
            return vec![Voltage::Automatic];
        }

        let manual = [Voltage::Volts5, Voltage::Volts3, Voltage::Volts1_8];
        let advertised: Vec<Voltage> = manual
            .into_iter()
            .filter(|v| self.voltage_support & v.support_bit() != 0)
            .collect();

        if advertised.is_empty() {
            manual.to_vec()
        } else {
            advertised
        }
    }
}
