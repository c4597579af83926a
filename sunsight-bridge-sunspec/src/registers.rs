//! SolarEdge SunSpec register map.
//!
//! Static description of every register block the bridge reads: where it
//! starts, how many registers it spans, and how each field inside it is
//! encoded. Offsets are relative to the block start. Scale factors are
//! referenced by the offset of their `ScaleFactor` field in the same block.

/// Maximum number of power meters chained behind an inverter.
pub const MAX_METERS: u8 = 3;

/// Maximum number of batteries chained behind an inverter.
pub const MAX_BATTERIES: u8 = 2;

const INVERTER_INFO_START: u16 = 40004;
const INVERTER_DATA_START: u16 = 40069;
const INVERTER_DATA_LEN: u16 = 50;

const METER_INFO_START: u16 = 40123;
const METER_DATA_START: u16 = 40188;
const METER_DATA_LEN: u16 = 105;
const METER_STRIDE: u16 = 174;

const BATTERY_INFO_START: u16 = 57600;
const BATTERY_INFO_LEN: u16 = 76;
const BATTERY_DATA_START: u16 = 57666;
const BATTERY_DATA_LEN: u16 = 72;
const BATTERY_STRIDE: u16 = 256;

const COMMON_INFO_LEN: u16 = 65;

/// Encoding of a register field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Uint16,
    Int16,
    Uint32,
    /// Accumulator, 32 bits unsigned.
    Acc32,
    Uint64,
    /// IEEE 754 single precision.
    Float32,
    Bitfield32,
    /// NUL-padded ASCII.
    Text,
    /// Signed power-of-ten exponent for another field.
    ScaleFactor,
    /// SunSpec operating state code.
    Status,
}

impl Encoding {
    /// Number of registers the encoding occupies, `None` for variable-width text.
    pub fn width(&self) -> Option<u16> {
        match self {
            Encoding::Uint16 | Encoding::Int16 | Encoding::ScaleFactor | Encoding::Status => {
                Some(1)
            }
            Encoding::Uint32 | Encoding::Acc32 | Encoding::Float32 | Encoding::Bitfield32 => {
                Some(2)
            }
            Encoding::Uint64 => Some(4),
            Encoding::Text => None,
        }
    }
}

/// Order of the 16-bit words inside a multi-register value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WordOrder {
    /// Most significant word first (SunSpec default).
    BigEndian,
    /// Least significant word first (StorEdge battery registers).
    LittleEndian,
}

/// Phase a field belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Present on every wiring.
    Any,
    /// Requires at least split phase.
    B,
    /// Requires three phase.
    C,
}

/// Electrical wiring of a device, which decides the phase fields it populates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wiring {
    SinglePhase,
    SplitPhase,
    ThreePhase,
}

impl Wiring {
    /// Wiring announced by a SunSpec model ID (inverter 101-103, meter 201-204).
    pub fn from_did(did: u16) -> Option<Self> {
        match did {
            101 | 201 => Some(Wiring::SinglePhase),
            102 | 202 => Some(Wiring::SplitPhase),
            103 | 203 | 204 => Some(Wiring::ThreePhase),
            _ => None,
        }
    }

    pub fn has_phase(&self, phase: Phase) -> bool {
        match phase {
            Phase::Any => true,
            Phase::B => !matches!(self, Wiring::SinglePhase),
            Phase::C => matches!(self, Wiring::ThreePhase),
        }
    }
}

/// One logical field inside a register block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterField {
    pub name: &'static str,
    /// Offset from the block start.
    pub offset: u16,
    /// Number of registers.
    pub count: u16,
    pub encoding: Encoding,
    /// Offset of the scale factor field applied to this one.
    pub scale: Option<u16>,
    pub unit: Option<&'static str>,
    pub phase: Phase,
}

impl RegisterField {
    const fn new(name: &'static str, offset: u16, count: u16, encoding: Encoding) -> Self {
        Self {
            name,
            offset,
            count,
            encoding,
            scale: None,
            unit: None,
            phase: Phase::Any,
        }
    }

    const fn u16(name: &'static str, offset: u16) -> Self {
        Self::new(name, offset, 1, Encoding::Uint16)
    }

    const fn i16(name: &'static str, offset: u16) -> Self {
        Self::new(name, offset, 1, Encoding::Int16)
    }

    const fn u32(name: &'static str, offset: u16) -> Self {
        Self::new(name, offset, 2, Encoding::Uint32)
    }

    const fn acc32(name: &'static str, offset: u16) -> Self {
        Self::new(name, offset, 2, Encoding::Acc32)
    }

    const fn u64(name: &'static str, offset: u16) -> Self {
        Self::new(name, offset, 4, Encoding::Uint64)
    }

    const fn f32(name: &'static str, offset: u16) -> Self {
        Self::new(name, offset, 2, Encoding::Float32)
    }

    const fn text(name: &'static str, offset: u16, count: u16) -> Self {
        Self::new(name, offset, count, Encoding::Text)
    }

    const fn sf(name: &'static str, offset: u16) -> Self {
        Self::new(name, offset, 1, Encoding::ScaleFactor)
    }

    const fn scaled(self, sf_offset: u16) -> Self {
        Self {
            scale: Some(sf_offset),
            ..self
        }
    }

    const fn unit(self, unit: &'static str) -> Self {
        Self {
            unit: Some(unit),
            ..self
        }
    }

    const fn phase(self, phase: Phase) -> Self {
        Self { phase, ..self }
    }

    /// Absolute Modbus address of the field in a block starting at `start`.
    pub fn address(&self, start: u16) -> u16 {
        start + self.offset
    }

    /// Whether the field is a value that gets published (scale factors are not).
    pub fn is_published(&self) -> bool {
        self.encoding != Encoding::ScaleFactor
    }
}

/// Contiguous span of registers read in one logical request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterBlock {
    /// Name used in logs and health metrics (`inverter`, `meter2_info`, ...).
    pub section: String,
    pub start: u16,
    pub count: u16,
    pub word_order: WordOrder,
    pub fields: &'static [RegisterField],
}

impl RegisterBlock {
    /// Fields to decode for a device of the given wiring.
    ///
    /// `None` keeps every field, for blocks without phase semantics or a
    /// device whose model could not be identified.
    pub fn fields_for(&self, wiring: Option<Wiring>) -> Vec<&'static RegisterField> {
        self.fields
            .iter()
            .filter(|f| wiring.is_none_or(|w| w.has_phase(f.phase)))
            .collect()
    }

    /// Field at a given offset, if any starts there.
    pub fn field_at(&self, offset: u16) -> Option<&'static RegisterField> {
        self.fields.iter().find(|f| f.offset == offset)
    }

    /// Last address covered by the block.
    pub fn end(&self) -> u16 {
        self.start + self.count - 1
    }
}

/// Offset of the SunSpec model ID in inverter and meter data blocks.
pub const DID_OFFSET: u16 = 0;

static INVERTER_FIELDS: [RegisterField; 38] = [
    RegisterField::u16("SunSpec_DID", 0),
    RegisterField::u16("SunSpec_Length", 1),
    RegisterField::u16("AC_Current", 2).scaled(6).unit("A"),
    RegisterField::u16("AC_CurrentA", 3).scaled(6).unit("A"),
    RegisterField::u16("AC_CurrentB", 4).scaled(6).unit("A").phase(Phase::B),
    RegisterField::u16("AC_CurrentC", 5).scaled(6).unit("A").phase(Phase::C),
    RegisterField::sf("AC_Current_SF", 6),
    RegisterField::u16("AC_VoltageAB", 7).scaled(13).unit("V"),
    RegisterField::u16("AC_VoltageBC", 8).scaled(13).unit("V").phase(Phase::C),
    RegisterField::u16("AC_VoltageCA", 9).scaled(13).unit("V").phase(Phase::C),
    RegisterField::u16("AC_VoltageAN", 10).scaled(13).unit("V"),
    RegisterField::u16("AC_VoltageBN", 11).scaled(13).unit("V").phase(Phase::B),
    RegisterField::u16("AC_VoltageCN", 12).scaled(13).unit("V").phase(Phase::C),
    RegisterField::sf("AC_Voltage_SF", 13),
    RegisterField::i16("AC_Power", 14).scaled(15).unit("W"),
    RegisterField::sf("AC_Power_SF", 15),
    RegisterField::u16("AC_Frequency", 16).scaled(17).unit("Hz"),
    RegisterField::sf("AC_Frequency_SF", 17),
    RegisterField::i16("AC_VA", 18).scaled(19).unit("VA"),
    RegisterField::sf("AC_VA_SF", 19),
    RegisterField::i16("AC_VAR", 20).scaled(21).unit("var"),
    RegisterField::sf("AC_VAR_SF", 21),
    RegisterField::i16("AC_PF", 22).scaled(23).unit("%"),
    RegisterField::sf("AC_PF_SF", 23),
    RegisterField::acc32("AC_Energy_WH", 24).scaled(26).unit("Wh"),
    RegisterField::sf("AC_Energy_WH_SF", 26),
    RegisterField::u16("DC_Current", 27).scaled(28).unit("A"),
    RegisterField::sf("DC_Current_SF", 28),
    RegisterField::u16("DC_Voltage", 29).scaled(30).unit("V"),
    RegisterField::sf("DC_Voltage_SF", 30),
    RegisterField::i16("DC_Power", 31).scaled(32).unit("W"),
    RegisterField::sf("DC_Power_SF", 32),
    RegisterField::i16("Temp_Sink", 34).scaled(37).unit("Cel"),
    RegisterField::sf("Temp_SF", 37),
    RegisterField::new("Status", 38, 1, Encoding::Status),
    RegisterField::u16("Status_Vendor", 39),
    RegisterField::new("Events", 40, 2, Encoding::Bitfield32),
    RegisterField::new("Events_Vendor", 44, 2, Encoding::Bitfield32),
];

static METER_FIELDS: [RegisterField; 61] = [
    RegisterField::u16("SunSpec_DID", 0),
    RegisterField::u16("SunSpec_Length", 1),
    RegisterField::i16("AC_Current", 2).scaled(6).unit("A"),
    RegisterField::i16("AC_CurrentA", 3).scaled(6).unit("A"),
    RegisterField::i16("AC_CurrentB", 4).scaled(6).unit("A").phase(Phase::B),
    RegisterField::i16("AC_CurrentC", 5).scaled(6).unit("A").phase(Phase::C),
    RegisterField::sf("AC_Current_SF", 6),
    RegisterField::i16("AC_VoltageLN", 7).scaled(15).unit("V"),
    RegisterField::i16("AC_VoltageAN", 8).scaled(15).unit("V"),
    RegisterField::i16("AC_VoltageBN", 9).scaled(15).unit("V").phase(Phase::B),
    RegisterField::i16("AC_VoltageCN", 10).scaled(15).unit("V").phase(Phase::C),
    RegisterField::i16("AC_VoltageLL", 11).scaled(15).unit("V").phase(Phase::B),
    RegisterField::i16("AC_VoltageAB", 12).scaled(15).unit("V").phase(Phase::B),
    RegisterField::i16("AC_VoltageBC", 13).scaled(15).unit("V").phase(Phase::C),
    RegisterField::i16("AC_VoltageCA", 14).scaled(15).unit("V").phase(Phase::C),
    RegisterField::sf("AC_Voltage_SF", 15),
    RegisterField::i16("AC_Frequency", 16).scaled(17).unit("Hz"),
    RegisterField::sf("AC_Frequency_SF", 17),
    RegisterField::i16("AC_Power", 18).scaled(22).unit("W"),
    RegisterField::i16("AC_Power_A", 19).scaled(22).unit("W"),
    RegisterField::i16("AC_Power_B", 20).scaled(22).unit("W").phase(Phase::B),
    RegisterField::i16("AC_Power_C", 21).scaled(22).unit("W").phase(Phase::C),
    RegisterField::sf("AC_Power_SF", 22),
    RegisterField::i16("AC_VA", 23).scaled(27).unit("VA"),
    RegisterField::i16("AC_VA_A", 24).scaled(27).unit("VA"),
    RegisterField::i16("AC_VA_B", 25).scaled(27).unit("VA").phase(Phase::B),
    RegisterField::i16("AC_VA_C", 26).scaled(27).unit("VA").phase(Phase::C),
    RegisterField::sf("AC_VA_SF", 27),
    RegisterField::i16("AC_VAR", 28).scaled(32).unit("var"),
    RegisterField::i16("AC_VAR_A", 29).scaled(32).unit("var"),
    RegisterField::i16("AC_VAR_B", 30).scaled(32).unit("var").phase(Phase::B),
    RegisterField::i16("AC_VAR_C", 31).scaled(32).unit("var").phase(Phase::C),
    RegisterField::sf("AC_VAR_SF", 32),
    RegisterField::i16("AC_PF", 33).scaled(37).unit("%"),
    RegisterField::i16("AC_PF_A", 34).scaled(37).unit("%"),
    RegisterField::i16("AC_PF_B", 35).scaled(37).unit("%").phase(Phase::B),
    RegisterField::i16("AC_PF_C", 36).scaled(37).unit("%").phase(Phase::C),
    RegisterField::sf("AC_PF_SF", 37),
    RegisterField::acc32("Exported", 38).scaled(54).unit("Wh"),
    RegisterField::acc32("Exported_A", 40).scaled(54).unit("Wh"),
    RegisterField::acc32("Exported_B", 42).scaled(54).unit("Wh").phase(Phase::B),
    RegisterField::acc32("Exported_C", 44).scaled(54).unit("Wh").phase(Phase::C),
    RegisterField::acc32("Imported", 46).scaled(54).unit("Wh"),
    RegisterField::acc32("Imported_A", 48).scaled(54).unit("Wh"),
    RegisterField::acc32("Imported_B", 50).scaled(54).unit("Wh").phase(Phase::B),
    RegisterField::acc32("Imported_C", 52).scaled(54).unit("Wh").phase(Phase::C),
    RegisterField::sf("Energy_W_SF", 54),
    RegisterField::acc32("Exported_VA", 55).scaled(71).unit("VAh"),
    RegisterField::acc32("Exported_VA_A", 57).scaled(71).unit("VAh"),
    RegisterField::acc32("Exported_VA_B", 59).scaled(71).unit("VAh").phase(Phase::B),
    RegisterField::acc32("Exported_VA_C", 61).scaled(71).unit("VAh").phase(Phase::C),
    RegisterField::acc32("Imported_VA", 63).scaled(71).unit("VAh"),
    RegisterField::acc32("Imported_VA_A", 65).scaled(71).unit("VAh"),
    RegisterField::acc32("Imported_VA_B", 67).scaled(71).unit("VAh").phase(Phase::B),
    RegisterField::acc32("Imported_VA_C", 69).scaled(71).unit("VAh").phase(Phase::C),
    RegisterField::sf("Energy_VA_SF", 71),
    RegisterField::acc32("Import_VARh_Q1", 72).scaled(104).unit("varh"),
    RegisterField::acc32("Import_VARh_Q2", 80).scaled(104).unit("varh"),
    RegisterField::acc32("Export_VARh_Q3", 88).scaled(104).unit("varh"),
    RegisterField::acc32("Export_VARh_Q4", 96).scaled(104).unit("varh"),
    RegisterField::sf("Energy_VAR_SF", 104),
];

static BATTERY_FIELDS: [RegisterField; 18] = [
    RegisterField::f32("Rated_Energy", 0).unit("Wh"),
    RegisterField::f32("Max_Charge_Continues_Power", 2).unit("W"),
    RegisterField::f32("Max_Discharge_Continues_Power", 4).unit("W"),
    RegisterField::f32("Max_Charge_Peak_Power", 6).unit("W"),
    RegisterField::f32("Max_Discharge_Peak_Power", 8).unit("W"),
    RegisterField::f32("Average_Temperature", 42).unit("Cel"),
    RegisterField::f32("Max_Temperature", 44).unit("Cel"),
    RegisterField::f32("Instantaneous_Voltage", 46).unit("V"),
    RegisterField::f32("Instantaneous_Current", 48).unit("A"),
    RegisterField::f32("Instantaneous_Power", 50).unit("W"),
    RegisterField::u64("Lifetime_Export_Energy_Counter", 52).unit("Wh"),
    RegisterField::u64("Lifetime_Import_Energy_Counter", 56).unit("Wh"),
    RegisterField::f32("Max_Energy", 60).unit("Wh"),
    RegisterField::f32("Available_Energy", 62).unit("Wh"),
    RegisterField::f32("State_of_Health", 64).unit("%"),
    RegisterField::f32("State_of_Energy", 66).unit("%"),
    RegisterField::u32("Status", 68),
    RegisterField::u32("Status_Internal", 70),
];

/// Field names used by identity blocks.
pub mod identity {
    pub const MANUFACTURER: &str = "Manufacturer";
    pub const MODEL: &str = "Model";
    pub const OPTIONS: &str = "Options";
    pub const VERSION: &str = "Version";
    pub const SERIAL_NUMBER: &str = "SerialNumber";
    pub const DEVICE_ADDRESS: &str = "DeviceAddress";
}

static COMMON_INFO_FIELDS: [RegisterField; 6] = [
    RegisterField::text(identity::MANUFACTURER, 0, 16),
    RegisterField::text(identity::MODEL, 16, 16),
    RegisterField::text(identity::OPTIONS, 32, 8),
    RegisterField::text(identity::VERSION, 40, 8),
    RegisterField::text(identity::SERIAL_NUMBER, 48, 16),
    RegisterField::u16(identity::DEVICE_ADDRESS, 64),
];

static BATTERY_INFO_FIELDS: [RegisterField; 5] = [
    RegisterField::text(identity::MANUFACTURER, 0, 16),
    RegisterField::text(identity::MODEL, 16, 16),
    RegisterField::text(identity::VERSION, 32, 16),
    RegisterField::text(identity::SERIAL_NUMBER, 48, 16),
    RegisterField::u16(identity::DEVICE_ADDRESS, 64),
];

/// Inverter data block (SunSpec model 101-103).
pub fn inverter_block() -> RegisterBlock {
    RegisterBlock {
        section: "inverter".to_string(),
        start: INVERTER_DATA_START,
        count: INVERTER_DATA_LEN,
        word_order: WordOrder::BigEndian,
        fields: &INVERTER_FIELDS,
    }
}

/// Inverter common (identity) block.
pub fn inverter_identity_block() -> RegisterBlock {
    RegisterBlock {
        section: "inverter_info".to_string(),
        start: INVERTER_INFO_START,
        count: COMMON_INFO_LEN,
        word_order: WordOrder::BigEndian,
        fields: &COMMON_INFO_FIELDS,
    }
}

/// Data block of meter `index` (1-based, SunSpec model 201-204).
pub fn meter_block(index: u8) -> RegisterBlock {
    RegisterBlock {
        section: format!("meter{}", index),
        start: METER_DATA_START + METER_STRIDE * chain_slot(index),
        count: METER_DATA_LEN,
        word_order: WordOrder::BigEndian,
        fields: &METER_FIELDS,
    }
}

/// Common (identity) block of meter `index` (1-based).
pub fn meter_identity_block(index: u8) -> RegisterBlock {
    RegisterBlock {
        section: format!("meter{}_info", index),
        start: METER_INFO_START + METER_STRIDE * chain_slot(index),
        count: COMMON_INFO_LEN,
        word_order: WordOrder::BigEndian,
        fields: &COMMON_INFO_FIELDS,
    }
}

/// Data block of battery `index` (1-based).
pub fn battery_block(index: u8) -> RegisterBlock {
    RegisterBlock {
        section: format!("battery{}", index),
        start: BATTERY_DATA_START + BATTERY_STRIDE * chain_slot(index),
        count: BATTERY_DATA_LEN,
        word_order: WordOrder::LittleEndian,
        fields: &BATTERY_FIELDS,
    }
}

/// Identity block of battery `index` (1-based).
pub fn battery_identity_block(index: u8) -> RegisterBlock {
    RegisterBlock {
        section: format!("battery{}_info", index),
        start: BATTERY_INFO_START + BATTERY_STRIDE * chain_slot(index),
        count: BATTERY_INFO_LEN,
        word_order: WordOrder::LittleEndian,
        fields: &BATTERY_INFO_FIELDS,
    }
}

fn chain_slot(index: u8) -> u16 {
    u16::from(index.max(1) - 1)
}
