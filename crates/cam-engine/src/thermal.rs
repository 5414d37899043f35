//! Thermal (IR) camera status.

use serde::Serialize;

/// First IR status poll after parameters load.
pub const IR_STATUS_FIRST_POLL_MS: u64 = 100;
/// Poll period once the camera has answered.
pub const IR_STATUS_PERIOD_MS: u64 = 1000;

pub const PALETTE_BARS: [&str; 11] = [
    "Fusion",
    "Rainbow",
    "Globow",
    "IceFire",
    "IronBlack",
    "WhiteHot",
    "BlackHot",
    "Rain",
    "Iron",
    "GrayRed",
    "GrayFusion",
];

/// Region of interest reported for the IR measurement. Read-only.
pub const IR_ROI_CENTER_AREA: i64 = 0;

pub fn palette_bar(index: Option<i64>) -> &'static str {
    index
        .and_then(|i| usize::try_from(i).ok())
        .and_then(|i| PALETTE_BARS.get(i).copied())
        .unwrap_or(PALETTE_BARS[0])
}

/// Area temperatures as reported in CAM_TEMPSTATUS.
///
/// Wire layout, little endian `i16`s: locked max (°C), locked min (°C), then
/// all-area center, max and min in hundredths of a degree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct IrTempStatus {
    pub locked_max_temp: i16,
    pub locked_min_temp: i16,
    pub center_val: i16,
    pub max_val: i16,
    pub min_val: i16,
}

impl IrTempStatus {
    pub const WIRE_LEN: usize = 10;

    pub fn decode(raw: &[u8]) -> Option<Self> {
        if raw.len() < Self::WIRE_LEN {
            return None;
        }
        let word = |i: usize| i16::from_le_bytes([raw[i * 2], raw[i * 2 + 1]]);
        Some(Self {
            locked_max_temp: word(0),
            locked_min_temp: word(1),
            center_val: word(2),
            max_val: word(3),
            min_val: word(4),
        })
    }

    pub fn all_area_min_c(&self) -> f64 {
        self.min_val as f64 / 100.0
    }

    pub fn all_area_max_c(&self) -> f64 {
        self.max_val as f64 / 100.0
    }
}

impl std::fmt::Display for IrTempStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "IR Temperature Status: Locked Max: {}°C Min: {}°C All: Center: {}°C Max: {}°C Min: {}°C",
            self.locked_max_temp, self.locked_min_temp, self.center_val, self.max_val, self.min_val
        )
    }
}
