use serde::{Deserialize, Serialize};

/// Per-column display metadata.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    /// Display width in terminal cells. Never below 1.
    pub width: u16,
    /// Decimal digits shown for numeric values.
    pub precision: u8,
}

impl Column {
    pub const DEFAULT_WIDTH: u16 = 10;
    pub const DEFAULT_PRECISION: u8 = 2;
    pub const MIN_WIDTH: u16 = 1;
}

impl Default for Column {
    fn default() -> Self {
        Self {
            width: Self::DEFAULT_WIDTH,
            precision: Self::DEFAULT_PRECISION,
        }
    }
}
