//! Declarative grid layouts and their construction-time validation.
//!
//! A layout is a flat list of keys laid out left to right. A row closes as
//! soon as the accumulated key units equal `units_per_row`, so rows are never
//! spelled out explicitly. Spacers are keys without a label.

use serde::Deserialize;
use thiserror::Error;

/// One entry of a layout: a labeled key or an unlabeled spacer.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct KeySpec {
    /// Width in grid units.
    pub units: u32,
    /// Text drawn on the key. `None` marks a spacer.
    #[serde(default)]
    pub label: Option<String>,
    /// Key code shown by this key. Required for labeled keys, ignored for spacers.
    #[serde(default)]
    pub code: Option<u16>,
}

impl KeySpec {
    pub fn key(units: u32, label: &str, code: u16) -> Self {
        Self { units, label: Some(label.to_string()), code: Some(code) }
    }

    pub fn spacer(units: u32) -> Self {
        Self { units, label: None, code: None }
    }

    pub fn is_spacer(&self) -> bool {
        self.label.is_none()
    }
}

/// Grid description for a keyboard or mouse.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LayoutSpec {
    /// Grid columns per row.
    pub units_per_row: u32,
    /// Subdivisions of one standard key.
    pub units_per_base: u32,
    /// Pixel size of one standard key.
    pub px_per_base: u32,
    pub keys: Vec<KeySpec>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LayoutError {
    #[error("units per row must be at least 1, is {0}")]
    UnitsPerRow(u32),
    #[error("units per base must be at least 1, is {0}")]
    UnitsPerBase(u32),
    #[error("pixels per base must be at least 1, is {0}")]
    PxPerBase(u32),
    #[error("pixels per base ({px_per_base}) must be a multiple of units per base ({units_per_base}) so cells land on whole pixels")]
    UnitFraction { px_per_base: u32, units_per_base: u32 },
    #[error("pixels per base ({0}) must be divisible by 8 (font size is /2, padding is /8)")]
    PxPerBaseAlignment(u32),
    #[error("key {index}: must be 1 or more units wide, is {units}")]
    EmptyKey { index: usize, units: u32 },
    #[error("key {index}: must fit in {units_per_row} units, is {units}")]
    KeyTooWide { index: usize, units: u32, units_per_row: u32 },
    #[error("key {index}: too large for remaining space in row, wanted {units} units, {used} used, {available} available")]
    RowOverflow { index: usize, units: u32, used: u32, available: u32 },
    #[error("key {index}: code {code} is outside the key table (must be below {limit})")]
    CodeOutOfRange { index: usize, code: u16, limit: usize },
    #[error("key {index}: labeled key '{label}' has no code")]
    MissingCode { index: usize, label: String },
    #[error("expected more keys to fill the last row, {missing} units missing")]
    IncompleteRow { missing: u32 },
    #[error("layout of {units_per_row} units by {rows} rows is too large to draw")]
    TooLarge { units_per_row: u32, rows: u32 },
}

/// Exact pixel geometry derived from a validated layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metrics {
    pub px_per_unit: u32,
    pub gap: u32,
    pub padding: u32,
    pub font_size: u32,
    pub curve_radius: u32,
    pub rows: u32,
    pub width: u32,
    pub height: u32,
}

/// Pixel rectangle of one layout entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cell<'a> {
    pub index: usize,
    pub key: &'a KeySpec,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl LayoutSpec {
    /// Check every invariant and derive the pixel metrics in one pass.
    ///
    /// `code_limit` is the size of the key table the layout will be drawn
    /// from; labeled keys must have codes below it.
    pub fn validate(&self, code_limit: usize) -> Result<Metrics, LayoutError> {
        if self.units_per_row == 0 {
            return Err(LayoutError::UnitsPerRow(self.units_per_row));
        }
        if self.units_per_base == 0 {
            return Err(LayoutError::UnitsPerBase(self.units_per_base));
        }
        if self.px_per_base == 0 {
            return Err(LayoutError::PxPerBase(self.px_per_base));
        }
        if self.px_per_base % self.units_per_base != 0 {
            return Err(LayoutError::UnitFraction {
                px_per_base: self.px_per_base,
                units_per_base: self.units_per_base,
            });
        }
        if self.px_per_base % 8 != 0 {
            return Err(LayoutError::PxPerBaseAlignment(self.px_per_base));
        }

        let mut row_units = 0;
        let mut rows = 0;
        for (index, key) in self.keys.iter().enumerate() {
            let units = key.units;
            if units == 0 {
                return Err(LayoutError::EmptyKey { index, units });
            }
            if units > self.units_per_row {
                return Err(LayoutError::KeyTooWide { index, units, units_per_row: self.units_per_row });
            }
            let available = self.units_per_row - row_units;
            if units > available {
                return Err(LayoutError::RowOverflow { index, units, used: row_units, available });
            }
            if let Some(label) = &key.label {
                match key.code {
                    None => return Err(LayoutError::MissingCode { index, label: label.clone() }),
                    Some(code) if code as usize >= code_limit => {
                        return Err(LayoutError::CodeOutOfRange { index, code, limit: code_limit });
                    }
                    Some(_) => {}
                }
            }
            row_units += units;
            if row_units == self.units_per_row {
                row_units = 0;
                rows += 1;
            }
        }
        if row_units != 0 {
            return Err(LayoutError::IncompleteRow { missing: self.units_per_row - row_units });
        }

        let px_per_unit = self.px_per_base / self.units_per_base;
        let gap = px_per_unit;
        let too_large = || LayoutError::TooLarge { units_per_row: self.units_per_row, rows };
        let width = self
            .units_per_row
            .checked_mul(px_per_unit)
            .and_then(|w| w.checked_add(gap))
            .and_then(|w| w.checked_add(gap))
            .ok_or_else(too_large)?;
        let height = self
            .px_per_base
            .checked_add(gap)
            .and_then(|h| h.checked_mul(rows))
            .and_then(|h| h.checked_add(gap))
            .ok_or_else(too_large)?;
        Ok(Metrics {
            px_per_unit,
            gap,
            padding: self.px_per_base / 8,
            font_size: self.px_per_base / 2,
            curve_radius: self.px_per_base / 2,
            rows,
            width,
            height,
        })
    }

    /// Total grid units over all keys.
    pub fn total_units(&self) -> u64 {
        self.keys.iter().map(|k| k.units as u64).sum()
    }

    /// Walk the keys with the row-closing rule, yielding each pixel cell.
    ///
    /// Only meaningful for a layout that passed [`LayoutSpec::validate`].
    pub fn cells<'a>(&'a self, metrics: &Metrics) -> Cells<'a> {
        Cells {
            layout: self,
            metrics: *metrics,
            index: 0,
            x: metrics.gap,
            y: metrics.gap,
            row_units: 0,
        }
    }
}

pub struct Cells<'a> {
    layout: &'a LayoutSpec,
    metrics: Metrics,
    index: usize,
    x: u32,
    y: u32,
    row_units: u32,
}

impl<'a> Iterator for Cells<'a> {
    type Item = Cell<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let key = self.layout.keys.get(self.index)?;
        let cell = Cell {
            index: self.index,
            key,
            x: self.x,
            y: self.y,
            width: key.units * self.metrics.px_per_unit,
            height: self.layout.px_per_base,
        };

        self.index += 1;
        if self.row_units + key.units >= self.layout.units_per_row {
            self.x = self.metrics.gap;
            self.y += self.layout.px_per_base + self.metrics.gap;
            self.row_units = 0;
        } else {
            self.x += cell.width;
            self.row_units += key.units;
        }
        Some(cell)
    }
}
