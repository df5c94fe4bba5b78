//! A1-style cell and range addresses.
//!
//! Both backends accept the address string verbatim, but the engine needs the
//! shape of a range to validate value matrices and, on Windows, to walk the
//! cells one by one.

use std::fmt;
use std::str::FromStr;

use crate::error::{EngineError, Result};

/// Maximum number of rows in a worksheet (Excel 2007+)
pub const MAX_ROWS: u32 = 1_048_576;

/// Maximum number of columns in a worksheet (Excel 2007+)
pub const MAX_COLS: u16 = 16_384;

/// A single cell, 0-based
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellRef {
    /// Row index (0-based)
    pub row: u32,
    /// Column index (0-based, A=0)
    pub col: u16,
}

impl CellRef {
    /// Create a cell reference from 0-based indices
    pub fn new(row: u32, col: u16) -> Self {
        Self { row, col }
    }

    /// Parse `A1` / `$A$1`. `$` markers are accepted and dropped.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let cleaned: String = s.chars().filter(|c| *c != '$').collect();
        if cleaned.is_empty() {
            return Err(EngineError::invalid("empty cell address"));
        }

        let split = cleaned
            .find(|c: char| !c.is_ascii_alphabetic())
            .unwrap_or(cleaned.len());
        let (letters, digits) = cleaned.split_at(split);
        if letters.is_empty() {
            return Err(EngineError::invalid(format!("no column letters in '{s}'")));
        }
        if digits.is_empty() {
            return Err(EngineError::invalid(format!("no row number in '{s}'")));
        }

        let col = letters_to_column(letters)?;
        let row: u32 = digits
            .parse()
            .map_err(|_| EngineError::invalid(format!("invalid row number in '{s}'")))?;
        if row == 0 || row > MAX_ROWS {
            return Err(EngineError::invalid(format!(
                "row number in '{s}' must be between 1 and {MAX_ROWS}"
            )));
        }

        Ok(Self { row: row - 1, col })
    }

    /// Format as `A1`
    pub fn to_a1(&self) -> String {
        format!("{}{}", column_to_letters(self.col), self.row + 1)
    }
}

impl fmt::Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_a1())
    }
}

/// A rectangular block of cells, normalized so `start` is top-left
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RangeRef {
    /// Top-left cell
    pub start: CellRef,
    /// Bottom-right cell
    pub end: CellRef,
}

impl RangeRef {
    /// Create a range from two corners in any order
    pub fn new(a: CellRef, b: CellRef) -> Self {
        Self {
            start: CellRef::new(a.row.min(b.row), a.col.min(b.col)),
            end: CellRef::new(a.row.max(b.row), a.col.max(b.col)),
        }
    }

    /// Parse `A1`, `A1:C10` or `$A$1:$C$10`
    pub fn parse(s: &str) -> Result<Self> {
        match s.split_once(':') {
            Some((a, b)) => Ok(Self::new(CellRef::parse(a)?, CellRef::parse(b)?)),
            None => {
                let cell = CellRef::parse(s)?;
                Ok(Self::new(cell, cell))
            }
        }
    }

    /// Number of rows
    pub fn rows(&self) -> usize {
        (self.end.row - self.start.row) as usize + 1
    }

    /// Number of columns
    pub fn cols(&self) -> usize {
        (self.end.col - self.start.col) as usize + 1
    }

    /// Whether the range is a single cell
    pub fn is_single_cell(&self) -> bool {
        self.start == self.end
    }

    /// Cell at a relative offset inside the range
    pub fn cell(&self, row: usize, col: usize) -> CellRef {
        CellRef::new(self.start.row + row as u32, self.start.col + col as u16)
    }

    /// Grow (or shrink) the range from its top-left corner to `rows` x `cols`
    pub fn resized(&self, rows: usize, cols: usize) -> Result<Self> {
        if rows == 0 || cols == 0 {
            return Err(EngineError::invalid("range must have at least one cell"));
        }
        let end_row = self.start.row as u64 + rows as u64 - 1;
        let end_col = self.start.col as u64 + cols as u64 - 1;
        if end_row >= MAX_ROWS as u64 || end_col >= MAX_COLS as u64 {
            return Err(EngineError::invalid(format!(
                "{rows}x{cols} block starting at {} runs past the edge of the sheet",
                self.start
            )));
        }
        Ok(Self {
            start: self.start,
            end: CellRef::new(end_row as u32, end_col as u16),
        })
    }

    /// Format as `A1:B2` (or `A1` for a single cell)
    pub fn to_a1(&self) -> String {
        if self.is_single_cell() {
            self.start.to_a1()
        } else {
            format!("{}:{}", self.start.to_a1(), self.end.to_a1())
        }
    }
}

impl fmt::Display for RangeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_a1())
    }
}

impl FromStr for RangeRef {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Convert a column index to letters (0 = A, 25 = Z, 26 = AA)
pub fn column_to_letters(col: u16) -> String {
    let mut letters = Vec::new();
    let mut n = col as u32 + 1;
    while n > 0 {
        n -= 1;
        letters.push((n % 26) as u8 + b'A');
        n /= 26;
    }
    letters.reverse();
    String::from_utf8(letters).unwrap_or_default()
}

/// Convert column letters to an index (A = 0, Z = 25, AA = 26)
pub fn letters_to_column(letters: &str) -> Result<u16> {
    let mut col: u32 = 0;
    for c in letters.chars() {
        if !c.is_ascii_alphabetic() {
            return Err(EngineError::invalid(format!("invalid column letter '{c}'")));
        }
        col = col * 26 + (c.to_ascii_uppercase() as u32 - 'A' as u32 + 1);
        if col > MAX_COLS as u32 {
            return Err(EngineError::invalid(format!(
                "column '{letters}' is past the last column"
            )));
        }
    }
    if col == 0 {
        return Err(EngineError::invalid("empty column letters"));
    }
    Ok((col - 1) as u16)
}
