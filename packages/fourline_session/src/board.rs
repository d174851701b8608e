//! Square game grid and its cell marks.
//!
//! Wire form: a board is a JSON array of rows, each row an array of mark
//! codes (`0` empty, `1` first player, `2` second player).

use std::fmt;

use serde::{Deserialize, Serialize};

/// Grid dimension used when nothing else is configured.
pub const DEFAULT_BOARD_SIZE: usize = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Mark {
    #[default]
    Empty,
    First,
    Second,
}

impl Mark {
    pub fn code(self) -> u8 {
        match self {
            Self::Empty => 0,
            Self::First => 1,
            Self::Second => 2,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Empty),
            1 => Some(Self::First),
            2 => Some(Self::Second),
            _ => None,
        }
    }

    pub fn symbol(self) -> char {
        match self {
            Self::Empty => '.',
            Self::First => 'X',
            Self::Second => 'O',
        }
    }
}

impl From<Mark> for u8 {
    fn from(mark: Mark) -> Self {
        mark.code()
    }
}

impl TryFrom<u8> for Mark {
    type Error = BoardError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Mark::from_code(code).ok_or(BoardError::UnknownMark(code))
    }
}

impl fmt::Display for Mark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BoardError {
    #[error("unknown mark code: {0}")]
    UnknownMark(u8),

    #[error("row {row} has {actual} cells, expected {expected}")]
    RowLength {
        row: usize,
        expected: usize,
        actual: usize,
    },

    #[error("board is {actual}x{actual}, expected {expected}x{expected}")]
    Dimension { expected: usize, actual: usize },

    #[error("cell ({row}, {col}) is outside a {size}x{size} board")]
    OutOfBounds { row: usize, col: usize, size: usize },
}

/// Row-major square grid. The dimension is fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Vec<Mark>>", into = "Vec<Vec<Mark>>")]
pub struct Board {
    size: usize,
    cells: Vec<Mark>,
}

impl Board {
    /// An all-empty `size`x`size` board.
    pub fn new(size: usize) -> Self {
        Self {
            size,
            cells: vec![Mark::Empty; size * size],
        }
    }

    /// Build a board from rows, requiring exactly `expected` rows of
    /// `expected` cells each.
    pub fn from_rows(rows: Vec<Vec<Mark>>, expected: usize) -> Result<Self, BoardError> {
        if rows.len() != expected {
            return Err(BoardError::Dimension {
                expected,
                actual: rows.len(),
            });
        }
        let mut cells = Vec::with_capacity(expected * expected);
        for (row, marks) in rows.into_iter().enumerate() {
            if marks.len() != expected {
                return Err(BoardError::RowLength {
                    row,
                    expected,
                    actual: marks.len(),
                });
            }
            cells.extend(marks);
        }
        Ok(Self {
            size: expected,
            cells,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn get(&self, row: usize, col: usize) -> Option<Mark> {
        if row >= self.size || col >= self.size {
            return None;
        }
        self.cells.get(row * self.size + col).copied()
    }

    pub fn set(&mut self, row: usize, col: usize, mark: Mark) -> Result<(), BoardError> {
        if row >= self.size || col >= self.size {
            return Err(BoardError::OutOfBounds {
                row,
                col,
                size: self.size,
            });
        }
        self.cells[row * self.size + col] = mark;
        Ok(())
    }

    pub fn rows(&self) -> impl Iterator<Item = &[Mark]> {
        // chunks(0) panics; an empty board simply has no rows
        self.cells.chunks(self.size.max(1))
    }

    pub fn to_rows(&self) -> Vec<Vec<Mark>> {
        self.rows().map(<[Mark]>::to_vec).collect()
    }

    pub fn count(&self, mark: Mark) -> usize {
        self.cells.iter().filter(|&&m| m == mark).count()
    }

    /// True when no cell holds a mark.
    pub fn is_clear(&self) -> bool {
        self.cells.iter().all(|&m| m == Mark::Empty)
    }

    /// True when every cell holds a mark.
    pub fn is_full(&self) -> bool {
        self.cells.iter().all(|&m| m != Mark::Empty)
    }
}

impl Default for Board {
    fn default() -> Self {
        Self::new(DEFAULT_BOARD_SIZE)
    }
}

impl TryFrom<Vec<Vec<Mark>>> for Board {
    type Error = BoardError;

    fn try_from(rows: Vec<Vec<Mark>>) -> Result<Self, Self::Error> {
        let expected = rows.len();
        Board::from_rows(rows, expected)
    }
}

impl From<Board> for Vec<Vec<Mark>> {
    fn from(board: Board) -> Self {
        board.to_rows()
    }
}

impl fmt::Display for Board {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, row) in self.rows().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            let line: Vec<String> = row.iter().map(|m| m.symbol().to_string()).collect();
            write!(f, "{}", line.join(" "))?;
        }
        Ok(())
    }
}
