//! StrKV: newline-separated rows of `|`-separated byte cells.
//!
//! There is no escaping, so a cell can never contain `|` or `\n`.
//! The first cell of a row is its key. When two rows share a key, lookups
//! by key resolve to the row written last.

use std::collections::HashMap;

use bytes::{Bytes, BytesMut};

const ROW_SEP: u8 = b'\n';
const CELL_SEP: u8 = b'|';

/// Two-dimensional table of byte strings.
#[derive(Debug, Clone, Default)]
pub struct StrKv {
    rows: Vec<Vec<Bytes>>,
    index: HashMap<Bytes, usize>,
    trailing_newline: bool,
}

impl PartialEq for StrKv {
    fn eq(&self, other: &Self) -> bool {
        self.rows == other.rows && self.trailing_newline == other.trailing_newline
    }
}

impl Eq for StrKv {}

fn cells<I, T>(values: I) -> Vec<Bytes>
where
    I: IntoIterator<Item = T>,
    T: AsRef<[u8]>,
{
    values
        .into_iter()
        .map(|v| Bytes::copy_from_slice(v.as_ref()))
        .collect()
}

impl StrKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a table. Never fails: any byte string is a valid table.
    ///
    /// Trailing newlines are stripped and remembered; empty lines are skipped.
    pub fn decode(data: &[u8]) -> Self {
        let mut table = Self::new();
        if data.is_empty() {
            return table;
        }
        let mut end = data.len();
        while end > 0 && data[end - 1] == ROW_SEP {
            end -= 1;
        }
        table.trailing_newline = end != data.len();
        for line in data[..end].split(|b| *b == ROW_SEP) {
            if line.is_empty() {
                continue;
            }
            table.rows.push(cells(line.split(|b| *b == CELL_SEP)));
        }
        table.rebuild_index();
        table
    }

    pub fn encode(&self) -> Bytes {
        let mut out = BytesMut::new();
        for (i, row) in self.rows.iter().enumerate() {
            if i > 0 {
                out.extend_from_slice(&[ROW_SEP]);
            }
            for (j, cell) in row.iter().enumerate() {
                if j > 0 {
                    out.extend_from_slice(&[CELL_SEP]);
                }
                out.extend_from_slice(cell);
            }
        }
        if self.trailing_newline {
            out.extend_from_slice(&[ROW_SEP]);
        }
        out.freeze()
    }

    pub fn trailing_newline(&self) -> bool {
        self.trailing_newline
    }

    pub fn set_trailing_newline(&mut self, on: bool) {
        self.trailing_newline = on;
    }

    pub fn with_trailing_newline(mut self, on: bool) -> Self {
        self.trailing_newline = on;
        self
    }

    fn rebuild_index(&mut self) {
        self.index.clear();
        for (i, row) in self.rows.iter().enumerate() {
            if let Some(key) = row.first() {
                self.index.insert(key.clone(), i);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[Vec<Bytes>] {
        &self.rows
    }

    pub fn row(&self, index: usize) -> Option<&[Bytes]> {
        self.rows.get(index).map(Vec::as_slice)
    }

    /// Row index for `key` (last written row wins).
    pub fn position(&self, key: &[u8]) -> Option<usize> {
        self.index.get(key).copied()
    }

    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.index.contains_key(key)
    }

    /// Append a row verbatim. Duplicate keys are allowed and shadow older rows.
    pub fn append<I, T>(&mut self, row: I) -> &mut Self
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        let row = cells(row);
        if let Some(key) = row.first() {
            self.index.insert(key.clone(), self.rows.len());
        }
        self.rows.push(row);
        self
    }

    /// Replace the row keyed by `key` with `key|values...`, or append it.
    pub fn set<I, T>(&mut self, key: &[u8], values: I) -> &mut Self
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        let mut row = vec![Bytes::copy_from_slice(key)];
        row.extend(cells(values));
        match self.position(key).and_then(|i| self.rows.get_mut(i)) {
            Some(slot) => *slot = row,
            None => {
                self.index.insert(row[0].clone(), self.rows.len());
                self.rows.push(row);
            }
        }
        self
    }

    /// Values of the row keyed by `key`, without the key cell.
    pub fn get(&self, key: &[u8]) -> Option<&[Bytes]> {
        let row = self.rows.get(self.position(key)?)?;
        Some(row.get(1..).unwrap_or(&[]))
    }

    /// Cell `col` of the row keyed by `key`; column 0 is the key itself.
    pub fn cell(&self, key: &[u8], col: usize) -> Option<&Bytes> {
        self.rows.get(self.position(key)?)?.get(col)
    }

    /// Set a cell by row index, padding the row (and the table) with empty
    /// cells as needed.
    pub fn set_cell(&mut self, row: usize, col: usize, value: &[u8]) {
        while self.rows.len() <= row {
            self.rows.push(Vec::new());
        }
        let line = &mut self.rows[row];
        while line.len() <= col {
            line.push(Bytes::new());
        }
        line[col] = Bytes::copy_from_slice(value);
        if col == 0 {
            self.rebuild_index();
        }
    }

    /// First `(row, col)` whose cell equals `value`, scanning rows in order.
    pub fn find(&self, value: &[u8]) -> Option<(usize, usize)> {
        self.rows.iter().enumerate().find_map(|(r, row)| {
            row.iter()
                .position(|c| c.as_ref() == value)
                .map(|c| (r, c))
        })
    }

    /// Cell at `offset` columns from the first cell equal to `value`.
    pub fn relative(&self, value: &[u8], offset: isize) -> Option<&Bytes> {
        let (r, c) = self.find(value)?;
        let col = c.checked_add_signed(offset)?;
        self.rows.get(r)?.get(col)
    }

    /// Remove the row keyed by `key` and return its cells.
    pub fn remove(&mut self, key: &[u8]) -> Option<Vec<Bytes>> {
        let i = self.position(key)?;
        let row = self.rows.remove(i);
        self.rebuild_index();
        Some(row)
    }
}

impl<R, T> FromIterator<R> for StrKv
where
    R: IntoIterator<Item = T>,
    T: AsRef<[u8]>,
{
    fn from_iter<I: IntoIterator<Item = R>>(iter: I) -> Self {
        let mut table = Self::new();
        for row in iter {
            table.append(row);
        }
        table
    }
}
