use std::collections::HashMap;

/// One observed (row, column, value) triple of the implicit feedback matrix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RatingEntry {
    pub row: u64,
    pub column: u64,
    pub value: f32,
}

impl RatingEntry {
    pub fn new(row: u64, column: u64, value: f32) -> Self {
        RatingEntry { row, column, value }
    }
}

impl From<(u64, u64, f32)> for RatingEntry {
    fn from((row, column, value): (u64, u64, f32)) -> Self {
        RatingEntry { row, column, value }
    }
}

/// Neighbours of one row (or column) as `(slot on the other side, value)`,
/// sorted by slot.
pub type SparseVector = Vec<(usize, f32)>;

/// The rating matrix R indexed both by row and by column.
///
/// Ids are mapped once to dense slots in order of first appearance; both
/// views are derived from the same deduplicated entries and are never
/// mutated afterwards. A repeated (row, column) pair keeps the last value.
#[derive(Debug, Clone, Default)]
pub struct SparseRatingMatrix {
    row_ids: Vec<u64>,
    row_index: HashMap<u64, usize>,
    column_ids: Vec<u64>,
    column_index: HashMap<u64, usize>,
    by_row: Vec<SparseVector>,
    by_column: Vec<SparseVector>,
    num_entries: usize,
}

impl SparseRatingMatrix {
    pub fn from_entries<I, E>(entries: I) -> Self
    where
        I: IntoIterator<Item = E>,
        E: Into<RatingEntry>,
    {
        let mut row_ids = Vec::new();
        let mut row_index: HashMap<u64, usize> = HashMap::new();
        let mut column_ids = Vec::new();
        let mut column_index: HashMap<u64, usize> = HashMap::new();
        let mut rows: Vec<HashMap<usize, f32>> = Vec::new();

        for entry in entries {
            let entry = entry.into();
            let row_slot = *row_index.entry(entry.row).or_insert_with(|| {
                row_ids.push(entry.row);
                rows.push(HashMap::new());
                row_ids.len() - 1
            });
            let column_slot = *column_index.entry(entry.column).or_insert_with(|| {
                column_ids.push(entry.column);
                column_ids.len() - 1
            });
            rows[row_slot].insert(column_slot, entry.value);
        }

        let mut by_column: Vec<SparseVector> = vec![Vec::new(); column_ids.len()];
        let mut num_entries = 0;
        let by_row: Vec<SparseVector> = rows
            .into_iter()
            .enumerate()
            .map(|(row_slot, row)| {
                let mut vector: SparseVector = row.into_iter().collect();
                vector.sort_unstable_by_key(|&(slot, _)| slot);
                for &(column_slot, value) in &vector {
                    by_column[column_slot].push((row_slot, value));
                }
                num_entries += vector.len();
                vector
            })
            .collect();

        SparseRatingMatrix {
            row_ids,
            row_index,
            column_ids,
            column_index,
            by_row,
            by_column,
            num_entries,
        }
    }

    pub fn num_rows(&self) -> usize {
        self.row_ids.len()
    }

    pub fn num_columns(&self) -> usize {
        self.column_ids.len()
    }

    pub fn num_entries(&self) -> usize {
        self.num_entries
    }

    pub fn is_empty(&self) -> bool {
        self.num_entries == 0
    }

    pub fn row_ids(&self) -> &[u64] {
        &self.row_ids
    }

    pub fn column_ids(&self) -> &[u64] {
        &self.column_ids
    }

    pub fn row_slot(&self, id: u64) -> Option<usize> {
        self.row_index.get(&id).copied()
    }

    pub fn column_slot(&self, id: u64) -> Option<usize> {
        self.column_index.get(&id).copied()
    }

    /// Neighbours of row `id`, keyed by column slot.
    pub fn row(&self, id: u64) -> Option<&[(usize, f32)]> {
        self.row_slot(id).map(|slot| self.by_row[slot].as_slice())
    }

    /// Neighbours of column `id`, keyed by row slot.
    pub fn column(&self, id: u64) -> Option<&[(usize, f32)]> {
        self.column_slot(id).map(|slot| self.by_column[slot].as_slice())
    }

    pub fn get(&self, row: u64, column: u64) -> Option<f32> {
        let column_slot = self.column_slot(column)?;
        let neighbours = self.row(row)?;
        neighbours
            .binary_search_by_key(&column_slot, |&(slot, _)| slot)
            .ok()
            .map(|i| neighbours[i].1)
    }

    /// Row-indexed view, one entry per row slot.
    pub fn rows(&self) -> &[SparseVector] {
        &self.by_row
    }

    /// Column-indexed view, one entry per column slot.
    pub fn columns(&self) -> &[SparseVector] {
        &self.by_column
    }
}
