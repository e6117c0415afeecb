use ndarray::{Array2, ArrayView1, ArrayView2, ArrayViewMut2, Axis};
use std::collections::HashMap;

/// Dense latent vectors for a set of ids.
///
/// Vectors live in one `ids.len() x features` arena; the id -> slot table is
/// fixed at construction so a solve phase can hand out disjoint row chunks.
#[derive(Debug, Clone, PartialEq)]
pub struct FactorMatrix {
    ids: Vec<u64>,
    index: HashMap<u64, usize>,
    values: Array2<f32>,
}

impl FactorMatrix {
    /// All-zero vectors for `ids`, slot `i` belonging to `ids[i]`.
    pub fn zeros(ids: &[u64], features: usize) -> Self {
        Self::from_parts(ids.to_vec(), Array2::zeros((ids.len(), features)))
    }

    pub(crate) fn from_parts(ids: Vec<u64>, values: Array2<f32>) -> Self {
        debug_assert_eq!(ids.len(), values.nrows());
        let index = ids.iter().enumerate().map(|(slot, &id)| (id, slot)).collect();
        FactorMatrix { ids, index, values }
    }

    /// Builds a matrix from `(id, vector)` pairs. Returns `None` when the
    /// vectors disagree on length; a later duplicate id replaces the earlier one.
    pub fn from_vectors<I>(vectors: I) -> Option<Self>
    where
        I: IntoIterator<Item = (u64, Vec<f32>)>,
    {
        let mut ids = Vec::new();
        let mut index: HashMap<u64, usize> = HashMap::new();
        let mut rows: Vec<Vec<f32>> = Vec::new();
        for (id, vector) in vectors {
            if let Some(first) = rows.first() {
                if first.len() != vector.len() {
                    return None;
                }
            }
            match index.get(&id) {
                Some(&slot) => rows[slot] = vector,
                None => {
                    index.insert(id, ids.len());
                    ids.push(id);
                    rows.push(vector);
                }
            }
        }
        let features = rows.first().map_or(0, |r| r.len());
        let flat: Vec<f32> = rows.into_iter().flatten().collect();
        let values = Array2::from_shape_vec((ids.len(), features), flat).ok()?;
        Some(FactorMatrix { ids, index, values })
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn features(&self) -> usize {
        self.values.ncols()
    }

    pub fn ids(&self) -> &[u64] {
        &self.ids
    }

    pub fn slot(&self, id: u64) -> Option<usize> {
        self.index.get(&id).copied()
    }

    pub fn get(&self, id: u64) -> Option<ArrayView1<'_, f32>> {
        self.slot(id).map(|slot| self.values.row(slot))
    }

    pub fn values(&self) -> ArrayView2<'_, f32> {
        self.values.view()
    }

    pub(crate) fn values_mut(&mut self) -> ArrayViewMut2<'_, f32> {
        self.values.view_mut()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, ArrayView1<'_, f32>)> + '_ {
        self.ids
            .iter()
            .copied()
            .zip(self.values.axis_iter(Axis(0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zeros_layout() {
        let m = FactorMatrix::zeros(&[7, 3, 9], 4);
        assert_eq!(m.len(), 3);
        assert_eq!(m.features(), 4);
        assert_eq!(m.slot(9), Some(2));
        assert!(m.get(7).unwrap().iter().all(|&v| v == 0.0));
        assert!(m.get(8).is_none());
    }

    #[test]
    fn test_from_vectors() {
        let m = FactorMatrix::from_vectors(vec![
            (1, vec![1.0, 2.0]),
            (2, vec![3.0, 4.0]),
            (1, vec![5.0, 6.0]),
        ])
        .unwrap();
        assert_eq!(m.ids(), &[1, 2]);
        assert_eq!(m.get(1).unwrap().to_vec(), vec![5.0, 6.0]);

        let ragged = FactorMatrix::from_vectors(vec![(1, vec![1.0]), (2, vec![1.0, 2.0])]);
        assert!(ragged.is_none());
    }
}
