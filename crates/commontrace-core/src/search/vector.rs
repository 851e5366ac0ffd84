//! HNSW vector index over trace embeddings.
//!
//! Wraps a USearch index with cosine distance. Keys are trace UUIDs,
//! mapped to dense u64 ids internally. The search expansion factor
//! (ef_search) is applied per query, mirroring a per-transaction index
//! tune rather than a global setting.

use std::collections::HashMap;

use usearch::{Index, IndexOptions, MetricKind, ScalarKind};
use uuid::Uuid;

/// HNSW connectivity parameter (graph degree)
pub const HNSW_CONNECTIVITY: usize = 16;

/// HNSW expansion factor while building the index
pub const HNSW_EXPANSION_ADD: usize = 64;

/// HNSW expansion factor applied to each search
pub const HNSW_EXPANSION_SEARCH: usize = 64;

/// Vector index error types
#[non_exhaustive]
#[derive(Debug, Clone, thiserror::Error)]
pub enum VectorIndexError {
    #[error("index creation failed: {0}")]
    Creation(String),
    #[error("failed to add vector: {0}")]
    Add(String),
    #[error("search failed: {0}")]
    Search(String),
    #[error("invalid dimensions: expected {expected}, got {got}")]
    InvalidDimensions { expected: usize, got: usize },
}

/// A neighbor returned by the index: trace id plus cosine distance
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub id: Uuid,
    pub distance: f64,
}

/// In-memory HNSW index keyed by trace UUID
pub struct VectorIndex {
    index: Index,
    dimensions: usize,
    key_to_id: HashMap<Uuid, u64>,
    id_to_key: HashMap<u64, Uuid>,
    next_id: u64,
}

impl VectorIndex {
    /// Create an empty index for the given dimensionality
    pub fn new(dimensions: usize) -> Result<Self, VectorIndexError> {
        let options = IndexOptions {
            dimensions,
            metric: MetricKind::Cos,
            quantization: ScalarKind::F32,
            connectivity: HNSW_CONNECTIVITY,
            expansion_add: HNSW_EXPANSION_ADD,
            expansion_search: HNSW_EXPANSION_SEARCH,
            multi: false,
        };

        let index =
            Index::new(&options).map_err(|e| VectorIndexError::Creation(e.to_string()))?;

        Ok(Self {
            index,
            dimensions,
            key_to_id: HashMap::new(),
            id_to_key: HashMap::new(),
            next_id: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.index.size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.key_to_id.contains_key(&id)
    }

    /// Insert or replace the vector for a trace
    pub fn add(&mut self, id: Uuid, vector: &[f32]) -> Result<(), VectorIndexError> {
        if vector.len() != self.dimensions {
            return Err(VectorIndexError::InvalidDimensions {
                expected: self.dimensions,
                got: vector.len(),
            });
        }

        if let Some(&existing) = self.key_to_id.get(&id) {
            self.index
                .remove(existing)
                .map_err(|e| VectorIndexError::Add(e.to_string()))?;
            self.reserve_for(self.index.size() + 1)?;
            self.index
                .add(existing, vector)
                .map_err(|e| VectorIndexError::Add(e.to_string()))?;
            return Ok(());
        }

        // usearch requires reserved capacity ahead of add()
        if self.index.size() >= self.index.capacity() {
            let new_capacity = std::cmp::max(self.index.capacity() * 2, 16);
            self.reserve_for(new_capacity)?;
        }

        let dense_id = self.next_id;
        self.next_id += 1;

        self.index
            .add(dense_id, vector)
            .map_err(|e| VectorIndexError::Add(e.to_string()))?;
        self.key_to_id.insert(id, dense_id);
        self.id_to_key.insert(dense_id, id);
        Ok(())
    }

    /// Remove a trace's vector; returns whether it was present
    pub fn remove(&mut self, id: Uuid) -> Result<bool, VectorIndexError> {
        match self.key_to_id.remove(&id) {
            Some(dense_id) => {
                self.id_to_key.remove(&dense_id);
                self.index
                    .remove(dense_id)
                    .map_err(|e| VectorIndexError::Add(e.to_string()))?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Nearest-neighbor search with an explicit expansion factor for this
    /// query only.
    pub fn search_with_ef(
        &self,
        query: &[f32],
        limit: usize,
        ef_search: usize,
    ) -> Result<Vec<Neighbor>, VectorIndexError> {
        if query.len() != self.dimensions {
            return Err(VectorIndexError::InvalidDimensions {
                expected: self.dimensions,
                got: query.len(),
            });
        }
        if self.is_empty() {
            return Ok(vec![]);
        }

        self.index.change_expansion_search(ef_search);

        let matches = self
            .index
            .search(query, limit)
            .map_err(|e| VectorIndexError::Search(e.to_string()))?;

        let mut neighbors = Vec::with_capacity(matches.keys.len());
        for (dense_id, distance) in matches.keys.iter().zip(matches.distances.iter()) {
            if let Some(&id) = self.id_to_key.get(dense_id) {
                neighbors.push(Neighbor {
                    id,
                    distance: *distance as f64,
                });
            }
        }
        Ok(neighbors)
    }

    /// Nearest-neighbor search with the default expansion factor
    pub fn search(&self, query: &[f32], limit: usize) -> Result<Vec<Neighbor>, VectorIndexError> {
        self.search_with_ef(query, limit, HNSW_EXPANSION_SEARCH)
    }

    /// Neighbors of `id` within a cosine-distance threshold, excluding
    /// `id` itself. Used by convergence detection.
    pub fn neighbors_within(
        &self,
        id: Uuid,
        vector: &[f32],
        limit: usize,
        max_distance: f64,
    ) -> Result<Vec<Neighbor>, VectorIndexError> {
        // Over-fetch one slot since the query vector matches itself
        let hits = self.search(vector, limit + 1)?;
        Ok(hits
            .into_iter()
            .filter(|n| n.id != id && n.distance < max_distance)
            .take(limit)
            .collect())
    }

    fn reserve_for(&self, capacity: usize) -> Result<(), VectorIndexError> {
        self.index
            .reserve(capacity)
            .map_err(|e| VectorIndexError::Creation(format!("reserve: {}", e)))
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const DIMS: usize = 8;

    fn test_vector(seed: f32) -> Vec<f32> {
        (0..DIMS).map(|i| ((i as f32 + seed) / DIMS as f32).sin()).collect()
    }

    #[test]
    fn test_add_and_search() {
        let mut index = VectorIndex::new(DIMS).unwrap();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        index.add(a, &test_vector(1.0)).unwrap();
        index.add(b, &test_vector(50.0)).unwrap();
        assert_eq!(index.len(), 2);
        assert!(index.contains(a));

        let hits = index.search(&test_vector(1.0), 2).unwrap();
        assert_eq!(hits[0].id, a);
        assert!(hits[0].distance < hits[1].distance);
    }

    #[test]
    fn test_update_replaces_vector() {
        let mut index = VectorIndex::new(DIMS).unwrap();
        let a = Uuid::new_v4();

        index.add(a, &test_vector(1.0)).unwrap();
        index.add(a, &test_vector(2.0)).unwrap();
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_remove() {
        let mut index = VectorIndex::new(DIMS).unwrap();
        let a = Uuid::new_v4();
        index.add(a, &test_vector(1.0)).unwrap();

        assert!(index.remove(a).unwrap());
        assert!(!index.remove(a).unwrap());
        assert!(!index.contains(a));
    }

    #[test]
    fn test_dimension_mismatch() {
        let mut index = VectorIndex::new(DIMS).unwrap();
        let err = index.add(Uuid::new_v4(), &[1.0, 2.0]);
        assert!(matches!(
            err,
            Err(VectorIndexError::InvalidDimensions { .. })
        ));
    }

    #[test]
    fn test_empty_index_search() {
        let index = VectorIndex::new(DIMS).unwrap();
        assert!(index.search(&test_vector(1.0), 5).unwrap().is_empty());
    }

    #[test]
    fn test_neighbors_within_excludes_self() {
        let mut index = VectorIndex::new(DIMS).unwrap();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let v = test_vector(1.0);

        index.add(a, &v).unwrap();
        index.add(b, &v).unwrap();

        let neighbors = index.neighbors_within(a, &v, 10, 0.15).unwrap();
        assert_eq!(neighbors.len(), 1);
        assert_eq!(neighbors[0].id, b);
    }
}
