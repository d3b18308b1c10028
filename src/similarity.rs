use std::{collections::BTreeMap, fs, path::Path};

use anyhow::{Context, anyhow};
use ndarray::{Array1, ArrayView1};
use serde::Deserialize;

use crate::error::DetectionError;

const MIN_NORM: f32 = 1e-6;

/// An enrolled person: a name and one or more reference embeddings.
#[derive(Clone, Debug, PartialEq)]
pub struct EnrolledIdentity {
    name: String,
    references: Vec<Array1<f32>>,
}

impl EnrolledIdentity {
    /// References are L2-normalized on construction; zero vectors are dropped.
    pub fn new(name: impl Into<String>, references: Vec<Vec<f32>>) -> Self {
        let references = references
            .into_iter()
            .filter_map(|reference| l2_normalize(ArrayView1::from(&reference[..])))
            .collect();
        Self {
            name: name.into(),
            references,
        }
    }

    /// Identity known only by name, for pipelines that deliver pre-scored detections.
    pub fn named(name: impl Into<String>) -> Self {
        Self::new(name, Vec::new())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn references(&self) -> &[Array1<f32>] {
        &self.references
    }
}

/// Compares a face embedding against an identity's references.
pub trait SimilarityScorer: Send {
    fn score(&self, identity: &EnrolledIdentity, embedding: &[f32]) -> Result<f32, DetectionError>;
}

/// Cosine similarity over L2-normalized vectors, best match across references.
#[derive(Clone, Copy, Debug, Default)]
pub struct CosineScorer;

impl SimilarityScorer for CosineScorer {
    fn score(&self, identity: &EnrolledIdentity, embedding: &[f32]) -> Result<f32, DetectionError> {
        let Some(probe) = l2_normalize(ArrayView1::from(embedding)) else {
            return Err(DetectionError::ZeroNorm);
        };

        let mut best: Option<f32> = None;
        for reference in identity.references() {
            if reference.len() != probe.len() {
                return Err(DetectionError::EmbeddingDimension {
                    expected: reference.len(),
                    got: probe.len(),
                });
            }
            let similarity = reference.dot(&probe).clamp(-1.0, 1.0);
            best = Some(best.map_or(similarity, |b| b.max(similarity)));
        }

        // No references means nothing can match.
        Ok(best.unwrap_or(-1.0))
    }
}

pub fn l2_normalize(v: ArrayView1<f32>) -> Option<Array1<f32>> {
    if v.iter().any(|x| !x.is_finite()) {
        return None;
    }
    let norm = v.dot(&v).sqrt();
    if norm < MIN_NORM {
        None
    } else {
        Some(v.mapv(|x| x / norm))
    }
}

#[derive(Deserialize)]
struct GalleryFile {
    identities: BTreeMap<String, Vec<Vec<f32>>>,
}

/// Enrollment database: identities by name, in name order.
#[derive(Clone, Debug, Default)]
pub struct Gallery {
    identities: BTreeMap<String, EnrolledIdentity>,
}

impl Gallery {
    /// Loads `{"identities": {"name": [[...], ...]}}`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read gallery from {}", path.display()))?;
        let file: GalleryFile = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse gallery {}", path.display()))?;

        let identities = file
            .identities
            .into_iter()
            .map(|(name, references)| {
                let identity = EnrolledIdentity::new(name.clone(), references);
                if identity.references().is_empty() {
                    log::warn!("identity '{name}' has no usable reference embeddings");
                }
                (name, identity)
            })
            .collect();

        Ok(Self { identities })
    }

    pub fn get(&self, name: &str) -> anyhow::Result<EnrolledIdentity> {
        self.identities.get(name).cloned().ok_or_else(|| {
            anyhow!(
                "'{name}' not found in gallery (available: {})",
                self.names().join(", ")
            )
        })
    }

    pub fn names(&self) -> Vec<&str> {
        self.identities.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_direction_scores_one() {
        let identity = EnrolledIdentity::new("alice", vec![vec![1.0, 2.0, 2.0]]);
        let score = CosineScorer.score(&identity, &[2.0, 4.0, 4.0]).unwrap();
        assert!((score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn opposite_direction_scores_minus_one() {
        let identity = EnrolledIdentity::new("alice", vec![vec![1.0, 0.0]]);
        let score = CosineScorer.score(&identity, &[-3.0, 0.0]).unwrap();
        assert!((score + 1.0).abs() < 1e-6);
    }

    #[test]
    fn best_reference_wins() {
        let identity = EnrolledIdentity::new("alice", vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
        let score = CosineScorer.score(&identity, &[0.1, 1.0]).unwrap();
        assert!(score > 0.99);
    }

    #[test]
    fn dimension_mismatch_is_reported() {
        let identity = EnrolledIdentity::new("alice", vec![vec![1.0, 0.0, 0.0]]);
        assert_eq!(
            CosineScorer.score(&identity, &[1.0, 0.0]),
            Err(DetectionError::EmbeddingDimension {
                expected: 3,
                got: 2
            })
        );
    }

    #[test]
    fn zero_embedding_is_rejected() {
        let identity = EnrolledIdentity::new("alice", vec![vec![1.0, 0.0]]);
        assert_eq!(
            CosineScorer.score(&identity, &[0.0, 0.0]),
            Err(DetectionError::ZeroNorm)
        );
    }

    #[test]
    fn zero_references_are_dropped() {
        let identity = EnrolledIdentity::new("bob", vec![vec![0.0, 0.0], vec![1.0, 1.0]]);
        assert_eq!(identity.references().len(), 1);
    }

    #[test]
    fn gallery_loads_and_reports_unknown_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gallery.json");
        fs::write(
            &path,
            r#"{"identities": {"bob": [[0.0, 1.0]], "alice": [[1.0, 0.0]]}}"#,
        )
        .unwrap();

        let gallery = Gallery::load(&path).unwrap();
        assert_eq!(gallery.names(), vec!["alice", "bob"]);
        assert_eq!(gallery.get("alice").unwrap().name(), "alice");
        let err = gallery.get("carol").unwrap_err().to_string();
        assert!(err.contains("alice, bob"));
    }
}
