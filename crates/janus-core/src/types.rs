use serde::{Deserialize, Serialize};

/// Face embedding vector (512-dimensional for the ArcFace-MBF model).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    /// Compute cosine similarity between two embeddings.
    ///
    /// Returns a value in [-1, 1]. Higher = more similar.
    /// Always processes all dimensions; zero-norm inputs yield 0.0.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 {
            dot / denom
        } else {
            0.0
        }
    }

    /// Return an L2-normalized copy. A zero vector is returned unchanged.
    pub fn l2_normalized(&self) -> Embedding {
        let norm: f32 = self.values.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            Embedding {
                values: self.values.iter().map(|x| x / norm).collect(),
            }
        } else {
            self.clone()
        }
    }
}

/// An enrolled reference face from the gallery store.
///
/// Immutable once created; re-enrollment is delete + insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrolledFace {
    pub id: i64,
    pub name: String,
    pub embedding: Embedding,
    pub created_at: String,
}

/// Result of matching a probe embedding against the gallery.
#[derive(Debug, Clone)]
pub struct MatchResult {
    pub matched: bool,
    /// Cosine similarity of the best-scoring entry, in [-1, 1].
    pub score: f32,
    /// Gallery id of the matched entry (if any).
    pub face_id: Option<i64>,
    /// Enrolled name of the matched entry (if any).
    pub name: Option<String>,
}

impl MatchResult {
    fn unmatched(score: f32) -> Self {
        MatchResult {
            matched: false,
            score,
            face_id: None,
            name: None,
        }
    }
}

/// Strategy for comparing a probe embedding against a gallery of enrolled faces.
pub trait Matcher {
    fn best_match(&self, probe: &Embedding, gallery: &[EnrolledFace], threshold: f32)
        -> MatchResult;
}

/// Cosine similarity matcher.
///
/// Scans the full gallery every call. Ties on exactly equal best scores
/// resolve to the lowest enrolled id, independent of gallery ordering.
pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn best_match(
        &self,
        probe: &Embedding,
        gallery: &[EnrolledFace],
        threshold: f32,
    ) -> MatchResult {
        let mut best: Option<(f32, &EnrolledFace)> = None;

        for face in gallery {
            let sim = probe.similarity(&face.embedding);
            let better = match best {
                None => true,
                Some((best_sim, best_face)) => {
                    sim > best_sim || (sim == best_sim && face.id < best_face.id)
                }
            };
            if better {
                best = Some((sim, face));
            }
        }

        match best {
            Some((sim, face)) if sim >= threshold => MatchResult {
                matched: true,
                score: sim,
                face_id: Some(face.id),
                name: Some(face.name.clone()),
            },
            Some((sim, _)) => MatchResult::unmatched(sim),
            None => MatchResult::unmatched(0.0),
        }
    }
}
