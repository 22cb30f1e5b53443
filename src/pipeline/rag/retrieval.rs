use super::types::{EmbeddingModel, RetrievalTarget, RetrievedChunk, VectorSearch};
use super::RagError;

/// Chunks requested per question unless configured otherwise.
pub const DEFAULT_TOP_K: usize = 6;

/// Embed the question and run the vector search for the target corpus.
pub fn retrieve(
    target: &RetrievalTarget,
    query_text: &str,
    embedder: &dyn EmbeddingModel,
    store: &dyn VectorSearch,
    top_k: usize,
) -> Result<Vec<RetrievedChunk>, RagError> {
    let embedding = embedder.embed(query_text)?;
    if embedding.is_empty() {
        return Err(RagError::EmbeddingFailed("empty embedding vector".into()));
    }

    let chunks = match target {
        RetrievalTarget::Patient(patient_id) => {
            store.match_patient_chunks(&embedding, top_k, patient_id)?
        }
        RetrievalTarget::General => store.match_general_documents(&embedding, top_k)?,
    };

    tracing::debug!(
        target = match target {
            RetrievalTarget::Patient(_) => "patient",
            RetrievalTarget::General => "general",
        },
        hits = chunks.len(),
        "Vector search complete"
    );
    Ok(chunks)
}

/// In-memory vector search using cosine similarity.
///
/// Entries with a `patient_id` belong to that patient's records; entries
/// without one are general documents.
#[derive(Default)]
pub struct InMemoryVectorSearch {
    entries: Vec<StoredEntry>,
}

struct StoredEntry {
    id: String,
    patient_id: Option<String>,
    content: String,
    metadata: serde_json::Value,
    embedding: Vec<f32>,
}

impl InMemoryVectorSearch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_patient_chunk(
        &mut self,
        id: &str,
        patient_id: &str,
        content: &str,
        embedding: Vec<f32>,
    ) {
        self.entries.push(StoredEntry {
            id: id.to_string(),
            patient_id: Some(patient_id.to_string()),
            content: content.to_string(),
            metadata: serde_json::json!({ "doc_id": id, "patient_id": patient_id }),
            embedding,
        });
    }

    pub fn add_general_document(&mut self, id: &str, content: &str, embedding: Vec<f32>) {
        self.entries.push(StoredEntry {
            id: id.to_string(),
            patient_id: None,
            content: content.to_string(),
            metadata: serde_json::json!({ "doc_id": id }),
            embedding,
        });
    }

    fn search(
        &self,
        query_embedding: &[f32],
        match_count: usize,
        filter: impl Fn(&StoredEntry) -> bool,
    ) -> Vec<RetrievedChunk> {
        let mut scored: Vec<(f32, &StoredEntry)> = self
            .entries
            .iter()
            .filter(|e| filter(*e))
            .map(|entry| (cosine_similarity(query_embedding, &entry.embedding), entry))
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        scored
            .into_iter()
            .take(match_count)
            .map(|(score, entry)| RetrievedChunk {
                id: serde_json::Value::String(entry.id.clone()),
                content: entry.content.clone(),
                metadata: entry.metadata.clone(),
                similarity: Some(score),
            })
            .collect()
    }
}

impl VectorSearch for InMemoryVectorSearch {
    fn match_patient_chunks(
        &self,
        query_embedding: &[f32],
        match_count: usize,
        patient_id: &str,
    ) -> Result<Vec<RetrievedChunk>, RagError> {
        Ok(self.search(query_embedding, match_count, |e| {
            e.patient_id.as_deref() == Some(patient_id)
        }))
    }

    fn match_general_documents(
        &self,
        query_embedding: &[f32],
        match_count: usize,
    ) -> Result<Vec<RetrievedChunk>, RagError> {
        Ok(self.search(query_embedding, match_count, |e| e.patient_id.is_none()))
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}
