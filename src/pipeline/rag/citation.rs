use super::types::RetrievedChunk;
use crate::models::Source;

/// Metadata keys tried, in order, for a source's display label.
const LABEL_KEYS: [&str; 3] = ["doc_id", "document_id", "source"];

/// Build citations from retrieved chunks, in retrieval order.
pub fn sources_from_chunks(chunks: &[RetrievedChunk]) -> Vec<Source> {
    chunks
        .iter()
        .enumerate()
        .map(|(idx, chunk)| Source {
            label: source_label(chunk, idx),
            similarity: chunk.similarity,
            metadata: chunk.metadata.clone(),
        })
        .collect()
}

/// `doc_id` from metadata, else the chunk id, else the position.
fn source_label(chunk: &RetrievedChunk, idx: usize) -> String {
    for key in LABEL_KEYS {
        if let Some(label) = chunk.metadata.get(key).and_then(value_to_label) {
            return label;
        }
    }
    value_to_label(&chunk.id).unwrap_or_else(|| format!("chunk {}", idx + 1))
}

fn value_to_label(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chunk(id: serde_json::Value, metadata: serde_json::Value, sim: f32) -> RetrievedChunk {
        RetrievedChunk {
            id,
            content: "text".into(),
            metadata,
            similarity: Some(sim),
        }
    }

    #[test]
    fn sources_keep_retrieval_order_and_similarity() {
        let sources = sources_from_chunks(&[
            chunk(json!(1), json!({"doc_id": "lab-2024-01"}), 0.91),
            chunk(json!(2), json!({"doc_id": "note-7"}), 0.85),
        ]);
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].label, "lab-2024-01");
        assert_eq!(sources[1].label, "note-7");
        assert_eq!(sources[0].similarity, Some(0.91));
    }

    #[test]
    fn label_falls_back_to_chunk_id() {
        let sources = sources_from_chunks(&[chunk(json!(42), json!({"page": 3}), 0.5)]);
        assert_eq!(sources[0].label, "42");
        assert_eq!(sources[0].metadata["page"], 3);
    }

    #[test]
    fn label_falls_back_to_position() {
        let sources =
            sources_from_chunks(&[chunk(serde_json::Value::Null, serde_json::Value::Null, 0.5)]);
        assert_eq!(sources[0].label, "chunk 1");
    }

    #[test]
    fn no_chunks_no_sources() {
        assert!(sources_from_chunks(&[]).is_empty());
    }
}
