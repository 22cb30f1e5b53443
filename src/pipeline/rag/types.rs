use serde::{Deserialize, Serialize};

use super::RagError;
use crate::models::{PatientRecord, QueryMode, RouteIntent, Source};

/// One row returned by the vector search RPC.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedChunk {
    #[serde(default)]
    pub id: serde_json::Value,
    pub content: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
    #[serde(default)]
    pub similarity: Option<f32>,
}

/// Which corpus a question is answered from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetrievalTarget {
    /// Chunks filtered to one verified patient.
    Patient(String),
    /// General medical documents.
    General,
}

/// A chat turn sent to the completion endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmMessage {
    pub role: String,
    pub content: String,
}

impl LlmMessage {
    pub fn system(content: &str) -> Self {
        Self {
            role: "system".into(),
            content: content.to_string(),
        }
    }

    pub fn user(content: &str) -> Self {
        Self {
            role: "user".into(),
            content: content.to_string(),
        }
    }
}

/// Result of routing a question. Holds full records, so it is never
/// serialized directly.
#[derive(Debug, Clone)]
pub struct RouteAnalysis {
    pub intent: RouteIntent,
    pub patient_reference: Option<String>,
    pub confidence: f32,
    pub resolved_patient: Option<PatientRecord>,
    pub candidates: Vec<PatientRecord>,
}

/// A question plus the session context it was asked in.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub question: String,
    pub mode: QueryMode,
    pub locked: Option<PatientRecord>,
}

/// How an answer was produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnswerRoute {
    PatientRecords { patient_id: String },
    GeneralDocuments,
    /// Canned reply, no retrieval or generation happened.
    NoRetrieval,
}

/// Complete answer to one question.
#[derive(Debug, Clone, Serialize)]
pub struct ChatAnswer {
    pub text: String,
    pub sources: Vec<Source>,
    pub route: AnswerRoute,
    pub chunks_used: usize,
    #[serde(skip)]
    pub analysis: Option<RouteAnalysis>,
}

/// Chat completion provider.
pub trait LlmGenerate: Send + Sync {
    fn generate(&self, messages: &[LlmMessage]) -> Result<String, RagError>;

    /// Stream tokens through `token_tx`, returning the full text.
    ///
    /// Providers without streaming send the whole answer as one token.
    fn generate_streaming(
        &self,
        messages: &[LlmMessage],
        token_tx: std::sync::mpsc::Sender<String>,
    ) -> Result<String, RagError> {
        let text = self.generate(messages)?;
        let _ = token_tx.send(text.clone());
        Ok(text)
    }
}

/// Small model used to classify questions. Returns the raw JSON text.
pub trait RouterModel: Send + Sync {
    fn classify(&self, system: &str, query: &str) -> Result<String, RagError>;
}

/// Text embedding provider.
pub trait EmbeddingModel: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>, RagError>;
}

/// Vector similarity search over record chunks.
pub trait VectorSearch: Send + Sync {
    fn match_patient_chunks(
        &self,
        query_embedding: &[f32],
        match_count: usize,
        patient_id: &str,
    ) -> Result<Vec<RetrievedChunk>, RagError>;

    fn match_general_documents(
        &self,
        query_embedding: &[f32],
        match_count: usize,
    ) -> Result<Vec<RetrievedChunk>, RagError>;
}
