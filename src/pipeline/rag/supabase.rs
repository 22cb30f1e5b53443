//! Supabase PostgREST client: vector search RPCs and the roster source.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::types::{RetrievedChunk, VectorSearch};
use super::RagError;
use crate::identity::{IdentityError, RosterSource};

const SERVICE: &str = "supabase";

pub const PATIENT_CHUNKS_RPC: &str = "match_patient_chunks_arr";
pub const GENERAL_DOCUMENTS_RPC: &str = "match_general_documents";

pub struct SupabaseClient {
    base_url: String,
    api_key: String,
    client: reqwest::blocking::Client,
    timeout_secs: u64,
}

#[derive(Serialize)]
struct PatientChunksParams<'a> {
    query_embedding: &'a [f32],
    match_count: usize,
    p_patient_id: &'a str,
}

#[derive(Serialize)]
struct GeneralDocumentsParams<'a> {
    query_embedding: &'a [f32],
    match_count: usize,
}

#[derive(Deserialize)]
struct MetadataRow {
    #[serde(default)]
    metadata: Value,
}

impl SupabaseClient {
    pub fn new(base_url: &str, api_key: &str, timeout_secs: u64) -> Result<Self, RagError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| RagError::HttpClient(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            client,
            timeout_secs,
        })
    }

    fn rpc_url(&self, function: &str) -> String {
        format!("{}/rest/v1/rpc/{}", self.base_url, function)
    }

    fn roster_url(&self, limit: usize) -> String {
        format!(
            "{}/rest/v1/rag_chunks?select=metadata&limit={}",
            self.base_url, limit
        )
    }

    fn send(
        &self,
        request: reqwest::blocking::RequestBuilder,
    ) -> Result<reqwest::blocking::Response, RagError> {
        let response = request
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .send()
            .map_err(|e| RagError::from_send(SERVICE, self.timeout_secs, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            tracing::warn!(status = status.as_u16(), "Supabase request failed");
            return Err(RagError::from_status(SERVICE, status.as_u16(), body));
        }
        Ok(response)
    }

    /// Call a PostgREST function returning chunk rows.
    fn rpc<P: Serialize>(
        &self,
        function: &str,
        params: &P,
    ) -> Result<Vec<RetrievedChunk>, RagError> {
        let rows: Vec<RetrievedChunk> = self
            .send(self.client.post(self.rpc_url(function)).json(params))?
            .json()
            .map_err(|e| RagError::ResponseParsing(e.to_string()))?;
        tracing::debug!(function, rows = rows.len(), "Supabase RPC complete");
        Ok(rows)
    }

    /// Fetch the `metadata` column of up to `limit` chunk rows.
    pub fn fetch_chunk_metadata(&self, limit: usize) -> Result<Vec<Value>, RagError> {
        let rows: Vec<MetadataRow> = self
            .send(self.client.get(self.roster_url(limit)))?
            .json()
            .map_err(|e| RagError::ResponseParsing(e.to_string()))?;
        Ok(rows.into_iter().map(|r| r.metadata).collect())
    }
}

impl VectorSearch for SupabaseClient {
    fn match_patient_chunks(
        &self,
        query_embedding: &[f32],
        match_count: usize,
        patient_id: &str,
    ) -> Result<Vec<RetrievedChunk>, RagError> {
        self.rpc(
            PATIENT_CHUNKS_RPC,
            &PatientChunksParams {
                query_embedding,
                match_count,
                p_patient_id: patient_id,
            },
        )
    }

    fn match_general_documents(
        &self,
        query_embedding: &[f32],
        match_count: usize,
    ) -> Result<Vec<RetrievedChunk>, RagError> {
        self.rpc(
            GENERAL_DOCUMENTS_RPC,
            &GeneralDocumentsParams {
                query_embedding,
                match_count,
            },
        )
    }
}

impl RosterSource for SupabaseClient {
    fn fetch_metadata(&self, limit: usize) -> Result<Vec<Value>, IdentityError> {
        self.fetch_chunk_metadata(limit)
            .map_err(|e| IdentityError::RosterSource(e.to_string()))
    }
}
