//! Embedding contract (spec §6), used to turn a summary's text into a
//! vector for later similarity search.

use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

pub trait EmbeddingClient: Send {
    fn embed(&mut self, text: &str) -> anyhow::Result<Vec<f32>>;
}

pub struct UreqEmbeddingClient {
    endpoint: String,
    api_key: String,
}

impl UreqEmbeddingClient {
    pub fn new(endpoint: String, api_key: String) -> Self {
        Self { endpoint, api_key }
    }
}

impl EmbeddingClient for UreqEmbeddingClient {
    fn embed(&mut self, text: &str) -> anyhow::Result<Vec<f32>> {
        let request = EmbedRequest { input: text };
        let mut response = ureq::post(&self.endpoint)
            .header("Authorization", &format!("Bearer {}", self.api_key))
            .send_json(&request)
            .map_err(|e| anyhow::anyhow!("embedding request failed: {e}"))?;

        let decoded: EmbedResponse = response
            .body_mut()
            .read_json()
            .map_err(|e| anyhow::anyhow!("embedding response decode failed: {e}"))?;
        Ok(decoded.embedding)
    }
}
