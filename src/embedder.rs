//! Embedding generation through an HTTP embedding service
//!
//! The service speaks the Ollama `/api/embed` protocol: one model name
//! and one input text in, a list of vectors out. Requests are blocking
//! and issued one at a time; there is no retry, a failed message is
//! picked up again by the next indexing pass.

use crate::config::EmbeddingConfig;
use crate::error::{Result, SgrepError};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

/// How long the reachability check waits
const REACHABILITY_TIMEOUT: Duration = Duration::from_secs(2);

/// Anything that turns text into a fixed-dimension vector
pub trait EmbeddingProvider: Send + Sync {
    /// Model identifier
    fn model_name(&self) -> &str;

    /// Embed a single text
    ///
    /// Failures are errors, never an empty or zero vector.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    #[serde(default)]
    embeddings: Vec<Vec<f32>>,
}

/// Client for an Ollama-compatible embedding endpoint
pub struct OllamaEmbedder {
    client: Client,
    url: String,
    model: String,
}

impl OllamaEmbedder {
    /// Create a client for the configured endpoint
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SgrepError::Embedding(e.to_string()))?;

        info!("Using embedding model {} at {}", config.model, config.url);

        Ok(Self {
            client,
            url: config.url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        })
    }

    /// Check that the service answers at all
    pub fn is_reachable(&self) -> bool {
        match self.client.get(&self.url).timeout(REACHABILITY_TIMEOUT).send() {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!("Embedding service reachability check failed: {}", e);
                false
            }
        }
    }

    /// Fail early with an actionable message when the service is down
    pub fn ensure_reachable(&self) -> Result<()> {
        if self.is_reachable() {
            Ok(())
        } else {
            Err(SgrepError::Embedding(format!(
                "embedding service not reachable at {} (start it with: ollama serve)",
                self.url
            )))
        }
    }
}

impl EmbeddingProvider for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let endpoint = format!("{}/api/embed", self.url);
        let response = self
            .client
            .post(&endpoint)
            .json(&EmbedRequest {
                model: &self.model,
                input: text,
            })
            .send()
            .map_err(|e| SgrepError::Embedding(format!("request to {} failed: {}", endpoint, e)))?;

        let status = response.status();
        let body = response
            .text()
            .map_err(|e| SgrepError::Embedding(format!("reading response failed: {}", e)))?;

        if !status.is_success() {
            return Err(SgrepError::Embedding(format!(
                "service returned {}: {}",
                status,
                body.trim()
            )));
        }

        parse_embed_response(&body)
    }
}

/// First vector of an `/api/embed` response body
pub fn parse_embed_response(body: &str) -> Result<Vec<f32>> {
    let response: EmbedResponse = serde_json::from_str(body)
        .map_err(|e| SgrepError::Embedding(format!("malformed response: {}", e)))?;

    response
        .embeddings
        .into_iter()
        .next()
        .filter(|vector| !vector.is_empty())
        .ok_or_else(|| SgrepError::Embedding("No embedding returned".to_string()))
}

/// Cosine similarity of two vectors
///
/// Zero for vectors of different length, empty vectors, or when either
/// norm is zero. Accumulates in f64.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b.iter()) {
        let (x, y) = (f64::from(x), f64::from(y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        return 0.0;
    }

    (dot / denom) as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    /// Serve one canned HTTP response on a random local port
    fn serve_once(status: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = stream.read(&mut buf).unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request).to_string();
                if let Some(head_end) = text.find("\r\n\r\n") {
                    let length = text[..head_end]
                        .lines()
                        .find_map(|line| {
                            let lower = line.to_ascii_lowercase();
                            lower
                                .strip_prefix("content-length:")
                                .map(|v| v.trim().parse::<usize>().unwrap())
                        })
                        .unwrap_or(0);
                    if request.len() >= head_end + 4 + length {
                        break;
                    }
                }
            }
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).unwrap();
        });

        format!("http://{}", addr)
    }

    fn embedder_for(url: String) -> OllamaEmbedder {
        OllamaEmbedder::new(&EmbeddingConfig {
            url,
            model: "test-model".to_string(),
            timeout_secs: 5,
        })
        .unwrap()
    }

    #[test]
    fn test_parse_embed_response() {
        let vector = parse_embed_response(r#"{"model":"m","embeddings":[[0.5,-1.0,2.0]]}"#).unwrap();
        assert_eq!(vector, vec![0.5, -1.0, 2.0]);
    }

    #[test]
    fn test_parse_rejects_empty_and_malformed() {
        assert!(parse_embed_response(r#"{"embeddings":[]}"#).is_err());
        assert!(parse_embed_response(r#"{"embeddings":[[]]}"#).is_err());
        assert!(parse_embed_response(r#"{}"#).is_err());
        assert!(parse_embed_response("<html>").is_err());
    }

    #[test]
    fn test_embed_over_http() {
        let url = serve_once("200 OK", r#"{"embeddings":[[1.0,2.0,3.0]]}"#);
        let embedder = embedder_for(url);
        assert_eq!(embedder.model_name(), "test-model");
        assert_eq!(embedder.embed("hello").unwrap(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_embed_error_status() {
        let url = serve_once("500 Internal Server Error", r#"{"error":"model not found"}"#);
        let err = embedder_for(url).embed("hello").unwrap_err();
        assert!(matches!(err, SgrepError::Embedding(ref msg) if msg.contains("model not found")));
    }

    #[test]
    fn test_unreachable_service() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let embedder = embedder_for(url);
        assert!(!embedder.is_reachable());
        assert!(embedder.ensure_reachable().is_err());
        assert!(embedder.embed("hello").is_err());
    }

    #[test]
    fn test_cosine_similarity_identical() {
        let v = vec![0.3, -1.2, 4.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_symmetric_and_bounded() {
        let a = vec![1.0, 2.0, -3.0];
        let b = vec![-0.5, 4.0, 1.0];
        let ab = cosine_similarity(&a, &b);
        assert_eq!(ab, cosine_similarity(&b, &a));
        assert!((-1.0..=1.0).contains(&ab));

        let opposite = vec![-1.0, -2.0, 3.0];
        assert!((cosine_similarity(&a, &opposite) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_degenerate() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }
}
