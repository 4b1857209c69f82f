use anyhow::Context;
use async_trait::async_trait;
use rand::seq::SliceRandom;
use serde::Deserialize;
use serde_json::json;

use crate::models::knowledge::MIN_SNIPPET_SCORE;
use crate::models::{Retrieval, RetrievedSnippet};
use crate::services::ai::embeddings::Embedder;

const TOP_K: usize = 2;

#[derive(Debug, Clone, PartialEq)]
pub struct IndexFilter {
    pub location: String,
    pub language: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SnippetMetadata {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub location: Option<String>,
    /// The ingestion tool writes this key misspelled.
    #[serde(default, alias = "uniqe")]
    pub unique: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IndexMatch {
    pub score: f32,
    #[serde(default)]
    pub metadata: SnippetMetadata,
}

#[async_trait]
pub trait KnowledgeIndex: Send + Sync {
    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: &IndexFilter,
    ) -> anyhow::Result<Vec<IndexMatch>>;
}

/// Pinecone index reached over its data-plane REST API.
pub struct PineconeIndex {
    host: String,
    api_key: String,
    client: reqwest::Client,
}

impl PineconeIndex {
    pub fn new(host: String, api_key: String) -> Self {
        Self {
            host: host.trim_end_matches('/').to_string(),
            api_key,
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<IndexMatch>,
}

#[async_trait]
impl KnowledgeIndex for PineconeIndex {
    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: &IndexFilter,
    ) -> anyhow::Result<Vec<IndexMatch>> {
        let body = json!({
            "vector": vector,
            "topK": top_k,
            "includeMetadata": true,
            "filter": {
                "location": { "$eq": filter.location },
                "language": { "$eq": filter.language },
            },
        });

        let resp = self
            .client
            .post(format!("{}/query", self.host))
            .header("Api-Key", &self.api_key)
            .json(&body)
            .send()
            .await
            .context("failed to query knowledge index")?
            .error_for_status()
            .context("knowledge index returned error")?;

        let data: QueryResponse = resp
            .json()
            .await
            .context("failed to parse knowledge index response")?;
        Ok(data.matches)
    }
}

/// Lower-cased utterance without surrounding punctuation, as embedded.
pub fn normalize_query(query: &str) -> String {
    query
        .trim()
        .trim_matches(|c: char| matches!(c, '.' | ',' | '?' | '!') || c.is_whitespace())
        .to_lowercase()
}

pub struct Retriever {
    embedder: Box<dyn Embedder>,
    index: Box<dyn KnowledgeIndex>,
    properties: Vec<String>,
}

impl Retriever {
    /// `properties` seeds the search filter while the caller's property is unknown.
    pub fn new(
        embedder: Box<dyn Embedder>,
        index: Box<dyn KnowledgeIndex>,
        properties: Vec<String>,
    ) -> Self {
        Self {
            embedder,
            index,
            properties,
        }
    }

    /// Never fails: lookup errors are logged and yield the empty retrieval.
    pub async fn retrieve(&self, query: &str, property: Option<&str>, language: &str) -> Retrieval {
        match self.try_retrieve(query, property, language).await {
            Ok(retrieval) => retrieval,
            Err(e) => {
                tracing::error!(error = %e, "knowledge retrieval failed, continuing without context");
                Retrieval::empty()
            }
        }
    }

    async fn try_retrieve(
        &self,
        query: &str,
        property: Option<&str>,
        language: &str,
    ) -> anyhow::Result<Retrieval> {
        let normalized = normalize_query(query);
        let vector = self.embedder.embed(&normalized).await?;

        let location = match property {
            Some(p) => p.to_string(),
            None => self
                .properties
                .choose(&mut rand::thread_rng())
                .cloned()
                .unwrap_or_default(),
        };
        let filter = IndexFilter {
            location,
            language: language.to_string(),
        };

        let matches = self.index.query(&vector, TOP_K, &filter).await?;
        Ok(filter_matches(matches, property.is_none()))
    }
}

fn filter_matches(matches: Vec<IndexMatch>, property_unknown: bool) -> Retrieval {
    let mut needs_disambiguation = false;
    let mut snippets: Vec<RetrievedSnippet> = matches
        .into_iter()
        .filter(|m| m.score > MIN_SNIPPET_SCORE)
        .map(|m| RetrievedSnippet {
            text: m.metadata.text,
            location: m.metadata.location,
            property_specific: m.metadata.unique,
            score: m.score,
        })
        .collect();

    if property_unknown {
        let before = snippets.len();
        snippets.retain(|s| !s.property_specific);
        needs_disambiguation = snippets.len() != before;
    }

    if snippets.is_empty() {
        snippets.push(RetrievedSnippet::placeholder());
    }

    Retrieval {
        snippets,
        needs_disambiguation,
    }
}
