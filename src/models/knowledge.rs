use serde::{Deserialize, Serialize};

/// Similarity threshold a snippet has to beat to be used as context.
pub const MIN_SNIPPET_SCORE: f32 = 0.5;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievedSnippet {
    pub text: String,
    pub location: Option<String>,
    /// Answer only holds for one property.
    pub property_specific: bool,
    pub score: f32,
}

impl RetrievedSnippet {
    /// Stand-in when nothing relevant was found.
    pub fn placeholder() -> Self {
        Self {
            text: " ".to_string(),
            location: None,
            property_specific: false,
            score: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Retrieval {
    pub snippets: Vec<RetrievedSnippet>,
    /// Property-specific answers were dropped because no property is known yet.
    pub needs_disambiguation: bool,
}

impl Retrieval {
    pub fn empty() -> Self {
        Self {
            snippets: vec![RetrievedSnippet::placeholder()],
            needs_disambiguation: false,
        }
    }

    pub fn context_texts(&self) -> Vec<&str> {
        self.snippets.iter().map(|s| s.text.as_str()).collect()
    }
}
