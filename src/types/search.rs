use serde::{Deserialize, Serialize};

/// Query string for `GET /api/v1/search`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchParams {
    /// Search text.
    pub q: String,
    /// Maximum number of hits.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

/// A single search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    /// Conversation containing the hit.
    #[serde(deserialize_with = "crate::utils::lenient::id")]
    pub conversation_id: String,
    /// Message containing the hit, if the server resolves one.
    #[serde(
        default,
        deserialize_with = "crate::utils::lenient::optional_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub message_id: Option<String>,
    /// Matched text.
    pub content: String,
    /// Similarity score.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
}

/// Search response; tolerates both `{ "results": [...] }` and a bare array.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "SearchPayload")]
pub struct SearchResults {
    /// Hits in server order.
    pub results: Vec<SearchHit>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SearchPayload {
    Wrapped { results: Vec<SearchHit> },
    Bare(Vec<SearchHit>),
}

impl From<SearchPayload> for SearchResults {
    fn from(payload: SearchPayload) -> Self {
        match payload {
            SearchPayload::Wrapped { results } | SearchPayload::Bare(results) => {
                SearchResults { results }
            }
        }
    }
}
