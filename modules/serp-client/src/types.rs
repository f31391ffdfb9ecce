use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub organic_results: Vec<OrganicResult>,
    /// SerpAPI reports some failures (bad key, exhausted plan) in a 200 body.
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrganicResult {
    #[serde(default)]
    pub position: u32,
    #[serde(default)]
    pub title: String,
    pub link: String,
    #[serde(default)]
    pub snippet: String,
    pub date: Option<String>,
}
