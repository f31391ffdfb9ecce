use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tweet {
    pub text: String,
    pub posted_at: Option<DateTime<Utc>>,
    /// Canonical x.com permalink, independent of the instance that served it.
    pub url: Option<String>,
}
