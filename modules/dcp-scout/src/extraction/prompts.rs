use std::fmt::Write;

use dcp_common::{EntityKey, EntityKind, SearchHit, SocialPost};

pub(crate) const SEARCH_SYSTEM: &str = "You research startups and their founders for a Duke University \
alumni venture network. From the search results provided, extract only facts that the results \
support. Use null for anything not stated. Dates are YYYY-MM-DD. Monetary amounts are plain USD \
numbers. A person or company counts as Duke affiliated only if a result ties them to Duke \
University (alumni, faculty, student, staff). For a company, also list the founders and \
executives the results name, each with their title and a Duke status: \"confirmed\" when a \
result ties them to Duke, \"please review\" when it only hints at it, \"no\" otherwise.";

pub(crate) const SOCIAL_SYSTEM: &str = "You review recent social media posts from a company or \
founder. Summarise what they are currently doing, list the main topics, and rate from 0 to 100 \
how timely and actionable the activity is for an investor reaching out now (fundraising, \
launches, hiring, partnerships score high).";

pub(crate) const STRICT_RETRY: &str = "Your previous answer was rejected. Respond with a single \
JSON object matching the schema exactly. No prose, no markdown. Numbers must be within their \
stated ranges and dates must be YYYY-MM-DD or null.";

pub(crate) fn search_prompt(key: &EntityKey, hits: &[SearchHit]) -> String {
    let subject = match key.kind() {
        EntityKind::Company => "company",
        EntityKind::Founder => "founder",
    };
    let mut out = format!("Subject ({subject}): {}\n\nSearch results:\n", key.name());
    for hit in hits {
        let _ = writeln!(out, "- {}\n  {}", hit.title, hit.url);
        if !hit.snippet.is_empty() {
            let _ = writeln!(out, "  {}", hit.snippet);
        }
        if let Some(date) = &hit.date {
            let _ = writeln!(out, "  ({date})");
        }
    }
    out
}

pub(crate) fn social_prompt(key: &EntityKey, handle: &str, posts: &[SocialPost]) -> String {
    let mut out = format!("Subject: {} (@{handle})\n\nRecent posts:\n", key.name());
    for post in posts {
        match post.posted_at {
            Some(at) => {
                let _ = writeln!(out, "- [{}] {}", at.format("%Y-%m-%d"), post.text);
            }
            None => {
                let _ = writeln!(out, "- {}", post.text);
            }
        }
    }
    out
}

pub(crate) fn with_strict_retry(prompt: &str, rejection: &str) -> String {
    format!("{prompt}\n\n{STRICT_RETRY}\nRejected because: {rejection}")
}
