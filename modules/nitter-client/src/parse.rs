use chrono::{DateTime, NaiveDateTime, Utc};
use scraper::{Html, Selector};

use crate::types::Tweet;

/// Nitter renders absolute timestamps in the date link's title attribute.
const NITTER_DATE_FORMAT: &str = "%b %d, %Y · %I:%M %p UTC";

struct TimelineSelectors {
    item: Selector,
    content: Selector,
    date_link: Selector,
}

impl TimelineSelectors {
    fn new() -> Option<Self> {
        Some(Self {
            item: Selector::parse(".timeline-item").ok()?,
            content: Selector::parse(".tweet-content").ok()?,
            date_link: Selector::parse(".tweet-date a").ok()?,
        })
    }
}

/// Parse up to `limit` tweets out of a Nitter profile page.
pub fn parse_timeline(html: &str, limit: usize) -> Vec<Tweet> {
    let Some(sel) = TimelineSelectors::new() else {
        return Vec::new();
    };
    let document = Html::parse_document(html);

    document
        .select(&sel.item)
        .filter_map(|item| {
            let content = item.select(&sel.content).next()?;
            let text = content
                .text()
                .collect::<Vec<_>>()
                .join(" ")
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ");
            if text.is_empty() {
                return None;
            }

            let date_link = item.select(&sel.date_link).next();
            let posted_at = date_link
                .and_then(|a| a.value().attr("title"))
                .and_then(parse_nitter_date);
            let url = date_link
                .and_then(|a| a.value().attr("href"))
                .map(permalink);

            Some(Tweet {
                text,
                posted_at,
                url,
            })
        })
        .take(limit)
        .collect()
}

pub fn parse_nitter_date(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw.trim(), NITTER_DATE_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

fn permalink(href: &str) -> String {
    let path = href.split('#').next().unwrap_or(href);
    format!("https://x.com{path}")
}
