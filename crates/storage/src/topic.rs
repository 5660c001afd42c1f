//! Summary fields derived from a conversation's text.

use chrono::{Local, TimeZone};
use lawgpt_chat::{Message, Role};

use crate::types::{Complexity, GENERAL_LEGAL_CATEGORY, NO_RESPONSE_PREVIEW};

const NAME_QUESTION_CHARS: usize = 30;
const PREVIEW_QUESTION_CHARS: usize = 100;
const PREVIEW_RESPONSE_CHARS: usize = 150;

/// Checked in order; the first category with a matching keyword wins.
const TOPIC_KEYWORDS: &[(&str, &[&str])] = &[
    (
        "Contract Law",
        &["contract", "agreement", "breach", "consideration", "offer", "acceptance"],
    ),
    (
        "Property Law",
        &["property", "real estate", "land", "ownership", "title", "deed"],
    ),
    (
        "Family Law",
        &["marriage", "divorce", "custody", "alimony", "adoption", "domestic"],
    ),
    (
        "Criminal Law",
        &["criminal", "crime", "theft", "murder", "assault", "bail"],
    ),
    (
        "Labor Law",
        &["employment", "labor", "worker", "salary", "termination", "workplace"],
    ),
    (
        "Consumer Law",
        &["consumer", "product", "warranty", "refund", "complaint", "service"],
    ),
    (
        "Corporate Law",
        &["company", "business", "corporate", "shares", "director", "partnership"],
    ),
    (
        "Constitutional Law",
        &[
            "constitutional",
            "fundamental rights",
            "article",
            "amendment",
            "supreme court",
        ],
    ),
    (
        "Tax Law",
        &["tax", "income tax", "gst", "return", "assessment", "penalty"],
    ),
    (
        "IP Law",
        &["intellectual property", "patent", "copyright", "trademark", "design"],
    ),
];

/// Substring match, so "taxation" counts as tax.
pub fn categorize_legal_topic(text: &str) -> &'static str {
    let lowered = text.to_lowercase();
    TOPIC_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|keyword| lowered.contains(keyword)))
        .map(|(category, _)| *category)
        .unwrap_or(GENERAL_LEGAL_CATEGORY)
}

/// `"Contract Law"` becomes `"contract-law"`.
pub fn topic_tag(category: &str) -> String {
    category
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join("-")
}

/// Keeps the first `max_chars` characters and marks the cut with `...`.
pub fn truncate_with_ellipsis(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

/// `"<category>: <question prefix> - <Mon D>"`, dated in local time.
pub fn chat_name(category: &str, first_question: &str, saved_at_millis: u64) -> String {
    let question = truncate_with_ellipsis(first_question, NAME_QUESTION_CHARS);
    format!("{category}: {question} - {}", short_date(saved_at_millis))
}

pub fn short_date(unix_millis: u64) -> String {
    i64::try_from(unix_millis)
        .ok()
        .and_then(|millis| Local.timestamp_millis_opt(millis).single())
        .map(|date| date.format("%b %-d").to_string())
        .unwrap_or_default()
}

pub fn question_preview(question: &str) -> String {
    truncate_with_ellipsis(question, PREVIEW_QUESTION_CHARS)
}

pub fn response_preview(response: Option<&str>) -> String {
    response
        .map(|text| truncate_with_ellipsis(text, PREVIEW_RESPONSE_CHARS))
        .unwrap_or_else(|| NO_RESPONSE_PREVIEW.to_string())
}

/// Average content length in characters decides the bucket.
pub fn complexity_of(messages: &[Message]) -> Complexity {
    if messages.is_empty() {
        return Complexity::Simple;
    }
    let total = messages
        .iter()
        .map(|message| message.content.chars().count())
        .sum::<usize>();
    let average = total / messages.len();

    if average < 100 {
        Complexity::Simple
    } else if average < 300 {
        Complexity::Medium
    } else {
        Complexity::Complex
    }
}

pub fn first_user_message(messages: &[Message]) -> Option<&Message> {
    messages.iter().find(|message| message.role == Role::User)
}

/// First assistant answer, skipping the welcome greeting.
pub fn first_assistant_reply(messages: &[Message]) -> Option<&Message> {
    messages
        .iter()
        .find(|message| message.role == Role::Assistant && !message.is_welcome())
}
