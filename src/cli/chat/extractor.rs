//! Heuristic extraction of product suggestions from assistant text.
//!
//! The model is asked to emit blocks shaped like:
//!
//! ```text
//! Product 1:
//! Title: Nordic Oak Coffee Table
//! Price: $249
//! Description: A low table in solid oak with rounded corners.
//! Categories/Tags: Oak, Modern, Living Room
//! ```
//!
//! Real output drifts from that shape, so parsing is layered: a strict
//! block-and-label scan first, then a loose line scan that always yields a
//! single suggestion. Extraction never fails; missing pieces degrade to
//! placeholder values.

use regex::Regex;

use super::conversation_state::{ProductDraft, FALLBACK_CATEGORY};

const BLOCK_DELIMITER: &str = r"(?i)(?:Product|Suggestion|Option)\s+\d+:";

/// A line opening a new labeled field, used to stop multi-line captures.
const LABEL_LINE: &str = r"(?i)^\s*(?:Title|Price|Description|Categories(?:\s*/\s*Tags)?|Tags)\s*:";

const PRICE_UNAVAILABLE: &str = "Price unavailable";
const NO_DESCRIPTION: &str = "No description available";
const LOOSE_SCAN_TITLE: &str = "Furniture Suggestion";

/// Parse zero or more product drafts out of raw assistant text.
///
/// Tier 1 splits on `Product N:` / `Suggestion N:` / `Option N:` markers and
/// reads labeled fields out of each block. If that yields nothing and the
/// text is non-empty, tier 2 scans line by line for labels anywhere and
/// produces exactly one draft that, at worst, echoes the whole text as its
/// description.
pub fn extract_products(text: &str) -> Vec<ProductDraft> {
    let mut drafts = scan_blocks(text);

    if drafts.is_empty() && !text.trim().is_empty() {
        drafts.push(scan_loose(text));
    }

    drafts
}

/// Tier 1: strict block scan.
///
/// When the text carries no block delimiter at all it is treated as one
/// implicit block, which only counts as a suggestion if at least one field
/// label matched; otherwise tier 2 gets its chance.
fn scan_blocks(text: &str) -> Vec<ProductDraft> {
    let delimiter = match Regex::new(BLOCK_DELIMITER) {
        Ok(re) => re,
        Err(_) => return Vec::new(),
    };
    let had_delimiter = delimiter.is_match(text);

    delimiter
        .split(text)
        .filter(|block| !block.trim().is_empty())
        .enumerate()
        .filter_map(|(index, block)| {
            let (draft, any_field_matched) = scan_block(block, index);
            (had_delimiter || any_field_matched).then_some(draft)
        })
        .collect()
}

/// Read the four labeled fields out of one block. Each match is independent
/// and order-insensitive; absences fall back to fixed placeholders. Returns
/// the draft plus whether any label matched at all.
fn scan_block(block: &str, index: usize) -> (ProductDraft, bool) {
    let title = capture_field(block, r"(?i)Title:?\s*([^\n]+)");
    let price = capture_field(block, r"(?i)Price:?\s*([^\n]+)");
    let description = capture_multiline_field(block, r"(?i)Description:?\s*([^\n]+)");
    let categories_text = capture_multiline_field(
        block,
        r"(?i)(?:Categories\s*/\s*Tags|Categories|Tags):?\s*([^\n]+)",
    );

    let any_field_matched = title.is_some()
        || price.is_some()
        || description.is_some()
        || categories_text.is_some();

    let draft = ProductDraft {
        title: title.unwrap_or_else(|| format!("Furniture Option {}", index + 1)),
        price: price.unwrap_or_else(|| PRICE_UNAVAILABLE.to_string()),
        description: description.unwrap_or_else(|| NO_DESCRIPTION.to_string()),
        categories: match categories_text {
            Some(text) => parse_categories(&text),
            None => vec![FALLBACK_CATEGORY.to_string()],
        },
    };

    (draft, any_field_matched)
}

/// Tier 2: loose single-shot scan. Labels may sit anywhere in a line; each
/// hit overwrites the running default for that field. Always yields exactly
/// one draft.
fn scan_loose(text: &str) -> ProductDraft {
    let mut title = LOOSE_SCAN_TITLE.to_string();
    let mut price = PRICE_UNAVAILABLE.to_string();
    let mut description = text.trim().to_string();
    let mut categories = vec![FALLBACK_CATEGORY.to_string()];

    for line in text.lines().filter(|line| !line.trim().is_empty()) {
        if let Some(rest) = after_label(line, r"(?i)title:") {
            title = rest;
        } else if let Some(rest) = after_label(line, r"(?i)price:") {
            price = rest;
        } else if let Some(rest) = after_label(line, r"(?i)description:") {
            description = rest;
        } else if let Some(rest) = after_label(line, r"(?i)(?:categories|tags):") {
            categories = split_commas(&rest);
        }
    }

    ProductDraft {
        title,
        price,
        description,
        categories,
    }
}

/// Categories arrive either as a bracketed JSON-ish array (single quotes
/// tolerated) or as a comma-separated list. JSON parse failures silently
/// fall back to the comma split; an empty result coerces to the fallback
/// tag so the list is never empty.
fn parse_categories(text: &str) -> Vec<String> {
    let trimmed = text.trim();

    let categories = if trimmed.contains('[') && trimmed.contains(']') {
        serde_json::from_str::<Vec<String>>(&trimmed.replace('\'', "\""))
            .unwrap_or_else(|_| split_commas(trimmed))
    } else {
        split_commas(trimmed)
    };

    if categories.is_empty() {
        vec![FALLBACK_CATEGORY.to_string()]
    } else {
        categories
    }
}

fn split_commas(text: &str) -> Vec<String> {
    match Regex::new(r",\s*") {
        Ok(re) => re.split(text).map(str::to_string).collect(),
        Err(_) => vec![text.to_string()],
    }
}

/// First capture group of `pattern` in `block`, trimmed.
fn capture_field(block: &str, pattern: &str) -> Option<String> {
    let re = Regex::new(pattern).ok()?;
    let capture = re.captures(block)?.get(1)?;
    Some(capture.as_str().trim().to_string())
}

/// Like [`capture_field`], but the value continues across immediately
/// following lines until a blank line or a line opening another labeled
/// field.
fn capture_multiline_field(block: &str, pattern: &str) -> Option<String> {
    let re = Regex::new(pattern).ok()?;
    let capture = re.captures(block)?.get(1)?;
    let label_line = Regex::new(LABEL_LINE).ok()?;

    let mut value = capture.as_str().trim().to_string();
    let rest = &block[capture.end()..];
    for line in rest.strip_prefix('\n').unwrap_or(rest).lines() {
        if line.trim().is_empty() || label_line.is_match(line) {
            break;
        }
        value.push('\n');
        value.push_str(line.trim_end());
    }

    Some(value)
}

/// Everything after the first occurrence of `pattern` in `line`, trimmed.
fn after_label(line: &str, pattern: &str) -> Option<String> {
    let re = Regex::new(pattern).ok()?;
    let found = re.find(line)?;
    Some(line[found.end()..].trim().to_string())
}
