//! Conversions between stored messages, model turns and structured model answers.

use std::collections::HashMap;
use std::str::FromStr;

use procura_core::domain::message::{Message, MessageRole};
use procura_core::domain::summary::OfferTerms;
use procura_core::domain::supplier::SupplierId;

use crate::llm::Turn;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    Accept,
    Counter,
}

/// Parsed answer to an evaluation task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Verdict {
    pub decision: Decision,
    pub offer: Option<OfferTerms>,
    pub body: String,
}

/// Reads the `DECISION:` / `OFFER:` header lines. A missing or unreadable decision counts as a
/// counter-offer so the negotiation never closes on a malformed answer.
pub fn parse_verdict(raw: &str) -> Verdict {
    let mut decision = None;
    let mut offer = None;
    let mut body_lines = Vec::new();
    let mut in_header = true;

    for line in raw.lines() {
        let trimmed = line.trim();
        if in_header {
            if trimmed.is_empty() {
                continue;
            }
            if let Some(value) = strip_label(trimmed, "DECISION:") {
                decision = match value.trim().to_ascii_uppercase().as_str() {
                    value if value.starts_with("ACCEPT") => Some(Decision::Accept),
                    value if value.starts_with("COUNTER") => Some(Decision::Counter),
                    _ => decision,
                };
                continue;
            }
            if let Some(value) = strip_label(trimmed, "OFFER:") {
                offer = OfferTerms::from_str(value).ok();
                continue;
            }
            in_header = false;
        }
        body_lines.push(line);
    }

    Verdict {
        decision: decision.unwrap_or(Decision::Counter),
        offer,
        body: body_lines.join("\n").trim().to_string(),
    }
}

/// Extracts `[INSTRUCTION] supplier_id: .. text: .. [/INSTRUCTION]` blocks. Later blocks for the
/// same supplier win; blocks without a supplier id or text are skipped.
pub fn parse_instructions(raw: &str) -> HashMap<SupplierId, String> {
    const OPEN: &str = "[INSTRUCTION]";
    const CLOSE: &str = "[/INSTRUCTION]";

    let upper = raw.to_ascii_uppercase();
    let mut parsed = HashMap::new();
    let mut offset = 0;

    while let Some(found) = upper[offset..].find(OPEN) {
        let start = offset + found + OPEN.len();
        let end = upper[start..].find(CLOSE).map(|position| start + position).unwrap_or(raw.len());
        if let Some((supplier_id, text)) = parse_instruction_block(&raw[start..end]) {
            parsed.insert(supplier_id, text);
        }
        offset = end;
    }

    parsed
}

fn parse_instruction_block(block: &str) -> Option<(SupplierId, String)> {
    let mut supplier_id = None;
    let mut text_lines: Vec<&str> = Vec::new();
    let mut in_text = false;

    for line in block.lines() {
        let trimmed = line.trim();
        if !in_text {
            if let Some(value) = strip_label(trimmed, "supplier_id:") {
                supplier_id = Some(value.trim().to_string());
                continue;
            }
            if let Some(value) = strip_label(trimmed, "text:") {
                in_text = true;
                text_lines.push(value.trim());
            }
            continue;
        }
        text_lines.push(trimmed);
    }

    let supplier_id = supplier_id.filter(|value| !value.is_empty())?;
    let text = text_lines.join("\n").trim().to_string();
    if text.is_empty() {
        return None;
    }
    Some((SupplierId(supplier_id), text))
}

fn strip_label<'a>(line: &'a str, label: &str) -> Option<&'a str> {
    let head = line.get(..label.len())?;
    head.eq_ignore_ascii_case(label).then(|| &line[label.len()..])
}

/// Pair history from the negotiator's point of view: its own messages are assistant turns,
/// supplier messages are user turns.
pub fn negotiator_turns(history: &[Message]) -> Vec<Turn> {
    history
        .iter()
        .filter_map(|message| match message.role {
            MessageRole::Negotiator => Some(Turn::assistant(&message.content)),
            MessageRole::Supplier => Some(Turn::user(&message.content)),
            MessageRole::Orchestrator => None,
        })
        .collect()
}

/// Negotiation-wide history flattened into one transcript turn for the orchestrator.
pub fn orchestrator_turns(
    history: &[Message],
    supplier_names: &HashMap<SupplierId, String>,
) -> Vec<Turn> {
    if history.is_empty() {
        return Vec::new();
    }

    let transcript = history
        .iter()
        .map(|message| {
            let supplier = message
                .supplier_id
                .as_ref()
                .map(|id| supplier_names.get(id).cloned().unwrap_or_else(|| id.short().to_string()))
                .unwrap_or_else(|| "all suppliers".to_string());
            format!("[{supplier}] {}: {}", message.role.as_str(), message.content.trim())
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    vec![Turn::user(format!("Conversation so far:\n\n{transcript}"))]
}
