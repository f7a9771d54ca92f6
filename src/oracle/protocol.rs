//! Wire format spoken with the scoring oracle.
//!
//! # Requests
//!
//! One ASCII line per request:
//!
//! ```text
//! prob <event> <oldest> ... <newest>\n
//! batch <len> <event> <newest> ... <oldest> <len> ...\n
//! ```
//!
//! Missing history is sent as `<s>`, a missing event as `</s>`.
//!
//! # Replies
//!
//! Raw little-endian `f32` log10 probabilities, one per context, no
//! terminator.

use super::ContextToken;
use crate::error::OracleError;

/// Floor applied to every converted score.
pub const LOWEST_SCORE: f32 = -100.0;

/// Bytes per scored context in a reply.
pub const REPLY_WIDTH: usize = 4;

/// Convert a log10 probability to natural log.
pub fn transform_log10(score: f32) -> f32 {
    score * std::f32::consts::LN_10
}

pub fn floor_score(score: f32) -> f32 {
    score.max(LOWEST_SCORE)
}

/// Request line for a single context (history first, event last).
pub fn encode_prob_request(tokens: &[ContextToken]) -> String {
    let mut line = String::from("prob");
    if let Some((event, history)) = tokens.split_last() {
        line.push(' ');
        line.push_str(event.as_wire());
        for token in history {
            line.push(' ');
            line.push_str(token.as_wire());
        }
    }
    line.push('\n');
    line
}

/// Request line for several contexts, each sent nearest token first.
pub fn encode_batch_request(contexts: &[&[ContextToken]]) -> String {
    let mut line = String::from("batch");
    for tokens in contexts {
        line.push(' ');
        line.push_str(&tokens.len().to_string());
        for token in tokens.iter().rev() {
            line.push(' ');
            line.push_str(token.as_wire());
        }
    }
    line.push('\n');
    line
}

pub fn encode_reply(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub fn decode_reply(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(REPLY_WIDTH)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// An n-gram as the server sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireNGram {
    pub event: String,
    /// Oldest first.
    pub history: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Prob(WireNGram),
    Batch(Vec<WireNGram>),
}

/// Parse a request line (without its line break).
pub fn parse_request(line: &str) -> Result<Request, OracleError> {
    let mut fields = line.split_whitespace();
    match fields.next() {
        Some("prob") => {
            let event = fields
                .next()
                .ok_or_else(|| OracleError::Protocol("prob request without event".to_string()))?;
            Ok(Request::Prob(WireNGram {
                event: event.to_string(),
                history: fields.map(str::to_string).collect(),
            }))
        }
        Some("batch") => {
            let mut ngrams = Vec::new();
            while let Some(len) = fields.next() {
                let len: usize = len
                    .parse()
                    .map_err(|_| OracleError::Protocol(format!("bad context length {len:?}")))?;
                if len == 0 {
                    return Err(OracleError::Protocol("empty context in batch".to_string()));
                }
                let mut tokens: Vec<String> = Vec::with_capacity(len);
                for _ in 0..len {
                    let token = fields.next().ok_or_else(|| {
                        OracleError::Protocol("batch context shorter than its length".to_string())
                    })?;
                    tokens.push(token.to_string());
                }
                // Nearest first on the wire: event, then history newest to oldest.
                let event = tokens.remove(0);
                tokens.reverse();
                ngrams.push(WireNGram {
                    event,
                    history: tokens,
                });
            }
            Ok(Request::Batch(ngrams))
        }
        Some(other) => Err(OracleError::Protocol(format!("unknown request {other:?}"))),
        None => Err(OracleError::Protocol("empty request".to_string())),
    }
}
