//! JSON envelope returned by the listing data endpoint:
//! `{"success": true, "data": {"data": "<html>", "paginated": {"next": ...}}}`.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Deserialize)]
pub struct AjaxEnvelope {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub data: Option<EnvelopeData>,
}

#[derive(Debug, Deserialize)]
pub struct EnvelopeData {
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub paginated: Option<Paginated>,
}

#[derive(Debug, Deserialize)]
pub struct Paginated {
    #[serde(default)]
    pub next: Option<Value>,
}

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("unparseable envelope: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("envelope reported success=false")]
    Unsuccessful,
    #[error("envelope has no data.data field")]
    MissingData,
}

/// HTML fragment and continuation token of one successful envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct EnvelopePage {
    pub html: String,
    /// `None` when the envelope has no `paginated` object at all.
    pub has_next: Option<bool>,
}

impl AjaxEnvelope {
    pub fn parse(body: &[u8]) -> Result<EnvelopePage, EnvelopeError> {
        let envelope: AjaxEnvelope = serde_json::from_slice(body)?;
        if !envelope.success {
            return Err(EnvelopeError::Unsuccessful);
        }
        let data = envelope.data.ok_or(EnvelopeError::MissingData)?;
        let html = data.data.ok_or(EnvelopeError::MissingData)?;
        let has_next = data.paginated.map(|p| p.next.as_ref().is_some_and(is_present));
        Ok(EnvelopePage { html, has_next })
    }
}

// The site has used a page number, a URL and `false` for the token.
fn is_present(token: &Value) -> bool {
    match token {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.trim().is_empty(),
        _ => true,
    }
}
