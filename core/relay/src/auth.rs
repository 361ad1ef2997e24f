//! Handshake authorization.

use std::collections::HashMap;

use seller_notify_protocol::{ClientFrame, ErrorInfo};

/// Maps session tokens to seller ids. An empty allow-list accepts any
/// non-empty token.
#[derive(Debug, Default, Clone)]
pub struct Authorizer {
    allow: HashMap<String, String>,
}

impl Authorizer {
    pub fn new(entries: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            allow: entries.into_iter().collect(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.allow.is_empty()
    }

    /// Resolves the seller id for a handshake frame.
    pub fn authorize(&self, frame: &ClientFrame) -> Result<String, ErrorInfo> {
        let ClientFrame::Handshake { user_id, .. } = frame else {
            return Err(ErrorInfo::new(
                "handshake_required",
                "first frame must be a handshake",
            ));
        };
        let token = frame
            .handshake_token()
            .filter(|token| !token.trim().is_empty())
            .ok_or_else(|| ErrorInfo::new("missing_token", "auth.token is required"))?;

        if self.is_open() {
            return Ok(user_id.clone().unwrap_or_else(|| token.to_string()));
        }

        let allowed = self
            .allow
            .get(token)
            .ok_or_else(|| ErrorInfo::new("unauthorized", "session token is not recognized"))?;
        match user_id {
            Some(claimed) if claimed != allowed => Err(ErrorInfo::new(
                "user_mismatch",
                format!("token does not belong to user {}", claimed),
            )),
            _ => Ok(allowed.clone()),
        }
    }
}

/// Parses a `TOKEN=USER` pair from the command line.
pub fn parse_allow_entry(raw: &str) -> Result<(String, String), String> {
    let (token, user) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected TOKEN=USER, got '{}'", raw))?;
    let (token, user) = (token.trim(), user.trim());
    if token.is_empty() || user.is_empty() {
        return Err(format!("expected TOKEN=USER, got '{}'", raw));
    }
    Ok((token.to_string(), user.to_string()))
}
