//! Inbound Events API payloads and the admission gate in front of the
//! dispatcher.

use anyhow::{Context as _, Result};
use serde::Deserialize;
use tracing::{debug, info};

pub const URL_VERIFICATION: &str = "url_verification";
pub const APP_MENTION: &str = "app_mention";

/// Envelope delivered to the webhook. Fields the bot does not use are
/// ignored; missing ones read as empty.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct InboundEvent {
    pub token: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub challenge: String,
    pub event_id: String,
    pub event: MessageEvent,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MessageEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub user: String,
    pub text: String,
    pub channel: String,
    pub event_ts: String,
    pub files: Vec<AttachedFile>,
    pub blocks: Vec<Block>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AttachedFile {
    pub url_private_download: String,
    pub name: String,
}

/// Rich-text block; only the `blocks -> elements -> elements` nesting is read.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Block {
    pub elements: Vec<BlockElement>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BlockElement {
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
    pub elements: Vec<BlockElement>,
}

impl InboundEvent {
    /// URL of the first `link` leaf, scanning depth-first.
    #[must_use]
    pub fn first_link(&self) -> Option<&str> {
        self.event
            .blocks
            .iter()
            .flat_map(|block| &block.elements)
            .find_map(find_link)
    }
}

fn find_link(element: &BlockElement) -> Option<&str> {
    if element.kind == "link" {
        return Some(element.url.as_str());
    }
    element.elements.iter().find_map(find_link)
}

/// What the webhook should do with a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Proceed(Box<InboundEvent>),
    /// Answer immediately with this body (HTTP 200) and stop.
    ShortCircuit(String),
}

/// Static admission policy.
#[derive(Debug, Clone)]
pub struct Gate {
    pub verification_token: String,
    pub channel: Option<String>,
}

impl Gate {
    /// Parses and screens a payload. Only an undecodable payload is an error.
    pub fn admit(&self, payload: &str) -> Result<Admission> {
        let event: InboundEvent =
            serde_json::from_str(payload).context("parsing Slack event JSON")?;
        debug!(event_id = %event.event_id, kind = %event.kind, "Decoded event");

        if event.token != self.verification_token {
            info!(token = %event.token, "Rejected: verification token mismatch");
            return Ok(rejected(
                "The token received does not match the verification token",
            ));
        }

        if event.kind == URL_VERIFICATION {
            info!("Accepted url_verification handshake");
            return Ok(Admission::ShortCircuit(format!(
                r#"{{"challenge": {}}}"#,
                event.challenge
            )));
        }

        if event.event.kind != APP_MENTION {
            info!(kind = %event.event.kind, "Rejected: not an app_mention");
            return Ok(rejected("Slack event type do not 'app_mention'"));
        }

        if let Some(channel) = self.channel.as_deref().filter(|c| !c.is_empty())
            && channel != event.event.channel
        {
            info!(channel = %event.event.channel, "Rejected: channel not allowed");
            return Ok(rejected("Slack channel ID do not match"));
        }

        Ok(Admission::Proceed(Box::new(event)))
    }
}

fn rejected(reason: &str) -> Admission {
    Admission::ShortCircuit(format!(r#"{{"message": "[REJECTED] {reason}"}}"#))
}
