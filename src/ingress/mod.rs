//! Ingress Adapters: pure, synchronous parsing and validation functions that
//! translate external transport payloads into uniform internal events,
//! mirroring the teacher's `filter::token_filter` style of gating logic kept
//! free of any HTTP-framework dependency.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::config::IngressConfig;
use crate::domain::{TokenId, TxKind};
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct KolBuyEvent {
    pub token: TokenId,
    pub wallet: String,
    pub ts: DateTime<Utc>,
    pub buyer_addr: String,
    pub kind: TxKind,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatMentionEvent {
    pub token: TokenId,
    pub group: String,
    pub ts: DateTime<Utc>,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GraduationEvent {
    pub token: TokenId,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PollTick {
    pub token: TokenId,
}

/// Wire shape of a single KOL-buy webhook entry.
#[derive(Debug, Deserialize)]
struct KolBuyPayloadEntry {
    wallet: String,
    mint: String,
    ts: DateTime<Utc>,
    buyer_addr: String,
    kind: String,
}

pub struct IngressValidator {
    config: IngressConfig,
    ignore_list: Vec<String>,
}

impl IngressValidator {
    pub fn new(config: IngressConfig, ignore_list: Vec<String>) -> Self {
        Self { config, ignore_list }
    }

    fn validate_mint(&self, mint: &str) -> Result<()> {
        if mint.len() < self.config.mint_min_len || mint.len() > self.config.mint_max_len {
            return Err(Error::InvalidInput(format!(
                "mint {} has invalid length {} (expected {}..={})",
                mint,
                mint.len(),
                self.config.mint_min_len,
                self.config.mint_max_len
            )));
        }
        if !mint.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(Error::InvalidInput(format!("mint {} is not base58-shaped", mint)));
        }
        Ok(())
    }

    fn check_ignore_list(&self, mint: &str) -> Result<()> {
        if self.ignore_list.iter().any(|m| m == mint) {
            return Err(Error::IgnoredToken(mint.to_string()));
        }
        Ok(())
    }

    fn validate_token(&self, mint: &str) -> Result<()> {
        self.validate_mint(mint)?;
        self.check_ignore_list(mint)
    }

    /// Parse a KOL-buy webhook body: a JSON array of transaction summaries.
    /// Entries with unknown mints or ignored tokens are dropped silently,
    /// never surfaced as an error to the caller (§6 "filtered silently").
    pub fn parse_kol_buy_payload(&self, body: &[u8]) -> Result<Vec<KolBuyEvent>> {
        let entries: Vec<KolBuyPayloadEntry> = serde_json::from_slice(body)?;
        let mut events = Vec::with_capacity(entries.len());
        for entry in entries {
            if self.validate_token(&entry.mint).is_err() {
                continue;
            }
            let kind = match entry.kind.to_ascii_lowercase().as_str() {
                "buy" => TxKind::Buy,
                "sell" => TxKind::Sell,
                other => {
                    tracing::debug!(kind = other, "dropping KOL event with unknown transaction kind");
                    continue;
                }
            };
            events.push(KolBuyEvent {
                token: TokenId::new(entry.mint),
                wallet: entry.wallet,
                ts: entry.ts,
                buyer_addr: entry.buyer_addr,
                kind,
            });
        }
        Ok(events)
    }

    /// Parse a chat-mention webhook query string: `token=<mint>&group=<name>`.
    pub fn parse_chat_mention_query(&self, token: &str, group: &str, text: &str) -> Result<ChatMentionEvent> {
        self.validate_token(token)?;
        if group.trim().is_empty() {
            return Err(Error::InvalidInput("group identifier must not be empty".to_string()));
        }
        Ok(ChatMentionEvent {
            token: TokenId::new(token),
            group: group.to_string(),
            ts: Utc::now(),
            text: text.to_string(),
        })
    }

    /// Parse a graduation webhook body, same transport shape as the KOL-buy one.
    pub fn parse_graduation_payload(&self, body: &[u8]) -> Result<Vec<GraduationEvent>> {
        #[derive(Debug, Deserialize)]
        struct Entry {
            mint: String,
            ts: DateTime<Utc>,
        }
        let entries: Vec<Entry> = serde_json::from_slice(body)?;
        let mut events = Vec::with_capacity(entries.len());
        for entry in entries {
            if self.validate_token(&entry.mint).is_err() {
                continue;
            }
            events.push(GraduationEvent {
                token: TokenId::new(entry.mint),
                ts: entry.ts,
            });
        }
        Ok(events)
    }

    pub fn make_poll_tick(&self, token: &TokenId) -> Result<PollTick> {
        self.validate_token(token.as_str())?;
        Ok(PollTick { token: token.clone() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> IngressValidator {
        IngressValidator::new(
            IngressConfig::default(),
            vec!["So11111111111111111111111111111111111111112".to_string()],
        )
    }

    fn mint(tail: &str) -> String {
        format!("{}{}", "1".repeat(32 - tail.len()), tail)
    }

    #[test]
    fn kol_buy_payload_drops_ignored_and_invalid_entries() {
        let v = validator();
        let body = serde_json::json!([
            {"wallet": "w1", "mint": mint("aaa"), "ts": Utc::now(), "buyer_addr": "b1", "kind": "buy"},
            {"wallet": "w2", "mint": "So11111111111111111111111111111111111111112", "ts": Utc::now(), "buyer_addr": "b2", "kind": "buy"},
            {"wallet": "w3", "mint": "short", "ts": Utc::now(), "buyer_addr": "b3", "kind": "buy"},
        ]);
        let events = v.parse_kol_buy_payload(body.to_string().as_bytes()).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].wallet, "w1");
    }

    #[test]
    fn chat_mention_rejects_bad_mint_shape() {
        let v = validator();
        let result = v.parse_chat_mention_query("too-short", "groupA", "text");
        assert!(result.is_err());
    }

    #[test]
    fn chat_mention_accepts_valid_mint() {
        let v = validator();
        let result = v.parse_chat_mention_query(&mint("xyz"), "groupA", "look at this");
        assert!(result.is_ok());
    }

    #[test]
    fn poll_tick_rejects_ignored_token() {
        let v = validator();
        let token = TokenId::new("So11111111111111111111111111111111111111112");
        assert!(v.make_poll_tick(&token).is_err());
    }
}
