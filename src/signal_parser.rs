//! Canonicalises external signal representations into [`Signal`] (§4.6).
//!
//! Grounded on `signals/detector.rs`'s detection functions: synchronous, `&self`-only,
//! `Option<T>`-returning, no I/O — generalised here from market-event detection to
//! text/embed parsing.

use chrono::Utc;
use serde_json::Value;

use crate::models::{Action, InstrumentType, OptionType, OrderType, Signal};

/// A titled-field record with an optional footer, the shape chat embeds take.
pub struct SignalEmbed {
    pub title: Option<String>,
    pub description: Option<String>,
    pub fields: Vec<(String, String)>,
    pub footer: Option<String>,
}

pub struct SignalParser;

impl SignalParser {
    pub fn new() -> Self {
        Self
    }

    /// Recognised when the title or description mentions "signal" (case-insensitive).
    pub fn looks_like_signal_embed(&self, embed: &SignalEmbed) -> bool {
        let haystack = format!(
            "{} {}",
            embed.title.as_deref().unwrap_or(""),
            embed.description.as_deref().unwrap_or("")
        );
        haystack.to_ascii_uppercase().contains("SIGNAL")
    }

    pub fn parse_embed(&self, embed: &SignalEmbed) -> Option<Signal> {
        if !self.looks_like_signal_embed(embed) {
            return None;
        }

        let field = |name: &str| -> Option<&str> {
            embed
                .fields
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.as_str())
        };

        let action = Action::normalize(field("action")?)?;
        let quantity: u64 = field("quantity")?.trim().parse().ok()?;
        let symbol = field("symbol")?.trim().to_ascii_uppercase();

        let instrument_type = if field("strike").is_some()
            || field("expiration").is_some()
            || field("optionType").is_some()
        {
            InstrumentType::EquityOption
        } else {
            InstrumentType::Equity
        };

        let option_type = field("optionType").and_then(|v| match v.to_ascii_uppercase().as_str() {
            "CALL" | "C" => Some(OptionType::Call),
            "PUT" | "P" => Some(OptionType::Put),
            _ => None,
        });

        let id = embed
            .footer
            .as_deref()
            .and_then(extract_footer_id)
            .unwrap_or_else(crate::models::next_signal_id);

        Some(Signal {
            id,
            symbol,
            action,
            quantity,
            order_type: field("orderType")
                .and_then(|v| match v.to_ascii_uppercase().as_str() {
                    "LIMIT" => Some(OrderType::Limit),
                    "MARKET" => Some(OrderType::Market),
                    _ => None,
                })
                .unwrap_or(OrderType::Market),
            price: field("price").and_then(|v| v.parse().ok()),
            instrument_type,
            strike: field("strike").and_then(|v| v.parse().ok()),
            expiration: field("expiration").map(str::to_string),
            option_type,
            timestamp: Utc::now(),
            source: "embed".to_string(),
            take_profit_price: field("takeProfit").and_then(|v| v.parse().ok()),
            stop_loss_price: field("stopLoss").and_then(|v| v.parse().ok()),
        })
    }

    /// Matches `(signal|trade)[:\s]*(buy|sell|bto|sto|btc|stc)\s+(\d+)\s+([A-Z]+)`,
    /// case-insensitively. The marker and action may be glued with zero separator
    /// chars (`"SIGNAL:BUY"`, `"SIGNALBUY"`) or split across tokens (`"SIGNAL BUY"`).
    pub fn parse_free_text(&self, text: &str) -> Option<Signal> {
        let upper = text.to_ascii_uppercase();
        let tokens: Vec<&str> = upper.split_whitespace().collect();

        let start = tokens
            .iter()
            .position(|t| t.starts_with("SIGNAL") || t.starts_with("TRADE"))?;

        let marker_token = tokens[start];
        let marker_len = if marker_token.starts_with("SIGNAL") { 6 } else { 5 };
        let glued_remainder = marker_token[marker_len..].trim_start_matches(':');

        let (action, rest_start) = if !glued_remainder.is_empty() {
            (Action::normalize(glued_remainder)?, start + 1)
        } else {
            let action_token = tokens.get(start + 1)?.trim_start_matches(':');
            (Action::normalize(action_token)?, start + 2)
        };

        let quantity_token = tokens.get(rest_start)?;
        let quantity: u64 = quantity_token.parse().ok()?;

        let symbol_token = tokens.get(rest_start + 1)?;
        let symbol = extract_symbol(symbol_token).unwrap_or_else(|| symbol_token.to_string());

        Some(Signal {
            id: crate::models::next_signal_id(),
            symbol,
            action,
            quantity,
            order_type: OrderType::Market,
            price: None,
            instrument_type: InstrumentType::Equity,
            strike: None,
            expiration: None,
            option_type: None,
            timestamp: Utc::now(),
            source: "free_text".to_string(),
            take_profit_price: None,
            stop_loss_price: None,
        })
    }

    /// Accepts a loosely typed JSON record and dispatches to embed or free-text
    /// parsing depending on its shape, mirroring the teacher's already-deserialized
    /// API-response handling.
    pub fn parse_value(&self, value: &Value) -> Option<Signal> {
        if let Some(obj) = value.as_object() {
            if obj.contains_key("fields") || obj.contains_key("title") {
                let embed = SignalEmbed {
                    title: obj.get("title").and_then(Value::as_str).map(str::to_string),
                    description: obj
                        .get("description")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    fields: obj
                        .get("fields")
                        .and_then(Value::as_array)
                        .map(|arr| {
                            arr.iter()
                                .filter_map(|f| {
                                    let name = f.get("name")?.as_str()?.to_string();
                                    let val = f.get("value")?.as_str()?.to_string();
                                    Some((name, val))
                                })
                                .collect()
                        })
                        .unwrap_or_default(),
                    footer: obj.get("footer").and_then(Value::as_str).map(str::to_string),
                };
                return self.parse_embed(&embed);
            }
            if let Some(text) = obj.get("content").and_then(Value::as_str) {
                return self.parse_free_text(text);
            }
        }
        if let Some(text) = value.as_str() {
            return self.parse_free_text(text);
        }
        None
    }
}

impl Default for SignalParser {
    fn default() -> Self {
        Self::new()
    }
}

fn extract_footer_id(footer: &str) -> Option<String> {
    footer
        .split("ID:")
        .nth(1)
        .map(|rest| rest.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// First contiguous run of 1-5 uppercase letters.
fn extract_symbol(token: &str) -> Option<String> {
    let mut best: Option<String> = None;
    let mut current = String::new();
    for ch in token.chars() {
        if ch.is_ascii_uppercase() {
            current.push(ch);
        } else {
            if !current.is_empty() && current.len() <= 5 {
                best = Some(current.clone());
                break;
            }
            current.clear();
        }
    }
    if best.is_none() && !current.is_empty() && current.len() <= 5 {
        best = Some(current);
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_free_text_signal() {
        let parser = SignalParser::new();
        let signal = parser.parse_free_text("Signal: buy 10 AAPL").unwrap();
        assert_eq!(signal.symbol, "AAPL");
        assert_eq!(signal.quantity, 10);
        assert_eq!(signal.action, Action::BuyToOpen);
    }

    #[test]
    fn parses_trade_prefix_with_btc_alias() {
        let parser = SignalParser::new();
        let signal = parser.parse_free_text("trade BTC 5 TSLA").unwrap();
        assert_eq!(signal.action, Action::BuyToClose);
        assert_eq!(signal.symbol, "TSLA");
    }

    #[test]
    fn parses_free_text_with_action_glued_to_the_marker() {
        let parser = SignalParser::new();
        let signal = parser.parse_free_text("SIGNAL:BUY 10 AAPL").unwrap();
        assert_eq!(signal.symbol, "AAPL");
        assert_eq!(signal.quantity, 10);
        assert_eq!(signal.action, Action::BuyToOpen);
    }

    #[test]
    fn rejects_text_without_signal_or_trade_prefix() {
        let parser = SignalParser::new();
        assert!(parser.parse_free_text("just chatting here").is_none());
    }

    #[test]
    fn embed_requires_signal_marker_in_title_or_description() {
        let parser = SignalParser::new();
        let embed = SignalEmbed {
            title: Some("Daily recap".to_string()),
            description: None,
            fields: vec![
                ("action".to_string(), "BUY".to_string()),
                ("quantity".to_string(), "3".to_string()),
                ("symbol".to_string(), "MSFT".to_string()),
            ],
            footer: None,
        };
        assert!(parser.parse_embed(&embed).is_none());
    }

    #[test]
    fn embed_extracts_option_fields_and_footer_id() {
        let parser = SignalParser::new();
        let embed = SignalEmbed {
            title: Some("New SIGNAL".to_string()),
            description: None,
            fields: vec![
                ("action".to_string(), "BUY".to_string()),
                ("quantity".to_string(), "2".to_string()),
                ("symbol".to_string(), "SPY".to_string()),
                ("strike".to_string(), "664".to_string()),
                ("expiration".to_string(), "2025-11-28".to_string()),
                ("optionType".to_string(), "PUT".to_string()),
            ],
            footer: Some("Source: coach | ID: abc123".to_string()),
        };
        let signal = parser.parse_embed(&embed).unwrap();
        assert_eq!(signal.id, "abc123");
        assert_eq!(signal.instrument_type, InstrumentType::EquityOption);
        assert_eq!(signal.option_type, Some(OptionType::Put));
        assert_eq!(signal.strike, Some(664.0));
    }

    #[test]
    fn embed_extracts_bracket_exit_prices() {
        let parser = SignalParser::new();
        let embed = SignalEmbed {
            title: Some("New SIGNAL".to_string()),
            description: None,
            fields: vec![
                ("action".to_string(), "BUY".to_string()),
                ("quantity".to_string(), "10".to_string()),
                ("symbol".to_string(), "AAPL".to_string()),
                ("takeProfit".to_string(), "210.50".to_string()),
                ("stopLoss".to_string(), "190.00".to_string()),
            ],
            footer: None,
        };
        let signal = parser.parse_embed(&embed).unwrap();
        assert_eq!(signal.take_profit_price, Some(210.50));
        assert_eq!(signal.stop_loss_price, Some(190.00));
    }

    #[test]
    fn symbol_extraction_takes_first_short_uppercase_run() {
        assert_eq!(extract_symbol("AAPL210C"), Some("AAPL".to_string()));
        assert_eq!(extract_symbol("TOOLONGTOKEN"), None);
    }
}
