//! Wire DTOs for the upstream market-data channel and the order
//! submission/query REST surface. All decimal quantities travel as
//! strings on the wire (§6); parsing to `f64` happens at the boundary
//! into `model.rs` types.

use serde::{Deserialize, Serialize};

fn parse_decimal(s: &str) -> f64 {
    s.parse().unwrap_or(0.0)
}

/// One level of an outbound book snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WirePriceLevel {
    pub price: String,
    pub size: String,
}

impl WirePriceLevel {
    pub fn price_f64(&self) -> f64 {
        parse_decimal(&self.price)
    }

    pub fn size_f64(&self) -> f64 {
        parse_decimal(&self.size)
    }
}

/// A full book snapshot for one token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookSnapshot {
    pub event_type: Option<String>,
    pub asset_id: String,
    pub market: Option<String>,
    pub timestamp: Option<String>,
    #[serde(default)]
    pub bids: Vec<WirePriceLevel>,
    #[serde(default)]
    pub asks: Vec<WirePriceLevel>,
    pub hash: Option<String>,
}

/// A single change inside a `price_change` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceChange {
    pub asset_id: String,
    pub price: String,
    pub size: String,
    pub side: String,
    pub hash: Option<String>,
    pub best_bid: Option<String>,
    pub best_ask: Option<String>,
}

/// A batch of incremental price updates for a market.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceChangeEvent {
    pub event_type: Option<String>,
    pub market: Option<String>,
    pub timestamp: Option<String>,
    pub price_changes: Vec<PriceChange>,
}

/// Informational last-trade notification; discarded by the book manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastTradePriceEvent {
    pub event_type: Option<String>,
    pub market: Option<String>,
    pub asset_id: String,
    pub price: String,
    pub size: String,
    pub side: Option<String>,
    pub fee_rate_bps: Option<String>,
    pub timestamp: Option<String>,
}

/// Notifies subscribers that an outcome's tick size changed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickSizeChangeEvent {
    pub event_type: Option<String>,
    pub asset_id: String,
    pub market: Option<String>,
    pub old_tick_size: String,
    pub new_tick_size: String,
}

/// Decoded shape of any server->client frame, in the fixed decode order
/// the stream connection attempts (§4.2, §9 "Dynamic message dispatch").
#[derive(Debug, Clone)]
pub enum InboundMessage {
    BookBatch(Vec<BookSnapshot>),
    Book(BookSnapshot),
    PriceChange(PriceChangeEvent),
    LastTrade(LastTradePriceEvent),
    TickSizeChange(TickSizeChangeEvent),
    Heartbeat,
    Unknown(String),
}

/// Outbound initial-subscription frame: `{assets_ids, type:"market"}`.
#[derive(Debug, Clone, Serialize)]
pub struct InitialSubscribe {
    pub assets_ids: Vec<String>,
    #[serde(rename = "type")]
    pub kind: &'static str,
}

impl InitialSubscribe {
    pub fn new(assets_ids: Vec<String>) -> Self {
        Self { assets_ids, kind: "market" }
    }
}

/// Outbound incremental subscribe/unsubscribe frame:
/// `{assets_ids, operation:"subscribe"|"unsubscribe"}`.
#[derive(Debug, Clone, Serialize)]
pub struct OperationFrame {
    pub assets_ids: Vec<String>,
    pub operation: &'static str,
}

impl OperationFrame {
    pub fn subscribe(assets_ids: Vec<String>) -> Self {
        Self { assets_ids, operation: "subscribe" }
    }

    pub fn unsubscribe(assets_ids: Vec<String>) -> Self {
        Self { assets_ids, operation: "unsubscribe" }
    }
}

/// One leg of a batch order submission request.
#[derive(Debug, Clone, Serialize)]
pub struct OrderEnvelope {
    pub order: SignedOrderWire,
    pub owner: String,
    #[serde(rename = "orderType")]
    pub order_type: &'static str,
}

/// Wire shape of a signed EIP-712 order.
#[derive(Debug, Clone, Serialize)]
pub struct SignedOrderWire {
    pub salt: i64,
    pub maker: String,
    pub signer: String,
    pub taker: String,
    #[serde(rename = "tokenId")]
    pub token_id: String,
    #[serde(rename = "makerAmount")]
    pub maker_amount: String,
    #[serde(rename = "takerAmount")]
    pub taker_amount: String,
    pub side: &'static str,
    pub expiration: String,
    pub nonce: String,
    #[serde(rename = "feeRateBps")]
    pub fee_rate_bps: String,
    #[serde(rename = "signatureType")]
    pub signature_type: i32,
    pub signature: String,
}

/// One leg of the batch order submission response.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderSubmissionResult {
    pub success: bool,
    #[serde(rename = "errorMsg")]
    pub error_msg: Option<String>,
    #[serde(rename = "orderId")]
    pub order_id: Option<String>,
    #[serde(rename = "orderHashes", default)]
    pub order_hashes: Vec<String>,
    pub status: Option<String>,
    #[serde(rename = "takingAmount")]
    pub taking_amount: Option<String>,
    #[serde(rename = "makingAmount")]
    pub making_amount: Option<String>,
}

/// Response to a per-order status query.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderQueryResponse {
    #[serde(rename = "orderID")]
    pub order_id: String,
    pub status: String,
    pub asset_id: Option<String>,
    pub price: Option<String>,
    pub original_size: Option<String>,
    pub size_matched: Option<String>,
    pub side: Option<String>,
    #[serde(rename = "type")]
    pub order_type: Option<String>,
    pub market: Option<String>,
    pub outcome: Option<String>,
    pub maker_address: Option<String>,
}

impl OrderQueryResponse {
    pub fn filled_f64(&self) -> f64 {
        self.size_matched.as_deref().map(parse_decimal).unwrap_or(0.0)
    }

    pub fn price_f64(&self) -> f64 {
        self.price.as_deref().map(parse_decimal).unwrap_or(0.0)
    }
}

/// Attempts the fixed-order decode described in §4.2 / §9.
pub fn decode_inbound(text: &str) -> InboundMessage {
    let trimmed = text.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("pong") {
        return InboundMessage::Heartbeat;
    }

    let value: serde_json::Value = match serde_json::from_str(trimmed) {
        Ok(v) => v,
        Err(_) => return InboundMessage::Unknown(text.to_string()),
    };

    if let serde_json::Value::Array(items) = &value {
        if items.is_empty() {
            return InboundMessage::Heartbeat;
        }
        if let Ok(batch) = serde_json::from_value::<Vec<BookSnapshot>>(value.clone()) {
            return InboundMessage::BookBatch(batch);
        }
        return InboundMessage::Unknown(text.to_string());
    }

    let event_type = value.get("event_type").and_then(|v| v.as_str()).unwrap_or("");
    match event_type {
        "book" => {
            if let Ok(snap) = serde_json::from_value::<BookSnapshot>(value) {
                return InboundMessage::Book(snap);
            }
        }
        "price_change" => {
            if let Ok(ev) = serde_json::from_value::<PriceChangeEvent>(value) {
                return InboundMessage::PriceChange(ev);
            }
        }
        "last_trade_price" => {
            if let Ok(ev) = serde_json::from_value::<LastTradePriceEvent>(value) {
                return InboundMessage::LastTrade(ev);
            }
        }
        "tick_size_change" => {
            if let Ok(ev) = serde_json::from_value::<TickSizeChangeEvent>(value) {
                return InboundMessage::TickSizeChange(ev);
            }
        }
        _ => {}
    }

    InboundMessage::Unknown(text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_book_batch() {
        let text = r#"[{"event_type":"book","asset_id":"A","bids":[{"price":"0.5","size":"10"}],"asks":[{"price":"0.6","size":"10"}]}]"#;
        match decode_inbound(text) {
            InboundMessage::BookBatch(v) => assert_eq!(v.len(), 1),
            other => panic!("unexpected decode: {other:?}"),
        }
    }

    #[test]
    fn decodes_single_book() {
        let text = r#"{"event_type":"book","asset_id":"A","bids":[],"asks":[]}"#;
        assert!(matches!(decode_inbound(text), InboundMessage::Book(_)));
    }

    #[test]
    fn decodes_price_change() {
        let text = r#"{"event_type":"price_change","market":"m","price_changes":[{"asset_id":"A","price":"0.5","size":"0","side":"BUY"}]}"#;
        assert!(matches!(decode_inbound(text), InboundMessage::PriceChange(_)));
    }

    #[test]
    fn decodes_heartbeat() {
        assert!(matches!(decode_inbound("[]"), InboundMessage::Heartbeat));
        assert!(matches!(decode_inbound(""), InboundMessage::Heartbeat));
    }

    #[test]
    fn falls_back_to_unknown() {
        assert!(matches!(decode_inbound("not json"), InboundMessage::Unknown(_)));
    }
}
