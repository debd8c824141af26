use serde::{Deserialize, Serialize};

/// A stock entry, stored MsgPack-encoded at key `<item_id>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockItem {
    /// Units on hand. Never observable below zero.
    pub stock: u32,
    /// Unit price.
    pub price: u64,
}

impl StockItem {
    pub fn new(stock: u32, price: u64) -> Self {
        Self { stock, price }
    }
}
