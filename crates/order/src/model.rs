use common::ItemLine;
use serde::{Deserialize, Serialize};

/// An order, stored MsgPack-encoded at key `<order_id>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderValue {
    /// Flips to true exactly once, on successful checkout.
    pub paid: bool,
    pub items: Vec<ItemLine>,
    pub user_id: String,
    pub total_cost: u64,
}

impl OrderValue {
    /// A fresh unpaid order with no items.
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            paid: false,
            items: Vec::new(),
            user_id: user_id.into(),
            total_cost: 0,
        }
    }

    /// Adds an item line, merging quantities when the item is already
    /// present.
    pub fn merge_item(&mut self, item_id: &str, quantity: u32) {
        if let Some((_, existing)) = self.items.iter_mut().find(|(id, _)| id == item_id) {
            *existing += quantity;
        } else {
            self.items.push((item_id.to_string(), quantity));
        }
    }
}
