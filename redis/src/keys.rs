//! Redis key layout.
//!
//! | Key | Type | Lifetime |
//! |---|---|---|
//! | `stock:{item}` | integer counter | until the sale is torn down |
//! | `user:product:{client}:{item}` | marker (`1`) | until compensation removes it |
//! | `ratelimit:user:{client}:product:{item}` | integer counter | one rate-limit window |

use flash_sale_core::{ClientId, ItemId};

/// Reservation counter for an item.
#[must_use]
pub fn stock_key(item_id: ItemId) -> String {
    format!("stock:{item_id}")
}

/// Purchase marker for a `(client, item)` pair.
#[must_use]
pub fn purchase_marker_key(client_id: ClientId, item_id: ItemId) -> String {
    format!("user:product:{client_id}:{item_id}")
}

/// Fixed-window request counter for a `(client, item)` pair.
#[must_use]
pub fn rate_limit_key(client_id: ClientId, item_id: ItemId) -> String {
    format!("ratelimit:user:{client_id}:product:{item_id}")
}
