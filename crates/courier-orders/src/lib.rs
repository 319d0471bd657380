//! `courier-orders` – the order book.
//!
//! [`OrderStore`] tracks every order from registration until the delivery
//! that fulfils it completes.  It is the single source of truth for "what is
//! owed and where".  Storage is in memory only; orders do not survive a
//! restart.
//!
//! # Lifecycle
//!
//! | Status | Meaning |
//! |---|---|
//! | [`OrderStatus::Pending`] | Registered, waiting for a delivery run |
//! | [`OrderStatus::InDelivery`] | Claimed by the active delivery run |
//! | *(removed)* | Delivered; [`OrderStore::complete`] dropped the entry |
//!
//! A run that aborts puts its order back to `Pending`.
//!
//! # Example
//!
//! ```rust
//! use std::collections::BTreeMap;
//! use courier_orders::OrderStore;
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let store = OrderStore::new();
//! let items = BTreeMap::from([("omurice".to_string(), json!(2))]);
//! let id = store.register(&items, "P2").await.unwrap();
//!
//! assert_eq!(store.get(&id).await.unwrap().items["omurice"], 2);
//! store.complete(&id).await;
//! assert!(store.list().await.is_empty());
//! # }
//! ```

use std::collections::{BTreeMap, HashMap};

use chrono::Utc;
use courier_types::{DeliveryError, Order, OrderStatus};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

/// Coerce a raw quantity from a request body to a non-negative integer.
///
/// Integers are taken as-is, floats are truncated, and numeric strings are
/// parsed.  Negative, non-numeric, or missing values become `0`; values past
/// `u32::MAX` saturate.
pub fn coerce_quantity(raw: &Value) -> u32 {
    let clamp = |n: i64| u32::try_from(n.max(0)).unwrap_or(u32::MAX);
    match raw {
        Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                u32::try_from(u).unwrap_or(u32::MAX)
            } else if let Some(i) = n.as_i64() {
                clamp(i)
            } else {
                match n.as_f64() {
                    Some(f) if f.is_finite() && f > 0.0 => {
                        if f >= f64::from(u32::MAX) {
                            u32::MAX
                        } else {
                            f.trunc() as u32
                        }
                    }
                    _ => 0,
                }
            }
        }
        Value::String(s) => s.trim().parse::<i64>().map(clamp).unwrap_or(0),
        _ => 0,
    }
}

/// In-memory order book guarded by a single async read/write lock.
#[derive(Debug, Default)]
pub struct OrderStore {
    orders: RwLock<HashMap<String, Order>>,
}

impl OrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new order and return its id.
    ///
    /// Quantities are coerced with [`coerce_quantity`]; kinds that coerce to
    /// zero are dropped.
    ///
    /// # Errors
    ///
    /// [`DeliveryError::Validation`] when `destination` is blank or no item
    /// kind has a positive quantity.
    pub async fn register(
        &self,
        items: &BTreeMap<String, Value>,
        destination: &str,
    ) -> Result<String, DeliveryError> {
        let destination = destination.trim();
        if destination.is_empty() {
            return Err(DeliveryError::Validation(
                "destination is required".to_string(),
            ));
        }
        let items: BTreeMap<String, u32> = items
            .iter()
            .map(|(kind, raw)| (kind.clone(), coerce_quantity(raw)))
            .filter(|(_, qty)| *qty > 0)
            .collect();
        if items.is_empty() {
            return Err(DeliveryError::Validation(
                "at least one item is required".to_string(),
            ));
        }

        let id = Uuid::new_v4().to_string();
        let order = Order {
            id: id.clone(),
            items,
            destination: destination.to_string(),
            status: OrderStatus::Pending,
            created_at: Utc::now(),
        };
        info!(order_id = %id, destination, items = order.total_items(), "Order registered");
        self.orders.write().await.insert(id.clone(), order);
        Ok(id)
    }

    /// Fetch a copy of one order.
    pub async fn get(&self, order_id: &str) -> Result<Order, DeliveryError> {
        self.orders
            .read()
            .await
            .get(order_id)
            .cloned()
            .ok_or_else(|| DeliveryError::NotFound(order_id.to_string()))
    }

    /// Mark an order as claimed by the active delivery run.
    pub async fn mark_in_delivery(&self, order_id: &str) -> Result<(), DeliveryError> {
        self.set_status(order_id, OrderStatus::InDelivery).await
    }

    /// Return an order to the queue after an aborted run.
    pub async fn mark_pending(&self, order_id: &str) -> Result<(), DeliveryError> {
        self.set_status(order_id, OrderStatus::Pending).await
    }

    /// Remove a delivered order.  Idempotent; returns `true` when an entry
    /// was actually removed.
    pub async fn complete(&self, order_id: &str) -> bool {
        let removed = self.orders.write().await.remove(order_id).is_some();
        if removed {
            info!(order_id, "Order completed");
        } else {
            debug!(order_id, "Complete on absent order ignored");
        }
        removed
    }

    /// A point-in-time copy of every order, oldest first.
    pub async fn list(&self) -> Vec<Order> {
        let mut orders: Vec<Order> = self.orders.read().await.values().cloned().collect();
        orders.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        orders
    }

    pub async fn len(&self) -> usize {
        self.orders.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.orders.read().await.is_empty()
    }

    async fn set_status(&self, order_id: &str, status: OrderStatus) -> Result<(), DeliveryError> {
        let mut orders = self.orders.write().await;
        let order = orders
            .get_mut(order_id)
            .ok_or_else(|| DeliveryError::NotFound(order_id.to_string()))?;
        order.status = status;
        Ok(())
    }
}
