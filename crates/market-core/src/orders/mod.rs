//! Order placement and order queries.
//!
//! Placement prices every line from the current product records, checks and
//! reserves stock with compare-and-swap writes, and stores the order as
//! `pending`. Any reservation already made is given back if a later step
//! fails.

use crate::engine::event_bus::EventBus;
use crate::participants::{ParticipantResolver, ResolveError};
use chrono::Utc;
use market_storage::{StorageError, StorageService, Versioned};
use market_types::{
	truncate_id, Caller, MarketEvent, ObjectId, Order, OrderEvent, OrderItem, OrderStatus,
	PlaceOrderRequest, Product, StorageKey, Store,
};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::instrument;

#[derive(Debug, Error)]
pub enum PlacementError {
	#[error("Missing order details")]
	MissingDetails,
	#[error("Invalid store ID")]
	InvalidStoreId,
	#[error("Invalid product ID")]
	InvalidProductId,
	#[error("Invalid order ID")]
	InvalidOrderId,
	#[error("Quantity must be at least 1")]
	InvalidQuantity,
	#[error("Store not found")]
	StoreNotFound,
	#[error("Product not found")]
	ProductNotFound,
	#[error("Order not found")]
	OrderNotFound,
	#[error("Product does not belong to this store")]
	ForeignProduct,
	#[error("Insufficient stock for {0}")]
	InsufficientStock(String),
	#[error("Invalid price for {0}")]
	InvalidPrice(String),
	#[error("Total amount does not match current prices")]
	TotalMismatch,
	#[error("Forbidden")]
	Forbidden,
	#[error("Stock was modified concurrently")]
	Conflict,
	#[error("Storage error: {0}")]
	Storage(String),
}

impl From<ResolveError> for PlacementError {
	fn from(err: ResolveError) -> Self {
		match err {
			ResolveError::OrderNotFound => PlacementError::OrderNotFound,
			ResolveError::Storage(detail) => PlacementError::Storage(detail),
		}
	}
}

/// A requested line after its product has been loaded and checked.
struct PricedLine {
	product: Product,
	quantity: u32,
}

/// Places orders and answers order queries for buyers and sellers.
pub struct OrderService {
	storage: Arc<StorageService>,
	resolver: ParticipantResolver,
	event_bus: EventBus,
	write_attempts: u32,
}

impl OrderService {
	/// `write_attempts` bounds the compare-and-swap retries per stock update.
	pub fn new(storage: Arc<StorageService>, event_bus: EventBus, write_attempts: u32) -> Self {
		Self {
			resolver: ParticipantResolver::new(storage.clone()),
			storage,
			event_bus,
			write_attempts: write_attempts.max(1),
		}
	}

	/// Places an order from `caller` against one store.
	#[instrument(skip_all, fields(store_id = %truncate_id(&request.store_id)))]
	pub async fn place_order(
		&self,
		caller: &Caller,
		request: PlaceOrderRequest,
	) -> Result<Order, PlacementError> {
		if request.store_id.is_empty() || request.items.is_empty() {
			return Err(PlacementError::MissingDetails);
		}
		let store_id: ObjectId = request
			.store_id
			.parse()
			.map_err(|_| PlacementError::InvalidStoreId)?;
		let store: Store = self
			.load(StorageKey::Stores, &store_id)
			.await?
			.ok_or(PlacementError::StoreNotFound)?;

		let mut lines = Vec::with_capacity(request.items.len());
		let mut total = Decimal::ZERO;
		for item in &request.items {
			if item.quantity < 1 {
				return Err(PlacementError::InvalidQuantity);
			}
			let product_id: ObjectId = item
				.product_id
				.parse()
				.map_err(|_| PlacementError::InvalidProductId)?;
			let product: Product = self
				.load(StorageKey::Products, &product_id)
				.await?
				.ok_or(PlacementError::ProductNotFound)?;
			if product.store_id != store.id {
				return Err(PlacementError::ForeignProduct);
			}
			if product.stock < item.quantity {
				return Err(PlacementError::InsufficientStock(product.name));
			}
			total = Decimal::from_str(product.price.trim())
				.ok()
				.and_then(|price| price.checked_mul(Decimal::from(item.quantity)))
				.and_then(|line_total| total.checked_add(line_total))
				.ok_or_else(|| PlacementError::InvalidPrice(product.name.clone()))?;
			lines.push(PricedLine {
				product,
				quantity: item.quantity,
			});
		}

		if let Some(submitted) = request.total_amount {
			if submitted.round_dp(2) != total.round_dp(2) {
				tracing::warn!(%submitted, computed = %total, "Client total rejected");
				return Err(PlacementError::TotalMismatch);
			}
		}

		let mut reserved: Vec<(ObjectId, u32)> = Vec::with_capacity(lines.len());
		for line in &lines {
			if let Err(e) = self.take_stock(&line.product.id, line.quantity).await {
				self.release_stock(&reserved).await;
				return Err(e);
			}
			reserved.push((line.product.id, line.quantity));
		}

		let now = Utc::now();
		let order = Order {
			id: ObjectId::new(),
			buyer_id: caller.id.clone(),
			buyer_name: caller.name.clone(),
			store_id: store.id,
			items: lines
				.into_iter()
				.map(|line| OrderItem {
					product_id: line.product.id,
					name: line.product.name,
					price: line.product.price,
					quantity: line.quantity,
					image: line.product.image,
				})
				.collect(),
			total_amount: total,
			status: OrderStatus::Pending,
			created_at: now,
			updated_at: now,
		};

		if let Err(e) = self
			.storage
			.store(StorageKey::Orders.as_str(), &order.id.to_hex(), &order)
			.await
		{
			self.release_stock(&reserved).await;
			return Err(PlacementError::Storage(e.to_string()));
		}

		tracing::info!(order_id = %truncate_id(&order.id.to_hex()), total = %order.total_amount, "Order placed");
		self.event_bus.publish(MarketEvent::Order(OrderEvent::Placed {
			order_id: order.id,
			store_id: order.store_id,
			buyer_id: order.buyer_id.clone(),
		}));
		Ok(order)
	}

	/// Orders placed by `caller`, newest first.
	pub async fn list_buyer_orders(&self, caller: &Caller) -> Result<Vec<Order>, PlacementError> {
		let mut orders = self.all_orders().await?;
		orders.retain(|order| order.is_buyer(&caller.id));
		newest_first(&mut orders);
		Ok(orders)
	}

	/// Orders placed with a store, newest first. Only the store owner may list them.
	pub async fn list_store_orders(
		&self,
		caller: &Caller,
		store_id: &str,
	) -> Result<Vec<Order>, PlacementError> {
		let store_id: ObjectId = store_id
			.parse()
			.map_err(|_| PlacementError::InvalidStoreId)?;
		let store: Store = self
			.load(StorageKey::Stores, &store_id)
			.await?
			.ok_or(PlacementError::StoreNotFound)?;
		if !store.is_owner(&caller.id) {
			return Err(PlacementError::Forbidden);
		}

		let mut orders = self.all_orders().await?;
		orders.retain(|order| order.store_id == store.id);
		newest_first(&mut orders);
		Ok(orders)
	}

	/// A single order, visible to its buyer and the store's seller.
	pub async fn get_order(&self, caller: &Caller, order_id: &str) -> Result<Order, PlacementError> {
		let order_id: ObjectId = order_id
			.parse()
			.map_err(|_| PlacementError::InvalidOrderId)?;
		let resolved = self.resolver.resolve(&order_id, &caller.id).await?;
		if !resolved.participant.is_participant() {
			return Err(PlacementError::Forbidden);
		}
		Ok(resolved.order)
	}

	async fn all_orders(&self) -> Result<Vec<Order>, PlacementError> {
		self.storage
			.retrieve_all(StorageKey::Orders.as_str())
			.await
			.map_err(|e| PlacementError::Storage(e.to_string()))
	}

	async fn load<T: DeserializeOwned>(
		&self,
		namespace: StorageKey,
		id: &ObjectId,
	) -> Result<Option<T>, PlacementError> {
		match self.storage.retrieve(namespace.as_str(), &id.to_hex()).await {
			Ok(value) => Ok(Some(value)),
			Err(StorageError::NotFound) => Ok(None),
			Err(e) => Err(PlacementError::Storage(e.to_string())),
		}
	}

	async fn take_stock(&self, product_id: &ObjectId, quantity: u32) -> Result<(), PlacementError> {
		self.update_stock(product_id, |product| {
			product
				.stock
				.checked_sub(quantity)
				.ok_or_else(|| PlacementError::InsufficientStock(product.name.clone()))
		})
		.await
	}

	/// Gives back reserved stock. Failures are logged, not returned: the
	/// caller is already failing with the error that triggered the release.
	async fn release_stock(&self, reserved: &[(ObjectId, u32)]) {
		for (product_id, quantity) in reserved {
			let result = self
				.update_stock(product_id, |product| Ok(product.stock.saturating_add(*quantity)))
				.await;
			if let Err(e) = result {
				tracing::error!(
					product_id = %truncate_id(&product_id.to_hex()),
					quantity,
					error = %e,
					"Failed to restore stock"
				);
			}
		}
	}

	/// Rewrites a product's stock with compare-and-swap, re-reading on conflict.
	async fn update_stock<F>(&self, product_id: &ObjectId, next_stock: F) -> Result<(), PlacementError>
	where
		F: Fn(&Product) -> Result<u32, PlacementError>,
	{
		for _ in 0..self.write_attempts {
			let current: Versioned<Product> = self
				.storage
				.retrieve_versioned(StorageKey::Products.as_str(), &product_id.to_hex())
				.await
				.map_err(|e| match e {
					StorageError::NotFound => PlacementError::ProductNotFound,
					other => PlacementError::Storage(other.to_string()),
				})?;
			let mut updated = current.value.clone();
			updated.stock = next_stock(&current.value)?;

			let swapped = self
				.storage
				.compare_and_swap(
					StorageKey::Products.as_str(),
					&product_id.to_hex(),
					&current.raw,
					&updated,
				)
				.await
				.map_err(|e| PlacementError::Storage(e.to_string()))?;
			if swapped {
				return Ok(());
			}
		}
		Err(PlacementError::Conflict)
	}
}

fn newest_first(orders: &mut [Order]) {
	orders.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::test_support::Fixture;
	use market_types::PlaceOrderItem;
	use serde_json::json;

	fn buyer() -> Caller {
		Caller::new("buyer-1", "Asha")
	}

	fn service(fx: &Fixture) -> OrderService {
		OrderService::new(fx.storage.clone(), EventBus::default(), 3)
	}

	fn request(store: &ObjectId, items: &[(&ObjectId, u32)], total: Option<&str>) -> PlaceOrderRequest {
		PlaceOrderRequest {
			store_id: store.to_hex(),
			items: items
				.iter()
				.map(|(product, quantity)| PlaceOrderItem {
					product_id: product.to_hex(),
					quantity: *quantity,
				})
				.collect(),
			total_amount: total.map(|t| Decimal::from_str(t).unwrap()),
		}
	}

	#[tokio::test]
	async fn test_place_order() {
		let fx = Fixture::new().await;
		let bus = EventBus::default();
		let mut events = bus.subscribe();
		let orders = OrderService::new(fx.storage.clone(), bus, 3);

		let order = orders
			.place_order(
				&buyer(),
				request(&fx.store.id, &[(&fx.product.id, 2)], Some("80")),
			)
			.await
			.unwrap();

		assert_eq!(order.status, OrderStatus::Pending);
		assert_eq!(order.buyer_id, "buyer-1");
		assert_eq!(order.buyer_name, "Asha");
		assert_eq!(order.total_amount, Decimal::from(80));
		assert_eq!(order.items[0].name, "Maggi");
		assert_eq!(order.items[0].price, "40");
		assert_eq!(fx.product_stock(&fx.product.id).await, 3);
		assert_eq!(fx.stored_order(&order.id).await, order);

		match events.recv().await.unwrap() {
			MarketEvent::Order(OrderEvent::Placed { order_id, .. }) => assert_eq!(order_id, order.id),
			other => panic!("unexpected event {:?}", other),
		}
	}

	#[tokio::test]
	async fn test_total_is_recomputed_exactly() {
		let fx = Fixture::new().await;
		let orders = service(&fx);
		let chips = fx.add_product("Chips", "19.99", 10).await;

		let order = orders
			.place_order(
				&buyer(),
				request(&fx.store.id, &[(&chips.id, 3), (&fx.product.id, 1)], None),
			)
			.await
			.unwrap();
		assert_eq!(order.total_amount, Decimal::from_str("99.97").unwrap());
	}

	#[tokio::test]
	async fn test_mismatched_client_total() {
		let fx = Fixture::new().await;
		let orders = service(&fx);

		let err = orders
			.place_order(
				&buyer(),
				request(&fx.store.id, &[(&fx.product.id, 2)], Some("1")),
			)
			.await
			.unwrap_err();
		assert!(matches!(err, PlacementError::TotalMismatch));
		assert_eq!(fx.product_stock(&fx.product.id).await, 5);
	}

	#[tokio::test]
	async fn test_rejects_bad_lines() {
		let fx = Fixture::new().await;
		let orders = service(&fx);

		let err = orders
			.place_order(&buyer(), request(&fx.store.id, &[(&fx.product.id, 6)], None))
			.await
			.unwrap_err();
		assert_eq!(err.to_string(), "Insufficient stock for Maggi");

		let err = orders
			.place_order(&buyer(), request(&fx.store.id, &[(&fx.product.id, 0)], None))
			.await
			.unwrap_err();
		assert!(matches!(err, PlacementError::InvalidQuantity));

		let err = orders
			.place_order(&buyer(), request(&fx.store.id, &[(&ObjectId::new(), 1)], None))
			.await
			.unwrap_err();
		assert!(matches!(err, PlacementError::ProductNotFound));

		let foreign = Product {
			id: ObjectId::new(),
			store_id: ObjectId::new(),
			..fx.product.clone()
		};
		fx.storage
			.store(StorageKey::Products.as_str(), &foreign.id.to_hex(), &foreign)
			.await
			.unwrap();
		let err = orders
			.place_order(&buyer(), request(&fx.store.id, &[(&foreign.id, 1)], None))
			.await
			.unwrap_err();
		assert!(matches!(err, PlacementError::ForeignProduct));

		let err = orders
			.place_order(&buyer(), request(&ObjectId::new(), &[(&fx.product.id, 1)], None))
			.await
			.unwrap_err();
		assert!(matches!(err, PlacementError::StoreNotFound));

		let err = orders
			.place_order(&buyer(), request(&fx.store.id, &[], None))
			.await
			.unwrap_err();
		assert_eq!(err.to_string(), "Missing order details");
	}

	#[tokio::test]
	async fn test_price_overflow_is_rejected() {
		let fx = Fixture::new().await;
		let orders = service(&fx);
		let huge = fx
			.add_product("Gold", "79228162514264337593543950335", 10)
			.await;

		let err = orders
			.place_order(&buyer(), request(&fx.store.id, &[(&huge.id, 2)], None))
			.await
			.unwrap_err();
		assert_eq!(err.to_string(), "Invalid price for Gold");

		// Each line fits on its own; their sum does not.
		let err = orders
			.place_order(
				&buyer(),
				request(&fx.store.id, &[(&huge.id, 1), (&fx.product.id, 1)], None),
			)
			.await
			.unwrap_err();
		assert!(matches!(err, PlacementError::InvalidPrice(_)));
		assert_eq!(fx.product_stock(&huge.id).await, 10);
		assert_eq!(fx.product_stock(&fx.product.id).await, 5);
	}

	#[tokio::test]
	async fn test_unparseable_price_is_rejected() {
		let fx = Fixture::new().await;
		let orders = service(&fx);
		let odd = fx.add_product("Samosa", "ten rupees", 3).await;

		let err = orders
			.place_order(&buyer(), request(&fx.store.id, &[(&odd.id, 1)], None))
			.await
			.unwrap_err();
		assert!(matches!(err, PlacementError::InvalidPrice(name) if name == "Samosa"));
	}

	#[tokio::test]
	async fn test_places_against_externally_written_product() {
		let fx = Fixture::new().await;
		let orders = service(&fx);
		let product_id = ObjectId::new();
		// Catalog records come from another writer: explicit nulls, extra
		// fields and a key order serde would not produce.
		fx.storage
			.store(
				StorageKey::Products.as_str(),
				&product_id.to_hex(),
				&json!({
					"stock": 5,
					"description": null,
					"__v": 0,
					"name": "Poha",
					"price": "25",
					"storeId": fx.store.id.to_hex(),
					"_id": product_id.to_hex(),
				}),
			)
			.await
			.unwrap();

		let order = orders
			.place_order(&buyer(), request(&fx.store.id, &[(&product_id, 1)], None))
			.await
			.unwrap();
		assert_eq!(order.total_amount, Decimal::from(25));
		assert_eq!(fx.product_stock(&product_id).await, 4);
	}

	#[tokio::test]
	async fn test_failed_reservation_is_released() {
		let fx = Fixture::new().await;
		let orders = service(&fx);

		// Each line alone fits the stock of 5, together they do not.
		let err = orders
			.place_order(
				&buyer(),
				request(&fx.store.id, &[(&fx.product.id, 3), (&fx.product.id, 3)], None),
			)
			.await
			.unwrap_err();
		assert!(matches!(err, PlacementError::InsufficientStock(_)));
		assert_eq!(fx.product_stock(&fx.product.id).await, 5);
	}

	#[tokio::test]
	async fn test_concurrent_orders_never_oversell() {
		let fx = Fixture::new().await;
		let orders = Arc::new(service(&fx));

		let mut handles = Vec::new();
		for _ in 0..8 {
			let orders = orders.clone();
			let req = request(&fx.store.id, &[(&fx.product.id, 1)], None);
			handles.push(tokio::spawn(async move { orders.place_order(&buyer(), req).await }));
		}
		let mut placed = 0;
		for handle in handles {
			if handle.await.unwrap().is_ok() {
				placed += 1;
			}
		}
		let remaining = fx.product_stock(&fx.product.id).await;
		assert_eq!(placed + remaining, 5);
	}

	#[tokio::test]
	async fn test_listing() {
		let fx = Fixture::new().await;
		let orders = service(&fx);
		let older = fx.order("buyer-1").await;
		let newer = fx.order("buyer-1").await;
		fx.order("buyer-2").await;

		let mine = orders.list_buyer_orders(&buyer()).await.unwrap();
		assert_eq!(
			mine.iter().map(|o| o.id).collect::<Vec<_>>(),
			vec![newer.id, older.id]
		);

		let store_orders = orders
			.list_store_orders(&fx.seller(), &fx.store.id.to_hex())
			.await
			.unwrap();
		assert_eq!(store_orders.len(), 3);
		assert!(matches!(
			orders
				.list_store_orders(&buyer(), &fx.store.id.to_hex())
				.await,
			Err(PlacementError::Forbidden)
		));
	}

	#[tokio::test]
	async fn test_get_order_is_participant_only() {
		let fx = Fixture::new().await;
		let orders = service(&fx);
		let order = fx.order("buyer-1").await;
		let id = order.id.to_hex();

		assert_eq!(orders.get_order(&buyer(), &id).await.unwrap(), order);
		assert_eq!(orders.get_order(&fx.seller(), &id).await.unwrap(), order);
		assert!(matches!(
			orders.get_order(&Caller::new("other", "x"), &id).await,
			Err(PlacementError::Forbidden)
		));
		assert!(matches!(
			orders.get_order(&buyer(), "bad").await,
			Err(PlacementError::InvalidOrderId)
		));
	}
}
