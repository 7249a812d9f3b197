//! Seeded in-memory storage shared by the unit tests.

use chrono::Utc;
use market_storage::{implementations::memory::MemoryStorage, StorageService};
use market_types::{
	Caller, ObjectId, Order, OrderItem, OrderStatus, Product, StorageKey, Store,
};
use rust_decimal::Decimal;
use std::sync::Arc;

pub(crate) struct Fixture {
	pub storage: Arc<StorageService>,
	pub store: Store,
	pub product: Product,
	pub seller_id: String,
}

impl Fixture {
	/// A store owned by `seller-1` with one product: "Maggi", 40, five in stock.
	pub async fn new() -> Self {
		let storage = Arc::new(StorageService::new(Box::new(MemoryStorage::new())));
		let seller_id = "seller-1".to_string();
		let store = Store {
			id: ObjectId::new(),
			user_id: seller_id.clone(),
			name: "Night Canteen".into(),
			hostel: "H4".into(),
			floor: Some("2".into()),
		};
		storage
			.store(StorageKey::Stores.as_str(), &store.id.to_hex(), &store)
			.await
			.unwrap();

		let product = seed_product(&storage, store.id, "Maggi", "40", 5).await;
		Self {
			storage,
			store,
			product,
			seller_id,
		}
	}

	pub fn seller(&self) -> Caller {
		Caller::new(self.seller_id.clone(), "Store Owner")
	}

	pub async fn add_product(&self, name: &str, price: &str, stock: u32) -> Product {
		seed_product(&self.storage, self.store.id, name, price, stock).await
	}

	pub async fn product_stock(&self, product_id: &ObjectId) -> u32 {
		let product: Product = self
			.storage
			.retrieve(StorageKey::Products.as_str(), &product_id.to_hex())
			.await
			.unwrap();
		product.stock
	}

	pub async fn order(&self, buyer_id: &str) -> Order {
		self.order_with_status(buyer_id, OrderStatus::Pending).await
	}

	pub async fn order_with_status(&self, buyer_id: &str, status: OrderStatus) -> Order {
		let now = Utc::now();
		let order = Order {
			id: ObjectId::new(),
			buyer_id: buyer_id.into(),
			buyer_name: "Buyer".into(),
			store_id: self.store.id,
			items: vec![OrderItem {
				product_id: self.product.id,
				name: self.product.name.clone(),
				price: self.product.price.clone(),
				quantity: 2,
				image: Vec::new(),
			}],
			total_amount: Decimal::new(80, 0),
			status,
			created_at: now,
			updated_at: now,
		};
		self.storage
			.store(StorageKey::Orders.as_str(), &order.id.to_hex(), &order)
			.await
			.unwrap();
		order
	}

	pub async fn stored_order(&self, order_id: &ObjectId) -> Order {
		self.storage
			.retrieve(StorageKey::Orders.as_str(), &order_id.to_hex())
			.await
			.unwrap()
	}

	pub async fn remove_store(&self) {
		self.storage
			.remove(StorageKey::Stores.as_str(), &self.store.id.to_hex())
			.await
			.unwrap();
	}
}

async fn seed_product(
	storage: &StorageService,
	store_id: ObjectId,
	name: &str,
	price: &str,
	stock: u32,
) -> Product {
	let product = Product {
		id: ObjectId::new(),
		store_id,
		name: name.into(),
		price: price.into(),
		stock,
		image: vec!["https://img.example/p.png".into()],
		description: None,
		size: None,
	};
	storage
		.store(StorageKey::Products.as_str(), &product.id.to_hex(), &product)
		.await
		.unwrap();
	product
}
