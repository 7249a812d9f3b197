//! Common types module for the campus market service.
//!
//! This module defines the core data types shared by every crate in the
//! workspace: marketplace records (orders, stores, products, chat messages),
//! HTTP request/response shapes, storage namespaces, and the events passed
//! over the internal event bus.

/// Identity types for verified callers.
pub mod account;
/// API types for HTTP endpoints and request/response structures.
pub mod api;
/// Store and product records read by the order flows.
pub mod catalog;
/// Chat message types.
pub mod chat;
/// Event types for inter-service communication.
pub mod events;
/// Time-ordered object identifiers.
pub mod id;
/// Order records and the order status enum.
pub mod order;
/// Self-registration trait for pluggable implementations.
pub mod registry;
/// Redacting wrapper for secrets loaded from configuration.
pub mod secret_string;
/// Storage types for managing persistent data.
pub mod storage;
/// Utility functions for display formatting.
pub mod utils;
/// Configuration validation types for ensuring type-safe configurations.
pub mod validation;

// Re-export all types for convenient access
pub use account::*;
pub use api::*;
pub use catalog::*;
pub use chat::*;
pub use events::*;
pub use id::{ObjectId, ObjectIdError};
pub use order::*;
pub use registry::ImplementationRegistry;
pub use secret_string::SecretString;
pub use storage::*;
pub use utils::truncate_id;
pub use validation::*;
