//! Self-registration trait for pluggable backends.
//!
//! Storage and identity backends each expose a `Registry` type implementing
//! [`ImplementationRegistry`], pairing the name used in configuration with a
//! factory that builds the backend from its TOML table.

/// Name and factory for one configurable implementation.
pub trait ImplementationRegistry {
	/// Key under which the implementation is configured, for example
	/// `"memory"` in `[storage.implementations.memory]` or `"jwt"` in
	/// `[account.implementations.jwt]`.
	const NAME: &'static str;

	/// Factory signature defined by the owning crate
	/// (`StorageFactory`, `IdentityFactory`).
	type Factory;

	fn factory() -> Self::Factory;
}
