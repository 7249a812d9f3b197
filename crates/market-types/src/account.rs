//! Identity types for authenticated callers.

use serde::{Deserialize, Serialize};

/// A caller whose bearer token has been verified.
///
/// Created by the identity provider and carried through a single request.
/// Nothing in the core trusts a user id that did not arrive through this type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
	/// User id taken from the token's `id` claim.
	pub id: String,
	/// Display name taken from the token's `userName` claim.
	pub name: String,
}

impl Caller {
	pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
		Self {
			id: id.into(),
			name: name.into(),
		}
	}
}
