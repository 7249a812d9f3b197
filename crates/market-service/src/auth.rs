//! Bearer-token authentication for API handlers.

use crate::apis::to_api_error;
use crate::server::AppState;
use axum::{
	extract::FromRequestParts,
	http::{header::AUTHORIZATION, request::Parts},
};
use market_types::{APIError, Caller};

/// The verified caller of a request. Handlers that take this extractor
/// reject requests without a valid `Authorization: Bearer <token>` header
/// with 401 before running.
#[derive(Debug, Clone)]
pub struct Authenticated(pub Caller);

impl FromRequestParts<AppState> for Authenticated {
	type Rejection = APIError;

	async fn from_request_parts(
		parts: &mut Parts,
		state: &AppState,
	) -> Result<Self, Self::Rejection> {
		let token = parts
			.headers
			.get(AUTHORIZATION)
			.and_then(|value| value.to_str().ok())
			.and_then(|header| header.strip_prefix("Bearer "))
			.map(str::trim)
			.filter(|token| !token.is_empty());

		let Some(token) = token else {
			tracing::warn!(uri = %parts.uri, "Missing bearer token");
			return Err(APIError::Unauthorized {
				message: "Unauthorized".into(),
			});
		};

		let caller = state
			.engine
			.authenticate(token)
			.await
			.map_err(|e| to_api_error("authenticate", e))?;
		tracing::debug!(user_id = %caller.id, "Authenticated");
		Ok(Authenticated(caller))
	}
}
