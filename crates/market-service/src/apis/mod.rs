//! HTTP handlers, grouped by resource.

pub mod chat;
pub mod order;

use axum::extract::rejection::JsonRejection;
use axum::Json;
use market_core::MarketError;
use market_types::APIError;
use validator::{ValidationErrors, ValidationErrorsKind};

/// Converts an engine error into its HTTP form and logs it: client errors
/// at warn, server errors at error. Internal detail never reaches the body.
pub fn to_api_error(operation: &'static str, err: MarketError) -> APIError {
	match &err {
		MarketError::Internal(detail) => {
			tracing::error!(operation, error = %detail, "Request failed")
		}
		other => tracing::warn!(operation, error = %other, "Request rejected"),
	}

	match err {
		MarketError::Unauthenticated(message) => APIError::Unauthorized { message },
		MarketError::Validation(message)
		| MarketError::BadRequest(message)
		| MarketError::InvalidState(message) => APIError::BadRequest { message },
		MarketError::NotFound(message) => APIError::NotFound { message },
		MarketError::Forbidden(message) => APIError::Forbidden { message },
		MarketError::Conflict(message) => APIError::Conflict { message },
		MarketError::Internal(_) => APIError::internal(),
	}
}

/// Unwraps a JSON body, turning a parse failure into a 400 with the usual
/// `{ "message": .. }` body.
pub fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, APIError> {
	match payload {
		Ok(Json(value)) => Ok(value),
		Err(rejection) => {
			tracing::warn!(error = %rejection.body_text(), "Malformed request body");
			Err(APIError::bad_request(rejection.body_text()))
		}
	}
}

/// The first message found in a set of validation errors, nested ones included.
pub fn validation_message(errors: &ValidationErrors) -> String {
	first_message(errors).unwrap_or_else(|| "Invalid request".to_string())
}

fn first_message(errors: &ValidationErrors) -> Option<String> {
	errors.errors().values().find_map(|kind| match kind {
		ValidationErrorsKind::Field(list) => list
			.iter()
			.find_map(|error| error.message.as_ref().map(|m| m.to_string())),
		ValidationErrorsKind::Struct(inner) => first_message(inner),
		ValidationErrorsKind::List(items) => items.values().find_map(|inner| first_message(inner)),
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use market_types::{PlaceOrderItem, PlaceOrderRequest};
	use validator::Validate;

	#[test]
	fn test_error_mapping() {
		let cases = [
			(MarketError::Unauthenticated("Token expired".into()), 401),
			(MarketError::Validation("Invalid status".into()), 400),
			(MarketError::InvalidState("Order must be pending to accept".into()), 400),
			(MarketError::NotFound("Order not found".into()), 404),
			(MarketError::Forbidden("Forbidden".into()), 403),
			(MarketError::Conflict("Order was modified concurrently".into()), 409),
		];
		for (err, status) in cases {
			let message = err.to_string();
			let api = to_api_error("test", err);
			assert_eq!(api.status_code(), status);
			assert_eq!(api.message(), message);
		}

		let api = to_api_error("test", MarketError::Internal("disk on fire".into()));
		assert_eq!(api.status_code(), 500);
		assert_eq!(api.message(), "Internal Server Error");
	}

	#[test]
	fn test_nested_validation_message() {
		let request = PlaceOrderRequest {
			store_id: "65f1a2b3c4d5e6f7a8b9c0d1".into(),
			items: vec![PlaceOrderItem {
				product_id: "65f1a2b3c4d5e6f7a8b9c0d2".into(),
				quantity: 0,
			}],
			total_amount: None,
		};
		let errors = request.validate().unwrap_err();
		assert_eq!(validation_message(&errors), "Quantity must be at least 1");
	}
}
