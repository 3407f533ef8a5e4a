use validator::Validate;

use crate::api::errors::ApiError;

/// Runs the derive-generated validation of a request payload and folds the
/// failures into a single bad-request message, field by field.
pub(crate) fn validate_payload<T: Validate>(payload: &T) -> Result<(), ApiError> {
    payload.validate().map_err(|errors| {
        let mut parts: Vec<String> = errors
            .field_errors()
            .into_iter()
            .flat_map(|(field, field_errors)| {
                field_errors.iter().map(move |error| {
                    match error.message.as_deref() {
                        Some(message) => format!("{field}: {message}"),
                        None => format!("{field}: invalid value"),
                    }
                })
            })
            .collect();
        parts.sort();
        if parts.is_empty() {
            // Nested list/struct failures are not flattened by field_errors.
            return ApiError::BadRequest(errors.to_string());
        }
        ApiError::BadRequest(parts.join("; "))
    })
}
