// Input Validation
// Field-level checks applied at the edge of every store operation.
// Failures surface immediately as InvalidInput with the offending field.

use crate::errors::{StorageError, StoreResult};

/// Require a non-blank string, returning its trimmed form.
pub fn non_blank<'a>(field: &'static str, value: &'a str) -> StoreResult<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(StorageError::invalid_input(field, "must not be blank"));
    }
    Ok(trimmed)
}

/// Require a threshold inside the unit interval.
pub fn unit_interval(field: &'static str, value: f64) -> StoreResult<f64> {
    if value.is_nan() || !(0.0..=1.0).contains(&value) {
        return Err(StorageError::invalid_input(
            field,
            format!("{value} is outside [0, 1]"),
        ));
    }
    Ok(value)
}

/// Require a strictly positive limit.
pub fn positive(field: &'static str, value: usize) -> StoreResult<usize> {
    if value == 0 {
        return Err(StorageError::invalid_input(field, "must be positive"));
    }
    Ok(value)
}

/// Require a non-empty id list for batch operations.
pub fn non_empty<T>(field: &'static str, values: &[T]) -> StoreResult<()> {
    if values.is_empty() {
        return Err(StorageError::invalid_input(field, "must not be empty"));
    }
    Ok(())
}
