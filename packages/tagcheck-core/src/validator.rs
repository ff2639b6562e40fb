use crate::dataset::Dataset;
use crate::error::ValidatorError;
use crate::result::{ValidationResult, ValidatorDescriptor};

/// A data-quality rule over a captured dataset.
///
/// Implementations must be deterministic: the same dataset always yields the
/// same result. They never read storage, clocks, or randomness.
///
/// `Err` is reserved for internal faults. Malformed individual events are
/// reported as violations inside the returned result instead.
pub trait Validator: Send + Sync {
    fn descriptor(&self) -> ValidatorDescriptor;

    fn validate(&self, dataset: &Dataset) -> Result<ValidationResult, ValidatorError>;

    fn id(&self) -> &'static str {
        self.descriptor().id
    }
}
