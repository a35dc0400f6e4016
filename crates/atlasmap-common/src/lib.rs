pub mod quantity;
pub mod validation;

pub use quantity::{parse_quantity, CanonicalQuantity, QuantityError, QuantityFormat};
pub use validation::{validate_hostname, ValidationError, ValidationResult};
