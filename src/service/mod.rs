//! Services shared by controllers.

mod validation;
pub use validation::{RequestValidator, ValidationError};
