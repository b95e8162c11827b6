//! `larder-core`
//!
//! **Responsibility:** shared domain primitives.
//!
//! Identifiers and the domain error used at the boundary between the
//! forecasting engine and the restaurant application around it.

pub mod error;
pub mod id;

pub use error::{DomainError, DomainResult};
pub use id::IngredientId;
