//! `stockflow-core`: engine foundation building blocks.
//!
//! This crate contains **pure** primitives (no infrastructure concerns): typed
//! identifiers, the error model, aggregate/entity traits and the injected
//! document-number generator.

pub mod aggregate;
pub mod entity;
pub mod error;
pub mod id;
pub mod page;
pub mod sequence;
pub mod value_object;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use entity::Entity;
pub use error::{EngineError, EngineResult, ErrorKind};
pub use id::{SkuId, TransferId, UserId, WarehouseId};
pub use page::{Page, Paged};
pub use sequence::{SequenceGenerator, SnowflakeGenerator};
pub use value_object::ValueObject;
