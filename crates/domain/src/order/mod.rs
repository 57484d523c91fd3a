//! Order model and related types.

mod model;
mod status;
mod value_objects;

pub use model::{Order, OrderError};
pub use status::OrderStatus;
pub use value_objects::{Money, ProductId};
