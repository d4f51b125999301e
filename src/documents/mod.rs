mod filter;
mod store;

pub use filter::{CompiledFilter, OrderKey, Predicate};
pub use store::DocumentStore;
