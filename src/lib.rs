pub mod engine;
pub mod explain;
pub mod filter;
pub mod graph;
pub mod limits;
pub mod model;
pub mod observability;
pub mod planner;
pub mod query;
pub mod source;
pub mod store;
