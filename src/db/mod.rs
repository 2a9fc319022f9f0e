mod repository;
mod schema;

pub use repository::{CatalogChanges, Repository, ThreadUpdate};
