pub mod database;
pub mod factory;

pub use database::Database;
pub use factory::SessionFactory;
