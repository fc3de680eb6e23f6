pub mod archive;
pub mod database;
pub mod error;
pub mod schema;

pub use archive::MessageArchive;
pub use database::Database;
pub use error::StoreError;
