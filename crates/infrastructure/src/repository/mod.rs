pub mod codec;
pub mod conditions;
pub mod dialect;
pub mod pool;
pub mod sql_data_repository;

pub use conditions::QueryConditions;
pub use dialect::{
    BatchQueryBuilder, MySqlQueryBuilder, PostgresQueryBuilder, SqlDialect, SqliteQueryBuilder,
};
pub use pool::DataPool;
pub use sql_data_repository::SqlDataRepository;
