pub mod builder;
pub mod cache;
pub mod config;
pub mod driver;
pub mod error;
pub mod executor;
pub mod mapping;
pub mod plugin;
pub mod reflection;
pub mod scripting;
pub mod session;
pub mod type_handler;
pub mod value;

pub use crate::config::Configuration;
pub use crate::error::Error;
pub use crate::session::{SqlSession, SqlSessionFactory, SqlSessionFactoryBuilder};
pub use crate::value::Value;

pub type Result<T> = std::result::Result<T, Error>;
