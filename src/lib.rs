pub mod config;
pub mod credentials;
pub mod dotenv;
pub mod env;
pub mod handler;
#[cfg(feature = "llm")]
pub mod llm;
