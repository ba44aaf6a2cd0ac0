pub mod config;
pub mod crypto;
pub mod database;
pub mod entity;
pub mod run_state;

pub use config::Config;
pub use crypto::{ApiCredentials, CredentialCipher};
pub use database::get_db_connection;
pub use run_state::RunState;
