pub mod config;
pub mod cookie;
pub mod flash;
pub mod identity;
pub mod manager;
pub mod store;
pub mod temp;
pub mod types;


pub use config::*;
pub use cookie::*;
pub use flash::*;
pub use identity::*;
pub use manager::*;
pub use store::*;
pub use temp::*;
pub use types::*;
