pub mod error;
pub mod models;
pub mod room;

pub use error::*;
pub use models::*;
pub use room::*;
