pub mod auth;
pub mod complaint;
pub mod inquiry;

pub use auth::*;
pub use complaint::*;
pub use inquiry::*;
