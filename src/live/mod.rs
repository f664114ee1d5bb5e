pub mod connection;
pub mod protocol;
pub mod state;

pub use connection::*;
pub use protocol::*;
pub use state::*;
