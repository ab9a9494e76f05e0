pub mod api;
pub mod live;
pub mod server;

pub use api::AppState;
pub use server::{router, run_server};
