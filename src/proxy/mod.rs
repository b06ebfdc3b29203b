pub mod relay;
pub mod server;

pub use server::{build_router, ProxyState};
