pub mod client;
pub mod server;

pub use client::{EventStream, TestClient};
pub use server::TestServer;
