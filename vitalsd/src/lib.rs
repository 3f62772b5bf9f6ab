pub mod collectors;
pub mod config;
pub mod health;
pub mod http;
pub mod models;
pub mod patterns;
pub mod pipeline;
pub mod ring;
pub mod scheduler;
pub mod store;

pub use config::Config;
pub use health::Health;
pub use models::Snapshot;
pub use ring::RingBuffer;
pub use store::Store;
