pub mod ws;

pub use ws::WsPriceFeed;
