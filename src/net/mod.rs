pub mod fetcher;
pub mod proxy;
pub mod retry;
pub mod transport;
