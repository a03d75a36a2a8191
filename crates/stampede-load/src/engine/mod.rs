pub mod collector;
pub mod driver;
pub mod pool;
pub mod stamp;
pub mod transport;
