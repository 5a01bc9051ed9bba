pub mod device;
pub mod network;
pub mod power;
