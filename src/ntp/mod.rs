mod client;
mod net;
pub mod packet;

pub use client::TimeQueryClient;
pub use net::{DatagramSocket, NetError, NetworkInterface, SystemNetwork};
