//! Control channel between the daemon and its clients

pub mod message;
pub mod transport;

pub use message::{ControlRequest, ControlResponse, MAX_FRAME_BYTES};
pub use transport::{
    broker_socket_path, client_socket_path, name_from_socket_path, ChannelEndpoint,
};
