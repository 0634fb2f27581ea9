pub mod packet;
pub mod transport;

pub use packet::{Endpoint, PacketFactory};
pub use transport::RawTransport;
