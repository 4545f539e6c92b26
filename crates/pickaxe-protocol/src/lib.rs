pub mod chunk_payload;
pub mod codec;
pub mod packets;
pub mod transport;

pub use chunk_payload::{unwrap_chunk_payload, wrap_chunk_payload, ChunkInner};
pub use codec::{decode_packet, encode_packet, fnv1a32, CodecError, CodecResult};
pub use packets::{EditOpWire, Packet, PlayerSnapshotEntry};
pub use transport::{ConnectionStatus, Reliability, Transport, TransportError, UdpTransport};
