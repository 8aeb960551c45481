//! UDP transport: one datagram per frame with a fixed binary header.
//!
//! Fire-and-forget. Bad datagrams are dropped without any reply and no
//! retransmission is ever requested.

pub mod decoder;
pub mod packet;

pub use decoder::UdpPacketDecoder;
pub use packet::{encode_packet, PacketRejected, UdpPacket, UdpPacketHeader, HEADER_LEN};

use std::io;
use std::net::UdpSocket;

use tracing::info;

use crate::config::UdpConfig;

/// Slack added to the receive buffer beyond the largest valid datagram.
const DATAGRAM_SLACK: usize = 100;

/// Bind the listening socket with the configured receive timeout.
pub fn bind_socket(config: &UdpConfig) -> io::Result<UdpSocket> {
    let socket = UdpSocket::bind(config.bind_target())?;
    socket.set_read_timeout(Some(config.recv_timeout()))?;
    info!("Listening for UDP on {}", socket.local_addr()?);
    Ok(socket)
}

/// Receive buffer size for a sensor of `pixel_count` pixels.
pub fn datagram_capacity(pixel_count: usize) -> usize {
    HEADER_LEN + pixel_count * 2 + DATAGRAM_SLACK
}
