//! Loopback exercise of `UdpTransport`: a reliable send must arrive exactly
//! once and in order even under duplicate retransmits; an unreliable send
//! must arrive at all on a healthy local link.

use std::net::SocketAddr;
use std::time::Duration;

use pickaxe_protocol::{ConnectionStatus, Reliability, Transport, UdpTransport};

async fn bind_loopback() -> UdpTransport {
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    UdpTransport::bind(addr).await.expect("bind loopback transport")
}

#[tokio::test]
async fn reliable_send_is_delivered_in_order() {
    let server = bind_loopback().await;
    let client = bind_loopback().await;
    let server_addr = server.local_addr();

    client.send(server_addr, b"one", Reliability::Reliable).await.unwrap();
    client.send(server_addr, b"two", Reliability::Reliable).await.unwrap();
    client.send(server_addr, b"three", Reliability::Reliable).await.unwrap();

    let (_, first) = tokio::time::timeout(Duration::from_secs(2), server.recv())
        .await
        .expect("timed out waiting for first message")
        .expect("channel closed");
    let (_, second) = tokio::time::timeout(Duration::from_secs(2), server.recv())
        .await
        .expect("timed out waiting for second message")
        .expect("channel closed");
    let (_, third) = tokio::time::timeout(Duration::from_secs(2), server.recv())
        .await
        .expect("timed out waiting for third message")
        .expect("channel closed");

    assert_eq!(first, b"one");
    assert_eq!(second, b"two");
    assert_eq!(third, b"three");
}

#[tokio::test]
async fn unreliable_send_arrives_on_healthy_link() {
    let server = bind_loopback().await;
    let client = bind_loopback().await;
    let server_addr = server.local_addr();

    client
        .send(server_addr, b"position-update", Reliability::UnreliableNoDelay)
        .await
        .unwrap();

    let (_, payload) = tokio::time::timeout(Duration::from_secs(2), server.recv())
        .await
        .expect("timed out waiting for unreliable message")
        .expect("channel closed");
    assert_eq!(payload, b"position-update");
}

#[tokio::test]
async fn first_datagram_from_a_peer_reports_connecting_then_connected() {
    let server = bind_loopback().await;
    let client = bind_loopback().await;
    let server_addr = server.local_addr();

    client.send(server_addr, b"hello", Reliability::Reliable).await.unwrap();

    let (_, status_one) = tokio::time::timeout(Duration::from_secs(2), server.recv_status())
        .await
        .expect("timed out waiting for connecting status")
        .expect("channel closed");
    let (_, status_two) = tokio::time::timeout(Duration::from_secs(2), server.recv_status())
        .await
        .expect("timed out waiting for connected status")
        .expect("channel closed");

    assert_eq!(status_one, ConnectionStatus::Connecting);
    assert_eq!(status_two, ConnectionStatus::Connected);
}
