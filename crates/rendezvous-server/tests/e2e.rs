//! End-to-end tests over loopback sockets.

use rendezvous_core::RoomRegistry;
use rendezvous_protocol::{DataPacket, FrameCodec, Operation, Status};
use rendezvous_server::{ClientError, Config, Incoming, RoomClient, Server};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

struct Running {
    control: SocketAddr,
    data: SocketAddr,
    registry: Arc<RoomRegistry>,
    stop: oneshot::Sender<()>,
    handle: JoinHandle<anyhow::Result<()>>,
}

async fn start(config: Config) -> Running {
    let server = Server::bind(config).await.unwrap();
    let control = server.control_addr().unwrap();
    let data = server.data_addr().unwrap();
    let registry = server.registry();
    let (stop, stopped) = oneshot::channel::<()>();
    let handle = tokio::spawn(server.run_until(async {
        let _ = stopped.await;
    }));

    Running {
        control,
        data,
        registry,
        stop,
        handle,
    }
}

fn loopback_config() -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        control_port: 0,
        data_port: 0,
        ..Config::default()
    }
}

/// Wait until every member of `room` other than `token` has a data address.
async fn wait_registered(registry: &RoomRegistry, room: &str, token: &str, expected: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let peers = registry.snapshot(room, token);
            if peers.len() == expected && peers.iter().all(|p| p.addr.is_some()) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_message_reaches_other_members_only() {
    let server = start(loopback_config()).await;
    let codec = FrameCodec::default();

    let alice = RoomClient::connect(server.control, server.data, "lobby", "alice", codec)
        .await
        .unwrap();
    let bob = RoomClient::connect(server.control, server.data, "lobby", "bob", codec)
        .await
        .unwrap();
    assert_eq!(bob.room(), "lobby");
    assert_ne!(alice.token(), bob.token());

    wait_registered(&server.registry, "lobby", alice.token(), 1).await;
    wait_registered(&server.registry, "lobby", bob.token(), 1).await;

    alice.send("hello").await.unwrap();
    let incoming = tokio::time::timeout(Duration::from_secs(5), bob.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        incoming,
        Incoming::Message {
            room: "lobby".to_string(),
            sender: "alice".to_string(),
            text: "hello".to_string(),
        }
    );

    // No echo to the sender.
    assert!(
        tokio::time::timeout(Duration::from_millis(200), alice.recv())
            .await
            .is_err()
    );

    server.stop.send(()).unwrap();
    server.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_forged_token_gets_error() {
    let server = start(loopback_config()).await;
    let codec = FrameCodec::default();
    let _alice = RoomClient::connect(server.control, server.data, "lobby", "alice", codec)
        .await
        .unwrap();

    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let frame = codec
        .try_encode_data(&DataPacket::new("lobby", "forged", b"hi".to_vec()))
        .unwrap();
    socket.send_to(&frame, server.data).await.unwrap();

    let mut buf = vec![0u8; codec.frame_size()];
    let (len, from) = tokio::time::timeout(Duration::from_secs(5), socket.recv_from(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(from, server.data);
    let reply = codec.decode_control(&buf[..len]).unwrap();
    assert_eq!(reply.operation, Operation::Ack);
    assert_eq!(reply.status, Status::Failed);
    assert_eq!(reply.payload_text(), "invalid room or token");

    server.stop.send(()).unwrap();
}

#[tokio::test]
async fn test_full_room_refuses_join() {
    let mut config = loopback_config();
    config.limits.max_members_per_room = 1;
    let server = start(config).await;
    let codec = FrameCodec::default();

    let _alice = RoomClient::connect(server.control, server.data, "lobby", "alice", codec)
        .await
        .unwrap();
    let refused = RoomClient::connect(server.control, server.data, "lobby", "bob", codec).await;
    assert!(matches!(refused, Err(ClientError::Refused(_))));

    // A different room is still open.
    RoomClient::connect(server.control, server.data, "kitchen", "bob", codec)
        .await
        .unwrap();
    assert_eq!(server.registry.stats().room_count, 2);

    server.stop.send(()).unwrap();
}

#[tokio::test]
async fn test_idle_control_connection_does_not_stall_data_channel() {
    let mut config = loopback_config();
    config.limits.max_concurrent_handlers = 1;
    let server = start(config).await;
    let codec = FrameCodec::default();

    // Holds the only control slot until the request timeout.
    let _idle = tokio::net::TcpStream::connect(server.control).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let frame = codec
        .try_encode_data(&DataPacket::new("lobby", "forged", b"hi".to_vec()))
        .unwrap();
    socket.send_to(&frame, server.data).await.unwrap();

    let mut buf = vec![0u8; codec.frame_size()];
    let (len, _) = tokio::time::timeout(Duration::from_secs(2), socket.recv_from(&mut buf))
        .await
        .unwrap()
        .unwrap();
    let reply = codec.decode_control(&buf[..len]).unwrap();
    assert_eq!(reply.status, Status::Failed);

    server.stop.send(()).unwrap();
}
