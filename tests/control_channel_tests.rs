//! Control-channel endpoints over a scratch runtime directory

use std::time::Duration;

use hermod::{
    channel::{broker_socket_path, client_socket_path, ChannelEndpoint, MAX_FRAME_BYTES},
    ControlRequest, ControlResponse,
};

#[test]
fn test_datagram_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let broker = ChannelEndpoint::bind(broker_socket_path(dir.path())).unwrap();
    let client = ChannelEndpoint::bind(client_socket_path(dir.path(), "worker")).unwrap();
    broker.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    client.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

    let request = ControlRequest::Keepalive {
        name: "worker".to_string(),
        session: 7,
    };
    client.send_to(&request.encode(), broker.path()).unwrap();

    let (frame, sender) = broker.recv().unwrap().expect("datagram pending");
    assert_eq!(ControlRequest::decode(&frame).unwrap(), request);
    assert_eq!(sender.as_deref(), Some(client.path()));

    let response = ControlResponse::PortAck { port_id: 3 };
    broker.send_to(&response.encode(), client.path()).unwrap();
    let (frame, _) = client.recv().unwrap().unwrap();
    assert_eq!(ControlResponse::decode(&frame).unwrap(), response);
}

#[test]
fn test_nonblocking_recv_returns_none() {
    let dir = tempfile::tempdir().unwrap();
    let broker = ChannelEndpoint::bind(broker_socket_path(dir.path())).unwrap();
    broker.set_nonblocking(true).unwrap();

    assert!(broker.recv().unwrap().is_none());
}

#[test]
fn test_oversized_frame_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let broker = ChannelEndpoint::bind(broker_socket_path(dir.path())).unwrap();

    let oversized = "x".repeat(MAX_FRAME_BYTES + 1);
    assert!(broker.send_to(&oversized, broker.path()).is_err());
}

#[test]
fn test_stale_socket_file_is_replaced() {
    let dir = tempfile::tempdir().unwrap();
    let path = broker_socket_path(dir.path());

    {
        let _first = ChannelEndpoint::bind(path.clone()).unwrap();
    }
    // a fresh bind replaces whatever the previous daemon left behind
    let second = ChannelEndpoint::bind(path.clone()).unwrap();
    assert_eq!(second.path(), path);
}

#[test]
fn test_socket_file_removed_on_drop() {
    let dir = tempfile::tempdir().unwrap();
    let path = broker_socket_path(dir.path());
    {
        let _endpoint = ChannelEndpoint::bind(path.clone()).unwrap();
        assert!(path.exists());
    }
    assert!(!path.exists());
}
