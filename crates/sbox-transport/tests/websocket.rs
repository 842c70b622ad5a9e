//! Integration tests for the WebSocket transport.
//!
//! These tests spin up a real WebSocket listener and client to verify that
//! frames flow over the network with their kind intact, and that both
//! sides notice when the other goes away.

#[cfg(feature = "websocket")]
mod websocket {
    use futures_util::{SinkExt, StreamExt};
    use sbox_transport::{
        Connection, Frame, OutboundConnection, Transport, TransportError,
        WebSocketTransport,
    };
    use tokio_tungstenite::tungstenite::Message;

    type ClientWs = tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >;

    /// Binds a transport on a random port and returns it with its address.
    async fn bind_random() -> (WebSocketTransport, String) {
        let transport = WebSocketTransport::bind("127.0.0.1:0")
            .await
            .expect("should bind");
        let addr = transport.local_addr().expect("local addr").to_string();
        (transport, addr)
    }

    async fn connect_client(addr: &str) -> ClientWs {
        let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
            .await
            .expect("client should connect");
        ws
    }

    #[tokio::test]
    async fn test_websocket_accept_and_send_receive() {
        let (mut transport, addr) = bind_random().await;

        let server_handle = tokio::spawn(async move {
            transport.accept().await.expect("should accept")
        });

        let mut client_ws = connect_client(&addr).await;
        let server_conn = server_handle.await.expect("task should complete");

        assert!(server_conn.id().into_inner() > 0);
        assert!(server_conn.is_open());

        // --- Server sends text, client receives text ---
        server_conn
            .send(Frame::Text("hello from server".into()))
            .await
            .expect("send should succeed");
        let msg = client_ws.next().await.unwrap().unwrap();
        assert!(msg.is_text());
        assert_eq!(msg.into_text().unwrap().as_str(), "hello from server");

        // --- Server sends binary, client receives binary ---
        server_conn
            .send(Frame::Binary(vec![0, 159, 146, 150]))
            .await
            .unwrap();
        let msg = client_ws.next().await.unwrap().unwrap();
        assert!(msg.is_binary());
        assert_eq!(msg.into_data().as_ref(), &[0, 159, 146, 150]);

        // --- Client sends both kinds, server keeps them apart ---
        client_ws
            .send(Message::Binary(b"bin".to_vec().into()))
            .await
            .unwrap();
        client_ws.send(Message::text("txt")).await.unwrap();

        let first = server_conn.recv().await.unwrap().unwrap();
        let second = server_conn.recv().await.unwrap().unwrap();
        assert_eq!(first, Frame::Binary(b"bin".to_vec()));
        assert_eq!(second, Frame::Text("txt".into()));

        server_conn.close().await;
        assert!(!server_conn.is_open());
    }

    #[tokio::test]
    async fn test_websocket_recv_returns_none_on_client_close() {
        let (mut transport, addr) = bind_random().await;

        let server_handle = tokio::spawn(async move {
            transport.accept().await.expect("should accept")
        });

        let mut client_ws = connect_client(&addr).await;
        let server_conn = server_handle.await.unwrap();

        client_ws.send(Message::Close(None)).await.unwrap();

        let result = server_conn.recv().await.expect("recv should not error");
        assert!(result.is_none(), "should return None on client close");
        assert!(!server_conn.is_open());
    }

    #[tokio::test]
    async fn test_send_after_close_is_rejected() {
        let (mut transport, addr) = bind_random().await;
        let server_handle = tokio::spawn(async move {
            transport.accept().await.expect("should accept")
        });
        let _client_ws = connect_client(&addr).await;
        let server_conn = server_handle.await.unwrap();

        server_conn.close().await;
        // Closing twice is fine.
        server_conn.close().await;

        let err = server_conn
            .send(Frame::Text("late".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::ConnectionClosed(_)));
    }

    #[tokio::test]
    async fn test_outbound_connect_round_trip() {
        let (mut transport, addr) = bind_random().await;
        let server_handle = tokio::spawn(async move {
            let conn = transport.accept().await.expect("should accept");
            let frame = conn.recv().await.unwrap().unwrap();
            conn.send(frame).await.unwrap();
            conn
        });

        let client = OutboundConnection::connect(&format!("ws://{addr}"))
            .await
            .expect("should connect");
        client.send_text("echo me".into()).await.unwrap();
        let echoed = client.recv().await.unwrap().unwrap();
        assert_eq!(echoed, Frame::Text("echo me".into()));

        let _server_conn = server_handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_outbound_connect_refused() {
        // Bind then drop to get a port nobody listens on.
        let (transport, addr) = bind_random().await;
        drop(transport);

        let result = OutboundConnection::connect(&format!("ws://{addr}")).await;
        assert!(matches!(result, Err(TransportError::ConnectFailed(_))));
    }

    #[tokio::test]
    async fn test_accept_tcp_returns_before_handshake() {
        let (mut transport, addr) = bind_random().await;

        // A client that connects but never sends an upgrade request.
        let silent = tokio::net::TcpStream::connect(&addr).await.unwrap();
        let pending = tokio::time::timeout(
            std::time::Duration::from_secs(2),
            transport.accept_tcp(),
        )
        .await
        .expect("accept should not wait for the handshake")
        .expect("should accept");
        assert_eq!(pending.peer_addr(), silent.local_addr().unwrap());

        // The listener is free for the next client meanwhile.
        let client = tokio::spawn({
            let addr = addr.clone();
            async move { connect_client(&addr).await }
        });
        let next = transport.accept_tcp().await.expect("should accept");
        let conn = next.handshake().await.expect("handshake should succeed");
        let _client_ws = client.await.unwrap();
        assert!(conn.is_open());

        drop(pending);
    }

    #[tokio::test]
    async fn test_handshake_rejects_non_websocket_client() {
        use tokio::io::AsyncWriteExt;

        let (mut transport, addr) = bind_random().await;
        let mut client = tokio::net::TcpStream::connect(&addr).await.unwrap();
        let pending = transport.accept_tcp().await.expect("should accept");

        client.write_all(b"hello there\r\n\r\n").await.unwrap();
        let result = pending.handshake().await;
        assert!(matches!(result, Err(TransportError::AcceptFailed(_))));
    }

    #[tokio::test]
    async fn test_bind_twice_on_same_port_fails() {
        let (_transport, addr) = bind_random().await;
        let result = WebSocketTransport::bind(&addr).await;
        assert!(matches!(result, Err(TransportError::BindFailed(_))));
    }
}
