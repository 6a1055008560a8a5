//! Client and server talking over real TCP
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::task::JoinHandle;

use trickle::protocol::common::TcpStreamPair;
use trickle::protocol::{Opcode, Packet, message};
use trickle::session::{ClientSession, DownloadOutcome};
use trickle::transfer::Throttle;
use trickle::transport::{Connection, ReceivePolicy, Received};
use trickle::{ConnectionManager, ServerSettings, SessionStats, ShutdownHandle};

struct TestServer {
    addr: SocketAddr,
    handle: ShutdownHandle,
    task: JoinHandle<SessionStats>,
}

impl TestServer {
    async fn start(root: &Path, max_sessions: u32) -> Self {
        let mut settings = ServerSettings::new(
            root.to_path_buf(),
            Throttle::new(100, Duration::from_millis(10)),
        );
        settings.accept_poll = Duration::from_millis(20);
        settings.max_sessions = max_sessions;
        let manager =
            ConnectionManager::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0)), settings)
                .await
                .unwrap();
        let addr = manager.local_addr().unwrap();
        let handle = manager.shutdown_handle();
        let task = tokio::spawn(manager.run());
        Self { addr, handle, task }
    }

    async fn stop(self) -> SessionStats {
        self.handle.shutdown();
        tokio::time::timeout(Duration::from_secs(10), self.task)
            .await
            .unwrap()
            .unwrap()
    }

    async fn connect(&self) -> Connection<OwnedWriteHalf, OwnedReadHalf> {
        let stream = TcpStream::connect(self.addr).await.unwrap();
        Connection::new(TcpStreamPair::from(stream), ReceivePolicy::default())
    }
}

async fn expect_packet<S, R>(conn: &mut Connection<S, R>, opcode: Opcode) -> Packet
where
    S: trickle::protocol::common::SendingStream,
    R: trickle::protocol::common::ReceivingStream,
{
    match conn.receive().await.unwrap() {
        Received::Packet(p) => {
            assert_eq!(p.opcode(), Some(opcode));
            p
        }
        other => panic!("expected {opcode}, got {other:?}"),
    }
}

#[tokio::test]
async fn chunked_exactly() {
    let dir = tempfile::tempdir().unwrap();
    let contents: Vec<u8> = (0..2500u32).map(|i| (i % 256) as u8).collect();
    std::fs::write(dir.path().join("f.bin"), &contents).unwrap();
    let server = TestServer::start(dir.path(), 0).await;
    let mut conn = server.connect().await;

    conn.send(&message::handshake_request(message::CLIENT_MAGIC))
        .await
        .unwrap();
    let mut p = expect_packet(&mut conn, Opcode::HandshakeResponse).await;
    assert_eq!(p.read::<u16>(), message::SERVER_MAGIC);

    conn.send(&message::download_request("f.bin")).await.unwrap();
    let mut p = expect_packet(&mut conn, Opcode::DownloadResponse).await;
    assert_eq!(p.read::<u8>(), 1);
    assert_eq!(p.read::<u64>(), 2500);

    let mut received = Vec::new();
    let mut sizes = Vec::new();
    while received.len() < 2500 {
        let p = expect_packet(&mut conn, Opcode::DownloadData).await;
        sizes.push(p.payload_len());
        received.extend_from_slice(p.payload());
    }
    assert_eq!(sizes, vec![1000, 1000, 500]);
    assert_eq!(received, contents);

    conn.send(&message::farewell()).await.unwrap();
    let _ = expect_packet(&mut conn, Opcode::Farewell).await;
    assert!(matches!(conn.receive().await.unwrap(), Received::Closed));

    let stats = server.stop().await;
    assert_eq!(stats.started, 1);
    assert_eq!(stats.failed, 0);
}

#[tokio::test]
async fn missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let server = TestServer::start(dir.path(), 0).await;
    let mut conn = server.connect().await;

    conn.send(&message::handshake_request(message::CLIENT_MAGIC))
        .await
        .unwrap();
    let _ = expect_packet(&mut conn, Opcode::HandshakeResponse).await;
    conn.send(&message::download_request("no/such/file"))
        .await
        .unwrap();
    let mut p = expect_packet(&mut conn, Opcode::DownloadResponse).await;
    assert_eq!(p.read::<u8>(), 0);
    assert_eq!(p.read::<u64>(), 0);
    conn.send(&message::farewell()).await.unwrap();
    let _ = expect_packet(&mut conn, Opcode::Farewell).await;

    let stats = server.stop().await;
    assert_eq!(stats.failed, 0);
}

#[tokio::test]
async fn protocol_violation_closes_connection() {
    let dir = tempfile::tempdir().unwrap();
    let server = TestServer::start(dir.path(), 0).await;
    let mut conn = server.connect().await;

    conn.send(&message::download_request("f.bin")).await.unwrap();
    assert!(matches!(conn.receive().await.unwrap(), Received::Closed));

    let stats = server.stop().await;
    assert_eq!(stats.started, 1);
    assert_eq!(stats.failed, 1);
}

async fn download(addr: SocketAddr, name: String, dest: std::path::PathBuf) -> DownloadOutcome {
    let stream = TcpStream::connect(addr).await.unwrap();
    let conn = Connection::new(TcpStreamPair::from(stream), ReceivePolicy::default());
    ClientSession::new(conn)
        .download(&name, &dest)
        .await
        .unwrap()
}

async fn concurrent_downloads(max_sessions: u32) {
    const CLIENTS: usize = 4;
    let dir = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let mut expected = Vec::new();
    for i in 0..CLIENTS {
        let fill = u8::try_from(i).unwrap();
        let contents: Vec<u8> = std::iter::repeat_n(fill, 1500 + i * 700).collect();
        std::fs::write(dir.path().join(format!("file{i}")), &contents).unwrap();
        expected.push(contents);
    }
    let server = TestServer::start(dir.path(), max_sessions).await;

    let mut tasks = Vec::new();
    for i in 0..CLIENTS {
        tasks.push(tokio::spawn(download(
            server.addr,
            format!("file{i}"),
            out.path().join(format!("file{i}")),
        )));
    }
    for (i, task) in tasks.into_iter().enumerate() {
        let DownloadOutcome::Complete(stats) = task.await.unwrap() else {
            panic!("download {i} not completed");
        };
        assert_eq!(stats.bytes, expected[i].len() as u64);
        assert_eq!(
            std::fs::read(out.path().join(format!("file{i}"))).unwrap(),
            expected[i]
        );
    }

    let stats = server.stop().await;
    assert_eq!(stats.started, CLIENTS as u64);
    assert_eq!(stats.active, 0);
    assert_eq!(stats.failed, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_sessions() {
    concurrent_downloads(0).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn session_limit() {
    concurrent_downloads(1).await;
}
