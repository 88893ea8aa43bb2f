//! End-to-end tests over real TCP connections.
//!
//! Each test binds a server to an ephemeral port, drives it with plain line
//! clients and bounds every wait with a timeout.

use chat_server::{ChatServer, ServerConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Duration, Instant};

const WAIT: Duration = Duration::from_secs(2);
const QUIET: Duration = Duration::from_millis(300);

struct Client {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl Client {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("connect");
        let (reader, writer) = stream.into_split();
        Self {
            lines: BufReader::new(reader).lines(),
            writer,
        }
    }

    /// Connects and completes the handshake with `name`.
    async fn join(addr: SocketAddr, name: &str) -> Self {
        let mut client = Self::connect(addr).await;
        client.expect("Enter your username:").await;
        client.send(name).await;
        client.expect(&format!("Welcome to the chat, {name}!")).await;
        client.expect("Type 'QUIT' to leave the chat").await;
        client
    }

    async fn send(&mut self, line: &str) {
        self.writer
            .write_all(format!("{line}\n").as_bytes())
            .await
            .expect("write");
    }

    async fn recv(&mut self, within: Duration) -> Option<String> {
        timeout(within, self.lines.next_line())
            .await
            .ok()
            .and_then(|line| line.ok().flatten())
    }

    async fn expect(&mut self, expected: &str) {
        assert_eq!(self.recv(WAIT).await.as_deref(), Some(expected));
    }

    async fn expect_silence(&mut self) {
        assert_eq!(self.recv(QUIET).await, None);
    }

    /// Waits for the server to close the connection, skipping any notices
    /// that were still in flight.
    async fn expect_closed(&mut self) {
        let closed = timeout(WAIT, async {
            while let Ok(Some(_)) = self.lines.next_line().await {}
        })
        .await;
        assert!(closed.is_ok(), "connection should close");
    }
}

struct Running {
    server: Arc<ChatServer>,
    addr: SocketAddr,
    task: JoinHandle<Result<(), chat_server::ServerError>>,
}

async fn start(config: ServerConfig) -> Running {
    let server = Arc::new(ChatServer::new(config));
    let listener = server.bind().expect("bind");
    let addr = listener.local_addr().unwrap();
    let task = {
        let server = server.clone();
        tokio::spawn(async move { server.serve(listener).await })
    };
    Running { server, addr, task }
}

fn test_config() -> ServerConfig {
    ServerConfig {
        bind_address: "127.0.0.1:0".parse().unwrap(),
        write_timeout: Duration::from_millis(500),
        shutdown_timeout: Duration::from_secs(2),
        ..Default::default()
    }
}

async fn wait_for_users(server: &ChatServer, expected: usize) {
    let deadline = Instant::now() + WAIT;
    while server.connected_users() != expected {
        assert!(
            Instant::now() < deadline,
            "expected {expected} users, have {}",
            server.connected_users()
        );
        sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_alice_and_bob_scenario() {
    let running = start(test_config()).await;

    let mut alice = Client::join(running.addr, "alice").await;
    let mut bob = Client::join(running.addr, "bob").await;
    alice.expect("bob joined the chat").await;

    alice.send("hello").await;
    bob.expect("[alice]: hello").await;
    alice.expect_silence().await;

    bob.send("/users").await;
    bob.expect("Connected users: 2").await;
    alice.expect_silence().await;

    alice.send("QUIT").await;
    alice.expect_closed().await;
    bob.expect("alice left the chat").await;
    wait_for_users(&running.server, 1).await;

    running.server.shutdown().await.unwrap();
    running.task.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_abrupt_disconnect_announced_once() {
    let running = start(test_config()).await;

    let mut alice = Client::join(running.addr, "alice").await;
    let bob = Client::join(running.addr, "bob").await;
    alice.expect("bob joined the chat").await;

    drop(bob);
    alice.expect("bob left the chat").await;
    alice.expect_silence().await;
    wait_for_users(&running.server, 1).await;

    running.server.shutdown().await.unwrap();
    running.task.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_help_and_time_are_private() {
    let running = start(test_config()).await;

    let mut alice = Client::join(running.addr, "alice").await;
    let mut bob = Client::join(running.addr, "bob").await;
    alice.expect("bob joined the chat").await;

    alice.send("/HELP").await;
    alice.expect("Available commands:").await;
    alice.expect("/help - Show this help message").await;
    alice.expect("/users - Show connected users count").await;
    alice.expect("/time - Show current server time").await;
    alice.expect("QUIT - Leave the chat").await;

    alice.send("/time").await;
    let time = alice.recv(WAIT).await.expect("time reply");
    assert!(time.starts_with("Server time: "));

    bob.expect_silence().await;

    running.server.shutdown().await.unwrap();
    running.task.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_messages_from_one_sender_arrive_in_order() {
    let running = start(test_config()).await;

    let mut alice = Client::join(running.addr, "alice").await;
    let mut bob = Client::join(running.addr, "bob").await;
    alice.expect("bob joined the chat").await;

    for i in 0..20 {
        alice.send(&format!("message {i}")).await;
    }
    for i in 0..20 {
        bob.expect(&format!("[alice]: message {i}")).await;
    }

    running.server.shutdown().await.unwrap();
    running.task.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_connects_and_disconnects() {
    let running = start(test_config()).await;
    let n = 12;
    let m = 7;

    let mut joins = Vec::new();
    for i in 0..n {
        let addr = running.addr;
        joins.push(tokio::spawn(async move {
            Client::join(addr, &format!("user{i}")).await
        }));
    }
    let mut clients = Vec::new();
    for join in joins {
        clients.push(join.await.unwrap());
    }
    wait_for_users(&running.server, n).await;

    let leaving: Vec<Client> = clients.drain(..m).collect();
    let mut quits = Vec::new();
    for mut client in leaving {
        quits.push(tokio::spawn(async move {
            client.send("quit").await;
            client.expect_closed().await;
        }));
    }
    for quit in quits {
        quit.await.unwrap();
    }

    wait_for_users(&running.server, n - m).await;

    running.server.shutdown().await.unwrap();
    running.task.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_shutdown_with_connected_sessions() {
    let running = start(test_config()).await;

    let mut clients = Vec::new();
    for i in 0..3 {
        clients.push(Client::join(running.addr, &format!("user{i}")).await);
    }
    // One client stuck mid-handshake.
    let mut pending = Client::connect(running.addr).await;
    pending.expect("Enter your username:").await;
    wait_for_users(&running.server, 4).await;

    let started = Instant::now();
    running.server.shutdown().await.unwrap();
    timeout(Duration::from_secs(5), running.task)
        .await
        .expect("shutdown should finish within the drain time")
        .unwrap()
        .unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(running.server.connected_users(), 0);

    pending.expect_closed().await;
    assert!(TcpStream::connect(running.addr).await.is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_connection_limit() {
    let config = ServerConfig {
        max_connections: 1,
        ..test_config()
    };
    let running = start(config).await;

    let _alice = Client::join(running.addr, "alice").await;
    let mut late = Client::connect(running.addr).await;
    late.expect("Server is full, try again later.").await;
    late.expect_closed().await;
    assert_eq!(running.server.connected_users(), 1);

    running.server.shutdown().await.unwrap();
    running.task.await.unwrap().unwrap();
}
