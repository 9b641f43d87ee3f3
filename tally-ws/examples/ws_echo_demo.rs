//! Connects to an echo server, sends three messages and waits for the echoes.
//!
//! Run with: cargo run --example ws_echo_demo -- ws://127.0.0.1:9000
//! Start a local server first: cargo run --example ws_echo_server
//!
//! Exits 0 only if all three echoes arrive.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tally_ws::{
    create_client, library_version, ConnectionState, ErrorInfo, MessageType, WsClient, WsConfig,
};

const MESSAGES: usize = 3;
const PHASE_TIMEOUT: Duration = Duration::from_secs(5);

#[cfg(feature = "tracing")]
fn init_logging() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[cfg(not(feature = "tracing"))]
fn init_logging() {}

fn poll_for(client: &dyn WsClient, timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while !done() {
        if Instant::now() >= deadline {
            return false;
        }
        if let Err(e) = client.poll(Duration::from_millis(50)) {
            eprintln!("poll: {e}");
            return done();
        }
    }
    true
}

fn main() {
    init_logging();

    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "ws://127.0.0.1:9000".to_string());
    println!("{}", library_version());
    println!("Connecting to {url}...");

    let client = create_client();
    let echoes = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&echoes);
    client.set_message_callback(Some(Arc::new(move |data: &[u8], kind: MessageType| {
        counter.fetch_add(1, Ordering::SeqCst);
        match kind {
            MessageType::Text => println!("Received: {}", String::from_utf8_lossy(data)),
            MessageType::Binary => println!("Received {} bytes", data.len()),
        }
    })));
    client.set_state_callback(Some(Arc::new(
        |state: ConnectionState, err: Option<&ErrorInfo>| match err {
            Some(info) => println!("State: {state} {info}"),
            None => println!("State: {state}"),
        },
    )));

    if !client.connect(&WsConfig::new(url)) {
        eprintln!("Connect rejected");
        std::process::exit(1);
    }

    if !poll_for(client.as_ref(), PHASE_TIMEOUT, || client.is_connected()) {
        eprintln!("Not connected (state: {})", client.state());
        std::process::exit(1);
    }

    for i in 0..MESSAGES {
        let msg = format!("Hello {i}");
        println!("Sending: {msg}");
        client.send_text(&msg);
    }

    let ok = poll_for(client.as_ref(), PHASE_TIMEOUT, || {
        echoes.load(Ordering::SeqCst) >= MESSAGES
    });

    client.close();
    poll_for(client.as_ref(), Duration::from_secs(2), || {
        matches!(client.state(), ConnectionState::Disconnected | ConnectionState::Error)
    });

    let received = echoes.load(Ordering::SeqCst);
    println!("Echoes: {received}/{MESSAGES}");
    std::process::exit(if ok { 0 } else { 1 });
}
