//! WebSocket echo server for the demo.
//!
//! Run with: cargo run --example ws_echo_server [addr]
//! Test with: websocat ws://127.0.0.1:9000

use std::net::TcpListener;
use std::thread;

use tungstenite::Message;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:9000".to_string());
    let listener = TcpListener::bind(&addr)?;
    println!("WebSocket echo server listening on ws://{addr}");

    for stream in listener.incoming() {
        let stream = match stream {
            Ok(s) => s,
            Err(e) => {
                eprintln!("Accept error: {e}");
                continue;
            }
        };

        thread::spawn(move || {
            let peer = stream.peer_addr().ok();
            let mut ws = match tungstenite::accept(stream) {
                Ok(ws) => ws,
                Err(e) => {
                    eprintln!("Handshake failed: {e}");
                    return;
                }
            };
            println!("Client connected: {peer:?}");

            loop {
                match ws.read() {
                    Ok(msg @ (Message::Text(_) | Message::Binary(_))) => {
                        println!("Received {} bytes, echoing...", msg.len());
                        if ws.send(msg).is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(_) => break,
                }
            }
            println!("Client disconnected: {peer:?}");
        });
    }

    Ok(())
}
