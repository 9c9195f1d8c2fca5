//! End-to-end tests driving the whole stack (HTTP client, SSE, WebSocket)
//! against a real loopback TCP server, covering spec §8's "concrete
//! scenarios" that aren't already exercised by in-module unit tests:
//! redirect chains, cookie round-trips, SSE multi-chunk delivery, and a
//! WebSocket echo round trip.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc;
use std::time::Duration;
use vortex::http::message::{HttpRequest, RedirectPolicy};
use vortex::http::{HttpClient, HttpMethod};
use vortex::ws::client::WsClient;
use vortex::ws::frame::{Frame, OpCode};
use vortex::{Config, Uri};

/// Read one HTTP request off `stream` (headers + any declared body) and
/// return its request line's path. Good enough for these scripted peers;
/// none of the test requests carry a body.
fn read_request_path(stream: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let n = stream.read(&mut byte).unwrap();
        if n == 0 {
            break;
        }
        buf.push(byte[0]);
        if buf.ends_with(b"\r\n\r\n") {
            break;
        }
    }
    let text = String::from_utf8_lossy(&buf);
    let first_line = text.lines().next().unwrap_or("");
    first_line.split_whitespace().nth(1).unwrap_or("/").to_string()
}

#[test]
fn redirect_chain_follows_through_to_final_body() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    std::thread::spawn(move || {
        // All three hops are same-origin and keep-alive, so the client
        // pools and reuses a single connection for the whole chain.
        let (mut stream, _) = listener.accept().unwrap();
        for _ in 0..3 {
            let path = read_request_path(&mut stream);
            let response = match path.as_str() {
                "/a" => "HTTP/1.1 302 Found\r\nLocation: /b\r\nContent-Length: 0\r\n\r\n".to_string(),
                "/b" => "HTTP/1.1 302 Found\r\nLocation: /c\r\nContent-Length: 0\r\n\r\n".to_string(),
                "/c" => "HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok".to_string(),
                _ => panic!("unexpected path {path}"),
            };
            stream.write_all(response.as_bytes()).unwrap();
        }
    });

    let mut client = HttpClient::new(Config::default()).unwrap();
    let uri = Uri::parse(&format!("http://{addr}/a")).unwrap();
    let request = HttpRequest::new(HttpMethod::Get, uri).with_redirect_policy(RedirectPolicy::FollowAll, 5);

    let (tx, rx) = mpsc::channel();
    client.send(request, move |result| {
        let _ = tx.send(result);
    });
    client.run_until_idle(Duration::from_secs(2)).unwrap();

    let response = rx.try_recv().unwrap().unwrap();
    assert_eq!(response.body, b"ok");
    let history: Vec<String> = response.redirect_history.iter().map(|u| u.path().to_string()).collect();
    assert_eq!(history, vec!["/a".to_string(), "/b".to_string()]);
}

#[test]
fn redirect_chain_exceeding_max_redirects_errors() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    std::thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        loop {
            let path = read_request_path(&mut stream);
            let response = match path.as_str() {
                "/a" => "HTTP/1.1 302 Found\r\nLocation: /b\r\nContent-Length: 0\r\n\r\n",
                "/b" => "HTTP/1.1 302 Found\r\nLocation: /c\r\nContent-Length: 0\r\n\r\n",
                _ => return,
            };
            if stream.write_all(response.as_bytes()).is_err() {
                return;
            }
        }
    });

    let mut client = HttpClient::new(Config::default()).unwrap();
    let uri = Uri::parse(&format!("http://{addr}/a")).unwrap();
    let request = HttpRequest::new(HttpMethod::Get, uri).with_redirect_policy(RedirectPolicy::FollowAll, 1);

    let (tx, rx) = mpsc::channel();
    client.send(request, move |result| {
        let _ = tx.send(result);
    });
    client.run_until_idle(Duration::from_secs(2)).unwrap();

    let result = rx.try_recv().unwrap();
    assert!(result.is_err(), "expected HttpTooManyRedirects, got {result:?}");
}

#[test]
fn cookie_set_by_server_is_sent_back_on_next_request() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    std::thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let _first_path = read_request_path(&mut stream);
        stream
            .write_all(b"HTTP/1.1 200 OK\r\nSet-Cookie: sid=abc; Path=/; HttpOnly\r\nContent-Length: 0\r\n\r\n")
            .unwrap();

        let second = read_request_path_with_headers(&mut stream);
        let sent_cookie = second.iter().find(|(k, _)| k.eq_ignore_ascii_case("cookie")).map(|(_, v)| v.clone());
        let body = format!("{}", sent_cookie.unwrap_or_default());
        let response = format!("HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n{}", body.len(), body);
        stream.write_all(response.as_bytes()).unwrap();
    });

    let mut client = HttpClient::new(Config::default()).unwrap();
    let uri = Uri::parse(&format!("http://{addr}/first")).unwrap();

    let (tx1, rx1) = mpsc::channel();
    client.get(uri, move |result| {
        let _ = tx1.send(result);
    });
    client.run_until_idle(Duration::from_secs(2)).unwrap();
    rx1.try_recv().unwrap().unwrap();

    let uri2 = Uri::parse(&format!("http://{addr}/second")).unwrap();
    let (tx2, rx2) = mpsc::channel();
    client.get(uri2, move |result| {
        let _ = tx2.send(result);
    });
    client.run_until_idle(Duration::from_secs(2)).unwrap();
    let response2 = rx2.try_recv().unwrap().unwrap();
    assert_eq!(response2.body, b"sid=abc");
}

fn read_request_path_with_headers(stream: &mut TcpStream) -> Vec<(String, String)> {
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let n = stream.read(&mut byte).unwrap();
        if n == 0 {
            break;
        }
        buf.push(byte[0]);
        if buf.ends_with(b"\r\n\r\n") {
            break;
        }
    }
    let text = String::from_utf8_lossy(&buf);
    text.lines()
        .skip(1)
        .filter_map(|line| line.split_once(':').map(|(k, v)| (k.trim().to_string(), v.trim().to_string())))
        .collect()
}

#[test]
fn sse_stream_split_across_chunks_delivers_both_events() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    std::thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let _ = read_request_path(&mut stream);
        stream
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nTransfer-Encoding: chunked\r\n\r\n")
            .unwrap();
        let chunks: [&[u8]; 2] = [b"id: 1\ndata: hel", b"lo\n\nid: 2\ndata: world\n\n"];
        for chunk in chunks {
            let framed = format!("{:x}\r\n", chunk.len());
            stream.write_all(framed.as_bytes()).unwrap();
            stream.write_all(chunk).unwrap();
            stream.write_all(b"\r\n").unwrap();
            std::thread::sleep(Duration::from_millis(20));
        }
        stream.write_all(b"0\r\n\r\n").unwrap();
    });

    let http = HttpClient::new(Config::default()).unwrap();
    let mut sse = vortex::SseClient::new(http);
    let events = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
    let events_clone = events.clone();
    let _token = sse.signals().message_received.connect(move |event| {
        events_clone.lock().unwrap().push(event);
    });

    let uri = Uri::parse(&format!("http://{addr}/events")).unwrap();
    sse.connect(HttpRequest::new(HttpMethod::Get, uri));

    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while events.lock().unwrap().len() < 2 && std::time::Instant::now() < deadline {
        sse.poll(Some(Duration::from_millis(50))).unwrap();
    }

    let collected = events.lock().unwrap();
    assert_eq!(collected.len(), 2);
    assert_eq!(collected[0].id(), "1");
    assert_eq!(collected[0].data(), "hello");
    assert_eq!(collected[1].id(), "2");
    assert_eq!(collected[1].data(), "world");
    assert_eq!(sse.last_event_id(), "2");
}

#[test]
fn websocket_echo_round_trip_and_clean_close() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    std::thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();

        // Read the HTTP Upgrade request headers.
        let mut buf = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            let n = stream.read(&mut byte).unwrap();
            if n == 0 {
                return;
            }
            buf.push(byte[0]);
            if buf.ends_with(b"\r\n\r\n") {
                break;
            }
        }
        let text = String::from_utf8_lossy(&buf);
        let key = text
            .lines()
            .find_map(|l| l.split_once(':').filter(|(k, _)| k.trim().eq_ignore_ascii_case("sec-websocket-key")).map(|(_, v)| v.trim().to_string()))
            .unwrap();

        use base64::Engine;
        use sha1::{Digest, Sha1};
        let mut hasher = Sha1::new();
        hasher.update(key.as_bytes());
        hasher.update(b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11");
        let accept = base64::engine::general_purpose::STANDARD.encode(hasher.finalize());

        let response = format!(
            "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: {accept}\r\n\r\n"
        );
        stream.write_all(response.as_bytes()).unwrap();

        // Read one client frame (masked), echo its payload back unmasked,
        // then wait for the client's close and echo it back too.
        let mut frame_buf = Vec::new();
        let mut echoed = false;
        let mut chunk = [0u8; 256];
        loop {
            let n = match stream.read(&mut chunk) {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            frame_buf.extend_from_slice(&chunk[..n]);
            loop {
                let mut consumed = 0usize;
                match Frame::decode(&frame_buf, &mut consumed) {
                    Ok(Some(frame)) => {
                        frame_buf.drain(..consumed);
                        match frame.op_code() {
                            OpCode::Text if !echoed => {
                                let reply = Frame::text(std::str::from_utf8(frame.payload()).unwrap(), true);
                                stream.write_all(&reply.encode(false)).unwrap();
                                echoed = true;
                            }
                            OpCode::Close => {
                                let (code, reason) = frame.close_code_and_reason().unwrap_or((1000, String::new()));
                                let reply = Frame::close(code, &reason);
                                stream.write_all(&reply.encode(false)).unwrap();
                                return;
                            }
                            _ => {}
                        }
                    }
                    Ok(None) => break,
                    Err(_) => return,
                }
            }
        }
    });

    let mut client = WsClient::new(Config::default()).unwrap();
    let received = std::sync::Arc::new(std::sync::Mutex::new(None));
    let received_clone = received.clone();
    let _token = client.signals().text_message_received.connect(move |text| {
        *received_clone.lock().unwrap() = Some(text);
    });
    let closed = std::sync::Arc::new(std::sync::Mutex::new(None));
    let closed_clone = closed.clone();
    let _close_token = client.signals().disconnected.connect(move |(code, reason)| {
        *closed_clone.lock().unwrap() = Some((code, reason));
    });

    let uri = Uri::parse(&format!("ws://{addr}/")).unwrap();
    client.connect_to_url(uri).unwrap();

    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while !client.is_connected() && std::time::Instant::now() < deadline {
        client.poll(Some(Duration::from_millis(50))).unwrap();
    }
    assert!(client.is_connected(), "handshake never completed");

    client.send_text_message("ping").unwrap();
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while received.lock().unwrap().is_none() && std::time::Instant::now() < deadline {
        client.poll(Some(Duration::from_millis(50))).unwrap();
    }
    assert_eq!(received.lock().unwrap().as_deref(), Some("ping"));

    client.disconnect(1000, "bye");
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while closed.lock().unwrap().is_none() && std::time::Instant::now() < deadline {
        client.poll(Some(Duration::from_millis(50))).unwrap();
    }
    let (code, reason) = closed.lock().unwrap().clone().expect("disconnected signal never fired");
    assert_eq!(code, 1000);
    assert_eq!(reason, "bye");
}
