//! Mail API transport against a one-shot local server.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use faultline::notifier::{DeliveryError, HttpMailTransport, Mailbox, MailMessage, MailTransport};

fn message() -> MailMessage {
    MailMessage {
        from: Mailbox {
            address: "errors@shop.example".to_owned(),
            name: "Error reporter".to_owned(),
        },
        to: vec!["ops@shop.example".to_owned()],
        subject: "Error at Shop".to_owned(),
        body: "Message: boom".to_owned(),
    }
}

fn read_request(stream: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0_u8; 4096];
    loop {
        let n = stream.read(&mut chunk).expect("read request");
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);

        let text = String::from_utf8_lossy(&buf).into_owned();
        if let Some(end) = text.find("\r\n\r\n") {
            let content_length = text[..end]
                .lines()
                .filter_map(|line| line.split_once(':'))
                .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
                .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= end + 4 + content_length {
                break;
            }
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Serve one canned response and hand back the raw request.
fn serve_once(response: &'static str) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind local listener");
    let addr = listener.local_addr().expect("local addr");
    let handle = thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept");
        let request = read_request(&mut stream);
        stream
            .write_all(response.as_bytes())
            .expect("write response");
        request
    });
    (format!("http://{addr}/v1/send"), handle)
}

fn transport(endpoint: String, token: Option<&str>) -> HttpMailTransport {
    let client = reqwest::blocking::Client::builder()
        .no_proxy()
        .timeout(Duration::from_secs(5))
        .build()
        .expect("client");
    HttpMailTransport::with_client(client, endpoint, token.map(str::to_owned))
}

#[test]
fn posts_json_with_bearer_token() {
    let (endpoint, server) =
        serve_once("HTTP/1.1 202 Accepted\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");

    transport(endpoint, Some("s3cret"))
        .send(&message())
        .expect("API should accept the message");

    let request = server.join().expect("server thread");
    let lower = request.to_ascii_lowercase();
    assert!(request.starts_with("POST /v1/send HTTP/1.1"));
    assert!(lower.contains("authorization: bearer s3cret"));
    assert!(lower.contains("content-type: application/json"));
    assert!(request.contains("\"subject\":\"Error at Shop\""));
    assert!(request.contains("\"name\":\"Error reporter\""));
}

#[test]
fn non_success_status_is_rejected() {
    let (endpoint, server) = serve_once(
        "HTTP/1.1 503 Service Unavailable\r\nContent-Length: 4\r\nConnection: close\r\n\r\ndown",
    );

    let result = transport(endpoint, None).send(&message());

    let request = server.join().expect("server thread");
    assert!(!request.to_ascii_lowercase().contains("authorization:"));
    match result {
        Err(DeliveryError::Rejected { status, body }) => {
            assert_eq!(status, 503);
            assert_eq!(body, "down");
        }
        other => panic!("expected rejection, got {other:?}"),
    }
}

#[test]
fn flush_is_a_no_op() {
    let transport = HttpMailTransport::new(
        "http://127.0.0.1:9/unused",
        None,
        Duration::from_secs(1),
    )
    .expect("client");
    assert_eq!(transport.endpoint(), "http://127.0.0.1:9/unused");
    assert!(transport.flush_pending_queue().is_ok());
}
