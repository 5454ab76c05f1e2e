//! Canned HTTP responders for driver tests.
//!
//! Each helper binds a local listener and serves scripted responses so the
//! client's HTTP behavior can be exercised without a real server.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Requests observed by a canned server.
#[derive(Clone, Default)]
pub struct Recorded {
  pub hits: Arc<AtomicUsize>,
  pub requests: Arc<Mutex<Vec<String>>>,
}

impl Recorded {
  pub fn hit_count(&self) -> usize {
    self.hits.load(Ordering::SeqCst)
  }

  pub fn requests(&self) -> Vec<String> {
    self.requests.lock().unwrap().clone()
  }
}

/// Build a full HTTP/1.1 response with a Content-Length body.
pub fn http_response(status: u16, reason: &str, headers: &[(&str, &str)], body: &str) -> String {
  let mut out = format!("HTTP/1.1 {} {}\r\n", status, reason);
  for (k, v) in headers {
    out.push_str(&format!("{}: {}\r\n", k, v));
  }
  out.push_str(&format!("Content-Length: {}\r\n\r\n{}", body.len(), body));
  out
}

/// Serve the same response to every request, keep-alive aware.
pub async fn spawn_canned(response: String) -> (SocketAddr, Recorded) {
  let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let addr = listener.local_addr().unwrap();
  let recorded = Recorded::default();
  let state = recorded.clone();
  tokio::spawn(async move {
    loop {
      let Ok((mut stream, _)) = listener.accept().await else {
        break;
      };
      let response = response.clone();
      let state = state.clone();
      tokio::spawn(async move {
        loop {
          let request = read_request(&mut stream).await;
          if request.is_empty() {
            break;
          }
          state.hits.fetch_add(1, Ordering::SeqCst);
          state.requests.lock().unwrap().push(request);
          if stream.write_all(response.as_bytes()).await.is_err() {
            break;
          }
        }
      });
    }
  });
  (addr, recorded)
}

/// Serve scripted responses in request order, repeating the last one.
pub async fn spawn_canned_sequence(responses: Vec<String>) -> (SocketAddr, Recorded) {
  let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let addr = listener.local_addr().unwrap();
  let recorded = Recorded::default();
  let state = recorded.clone();
  let responses = Arc::new(responses);
  tokio::spawn(async move {
    loop {
      let Ok((mut stream, _)) = listener.accept().await else {
        break;
      };
      let responses = responses.clone();
      let state = state.clone();
      tokio::spawn(async move {
        loop {
          let request = read_request(&mut stream).await;
          if request.is_empty() {
            break;
          }
          let idx = state.hits.fetch_add(1, Ordering::SeqCst);
          state.requests.lock().unwrap().push(request);
          let response = &responses[idx.min(responses.len() - 1)];
          if stream.write_all(response.as_bytes()).await.is_err() {
            break;
          }
        }
      });
    }
  });
  (addr, recorded)
}

/// Accept connections and read requests, but never answer.
pub async fn spawn_silent() -> SocketAddr {
  let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let addr = listener.local_addr().unwrap();
  tokio::spawn(async move {
    let mut held = Vec::new();
    loop {
      let Ok((mut stream, _)) = listener.accept().await else {
        break;
      };
      // Drain the request so the client finishes writing, then go quiet
      // while keeping the socket open.
      let _ = read_request(&mut stream).await;
      held.push(stream);
    }
  });
  addr
}

/// Serve a streaming response: headers, then one record per line, then
/// either hold the connection open or drop it.
pub async fn spawn_stream(
  txn_header: Option<i64>,
  lines: Vec<String>,
  hold_open: bool,
) -> (SocketAddr, Recorded) {
  let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let addr = listener.local_addr().unwrap();
  let recorded = Recorded::default();
  let state = recorded.clone();
  tokio::spawn(async move {
    loop {
      let Ok((mut stream, _)) = listener.accept().await else {
        break;
      };
      let request = read_request(&mut stream).await;
      if request.is_empty() {
        continue;
      }
      state.hits.fetch_add(1, Ordering::SeqCst);
      state.requests.lock().unwrap().push(request);

      let mut head = String::from("HTTP/1.1 200 OK\r\n");
      if let Some(txn) = txn_header {
        head.push_str(&format!("X-Txn-Time: {}\r\n", txn));
      }
      // No Content-Length: the body runs until the connection closes.
      head.push_str("Connection: close\r\n\r\n");
      if stream.write_all(head.as_bytes()).await.is_err() {
        continue;
      }
      for line in &lines {
        if stream.write_all(format!("{}\n", line).as_bytes()).await.is_err() {
          break;
        }
        let _ = stream.flush().await;
        tokio::time::sleep(Duration::from_millis(5)).await;
      }
      if hold_open {
        tokio::time::sleep(Duration::from_secs(60)).await;
      }
    }
  });
  (addr, recorded)
}

/// Read one full HTTP request (headers plus Content-Length body).
async fn read_request(stream: &mut TcpStream) -> String {
  let mut buf: Vec<u8> = Vec::new();
  let mut chunk = [0u8; 1024];
  loop {
    if let Some(pos) = find(&buf, b"\r\n\r\n") {
      let head = String::from_utf8_lossy(&buf[..pos]).to_ascii_lowercase();
      let content_length = head
        .lines()
        .find_map(|l| l.strip_prefix("content-length:"))
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(0);
      if buf.len() >= pos + 4 + content_length {
        return String::from_utf8_lossy(&buf).into_owned();
      }
    }
    match stream.read(&mut chunk).await {
      Ok(0) | Err(_) => return String::from_utf8_lossy(&buf).into_owned(),
      Ok(n) => buf.extend_from_slice(&chunk[..n]),
    }
  }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
  haystack.windows(needle.len()).position(|w| w == needle)
}
