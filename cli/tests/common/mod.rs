#![allow(dead_code)]

use std::fs;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;
use std::process::{Command, Output};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use jwt_simple::prelude::*;
use serde_json::{json, Value};
use tempfile::TempDir;

pub enum MockResponse {
    Json(Value),
    Status(u16, Value),
    Unauthorized,
    Empty,
}

impl MockResponse {
    pub fn into_http_string(self) -> String {
        let (status, body) = match self {
            MockResponse::Json(val) => (200, val.to_string()),
            MockResponse::Status(code, val) => (code, val.to_string()),
            MockResponse::Unauthorized => (401, String::new()),
            MockResponse::Empty => (200, String::new()),
        };
        format!(
            "HTTP/1.1 {} {}\r\n\
             Content-Type: application/json\r\n\
             Connection: close\r\n\
             Content-Length: {}\r\n\r\n{}",
            status,
            reason(status),
            body.len(),
            body
        )
    }
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        500 => "Internal Server Error",
        _ => "Status",
    }
}

#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn json(&self) -> Value {
        serde_json::from_str(&self.body).unwrap_or(Value::Null)
    }
}

/// Backend double: answers every connection with whatever the handler
/// returns for the parsed request, and records what it saw.
pub struct MockServer {
    pub url: String,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    handle: Option<std::thread::JoinHandle<()>>,
    kill_switch: Arc<AtomicBool>,
}

impl MockServer {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&RecordedRequest) -> MockResponse + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let kill_switch = Arc::new(AtomicBool::new(false));
        let requests = Arc::new(Mutex::new(Vec::new()));

        let handle = std::thread::spawn({
            let kill_switch = kill_switch.clone();
            let requests = requests.clone();
            move || {
                listener.set_nonblocking(true).unwrap();
                while !kill_switch.load(Ordering::SeqCst) {
                    match listener.accept() {
                        Ok((mut stream, _)) => {
                            stream.set_nonblocking(false).unwrap();
                            let Some(req) = read_full_request(&mut stream) else {
                                continue;
                            };
                            let resp = handler(&req);
                            requests.lock().unwrap().push(req);
                            let _ = stream.write_all(resp.into_http_string().as_bytes());
                        }
                        Err(_) => std::thread::sleep(Duration::from_millis(5)),
                    }
                }
            }
        });

        Self {
            url: format!("http://{}/api", addr),
            requests,
            handle: Some(handle),
            kill_switch,
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.kill_switch.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn read_full_request(stream: &mut TcpStream) -> Option<RecordedRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(5))).ok()?;
    let mut buffer = Vec::new();
    let (header_end, total) = loop {
        let mut chunk = [0u8; 1024];
        let n = stream.read(&mut chunk).ok()?;
        if n == 0 {
            return None;
        }
        buffer.extend_from_slice(&chunk[..n]);
        if let Some(lens) = request_lengths(&buffer) {
            if buffer.len() >= lens.1 {
                break lens;
            }
        }
    };

    let head = String::from_utf8_lossy(&buffer[..header_end]).to_string();
    let body = String::from_utf8_lossy(&buffer[header_end + 4..total]).to_string();
    let mut lines = head.lines();
    let mut request_line = lines.next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let path = request_line.next()?.to_string();
    let headers = lines
        .filter_map(|line| {
            let (k, v) = line.split_once(':')?;
            Some((k.trim().to_string(), v.trim().to_string()))
        })
        .collect();

    Some(RecordedRequest {
        method,
        path,
        headers,
        body,
    })
}

/// (end of headers, full request length) once the headers are complete.
fn request_lengths(buffer: &[u8]) -> Option<(usize, usize)> {
    let header_end = buffer.windows(4).position(|w| w == b"\r\n\r\n")?;
    let headers_str = std::str::from_utf8(&buffer[..header_end]).ok()?;
    let content_length = headers_str
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            if name.trim().eq_ignore_ascii_case("Content-Length") {
                value.trim().parse::<usize>().ok()
            } else {
                None
            }
        })
        .unwrap_or(0);
    Some((header_end, header_end + 4 + content_length))
}

/// Runs the `multidb` binary with its own config directory.
pub struct TestHarness {
    pub tempdir: TempDir,
    pub api_url: String,
}

impl TestHarness {
    pub fn new(api_url: &str) -> Self {
        Self {
            tempdir: TempDir::new().expect("create tempdir"),
            api_url: api_url.to_string(),
        }
    }

    pub fn no_server() -> Self {
        Self::new("http://127.0.0.1:1/api")
    }

    pub fn run_cli(&self, args: &[&str]) -> Output {
        self.run_cli_with_env(args, &[])
    }

    pub fn run_cli_with_env(&self, args: &[&str], envs: &[(&str, &str)]) -> Output {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_multidb"));
        cmd.env("MULTIDB_CONFIG_DIR", self.tempdir.path());
        cmd.env("MULTIDB_API_URL", &self.api_url);
        cmd.env("MULTIDB_CREDENTIAL_BACKEND", "file");
        cmd.env_remove("MULTIDB_PASSWORD");
        cmd.env_remove("RUST_LOG");
        for (k, v) in envs {
            cmd.env(k, v);
        }
        cmd.args(args);
        cmd.output().expect("run multidb cli")
    }

    pub fn store_dir(&self) -> PathBuf {
        self.tempdir.path().join("multidb")
    }

    pub fn token_path(&self) -> PathBuf {
        self.store_dir().join("token")
    }

    pub fn user_path(&self) -> PathBuf {
        self.store_dir().join("user.json")
    }

    /// Seeds a signed-in session the way a successful login leaves it.
    pub fn sign_in_as(&self, role: &str, token: &str) {
        fs::create_dir_all(self.store_dir()).unwrap();
        fs::write(self.token_path(), token).unwrap();
        let user = json!({
            "id": "7",
            "email": format!("{}@example.com", role.to_lowercase()),
            "displayName": format!("{} User", role),
            "role": role,
        });
        fs::write(self.user_path(), serde_json::to_vec_pretty(&user).unwrap()).unwrap();
    }
}

pub fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

pub fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

/// Unsigned JWT-shaped token with the given `exp`.
pub fn jwt_with_exp(exp: u64) -> String {
    let header = Base64UrlSafeNoPadding::encode_to_string(r#"{"alg":"HS256","typ":"JWT"}"#).unwrap();
    let payload =
        Base64UrlSafeNoPadding::encode_to_string(json!({ "sub": "7", "exp": exp }).to_string())
            .unwrap();
    format!("{}.{}.signature", header, payload)
}
