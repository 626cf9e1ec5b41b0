//! Mock klippy API server for integration tests.

#![allow(dead_code)]

use klippy_uds::protocol::{methods, Request};
use klippy_uds::FrameReader;
use serde_json::{json, Value};
use std::io::{Read, Write};
use std::os::unix::net::UnixListener;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

pub const TOOLS_CFG: &str = "\
[gcode_macro T0]
gcode:
\tT_SELECT TOOL=0 OFFSET_X=0.0 OFFSET_Y=0.0 OFFSET_Z=0.0

[gcode_macro T1]
gcode:
\tT_SELECT TOOL=1 OFFSET_X=-20.5 OFFSET_Y=0.75 OFFSET_Z=0.12
";

/// How the mock answers one request.
pub enum Reply {
    Result(Value),
    Error(String),
    /// Say nothing.
    Silent,
    /// Write these bytes verbatim.
    Raw(Vec<u8>),
    /// Hang up.
    Close,
}

pub type Handler = Box<dyn FnMut(&Request) -> Reply + Send>;

/// A klippy stand-in serving one connection on a temp socket.
pub struct MockDaemon {
    pub dir: TempDir,
    pub socket_path: PathBuf,
    requests: Arc<Mutex<Vec<Request>>>,
}

impl MockDaemon {
    /// Printer with two tools, homed at X10 Y20 Z5, tool 1 active.
    pub fn start() -> Self {
        Self::start_after(Duration::ZERO, |dir| Box::new(printer_handler(dir)) as Handler)
    }

    pub fn start_with(make_handler: impl FnOnce(&Path) -> Handler) -> Self {
        Self::start_after(Duration::ZERO, make_handler)
    }

    /// Bind the socket only after `delay`.
    pub fn start_after(delay: Duration, make_handler: impl FnOnce(&Path) -> Handler) -> Self {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("printer.cfg"), "[include TOOLS.cfg]\n").unwrap();
        std::fs::write(dir.path().join("TOOLS.cfg"), TOOLS_CFG).unwrap();

        let socket_path = dir.path().join("klippy_uds");
        let requests = Arc::new(Mutex::new(Vec::new()));
        let handler = make_handler(dir.path());

        let listener = if delay.is_zero() {
            Some(UnixListener::bind(&socket_path).unwrap())
        } else {
            None
        };
        let bind_path = socket_path.clone();
        let seen = Arc::clone(&requests);

        thread::spawn(move || {
            let listener = listener.unwrap_or_else(|| {
                thread::sleep(delay);
                UnixListener::bind(&bind_path).unwrap()
            });
            serve(listener, handler, seen);
        });

        Self {
            dir,
            socket_path,
            requests,
        }
    }

    pub fn tools_path(&self) -> PathBuf {
        self.dir.path().join("TOOLS.cfg")
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }

    pub fn methods(&self) -> Vec<String> {
        self.requests().into_iter().map(|r| r.method).collect()
    }
}

fn serve(listener: UnixListener, mut handler: Handler, seen: Arc<Mutex<Vec<Request>>>) {
    let Ok((mut stream, _)) = listener.accept() else {
        return;
    };
    let mut frames = FrameReader::new();
    let mut buf = [0u8; 4096];

    loop {
        let n = match stream.read(&mut buf) {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        frames.push(&buf[..n]);

        while let Some(frame) = frames.next_frame() {
            let request: Request = serde_json::from_slice(&frame).unwrap();
            seen.lock().unwrap().push(request.clone());

            let bytes = match handler(&request) {
                Reply::Result(result) => frame_of(json!({"id": request.id, "result": result})),
                Reply::Error(message) => frame_of(json!({
                    "id": request.id,
                    "error": {"error": "WebRequestError", "message": message}
                })),
                Reply::Raw(bytes) => bytes,
                Reply::Silent => continue,
                Reply::Close => return,
            };
            if stream.write_all(&bytes).is_err() {
                return;
            }
        }
    }
}

pub fn frame_of(body: Value) -> Vec<u8> {
    let mut bytes = serde_json::to_vec(&body).unwrap();
    bytes.push(0x03);
    bytes
}

/// Answers like a ready two-tool printer.
pub fn printer_handler(dir: &Path) -> impl FnMut(&Request) -> Reply + Send {
    let config_file = dir.join("printer.cfg").to_string_lossy().into_owned();
    move |request| match request.method.as_str() {
        methods::INFO => Reply::Result(json!({
            "state": "ready",
            "state_message": "Printer is ready",
            "config_file": config_file,
        })),
        methods::OBJECTS_LIST => Reply::Result(json!({
            "objects": ["gcode_move", "toolhead", "extruder", "extruder1", "extruder_stepper belt", "heater_bed"]
        })),
        methods::OBJECTS_QUERY => {
            let objects = &request.params.as_ref().unwrap()["objects"];
            if objects.get("gcode_move").is_some() {
                Reply::Result(json!({"eventtime": 1.0, "status": {"gcode_move": {"gcode_position": [10.0, 20.0, 5.0, 1.5]}}}))
            } else if objects["toolhead"][0] == "position" {
                Reply::Result(json!({"eventtime": 1.0, "status": {"toolhead": {"position": [30.0, 40.0, 5.0, 1.5]}}}))
            } else {
                Reply::Result(json!({"eventtime": 1.0, "status": {"toolhead": {"extruder": "extruder1"}}}))
            }
        }
        methods::GCODE_SCRIPT => {
            let script = request.params.as_ref().unwrap()["script"].as_str().unwrap();
            if script.starts_with("G1") {
                Reply::Error("Must home axis first: 10.000 0.000 0.000 [0.000]".into())
            } else {
                Reply::Result(json!({}))
            }
        }
        other => Reply::Error(format!("Invalid path '{}'", other)),
    }
}
