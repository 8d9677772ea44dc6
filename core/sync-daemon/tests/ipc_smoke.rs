use bustrack_sync_protocol::{CheckIn, Method, Request, Response, TripRecord, PROTOCOL_VERSION};
use chrono::{Duration as ChronoDuration, Utc};
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};
use tempfile::TempDir;

struct ReceiverGuard {
    child: Child,
}

impl Drop for ReceiverGuard {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn spawn_receiver(home: &Path) -> Child {
    Command::new(env!("CARGO_BIN_EXE_bustrack-sync-daemon"))
        .env("BUSTRACK_HOME", home)
        .env_remove("BUSTRACK_SYNC_SOCKET")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("Failed to spawn bustrack-sync-daemon")
}

fn socket_path(home: &Path) -> PathBuf {
    home.join("sync.sock")
}

fn wait_for_socket(path: &Path, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if UnixStream::connect(path).is_ok() {
            return;
        }
        sleep(Duration::from_millis(25));
    }
    panic!("Timed out waiting for receiver socket at {}", path.display());
}

fn send_request(socket: &Path, request: Request) -> Response {
    let mut stream = UnixStream::connect(socket).expect("Failed to connect to receiver socket");
    serde_json::to_writer(&mut stream, &request).expect("Failed to serialize request");
    stream.write_all(b"\n").expect("Failed to write request");
    stream.flush().ok();
    read_response(&mut stream)
}

fn send_raw(socket: &Path, payload: &[u8]) -> Response {
    let mut stream = UnixStream::connect(socket).expect("Failed to connect to receiver socket");
    stream.write_all(payload).expect("Failed to write payload");
    stream.flush().ok();
    read_response(&mut stream)
}

fn read_response(stream: &mut UnixStream) -> Response {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        let n = stream.read(&mut chunk).expect("Failed to read response");
        if n == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..n]);
        if chunk[..n].contains(&b'\n') {
            break;
        }
    }

    let response_bytes = match buffer.iter().position(|b| *b == b'\n') {
        Some(index) => &buffer[..index],
        None => buffer.as_slice(),
    };

    serde_json::from_slice(response_bytes).expect("Failed to parse response JSON")
}

fn finished_trip(id: &str) -> TripRecord {
    let start = Utc::now() - ChronoDuration::minutes(40);
    let stops = (1..=3)
        .map(|n| CheckIn {
            stop_id: n,
            stop_name: format!("Stop {}", n),
            timestamp: start + ChronoDuration::minutes(i64::from(n) * 5),
            passengers_at_check_in: n * 3,
        })
        .collect();
    TripRecord {
        id: id.to_string(),
        route_id: "route5".to_string(),
        route_name: "Engineering Loop".to_string(),
        bus_number: "101".to_string(),
        driver_id: "D-7".to_string(),
        start_time: start,
        end_time: start + ChronoDuration::minutes(30),
        stops,
        total_passengers: 9,
        synced: false,
    }
}

fn submit(socket: &Path, id: &str, trips: Vec<TripRecord>) -> Response {
    send_request(
        socket,
        Request {
            protocol_version: PROTOCOL_VERSION,
            method: Method::SubmitTrips,
            id: Some(id.to_string()),
            params: Some(serde_json::json!({ "trips": trips })),
        },
    )
}

fn ack_counts(response: &Response) -> (u64, u64) {
    let data = response.data.as_ref().expect("ack payload");
    (
        data.get("accepted").and_then(|v| v.as_u64()).unwrap_or(0),
        data.get("duplicates").and_then(|v| v.as_u64()).unwrap_or(0),
    )
}

#[test]
fn receiver_health_and_idempotent_submit() {
    let home = TempDir::new().expect("Failed to create temp home");
    let socket = socket_path(home.path());
    let child = spawn_receiver(home.path());
    let _guard = ReceiverGuard { child };

    wait_for_socket(&socket, Duration::from_secs(3));

    let health = send_request(
        &socket,
        Request {
            protocol_version: PROTOCOL_VERSION,
            method: Method::GetHealth,
            id: Some("health-check".to_string()),
            params: None,
        },
    );
    assert!(health.ok, "health response was not ok");
    assert_eq!(health.id.as_deref(), Some("health-check"));
    let status = health
        .data
        .as_ref()
        .and_then(|data| data.get("status"))
        .and_then(|value| value.as_str())
        .unwrap_or("missing");
    assert_eq!(status, "ok");

    let first = submit(&socket, "batch-1", vec![finished_trip("trip-a")]);
    assert!(first.ok, "first submit failed: {:?}", first.error);
    assert_eq!(ack_counts(&first), (1, 0));

    let again = submit(
        &socket,
        "batch-2",
        vec![finished_trip("trip-a"), finished_trip("trip-b")],
    );
    assert!(again.ok, "redelivery failed: {:?}", again.error);
    assert_eq!(ack_counts(&again), (1, 1));

    let health = send_request(
        &socket,
        Request {
            protocol_version: PROTOCOL_VERSION,
            method: Method::GetHealth,
            id: None,
            params: None,
        },
    );
    let trips = health
        .data
        .as_ref()
        .and_then(|data| data.get("totals"))
        .and_then(|totals| totals.get("trips"))
        .and_then(|value| value.as_i64());
    assert_eq!(trips, Some(2));
}

#[test]
fn receiver_rejects_bad_requests() {
    let home = TempDir::new().expect("Failed to create temp home");
    let socket = socket_path(home.path());
    let child = spawn_receiver(home.path());
    let _guard = ReceiverGuard { child };

    wait_for_socket(&socket, Duration::from_secs(3));

    let garbage = send_raw(&socket, b"not json\n");
    assert!(!garbage.ok);
    assert_eq!(garbage.error.expect("error").code, "invalid_json");

    let mismatch = send_request(
        &socket,
        Request {
            protocol_version: PROTOCOL_VERSION + 1,
            method: Method::GetHealth,
            id: None,
            params: None,
        },
    );
    assert_eq!(mismatch.error.expect("error").code, "protocol_mismatch");

    let empty = submit(&socket, "empty", Vec::new());
    assert_eq!(empty.error.expect("error").code, "empty_batch");

    let mut broken = finished_trip("trip-c");
    broken.stops.push(broken.stops[0].clone());
    let duplicate_stop = submit(&socket, "dup", vec![broken]);
    assert!(!duplicate_stop.ok);
    assert_eq!(duplicate_stop.error.expect("error").code, "duplicate_stop");
}
