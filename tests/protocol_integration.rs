//! Integration tests for the CAL/EXIT line protocol.
//!
//! The first group drives `serve` over in-memory pipes. The second spawns
//! the real `escape-cal` binary and talks to it through `CalClient`.
//!
//! # Running
//!
//! ```bash
//! cargo test --test protocol_integration -- --nocapture
//! ```

use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio::io::{duplex, split, AsyncWriteExt, BufReader};
use tokio::time::timeout;

use escape_cal::codec::{decode, Radix};
use escape_cal::config::Config;
use escape_cal::numeric::MpFloat;
use escape_cal::protocol::{
    read_line, serve, CalClient, CalCommand, ClientError, Frame, Shutdown,
};

/// Test timeout to prevent hanging tests.
const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Path of the server binary built alongside these tests.
const SERVER: &str = env!("CARGO_BIN_EXE_escape-cal");

fn cal(precision: u32, z: (&str, &str), c: (&str, &str), max: u64, radius: &str) -> CalCommand {
    CalCommand {
        precision,
        za: z.0.to_string(),
        zb: z.1.to_string(),
        ca: c.0.to_string(),
        cb: c.1.to_string(),
        max_iterations: max,
        escape_radius: radius.to_string(),
    }
}

async fn run_session(input: &str) -> String {
    let mut output = Vec::new();
    timeout(
        TEST_TIMEOUT,
        serve(input.as_bytes(), &mut output, &Config::default()),
    )
    .await
    .expect("Test timed out")
    .expect("Session failed");
    String::from_utf8(output).expect("Replies are UTF-8")
}

#[tokio::test]
async fn test_session_transcript() {
    let transcript = run_session(
        "CAL 64 0 0 0 0 10 2\n\
         CAL 64 0 0 5 0 10 2\n\
         CAL 64 0 0 0 0 0 2\n\
         CAL 64 0 0 0\n\
         EXIT\n\
         CAL 64 0 0 0 0 10 2\n",
    )
    .await;

    assert_eq!(
        transcript,
        "CAL N 0 0 10\n\
         CAL Y 5@1 0 1\n\
         CAL N 0 0 0\n\
         BAD_CMD\n\
         EXIT\n"
    );
}

#[tokio::test]
async fn test_crlf_input() {
    let transcript = run_session("CAL 64 0 0 5 0 10 2\r\nEXIT\r\n").await;
    assert_eq!(transcript, "CAL Y 5@1 0 1\nEXIT\n");
}

#[tokio::test]
async fn test_replies_arrive_before_next_request() {
    // Half-duplex: the reply to the first request must be readable while the
    // second request has not been written yet.
    let (client, server) = duplex(4096);
    let (server_read, server_write) = split(server);
    let (client_read, mut client_write) = split(client);

    let session = tokio::spawn(async move {
        serve(BufReader::new(server_read), server_write, &Config::default()).await
    });

    let mut replies = BufReader::new(client_read);

    client_write
        .write_all(b"CAL 64 0 0 0 0 10 2\n")
        .await
        .expect("Write failed");
    let first = timeout(TEST_TIMEOUT, read_line(&mut replies))
        .await
        .expect("Test timed out")
        .expect("Read failed");
    assert_eq!(first, Frame::Line("CAL N 0 0 10".to_string()));

    client_write.write_all(b"EXIT\n").await.expect("Write failed");
    let second = timeout(TEST_TIMEOUT, read_line(&mut replies))
        .await
        .expect("Test timed out")
        .expect("Read failed");
    assert_eq!(second, Frame::Line("EXIT".to_string()));

    let summary = session
        .await
        .expect("Session panicked")
        .expect("Session failed");
    assert_eq!(summary.shutdown, Shutdown::Exit);
    assert_eq!(summary.calculated, 1);
}

#[tokio::test]
async fn test_main_cardioid_point_does_not_escape() {
    // c = -0.5 + 0i lies inside the main cardioid.
    let transcript = run_session("CAL 128 0 0 -0.g 0 200 2\n").await;
    let fields: Vec<&str> = transcript.split_whitespace().collect();
    assert_eq!(fields[0], "CAL");
    assert_eq!(fields[1], "N");
    assert_eq!(fields[4], "200");

    // The orbit converges to the fixed point (1 - sqrt(3)) / 2 ~ -0.366.
    let real: MpFloat = decode(fields[2], Radix::Base32, 128).expect("Valid base-32 reply");
    let real = real.as_float().to_f64();
    assert!((real + 0.3660254037844386).abs() < 1e-9, "real = {}", real);
}

#[tokio::test]
async fn test_server_binary_round_trip() {
    let mut client = CalClient::spawn(SERVER).await.expect("Server should start");
    client.set_timeout(TEST_TIMEOUT);

    let escaped = client
        .call(&cal(64, ("0", "0"), ("5", "0"), 10, "2"))
        .await
        .expect("CAL should succeed");
    assert!(escaped.escaped);
    assert_eq!(escaped.real, "5@1");
    assert_eq!(escaped.imag, "0");
    assert_eq!(escaped.iterations, 1);

    let bounded = client
        .call(&cal(64, ("0", "0"), ("0", "0"), 10, "2"))
        .await
        .expect("CAL should succeed");
    assert!(!bounded.escaped);
    assert_eq!(bounded.iterations, 10);

    client.exit().await.expect("EXIT should be acknowledged");
}

#[tokio::test]
async fn test_server_binary_rejects_and_continues() {
    let mut client = CalClient::spawn(SERVER).await.expect("Server should start");
    client.set_timeout(TEST_TIMEOUT);

    let rejected = client
        .call(&cal(64, ("@NaN@", "0"), ("0", "0"), 10, "2"))
        .await;
    assert!(
        matches!(rejected, Err(ClientError::Rejected(_))),
        "Expected rejection, got {:?}",
        rejected
    );

    // The session survives the rejection.
    let reply = client
        .call(&cal(64, ("0", "0"), ("2", "0"), 10, "2"))
        .await
        .expect("CAL should succeed");
    assert!(reply.escaped);
    assert_eq!(reply.iterations, 2);
    assert_eq!(reply.real, "6@1");

    client.exit().await.expect("EXIT should be acknowledged");
}
