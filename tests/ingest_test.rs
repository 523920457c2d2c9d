//! Integration tests for the ingestion listeners over real loopback sockets.

use crossbeam_channel::{bounded, Receiver};
use enose_acquisition::command::CommandClient;
use enose_acquisition::listener::{IngestEvent, IngestListener, ListenerKind};
use enose_acquisition::protocol::RelayStatus;
use enose_acquisition::session::{SamplingState, SessionController};
use std::io::Write;
use std::net::{TcpListener, TcpStream};
use std::time::Duration;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

fn start_listener(kind: ListenerKind) -> (IngestListener, Receiver<IngestEvent>) {
    let (tx, rx) = bounded(10_000);
    let mut listener =
        IngestListener::bind("127.0.0.1:0".parse().unwrap(), kind, tx).expect("bind failed");
    listener.start().expect("start failed");
    (listener, rx)
}

fn recv(rx: &Receiver<IngestEvent>) -> IngestEvent {
    rx.recv_timeout(RECV_TIMEOUT).expect("no event arrived")
}

#[test]
fn test_data_listener_delivers_parsed_frames() {
    let (mut listener, rx) = start_listener(ListenerKind::Data);

    let mut producer = TcpStream::connect(listener.local_addr()).unwrap();
    producer
        .write_all(b"SENSOR:1,2,3,4,5,6,7\n")
        .unwrap();

    let event = recv(&rx);
    let IngestEvent::Frame(readings) = event else {
        panic!("expected a frame event, got {event:?}");
    };
    // Wire order remapped into canonical order.
    assert_eq!(readings.values(), [5.0, 6.0, 7.0, 1.0, 2.0, 3.0, 4.0]);

    listener.stop();
}

#[test]
fn test_lines_batched_and_split_across_reads() {
    let (mut listener, rx) = start_listener(ListenerKind::Data);

    let mut producer = TcpStream::connect(listener.local_addr()).unwrap();
    // Two complete lines plus the head of a third in one write...
    producer
        .write_all(b"SENSOR:1,1,1,1,1,1,1\nSENSOR:2,2,2,2,2,2,2\nSENSOR:3,3,")
        .unwrap();
    producer.flush().unwrap();
    // ...finished by a later write.
    producer.write_all(b"3,3,3,3,3\n").unwrap();

    for expected in [1.0, 2.0, 3.0] {
        let IngestEvent::Frame(readings) = recv(&rx) else {
            panic!("expected a frame event");
        };
        assert_eq!(readings.co_mcs, expected);
    }

    listener.stop();
}

#[test]
fn test_malformed_lines_are_discarded_silently() {
    let (mut listener, rx) = start_listener(ListenerKind::Data);

    let mut producer = TcpStream::connect(listener.local_addr()).unwrap();
    producer
        .write_all(b"SENSOR:1,2,3\nnot a line\nSENSOR:a,b,c,d,e,f,g\nSENSOR:9,9,9,9,9,9,9\n")
        .unwrap();

    // Only the final, valid line makes it through.
    let IngestEvent::Frame(readings) = recv(&rx) else {
        panic!("expected a frame event");
    };
    assert_eq!(readings.no2_gm, 9.0);
    assert!(rx.try_recv().is_err());

    listener.stop();
}

#[test]
fn test_listener_survives_disconnect_and_reconnect() {
    let (mut listener, rx) = start_listener(ListenerKind::Data);

    {
        let mut producer = TcpStream::connect(listener.local_addr()).unwrap();
        producer.write_all(b"SENSOR:1,1,1,1,1,1,1\n").unwrap();
        let _ = recv(&rx);
    } // producer drops: zero-byte read, back to accepting

    let mut producer = TcpStream::connect(listener.local_addr()).unwrap();
    producer.write_all(b"SENSOR:2,2,2,2,2,2,2\n").unwrap();
    let IngestEvent::Frame(readings) = recv(&rx) else {
        panic!("expected a frame event");
    };
    assert_eq!(readings.co_gm, 2.0);
    assert!(listener.is_running());

    listener.stop();
    assert!(!listener.is_running());
}

#[test]
fn test_unterminated_flood_does_not_wedge_listener() {
    let (mut listener, rx) = start_listener(ListenerKind::Data);

    let mut producer = TcpStream::connect(listener.local_addr()).unwrap();
    // 100 KiB with no newline, then a valid line. The buffered garbage must
    // be dropped, not accumulated, and the listener must keep decoding.
    let flood = vec![b'x'; 100 * 1024];
    producer.write_all(&flood).unwrap();
    producer.write_all(b"\nSENSOR:1,2,3,4,5,6,7\n").unwrap();

    let IngestEvent::Frame(readings) = recv(&rx) else {
        panic!("expected a frame event");
    };
    assert_eq!(readings.no2_gm, 1.0);
    assert!(listener.is_running());

    listener.stop();
}

#[test]
fn test_status_listener_matches_exact_tokens() {
    let (mut listener, rx) = start_listener(ListenerKind::Status);

    let mut producer = TcpStream::connect(listener.local_addr()).unwrap();
    producer
        .write_all(b"INFLUX:OK\nINFLUX:RETRY\nINFLUX:ERROR\nINFLUX:OK\n")
        .unwrap();

    assert_eq!(recv(&rx), IngestEvent::Relay(RelayStatus::Ok));
    assert_eq!(recv(&rx), IngestEvent::Relay(RelayStatus::Error));
    assert_eq!(recv(&rx), IngestEvent::Relay(RelayStatus::Ok));
    assert!(rx.try_recv().is_err());

    listener.stop();
}

#[test]
fn test_snapshot_during_live_stream_is_consistent() {
    let command_server = TcpListener::bind("127.0.0.1:0").unwrap();
    let command_addr = command_server.local_addr().unwrap();
    std::thread::spawn(move || while command_server.accept().is_ok() {});
    let commands = CommandClient::new(command_addr);

    let (mut listener, rx) = start_listener(ListenerKind::Data);
    let addr = listener.local_addr();

    let mut controller = SessionController::new();
    controller.start(&commands).unwrap();

    // Stream frames from a writer thread while snapshots are taken between
    // handled events on this one.
    const FRAMES: u64 = 200;
    let writer = std::thread::spawn(move || {
        let mut producer = TcpStream::connect(addr).unwrap();
        for i in 1..=FRAMES {
            producer
                .write_all(format!("SENSOR:{i},2,3,4,5,6,7\n").as_bytes())
                .unwrap();
        }
    });

    for handled in 1..=FRAMES {
        let event = rx.recv_timeout(RECV_TIMEOUT).expect("no event arrived");
        controller.handle_event(event);

        // Every interleaved snapshot is a whole-frame copy: contiguous
        // 1-based indices, never a partially applied frame.
        let snapshot = controller.snapshot("live", "test");
        assert_eq!(snapshot.len() as u64, handled);
        for (offset, frame) in snapshot.frames.iter().enumerate() {
            assert_eq!(frame.sample_index, offset as u64 + 1);
            assert_eq!(frame.channels.no2_gm, (offset + 1) as f64);
        }
    }

    writer.join().unwrap();
    listener.stop();
}

#[test]
fn test_full_pipeline_records_a_session() {
    // Stand-in producer command port that accepts and discards directives.
    let command_server = TcpListener::bind("127.0.0.1:0").unwrap();
    let command_addr = command_server.local_addr().unwrap();
    std::thread::spawn(move || while command_server.accept().is_ok() {});
    let commands = CommandClient::new(command_addr);

    let (tx, rx) = bounded(10_000);
    let mut data = IngestListener::bind("127.0.0.1:0".parse().unwrap(), ListenerKind::Data, tx.clone())
        .unwrap();
    let mut status =
        IngestListener::bind("127.0.0.1:0".parse().unwrap(), ListenerKind::Status, tx).unwrap();
    data.start().unwrap();
    status.start().unwrap();

    let mut controller = SessionController::new();
    controller.start(&commands).unwrap();
    assert_eq!(controller.state(), SamplingState::Sampling);

    let mut data_stream = TcpStream::connect(data.local_addr()).unwrap();
    let mut status_stream = TcpStream::connect(status.local_addr()).unwrap();
    for i in 1..=5 {
        data_stream
            .write_all(format!("SENSOR:{i},2,3,4,5,6,7\n").as_bytes())
            .unwrap();
    }
    status_stream.write_all(b"INFLUX:OK\nINFLUX:OK\n").unwrap();

    // Drain seven events (5 frames + 2 status) through the controller.
    for _ in 0..7 {
        let event = rx.recv_timeout(RECV_TIMEOUT).expect("no event arrived");
        controller.handle_event(event);
    }

    controller.stop(&commands).unwrap();
    data.stop();
    status.stop();

    assert_eq!(controller.sample_count(), 5);
    assert_eq!(controller.influx_status().records_sent, 2);
    let snapshot = controller.snapshot("pipeline", "test");
    assert_eq!(snapshot.len(), 5);
    assert_eq!(snapshot.frames[0].sample_index, 1);
    // First frame carries its wire no2 value of 1 after remapping.
    assert_eq!(snapshot.frames[0].channels.no2_gm, 1.0);
    assert_eq!(snapshot.frames[4].channels.no2_gm, 5.0);
}
