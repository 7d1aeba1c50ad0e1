use std::io::Read;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener};
use std::thread;
use std::time::Duration;

use obstacle_pilot::config::PilotConfig;
use obstacle_pilot::{ChannelError, CommandChannel, Decision, DecisionSink, Framing};

fn listener() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind listener");
    let addr = listener.local_addr().expect("listener addr");
    (listener, addr)
}

fn connect(addr: SocketAddr, framing: Framing) -> CommandChannel {
    let mut settings = PilotConfig::defaults(IpAddr::V4(Ipv4Addr::LOCALHOST)).command;
    settings.addr = addr;
    settings.framing = framing;
    CommandChannel::connect(addr, &settings).expect("connect command channel")
}

fn receive_all(listener: TcpListener) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept");
        let mut received = Vec::new();
        stream.read_to_end(&mut received).expect("read");
        received
    })
}

#[test]
fn raw_framing_concatenates_literals() {
    let (listener, addr) = listener();
    let server = receive_all(listener);

    let mut channel = connect(addr, Framing::Raw);
    for decision in [Decision::TurnLeft, Decision::GoStraight, Decision::None] {
        channel.send(decision).expect("send");
    }
    assert_eq!(channel.sent(), 3);
    channel.close();

    let received = server.join().unwrap();
    assert_eq!(received, b"Turn leftGo straightNone");
}

#[test]
fn newline_framing_delimits_literals() {
    let (listener, addr) = listener();
    let server = receive_all(listener);

    let mut channel = connect(addr, Framing::Newline);
    channel.send(Decision::TurnRight).expect("send");
    channel.send(Decision::None).expect("send");
    drop(channel);

    let received = String::from_utf8(server.join().unwrap()).unwrap();
    let lines: Vec<Option<Decision>> = received.lines().map(Decision::from_wire).collect();
    assert_eq!(lines, vec![Some(Decision::TurnRight), Some(Decision::None)]);
}

#[test]
fn close_is_idempotent_and_blocks_further_sends() {
    let (listener, addr) = listener();
    let server = receive_all(listener);

    let mut channel = connect(addr, Framing::Raw);
    channel.close();
    channel.close();
    assert!(!channel.is_open());
    assert!(matches!(
        channel.send(Decision::GoStraight),
        Err(ChannelError::Closed)
    ));
    assert!(server.join().unwrap().is_empty());
}

#[test]
fn send_fails_once_the_peer_goes_away() {
    let (listener, addr) = listener();
    let server = thread::spawn(move || {
        let (stream, _) = listener.accept().expect("accept");
        drop(stream);
    });

    let mut channel = connect(addr, Framing::Raw);
    server.join().unwrap();
    thread::sleep(Duration::from_millis(50));

    // The first write after the peer closed may still be buffered locally;
    // the reset surfaces on a following one.
    let mut failed = false;
    for _ in 0..50 {
        if channel.send(Decision::TurnLeft).is_err() {
            failed = true;
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }
    assert!(failed, "send kept succeeding after the peer closed");
}

#[test]
fn connect_to_a_closed_port_fails() {
    let (listener, addr) = listener();
    drop(listener);
    let mut settings = PilotConfig::defaults(IpAddr::V4(Ipv4Addr::LOCALHOST)).command;
    settings.connect_timeout = Duration::from_millis(500);
    assert!(CommandChannel::connect(addr, &settings).is_err());
}
