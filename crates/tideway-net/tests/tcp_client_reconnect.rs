use std::{
    io::{Read, Write},
    net::TcpListener,
    sync::Arc,
    time::{Duration, Instant},
};

use tideway_core::{Direction, Engine, IfFlags, Iface, Options, Sentence};
use tideway_net::tcp;

fn read_exact_bytes(conn: &mut impl Read, n: usize) -> Vec<u8> {
    let mut buf = vec![0u8; n];
    conn.read_exact(&mut buf).unwrap();
    buf
}

/// A bidirectional persistent client loses its peer mid-stream, rebuilds
/// the connection through the paired recovery protocol, resends the
/// preamble and carries traffic in both directions again.
#[test]
fn bidirectional_client_survives_reconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port().to_string();

    let engine = Engine::new(64);
    let ifa = Iface::new(0x20000, "feed", Direction::Both, Arc::clone(&engine))
        .with_flags(IfFlags::PERSIST);
    let opts = Options::new()
        .set("address", "127.0.0.1")
        .set("port", &port)
        .set("retry", "1")
        .set("preamble", "\\x01go\\n");

    let mut ifaces = tcp::init(ifa, &opts).unwrap();
    assert_eq!(ifaces.len(), 2);
    let out_q = Arc::clone(ifaces[0].iface().q.as_ref().unwrap());
    let shared = ifaces[0].shared().unwrap();
    let inbound = ifaces.pop().unwrap().spawn().unwrap();
    let outbound = ifaces.pop().unwrap().spawn().unwrap();

    // First connection: the preamble arrives before anything else.
    let (mut conn, _) = listener.accept().unwrap();
    assert_eq!(read_exact_bytes(&mut conn, 4), [0x01, b'g', b'o', b'\n']);

    out_q.push(Sentence::new(b"$GPRMC,1*00\r\n".to_vec(), 0));
    assert_eq!(read_exact_bytes(&mut conn, 13), *b"$GPRMC,1*00\r\n");

    conn.write_all(b"$GPGGA,a*00\r\n").unwrap();
    assert_eq!(engine.q().next().unwrap().data(), b"$GPGGA,a*00\r\n");

    // The peer dies. Whichever sibling notices first performs the
    // reconnect while the other waits it out.
    drop(conn);

    let (mut conn2, _) = listener.accept().unwrap();
    assert_eq!(read_exact_bytes(&mut conn2, 4), [0x01, b'g', b'o', b'\n']);

    // The link swap races our push, so feed the target sentence until it
    // comes out the other end.
    conn2.set_read_timeout(Some(Duration::from_millis(200))).unwrap();
    let deadline = Instant::now() + Duration::from_secs(10);
    let mut seen = Vec::new();
    let target = b"$GPRMC,2*00\r\n";
    loop {
        out_q.push(Sentence::new(target.to_vec(), 0));
        let mut buf = [0u8; 256];
        match conn2.read(&mut buf) {
            Ok(n) => seen.extend_from_slice(&buf[..n]),
            Err(_) => {}
        }
        if seen.windows(target.len()).any(|w| w == target) {
            break;
        }
        assert!(Instant::now() < deadline, "reconnected writer never delivered");
    }

    // Read side is live again as well.
    conn2.write_all(b"$GPGLL,b*00\r\n").unwrap();
    assert_eq!(engine.q().next().unwrap().data(), b"$GPGLL,b*00\r\n");

    // Teardown: poison the link, close the queue, both siblings exit.
    shared.sever();
    out_q.close();
    outbound.join().unwrap();
    inbound.join().unwrap();
}
