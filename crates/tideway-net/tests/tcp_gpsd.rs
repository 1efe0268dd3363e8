use std::{io::Read, net::TcpListener, sync::Arc};

use tideway_core::{Direction, Engine, Iface, Options, Sentence};
use tideway_net::tcp::{self, GPSD_WATCH};

/// The gpsd shortcut sends exactly the WATCH request on connect, before
/// any payload.
#[test]
fn gpsd_watch_is_sent_first() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port().to_string();

    let engine = Engine::new(16);
    let ifa = Iface::new(0x40000, "gps", Direction::Out, Arc::clone(&engine));
    let opts = Options::new()
        .set("address", "127.0.0.1")
        .set("gpsd", "yes")
        .set("port", &port);

    let mut ifaces = tcp::init(ifa, &opts).unwrap();
    let iface = ifaces.pop().unwrap();
    let out_q = Arc::clone(iface.iface().q.as_ref().unwrap());
    // The preamble goes out during init, before the writer even runs.
    let writer = iface.spawn().unwrap();

    let (mut conn, _) = listener.accept().unwrap();
    let mut watch = vec![0u8; GPSD_WATCH.len()];
    conn.read_exact(&mut watch).unwrap();
    assert_eq!(watch, GPSD_WATCH.as_bytes());

    out_q.push(Sentence::new(b"$GPGGA,1*00\r\n".to_vec(), 0));
    let mut line = vec![0u8; 13];
    conn.read_exact(&mut line).unwrap();
    assert_eq!(line, b"$GPGGA,1*00\r\n");

    out_q.close();
    writer.join().unwrap();
}
