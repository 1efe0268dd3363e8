use std::{io::Write, net::TcpStream, sync::Arc, thread, time::Duration};

use tideway_core::{Direction, Engine, ID_MINOR_MASK, Iface, Options};
use tideway_net::tcp;

/// A listening interface hands every client its own peer interface; one
/// client going away leaves the others and the acceptor untouched.
#[test]
fn server_accepts_independent_peers() {
    let engine = Engine::new(64);
    let ifa = Iface::new(0x10000, "listen", Direction::In, Arc::clone(&engine));
    let opts = Options::new().set("mode", "server").set("port", "0");

    let mut ifaces = tcp::init(ifa, &opts).unwrap();
    assert_eq!(ifaces.len(), 1);
    let server = ifaces.pop().unwrap();
    let server_ifa = Arc::clone(server.iface());
    let port = server.local_addr().unwrap().port();
    let acceptor = server.spawn().unwrap();

    let mut c1 = TcpStream::connect(("127.0.0.1", port)).unwrap();
    let mut c2 = TcpStream::connect(("127.0.0.1", port)).unwrap();
    c1.write_all(b"$GPGGA,1*00\r\n").unwrap();
    c2.write_all(b"$GPGLL,2*00\r\n").unwrap();

    let a = engine.q().next().unwrap();
    let b = engine.q().next().unwrap();
    // Each peer got its own id, derived from the parent's.
    assert_ne!(a.src(), b.src());
    assert_eq!(a.src() & !ID_MINOR_MASK, 0x10000);
    assert_eq!(b.src() & !ID_MINOR_MASK, 0x10000);
    let mut lines = vec![a.data().to_vec(), b.data().to_vec()];
    lines.sort();
    assert_eq!(lines, vec![b"$GPGGA,1*00\r\n".to_vec(), b"$GPGLL,2*00\r\n".to_vec()]);

    // First client disconnects; its peer exits quietly and the second
    // keeps flowing.
    drop(c1);
    thread::sleep(Duration::from_millis(100));
    c2.write_all(b"$GPGLL,3*00\r\n").unwrap();
    assert_eq!(engine.q().next().unwrap().data(), b"$GPGLL,3*00\r\n");

    // And the acceptor still takes a third connection.
    let mut c3 = TcpStream::connect(("127.0.0.1", port)).unwrap();
    c3.write_all(b"$GPGGA,4*00\r\n").unwrap();
    assert_eq!(engine.q().next().unwrap().data(), b"$GPGGA,4*00\r\n");

    // Shutdown: flag the interface, then poke the blocking accept.
    server_ifa.shutdown();
    drop(TcpStream::connect(("127.0.0.1", port)).unwrap());
    acceptor.join().unwrap();
}
