use std::{net::TcpListener, sync::Arc, thread, time::Duration};

use tideway_core::{Direction, Engine, IfFlags, Iface, Options, Sentence};
use tideway_net::tcp;

/// Once the link is terminally down, both siblings of a persistent pair
/// converge to exit through the sticky-dead check, and the shared state
/// is torn down exactly once (the refcount reaching its last holder).
#[test]
fn severed_link_stops_both_siblings() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port().to_string();

    let engine = Engine::new(64);
    let ifa = Iface::new(0x30000, "uplink", Direction::Both, Arc::clone(&engine))
        .with_flags(IfFlags::PERSIST);
    let opts =
        Options::new().set("address", "127.0.0.1").set("port", &port).set("retry", "1");

    let mut ifaces = tcp::init(ifa, &opts).unwrap();
    let out_q = Arc::clone(ifaces[0].iface().q.as_ref().unwrap());
    let shared = ifaces[0].shared().unwrap();
    let inbound = ifaces.pop().unwrap().spawn().unwrap();
    let outbound = ifaces.pop().unwrap().spawn().unwrap();

    let (_conn, _) = listener.accept().unwrap();
    // Let the reader reach its blocking read.
    thread::sleep(Duration::from_millis(100));

    shared.sever();
    out_q.close();

    inbound.join().unwrap();
    outbound.join().unwrap();
    assert!(shared.is_dead());

    // Pushing after death goes nowhere and wakes nobody.
    out_q.push(Sentence::new(b"$GPGGA,1*00\r\n".to_vec(), 0));

    // Both sibling threads dropped their handles; ours is the last one.
    assert_eq!(Arc::strong_count(&shared), 1);
}
