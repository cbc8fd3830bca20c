//! End-to-end scenarios against real loopback TCP sockets, in the spirit of
//! mio's own `tests/tcp.rs`: no mocks, actual `accept`/`connect`/`recv`/
//! `send` round trips through the reactor.
#![cfg(target_os = "linux")]

use std::net::SocketAddr;
use std::time::Duration;

use proactor::executor::block_on;
use proactor::socket::{Socket, SocketOptions};
use proactor::{Endpoint, Error, IpAddress, Reactor, ReactorConfig};

fn bound_listener() -> (Socket, SocketAddr) {
    let any = SocketAddr::new(IpAddress::loopback(false).into(), 0);
    let listener = Socket::stream(any, SocketOptions::default()).unwrap();
    listener.bind(any).unwrap();
    listener.listen(128).unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

fn outbound(addr: SocketAddr) -> Socket {
    Socket::stream(addr, SocketOptions::default()).unwrap()
}

/// S1: client writes a message, server echoes it back unchanged.
#[test]
fn echoes_a_message() {
    let reactor = Reactor::new(ReactorConfig::default()).unwrap();
    let (listener, addr) = bound_listener();
    let client = outbound(addr);

    block_on(async {
        let endpoint: Endpoint = addr.into();
        let connect = reactor.connect(&client, endpoint);
        let accept = reactor.accept(&listener);

        let (connected, peer) = futures_join(connect, accept).await;
        connected.unwrap();
        let peer = peer.unwrap();

        reactor.send(&client, b"hello").await.unwrap();
        let received = reactor.recv(&peer, 64).await.unwrap();
        assert_eq!(&received, b"hello");

        reactor.send(&peer, &received).await.unwrap();
        let echoed = reactor.recv(&client, 64).await.unwrap();
        assert_eq!(&echoed, b"hello");
    });
}

/// S2: once the peer closes its write side, `recv` resolves to an empty
/// buffer rather than erroring.
#[test]
fn recv_returns_empty_on_peer_close() {
    let reactor = Reactor::new(ReactorConfig::default()).unwrap();
    let (listener, addr) = bound_listener();
    let client = outbound(addr);

    block_on(async {
        let endpoint: Endpoint = addr.into();
        let (connected, peer) = futures_join(reactor.connect(&client, endpoint), reactor.accept(&listener)).await;
        connected.unwrap();
        let peer = peer.unwrap();
        drop(peer);

        let received = reactor.recv(&client, 64).await.unwrap();
        assert!(received.is_empty());
    });
}

/// S3: a short write is reported as-is, with no automatic retry loop inside
/// `send` — that policy belongs to the caller.
#[test]
fn send_reports_actual_bytes_written() {
    let reactor = Reactor::new(ReactorConfig::default()).unwrap();
    let (listener, addr) = bound_listener();
    let client = outbound(addr);

    block_on(async {
        let endpoint: Endpoint = addr.into();
        let (connected, peer) = futures_join(reactor.connect(&client, endpoint), reactor.accept(&listener)).await;
        connected.unwrap();
        let _peer = peer.unwrap();

        let payload = vec![7u8; 1024];
        let sent = reactor.send(&client, &payload).await.unwrap();
        assert!(sent > 0 && sent <= payload.len());
    });
}

/// S4: stopping the reactor while an accept is still pending resolves that
/// task with `Error::Canceled` instead of hanging forever.
#[test]
fn stop_cancels_pending_accept() {
    let reactor = Reactor::new(ReactorConfig::default()).unwrap();
    let (listener, _addr) = bound_listener();

    let pending = reactor.accept(&listener);
    reactor.stop();

    let result = block_on(pending);
    assert!(matches!(result, Err(Error::Canceled)));
}

/// S5: connecting to a port nobody is listening on surfaces the kernel's
/// refusal as an ordinary `Error::Completion`, not a panic or a hang.
#[test]
fn connect_refused_is_a_system_error() {
    let reactor = Reactor::new(ReactorConfig::default()).unwrap();
    let (listener, addr) = bound_listener();
    drop(listener); // free the port without anything listening on it

    let client = outbound(addr);
    let endpoint: Endpoint = addr.into();
    let result = block_on(reactor.connect(&client, endpoint));
    assert!(result.is_err());
}

/// S6: the pool used to track in-flight operations returns to empty once
/// every submitted task has resolved. Each recv gets its own connected
/// socket pair so every one of them can actually be satisfied — a single
/// shared socket can only ever deliver as many recvs as bytes sent on it,
/// leaving the rest pending forever and the pool never draining.
#[test]
fn pool_drains_after_concurrent_recvs() {
    let reactor = Reactor::new(ReactorConfig {
        queue_depth: 128,
        ..ReactorConfig::default()
    })
    .unwrap();

    let mut clients = Vec::new();
    let mut peers = Vec::new();
    for _ in 0..32 {
        let (listener, addr) = bound_listener();
        let client = outbound(addr);
        let endpoint: Endpoint = addr.into();
        let (connected, peer) =
            block_on(futures_join(reactor.connect(&client, endpoint), reactor.accept(&listener)));
        connected.unwrap();
        clients.push(client);
        peers.push(peer.unwrap());
    }

    block_on(async {
        let recvs: Vec<_> = clients.iter().map(|client| reactor.recv(client, 16)).collect();
        for peer in &peers {
            reactor.send(peer, &[1u8]).await.unwrap();
        }
        for recv in recvs {
            let received = recv.await.unwrap();
            assert_eq!(received, vec![1u8]);
        }
    });

    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(reactor.pending_count(), 0);
}

/// Drives two futures to completion without pulling in a full executor —
/// this crate's own `block_on` only drives one future at a time, so tests
/// that need two in flight concurrently poll them by hand.
async fn futures_join<A, B>(a: A, b: B) -> (A::Output, B::Output)
where
    A: std::future::Future + Unpin,
    B: std::future::Future + Unpin,
{
    use std::task::Poll;

    let mut a = Some(a);
    let mut b = Some(b);
    let mut a_out = None;
    let mut b_out = None;
    std::future::poll_fn(move |cx| {
        use std::future::Future;
        use std::pin::Pin;
        if a_out.is_none() {
            if let Some(fut) = a.as_mut() {
                if let Poll::Ready(v) = Pin::new(fut).poll(cx) {
                    a_out = Some(v);
                    a = None;
                }
            }
        }
        if b_out.is_none() {
            if let Some(fut) = b.as_mut() {
                if let Poll::Ready(v) = Pin::new(fut).poll(cx) {
                    b_out = Some(v);
                    b = None;
                }
            }
        }
        if a_out.is_some() && b_out.is_some() {
            Poll::Ready((a_out.take().unwrap(), b_out.take().unwrap()))
        } else {
            Poll::Pending
        }
    })
    .await
}
