//! Integration tests for the messaging substrate.

use std::sync::atomic::{AtomicU16, Ordering};

use mas_core::{Message, MessageBody};

use crate::{NetError, Socket, SocketMap};

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Hand out a fresh loopback port per call so tests never collide.
fn next_endpoint() -> String {
    static NEXT_PORT: AtomicU16 = AtomicU16::new(41_000);
    format!("tcp://127.0.0.1:{}", NEXT_PORT.fetch_add(1, Ordering::Relaxed))
}

fn toc(dst: &str, src: &str, t: f64) -> Message {
    Message::new(dst, src, MessageBody::Toc { t })
}

// ── Frame codec ───────────────────────────────────────────────────────────────

mod frames {
    use bytes::Bytes;

    use crate::frame::{Frames, read_frames, write_frames};

    #[tokio::test]
    async fn roundtrip_over_duplex() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        let sent = Frames {
            dst: "AGENT_0".into(),
            src: "MANAGER".into(),
            body: Bytes::from_static(b"{\"kind\":\"SimStart\"}"),
        };
        write_frames(&mut a, &sent).await.unwrap();
        let got = read_frames(&mut b).await.unwrap();
        assert_eq!(sent, got);
    }

    #[tokio::test]
    async fn eof_mid_frame_is_an_error() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        use tokio::io::AsyncWriteExt;
        a.write_u32(100).await.unwrap(); // promise 100 bytes…
        a.write_all(b"short").await.unwrap(); // …deliver 5
        drop(a);
        assert!(read_frames(&mut b).await.is_err());
    }
}

// ── Publish / subscribe ───────────────────────────────────────────────────────

mod pub_sub {
    use super::*;

    #[tokio::test]
    async fn fan_out_reaches_all_subscribers() {
        let ep = next_endpoint();
        let publisher = Socket::publish("MANAGER", &[ep.clone()]).await.unwrap();
        let sub_a = Socket::subscribe("AGENT_0", &[ep.clone()], vec!["AGENT_0".into(), "ALL".into()])
            .await
            .unwrap();
        let sub_b = Socket::subscribe("AGENT_1", &[ep.clone()], vec!["AGENT_1".into(), "ALL".into()])
            .await
            .unwrap();

        // Let both subscriber connections be accepted before publishing.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        publisher.send(&toc("ALL", "MANAGER", 1.0)).await.unwrap();
        assert_eq!(sub_a.recv().await.unwrap().kind(), "Toc");
        assert_eq!(sub_b.recv().await.unwrap().kind(), "Toc");
    }

    #[tokio::test]
    async fn destination_filter_drops_foreign_messages() {
        let ep = next_endpoint();
        let publisher = Socket::publish("MANAGER", &[ep.clone()]).await.unwrap();
        let sub = Socket::subscribe("AGENT_0", &[ep.clone()], vec!["AGENT_0".into(), "ALL".into()])
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        publisher.send(&toc("AGENT_1", "MANAGER", 1.0)).await.unwrap();
        publisher.send(&toc("AGENT_0", "MANAGER", 2.0)).await.unwrap();

        // The first delivered message must be the one addressed to us.
        let msg = sub.recv().await.unwrap();
        match msg.body {
            MessageBody::Toc { t } => assert_eq!(t, 2.0),
            _ => panic!("wrong body"),
        }
    }

    #[tokio::test]
    async fn send_on_subscribe_panics() {
        let result = tokio::spawn(async {
            let ep = next_endpoint();
            let _publisher = Socket::publish("P", &[ep.clone()]).await.unwrap();
            let sub = Socket::subscribe("S", &[ep], vec!["S".into()]).await.unwrap();
            sub.send(&toc("P", "S", 0.0)).await
        })
        .await;
        assert!(result.is_err(), "capability misuse must panic");
    }
}

// ── Request / reply ───────────────────────────────────────────────────────────

mod req_rep {
    use super::*;

    #[tokio::test]
    async fn round_trip_and_alternation() {
        let ep = next_endpoint();
        let replier = Socket::reply("MANAGER", &[ep.clone()]).await.unwrap();
        let requester = Socket::request("AGENT_0");
        requester.connect(&ep).await.unwrap();

        requester.send(&toc("MANAGER", "AGENT_0", 1.0)).await.unwrap();

        let request = replier.recv().await.unwrap();
        assert_eq!(request.src, "AGENT_0");
        replier
            .send(&Message::new("AGENT_0", "MANAGER", MessageBody::ReceptionAck))
            .await
            .unwrap();

        let reply = requester.recv().await.unwrap();
        assert_eq!(reply.kind(), "ReceptionAck");
    }

    #[tokio::test]
    async fn replier_fair_queues_multiple_requesters() {
        let ep = next_endpoint();
        let replier = Socket::reply("MANAGER", &[ep.clone()]).await.unwrap();

        let mut requesters = Vec::new();
        for i in 0..3 {
            let requester = Socket::request(&format!("AGENT_{i}"));
            requester.connect(&ep).await.unwrap();
            requester
                .send(&toc("MANAGER", &format!("AGENT_{i}"), i as f64))
                .await
                .unwrap();
            requesters.push(requester);
        }

        let mut seen = Vec::new();
        for _ in 0..3 {
            let request = replier.recv().await.unwrap();
            seen.push(request.src.clone());
            replier
                .send(&Message::new(request.src, "MANAGER", MessageBody::ReceptionAck))
                .await
                .unwrap();
        }
        seen.sort();
        assert_eq!(seen, ["AGENT_0", "AGENT_1", "AGENT_2"]);

        for requester in &requesters {
            assert_eq!(requester.recv().await.unwrap().kind(), "ReceptionAck");
        }
    }

    #[tokio::test]
    async fn double_send_without_reply_panics() {
        let result = tokio::spawn(async {
            let ep = next_endpoint();
            let _replier = Socket::reply("M", &[ep.clone()]).await.unwrap();
            let requester = Socket::request("A");
            requester.connect(&ep).await.unwrap();
            requester.send(&toc("M", "A", 0.0)).await.unwrap();
            requester.send(&toc("M", "A", 1.0)).await // alternation violation
        })
        .await;
        assert!(result.is_err(), "alternation violation must panic");
    }
}

// ── Push / pull ───────────────────────────────────────────────────────────────

mod push_pull {
    use super::*;

    #[tokio::test]
    async fn fan_in_from_many_pushers() {
        let ep = next_endpoint();
        let sink = Socket::pull("MONITOR", &[ep.clone()]).await.unwrap();

        for i in 0..3 {
            let pusher = Socket::push(&format!("AGENT_{i}"), &[ep.clone()]).await.unwrap();
            pusher
                .send(&toc("MONITOR", &format!("AGENT_{i}"), i as f64))
                .await
                .unwrap();
        }

        let mut sources = Vec::new();
        for _ in 0..3 {
            sources.push(sink.recv().await.unwrap().src);
        }
        sources.sort();
        assert_eq!(sources, ["AGENT_0", "AGENT_1", "AGENT_2"]);
    }
}

// ── Binding ───────────────────────────────────────────────────────────────────

mod binding {
    use super::*;

    #[tokio::test]
    async fn bind_conflict_is_fatal() {
        let ep = next_endpoint();
        let _first = Socket::publish("A", &[ep.clone()]).await.unwrap();
        let second = Socket::publish("B", &[ep.clone()]).await;
        assert!(matches!(second, Err(NetError::BindConflict(_))));
    }

    #[tokio::test]
    async fn malformed_endpoint_rejected() {
        let result = Socket::publish("A", &["udp://127.0.0.1:1".into()]).await;
        assert!(matches!(result, Err(NetError::BadEndpoint(_))));
    }
}

// ── SocketMap ─────────────────────────────────────────────────────────────────

mod socket_map {
    use mas_core::SocketRole;
    use rustc_hash::FxHashMap;

    use super::*;

    #[tokio::test]
    async fn builds_all_roles_and_routes() {
        let pub_ep = next_endpoint();
        let rep_ep = next_endpoint();

        let mut manager_side = FxHashMap::default();
        manager_side.insert(SocketRole::Publish, vec![pub_ep.clone()]);
        manager_side.insert(SocketRole::Reply, vec![rep_ep.clone()]);
        let manager = SocketMap::build("MANAGER", &manager_side).await.unwrap();

        let mut node_side = FxHashMap::default();
        node_side.insert(SocketRole::Subscribe, vec![pub_ep]);
        node_side.insert(SocketRole::Request, vec![rep_ep.clone()]);
        let node = SocketMap::build("AGENT_0", &node_side).await.unwrap();

        node.get(SocketRole::Request).connect(&rep_ep).await.unwrap();
        node.send(SocketRole::Request, &toc("MANAGER", "AGENT_0", 0.0))
            .await
            .unwrap();
        let request = manager.recv(SocketRole::Reply).await.unwrap();
        assert_eq!(request.kind(), "Toc");
        manager
            .send(
                SocketRole::Reply,
                &Message::new("AGENT_0", "MANAGER", MessageBody::ReceptionAck),
            )
            .await
            .unwrap();
        assert_eq!(node.recv(SocketRole::Request).await.unwrap().kind(), "ReceptionAck");

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        manager.send(SocketRole::Publish, &toc("ALL", "MANAGER", 1.0)).await.unwrap();
        assert_eq!(node.recv(SocketRole::Subscribe).await.unwrap().kind(), "Toc");
    }

    #[tokio::test]
    async fn missing_role_panics() {
        let map = SocketMap::default();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            map.get(SocketRole::Publish)
        }));
        assert!(result.is_err());
    }
}
