//! Socket-level relay behaviour observed through raw protocol peers.

use std::{collections::HashMap, time::Duration};

use posesync_shared::{
    math::{Euler, Vec3},
    protocol::WireMessage,
};
use posesync_tests::{init_tracing, spawn_relay, RawPeer};

const WAIT: Duration = Duration::from_secs(2);
const QUIET: Duration = Duration::from_millis(200);

fn update(x: f32) -> WireMessage {
    WireMessage::StateUpdate {
        position: Vec3::new(x, 0.0, 0.0),
        rotation: Euler::new(0.0, 0.5, 0.0),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn update_reaches_survivor_when_one_peer_is_gone() -> anyhow::Result<()> {
    init_tracing();
    let (cfg, _state) = spawn_relay().await?;

    let mut a = RawPeer::connect(&cfg).await?;
    let b = RawPeer::connect(&cfg).await?;
    let mut c = RawPeer::connect(&cfg).await?;
    drop(b);

    a.send(&update(4.0)).await?;

    let a_id = a.id.clone();
    let msg = c
        .recv_until(WAIT, |m| matches!(m, WireMessage::PeerState { player } if player.id == a_id))
        .await?;
    let WireMessage::PeerState { player } = msg else {
        unreachable!()
    };
    assert_eq!(player.position, Vec3::new(4.0, 0.0, 0.0));
    assert!(player.timestamp > 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn join_and_leave_are_announced_exactly_once() -> anyhow::Result<()> {
    init_tracing();
    let (cfg, state) = spawn_relay().await?;

    let mut a = RawPeer::connect(&cfg).await?;
    let mut b = RawPeer::connect(&cfg).await?;
    let x = RawPeer::connect(&cfg).await?;
    let x_id = x.id.clone();

    for peer in [&mut a, &mut b] {
        let seen = peer.drain(QUIET).await?;
        let joins = seen
            .iter()
            .filter(|m| matches!(m, WireMessage::PeerJoined { player } if player.id == x_id))
            .count();
        assert_eq!(joins, 1);
    }

    drop(x);

    for peer in [&mut a, &mut b] {
        peer.recv_until(WAIT, |m| matches!(m, WireMessage::PeerLeft { client_id } if *client_id == x_id))
            .await?;
        let extra = peer.drain(QUIET).await?;
        assert!(!extra
            .iter()
            .any(|m| matches!(m, WireMessage::PeerLeft { client_id } if *client_id == x_id)));
    }
    assert_eq!(state.connection_count(), 2);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn init_lists_others_with_latest_pose() -> anyhow::Result<()> {
    init_tracing();
    let (cfg, _state) = spawn_relay().await?;

    let mut a = RawPeer::connect(&cfg).await?;
    let mut b = RawPeer::connect(&cfg).await?;
    let a_id = a.id.clone();

    a.send(&update(1.0)).await?;
    a.send(&update(2.0)).await?;
    b.recv_until(WAIT, |m| {
        matches!(m, WireMessage::PeerState { player } if player.position.x == 2.0)
    })
    .await?;

    let c = RawPeer::connect(&cfg).await?;
    assert_eq!(c.players.len(), 2);
    assert!(c.players.iter().all(|p| p.id != c.id));
    let a_state = c
        .players
        .iter()
        .find(|p| p.id == a_id)
        .expect("a listed in init");
    assert_eq!(a_state.position, Vec3::new(2.0, 0.0, 0.0));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn bad_messages_do_not_end_the_connection() -> anyhow::Result<()> {
    init_tracing();
    let (cfg, state) = spawn_relay().await?;

    let mut a = RawPeer::connect(&cfg).await?;
    let mut b = RawPeer::connect(&cfg).await?;
    let a_id = a.id.clone();

    a.send_raw(b"{ definitely not json").await?;
    a.send_raw(br#"{"type":"teleport","to":"moon"}"#).await?;
    a.send_raw(br#"{"type":"state-update","position":{"x":1}}"#).await?;
    a.send(&update(9.0)).await?;

    let msg = b
        .recv_until(WAIT, |m| matches!(m, WireMessage::PeerState { .. }))
        .await?;
    let WireMessage::PeerState { player } = msg else {
        unreachable!()
    };
    assert_eq!(player.id, a_id);
    assert_eq!(player.position.x, 9.0);
    assert_eq!(state.connection_count(), 2);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shots_go_to_everyone_but_the_shooter() -> anyhow::Result<()> {
    init_tracing();
    let (cfg, _state) = spawn_relay().await?;

    let mut a = RawPeer::connect(&cfg).await?;
    let mut b = RawPeer::connect(&cfg).await?;
    let a_id = a.id.clone();
    a.drain(QUIET).await?;

    a.send(&WireMessage::Shoot {
        origin: Vec3::new(0.0, 1.6, 0.0),
        direction: Vec3::new(0.0, 0.0, -1.0),
    })
    .await?;

    let msg = b
        .recv_until(WAIT, |m| matches!(m, WireMessage::PlayerShot { .. }))
        .await?;
    let WireMessage::PlayerShot {
        client_id,
        direction,
        ..
    } = msg
    else {
        unreachable!()
    };
    assert_eq!(client_id, a_id);
    assert_eq!(direction, Vec3::new(0.0, 0.0, -1.0));

    let echoed = a.drain(QUIET).await?;
    assert!(!echoed
        .iter()
        .any(|m| matches!(m, WireMessage::PlayerShot { .. })));
    Ok(())
}

fn sequenced(seq: u32, tag: f32) -> WireMessage {
    WireMessage::StateUpdate {
        position: Vec3::new(seq as f32, 0.0, tag),
        rotation: Euler::new(0.0, seq as f32, 0.0),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_bursts_stay_whole_and_ordered_per_sender() -> anyhow::Result<()> {
    const BURST: u32 = 50;
    init_tracing();
    let (cfg, _state) = spawn_relay().await?;

    let a = RawPeer::connect(&cfg).await?;
    let b = RawPeer::connect(&cfg).await?;
    let mut c = RawPeer::connect(&cfg).await?;
    let tags = HashMap::from([(a.id.clone(), 1.0f32), (b.id.clone(), 2.0f32)]);

    let senders: Vec<_> = [(a, 1.0f32), (b, 2.0f32)]
        .into_iter()
        .map(|(mut peer, tag)| {
            tokio::spawn(async move {
                for seq in 1..=BURST {
                    peer.send(&sequenced(seq, tag)).await?;
                    tokio::task::yield_now().await;
                }
                Ok::<_, anyhow::Error>(peer)
            })
        })
        .collect();

    let mut received = Vec::new();
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        match c.recv_timeout(QUIET).await? {
            Some(WireMessage::PeerState { player }) => received.push(player),
            Some(_) => {}
            None => break,
        }
    }
    // Peers stay connected until C has read everything.
    for sender in senders {
        sender.await??;
    }

    let mut last_seq: HashMap<_, f32> = HashMap::new();
    for player in &received {
        let tag = tags.get(&player.id).copied();
        assert_eq!(Some(player.position.z), tag, "position from another sender");
        assert_eq!(player.position.x, player.rotation.y, "mixed position/rotation");
        let prev = last_seq.insert(player.id.clone(), player.position.x);
        if let Some(prev) = prev {
            assert!(player.position.x > prev, "{} went {prev} -> {}", player.id, player.position.x);
        }
    }
    assert_eq!(last_seq.len(), 2, "both senders should be heard");
    Ok(())
}
