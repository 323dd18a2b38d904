//! Full socket-based integration tests for client ↔ server communication.

use std::time::Duration;

use realm_client::{client::ClientState, GameClient};
use realm_server::{data::WorldData, server::bind_ephemeral};
use realm_shared::{
    config::ClientConfig,
    geo::Tile,
    net,
    protocol::{ClientPacket, ServerPacket},
};
use realm_tests::init_tracing;

const WAIT: Duration = Duration::from_secs(5);

async fn start_server() -> anyhow::Result<(String, std::sync::Arc<tokio::sync::watch::Sender<bool>>)> {
    let (server, cfg) = bind_ephemeral(20, WorldData::demo(Tile::new(122, 657))).await?;
    let stop = server.shutdown_handle();
    tokio::spawn(server.run(None));
    Ok((cfg.server_addr, stop))
}

fn client_cfg(server_addr: &str, username: &str) -> ClientConfig {
    ClientConfig {
        server_addr: server_addr.to_string(),
        username: username.to_string(),
    }
}

/// Login, region updates, chat commands and logout over real sockets.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn client_server_full_roundtrip() -> anyhow::Result<()> {
    init_tracing();
    let (addr, stop) = start_server().await?;

    let mut alice = GameClient::connect(&client_cfg(&addr, "alice")).await?;
    assert_eq!(alice.info.plane_width, 2304);
    assert_eq!(alice.info.plane_height, 1776);

    alice
        .recv_until(WAIT, |p| matches!(p, ServerPacket::RegionNpcs(n) if !n.added.is_empty()))
        .await?;
    assert_eq!(alice.view.me, Tile::new(122, 657));
    assert!(!alice.view.npcs().is_empty());

    alice.send_command("pos").await?;
    let reply = alice
        .recv_until(WAIT, |p| matches!(p, ServerPacket::Message(_)))
        .await?;
    assert_eq!(reply, ServerPacket::Message("Position: (122, 657) plane=0".into()));

    let mut bob = GameClient::connect(&client_cfg(&addr, "bob")).await?;
    let bob_index = bob.index();
    alice
        .recv_until(WAIT, |p| {
            matches!(p, ServerPacket::RegionPlayers(r) if r.added.iter().any(|n| n.index == bob_index))
        })
        .await?;
    assert!(alice.view.player(bob_index).is_some());

    bob.logout().await?;
    let deadline = tokio::time::Instant::now() + WAIT;
    while alice.view.player(bob_index).is_some() {
        assert!(tokio::time::Instant::now() < deadline, "bob never left alice's view");
        alice.recv_timeout(Duration::from_millis(100)).await?;
    }
    while bob.recv_timeout(WAIT).await?.is_some() {}
    assert_eq!(bob.state, ClientState::Disconnected);

    stop.send_replace(true);
    Ok(())
}

#[tokio::test]
async fn duplicate_login_is_rejected() -> anyhow::Result<()> {
    init_tracing();
    let (addr, stop) = start_server().await?;

    let _first = GameClient::connect(&client_cfg(&addr, "carol")).await?;
    let second = GameClient::connect(&client_cfg(&addr, "carol")).await;
    let err = second.err().expect("second login should fail");
    assert!(err.to_string().contains("already logged in"), "{err:#}");

    stop.send_replace(true);
    Ok(())
}

#[tokio::test]
async fn walking_moves_the_player_on_the_server() -> anyhow::Result<()> {
    init_tracing();
    let (addr, stop) = start_server().await?;

    let mut dave = GameClient::connect(&client_cfg(&addr, "dave")).await?;
    dave.recv_until(WAIT, |p| matches!(p, ServerPacket::RegionPlayers(_)))
        .await?;
    dave.send_walk(Tile::new(122, 657), &[(3, 0)]).await?;

    let deadline = tokio::time::Instant::now() + WAIT;
    while dave.view.me != Tile::new(125, 657) {
        assert!(tokio::time::Instant::now() < deadline, "never arrived");
        dave.recv_timeout(Duration::from_millis(100)).await?;
    }

    stop.send_replace(true);
    Ok(())
}

/// A malformed walk body desynchronizes the stream; the server hangs up.
#[tokio::test]
async fn malformed_packet_closes_only_that_connection() -> anyhow::Result<()> {
    init_tracing();
    let (addr, stop) = start_server().await?;
    let mut healthy = GameClient::connect(&client_cfg(&addr, "erin")).await?;

    let (mut reader, mut writer) = net::connect(addr.parse()?).await?;
    writer
        .send(&ClientPacket::Login { username: "mallory".into() }.to_frame())
        .await?;
    let first = reader.recv().await?.expect("world info");
    assert!(matches!(
        ServerPacket::decode(first.opcode, &first.body)?,
        ServerPacket::WorldInfo(_)
    ));
    writer
        .send(&net::Frame::new(
            realm_shared::protocol::opcode::client::WALK,
            bytes_of(&[0x00]),
        ))
        .await?;

    let closed = tokio::time::timeout(WAIT, async {
        loop {
            match reader.recv().await {
                Ok(Some(_)) => continue,
                _ => break,
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "server kept the desynced connection open");

    healthy
        .recv_until(WAIT, |p| matches!(p, ServerPacket::RegionPlayers(_)))
        .await?;
    assert_eq!(healthy.state, ClientState::Connected);

    stop.send_replace(true);
    Ok(())
}

fn bytes_of(data: &[u8]) -> bytes::Bytes {
    bytes::Bytes::copy_from_slice(data)
}
