//! End-to-end tick scenarios, driven through `Game` without sockets.

use rand::{rngs::StdRng, Rng, SeedableRng};
use realm_client::RegionView;
use realm_server::{
    entity::{CombatParticipant, PlayerIndex, Positioned, Walkable},
    game::{self, Action, Game, Intent},
    player::Skill,
    region::RegionEncoder,
    visibility::VisibilityTracker,
    world::WorldState,
};
use realm_shared::{
    geo::Tile,
    net::ConnectionId,
    protocol::{CombatStyle, ServerPacket, WalkRequest},
};
use realm_tests::{apply_outgoing, init_tracing, settings, world};

/// Runs one tick and feeds `observer`'s frames into `view`.
fn tick_into_view(
    game: &mut Game,
    w: &mut WorldState,
    tick: u64,
    observer: PlayerIndex,
    view: &mut RegionView,
) -> Vec<ServerPacket> {
    let report = game.tick(w, tick);
    assert!(report.errors.is_empty(), "{:?}", report.errors);
    let out = report
        .outgoing
        .iter()
        .find(|o| o.player == observer)
        .unwrap();
    apply_outgoing(view, out).unwrap()
}

#[test]
fn npc_in_range_is_announced_with_its_offset() {
    init_tracing();
    let mut w = world(16);
    let p = w.add_player("p", ConnectionId(1)).unwrap();
    let n = w.spawn_npc(1, Tile::new(105, 100), None).unwrap();

    VisibilityTracker::new(16).refresh(&mut w, p).unwrap();
    assert!(w.player(p).unwrap().npcs.added().contains(&n));

    let frames = RegionEncoder::default().flush(&mut w, p).unwrap();
    let npcs = match ServerPacket::decode(frames[1].opcode, &frames[1].body).unwrap() {
        ServerPacket::RegionNpcs(npcs) => npcs,
        other => panic!("unexpected {other:?}"),
    };
    assert_eq!(npcs.added.len(), 1);
    assert_eq!(npcs.added[0].index, n.0);
    assert_eq!((npcs.added[0].offset_x, npcs.added[0].offset_y), (5, 0));
}

#[test]
fn accurate_attacker_kills_a_weak_npc() {
    init_tracing();
    let mut w = world(16);
    let p = w.add_player("fighter", ConnectionId(1)).unwrap();
    {
        let me = w.player_mut(p).unwrap();
        me.stats.set_level(Skill::Attack, 10);
        me.stats.set_level(Skill::Strength, 10);
        me.style = CombatStyle::Accurate;
    }
    let n = w.spawn_npc(1, Tile::new(101, 100), None).unwrap();
    let npc_max_hit = w.npc(n).unwrap().max_hit();

    let (mut game, tx) = Game::seeded(&settings(16), 42);
    tx.send(Intent {
        connection: ConnectionId(1),
        action: Action::Attack(n),
    })
    .unwrap();

    let mut npc_hits = w.npc(n).unwrap().current_hits();
    let mut player_hits = w.player(p).unwrap().current_hits();
    let mut tick = 0;
    while !w.npc(n).unwrap().is_dead() {
        tick += 1;
        assert!(tick < 300, "npc still alive after {tick} ticks");
        game.tick(&mut w, tick);

        let now = w.npc(n).unwrap().current_hits();
        assert!(now <= npc_hits);
        npc_hits = now;

        let mine = w.player(p).unwrap().current_hits();
        assert!(player_hits.saturating_sub(mine) <= npc_max_hit);
        player_hits = mine;
    }

    assert_eq!(npc_hits, 0);
    assert!(!w.player(p).unwrap().in_combat());
    for extra in 1..=10 {
        game.tick(&mut w, tick + extra);
        assert!(w.npc(n).unwrap().is_dead());
    }

    let npc = w.npc_mut(n).unwrap();
    npc.respawn();
    assert!(!npc.is_dead());
    assert_eq!(npc.current_hits(), 5);
}

#[test]
fn walk_catches_up_before_following_the_path() {
    init_tracing();
    let mut w = world(16);
    let p = w.add_player("walker", ConnectionId(1)).unwrap();
    let watcher = w.add_player("watcher", ConnectionId(2)).unwrap();
    w.player_mut(watcher)
        .unwrap()
        .set_tile(Tile::new(100, 106));

    let (mut game, _tx) = Game::seeded(&settings(16), 1);
    let mut view = RegionView::new();
    tick_into_view(&mut game, &mut w, 1, watcher, &mut view);

    let steps = vec![(1, 0), (0, 1), (1, 1)];
    game.apply(
        &mut w,
        Intent {
            connection: ConnectionId(1),
            action: Action::Walk(WalkRequest {
                start_x: 102,
                start_y: 100,
                steps: steps.clone(),
            }),
        },
    );
    assert_eq!(w.player(p).unwrap().walk_queue().len(), 5);

    for tick in 2..=7 {
        tick_into_view(&mut game, &mut w, tick, watcher, &mut view);
    }

    let (sx, sy) = steps
        .iter()
        .fold((0, 0), |(x, y), &(dx, dy)| (x + i32::from(dx), y + i32::from(dy)));
    let end = Tile::new(102 + sx, 100 + sy);
    assert_eq!(w.player(p).unwrap().tile(), end);
    assert!(!w.player(p).unwrap().walked());
    assert_eq!(view.player(p.0).unwrap().tile, end);
}

#[test]
fn departed_player_is_never_encoded_again() {
    init_tracing();
    let mut w = world(16);
    let a = w.add_player("a", ConnectionId(1)).unwrap();
    let b = w.add_player("b", ConnectionId(2)).unwrap();
    let c = w.add_player("c", ConnectionId(3)).unwrap();

    let (mut game, _tx) = Game::seeded(&settings(16), 5);
    let mut view = RegionView::new();
    tick_into_view(&mut game, &mut w, 1, b, &mut view);
    assert!(w.player(b).unwrap().players.knows(a));
    assert_eq!(view.players().len(), 2);

    game::depart_player(&mut w, a).unwrap();
    let bs = &w.player(b).unwrap().players;
    assert!(!bs.known().contains(&a));
    assert!(!bs.added().contains(&a));
    assert!(!bs.moved().contains(&a));
    assert!(!bs.removed().contains(&a));

    for tick in 2..=4 {
        let packets = tick_into_view(&mut game, &mut w, tick, b, &mut view);
        for packet in packets {
            if let ServerPacket::RegionPlayers(p) = packet {
                assert!(p.added.iter().all(|n| n.index != a.0));
            }
        }
    }
    let seen: Vec<u16> = view.players().iter().map(|e| e.index).collect();
    assert_eq!(seen, vec![c.0]);
}

#[test]
fn visibility_stays_symmetric_and_partitioned_under_random_walks() {
    init_tracing();
    let radius = 6;
    let mut w = world(radius);
    let mut rng = StdRng::seed_from_u64(99);
    let mut players = Vec::new();
    for i in 0..8u64 {
        let idx = w.add_player(&format!("p{i}"), ConnectionId(i + 1)).unwrap();
        let tile = Tile::new(100 + rng.gen_range(-8..=8), 100 + rng.gen_range(-8..=8));
        w.player_mut(idx).unwrap().set_tile(tile);
        players.push(idx);
    }
    for _ in 0..5 {
        let tile = Tile::new(100 + rng.gen_range(-8..=8), 100 + rng.gen_range(-8..=8));
        w.spawn_npc(2, tile, None).unwrap();
    }

    let (mut game, tx) = Game::seeded(&settings(radius), 7);
    let mut views: Vec<RegionView> = players.iter().map(|_| RegionView::new()).collect();

    for tick in 1..=60 {
        for (i, &idx) in players.iter().enumerate() {
            if rng.gen_bool(0.3) {
                let here = w.player(idx).unwrap().tile();
                let step = (rng.gen_range(-2..=2i8), rng.gen_range(-2..=2i8));
                tx.send(Intent {
                    connection: ConnectionId(i as u64 + 1),
                    action: Action::Walk(WalkRequest {
                        start_x: here.x as i16,
                        start_y: here.y as i16,
                        steps: vec![step],
                    }),
                })
                .unwrap();
            }
        }

        let report = game.tick(&mut w, tick);
        assert!(report.errors.is_empty(), "{:?}", report.errors);
        for out in &report.outgoing {
            let slot = players.iter().position(|&p| p == out.player).unwrap();
            apply_outgoing(&mut views[slot], out).unwrap();
        }

        for (slot, &a) in players.iter().enumerate() {
            let pa = w.player(a).unwrap();
            assert!(pa.players.is_partitioned() && pa.npcs.is_partitioned());

            let known: Vec<u16> = pa.players.known().iter().map(|i| i.0).collect();
            let seen: Vec<u16> = views[slot].players().iter().map(|e| e.index).collect();
            assert_eq!(known, seen, "view of {a} drifted at tick {tick}");

            for &b in &players {
                if a == b {
                    continue;
                }
                let pb = w.player(b).unwrap();
                if pa.tile().within(pb.tile(), radius) {
                    assert_eq!(
                        pa.players.knows(b),
                        pb.players.knows(a),
                        "asymmetric {a}/{b} at tick {tick}"
                    );
                    assert!(pa.players.knows(b));
                }
            }
        }
    }
}
