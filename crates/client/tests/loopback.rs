//! Full client/server session over loopback UDP: registration, the join
//! parade, prediction against live heartbeats, remote-entity replication
//! and the goodbye path.

use std::time::Duration;

use glam::Vec3;

use cytos::{Chunk, InputFlags, InputVars};
use cytos_client::{ClientConfig, ClientState, NetworkClient};
use cytos_server::{GameServer, ServerConfig};

const FRAME: Duration = Duration::from_millis(4);

fn forward_input() -> InputVars {
    InputVars::new(
        Vec3::new(0.0, 0.0, -100.0),
        Vec3::new(0.0, 0.0, -1.0),
        InputFlags::empty(),
    )
}

/// Pumps both loops until `done` returns true or the budget runs out.
fn pump(
    server: &mut GameServer,
    client: &mut NetworkClient,
    input: InputVars,
    max_frames: u32,
    mut done: impl FnMut(&GameServer, &NetworkClient) -> bool,
) -> bool {
    for _ in 0..max_frames {
        server.tick_once();
        client
            .update(FRAME.as_secs_f32(), input)
            .expect("client update failed");
        if done(server, client) {
            return true;
        }
        std::thread::sleep(FRAME);
    }
    false
}

#[test]
fn full_session_lifecycle() {
    let mut server = GameServer::new("127.0.0.1:0", ServerConfig::default()).unwrap();
    let addr = server.local_addr();

    let config = ClientConfig {
        name: "lifecycle".to_string(),
        ..Default::default()
    };
    let mut client = NetworkClient::new(config).unwrap();
    client.connect(addr).unwrap();

    // Registration, empty-world join parade, possession.
    assert!(
        pump(&mut server, &mut client, forward_input(), 1500, |_, c| c
            .is_active()),
        "client never became active"
    );
    let local_id = client.local_entity().expect("no possessed entity");
    assert_eq!(server.world().len(), 1);

    // Inputs flow, the server simulates them, heartbeats come back and the
    // prediction stays on a moving entity.
    assert!(
        pump(&mut server, &mut client, forward_input(), 1500, |s, c| {
            let server_moved = s
                .world()
                .state_of(local_id)
                .is_some_and(|state| state.position.z < -0.5);
            let predicted_moved = c
                .predicted_state()
                .is_some_and(|state| state.position.z < -0.5);
            server_moved && predicted_moved
        }),
        "forward input never moved the entity on both sides"
    );

    // The local entity is displayed from the predicted timeline.
    assert_eq!(
        client.displayed_state(local_id),
        client.predicted_state(),
        "local entity must come from the reconciler"
    );

    // A server-spawned chunk replicates to the client, and its displayed
    // state comes from the interpolator, never the reconciler.
    let chunk_id = server.spawn_world_entity(Box::new(Chunk::new(Vec3::new(8.0, 0.0, 3.0), 2.0)));
    assert!(
        pump(&mut server, &mut client, forward_input(), 1500, |_, c| {
            c.world().contains(chunk_id) && c.displayed_state(chunk_id).is_some()
        }),
        "chunk never replicated"
    );
    let chunk_state = client.displayed_state(chunk_id).unwrap();
    assert!((chunk_state.position - Vec3::new(8.0, 0.0, 3.0)).length() < 0.5);
    assert_ne!(
        Some(chunk_state),
        client.predicted_state(),
        "remote entity must not ride the predicted timeline"
    );
    assert!(client.is_interpolated(chunk_id));
    assert!(
        !client.is_interpolated(local_id),
        "predicted entity must never grow an interpolation track"
    );

    // An explicit despawn notification removes the chunk on both sides.
    server.despawn_world_entity(chunk_id);
    assert!(
        pump(&mut server, &mut client, forward_input(), 1500, |s, c| {
            !s.world().contains(chunk_id)
                && !c.world().contains(chunk_id)
                && !c.is_interpolated(chunk_id)
        }),
        "despawn never reached the client"
    );

    // Goodbye: the server despawns the cell and forgets the session.
    client.disconnect();
    assert!(matches!(
        client.state(),
        ClientState::Disconnected { reason } if reason.as_str() == "left"
    ));
    let mut server_clean = false;
    for _ in 0..500 {
        server.tick_once();
        if server.sessions().total_count() == 0 && !server.world().contains(local_id) {
            server_clean = true;
            break;
        }
        std::thread::sleep(FRAME);
    }
    assert!(server_clean, "server kept session state after leave");
}

#[test]
fn duplicate_name_is_denied() {
    let mut server = GameServer::new("127.0.0.1:0", ServerConfig::default()).unwrap();
    let addr = server.local_addr();

    let mut first = NetworkClient::new(ClientConfig {
        name: "twin".to_string(),
        ..Default::default()
    })
    .unwrap();
    first.connect(addr).unwrap();
    assert!(pump(&mut server, &mut first, forward_input(), 1500, |_, c| c
        .is_active()));

    let mut second = NetworkClient::new(ClientConfig {
        name: "twin".to_string(),
        ..Default::default()
    })
    .unwrap();
    second.connect(addr).unwrap();

    let denied = pump(
        &mut server,
        &mut second,
        forward_input(),
        1500,
        |_, c| matches!(c.state(), ClientState::Disconnected { .. }),
    );
    assert!(denied, "duplicate name was not rejected");
    if let ClientState::Disconnected { reason } = second.state() {
        assert!(reason.contains("taken"), "unexpected reason: {}", reason);
    }
}

#[test]
fn late_joiner_replicates_existing_world() {
    let mut server = GameServer::new("127.0.0.1:0", ServerConfig::default()).unwrap();
    let addr = server.local_addr();

    server.spawn_world_entity(Box::new(Chunk::new(Vec3::new(1.0, 0.0, 0.0), 1.0)));
    server.spawn_world_entity(Box::new(Chunk::new(Vec3::new(2.0, 0.0, 0.0), 1.0)));

    let mut client = NetworkClient::new(ClientConfig {
        name: "latecomer".to_string(),
        ..Default::default()
    })
    .unwrap();
    client.connect(addr).unwrap();

    assert!(
        pump(&mut server, &mut client, forward_input(), 1500, |_, c| c
            .is_active()),
        "late joiner never became active"
    );

    // Both pre-existing chunks plus the possessed cell.
    assert_eq!(client.replicated_count(), 3);
    assert_eq!(client.world().len(), 3);
}
