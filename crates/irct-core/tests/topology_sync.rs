//! Topology bring-up and sync verification against the in-memory network

use irct_core::{
    await_match, AckedCommand, Command, Expectation, HandleId, HarnessError, LinkState,
    SyncCheck, TopologyManager,
};
use irct_test_utils::{
    label, single_server_specs, three_server_config, three_server_network, FakeNetwork,
    ServerBehavior,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

fn manager(net: &FakeNetwork, config: &irct_core::HarnessConfig) -> TopologyManager {
    TopologyManager::new(Arc::new(net.clone()), config.topology_options())
}

fn id(server: &str, nick: &str) -> HandleId {
    HandleId::new(label(server), nick)
}

#[tokio::test]
async fn three_servers_link_and_sync() {
    let (net, config) = three_server_network();
    let mut topology = manager(&net, &config)
        .build(&config.server_specs())
        .await
        .unwrap();

    assert_eq!(topology.handle_count(), 3);
    assert!(topology.all_links_synced());
    assert_eq!(
        topology.link_state(&label("irc2.test.net"), &label("irc1.test.net")),
        Some(LinkState::Synced)
    );
    assert_eq!(
        net.links(),
        vec![
            ("irc1.test.net".to_string(), "irc2.test.net".to_string()),
            ("irc3.test.net".to_string(), "irc2.test.net".to_string()),
        ]
    );

    let sent = net.received("irc1.test.net", "c1a");
    assert!(sent.contains(&"OPER netadmin test".to_string()));
    assert!(sent.contains(&"CONNECT irc2.test.net".to_string()));
    assert!(net.received("irc2.test.net", "c2a").iter().all(|l| !l.starts_with("CONNECT")));

    topology.teardown().await;
    assert_eq!(net.open_sessions(), 0);
}

#[tokio::test(start_paused = true)]
async fn silent_link_times_out() {
    let config = three_server_config();
    let net = FakeNetwork::for_config(&config).server("irc3.test.net", ServerBehavior::silent_link());

    let err = manager(&net, &config)
        .build(&config.server_specs())
        .await
        .unwrap_err();
    match err {
        HarnessError::LinkTimeout { source_server, target, timeout } => {
            assert_eq!(source_server, label("irc3.test.net"));
            assert_eq!(target, label("irc2.test.net"));
            assert_eq!(timeout, Duration::from_secs(15));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(net.open_sessions(), 0);
}

#[tokio::test(start_paused = true)]
async fn missing_isupport_token_stops_bring_up() {
    let config = three_server_config();
    let net = FakeNetwork::for_config(&config).server(
        "irc2.test.net",
        ServerBehavior {
            advertise_isupport: false,
            ..ServerBehavior::default()
        },
    );

    let err = manager(&net, &config)
        .build(&config.server_specs())
        .await
        .unwrap_err();
    assert!(matches!(err, HarnessError::ExpectationTimeout { .. }));
    assert!(net.links().is_empty());
}

#[tokio::test]
async fn unreachable_server_is_transport_error() {
    let config = three_server_config();
    let net = FakeNetwork::new().server("irc2.test.net", ServerBehavior::default());

    let err = manager(&net, &config)
        .build(&config.server_specs())
        .await
        .unwrap_err();
    assert_eq!(err.failed_handles(), vec![id("irc1.test.net", "c1a")]);
}

#[tokio::test]
async fn second_link_for_same_pair_rejected() {
    let (net, config) = three_server_network();
    let manager = manager(&net, &config);
    let mut topology = manager.build(&config.server_specs()).await.unwrap();

    let err = manager
        .link(&mut topology, &label("irc2.test.net"), &label("irc1.test.net"))
        .await
        .unwrap_err();
    assert!(matches!(err, HarnessError::DuplicateLink(..)));
    assert_eq!(net.links().len(), 2);
    topology.teardown().await;
}

#[tokio::test]
async fn world_join_reaches_every_peer() {
    let (net, config) = three_server_network();
    let mut topology = manager(&net, &config)
        .build(&config.server_specs())
        .await
        .unwrap();
    topology.skip_pending_all();

    let acting = id("irc1.test.net", "c1a");
    let stimulus = AckedCommand::new("WORLD join")
        .ack(Expectation::new("world join ack", ":.*2200.*").unwrap())
        .ack(Expectation::new("mode +y", r"MODE.*\+y").unwrap());
    let check = SyncCheck::new("world join", &["WORLD.*JOIN", r"MODE.*\+y"]).unwrap();

    irct_core::verify_sync(&mut topology, &acting, &stimulus, &check)
        .await
        .unwrap();
    assert!(net.in_world("irc1.test.net", "c1a"));
    topology.teardown().await;
}

#[tokio::test(start_paused = true)]
async fn single_silent_peer_is_named_exactly() {
    let config = three_server_config();
    let net = FakeNetwork::for_config(&config).server("irc3.test.net", ServerBehavior::isolated());
    let mut topology = manager(&net, &config)
        .build(&config.server_specs())
        .await
        .unwrap();

    let acting = id("irc1.test.net", "c1a");
    let check = SyncCheck::new("world join", &["WORLD.*JOIN"]).unwrap();
    let err = irct_core::verify_sync(&mut topology, &acting, &Command::new("WORLD join"), &check)
        .await
        .unwrap_err();

    assert_eq!(err.failed_handles(), vec![id("irc3.test.net", "c3a")]);
    let HarnessError::SyncVerificationFailed { failures } = err else {
        panic!("expected aggregated failure");
    };
    assert_eq!(failures[0].pattern, "WORLD.*JOIN");
    assert!(matches!(*failures[0].error, HarnessError::ExpectationTimeout { .. }));
    topology.teardown().await;
}

#[tokio::test(start_paused = true)]
async fn missing_direction_tag_lists_only_that_peer() {
    let config = three_server_config();
    let net = FakeNetwork::for_config(&config)
        .server("irc3.test.net", ServerBehavior::without_direction_tag());
    let mut topology = manager(&net, &config)
        .build(&config.server_specs())
        .await
        .unwrap();

    let acting = id("irc1.test.net", "c1a");
    let stimulus = AckedCommand::new("MOVE north")
        .ack(Expectation::new("move ack", ":.*2210.*").unwrap());
    let check = SyncCheck::new(
        "movement",
        &["WORLD.*MOVE", "@world/location=", "@world/direction="],
    )
    .unwrap();

    let err = irct_core::verify_sync(&mut topology, &acting, &stimulus, &check)
        .await
        .unwrap_err();
    let HarnessError::SyncVerificationFailed { failures } = err else {
        panic!("expected aggregated failure");
    };
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].handle, id("irc3.test.net", "c3a"));
    assert_eq!(failures[0].pattern, "@world/direction=");
    topology.teardown().await;
}

#[tokio::test]
async fn single_handle_sync_is_noop() {
    let net = FakeNetwork::new().server("irc1.test.net", ServerBehavior::default());
    let config = three_server_config().with_isupport_probe(None);
    let mut topology = manager(&net, &config)
        .build(&single_server_specs())
        .await
        .unwrap();

    let acting = id("irc1.test.net", "c1a");
    let check = SyncCheck::new("world join", &["WORLD.*JOIN"]).unwrap();
    irct_core::verify_sync(&mut topology, &acting, &Command::new("WORLD join"), &check)
        .await
        .unwrap();

    assert!(!net
        .received("irc1.test.net", "c1a")
        .contains(&"WORLD join".to_string()));

    let stranger = id("irc1.test.net", "nobody");
    let err = irct_core::verify_sync(&mut topology, &stranger, &Command::new("WORLD join"), &check)
        .await
        .unwrap_err();
    assert!(matches!(err, HarnessError::UnknownHandle(_)));
    topology.teardown().await;
}

#[tokio::test]
async fn unknown_acting_handle_rejected() {
    let (net, config) = three_server_network();
    let mut topology = manager(&net, &config)
        .build(&config.server_specs())
        .await
        .unwrap();

    let check = SyncCheck::new("noop", &["x"]).unwrap();
    let err = irct_core::verify_sync(
        &mut topology,
        &id("irc9.test.net", "c9a"),
        &Command::new("WORLD join"),
        &check,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, HarnessError::UnknownHandle(_)));
    topology.teardown().await;
}

#[tokio::test]
async fn server_crash_surfaces_as_transport_error() {
    let (net, config) = three_server_network();
    let mut topology = manager(&net, &config)
        .build(&config.server_specs())
        .await
        .unwrap();

    net.kill_server("irc3.test.net");
    let handle = topology.handle_mut(&id("irc3.test.net", "c3a")).unwrap();
    let expectation = Expectation::new("anything new", "2200")
        .unwrap()
        .timeout(Duration::from_secs(3600));
    let err = await_match(handle, &expectation).await.unwrap_err();
    assert!(matches!(err, HarnessError::Transport { .. }));
    topology.teardown().await;
}

#[tokio::test]
async fn keepalive_ping_is_answered() {
    let (net, config) = three_server_network();
    let mut topology = manager(&net, &config)
        .build(&config.server_specs())
        .await
        .unwrap();

    net.inject("irc2.test.net", "c2a", "PING :irc2.test.net");
    let handle = topology.handle_mut(&id("irc2.test.net", "c2a")).unwrap();
    await_match(handle, &Expectation::new("ping", "^PING").unwrap())
        .await
        .unwrap();
    assert!(net
        .received("irc2.test.net", "c2a")
        .contains(&"PONG :irc2.test.net".to_string()));
    topology.teardown().await;
}
