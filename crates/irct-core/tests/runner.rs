//! Scenario runner behaviour: verdicts, teardown, cancellation, suites

use async_trait::async_trait;
use irct_core::{
    await_match, send_command, Expectation, HandleId, HarnessConfig, Result, Scenario,
    ScenarioOutcome, ScenarioRunner, ScenarioStatus, SuiteOptions, Topology,
};
use irct_test_utils::{label, three_server_config, three_server_network, FakeNetwork, ServerBehavior};
use std::sync::Arc;
use std::time::Duration;

struct JoinWorld;

#[async_trait]
impl Scenario for JoinWorld {
    fn name(&self) -> &str {
        "join_world"
    }

    async fn run(&self, topology: &mut Topology, _config: &HarnessConfig) -> Result<ScenarioOutcome> {
        let acting = HandleId::new(label("irc2.test.net"), "c2a");
        let handle = topology.handle_mut(&acting)?;
        send_command(handle, "WORLD join").await?;
        await_match(handle, &Expectation::new("ack", "2200")?).await?;
        Ok(ScenarioOutcome::Completed)
    }
}

struct WaitsForever;

#[async_trait]
impl Scenario for WaitsForever {
    fn name(&self) -> &str {
        "waits_forever"
    }

    async fn run(&self, topology: &mut Topology, _config: &HarnessConfig) -> Result<ScenarioOutcome> {
        let acting = HandleId::new(label("irc1.test.net"), "c1a");
        let handle = topology.handle_mut(&acting)?;
        let never = Expectation::new("never", "NEVER")?.timeout(Duration::from_secs(86_400));
        await_match(handle, &never).await?;
        Ok(ScenarioOutcome::Completed)
    }
}

struct SkipsItself;

#[async_trait]
impl Scenario for SkipsItself {
    fn name(&self) -> &str {
        "skips_itself"
    }

    async fn run(&self, _topology: &mut Topology, _config: &HarnessConfig) -> Result<ScenarioOutcome> {
        Ok(ScenarioOutcome::Skipped("capability rejected by irc2.test.net".to_string()))
    }
}

#[tokio::test]
async fn passing_scenario_tears_down() {
    let (net, config) = three_server_network();
    let runner = ScenarioRunner::from_config(Arc::new(net.clone()), config);

    let result = runner.run(&JoinWorld).await;
    assert_eq!(result.status, ScenarioStatus::Passed, "{:?}", result.reason);
    assert!(result.reason.is_none());
    assert!(result.transcript.iter().any(|e| e.text == "WORLD join"));
    assert_eq!(net.open_sessions(), 0);
}

#[tokio::test]
async fn skip_is_reported_with_reason() {
    let (net, config) = three_server_network();
    let runner = ScenarioRunner::from_config(Arc::new(net), config);

    let result = runner.run(&SkipsItself).await;
    assert_eq!(result.status, ScenarioStatus::Skipped);
    assert!(result.reason.unwrap().contains("irc2.test.net"));
}

#[tokio::test]
async fn failing_sends_fail_the_scenario() {
    let config = three_server_config();
    let net = FakeNetwork::for_config(&config).server("irc2.test.net", ServerBehavior::failing_sends());
    let runner = ScenarioRunner::from_config(Arc::new(net.clone()), config);

    let result = runner.run(&JoinWorld).await;
    assert_eq!(result.status, ScenarioStatus::Failed);
    assert_eq!(
        result.failed_handles,
        vec![HandleId::new(label("irc2.test.net"), "c2a")]
    );
    assert_eq!(net.open_sessions(), 0);
}

#[tokio::test(start_paused = true)]
async fn cancellation_tears_down() {
    let (net, config) = three_server_network();
    let runner = ScenarioRunner::from_config(Arc::new(net.clone()), config);

    let result = runner
        .run_until(&WaitsForever, tokio::time::sleep(Duration::from_secs(30)))
        .await;
    assert_eq!(result.status, ScenarioStatus::Failed);
    assert!(result.reason.unwrap().contains("cancelled"));
    assert_eq!(net.open_sessions(), 0);
}

#[tokio::test(start_paused = true)]
async fn cancellation_while_linking_closes_opened_clients() {
    let config = three_server_config();
    let net = FakeNetwork::for_config(&config).server("irc1.test.net", ServerBehavior::silent_link());
    let runner = ScenarioRunner::from_config(Arc::new(net.clone()), config);

    // irc1's link stays pending well past the cancel point
    let result = runner
        .run_until(&JoinWorld, tokio::time::sleep(Duration::from_secs(1)))
        .await;
    assert_eq!(result.status, ScenarioStatus::Failed);
    assert!(result.reason.unwrap().contains("cancelled"));
    assert!(net
        .received("irc1.test.net", "c1a")
        .iter()
        .any(|l| l.starts_with("CONNECT irc2.test.net")));
    // irc3 was never reached
    assert!(net.received("irc3.test.net", "c3a").is_empty());
    assert_eq!(net.open_sessions(), 0);
}

#[tokio::test(start_paused = true)]
async fn suite_deadline_caps_running_scenarios() {
    let (net, config) = three_server_network();
    let runner = ScenarioRunner::from_config(Arc::new(net), config);

    let scenarios: Vec<Arc<dyn Scenario>> =
        vec![Arc::new(JoinWorld), Arc::new(WaitsForever), Arc::new(SkipsItself)];
    let report = runner
        .run_suite(
            scenarios,
            SuiteOptions::default()
                .with_concurrency(3)
                .with_deadline(Duration::from_secs(60)),
        )
        .await;

    let statuses: Vec<_> = report.results.iter().map(|r| r.status).collect();
    assert_eq!(
        statuses,
        vec![ScenarioStatus::Passed, ScenarioStatus::Failed, ScenarioStatus::Skipped]
    );
    assert!(!report.passed());
    assert_eq!(report.failures().count(), 1);
}
