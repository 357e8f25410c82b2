//! An agent and the scheduler talking over the in-process loopback.

use async_trait::async_trait;
use gantry_agent::{AgentConfig, AgentController, CommandLineScm, MaterialCheckoutOrchestrator};
use gantry_core::console::tags;
use gantry_core::material::MaterialRevisions;
use gantry_core::message::Action;
use gantry_core::work::{JobReport, JobResult};
use gantry_core::{AgentIdentifier, Result};
use gantry_plugins::protocol::CHECKOUT;
use gantry_plugins::{
    CheckoutResponse, PluginHostConfig, PluginRequest, PluginResponse, ScmPlugin,
    ScmPluginRegistry,
};
use gantry_scheduler::{AgentFleet, AgentRemoteHandler, WorkAssignmentBroker};
use gantry_tests::{
    CapturedConsoleLog, Loopback, RecordingSink, ScriptedResolver, Step, agent, build_work,
    eventually, git_revision, init_test_logging, job, pluggable_revision, shell,
};
use pretty_assertions::assert_eq;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const PLUGIN_ID: &str = "example.scm";

/// SCM plugin answering every checkout with a fixed response.
struct CannedScmPlugin {
    response: CheckoutResponse,
    requests: Mutex<Vec<serde_json::Value>>,
}

impl CannedScmPlugin {
    fn new(response: CheckoutResponse) -> Arc<Self> {
        Arc::new(Self {
            response,
            requests: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl ScmPlugin for CannedScmPlugin {
    fn id(&self) -> &str {
        PLUGIN_ID
    }

    async fn handle(&self, request: PluginRequest) -> Result<PluginResponse> {
        assert_eq!(request.name, CHECKOUT);
        self.requests
            .lock()
            .unwrap()
            .push(serde_json::from_str(&request.body)?);
        Ok(PluginResponse::ok(self.response.to_json()?))
    }
}

struct Stack {
    net: Loopback,
    resolver: Arc<ScriptedResolver>,
    console: Arc<CapturedConsoleLog>,
    fleet: Arc<AgentFleet>,
    shutdown: CancellationToken,
    agent_task: JoinHandle<Result<()>>,
    server_task: JoinHandle<()>,
    _workspace: tempfile::TempDir,
}

impl Stack {
    fn start(
        me: &AgentIdentifier,
        plugin: Arc<CannedScmPlugin>,
        script: impl FnOnce(&ScriptedResolver),
    ) -> Self {
        init_test_logging();
        let net = Loopback::new();
        let shutdown = CancellationToken::new();

        let resolver = ScriptedResolver::new();
        script(&resolver);
        let fleet = Arc::new(AgentFleet::new(
            Duration::from_secs(30),
            Arc::new(gantry_core::clock::SystemClock),
        ));
        let broker = Arc::new(
            WorkAssignmentBroker::builder(resolver.clone(), net.server())
                .fleet(fleet.clone())
                .build(),
        );
        let console = Arc::new(CapturedConsoleLog::default());
        let handler = Arc::new(
            AgentRemoteHandler::new(fleet.clone(), broker, net.server())
                .with_console(console.clone()),
        );
        let server_task = net.serve(handler, shutdown.clone());

        let plugins = Arc::new(ScmPluginRegistry::new(
            PluginHostConfig::new().default_timeout(Duration::from_secs(5)),
        ));
        plugins.register(plugin);
        let checkout = Arc::new(MaterialCheckoutOrchestrator::new(
            Arc::new(CommandLineScm::new()),
            plugins,
        ));

        let workspace = tempfile::tempdir().unwrap();
        let config = AgentConfig {
            uuid: me.uuid.clone(),
            hostname: me.hostname.clone(),
            ip_address: me.ip_address.clone(),
            working_dir: workspace.path().to_path_buf(),
            heartbeat_interval_secs: 1,
            poll_interval_millis: 100,
            console_flush_interval_millis: 20,
            ..AgentConfig::default()
        };
        let inbox = net.attach(me);
        let controller = AgentController::new(config, net.agent_link(), checkout);
        let agent_task = tokio::spawn(controller.run(inbox, shutdown.clone()));

        Self {
            net,
            resolver,
            console,
            fleet,
            shutdown,
            agent_task,
            server_task,
            _workspace: workspace,
        }
    }

    fn reports(&self, me: &AgentIdentifier) -> Vec<JobReport> {
        self.net
            .agent_link()
            .sent()
            .iter()
            .filter(|(a, m)| a == me && m.action() == Action::ReportCompleted)
            .map(|(_, m)| m.payload::<JobReport>().unwrap().unwrap())
            .collect()
    }

    async fn stop(self) {
        self.shutdown.cancel();
        self.agent_task.await.unwrap().unwrap();
        self.server_task.await.unwrap();
    }
}

#[tokio::test]
async fn test_build_runs_end_to_end_and_agent_asks_again() {
    let me = agent("build-01");
    let plan = job("website", 7, "build", "compile");
    let plugin = CannedScmPlugin::new(CheckoutResponse::success("Checked out revision r-42"));
    let work = build_work(
        plan.clone(),
        vec![pluggable_revision(PLUGIN_ID, "site", "site", "r-42")],
        vec![shell("echo compiled website")],
    );
    let stack = Stack::start(&me, plugin.clone(), |resolver| {
        resolver.then(&me, Step::Work(work));
    });

    // The idle frame after the report leads to a second resolution, so by
    // then every console batch and the report have been handled.
    assert!(eventually(Duration::from_secs(10), || stack.resolver.calls_for(&me) >= 2).await);

    let reports = stack.reports(&me);
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].identifier, plan);
    assert_eq!(reports[0].result, JobResult::Passed);

    let output = stack.console.output(&plan);
    assert!(output.contains("Checked out revision r-42"), "{}", output);
    assert!(output.contains("compiled website"), "{}", output);
    assert!(output.contains("j0|"), "{}", output);

    let requests = plugin.requests.lock().unwrap().clone();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0]["revision"]["revision"], "r-42");
    assert!(requests[0]["destination-folder"].as_str().unwrap().ends_with("site"));

    let actions = stack.net.agent_link().actions(&me);
    let report_at = actions.iter().position(|a| *a == Action::ReportCompleted).unwrap();
    assert_eq!(&actions[..2], &[Action::Register, Action::Idle]);
    assert_eq!(actions.get(report_at + 1), Some(&Action::Idle));
    assert!(actions[..report_at].contains(&Action::ConsoleOut));

    stack.stop().await;
}

#[tokio::test]
async fn test_failed_checkout_reports_failure_without_building() {
    let me = agent("build-02");
    let plan = job("website", 8, "build", "compile");
    let plugin = CannedScmPlugin::new(CheckoutResponse::failure("remote unreachable"));
    let work = build_work(
        plan.clone(),
        vec![pluggable_revision(PLUGIN_ID, "site", "site", "r-43")],
        vec![shell("echo should not run")],
    );
    let stack = Stack::start(&me, plugin, |resolver| {
        resolver.then(&me, Step::Work(work));
    });

    assert!(eventually(Duration::from_secs(10), || stack.resolver.calls_for(&me) >= 2).await);

    let reports = stack.reports(&me);
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].result, JobResult::Failed);

    let output = stack.console.output(&plan);
    assert!(output.contains("pe|"), "{}", output);
    assert!(output.contains("remote unreachable"), "{}", output);
    assert!(!output.contains("should not run"), "{}", output);
    assert!(output.contains("j1|"), "{}", output);

    stack.stop().await;
}

#[tokio::test]
async fn test_unknown_agent_registers_itself_before_work() {
    let me = agent("build-04");
    let plan = job("docs", 3, "publish", "render");
    let plugin = CannedScmPlugin::new(CheckoutResponse::success("ok"));
    let work = build_work(
        plan.clone(),
        vec![pluggable_revision(PLUGIN_ID, "docs", "docs", "r-7")],
        vec![shell("echo rendered")],
    );
    let stack = Stack::start(&me, plugin, |resolver| {
        resolver.then(&me, Step::Work(work));
    });

    assert!(eventually(Duration::from_secs(10), || stack.reports(&me).len() == 1).await);
    assert!(stack.fleet.is_assignable(&me));
    assert!(stack.net.server().sent_to(&me, Action::Reregister).is_empty());
    assert_eq!(stack.reports(&me)[0].result, JobResult::Passed);

    stack.stop().await;
}

#[tokio::test]
async fn test_agent_keeps_polling_while_there_is_no_work() {
    let me = agent("build-03");
    let plugin = CannedScmPlugin::new(CheckoutResponse::success(""));
    let stack = Stack::start(&me, plugin, |_| {});

    // Each NoWork answer is followed by another idle frame after the poll interval.
    assert!(eventually(Duration::from_secs(5), || stack.resolver.calls_for(&me) >= 3).await);
    assert!(stack.reports(&me).is_empty());
    assert!(stack.net.agent_link().count(&me, Action::Idle) >= 3);
    assert!(
        stack
            .net
            .server()
            .sent_to(&me, Action::Assign)
            .iter()
            .all(|m| m.payload::<gantry_core::work::Work>().unwrap()
                == Some(gantry_core::work::Work::NoWork))
    );

    stack.stop().await;
}

#[tokio::test]
async fn test_checkout_stops_at_first_failing_material() {
    let plugin = CannedScmPlugin::new(CheckoutResponse::success("plugin ran"));
    let plugins = Arc::new(ScmPluginRegistry::default());
    plugins.register(plugin.clone());
    let orchestrator = MaterialCheckoutOrchestrator::new(
        Arc::new(CommandLineScm::new().with_git("gantry-no-such-git")),
        plugins,
    );
    let revisions = MaterialRevisions::new(vec![
        git_revision("https://example.com/app.git", "app", "abc123"),
        pluggable_revision(PLUGIN_ID, "site", "site", "r-44"),
    ]);
    let workspace = tempfile::tempdir().unwrap();
    let console = RecordingSink::default();

    let result = orchestrator
        .checkout_all(&revisions, workspace.path(), &console, &CancellationToken::new())
        .await;

    assert!(result.is_err());
    assert!(console.lines().iter().any(|(tag, _)| tag == tags::PREP_ERR));
    assert!(plugin.requests.lock().unwrap().is_empty());
}
