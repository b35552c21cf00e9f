//! Node pool and per-node controllers over the channel-node management API.
//!
//! The executor only ever holds node indices; everything process- and
//! transport-shaped lives behind [`NodeController`] and the [`NodeApi`]
//! trait so tests can substitute recording mocks.

use serde::Deserialize;

use std::collections::BTreeMap;
use std::fmt;
use std::process::{Child, Command, Stdio};
use std::sync::Mutex;
use std::time::Duration;

use crate::{
    Config, NodeMode, ScenarioDefinition, SkeinError, SkeinResult,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    Opened,
    Closed,
    Settled,
}

impl fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Opened => "opened",
            Self::Closed => "closed",
            Self::Settled => "settled",
        };
        f.write_str(s)
    }
}

impl ChannelStatus {
    fn parse(s: &str) -> SkeinResult<Self> {
        match s {
            "opened" => Ok(Self::Opened),
            "closed" => Ok(Self::Closed),
            "settled" => Ok(Self::Settled),
            other => Err(SkeinError::ServiceQuery(format!(
                "unknown channel state {other:?}"
            ))),
        }
    }
}

/// One participant's view of a channel, as decoded from the management API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelState {
    pub partner_address: String,
    pub state: ChannelStatus,
    pub total_deposit: u128,
    pub total_withdraw: u128,
    pub balance: u128,
    pub settle_timeout: u32,
    pub channel_identifier: u64,
    pub token_network_address: String,
}

impl ChannelState {
    /// Amount fields may arrive as JSON numbers or decimal strings.
    pub fn from_json(v: &serde_json::Value) -> SkeinResult<Self> {
        Ok(Self {
            partner_address: json_str(v, "partner_address")?,
            state: ChannelStatus::parse(&json_str(v, "state")?)?,
            total_deposit: json_amount(v, "total_deposit")?,
            total_withdraw: json_amount(v, "total_withdraw")?,
            balance: json_amount(v, "balance")?,
            settle_timeout: json_narrow(v, "settle_timeout")?,
            channel_identifier: json_narrow(v, "channel_identifier")?,
            token_network_address: json_str(v, "token_network_address")?,
        })
    }
}

fn json_str(v: &serde_json::Value, field: &str) -> SkeinResult<String> {
    v.get(field)
        .and_then(|f| f.as_str())
        .map(str::to_string)
        .ok_or_else(|| SkeinError::ServiceQuery(format!("missing string field {field:?}")))
}

fn json_amount(v: &serde_json::Value, field: &str) -> SkeinResult<u128> {
    let value = v
        .get(field)
        .ok_or_else(|| SkeinError::ServiceQuery(format!("missing amount field {field:?}")))?;
    match value {
        serde_json::Value::Number(n) => n
            .as_u64()
            .map(u128::from)
            .ok_or_else(|| SkeinError::ServiceQuery(format!("non-integer field {field:?}"))),
        serde_json::Value::String(s) => s
            .parse()
            .map_err(|_| SkeinError::ServiceQuery(format!("unparseable amount in {field:?}"))),
        _ => Err(SkeinError::ServiceQuery(format!(
            "unexpected type for amount field {field:?}"
        ))),
    }
}

fn json_narrow<T: TryFrom<u128>>(v: &serde_json::Value, field: &str) -> SkeinResult<T> {
    let value = json_amount(v, field)?;
    T::try_from(value)
        .map_err(|_| SkeinError::ServiceQuery(format!("field {field:?} out of range: {value}")))
}

/// HTTP status plus the decoded channel, when the response carried one.
#[derive(Debug, Clone)]
pub struct ApiCallOutcome {
    pub status: u16,
    pub channel: Option<ChannelState>,
}

/// Management-API surface of one node. Mutating calls return the HTTP
/// status so the executor can apply the `expected_http_status` contract;
/// transport failures are `NodeUnreachable`.
pub trait NodeApi: Send + Sync {
    fn address(&self) -> SkeinResult<String>;

    fn open_channel(
        &self,
        partner: &str,
        total_deposit: u128,
        settle_timeout: Option<u32>,
    ) -> SkeinResult<ApiCallOutcome>;

    fn set_total_deposit(&self, partner: &str, total_deposit: u128) -> SkeinResult<ApiCallOutcome>;

    fn set_total_withdraw(&self, partner: &str, total_withdraw: u128)
        -> SkeinResult<ApiCallOutcome>;

    fn close_channel(&self, partner: &str) -> SkeinResult<ApiCallOutcome>;

    fn transfer(
        &self,
        target: &str,
        amount: u128,
        lock_timeout: Option<u32>,
    ) -> SkeinResult<ApiCallOutcome>;

    fn channel(&self, partner: &str) -> SkeinResult<Option<ChannelState>>;

    fn channels(&self) -> SkeinResult<Vec<ChannelState>>;
}

/// Production [`NodeApi`] over ureq. Non-2xx statuses are regular outcomes
/// here, not errors; only transport failures abort.
pub struct HttpNodeApi {
    index: usize,
    base_url: String,
    token_address: String,
    agent: ureq::Agent,
}

impl HttpNodeApi {
    pub fn new(index: usize, base_url: String, token_address: String, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self {
            index,
            base_url: base_url.trim_end_matches('/').to_string(),
            token_address,
            agent,
        }
    }

    fn unreachable(&self, err: impl fmt::Display) -> SkeinError {
        SkeinError::NodeUnreachable {
            node: self.index,
            reason: err.to_string(),
        }
    }

    fn call(
        &self,
        method: &str,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> SkeinResult<(u16, serde_json::Value)> {
        let url = format!("{}{path}", self.base_url);
        let request = self.agent.request(method, &url);
        let result = match body {
            Some(payload) => request.send_json(payload),
            None => request.call(),
        };
        let response = match result {
            Ok(resp) => resp,
            Err(ureq::Error::Status(_, resp)) => resp,
            Err(err) => return Err(self.unreachable(err)),
        };
        let status = response.status();
        let body: serde_json::Value = response
            .into_json()
            .unwrap_or(serde_json::Value::Null);
        Ok((status, body))
    }

    fn channel_outcome(&self, status: u16, body: serde_json::Value) -> ApiCallOutcome {
        let channel = if (200..300).contains(&status) {
            ChannelState::from_json(&body).ok()
        } else {
            None
        };
        ApiCallOutcome { status, channel }
    }
}

impl NodeApi for HttpNodeApi {
    fn address(&self) -> SkeinResult<String> {
        let (status, body) = self.call("GET", "/api/v1/address", None)?;
        if !(200..300).contains(&status) {
            return Err(self.unreachable(format!("address query returned HTTP {status}")));
        }
        json_str(&body, "our_address")
            .map_err(|_| self.unreachable("address query returned no our_address"))
    }

    fn open_channel(
        &self,
        partner: &str,
        total_deposit: u128,
        settle_timeout: Option<u32>,
    ) -> SkeinResult<ApiCallOutcome> {
        let mut payload = serde_json::json!({
            "partner_address": partner,
            "token_address": self.token_address,
            "total_deposit": total_deposit.to_string(),
        });
        if let Some(timeout) = settle_timeout {
            payload["settle_timeout"] = serde_json::json!(timeout);
        }
        let (status, body) = self.call("PUT", "/api/v1/channels", Some(payload))?;
        Ok(self.channel_outcome(status, body))
    }

    fn set_total_deposit(&self, partner: &str, total_deposit: u128) -> SkeinResult<ApiCallOutcome> {
        let path = format!("/api/v1/channels/{}/{partner}", self.token_address);
        let payload = serde_json::json!({"total_deposit": total_deposit.to_string()});
        let (status, body) = self.call("PATCH", &path, Some(payload))?;
        Ok(self.channel_outcome(status, body))
    }

    fn set_total_withdraw(
        &self,
        partner: &str,
        total_withdraw: u128,
    ) -> SkeinResult<ApiCallOutcome> {
        let path = format!("/api/v1/channels/{}/{partner}", self.token_address);
        let payload = serde_json::json!({"total_withdraw": total_withdraw.to_string()});
        let (status, body) = self.call("PATCH", &path, Some(payload))?;
        Ok(self.channel_outcome(status, body))
    }

    fn close_channel(&self, partner: &str) -> SkeinResult<ApiCallOutcome> {
        let path = format!("/api/v1/channels/{}/{partner}", self.token_address);
        let payload = serde_json::json!({"state": "closed"});
        let (status, body) = self.call("PATCH", &path, Some(payload))?;
        Ok(self.channel_outcome(status, body))
    }

    fn transfer(
        &self,
        target: &str,
        amount: u128,
        lock_timeout: Option<u32>,
    ) -> SkeinResult<ApiCallOutcome> {
        let path = format!("/api/v1/payments/{}/{target}", self.token_address);
        let mut payload = serde_json::json!({"amount": amount.to_string()});
        if let Some(timeout) = lock_timeout {
            payload["lock_timeout"] = serde_json::json!(timeout);
        }
        let (status, _body) = self.call("POST", &path, Some(payload))?;
        Ok(ApiCallOutcome {
            status,
            channel: None,
        })
    }

    fn channel(&self, partner: &str) -> SkeinResult<Option<ChannelState>> {
        let path = format!("/api/v1/channels/{}/{partner}", self.token_address);
        let (status, body) = self.call("GET", &path, None)?;
        if status == 404 {
            return Ok(None);
        }
        if !(200..300).contains(&status) {
            return Err(SkeinError::ServiceQuery(format!(
                "channel query returned HTTP {status}"
            )));
        }
        ChannelState::from_json(&body).map(Some)
    }

    fn channels(&self) -> SkeinResult<Vec<ChannelState>> {
        let (status, body) = self.call("GET", "/api/v1/channels", None)?;
        if !(200..300).contains(&status) {
            return Err(SkeinError::ServiceQuery(format!(
                "channels query returned HTTP {status}"
            )));
        }
        let entries = body
            .as_array()
            .ok_or_else(|| SkeinError::ServiceQuery("channels query returned non-array".into()))?;
        entries.iter().map(ChannelState::from_json).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Running,
    Stopped,
}

/// Managed-mode process spec, derived from the node's resolved options.
#[derive(Debug, Clone)]
pub struct SpawnSpec {
    pub program: String,
    pub args: Vec<String>,
}

/// Owns one node: liveness, the (optional) managed process, and the API
/// client. Mutating API calls are serialized per node; nodes do not
/// tolerate concurrent mutating calls, and two parallel branches may
/// legitimately target the same node.
pub struct NodeController {
    index: usize,
    api: Box<dyn NodeApi>,
    options: BTreeMap<String, serde_yaml::Value>,
    spawn: Option<SpawnSpec>,
    state: Mutex<NodeState>,
    process: Mutex<Option<Child>>,
    address: Mutex<Option<String>>,
    call_lock: Mutex<()>,
}

impl NodeController {
    pub fn new(index: usize, api: Box<dyn NodeApi>, initial: NodeState) -> Self {
        Self {
            index,
            api,
            options: BTreeMap::new(),
            spawn: None,
            state: Mutex::new(initial),
            process: Mutex::new(None),
            address: Mutex::new(None),
            call_lock: Mutex::new(()),
        }
    }

    pub fn managed(
        index: usize,
        api: Box<dyn NodeApi>,
        spawn: SpawnSpec,
        options: BTreeMap<String, serde_yaml::Value>,
    ) -> Self {
        let mut controller = Self::new(index, api, NodeState::Stopped);
        controller.spawn = Some(spawn);
        controller.options = options;
        controller
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn options(&self) -> &BTreeMap<String, serde_yaml::Value> {
        &self.options
    }

    pub fn is_running(&self) -> bool {
        *lock(&self.state) == NodeState::Running
    }

    /// Idempotent; starting a running node is a successful no-op. External
    /// nodes only flip tracked liveness.
    pub fn start(&self) -> SkeinResult<()> {
        let mut state = lock(&self.state);
        if *state == NodeState::Running {
            return Ok(());
        }
        if let Some(spec) = &self.spawn {
            tracing::info!(node = self.index, program = %spec.program, "starting node");
            let child = Command::new(&spec.program)
                .args(&spec.args)
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .spawn()
                .map_err(|err| SkeinError::NodeUnreachable {
                    node: self.index,
                    reason: format!("failed to spawn {}: {err}", spec.program),
                })?;
            *lock(&self.process) = Some(child);
        }
        *state = NodeState::Running;
        Ok(())
    }

    /// Idempotent; stopping a stopped node is a successful no-op.
    pub fn stop(&self) -> SkeinResult<()> {
        let mut state = lock(&self.state);
        if *state == NodeState::Stopped {
            return Ok(());
        }
        if let Some(mut child) = lock(&self.process).take() {
            tracing::info!(node = self.index, "stopping node");
            let _ = child.kill();
            let _ = child.wait();
        }
        *state = NodeState::Stopped;
        Ok(())
    }

    fn ensure_running(&self) -> SkeinResult<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(SkeinError::NodeUnreachable {
                node: self.index,
                reason: "node is stopped".to_string(),
            })
        }
    }

    /// Blockchain address, resolved from the node on first use.
    pub fn address(&self) -> SkeinResult<String> {
        if let Some(addr) = lock(&self.address).clone() {
            return Ok(addr);
        }
        self.ensure_running()?;
        let addr = self.api.address()?;
        *lock(&self.address) = Some(addr.clone());
        Ok(addr)
    }

    pub fn open_channel(
        &self,
        partner: &str,
        total_deposit: u128,
        settle_timeout: Option<u32>,
    ) -> SkeinResult<ApiCallOutcome> {
        let _guard = lock(&self.call_lock);
        self.ensure_running()?;
        self.api.open_channel(partner, total_deposit, settle_timeout)
    }

    pub fn set_total_deposit(
        &self,
        partner: &str,
        total_deposit: u128,
    ) -> SkeinResult<ApiCallOutcome> {
        let _guard = lock(&self.call_lock);
        self.ensure_running()?;
        self.api.set_total_deposit(partner, total_deposit)
    }

    pub fn set_total_withdraw(
        &self,
        partner: &str,
        total_withdraw: u128,
    ) -> SkeinResult<ApiCallOutcome> {
        let _guard = lock(&self.call_lock);
        self.ensure_running()?;
        self.api.set_total_withdraw(partner, total_withdraw)
    }

    pub fn close_channel(&self, partner: &str) -> SkeinResult<ApiCallOutcome> {
        let _guard = lock(&self.call_lock);
        self.ensure_running()?;
        self.api.close_channel(partner)
    }

    pub fn transfer(
        &self,
        target: &str,
        amount: u128,
        lock_timeout: Option<u32>,
    ) -> SkeinResult<ApiCallOutcome> {
        let _guard = lock(&self.call_lock);
        self.ensure_running()?;
        self.api.transfer(target, amount, lock_timeout)
    }

    pub fn query_channel(&self, partner: &str) -> SkeinResult<Option<ChannelState>> {
        self.ensure_running()?;
        self.api.channel(partner)
    }

    /// Aggregate available balance across this node's channels.
    pub fn balance_sum(&self) -> SkeinResult<u128> {
        self.ensure_running()?;
        let channels = self.api.channels()?;
        Ok(channels.iter().map(|c| c.balance).sum())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    // Poisoning means a sibling branch panicked; the state itself is sound.
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// All controllers for one run, indexed the way the scenario references
/// them. Shared immutably across parallel branches.
pub struct NodePool {
    controllers: Vec<NodeController>,
}

impl NodePool {
    pub fn new(controllers: Vec<NodeController>) -> Self {
        Self { controllers }
    }

    pub fn from_definition(def: &ScenarioDefinition, config: &Config) -> SkeinResult<Self> {
        let token_address = def.token.address.clone().unwrap_or_default();
        let mut controllers = Vec::with_capacity(def.nodes.count);
        for index in 0..def.nodes.count {
            let controller = match def.nodes.mode {
                NodeMode::External => {
                    let url = def.nodes.urls.get(index).cloned().ok_or_else(|| {
                        SkeinError::Configuration(format!("missing url for node {index}"))
                    })?;
                    let api = HttpNodeApi::new(
                        index,
                        url,
                        token_address.clone(),
                        config.http_timeout(),
                    );
                    NodeController::new(index, Box::new(api), NodeState::Running)
                }
                NodeMode::Managed => {
                    let program = def.nodes.cmd.clone().ok_or_else(|| {
                        SkeinError::Configuration(
                            "managed mode requires nodes.cmd (client binary)".to_string(),
                        )
                    })?;
                    let port = def.nodes.base_port + index as u16;
                    let options = def.nodes.resolved_options(index);
                    let args = managed_args(def, index, &options);
                    let api = HttpNodeApi::new(
                        index,
                        format!("http://127.0.0.1:{port}"),
                        token_address.clone(),
                        config.http_timeout(),
                    );
                    NodeController::managed(
                        index,
                        Box::new(api),
                        SpawnSpec { program, args },
                        options,
                    )
                }
            };
            controllers.push(controller);
        }
        Ok(Self { controllers })
    }

    pub fn len(&self) -> usize {
        self.controllers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
    }

    pub fn get(&self, index: usize) -> SkeinResult<&NodeController> {
        self.controllers.get(index).ok_or_else(|| {
            SkeinError::InvalidArgument(format!("node index {index} out of range"))
        })
    }

    pub fn address_of(&self, index: usize) -> SkeinResult<String> {
        self.get(index)?.address()
    }

    pub fn start_all(&self) -> SkeinResult<()> {
        for controller in &self.controllers {
            controller.start()?;
        }
        Ok(())
    }

    pub fn stop_all(&self) {
        for controller in &self.controllers {
            let _ = controller.stop();
        }
    }
}

/// Spawn args for one managed node: API address, client version, the
/// global gas-price policy, then the resolved options. A `gas-price`
/// node option overrides the global policy.
fn managed_args(
    def: &ScenarioDefinition,
    index: usize,
    options: &BTreeMap<String, serde_yaml::Value>,
) -> Vec<String> {
    let port = def.nodes.base_port + index as u16;
    let mut args = vec!["--api-address".to_string(), format!("127.0.0.1:{port}")];
    if let Some(version) = &def.nodes.client_version {
        args.push("--client-version".to_string());
        args.push(version.clone());
    }
    if !options.contains_key("gas-price") {
        args.push("--gas-price".to_string());
        args.push(def.settings.gas_price.as_arg());
    }
    for (key, value) in options {
        push_option_arg(&mut args, key, value);
    }
    args
}

fn push_option_arg(args: &mut Vec<String>, key: &str, value: &serde_yaml::Value) {
    let flag = format!("--{key}");
    match value {
        serde_yaml::Value::Bool(true) => args.push(flag),
        serde_yaml::Value::Bool(false) => {}
        serde_yaml::Value::Number(n) => {
            args.push(flag);
            args.push(n.to_string());
        }
        serde_yaml::Value::String(s) => {
            args.push(flag);
            args.push(s.clone());
        }
        other => {
            if let Ok(rendered) = serde_yaml::to_string(other) {
                args.push(flag);
                args.push(rendered.trim().to_string());
            }
        }
    }
}
