//! Scenario document parsing: the versioned YAML format, the task tree, and
//! load-time validation.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{ChannelStatus, LoadError, SkeinResult, TokenAmount, parse_duration};

pub const SCENARIO_VERSION: u32 = 2;

#[derive(Debug, Clone)]
pub struct ScenarioPath {
    path: PathBuf,
}

impl ScenarioPath {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn as_path(&self) -> &Path {
        &self.path
    }
}

/// Raw document shape. The `scenario` section stays untyped here; the task
/// tree is built by [`ScenarioDefinition::parse`] so that structural errors
/// map onto the [`LoadError`] taxonomy instead of generic serde messages.
#[derive(Debug, Clone, Deserialize)]
struct ScenarioFile {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    settings: Settings,
    #[serde(default)]
    token: TokenSettings,
    nodes: NodesSettings,
    scenario: serde_yaml::Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub gas_price: GasPrice,

    /// Target chain name; `any` means "whatever the RPC endpoint serves".
    #[serde(default = "default_chain")]
    pub chain: String,

    #[serde(default)]
    pub services: ServiceSettings,
}

fn default_chain() -> String {
    "any".to_string()
}

/// Gas price policy: `fast`, `medium`, or a fixed wei value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GasPrice {
    Fast,
    #[default]
    Medium,
    Fixed(u64),
}

impl GasPrice {
    /// Rendering for managed-node spawn args.
    pub fn as_arg(self) -> String {
        match self {
            Self::Fast => "fast".to_string(),
            Self::Medium => "medium".to_string(),
            Self::Fixed(wei) => wei.to_string(),
        }
    }
}

impl<'de> Deserialize<'de> for GasPrice {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct GasPriceVisitor;

        impl serde::de::Visitor<'_> for GasPriceVisitor {
            type Value = GasPrice;

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("\"fast\", \"medium\", or a fixed wei value")
            }

            fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<Self::Value, E> {
                Ok(GasPrice::Fixed(v))
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Self::Value, E> {
                match v {
                    "fast" => Ok(GasPrice::Fast),
                    "medium" => Ok(GasPrice::Medium),
                    other => Err(E::custom(format!(
                        "invalid gas price {other:?} (expected fast|medium|<wei>)"
                    ))),
                }
            }
        }

        deserializer.deserialize_any(GasPriceVisitor)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceSettings {
    /// Path-finding service base URL.
    #[serde(default)]
    pub pfs: Option<String>,

    /// Monitoring service base URL.
    #[serde(default)]
    pub ms: Option<String>,

    /// JSON-RPC endpoint for block-height queries.
    #[serde(default)]
    pub rpc: Option<String>,

    /// Event-index endpoint answering contract/event/argument queries.
    #[serde(default)]
    pub event_index: Option<String>,

    #[serde(default)]
    pub udc: UdcSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UdcSettings {
    #[serde(default)]
    pub enable: bool,
    #[serde(default)]
    pub token: UdcTokenSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UdcTokenSettings {
    #[serde(default)]
    pub deposit: bool,
    #[serde(default)]
    pub balance_per_node: Option<TokenAmount>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenSettings {
    /// Deployed token address; nodes register it on startup when set.
    #[serde(default)]
    pub address: Option<String>,

    /// Per-node funding amount in the smallest token unit.
    #[serde(default)]
    pub balance_fund: Option<TokenAmount>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeMode {
    #[default]
    Managed,
    External,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodesSettings {
    pub count: usize,

    #[serde(default)]
    pub mode: NodeMode,

    /// Client version selector, forwarded to managed nodes as an option.
    #[serde(default)]
    pub client_version: Option<String>,

    /// Client binary for managed mode.
    #[serde(default)]
    pub cmd: Option<String>,

    /// First API port for managed nodes; node `i` listens on `base_port + i`.
    #[serde(default = "default_base_port")]
    pub base_port: u16,

    /// Endpoints for external mode, one per node.
    #[serde(default)]
    pub urls: Vec<String>,

    #[serde(default)]
    pub default_options: BTreeMap<String, serde_yaml::Value>,

    /// Per-index overrides; an override wins on key collision.
    #[serde(default)]
    pub node_options: BTreeMap<usize, BTreeMap<String, serde_yaml::Value>>,
}

fn default_base_port() -> u16 {
    5001
}

impl NodesSettings {
    pub fn resolved_options(&self, index: usize) -> BTreeMap<String, serde_yaml::Value> {
        let mut options = self.default_options.clone();
        if let Some(overrides) = self.node_options.get(&index) {
            for (key, value) in overrides {
                options.insert(key.clone(), value.clone());
            }
        }
        options
    }

    fn validate(&self) -> Result<(), LoadError> {
        if self.count == 0 {
            return Err(LoadError::Invalid("nodes.count must be >= 1".to_string()));
        }
        if self.mode == NodeMode::External && self.urls.len() != self.count {
            return Err(LoadError::Invalid(format!(
                "external mode requires nodes.urls to list all {} endpoints (got {})",
                self.count,
                self.urls.len()
            )));
        }
        if let Some(index) = self.node_options.keys().find(|i| **i >= self.count) {
            return Err(LoadError::NodeIndexOutOfRange {
                kind: "node_options",
                index: *index,
                count: self.count,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TaskNode {
    Serial(CompositeTask),
    Parallel(CompositeTask),
    Leaf(Action),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompositeTask {
    pub name: Option<String>,
    pub repeat: u32,
    pub children: Vec<TaskNode>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    OpenChannel(OpenChannelParams),
    Deposit(DepositParams),
    Withdraw(WithdrawParams),
    CloseChannel(CloseChannelParams),
    Transfer(TransferParams),
    Assert(AssertChannelParams),
    AssertSum(AssertSumParams),
    AssertEvents(AssertEventsParams),
    AssertPfsHistory(AssertPfsHistoryParams),
    AssertPfsIou(AssertPfsIouParams),
    AssertPfsRoutes(AssertPfsRoutesParams),
    AssertMsClaim(AssertMsClaimParams),
    Wait(Duration),
    WaitBlocks(u64),
    StopNode(usize),
    StartNode(usize),
    StoreChannelInfo(StoreChannelInfoParams),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OpenChannelParams {
    pub from: usize,
    pub to: usize,
    pub total_deposit: TokenAmount,
    #[serde(default)]
    pub settle_timeout: Option<u32>,
    #[serde(default)]
    pub expected_http_status: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DepositParams {
    pub from: usize,
    pub to: usize,
    pub total_deposit: TokenAmount,
    #[serde(default)]
    pub expected_http_status: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WithdrawParams {
    pub from: usize,
    pub to: usize,
    pub total_withdraw: TokenAmount,
    #[serde(default)]
    pub expected_http_status: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CloseChannelParams {
    pub from: usize,
    pub to: usize,
    #[serde(default)]
    pub expected_http_status: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransferParams {
    pub from: usize,
    pub to: usize,
    pub amount: TokenAmount,
    #[serde(default)]
    pub lock_timeout: Option<u32>,
    #[serde(default)]
    pub expected_http_status: Option<u16>,
}

/// Channel-field assertion; every given field must match.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AssertChannelParams {
    pub from: usize,
    pub to: usize,
    #[serde(default)]
    pub total_deposit: Option<TokenAmount>,
    #[serde(default)]
    pub total_withdraw: Option<TokenAmount>,
    #[serde(default)]
    pub balance: Option<TokenAmount>,
    #[serde(default)]
    pub state: Option<ChannelStatus>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AssertSumParams {
    pub node: usize,
    pub balance_sum: TokenAmount,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AssertEventsParams {
    pub contract_name: String,
    pub event_name: String,
    pub num_events: u64,
    /// Field filter; an event matches when every given field is equal.
    #[serde(default)]
    pub event_args: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AssertPfsHistoryParams {
    pub source: usize,
    pub target: usize,
    pub request_count: u64,
    /// When given, the set of returned routes must match exactly
    /// (order-sensitive within a route, set-wise across routes).
    #[serde(default)]
    pub expected_routes: Option<Vec<Vec<usize>>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AssertPfsIouParams {
    pub source: usize,
    #[serde(default = "default_true")]
    pub iou_exists: bool,
    #[serde(default)]
    pub amount: Option<TokenAmount>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AssertPfsRoutesParams {
    pub from: usize,
    pub to: usize,
    pub amount: TokenAmount,
    pub expected_paths: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AssertMsClaimParams {
    pub channel_info_key: String,
    #[serde(default = "default_true")]
    pub must_claim: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreChannelInfoParams {
    pub key: String,
    pub from: usize,
    pub to: usize,
}

impl Action {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::OpenChannel(_) => "open_channel",
            Self::Deposit(_) => "deposit",
            Self::Withdraw(_) => "withdraw",
            Self::CloseChannel(_) => "close_channel",
            Self::Transfer(_) => "transfer",
            Self::Assert(_) => "assert",
            Self::AssertSum(_) => "assert_sum",
            Self::AssertEvents(_) => "assert_events",
            Self::AssertPfsHistory(_) => "assert_pfs_history",
            Self::AssertPfsIou(_) => "assert_pfs_iou",
            Self::AssertPfsRoutes(_) => "assert_pfs_routes",
            Self::AssertMsClaim(_) => "assert_ms_claim",
            Self::Wait(_) => "wait",
            Self::WaitBlocks(_) => "wait_blocks",
            Self::StopNode(_) => "stop_node",
            Self::StartNode(_) => "start_node",
            Self::StoreChannelInfo(_) => "store_channel_info",
        }
    }

    /// Short human label for reports and trace records.
    pub fn describe(&self) -> String {
        match self {
            Self::OpenChannel(p) => format!("open_channel {}-{}", p.from, p.to),
            Self::Deposit(p) => format!("deposit {}-{} {}", p.from, p.to, p.total_deposit),
            Self::Withdraw(p) => format!("withdraw {}-{} {}", p.from, p.to, p.total_withdraw),
            Self::CloseChannel(p) => format!("close_channel {}-{}", p.from, p.to),
            Self::Transfer(p) => format!("transfer {}->{} {}", p.from, p.to, p.amount),
            Self::Assert(p) => format!("assert {}-{}", p.from, p.to),
            Self::AssertSum(p) => format!("assert_sum node {}", p.node),
            Self::AssertEvents(p) => {
                format!("assert_events {}::{}", p.contract_name, p.event_name)
            }
            Self::AssertPfsHistory(p) => {
                format!("assert_pfs_history {}->{}", p.source, p.target)
            }
            Self::AssertPfsIou(p) => format!("assert_pfs_iou node {}", p.source),
            Self::AssertPfsRoutes(p) => format!("assert_pfs_routes {}->{}", p.from, p.to),
            Self::AssertMsClaim(p) => format!("assert_ms_claim {}", p.channel_info_key),
            Self::Wait(d) => format!("wait {}ms", d.as_millis()),
            Self::WaitBlocks(n) => format!("wait_blocks {n}"),
            Self::StopNode(n) => format!("stop_node {n}"),
            Self::StartNode(n) => format!("start_node {n}"),
            Self::StoreChannelInfo(p) => format!("store_channel_info {}", p.key),
        }
    }

    fn node_refs(&self) -> Vec<usize> {
        match self {
            Self::OpenChannel(p) => vec![p.from, p.to],
            Self::Deposit(p) => vec![p.from, p.to],
            Self::Withdraw(p) => vec![p.from, p.to],
            Self::CloseChannel(p) => vec![p.from, p.to],
            Self::Transfer(p) => vec![p.from, p.to],
            Self::Assert(p) => vec![p.from, p.to],
            Self::AssertSum(p) => vec![p.node],
            Self::AssertPfsHistory(p) => {
                let mut refs = vec![p.source, p.target];
                if let Some(routes) = &p.expected_routes {
                    refs.extend(routes.iter().flatten().copied());
                }
                refs
            }
            Self::AssertPfsIou(p) => vec![p.source],
            Self::AssertPfsRoutes(p) => vec![p.from, p.to],
            Self::StopNode(n) | Self::StartNode(n) => vec![*n],
            Self::StoreChannelInfo(p) => vec![p.from, p.to],
            Self::AssertEvents(_) | Self::AssertMsClaim(_) | Self::Wait(_) | Self::WaitBlocks(_) => {
                Vec::new()
            }
        }
    }
}

/// Immutable, fully validated scenario. Parsed once; execution never
/// re-reads the document.
#[derive(Debug, Clone)]
pub struct ScenarioDefinition {
    pub name: String,
    pub settings: Settings,
    pub token: TokenSettings,
    pub nodes: NodesSettings,
    pub root: TaskNode,
}

impl ScenarioDefinition {
    pub fn load(path: &ScenarioPath) -> SkeinResult<Self> {
        let text = std::fs::read_to_string(path.as_path())?;
        let fallback = path
            .as_path()
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "scenario".to_string());
        Ok(Self::parse(&text, &fallback)?)
    }

    pub fn parse(text: &str, fallback_name: &str) -> Result<Self, LoadError> {
        let raw: serde_yaml::Value = serde_yaml::from_str(text)
            .map_err(|err| LoadError::Invalid(format!("failed to parse scenario: {err}")))?;

        // The version is gated first, on the raw value: an old document
        // whose sections no longer match the current shape must still
        // report the version mismatch, not a decoding error.
        match raw.get("version").and_then(serde_yaml::Value::as_u64) {
            Some(found) if found == u64::from(SCENARIO_VERSION) => {}
            Some(found) => {
                return Err(LoadError::UnsupportedVersion {
                    found: u32::try_from(found).unwrap_or(u32::MAX),
                    expected: SCENARIO_VERSION,
                });
            }
            None => {
                return Err(LoadError::Invalid(
                    "scenario has no integer version field".to_string(),
                ));
            }
        }

        let file: ScenarioFile = serde_yaml::from_value(raw)
            .map_err(|err| LoadError::Invalid(format!("failed to parse scenario: {err}")))?;
        file.nodes.validate()?;

        let root = build_task(&file.scenario)?;
        validate_tree(&root, file.nodes.count)?;

        Ok(Self {
            name: file.name.unwrap_or_else(|| fallback_name.to_string()),
            settings: file.settings,
            token: file.token,
            nodes: file.nodes,
            root,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct CompositeRaw {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    repeat: Option<u32>,
    tasks: Vec<serde_yaml::Value>,
}

/// One task object: a single-key mapping whose key is either a composite
/// tag (`serial`/`parallel`) or an action kind.
fn build_task(value: &serde_yaml::Value) -> Result<TaskNode, LoadError> {
    let mapping = value.as_mapping().ok_or_else(|| {
        LoadError::MalformedTask("task must be a mapping with exactly one key".to_string())
    })?;
    if mapping.len() != 1 {
        return Err(LoadError::MalformedTask(format!(
            "task must have exactly one key, found {}",
            mapping.len()
        )));
    }
    let Some((key, body)) = mapping.iter().next() else {
        return Err(LoadError::MalformedTask(
            "task must have exactly one key".to_string(),
        ));
    };
    let key = key
        .as_str()
        .ok_or_else(|| LoadError::MalformedTask("task key must be a string".to_string()))?;

    match key {
        "serial" => Ok(TaskNode::Serial(build_composite("serial", body)?)),
        "parallel" => Ok(TaskNode::Parallel(build_composite("parallel", body)?)),
        _ => Ok(TaskNode::Leaf(build_action(key, body)?)),
    }
}

fn build_composite(
    kind: &'static str,
    body: &serde_yaml::Value,
) -> Result<CompositeTask, LoadError> {
    let raw: CompositeRaw = params_from_value(kind, body.clone())?;
    let repeat = raw.repeat.unwrap_or(1);
    if repeat == 0 {
        return Err(LoadError::MalformedTask(format!(
            "{kind}: repeat must be >= 1"
        )));
    }
    let children = raw
        .tasks
        .iter()
        .map(build_task)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(CompositeTask {
        name: raw.name,
        repeat,
        children,
    })
}

fn build_action(kind: &str, body: &serde_yaml::Value) -> Result<Action, LoadError> {
    Ok(match kind {
        "open_channel" => Action::OpenChannel(params_from_value("open_channel", body.clone())?),
        "deposit" => Action::Deposit(params_from_value("deposit", body.clone())?),
        "withdraw" => Action::Withdraw(params_from_value("withdraw", body.clone())?),
        "close_channel" => Action::CloseChannel(params_from_value("close_channel", body.clone())?),
        "transfer" => Action::Transfer(params_from_value("transfer", body.clone())?),
        "assert" => Action::Assert(params_from_value("assert", body.clone())?),
        "assert_sum" => Action::AssertSum(params_from_value("assert_sum", body.clone())?),
        "assert_events" => Action::AssertEvents(params_from_value("assert_events", body.clone())?),
        "assert_pfs_history" => {
            Action::AssertPfsHistory(params_from_value("assert_pfs_history", body.clone())?)
        }
        "assert_pfs_iou" => {
            Action::AssertPfsIou(params_from_value("assert_pfs_iou", body.clone())?)
        }
        "assert_pfs_routes" => {
            Action::AssertPfsRoutes(params_from_value("assert_pfs_routes", body.clone())?)
        }
        "assert_ms_claim" => {
            Action::AssertMsClaim(params_from_value("assert_ms_claim", body.clone())?)
        }
        "store_channel_info" => {
            Action::StoreChannelInfo(params_from_value("store_channel_info", body.clone())?)
        }
        "wait" => Action::Wait(duration_param("wait", body)?),
        "wait_blocks" => Action::WaitBlocks(scalar_param("wait_blocks", "blocks", body)?),
        "stop_node" => Action::StopNode(scalar_param("stop_node", "node", body)? as usize),
        "start_node" => Action::StartNode(scalar_param("start_node", "node", body)? as usize),
        other => return Err(LoadError::UnknownActionKind(other.to_string())),
    })
}

fn params_from_value<P: DeserializeOwned>(
    kind: &'static str,
    value: serde_yaml::Value,
) -> Result<P, LoadError> {
    serde_yaml::from_value(value).map_err(|err| {
        let msg = err.to_string();
        if let Some(rest) = msg.strip_prefix("missing field `") {
            if let Some(end) = rest.find('`') {
                return LoadError::MissingParameter {
                    kind,
                    parameter: rest[..end].to_string(),
                };
            }
        }
        LoadError::MalformedTask(format!("{kind}: {msg}"))
    })
}

/// `wait` accepts a bare value (`wait: 120`, `wait: 30s`) or a mapping
/// (`wait: {duration: 30s}`).
fn duration_param(kind: &'static str, body: &serde_yaml::Value) -> Result<Duration, LoadError> {
    let raw = match body {
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::String(s) => s.clone(),
        serde_yaml::Value::Mapping(m) => {
            let value = m
                .get("duration")
                .ok_or(LoadError::MissingParameter {
                    kind,
                    parameter: "duration".to_string(),
                })?;
            match value {
                serde_yaml::Value::Number(n) => n.to_string(),
                serde_yaml::Value::String(s) => s.clone(),
                _ => {
                    return Err(LoadError::MalformedTask(format!(
                        "{kind}: duration must be a number of seconds or a duration literal"
                    )));
                }
            }
        }
        _ => {
            return Err(LoadError::MissingParameter {
                kind,
                parameter: "duration".to_string(),
            });
        }
    };
    parse_duration(&raw).map_err(|err| LoadError::MalformedTask(format!("{kind}: {err}")))
}

/// `wait_blocks`/`stop_node`/`start_node` accept a bare integer or a
/// single-field mapping.
fn scalar_param(
    kind: &'static str,
    field: &'static str,
    body: &serde_yaml::Value,
) -> Result<u64, LoadError> {
    let value = match body {
        serde_yaml::Value::Number(_) => body,
        serde_yaml::Value::Mapping(m) => {
            m.get(field)
                .ok_or(LoadError::MissingParameter {
                    kind,
                    parameter: field.to_string(),
                })?
        }
        _ => {
            return Err(LoadError::MissingParameter {
                kind,
                parameter: field.to_string(),
            });
        }
    };
    value.as_u64().ok_or_else(|| {
        LoadError::MalformedTask(format!("{kind}: {field} must be a non-negative integer"))
    })
}

fn validate_tree(root: &TaskNode, node_count: usize) -> Result<(), LoadError> {
    let mut store_keys = BTreeSet::new();
    validate_node(root, node_count, &mut store_keys)
}

fn validate_node(
    node: &TaskNode,
    node_count: usize,
    store_keys: &mut BTreeSet<String>,
) -> Result<(), LoadError> {
    match node {
        TaskNode::Serial(composite) | TaskNode::Parallel(composite) => {
            for child in &composite.children {
                validate_node(child, node_count, store_keys)?;
            }
            Ok(())
        }
        TaskNode::Leaf(action) => {
            for index in action.node_refs() {
                if index >= node_count {
                    return Err(LoadError::NodeIndexOutOfRange {
                        kind: action.kind(),
                        index,
                        count: node_count,
                    });
                }
            }
            if let Action::StoreChannelInfo(params) = action {
                if !store_keys.insert(params.key.clone()) {
                    return Err(LoadError::DuplicateChannelInfoKey(params.key.clone()));
                }
            }
            Ok(())
        }
    }
}

/// A small but complete scenario document, printed by `skein example`.
pub fn example_document() -> &'static str {
    r#"version: 2
name: example

settings:
  gas_price: fast
  services:
    pfs: http://localhost:6000
    rpc: http://localhost:8545

token:
  balance_fund: 10_000_000_000_000_000_000

nodes:
  count: 3
  mode: external
  urls:
    - http://localhost:5001
    - http://localhost:5002
    - http://localhost:5003
  default_options:
    flat-fee: 0
  node_options:
    0:
      flat-fee: 100

scenario:
  serial:
    tasks:
      - parallel:
          name: open channels
          tasks:
            - open_channel: {from: 0, to: 1, total_deposit: 1_000_000_000_000_000_000}
            - open_channel: {from: 1, to: 2, total_deposit: 1_000_000_000_000_000_000}
      - serial:
          name: transfers
          repeat: 5
          tasks:
            - transfer: {from: 0, to: 2, amount: 1_000_000_000_000_000}
      - serial:
          name: verify
          tasks:
            - wait: 2
            - assert: {from: 0, to: 1, state: opened}
            - assert_sum: {node: 0, balance_sum: 995_000_000_000_000_000}
"#
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn example_document_parses() {
        let def = ScenarioDefinition::parse(example_document(), "example").unwrap();
        assert_eq!(def.name, "example");
        assert_eq!(def.nodes.count, 3);
        let TaskNode::Serial(root) = &def.root else {
            panic!("expected serial root");
        };
        assert_eq!(root.children.len(), 3);
    }

    #[test]
    fn option_merge_override_wins() {
        let def = ScenarioDefinition::parse(example_document(), "example").unwrap();
        let node0 = def.nodes.resolved_options(0);
        assert_eq!(node0.get("flat-fee"), Some(&serde_yaml::Value::from(100)));
        let node1 = def.nodes.resolved_options(1);
        assert_eq!(node1.get("flat-fee"), Some(&serde_yaml::Value::from(0)));
    }
}
