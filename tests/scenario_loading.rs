//! Scenario-document loading: the error taxonomy, literal parsing inside
//! the tree, and structural validation.

use std::time::Duration;

use skein::{Action, LoadError, NodeMode, ScenarioDefinition, TaskNode, TokenAmount};

fn doc(node_count: usize, scenario: &str) -> String {
    let urls: String = (0..node_count)
        .map(|i| format!("    - http://localhost:5{i:03}\n"))
        .collect();
    format!(
        "version: 2\nname: loader test\nnodes:\n  count: {node_count}\n  mode: external\n  urls:\n{urls}scenario:\n{scenario}"
    )
}

fn parse(node_count: usize, scenario: &str) -> Result<ScenarioDefinition, LoadError> {
    ScenarioDefinition::parse(&doc(node_count, scenario), "loader test")
}

#[test]
fn version_mismatch_is_rejected_up_front() {
    let text = "version: 1\nnodes:\n  count: 1\nscenario:\n  serial:\n    tasks: []\n";
    let err = ScenarioDefinition::parse(text, "old").unwrap_err();
    assert!(matches!(
        err,
        LoadError::UnsupportedVersion {
            found: 1,
            expected: 2
        }
    ));
}

#[test]
fn version_gate_runs_before_shape_decoding() {
    // Old documents may not even match the current section shapes; the
    // mismatch must still be reported as a version problem.
    let text = concat!(
        "version: 1\n",
        "nodes:\n",
        "  - http://localhost:5001\n",
        "scenario: [wait, assert]\n",
    );
    let err = ScenarioDefinition::parse(text, "old shape").unwrap_err();
    assert!(matches!(
        err,
        LoadError::UnsupportedVersion {
            found: 1,
            expected: 2
        }
    ));
}

#[test]
fn missing_version_is_invalid() {
    let text = "name: unversioned\nnodes:\n  count: 1\nscenario:\n  serial:\n    tasks: []\n";
    let err = ScenarioDefinition::parse(text, "unversioned").unwrap_err();
    assert!(matches!(err, LoadError::Invalid(_)));
}

#[test]
fn unknown_action_kind_names_the_kind() {
    let err = parse(
        2,
        "  serial:\n    tasks:\n      - teleport: {from: 0, to: 1}\n",
    )
    .unwrap_err();
    let LoadError::UnknownActionKind(kind) = err else {
        panic!("expected UnknownActionKind, got {err:?}");
    };
    assert_eq!(kind, "teleport");
}

#[test]
fn missing_parameter_names_action_and_field() {
    let err = parse(
        2,
        "  serial:\n    tasks:\n      - open_channel: {from: 0, to: 1}\n",
    )
    .unwrap_err();
    let LoadError::MissingParameter { kind, parameter } = err else {
        panic!("expected MissingParameter, got {err:?}");
    };
    assert_eq!(kind, "open_channel");
    assert_eq!(parameter, "total_deposit");
}

#[test]
fn node_index_out_of_range_is_caught_at_load_time() {
    let err = parse(
        2,
        "  serial:\n    tasks:\n      - transfer: {from: 0, to: 5, amount: 10}\n",
    )
    .unwrap_err();
    assert!(matches!(
        err,
        LoadError::NodeIndexOutOfRange {
            kind: "transfer",
            index: 5,
            count: 2
        }
    ));
}

#[test]
fn expected_route_indices_are_range_checked_too() {
    let err = parse(
        2,
        concat!(
            "  serial:\n",
            "    tasks:\n",
            "      - assert_pfs_history:\n",
            "          source: 0\n",
            "          target: 1\n",
            "          request_count: 1\n",
            "          expected_routes:\n",
            "            - [0, 9, 1]\n",
        ),
    )
    .unwrap_err();
    assert!(matches!(
        err,
        LoadError::NodeIndexOutOfRange { index: 9, .. }
    ));
}

#[test]
fn duplicate_store_keys_are_rejected() {
    let err = parse(
        2,
        concat!(
            "  serial:\n",
            "    tasks:\n",
            "      - store_channel_info: {key: main, from: 0, to: 1}\n",
            "      - store_channel_info: {key: main, from: 1, to: 0}\n",
        ),
    )
    .unwrap_err();
    let LoadError::DuplicateChannelInfoKey(key) = err else {
        panic!("expected DuplicateChannelInfoKey, got {err:?}");
    };
    assert_eq!(key, "main");
}

#[test]
fn task_with_two_keys_is_malformed() {
    let err = parse(
        2,
        concat!(
            "  serial:\n",
            "    tasks:\n",
            "      - wait: 1\n",
            "        stop_node: 0\n",
        ),
    )
    .unwrap_err();
    assert!(matches!(err, LoadError::MalformedTask(_)));
}

#[test]
fn repeat_zero_is_rejected() {
    let err = parse(
        1,
        "  serial:\n    repeat: 0\n    tasks:\n      - wait: 1\n",
    )
    .unwrap_err();
    assert!(matches!(err, LoadError::MalformedTask(_)));
}

#[test]
fn unknown_parameter_fields_are_rejected() {
    let err = parse(
        2,
        "  serial:\n    tasks:\n      - transfer: {from: 0, to: 1, amount: 10, speed: fast}\n",
    )
    .unwrap_err();
    assert!(matches!(err, LoadError::MalformedTask(_)));
}

#[test]
fn underscore_grouped_amounts_parse_into_the_tree() {
    let def = parse(
        2,
        concat!(
            "  serial:\n",
            "    tasks:\n",
            "      - open_channel: {from: 0, to: 1, total_deposit: 1_000_000_000_000_000_000}\n",
            "      - transfer: {from: 0, to: 1, amount: 2500}\n",
        ),
    )
    .unwrap();
    let TaskNode::Serial(root) = &def.root else {
        panic!("expected serial root");
    };
    let TaskNode::Leaf(Action::OpenChannel(open)) = &root.children[0] else {
        panic!("expected open_channel leaf");
    };
    assert_eq!(open.total_deposit, TokenAmount(1_000_000_000_000_000_000));
    let TaskNode::Leaf(Action::Transfer(transfer)) = &root.children[1] else {
        panic!("expected transfer leaf");
    };
    assert_eq!(transfer.amount, TokenAmount(2500));
}

#[test]
fn wait_accepts_bare_scalars_and_mappings() {
    let def = parse(
        1,
        concat!(
            "  serial:\n",
            "    tasks:\n",
            "      - wait: 120\n",
            "      - wait: 30s\n",
            "      - wait: {duration: 250ms}\n",
            "      - wait_blocks: 5\n",
        ),
    )
    .unwrap();
    let TaskNode::Serial(root) = &def.root else {
        panic!("expected serial root");
    };
    let waits: Vec<&Action> = root
        .children
        .iter()
        .map(|c| match c {
            TaskNode::Leaf(action) => action,
            other => panic!("expected leaf, got {other:?}"),
        })
        .collect();
    assert_eq!(*waits[0], Action::Wait(Duration::from_secs(120)));
    assert_eq!(*waits[1], Action::Wait(Duration::from_secs(30)));
    assert_eq!(*waits[2], Action::Wait(Duration::from_millis(250)));
    assert_eq!(*waits[3], Action::WaitBlocks(5));
}

#[test]
fn nested_tree_preserves_structure_and_repeat() {
    let def = parse(
        5,
        concat!(
            "  serial:\n",
            "    tasks:\n",
            "      - parallel:\n",
            "          name: open\n",
            "          tasks:\n",
            "            - open_channel: {from: 0, to: 1, total_deposit: 100}\n",
            "            - open_channel: {from: 1, to: 2, total_deposit: 100}\n",
            "            - open_channel: {from: 2, to: 3, total_deposit: 100}\n",
            "            - open_channel: {from: 0, to: 4, total_deposit: 100}\n",
            "            - open_channel: {from: 4, to: 3, total_deposit: 100}\n",
            "      - serial:\n",
            "          repeat: 10\n",
            "          tasks:\n",
            "            - transfer: {from: 3, to: 0, amount: 7}\n",
        ),
    )
    .unwrap();
    let TaskNode::Serial(root) = &def.root else {
        panic!("expected serial root");
    };
    assert_eq!(root.repeat, 1);
    assert_eq!(root.children.len(), 2);

    let TaskNode::Parallel(open) = &root.children[0] else {
        panic!("expected parallel child");
    };
    assert_eq!(open.name.as_deref(), Some("open"));
    assert_eq!(open.children.len(), 5);

    let TaskNode::Serial(transfers) = &root.children[1] else {
        panic!("expected serial child");
    };
    assert_eq!(transfers.repeat, 10);
    assert_eq!(transfers.children.len(), 1);
}

#[test]
fn external_mode_requires_a_url_per_node() {
    let text = concat!(
        "version: 2\n",
        "nodes:\n",
        "  count: 3\n",
        "  mode: external\n",
        "  urls:\n",
        "    - http://localhost:5001\n",
        "scenario:\n",
        "  serial:\n",
        "    tasks: []\n",
    );
    let err = ScenarioDefinition::parse(text, "short").unwrap_err();
    assert!(matches!(err, LoadError::Invalid(_)));
}

#[test]
fn node_options_for_unknown_indices_are_rejected() {
    let text = concat!(
        "version: 2\n",
        "nodes:\n",
        "  count: 2\n",
        "  mode: external\n",
        "  urls:\n",
        "    - http://localhost:5001\n",
        "    - http://localhost:5002\n",
        "  node_options:\n",
        "    7:\n",
        "      flat-fee: 0\n",
        "scenario:\n",
        "  serial:\n",
        "    tasks: []\n",
    );
    let err = ScenarioDefinition::parse(text, "options").unwrap_err();
    assert!(matches!(
        err,
        LoadError::NodeIndexOutOfRange {
            kind: "node_options",
            index: 7,
            count: 2
        }
    ));
}

#[test]
fn name_falls_back_to_the_file_stem() {
    let text = "version: 2\nnodes:\n  count: 1\n  mode: external\n  urls:\n    - http://localhost:5001\nscenario:\n  serial:\n    tasks: []\n";
    let def = ScenarioDefinition::parse(text, "mfee4").unwrap();
    assert_eq!(def.name, "mfee4");
}

#[test]
fn managed_is_the_default_node_mode() {
    let text = concat!(
        "version: 2\n",
        "nodes:\n",
        "  count: 2\n",
        "  cmd: channel-node\n",
        "scenario:\n",
        "  serial:\n",
        "    tasks:\n",
        "      - wait: 1\n",
    );
    let def = ScenarioDefinition::parse(text, "managed").unwrap();
    assert_eq!(def.nodes.mode, NodeMode::Managed);
    assert_eq!(def.nodes.base_port, 5001);
}
