//! JSON-lines framing of the worker loop.
//!
//! These tests verify:
//! - `ready` is always the first line
//! - Every command line yields exactly one response line, in order
//! - Invalid lines produce an error response and the worker keeps going
//! - End of input shuts the worker down cleanly

use burrow_core::{Identity, env::test_utils::MockEnv};
use burrow_daemon::{AccessControl, Bridge, MemoryStore, run};
use burrow_proto::Response;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

fn bridge(dir: &TempDir) -> Bridge<MockEnv, MemoryStore> {
    let env = MockEnv::with_seed(42);
    let identity = Identity::generate(&env);
    let access =
        AccessControl::open(dir.path().join("access.json"), Some(identity.public_key())).unwrap();
    Bridge::new(env, identity, MemoryStore::new(), access, None).unwrap()
}

async fn run_script(script: &str) -> Vec<Response> {
    let dir = TempDir::new().unwrap();
    let mut output = Vec::new();
    run(bridge(&dir), script.as_bytes(), &mut output).await.unwrap();

    String::from_utf8(output)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[tokio::test]
async fn ready_comes_first_and_eof_is_clean() {
    let responses = run_script("").await;
    assert_eq!(responses.len(), 1);
    assert!(matches!(responses[0], Response::Ready { .. }));
}

#[tokio::test]
async fn one_response_per_command_in_order() {
    let script = concat!(
        r#"{"command":"list_groups"}"#,
        "\n",
        r#"{"command":"create_group","name":"Ordered"}"#,
        "\n",
        "this is not json\n",
        "\n",
        r#"{"command":"keygen"}"#,
        "\n",
        r#"{"command":"list_groups"}"#,
        "\n",
    );
    let responses = run_script(script).await;
    assert_eq!(responses.len(), 6, "{responses:?}");

    assert!(matches!(responses[0], Response::Ready { .. }));
    assert_eq!(responses[1], Response::Groups { groups: vec![] });
    let Response::GroupCreated { group, .. } = &responses[2] else {
        panic!("expected group_created, got {:?}", responses[2]);
    };
    match &responses[3] {
        Response::Error { error } => assert!(error.starts_with("invalid command:"), "{error}"),
        other => panic!("expected error, got {other:?}"),
    }
    assert!(matches!(responses[4], Response::KeyPackage { last_resort: false, .. }));
    match &responses[5] {
        Response::Groups { groups } => assert_eq!(groups, &vec![group.clone()]),
        other => panic!("expected groups, got {other:?}"),
    }
}

#[tokio::test]
async fn failures_do_not_stop_the_worker() {
    let script = concat!(
        r#"{"command":"send_message","group_id":"AB","content":"x"}"#,
        "\n",
        r#"{"command":"self_destruct"}"#,
        "\n",
        r#"{"command":"list_groups"}"#,
        "\n",
    );
    let responses = run_script(script).await;
    assert_eq!(responses.len(), 4);
    match &responses[2] {
        Response::Error { error } => {
            assert!(error.starts_with("invalid command: unknown variant `self_destruct`"), "{error}");
        },
        other => panic!("expected error, got {other:?}"),
    }

    let lines: Vec<String> = [&responses[1], &responses[3]]
        .iter()
        .map(|r| serde_json::to_string(r).unwrap())
        .collect();
    insta::assert_snapshot!(lines.join("\n"), @r#"
    {"type":"error","error":"unknown group: ab"}
    {"type":"groups","groups":[]}
    "#);
}

#[tokio::test]
async fn interactive_controller_over_pipes() {
    let dir = TempDir::new().unwrap();
    let (mut controller_in, worker_in) = tokio::io::duplex(4096);
    let (worker_out, controller_out) = tokio::io::duplex(4096);

    let controller = async move {
        let mut lines = BufReader::new(controller_out).lines();

        let ready: Response =
            serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert!(matches!(ready, Response::Ready { .. }));

        controller_in
            .write_all(b"{\"command\":\"create_group\",\"name\":\"Piped\"}\n")
            .await
            .unwrap();
        let created: Response =
            serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        let Response::GroupCreated { group, .. } = created else {
            panic!("expected group_created, got {created:?}");
        };

        let export =
            format!("{{\"command\":\"export_secret\",\"group_id\":\"{}\"}}\n", group.group_id);
        controller_in.write_all(export.as_bytes()).await.unwrap();
        let secret: Response =
            serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        match secret {
            Response::Secret { epoch, secret, .. } => {
                assert_eq!(epoch, 0);
                assert_eq!(secret.len(), 64);
            },
            other => panic!("expected secret, got {other:?}"),
        }

        drop(controller_in);
        lines
    };

    let (result, mut lines) =
        tokio::join!(run(bridge(&dir), BufReader::new(worker_in), worker_out), controller);
    result.unwrap();
    assert!(lines.next_line().await.unwrap().is_none());
}
