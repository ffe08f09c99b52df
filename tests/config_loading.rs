// tests/config_loading.rs

//! TOML loading, validation and lowering to the planner's graph form.

use std::fs;
use std::path::PathBuf;

use memdag::config::loader::{load_and_validate, load_from_path};
use tempfile::TempDir;

fn write_graph(dir: &TempDir, contents: &str) -> PathBuf {
    let path = dir.path().join("memdag.toml");
    fs::write(&path, contents).unwrap();
    path
}

#[test]
fn loads_a_valid_graph_file() {
    let dir = TempDir::new().unwrap();
    let path = write_graph(
        &dir,
        r#"
[op.load]

[op.matmul]
after = ["load"]

[op.store]
after = ["matmul"]
reusable = false

[buffer.weights]
size = 1024
producer = "load"
consumers = ["matmul"]

[buffer.activations]
size = 4096
producer = "matmul"
consumers = ["store"]
"#,
    );

    let file = load_and_validate(&path).unwrap();
    assert_eq!(file.op.len(), 3);
    assert_eq!(file.buffer.len(), 2);
    assert!(file.op["load"].after.is_empty());
    assert_eq!(file.op["matmul"].after, vec!["load"]);
    assert!(file.op["matmul"].reusable);
    assert!(!file.op["store"].reusable);
    assert_eq!(file.buffer["weights"].size, 1024);
}

#[test]
fn missing_file_reports_the_path() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nope.toml");
    let err = load_from_path(&path).unwrap_err();
    assert!(format!("{err:#}").contains("nope.toml"));
}

#[test]
fn rejects_invalid_toml() {
    let dir = TempDir::new().unwrap();
    let path = write_graph(&dir, "[op.a\nthis is not toml");
    let err = load_from_path(&path).unwrap_err();
    assert!(format!("{err:#}").contains("parsing TOML"));
}

#[test]
fn rejects_an_empty_graph() {
    let dir = TempDir::new().unwrap();
    let path = write_graph(&dir, "");
    let err = load_and_validate(&path).unwrap_err();
    assert!(format!("{err}").contains("at least one"));
}

#[test]
fn rejects_unknown_dependencies() {
    let dir = TempDir::new().unwrap();
    let path = write_graph(
        &dir,
        r#"
[op.a]
after = ["ghost"]
"#,
    );
    let err = load_and_validate(&path).unwrap_err();
    let message = format!("{err}");
    assert!(message.contains("'a'"), "got: {message}");
    assert!(message.contains("'ghost'"), "got: {message}");
}

#[test]
fn rejects_unknown_buffer_producer() {
    let dir = TempDir::new().unwrap();
    let path = write_graph(
        &dir,
        r#"
[op.a]

[buffer.x]
size = 16
producer = "ghost"
"#,
    );
    let err = load_and_validate(&path).unwrap_err();
    assert!(format!("{err}").contains("unknown producer"));
}

#[test]
fn rejects_negative_buffer_sizes() {
    let dir = TempDir::new().unwrap();
    let path = write_graph(
        &dir,
        r#"
[op.a]

[buffer.x]
size = -4
producer = "a"
"#,
    );
    let err = load_and_validate(&path).unwrap_err();
    assert!(format!("{err}").contains("negative size"));
}

#[test]
fn rejects_dependency_cycles() {
    let dir = TempDir::new().unwrap();
    let path = write_graph(
        &dir,
        r#"
[op.a]
after = ["c"]

[op.b]
after = ["a"]

[op.c]
after = ["b"]
"#,
    );
    let err = load_and_validate(&path).unwrap_err();
    assert!(format!("{err}").contains("cycle"));
}

#[test]
fn lowering_maps_names_to_indices() {
    let dir = TempDir::new().unwrap();
    let path = write_graph(
        &dir,
        r#"
[op.alpha]

[op.beta]
after = ["alpha"]

[op.gamma]
after = ["beta"]
control_after = ["alpha"]

[buffer.x]
size = 32
producer = "alpha"
consumers = ["beta", "gamma"]
"#,
    );

    let file = load_and_validate(&path).unwrap();
    let (graph, names) = file.to_dataflow().unwrap();

    // BTreeMap order: alpha, beta, gamma.
    assert_eq!(names, vec!["alpha", "beta", "gamma"]);
    assert!(graph.ops[0].data_deps.is_empty());
    assert_eq!(graph.ops[1].data_deps, vec![0]);
    assert_eq!(graph.ops[2].data_deps, vec![1]);
    assert_eq!(graph.ops[2].control_deps, vec![0]);
    assert_eq!(graph.buffers[0].producer, 0);
    assert_eq!(graph.buffers[0].consumers, vec![1, 2]);
    assert_eq!(graph.buffers[0].size, 32);
}

#[test]
fn lowered_graphs_plan_end_to_end() {
    let dir = TempDir::new().unwrap();
    let path = write_graph(
        &dir,
        r#"
[op.a]

[op.b]
after = ["a"]

[op.c]
after = ["b"]

[buffer.ab]
size = 10
producer = "a"
consumers = ["b"]

[buffer.bc]
size = 10
producer = "b"
consumers = ["c"]
"#,
    );

    let file = load_and_validate(&path).unwrap();
    let (graph, names) = file.to_dataflow().unwrap();
    let result = memdag::dag::plan_default(&graph);
    let ordered: Vec<&str> = result.order.iter().map(|&op| names[op].as_str()).collect();
    assert_eq!(ordered, vec!["a", "b", "c"]);
    assert_eq!(result.peak_memory, 20);
}
