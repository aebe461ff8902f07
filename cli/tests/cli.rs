//! End-to-end tests for the `knot` binary.

use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

const CATALOG: &str = "rotten_tomatoes_link,movie_title,movie_info\n\
                       m/hero,Hero,A hero saves the city. It is thrilling.\n\
                       m/saviour,Saviour,A hero saves the world. It is epic.\n\
                       m/romance,Paris,A quiet romance in Paris.\n\
                       m/lost,Lost,\n";

fn knot() -> Command {
    let mut command = Command::cargo_bin("knot").unwrap();
    command.env_remove("KNOT_CONFIG").env_remove("KNOT_STORE");
    command
}

fn build_store(dir: &Path) -> (String, String) {
    let input = dir.join("movies.csv");
    let store = dir.join("embeddings.csv");
    std::fs::write(&input, CATALOG).unwrap();

    let input = input.to_str().unwrap().to_string();
    let store = store.to_str().unwrap().to_string();
    knot()
        .args(["build", "--input", &input, "--output", &store])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"units\":5"));
    (input, store)
}

#[test]
fn test_build_writes_store() {
    let temp_dir = TempDir::new().unwrap();
    let (_, store) = build_store(temp_dir.path());

    let content = std::fs::read_to_string(store).unwrap();
    assert!(content.starts_with("sentence_id,document_id,ordinal,sentence,embedding"));
    assert!(content.contains("m/hero_2"));
}

#[test]
fn test_query_prints_best_sentence_first() {
    let temp_dir = TempDir::new().unwrap();
    let (_, store) = build_store(temp_dir.path());

    let output = knot()
        .args(["query", "a hero saves a city", "--store", &store, "-k", "2"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout).unwrap();
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].contains("\"id\":\"m/hero_1\""));
    assert!(lines[0].contains("\"sentence\":\"A hero saves the city.\""));
}

#[test]
fn test_similar_attaches_dataset_rows() {
    let temp_dir = TempDir::new().unwrap();
    let (input, store) = build_store(temp_dir.path());

    knot()
        .args([
            "similar",
            "--document",
            "m/hero",
            "--store",
            &store,
            "--dataset",
            &input,
            "-k",
            "1",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"document_id\":\"m/saviour\""))
        .stdout(predicate::str::contains("\"movie_title\":\"Saviour\""));
}

#[test]
fn test_zero_k_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let (_, store) = build_store(temp_dir.path());

    knot()
        .args(["query", "anything", "--store", &store, "-k", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid k"));
}

#[test]
fn test_store_built_with_other_dimension_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let (_, store) = build_store(temp_dir.path());

    knot()
        .args(["query", "anything", "--store", &store, "--dimensions", "64"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("dimension mismatch"));
}

#[test]
fn test_missing_store_names_the_path() {
    knot()
        .args(["query", "anything", "--store", "does/not/exist.csv"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("does/not/exist.csv"));
}
