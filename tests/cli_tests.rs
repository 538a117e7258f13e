// ABOUTME: Integration tests for the vemtl command line binary
// ABOUTME: Runs render, check and inspect end to end against templates in a temp directory

use std::process::{Command, Output};

mod common;
use common::TestEnvironment;

fn vemtl(env: &TestEnvironment, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_vemtl"))
        .args(args)
        .current_dir(env.path())
        .env_remove("VEMTL_IMPORTS_DIR")
        .env_remove("VEMTL_LOG_LEVEL")
        .env_remove("VEMTL_LOG_FORMAT")
        .output()
        .expect("Failed to execute vemtl")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn test_cli_help_command() {
    let env = TestEnvironment::new();
    let output = vemtl(&env, &["--help"]);

    assert!(output.status.success());
    let text = stdout(&output);
    assert!(text.contains("vemtl"));
    assert!(text.contains("render"));
    assert!(text.contains("inspect"));
}

#[tokio::test]
async fn test_cli_render_with_inline_data() {
    let env = TestEnvironment::new();
    let file = env
        .write_file("greeting.vemtl", "Hello <$ this.name $>!")
        .await;

    let output = vemtl(
        &env,
        &["render", file.to_str().unwrap(), "--data", r#"{"name": "Ann"}"#],
    );

    assert!(output.status.success());
    assert_eq!(stdout(&output), "Hello Ann!");
}

#[tokio::test]
async fn test_cli_render_with_imports_dir_and_output_file() {
    let env = TestEnvironment::new();
    env.write_file("partials/title.vemtl", "# <$ this.title $>").await;
    let file = env
        .write_file("page.vemtl", "<import template=\"partials/title.vemtl\">\nbody")
        .await;
    let target = env.file("page.md");

    let output = vemtl(
        &env,
        &[
            "render",
            file.to_str().unwrap(),
            "--imports-dir",
            env.path().to_str().unwrap(),
            "--data",
            r#"{"title": "Docs"}"#,
            "--output",
            target.to_str().unwrap(),
        ],
    );

    assert!(output.status.success());
    let rendered = tokio::fs::read_to_string(&target).await.unwrap();
    assert!(rendered.contains("# Docs"));
    assert!(rendered.ends_with("body"));
}

#[tokio::test]
async fn test_cli_render_reports_template_line() {
    let env = TestEnvironment::new();
    let file = env
        .write_file("broken.vemtl", "line one\n<$ this.user.name $>")
        .await;

    let output = vemtl(&env, &["render", file.to_str().unwrap(), "--name", "broken"]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("template line 2"));
    assert!(stderr.contains("Cannot read property 'name' of undefined"));
}

#[tokio::test]
async fn test_cli_check_valid_and_invalid_templates() {
    let env = TestEnvironment::new();
    let valid = env
        .write_file("valid.vemtl", "<% for (let i = 0; i < 2; i++) { %>x<% } %>")
        .await;
    let invalid = env.write_file("invalid.vemtl", "<% if (a) { %>x").await;

    let output = vemtl(&env, &["check", valid.to_str().unwrap()]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("is valid"));

    let output = vemtl(&env, &["check", invalid.to_str().unwrap()]);
    assert!(!output.status.success());
}

#[tokio::test]
async fn test_cli_inspect_data_declarations() {
    let env = TestEnvironment::new();
    let file = env
        .write_file(
            "model.vemtl",
            "<# DATA:MODEL [ model = 'User' ] #>\n<# DATA:SETTINGS [ settings = {\"soft\": true} ] #>\n",
        )
        .await;

    let output = vemtl(&env, &["inspect", file.to_str().unwrap(), "--data"]);

    assert!(output.status.success());
    let declarations: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(declarations["model"]["dataType"], "MODEL");
    assert_eq!(declarations["model"]["value"], "User");
    assert_eq!(declarations["settings"]["value"]["soft"], true);
}
