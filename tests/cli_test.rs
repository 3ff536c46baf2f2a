//! Command-line behavior that needs no server.

use std::process::{Command, Output};

fn crow_cli(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_crow-cli"))
        .args(args)
        .env_remove("CROW_USERNAME")
        .env_remove("CROW_PASSWORD")
        .env_remove("CROW_TOKEN")
        .env_remove("CROW_REFRESH_TOKEN")
        // Nothing listens here; a login attempt would fail rather than hang.
        .env("CROW_SERVER_URL", "http://127.0.0.1:9")
        .output()
        .expect("run crow-cli")
}

#[test]
fn test_login_with_token_only_is_rejected() {
    let output = crow_cli(&["--token", "access-1", "login"]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("login needs --username and --password"), "{stderr}");
}

#[test]
fn test_about_prints_version() {
    let output = crow_cli(&["about"]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains(env!("CARGO_PKG_VERSION")), "{stdout}");
}
