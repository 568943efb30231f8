use std::io::Write;

use assert_cmd::Command;
use predicates::prelude::*;

// Header {"alg":"RS256","kid":"k1"}, payload {"email":"a@unitn.it","nonce":"abc"}.
const TOKEN: &str = "eyJhbGciOiJSUzI1NiIsImtpZCI6ImsxIn0.eyJlbWFpbCI6ImFAdW5pdG4uaXQiLCJub25jZSI6ImFiYyJ9.3q2-7w";

fn agora() -> Command {
    let mut cmd = Command::cargo_bin("agora").unwrap();
    cmd.env("RUST_LOG", "error");
    cmd
}

#[test]
fn version_prints_package_and_version() {
    agora()
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn nonce_for_address() {
    agora()
        .args(["nonce", "0x0101010101010101010101010101010101010101"])
        .assert()
        .success()
        .stdout("AQEBAQEBAQEBAQEBAQEBAQEBAQE\n");
}

#[test]
fn nonce_rejects_malformed_address() {
    agora().args(["nonce", "abc"]).assert().failure().code(1);
}

#[test]
fn decode_prints_parts_and_claims() {
    agora()
        .args(["decode", TOKEN])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#"header:    {"alg":"RS256","kid":"k1"}"#))
        .stdout(predicate::str::contains("signature: 0xdeadbeef"))
        .stdout(predicate::str::contains("domain:    unitn.it"));
}

#[test]
fn decode_reads_token_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "{TOKEN}").unwrap();
    agora()
        .args(["decode", "--file"])
        .arg(file.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("nonce:     abc"));
}

#[test]
fn decode_malformed_token_exits_1() {
    agora()
        .args(["decode", "only.two"])
        .env("RUST_LOG", "error")
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::contains("Malformed identity token"));
}

#[test]
fn config_masks_pinata_jwt() {
    let dir = tempfile::tempdir().unwrap();
    agora()
        .current_dir(dir.path())
        .env("AGORA_PINATA_JWT", "very-secret-jwt-9876")
        .env("AGORA_DOMAIN_FEE", "0.5")
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("****9876"))
        .stdout(predicate::str::contains("0.5 ETH"))
        .stdout(predicate::str::contains("very-secret").not());
}

#[test]
fn config_rejects_bad_fee() {
    let dir = tempfile::tempdir().unwrap();
    agora()
        .current_dir(dir.path())
        .env("AGORA_DOMAIN_FEE", "a lot")
        .arg("config")
        .assert()
        .failure()
        .code(1);
}
