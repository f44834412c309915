use assert_cmd::prelude::*;
use relayfeed::{
    build_event,
    store::{EventStore, FileStore},
    AuxRand, SigningKey, Tag,
};
use secp256k1::{Keypair, Message, Secp256k1};
use sha2::{Digest, Sha256};
use std::{fs, process::Command};
use tempfile::TempDir;

fn write_env(dir: &TempDir) -> String {
    let env_path = dir.path().join("env");
    let content = format!(
        "RELAY_URL=ws://127.0.0.1:9\nSTORE_ROOT={}\nLOG_LEVEL=warn\n",
        dir.path().join("store").display()
    );
    fs::write(&env_path, content).unwrap();
    env_path.to_str().unwrap().to_string()
}

/// A signed event built without the crate's own signing path.
fn signed_event_json(content: &str) -> serde_json::Value {
    let secp = Secp256k1::new();
    let sk = [1u8; 32];
    let kp = Keypair::from_seckey_slice(&secp, &sk).unwrap();
    let pubkey = hex::encode(kp.x_only_public_key().0.serialize());
    let created_at = 1_669_524_090i64;
    let kind = 1u32;
    let tags = vec![vec!["t".to_string(), "nostr".to_string()]];
    let arr = serde_json::json!([0, pubkey, created_at, kind, tags, content]);
    let data = serde_json::to_vec(&arr).unwrap();
    let hash: [u8; 32] = Sha256::digest(&data).into();
    let msg = Message::from_digest(hash);
    let sig = secp.sign_schnorr_no_aux_rand(&msg, &kp);
    serde_json::json!({
        "id": hex::encode(hash),
        "pubkey": pubkey,
        "created_at": created_at,
        "kind": kind,
        "tags": tags,
        "content": content,
        "sig": hex::encode(sig.as_ref()),
    })
}

#[test]
fn help_lists_commands() {
    let output = Command::cargo_bin("relayfeed")
        .unwrap()
        .arg("--help")
        .output()
        .unwrap();
    assert!(output.status.success());
    let text = String::from_utf8(output.stdout).unwrap();
    for cmd in ["init", "listen", "post", "verify", "recent"] {
        assert!(text.contains(cmd), "missing {cmd} in help");
    }
}

#[test]
fn init_writes_env_and_store_layout() {
    let dir = TempDir::new().unwrap();
    let env_path = dir.path().join("conf").join(".env");

    Command::cargo_bin("relayfeed")
        .unwrap()
        .args(["--env", env_path.to_str().unwrap(), "init"])
        .assert()
        .success();

    let data = fs::read_to_string(&env_path).unwrap();
    assert!(data.contains("RELAY_URL="));
    assert!(data.contains("SECRET_KEY="));
    let root = dir.path().join("conf").join("relayfeed-data");
    assert!(root.join("events").is_dir());
    assert!(root.join("log").is_dir());
}

#[test]
fn verify_accepts_signed_and_rejects_tampered_events() {
    let dir = TempDir::new().unwrap();
    let env_path = write_env(&dir);

    let ev = signed_event_json("héllo \"relay\"");
    let good = dir.path().join("good.json");
    fs::write(&good, serde_json::to_string(&ev).unwrap()).unwrap();

    let output = Command::cargo_bin("relayfeed")
        .unwrap()
        .args(["--env", &env_path, "verify", good.to_str().unwrap()])
        .output()
        .unwrap();
    assert!(output.status.success());
    let text = String::from_utf8(output.stdout).unwrap();
    assert_eq!(text.trim(), format!("ok {}", ev["id"].as_str().unwrap()));

    let mut tampered = ev.clone();
    tampered["content"] = "hello relay".into();
    let bad = dir.path().join("bad.json");
    fs::write(&bad, serde_json::to_string(&tampered).unwrap()).unwrap();

    Command::cargo_bin("relayfeed")
        .unwrap()
        .args(["--env", &env_path, "verify", bad.to_str().unwrap()])
        .assert()
        .failure();
}

#[test]
fn recent_prints_stored_events_oldest_first() {
    let dir = TempDir::new().unwrap();
    let env_path = write_env(&dir);
    let store = FileStore::new(dir.path().join("store"));
    store.init().unwrap();

    let key = SigningKey::from_slice(&[2u8; 32]).unwrap();
    for (ts, text) in [(30, "third"), (10, "first"), (20, "second")] {
        let ev = build_event(text, ts, 1, vec![], &key, AuxRand::Fixed([0u8; 32])).unwrap();
        assert!(store.insert_if_absent(&ev).unwrap());
    }
    let channel = build_event(
        "ignored kind",
        40,
        7,
        vec![Tag::new(["e", "x"])],
        &key,
        AuxRand::Fixed([0u8; 32]),
    )
    .unwrap();
    store.insert_if_absent(&channel).unwrap();

    let output = Command::cargo_bin("relayfeed")
        .unwrap()
        .args(["--env", &env_path, "recent", "--limit", "3"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let text = String::from_utf8(output.stdout).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].ends_with(" second"));
    assert!(lines[1].ends_with(" third"));
    assert!(lines[2].ends_with(" <event of kind 7>"));

    Command::cargo_bin("relayfeed")
        .unwrap()
        .args(["--env", &env_path, "verify", "--sample", "10"])
        .assert()
        .success();
}
