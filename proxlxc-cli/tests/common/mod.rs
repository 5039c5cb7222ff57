#![allow(dead_code)]

use std::path::PathBuf;
use std::time::Duration;

use assert_cmd::Command;
use serde_json::{Value, json};

pub struct TestContext {
    pub dir: tempfile::TempDir,
}

impl TestContext {
    pub fn new_cmd(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_proxlxc"));
        cmd.timeout(Duration::from_secs(60));
        cmd.env_remove("PROXMOX_URL")
            .env_remove("PROXMOX_USERNAME")
            .env_remove("PROXMOX_PASSWORD")
            .env_remove("RUST_LOG");
        cmd
    }

    /// A complete configuration pointing at `proxmox_url`, with `overrides` applied.
    pub fn config(&self, proxmox_url: &str, overrides: Value) -> Value {
        let mut base = json!({
            "proxmox_url": proxmox_url,
            "username": "root@pam",
            "password": "cli-test-password",
            "node": "pve1",
            "vmid": 9000,
            "template_file": "local:vztmpl/debian-12-standard_12.0-1_amd64.tar.zst",
            "filesystem_storage": "local-lvm",
            "filesystem_size": 8,
            "provision_ip": "10.0.0.50",
            "provision_public_key_file": self.dir.path().join("id.pub"),
            "provision_private_key_file": self.dir.path().join("id"),
            "output_path": self.dir.path().join("out.tar.gz"),
        });
        if let (Some(map), Value::Object(extra)) = (base.as_object_mut(), overrides) {
            for (key, value) in extra {
                if value.is_null() {
                    map.remove(&key);
                } else {
                    map.insert(key, value);
                }
            }
        }
        base
    }

    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }
}

pub fn proxlxc() -> TestContext {
    TestContext {
        dir: tempfile::tempdir().unwrap(),
    }
}
