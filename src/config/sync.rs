//! syncconf: reconcile a device with a parsed configuration
//!
//! Builds the IPC `set` transaction that brings a running device to the
//! state described by a config file. Peers present on the device but
//! missing from the file get `remove=true`; peers present in both are
//! re-applied with `replace_allowed_ips=true` so stale networks do not
//! accumulate.

use crate::config::Config;
use crate::device::Device;

/// The `set` transaction body that synchronizes `device` to `config`
pub fn sync_transaction(device: &Device, config: &Config) -> String {
    let mut out = String::new();

    out.push_str(&format!(
        "private_key={}\n",
        config.interface.private_key.to_hex()
    ));
    if let Some(port) = config.interface.listen_port {
        out.push_str(&format!("listen_port={port}\n"));
    }
    if let Some(mark) = config.interface.fwmark {
        out.push_str(&format!("fwmark={mark}\n"));
    }

    for peer in &config.peers {
        out.push_str(&peer.to_uapi());
    }

    for existing in device.peer_public_keys() {
        let in_config = config.peers.iter().any(|p| p.public_key == existing);
        if !in_config {
            out.push_str(&format!("public_key={}\nremove=true\n", existing.to_hex()));
        }
    }

    out
}

/// Apply `config` to `device`, removing peers the file no longer names
pub fn sync_device(device: &Device, config: &Config) -> std::result::Result<(), i32> {
    let transaction = sync_transaction(device, config);
    device.ipc_set_operation(&transaction)
}
