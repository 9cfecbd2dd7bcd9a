//! Hypervisor command line.

use crate::instance::{ArtifactPaths, Instance, PortForward};
use std::path::Path;

/// QEMU option values use `,` as a separator; a literal comma is doubled.
fn opt_path(path: &Path) -> String {
    path.display().to_string().replace(',', ",,")
}

/// Arguments for a daemonized hypervisor running `instance`.
pub fn hypervisor_args(instance: &Instance, paths: &ArtifactPaths, enable_kvm: bool) -> Vec<String> {
    let mut args: Vec<String> = Vec::with_capacity(40);
    let mut push = |items: &[&str]| args.extend(items.iter().map(|s| s.to_string()));

    push(&["-name", &instance.id]);
    if enable_kvm {
        push(&["-enable-kvm", "-cpu", "host"]);
    }
    push(&[
        "-m",
        &instance.memory_mb.to_string(),
        "-smp",
        &instance.cpu_count.to_string(),
    ]);
    push(&[
        "-drive",
        &format!("file={},format=qcow2,if=virtio", opt_path(&instance.disk_path)),
        "-drive",
        &format!("file={},format=raw,if=virtio", opt_path(&instance.seed_path)),
        "-boot",
        "order=c",
    ]);
    push(&[
        "-device",
        "virtio-net-pci,netdev=n0",
        "-netdev",
        &format!("user,id=n0,hostfwd=tcp::{}-:22", instance.ssh_port),
    ]);

    if instance.gui_mode {
        push(&["-vga", "virtio", "-display", "gtk,gl=on"]);
    } else {
        // `-nographic` conflicts with `-daemonize`.
        push(&[
            "-display",
            "none",
            "-serial",
            &format!("file:{}", opt_path(&paths.log)),
        ]);
    }

    let mut netdev = 0;
    for entry in &instance.port_forwards {
        let Some(forward) = PortForward::parse_entry(entry) else {
            tracing::warn!(instance = %instance.id, entry = %entry, "skipping malformed port forward");
            continue;
        };
        netdev += 1;
        push(&[
            "-device",
            &format!("virtio-net-pci,netdev=n{netdev}"),
            "-netdev",
            &format!(
                "user,id=n{netdev},hostfwd=tcp::{}-:{}",
                forward.host, forward.guest
            ),
        ]);
    }

    push(&["-daemonize", "-pidfile", &paths.pidfile.display().to_string()]);
    args
}
