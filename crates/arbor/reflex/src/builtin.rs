//! Built-in reflex sets: shell, file, and network.
//!
//! These cover the classically destructive operations an autonomous agent
//! can reach for. They register under `builtin.*` keys and coexist with
//! caller-registered reflexes under the same uniqueness rules.

use crate::{Reflex, ReflexError, ReflexRegistry, ReflexResponse, ReflexTrigger, RegisterOptions};

/// Install every built-in set into a registry.
pub fn install(registry: &ReflexRegistry) -> Result<(), ReflexError> {
    for (key, reflex) in shell_reflexes()
        .into_iter()
        .chain(file_reflexes())
        .chain(network_reflexes())
    {
        registry.register(key, reflex, RegisterOptions::default())?;
    }
    Ok(())
}

/// Destructive or runaway shell invocations.
pub fn shell_reflexes() -> Vec<(String, Reflex)> {
    vec![
        (
            "builtin.shell.rm_rf_root".to_string(),
            Reflex::new(
                "rm-rf-root",
                ReflexTrigger::Pattern(r"rm\s+(-[a-zA-Z]*r[a-zA-Z]*f|-[a-zA-Z]*f[a-zA-Z]*r)\s+(/|~|\$HOME)(\s|$)".to_string()),
                ReflexResponse::Block,
                100,
                "recursive force-delete of a filesystem root",
            ),
        ),
        (
            "builtin.shell.fork_bomb".to_string(),
            Reflex::new(
                "fork-bomb",
                ReflexTrigger::Pattern(r":\(\)\s*\{\s*:\|:&\s*\}\s*;?\s*:".to_string()),
                ReflexResponse::Block,
                100,
                "shell fork bomb",
            ),
        ),
        (
            "builtin.shell.disk_overwrite".to_string(),
            Reflex::new(
                "disk-overwrite",
                ReflexTrigger::Pattern(r"dd\s+.*of=/dev/(sd[a-z]|nvme\d+n\d+)(\s|$)".to_string()),
                ReflexResponse::Block,
                95,
                "raw write to a block device",
            ),
        ),
        (
            "builtin.shell.sudo".to_string(),
            Reflex::new(
                "sudo-escalation",
                ReflexTrigger::Pattern(r"(^|\s)sudo\s".to_string()),
                ReflexResponse::Warn,
                60,
                "privilege escalation via sudo",
            ),
        ),
    ]
}

/// Writes to security-sensitive filesystem locations.
pub fn file_reflexes() -> Vec<(String, Reflex)> {
    vec![
        (
            "builtin.file.etc".to_string(),
            Reflex::new(
                "system-config-write",
                ReflexTrigger::Path("/etc/".to_string()),
                ReflexResponse::Warn,
                70,
                "touches system configuration under /etc",
            ),
        ),
        (
            "builtin.file.ssh_keys".to_string(),
            Reflex::new(
                "ssh-key-access",
                ReflexTrigger::Path("/.ssh/".to_string()),
                ReflexResponse::Block,
                90,
                "touches SSH key material",
            ),
        ),
        (
            "builtin.file.shadow".to_string(),
            Reflex::new(
                "password-database",
                ReflexTrigger::Path("/etc/shadow".to_string()),
                ReflexResponse::Block,
                95,
                "touches the system password database",
            ),
        ),
        (
            "builtin.file.tmp_exec".to_string(),
            Reflex::new(
                "tmp-execution",
                ReflexTrigger::Pattern(r"(^|\s)(sh|bash|\./[^ ]+)\s+/tmp/".to_string()),
                ReflexResponse::Log,
                40,
                "executes a file from /tmp",
            ),
        ),
    ]
}

/// Network operations that commonly smuggle code or data.
pub fn network_reflexes() -> Vec<(String, Reflex)> {
    vec![
        (
            "builtin.net.curl_pipe_shell".to_string(),
            Reflex::new(
                "curl-pipe-shell",
                ReflexTrigger::Pattern(r"(curl|wget)\s+[^|]*\|\s*(sudo\s+)?(ba)?sh".to_string()),
                ReflexResponse::Block,
                90,
                "pipes a remote download straight into a shell",
            ),
        ),
        (
            "builtin.net.raw_listener".to_string(),
            Reflex::new(
                "raw-listener",
                ReflexTrigger::Pattern(r"nc\s+(-[a-zA-Z]*l[a-zA-Z]*)\s".to_string()),
                ReflexResponse::Warn,
                60,
                "opens a raw network listener",
            ),
        ),
        (
            "builtin.net.outbound_fetch".to_string(),
            Reflex::new(
                "outbound-fetch",
                ReflexTrigger::Pattern(r"(^|\s)(curl|wget)\s+https?://".to_string()),
                ReflexResponse::Log,
                30,
                "outbound network fetch",
            ),
        ),
    ]
}
