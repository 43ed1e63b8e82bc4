//! Port sweep: terminate stray forwarders still holding a tunnel's port.
//!
//! This is the safety net for processes orphaned by an earlier supervisor
//! crash, not the primary stop path. It asks the kernel which sockets are
//! bound to the port (`/proc/net/*`), maps socket inodes to PIDs through
//! `/proc/<pid>/fd`, and only touches processes whose executable matches the
//! engine binary. It is still an approximation: an unrelated forwarder that
//! reused the port after cleanup would be hit too.

#[cfg(target_os = "linux")]
use std::collections::HashSet;
use std::time::Duration;

/// How often the sweep re-checks whether a signalled process has exited.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Terminate every `binary_name` process bound to `port`.
///
/// `binary_name` is the file name of the resolved executable, which is what
/// the kernel reports in `/proc/<pid>/{exe,comm}`. SIGTERM first, SIGKILL for
/// anything still alive after `wait`. Returns the PIDs that were signalled.
/// Never fails; problems are logged.
pub async fn sweep_port(port: u16, binary_name: &str, wait: Duration) -> Vec<u32> {
    let name = binary_name.to_string();
    let pids = match tokio::task::spawn_blocking(move || find_forwarders(port, &name)).await {
        Ok(pids) => pids,
        Err(e) => {
            tracing::warn!("port sweep scan for {port} panicked: {e}");
            return Vec::new();
        }
    };

    if pids.is_empty() {
        tracing::debug!("port sweep: no stray {binary_name} on port {port}");
        return pids;
    }

    tracing::warn!("port sweep: terminating stray {binary_name} on port {port}: {pids:?}");
    for &pid in &pids {
        signal(pid, Signal::Term);
    }

    let deadline = tokio::time::Instant::now() + wait;
    let mut remaining: Vec<u32> = pids.clone();
    while !remaining.is_empty() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(EXIT_POLL_INTERVAL).await;
        remaining.retain(|&pid| process_alive(pid));
    }
    for &pid in &remaining {
        tracing::warn!("port sweep: {binary_name} pid {pid} ignored SIGTERM, killing");
        signal(pid, Signal::Kill);
    }

    pids
}

/// PIDs of `binary_name` processes holding a socket bound to `port`.
pub fn find_forwarders(port: u16, binary_name: &str) -> Vec<u32> {
    let own = std::process::id();
    let mut pids: Vec<u32> = pids_bound_to(port)
        .into_iter()
        .filter(|&pid| pid != own && process_matches(pid, binary_name))
        .collect();
    pids.sort_unstable();
    pids
}

/// Socket inodes in a `/proc/net/{tcp,udp}[6]` table whose local port is
/// `port`. With `listen_only`, only sockets in the TCP LISTEN state count.
pub fn parse_proc_net(contents: &str, port: u16, listen_only: bool) -> Vec<u64> {
    const TCP_LISTEN: &str = "0A";

    contents
        .lines()
        .skip(1)
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            let local = fields.get(1)?;
            let state = fields.get(3)?;
            let inode = fields.get(9)?.parse::<u64>().ok()?;

            let (_, port_hex) = local.rsplit_once(':')?;
            let local_port = u16::from_str_radix(port_hex, 16).ok()?;

            let state_ok = !listen_only || state.eq_ignore_ascii_case(TCP_LISTEN);
            (local_port == port && state_ok && inode != 0).then_some(inode)
        })
        .collect()
}

#[cfg(target_os = "linux")]
pub fn pids_bound_to(port: u16) -> Vec<u32> {
    let tables = [
        ("/proc/net/tcp", true),
        ("/proc/net/tcp6", true),
        ("/proc/net/udp", false),
        ("/proc/net/udp6", false),
    ];

    let mut inodes = HashSet::new();
    for (table, listen_only) in tables {
        match std::fs::read_to_string(table) {
            Ok(contents) => inodes.extend(parse_proc_net(&contents, port, listen_only)),
            Err(e) => tracing::trace!("cannot read {table}: {e}"),
        }
    }
    if inodes.is_empty() {
        return Vec::new();
    }

    let Ok(proc_dir) = std::fs::read_dir("/proc") else {
        return Vec::new();
    };

    let mut pids = Vec::new();
    for entry in proc_dir.flatten() {
        let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse::<u32>().ok()) else {
            continue;
        };
        // Processes we may not inspect (other users) are simply skipped.
        let Ok(fds) = std::fs::read_dir(entry.path().join("fd")) else {
            continue;
        };
        let holds_socket = fds.flatten().any(|fd| {
            std::fs::read_link(fd.path())
                .ok()
                .and_then(|target| socket_inode(&target.to_string_lossy()))
                .is_some_and(|inode| inodes.contains(&inode))
        });
        if holds_socket {
            pids.push(pid);
        }
    }
    pids
}

#[cfg(not(target_os = "linux"))]
pub fn pids_bound_to(port: u16) -> Vec<u32> {
    tracing::debug!("port sweep for {port} skipped: socket ownership lookup needs /proc");
    Vec::new()
}

/// `socket:[12345]` → `12345`
fn socket_inode(link: &str) -> Option<u64> {
    link.strip_prefix("socket:[")?.strip_suffix(']')?.parse().ok()
}

#[cfg(target_os = "linux")]
fn process_matches(pid: u32, binary_name: &str) -> bool {
    let base = format!("/proc/{pid}");
    if let Ok(exe) = std::fs::read_link(format!("{base}/exe")) {
        if exe.file_name().is_some_and(|n| n == binary_name) {
            return true;
        }
    }
    // comm is truncated to 15 bytes by the kernel.
    std::fs::read_to_string(format!("{base}/comm"))
        .map(|comm| {
            let comm = comm.trim_end();
            let truncated = binary_name.get(..15).unwrap_or(binary_name);
            comm == binary_name || comm == truncated
        })
        .unwrap_or(false)
}

#[cfg(not(target_os = "linux"))]
fn process_matches(_pid: u32, _binary_name: &str) -> bool {
    false
}

#[derive(Debug, Clone, Copy)]
enum Signal {
    Term,
    Kill,
}

#[cfg(unix)]
fn signal(pid: u32, sig: Signal) {
    let Ok(raw) = libc::pid_t::try_from(pid) else {
        return;
    };
    let signo = match sig {
        Signal::Term => libc::SIGTERM,
        Signal::Kill => libc::SIGKILL,
    };
    // SAFETY: kill(2) has no memory-safety preconditions.
    if unsafe { libc::kill(raw, signo) } == -1 {
        tracing::debug!(
            "kill({pid}, {sig:?}) failed: {}",
            std::io::Error::last_os_error()
        );
    }
}

#[cfg(not(unix))]
fn signal(_pid: u32, _sig: Signal) {}

/// SIGTERM the process group led by `pid`, or just `pid` if it leads none.
#[cfg(unix)]
pub fn terminate_group(pid: u32) {
    let Ok(raw) = libc::pid_t::try_from(pid) else {
        return;
    };
    // SAFETY: kill(2) has no memory-safety preconditions.
    if unsafe { libc::kill(-raw, libc::SIGTERM) } == -1 {
        tracing::debug!(
            "kill(-{pid}, SIGTERM) failed: {}, signalling the process only",
            std::io::Error::last_os_error()
        );
        signal(pid, Signal::Term);
    }
}

#[cfg(not(unix))]
pub fn terminate_group(_pid: u32) {}

/// SIGKILL the process group led by `pid`, so helpers the forwarder forked
/// die with it.
#[cfg(unix)]
pub fn kill_group(pid: u32) {
    let Ok(raw) = libc::pid_t::try_from(pid) else {
        return;
    };
    // SAFETY: kill(2) has no memory-safety preconditions.
    if unsafe { libc::kill(-raw, libc::SIGKILL) } == -1 {
        tracing::debug!(
            "kill(-{pid}, SIGKILL) failed: {}",
            std::io::Error::last_os_error()
        );
    }
}

#[cfg(not(unix))]
pub fn kill_group(_pid: u32) {}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    let Ok(raw) = libc::pid_t::try_from(pid) else {
        return false;
    };
    // SAFETY: signal 0 only performs the existence/permission check.
    unsafe { libc::kill(raw, 0) == 0 }
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    false
}
