use sysinfo::{ProcessesToUpdate, System};

/// Resident memory of the current process in bytes, or 0 when unavailable.
pub fn process_memory_bytes() -> u64 {
    let mut system = System::new();
    let Ok(pid) = sysinfo::get_current_pid() else {
        return 0;
    };
    let _ = system.refresh_processes(ProcessesToUpdate::Some(&[pid]), false);
    system.process(pid).map_or(0, sysinfo::Process::memory)
}

/// Bytes to MiB, rounded to four decimals.
#[allow(clippy::cast_precision_loss)]
pub fn bytes_to_mib(bytes: u64) -> f64 {
    let mib = bytes as f64 / (1024.0 * 1024.0);
    (mib * 10_000.0).round() / 10_000.0
}
