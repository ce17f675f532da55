//! Debugger detection used to pick the orchestration wait deadline.

/// Whether a debugger is attached to this process.
///
/// On Linux this reads the tracer pid from `/proc/self/status`; elsewhere
/// it always reports `false`.
#[must_use]
pub fn is_attached() -> bool {
    #[cfg(target_os = "linux")]
    {
        std::fs::read_to_string("/proc/self/status")
            .map(|status| tracer_pid(&status).is_some_and(|pid| pid != 0))
            .unwrap_or(false)
    }
    #[cfg(not(target_os = "linux"))]
    {
        false
    }
}

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn tracer_pid(status: &str) -> Option<u32> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("TracerPid:"))
        .and_then(|pid| pid.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tracer_pid() {
        let status = "Name:\tcargo\nState:\tR (running)\nTracerPid:\t4242\nUid:\t0\n";
        assert_eq!(tracer_pid(status), Some(4242));
        assert_eq!(tracer_pid("TracerPid:\t0"), Some(0));
        assert_eq!(tracer_pid("Name:\tcargo"), None);
    }
}
