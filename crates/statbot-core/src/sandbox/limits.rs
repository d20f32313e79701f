//! Process-wide resource ceilings.
//!
//! On unix these map to `setrlimit(2)`. The limits are cumulative for the
//! whole process: CPU time spent by one candidate counts against the next.
//! Elsewhere the limiter is a no-op and the runner's wall-clock timeout is
//! the only backstop.

use crate::config::ResourceLimits;

/// Applies [`ResourceLimits`] to the current process.
pub trait ResourceLimiter: Send + Sync {
    /// Applies the ceilings, or describes why it could not.
    fn apply(&self, limits: &ResourceLimits) -> Result<(), String>;

    fn name(&self) -> &'static str;
}

/// `setrlimit`-backed limiter.
#[cfg(unix)]
pub struct UnixRlimits;

#[cfg(unix)]
impl UnixRlimits {
    fn set(resource: RlimitResource, value: u64) -> Result<(), String> {
        let lim = libc::rlimit {
            rlim_cur: value as libc::rlim_t,
            rlim_max: value as libc::rlim_t,
        };
        // SAFETY: rlimit is a plain struct and the pointer is valid for the
        // duration of the call.
        let rc = unsafe { libc::setrlimit(resource, &lim) };
        if rc == 0 {
            Ok(())
        } else {
            Err(std::io::Error::last_os_error().to_string())
        }
    }
}

#[cfg(all(unix, target_os = "linux"))]
type RlimitResource = libc::__rlimit_resource_t;
#[cfg(all(unix, not(target_os = "linux")))]
type RlimitResource = libc::c_int;

#[cfg(unix)]
impl ResourceLimiter for UnixRlimits {
    fn apply(&self, limits: &ResourceLimits) -> Result<(), String> {
        if let Some(mb) = limits.memory_mb {
            Self::set(libc::RLIMIT_AS, mb.saturating_mul(1024 * 1024))
                .map_err(|e| format!("RLIMIT_AS: {}", e))?;
        }
        if let Some(secs) = limits.cpu_secs {
            Self::set(libc::RLIMIT_CPU, secs).map_err(|e| format!("RLIMIT_CPU: {}", e))?;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "setrlimit"
    }
}

/// Limiter for platforms without `setrlimit`.
pub struct NoopLimiter;

impl ResourceLimiter for NoopLimiter {
    fn apply(&self, limits: &ResourceLimits) -> Result<(), String> {
        if !limits.is_unbounded() {
            tracing::warn!("resource ceilings requested but unsupported on this platform");
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "noop"
    }
}

/// The best limiter available on this platform.
pub fn platform_limiter() -> Box<dyn ResourceLimiter> {
    #[cfg(unix)]
    {
        Box::new(UnixRlimits)
    }
    #[cfg(not(unix))]
    {
        Box::new(NoopLimiter)
    }
}
