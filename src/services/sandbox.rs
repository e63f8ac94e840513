//! Scoped, resource-capped execution of a task future.
//!
//! The sandbox measures CPU time and peak resident memory around the
//! wrapped execution via `getrusage` and reports cap overruns as
//! violations. It never kills the future itself; the executor's abort
//! token and timeout race own hard termination. Peak RSS is process-wide,
//! so the memory figure is an upper bound for the wrapped work.

use nix::sys::resource::{getrusage, Usage, UsageWho};
use std::future::Future;
use std::time::Instant;

use crate::domain::errors::DomainResult;
use crate::domain::models::{ResourceUsage, SandboxConfig};

/// One observed cap overrun.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxViolation {
    pub kind: String,
    pub detail: String,
}

/// What came out of a sandboxed execution.
pub struct SandboxOutcome<T> {
    pub result: DomainResult<T>,
    pub violations: Vec<SandboxViolation>,
    pub usage: ResourceUsage,
}

/// Wraps handler execution with resource accounting.
#[derive(Debug, Clone)]
pub struct Sandbox {
    config: SandboxConfig,
}

impl Sandbox {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    /// Run `fut` and account its resource use against the configured caps.
    pub async fn run<T, F>(&self, label: &str, fut: F) -> SandboxOutcome<T>
    where
        F: Future<Output = DomainResult<T>>,
    {
        let before = snapshot();
        let wall_start = Instant::now();

        let result = fut.await;

        let wall_ms = u64::try_from(wall_start.elapsed().as_millis()).unwrap_or(u64::MAX);
        let after = snapshot();

        let cpu_time_ms = after
            .as_ref()
            .zip(before.as_ref())
            .map(|(a, b)| cpu_ms(a).saturating_sub(cpu_ms(b)))
            .unwrap_or(0);
        let peak_memory_mb = after
            .as_ref()
            .map(|a| max_rss_mb(a))
            .unwrap_or(0.0);

        let mut violations = Vec::new();
        if cpu_time_ms > self.config.max_cpu_ms {
            violations.push(SandboxViolation {
                kind: "cpu_time".into(),
                detail: format!(
                    "used {cpu_time_ms}ms CPU, cap is {}ms",
                    self.config.max_cpu_ms
                ),
            });
        }
        if peak_memory_mb > self.config.max_memory_mb {
            violations.push(SandboxViolation {
                kind: "memory".into(),
                detail: format!(
                    "peak RSS {peak_memory_mb:.1}MB, cap is {:.1}MB",
                    self.config.max_memory_mb
                ),
            });
        }

        if !violations.is_empty() {
            tracing::warn!(
                label,
                violations = violations.len(),
                cpu_time_ms,
                peak_memory_mb,
                "sandboxed execution exceeded resource caps"
            );
        }

        SandboxOutcome {
            result,
            violations,
            usage: ResourceUsage {
                cpu_time_ms,
                peak_memory_mb,
                ..ResourceUsage::default()
            },
        }
    }
}

fn snapshot() -> Option<Usage> {
    getrusage(UsageWho::RUSAGE_SELF).ok()
}

fn cpu_ms(usage: &Usage) -> u64 {
    let user = usage.user_time();
    let system = usage.system_time();
    let micros = (user.tv_sec() + system.tv_sec()) * 1_000_000
        + i64::from(user.tv_usec())
        + i64::from(system.tv_usec());
    u64::try_from(micros / 1_000).unwrap_or(0)
}

fn max_rss_mb(usage: &Usage) -> f64 {
    // ru_maxrss is kilobytes on Linux
    usage.max_rss() as f64 / 1024.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::DomainError;

    fn sandbox(max_cpu_ms: u64, max_memory_mb: f64) -> Sandbox {
        Sandbox::new(SandboxConfig {
            enabled: true,
            max_memory_mb,
            max_cpu_ms,
        })
    }

    #[tokio::test]
    async fn test_passes_through_success() {
        let outcome = sandbox(60_000, 8192.0)
            .run("ok", async { Ok::<_, DomainError>(41 + 1) })
            .await;
        assert_eq!(outcome.result.unwrap(), 42);
        assert!(outcome.violations.is_empty());
    }

    #[tokio::test]
    async fn test_passes_through_error() {
        let outcome = sandbox(60_000, 8192.0)
            .run("fails", async {
                Err::<(), _>(DomainError::Execution("boom".into()))
            })
            .await;
        assert!(matches!(outcome.result, Err(DomainError::Execution(_))));
    }

    #[tokio::test]
    async fn test_memory_cap_violation_reported() {
        // A 0MB cap is always exceeded by a live process
        let outcome = sandbox(60_000, 0.0)
            .run("hungry", async { Ok::<_, DomainError>(()) })
            .await;
        assert!(outcome.result.is_ok(), "violations do not fail the result");
        assert!(outcome.violations.iter().any(|v| v.kind == "memory"));
        assert!(outcome.usage.peak_memory_mb > 0.0);
    }

    #[tokio::test]
    async fn test_cpu_accounting_accumulates() {
        let outcome = sandbox(u64::MAX, f64::MAX)
            .run("spin", async {
                // Burn a little CPU so the delta is observable
                let mut acc: u64 = 0;
                for i in 0..2_000_000u64 {
                    acc = acc.wrapping_mul(31).wrapping_add(i);
                }
                Ok::<_, DomainError>(acc)
            })
            .await;
        assert!(outcome.result.is_ok());
        assert!(outcome.violations.is_empty());
    }
}
