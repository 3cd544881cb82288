//! Pre-flight memory advisory

use sysinfo::System;

use crate::config::MemoryRequirements;

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

#[derive(Debug, Clone)]
pub struct ResourceMonitor {
    requirements: MemoryRequirements,
}

impl ResourceMonitor {
    pub fn new(requirements: MemoryRequirements) -> Self {
        Self { requirements }
    }

    pub fn available_gb() -> f64 {
        let mut sys = System::new();
        sys.refresh_memory();
        sys.available_memory() as f64 / BYTES_PER_GB
    }

    /// Warn when available memory is below what `model` needs. Advisory only.
    pub fn check(&self, model: &str) -> bool {
        let required = self.requirements.required_for(model);
        let available = Self::available_gb();
        let sufficient = is_sufficient(available, required);
        if !sufficient {
            tracing::warn!(
                model,
                available_gb = available,
                required_gb = required,
                "Low memory available. Model might not work properly."
            );
        }
        sufficient
    }
}

fn is_sufficient(available_gb: f64, required_gb: f64) -> bool {
    available_gb >= required_gb
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_sufficient() {
        assert!(is_sufficient(8.0, 4.0));
        assert!(is_sufficient(4.0, 4.0));
        assert!(!is_sufficient(3.9, 4.0));
    }

    #[test]
    fn test_zero_requirement_always_passes() {
        let monitor = ResourceMonitor::new(MemoryRequirements {
            default_gb: 0.0,
            ..Default::default()
        });
        assert!(monitor.check("any-model"));
    }
}
