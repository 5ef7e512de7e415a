//! Profiler configuration.
//!
//! The probe the rewritten methods call and the set of methods instrumented from the start are
//! configurable. [`ProfilerConfig::default`] matches the stock managed probe assembly;
//! [`ProfilerConfig::from_env`] overrides it from the process environment, which is the only
//! configuration channel a profiler loaded by the runtime has.
//!
//! | Variable | Meaning |
//! |----------|---------|
//! | `DOTPROBE_PROBE_ASSEMBLY` | Assembly declaring the probe |
//! | `DOTPROBE_PROBE_TYPE` | Namespace-qualified type declaring the probe |
//! | `DOTPROBE_PROBE_METHOD` | Name of the static probe method |
//! | `DOTPROBE_TARGETS` | `Assembly!Type.Method` entries separated by `;` |

use log::warn;

use crate::instrument::InstrumentationTarget;

/// Environment variable naming the probe assembly
pub const ENV_PROBE_ASSEMBLY: &str = "DOTPROBE_PROBE_ASSEMBLY";
/// Environment variable naming the probe type
pub const ENV_PROBE_TYPE: &str = "DOTPROBE_PROBE_TYPE";
/// Environment variable naming the probe method
pub const ENV_PROBE_METHOD: &str = "DOTPROBE_PROBE_METHOD";
/// Environment variable listing the initial instrumentation targets
pub const ENV_TARGETS: &str = "DOTPROBE_TARGETS";

/// The managed method every instrumented method calls on entry.
///
/// It must be a static method with the signature `void (string, object[])`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    /// Simple name of the declaring assembly
    pub assembly: String,
    /// Namespace-qualified declaring type
    pub type_name: String,
    /// Method name
    pub method: String,
}

impl Default for ProbeTarget {
    fn default() -> Self {
        ProbeTarget {
            assembly: "Aikido.Zen.Core".to_string(),
            type_name: "Aikido.Zen.Core.Bridge".to_string(),
            method: "OnMethodEnter".to_string(),
        }
    }
}

/// Configuration of a [`crate::Profiler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfilerConfig {
    /// The probe called by rewritten methods
    pub probe: ProbeTarget,
    /// Base library of .NET Core; a module referencing it marks the process as Core
    pub core_library: String,
    /// Base library of .NET Framework
    pub framework_library: String,
    /// Methods registered during initialization
    pub targets: Vec<InstrumentationTarget>,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        ProfilerConfig {
            probe: ProbeTarget::default(),
            core_library: "System.Runtime".to_string(),
            framework_library: "mscorlib".to_string(),
            targets: Vec::new(),
        }
    }
}

impl ProfilerConfig {
    /// Defaults overridden from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable.
    ///
    /// Empty values are ignored. Malformed target entries are skipped with a warning.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let value = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let mut config = ProfilerConfig::default();
        if let Some(assembly) = value(ENV_PROBE_ASSEMBLY) {
            config.probe.assembly = assembly.trim().to_string();
        }
        if let Some(type_name) = value(ENV_PROBE_TYPE) {
            config.probe.type_name = type_name.trim().to_string();
        }
        if let Some(method) = value(ENV_PROBE_METHOD) {
            config.probe.method = method.trim().to_string();
        }

        if let Some(targets) = value(ENV_TARGETS) {
            for entry in targets.split(';').map(str::trim).filter(|e| !e.is_empty()) {
                match entry.parse::<InstrumentationTarget>() {
                    Ok(target) => config.targets.push(target),
                    Err(error) => warn!("Ignoring instrumentation target '{entry}': {error}"),
                }
            }
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = ProfilerConfig::from_lookup(lookup(&[]));
        assert_eq!(config, ProfilerConfig::default());
        assert_eq!(config.probe.assembly, "Aikido.Zen.Core");
        assert_eq!(config.probe.type_name, "Aikido.Zen.Core.Bridge");
        assert_eq!(config.probe.method, "OnMethodEnter");
        assert_eq!(config.core_library, "System.Runtime");
        assert_eq!(config.framework_library, "mscorlib");
        assert!(config.targets.is_empty());
    }

    #[test]
    fn probe_overrides() {
        let config = ProfilerConfig::from_lookup(lookup(&[
            (ENV_PROBE_ASSEMBLY, "Probes"),
            (ENV_PROBE_TYPE, " Probes.Entry "),
            (ENV_PROBE_METHOD, ""),
        ]));
        assert_eq!(config.probe.assembly, "Probes");
        assert_eq!(config.probe.type_name, "Probes.Entry");
        assert_eq!(config.probe.method, "OnMethodEnter");
    }

    #[test]
    fn targets_skip_malformed_entries() {
        let config = ProfilerConfig::from_lookup(lookup(&[(
            ENV_TARGETS,
            "MyApp.Orders!OrderService.Place; broken ;;MyApp.Billing!Invoice.Send",
        )]));

        assert_eq!(
            config.targets,
            vec![
                InstrumentationTarget::new("MyApp.Orders", "OrderService.Place"),
                InstrumentationTarget::new("MyApp.Billing", "Invoice.Send"),
            ]
        );
    }
}
