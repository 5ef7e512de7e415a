//! The set of methods registered for instrumentation.

use std::{
    collections::{HashMap, HashSet},
    fmt,
    str::FromStr,
    sync::Mutex,
};

use crate::{instrument::MethodDescriptor, Error, Result};

/// An instrumentation target: assembly name plus `Type.Method`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstrumentationTarget {
    /// Simple name of the assembly declaring the method
    pub assembly: String,
    /// Namespace-qualified type name and method name, joined by `.`
    pub method: String,
}

impl InstrumentationTarget {
    /// Target for `method` (`Type.Method`) in `assembly`.
    pub fn new(assembly: impl Into<String>, method: impl Into<String>) -> Self {
        InstrumentationTarget {
            assembly: assembly.into(),
            method: method.into(),
        }
    }
}

impl FromStr for InstrumentationTarget {
    type Err = Error;

    /// Parse `Assembly!Type.Method`.
    fn from_str(s: &str) -> Result<Self> {
        let Some((assembly, method)) = s.split_once('!') else {
            return Err(Error::InvalidArgument(format!(
                "expected 'Assembly!Type.Method', got '{s}'"
            )));
        };

        let (assembly, method) = (assembly.trim(), method.trim());
        if assembly.is_empty() || method.is_empty() {
            return Err(Error::InvalidArgument(format!(
                "empty assembly or method in '{s}'"
            )));
        }

        Ok(InstrumentationTarget::new(assembly, method))
    }
}

impl fmt::Display for InstrumentationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}!{}", self.assembly, self.method)
    }
}

/// Thread-safe map from assembly name to the `Type.Method` names registered in it.
///
/// Matching is exact. An assembly never stays in the map with an empty method set. Lookups run
/// on the runtime's compilation threads, so the lock is only held for the map operation itself.
#[derive(Debug, Default)]
pub struct InstrumentationRegistry {
    targets: Mutex<HashMap<String, HashSet<String>>>,
}

impl InstrumentationRegistry {
    /// Empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `method` of `assembly`. Returns `false` if it was already registered.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for empty names, or
    /// [`crate::Error::LockError`] if the registry lock is poisoned.
    pub fn add(&self, assembly: &str, method: &str) -> Result<bool> {
        if assembly.is_empty() || method.is_empty() {
            return Err(Error::InvalidArgument(
                "assembly and method names must not be empty".to_string(),
            ));
        }

        let mut targets = lock!(self.targets)?;
        Ok(targets
            .entry(assembly.to_string())
            .or_default()
            .insert(method.to_string()))
    }

    /// Unregister `method` of `assembly`. Returns `false` if it was not registered.
    ///
    /// # Errors
    /// Returns [`crate::Error::LockError`] if the registry lock is poisoned.
    pub fn remove(&self, assembly: &str, method: &str) -> Result<bool> {
        let mut targets = lock!(self.targets)?;
        let Some(methods) = targets.get_mut(assembly) else {
            return Ok(false);
        };

        let removed = methods.remove(method);
        if methods.is_empty() {
            targets.remove(assembly);
        }
        Ok(removed)
    }

    /// Returns `true` if `method` of `assembly` is registered.
    ///
    /// A poisoned lock answers `false`.
    #[must_use]
    pub fn contains(&self, assembly: &str, method: &str) -> bool {
        match self.targets.lock() {
            Ok(targets) => targets
                .get(assembly)
                .is_some_and(|methods| methods.contains(method)),
            Err(_) => false,
        }
    }

    /// Returns `true` if the described method is registered.
    #[must_use]
    pub fn is_eligible(&self, descriptor: &MethodDescriptor<'_>) -> bool {
        self.contains(&descriptor.assembly_name, &descriptor.qualified_name())
    }

    /// Number of registered methods across all assemblies
    #[must_use]
    pub fn len(&self) -> usize {
        self.targets
            .lock()
            .map(|targets| targets.values().map(HashSet::len).sum())
            .unwrap_or(0)
    }

    /// Returns `true` if nothing is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All registered targets, sorted.
    ///
    /// # Errors
    /// Returns [`crate::Error::LockError`] if the registry lock is poisoned.
    pub fn snapshot(&self) -> Result<Vec<InstrumentationTarget>> {
        let targets = lock!(self.targets)?;
        let mut snapshot: Vec<InstrumentationTarget> = targets
            .iter()
            .flat_map(|(assembly, methods)| {
                methods
                    .iter()
                    .map(move |method| InstrumentationTarget::new(assembly.as_str(), method.as_str()))
            })
            .collect();
        snapshot.sort();
        Ok(snapshot)
    }

    #[cfg(test)]
    pub(crate) fn assembly_count(&self) -> usize {
        self.targets.lock().map(|t| t.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn add_and_contains() {
        let registry = InstrumentationRegistry::new();
        assert!(registry.is_empty());

        assert!(registry.add("MyApp.Orders", "OrderService.Place").unwrap());
        assert!(!registry.add("MyApp.Orders", "OrderService.Place").unwrap());

        assert!(registry.contains("MyApp.Orders", "OrderService.Place"));
        assert!(!registry.contains("MyApp.Orders", "OrderService.Cancel"));
        assert!(!registry.contains("MyApp.Billing", "OrderService.Place"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn matching_is_exact() {
        let registry = InstrumentationRegistry::new();
        registry.add("MyApp.Orders", "OrderService.Place").unwrap();

        assert!(!registry.contains("MyApp.Orders", "OrderService.Pla"));
        assert!(!registry.contains("MyApp.Orders", "orderservice.place"));
        assert!(!registry.contains("MyApp", "OrderService.Place"));
    }

    #[test]
    fn remove_drops_empty_assemblies() {
        let registry = InstrumentationRegistry::new();
        registry.add("MyApp.Orders", "OrderService.Place").unwrap();
        registry.add("MyApp.Orders", "OrderService.Cancel").unwrap();

        assert!(registry.remove("MyApp.Orders", "OrderService.Place").unwrap());
        assert_eq!(registry.assembly_count(), 1);

        assert!(registry.remove("MyApp.Orders", "OrderService.Cancel").unwrap());
        assert_eq!(registry.assembly_count(), 0);
        assert!(registry.is_empty());

        assert!(!registry.remove("MyApp.Orders", "OrderService.Cancel").unwrap());
        assert!(!registry.remove("Unknown", "Type.Method").unwrap());

        // a fresh set for the assembly does not bring back removed methods
        registry.add("MyApp.Orders", "X.Y").unwrap();
        assert!(registry.contains("MyApp.Orders", "X.Y"));
        assert!(!registry.contains("MyApp.Orders", "OrderService.Cancel"));
        assert!(!registry.contains("MyApp.Orders", "OrderService.Place"));
    }

    #[test]
    fn rejects_empty_names() {
        let registry = InstrumentationRegistry::new();
        assert!(matches!(
            registry.add("", "Type.Method"),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            registry.add("Assembly", ""),
            Err(Error::InvalidArgument(_))
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn snapshot_is_sorted() {
        let registry = InstrumentationRegistry::new();
        registry.add("B", "T.M").unwrap();
        registry.add("A", "T.N").unwrap();
        registry.add("A", "T.M").unwrap();

        let snapshot = registry.snapshot().unwrap();
        assert_eq!(
            snapshot
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>(),
            vec!["A!T.M", "A!T.N", "B!T.M"]
        );
    }

    #[test]
    fn concurrent_registration() {
        let registry = Arc::new(InstrumentationRegistry::new());

        std::thread::scope(|scope| {
            for thread in 0..8 {
                let registry = Arc::clone(&registry);
                scope.spawn(move || {
                    for method in 0..50 {
                        let name = format!("Type{thread}.Method{method}");
                        registry.add("Concurrent", &name).unwrap();
                        assert!(registry.contains("Concurrent", &name));
                        if method % 2 == 0 {
                            registry.remove("Concurrent", &name).unwrap();
                        }
                    }
                });
            }
        });

        assert_eq!(registry.len(), 8 * 25);
    }

    #[test]
    fn target_parsing() {
        let target: InstrumentationTarget = "MyApp.Orders!OrderService.Place".parse().unwrap();
        assert_eq!(target.assembly, "MyApp.Orders");
        assert_eq!(target.method, "OrderService.Place");
        assert_eq!(target.to_string(), "MyApp.Orders!OrderService.Place");

        assert!("NoSeparator".parse::<InstrumentationTarget>().is_err());
        assert!("!Type.Method".parse::<InstrumentationTarget>().is_err());
        assert!("Assembly! ".parse::<InstrumentationTarget>().is_err());
    }
}
