//! A negotiated OEMCrypto implementation and its capability set.
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::shim::{self, AbiShim};
use crate::symbols::{Operation, OPEN_ENDED, SOFTWARE_SYMBOL_TABLE, SYMBOL_TABLE};
use crate::types::OemCryptoResult;

/// Which implementation backs a session or a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ImplementationKind {
    /// Vendor Level 1 module.
    Hardware,
    /// Built-in Level 3 engine.
    Software,
}

impl fmt::Display for ImplementationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hardware => f.write_str("L1"),
            Self::Software => f.write_str("L3"),
        }
    }
}

/// One implementation bound at a fixed API version.
///
/// The operation set is computed once: an operation is callable when the
/// negotiated version falls in its table range and the engine provides it.
/// The built-in engine also keeps its legacy entry points at any version.
/// Nothing here changes after construction.
pub struct Implementation {
    kind: ImplementationKind,
    version: u32,
    engine: Arc<dyn Engine>,
    operations: HashSet<Operation>,
    shim: &'static dyn AbiShim,
}

impl Implementation {
    /// Bind `engine` at the version it reports.
    pub fn new(kind: ImplementationKind, engine: Arc<dyn Engine>) -> Self {
        let version = engine.api_version();
        Self::with_version(kind, engine, version)
    }

    /// Bind `engine` at an already negotiated version.
    pub fn with_version(kind: ImplementationKind, engine: Arc<dyn Engine>, version: u32) -> Self {
        let mut operations: HashSet<Operation> = SYMBOL_TABLE
            .iter()
            .map(|d| d.operation)
            .filter(|op| op.available_at(version) && engine.provides(*op))
            .collect();
        if kind == ImplementationKind::Software {
            operations.extend(
                SOFTWARE_SYMBOL_TABLE
                    .iter()
                    .map(|&(op, _)| op)
                    .filter(|&op| is_software_legacy(op) && engine.provides(op)),
            );
        }
        Self {
            kind,
            version,
            engine,
            operations,
            shim: shim::shim_for(version),
        }
    }

    #[must_use]
    pub fn kind(&self) -> ImplementationKind {
        self.kind
    }

    /// Negotiated API version.
    #[must_use]
    pub fn version(&self) -> u32 {
        self.version
    }

    #[must_use]
    pub fn supports(&self, operation: Operation) -> bool {
        self.operations.contains(&operation)
    }

    /// Callable operations, sorted.
    #[must_use]
    pub fn operations(&self) -> Vec<Operation> {
        let mut operations: Vec<_> = self.operations.iter().copied().collect();
        operations.sort();
        operations
    }

    /// The engine, if `operation` is callable at the negotiated version.
    pub fn get(&self, operation: Operation) -> Result<&dyn Engine> {
        if self.supports(operation) {
            Ok(self.engine.as_ref())
        } else {
            Err(Error::NotImplemented)
        }
    }

    /// Run `f` against the engine when `operation` is callable, otherwise
    /// report it as not implemented without touching the engine.
    pub fn call(
        &self,
        operation: Operation,
        f: impl FnOnce(&dyn Engine) -> OemCryptoResult,
    ) -> OemCryptoResult {
        match self.get(operation) {
            Ok(engine) => f(engine),
            Err(_) => {
                trace!("{} {} unavailable at v{}", self.kind, operation, self.version);
                OemCryptoResult::ERROR_NOT_IMPLEMENTED
            }
        }
    }

    /// ABI strategy for the negotiated version.
    #[must_use]
    pub fn shim(&self) -> &'static dyn AbiShim {
        self.shim
    }

    /// The engine regardless of version, for bring-up and teardown.
    pub(crate) fn engine(&self) -> &dyn Engine {
        self.engine.as_ref()
    }
}

/// Operations the built-in engine exports under a versioned legacy shape.
/// IsInApp has no Level 1 row and counts as one.
fn is_software_legacy(operation: Operation) -> bool {
    match operation.descriptor() {
        Some(descriptor) => descriptor.max_version != OPEN_ENDED,
        None => true,
    }
}

impl fmt::Debug for Implementation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Implementation")
            .field("kind", &self.kind)
            .field("version", &self.version)
            .field("operations", &self.operations.len())
            .field("shim", &self.shim.generation())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct Counting {
        version: u32,
        calls: AtomicUsize,
    }

    impl Engine for Counting {
        fn api_version(&self) -> u32 {
            self.version
        }

        fn remove_srm(&self) -> OemCryptoResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            OemCryptoResult::SUCCESS
        }

        fn load_test_rsa_key(&self) -> OemCryptoResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            OemCryptoResult::SUCCESS
        }
    }

    fn counting(version: u32) -> Arc<Counting> {
        Arc::new(Counting {
            version,
            calls: AtomicUsize::new(0),
        })
    }

    #[test]
    fn operations_follow_the_table_at_every_version() {
        for version in 8..=14 {
            let engine = counting(version);
            let implementation = Implementation::new(ImplementationKind::Hardware, engine);
            for descriptor in SYMBOL_TABLE {
                assert_eq!(
                    implementation.supports(descriptor.operation),
                    descriptor.covers(version),
                    "{} at v{}",
                    descriptor.symbol,
                    version
                );
            }
        }
    }

    #[test]
    fn gated_operations_never_reach_the_engine() {
        let engine = counting(12);
        let implementation = Implementation::new(ImplementationKind::Hardware, engine.clone());

        let status = implementation.call(Operation::RemoveSrm, |e| e.remove_srm());
        assert_eq!(status, OemCryptoResult::ERROR_NOT_IMPLEMENTED);
        assert_eq!(engine.calls.load(Ordering::SeqCst), 0);

        let status = implementation.call(Operation::LoadTestRsaKey, |e| e.load_test_rsa_key());
        assert!(status.is_success());
        assert_eq!(engine.calls.load(Ordering::SeqCst), 1);
    }

    struct LegacySoftware;

    impl Engine for LegacySoftware {
        fn api_version(&self) -> u32 {
            14
        }

        fn provides(&self, operation: Operation) -> bool {
            matches!(
                operation,
                Operation::LoadTestKeyboxV13 | Operation::SelectKeyV13 | Operation::IsInApp
            )
        }
    }

    #[test]
    fn software_keeps_legacy_entry_points_past_their_range() {
        let software = Implementation::new(ImplementationKind::Software, Arc::new(LegacySoftware));
        assert!(software.supports(Operation::LoadTestKeyboxV13));
        assert!(software.supports(Operation::SelectKeyV13));
        assert!(software.supports(Operation::IsInApp));
        assert!(!software.supports(Operation::LoadKeysV13));
        assert!(!software.supports(Operation::LoadTestKeybox));

        let hardware = Implementation::new(ImplementationKind::Hardware, Arc::new(LegacySoftware));
        assert!(!hardware.supports(Operation::LoadTestKeyboxV13));
        assert!(!hardware.supports(Operation::IsInApp));
    }

    #[test]
    fn newer_modules_use_the_latest_table() {
        let implementation = Implementation::new(ImplementationKind::Hardware, counting(16));
        assert!(implementation.supports(Operation::LoadKeys));
        assert!(!implementation.supports(Operation::LoadKeysV13));
        assert_eq!(implementation.shim().generation(), "v14");
        assert!(matches!(
            implementation.get(Operation::IsInApp),
            Err(Error::NotImplemented)
        ));
    }
}
