//! Initialization metrics.
use std::fmt;

use serde::Serialize;

/// How the adapter ended up configured after Initialize. The numeric values
/// are stable and reported to metrics backends as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u32)]
pub enum InitializationMode {
    UsingInApp = 0,
    ForcingL3 = 1,
    L3NoL1LibraryPath = 2,
    L3L1OpenFailed = 3,
    L3L1LoadFailed = 4,
    L3CouldNotInitializeL1 = 5,
    L3WrongL1Version = 6,
    L1WithKeybox = 7,
    L1WithCertificate = 8,
    L1CertificateMix = 9,
    L3BadKeybox = 10,
    L3CouldNotOpenFactoryKeybox = 11,
    L3CouldNotInstallKeybox = 12,
    L1InstalledKeybox = 13,
    L3InvalidL1 = 14,
    L1WithProvisioning30 = 15,
    L3InitializationFailed = 16,
}

impl InitializationMode {
    /// Whether Level 1 ended up serving the default security level.
    #[must_use]
    pub fn uses_level1(self) -> bool {
        matches!(
            self,
            Self::L1WithKeybox
                | Self::L1WithCertificate
                | Self::L1CertificateMix
                | Self::L1InstalledKeybox
                | Self::L1WithProvisioning30
        )
    }
}

impl fmt::Display for InitializationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({})", self, *self as u32)
    }
}

/// Metrics collected while bringing the adapter up.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AdapterMetrics {
    /// Latest mode recorded. A previous watchdog failure is recorded first
    /// and then overwritten by the final outcome.
    pub mode: Option<InitializationMode>,
    /// Every mode recorded during this Initialize, in order.
    pub history: Vec<InitializationMode>,
    /// API version reported by the Level 1 module, if one was negotiated.
    pub l1_api_version: Option<u32>,
    /// Oldest API version the adapter accepts.
    pub l1_min_api_version: Option<u32>,
    /// Whether the previous process gave up on Level 3 bring-up.
    pub previous_l3_failure: bool,
}

impl AdapterMetrics {
    pub(crate) fn record_mode(&mut self, mode: InitializationMode) {
        debug!("Initialization mode: {}", mode);
        self.mode = Some(mode);
        self.history.push(mode);
    }

    pub(crate) fn record_l1_version(&mut self, version: u32, minimum: u32) {
        self.l1_api_version = Some(version);
        self.l1_min_api_version = Some(minimum);
    }
}
