//! Symbol resolution for native OEMCrypto modules.
//!
//! Every entry point is described once in [`SYMBOL_TABLE`] with the range of
//! API versions that export it. [`resolve`] negotiates the module's version
//! and then walks the table, producing a capability map for that version.
use std::collections::HashMap;
use std::ffi::{c_void, CStr, CString};
use std::fmt;
use std::path::Path;

use crate::error::{Error, Result};
use crate::ffi;
use crate::metrics::InitializationMode;
use crate::types::OemCryptoResult;

/// Oldest ABI revision the adapter can drive.
pub const MIN_API_VERSION: u32 = 8;
/// Newest ABI revision the adapter knows about.
pub const MAX_API_VERSION: u32 = 14;

/// Every entry point the adapter can call, including legacy shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Operation {
    Initialize,
    Terminate,
    ApiVersion,
    IsInApp,
    CloseSession,
    CopyBuffer,
    CopyOldUsageEntry,
    CreateNewUsageEntry,
    CreateOldUsageEntry,
    CreateUsageTableHeader,
    DeactivateUsageEntryV12,
    DeactivateUsageEntry,
    DecryptCtrV10,
    DecryptCenc,
    DeleteOldUsageTable,
    DeleteUsageEntry,
    DeriveKeysFromSessionKey,
    ForceDeleteUsageEntry,
    GenerateDerivedKeys,
    GenerateNonce,
    GenerateRsaSignatureV8,
    GenerateRsaSignature,
    GenerateSignature,
    GenericDecrypt,
    GenericEncrypt,
    GenericSign,
    GenericVerify,
    GetCurrentSrmVersion,
    GetDeviceId,
    GetHdcpCapabilityV9,
    GetHdcpCapability,
    GetAnalogOutputFlags,
    GetKeyData,
    GetMaxNumberOfSessions,
    GetNumberOfOpenSessions,
    GetOemPublicCertificate,
    GetProvisioningMethod,
    GetRandom,
    InstallKeybox,
    IsAntiRollbackHwPresent,
    IsKeyboxValid,
    IsSrmUpdateSupported,
    LoadDeviceRsaKey,
    LoadKeysV8,
    LoadKeysV9OrV10,
    LoadKeysV11OrV12,
    LoadKeysV13,
    LoadKeys,
    LoadEntitledContentKeys,
    LoadSrm,
    LoadTestKeyboxV13,
    LoadTestKeybox,
    LoadTestRsaKey,
    LoadUsageEntry,
    LoadUsageTableHeader,
    MoveEntry,
    OpenSession,
    QueryKeyControl,
    RefreshKeys,
    RemoveSrm,
    ReportUsage,
    RewrapDeviceRsaKey,
    RewrapDeviceRsaKey30,
    SecurityLevel,
    SecurityPatchLevel,
    SelectKeyV13,
    SelectKey,
    ShrinkUsageTableHeader,
    SupportedCertificates,
    SupportsUsageTable,
    UpdateUsageEntry,
    UpdateUsageTable,
    WrapKeybox,
}

impl Operation {
    /// Descriptor of this operation in the Level 1 table, if it has one.
    #[must_use]
    pub fn descriptor(self) -> Option<&'static SymbolDescriptor> {
        SYMBOL_TABLE.iter().find(|d| d.operation == self)
    }

    /// Whether a module negotiated at `version` exports this operation.
    #[must_use]
    pub fn available_at(self, version: u32) -> bool {
        self.descriptor().is_some_and(|d| d.covers(version))
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.descriptor() {
            Some(d) => f.write_str(d.symbol),
            None => write!(f, "{self:?}"),
        }
    }
}

/// One row of the symbol table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolDescriptor {
    pub operation: Operation,
    pub min_version: u32,
    /// Inclusive; [`OPEN_ENDED`] for entry points still current.
    pub max_version: u32,
    pub symbol: &'static str,
}

/// Marker for descriptors that have no upper version bound.
pub const OPEN_ENDED: u32 = u32::MAX;

impl SymbolDescriptor {
    const fn new(operation: Operation, min_version: u32, max_version: u32, symbol: &'static str) -> Self {
        Self {
            operation,
            min_version,
            max_version,
            symbol,
        }
    }

    const fn since(operation: Operation, min_version: u32, symbol: &'static str) -> Self {
        Self::new(operation, min_version, OPEN_ENDED, symbol)
    }

    /// Versions newer than [`MAX_API_VERSION`] are treated as the newest
    /// known revision.
    #[must_use]
    pub fn covers(&self, version: u32) -> bool {
        let version = version.min(MAX_API_VERSION);
        version >= self.min_version && version <= self.max_version
    }
}

use Operation as Op;

/// Entry points the adapter needs before it knows the module's version.
pub const BOOTSTRAP_SYMBOLS: [Operation; 3] = [Op::Initialize, Op::ApiVersion, Op::Terminate];

/// Level 1 entry points and the API versions that export them.
pub static SYMBOL_TABLE: &[SymbolDescriptor] = &[
    SymbolDescriptor::since(Op::Initialize, 8, "OEMCrypto_Initialize"),
    SymbolDescriptor::since(Op::ApiVersion, 8, "OEMCrypto_APIVersion"),
    SymbolDescriptor::since(Op::Terminate, 8, "OEMCrypto_Terminate"),
    SymbolDescriptor::since(Op::CloseSession, 8, "OEMCrypto_CloseSession"),
    SymbolDescriptor::since(Op::CopyBuffer, 10, "OEMCrypto_CopyBuffer"),
    SymbolDescriptor::since(Op::CopyOldUsageEntry, 13, "OEMCrypto_CopyOldUsageEntry"),
    SymbolDescriptor::since(Op::CreateNewUsageEntry, 13, "OEMCrypto_CreateNewUsageEntry"),
    SymbolDescriptor::since(Op::CreateOldUsageEntry, 13, "OEMCrypto_CreateOldUsageEntry"),
    SymbolDescriptor::since(Op::CreateUsageTableHeader, 13, "OEMCrypto_CreateUsageTableHeader"),
    SymbolDescriptor::new(Op::DeactivateUsageEntryV12, 9, 12, "OEMCrypto_DeactivateUsageEntry_V12"),
    SymbolDescriptor::since(Op::DeactivateUsageEntry, 13, "OEMCrypto_DeactivateUsageEntry"),
    SymbolDescriptor::new(Op::DecryptCtrV10, 8, 10, "OEMCrypto_DecryptCTR_V10"),
    SymbolDescriptor::since(Op::DecryptCenc, 11, "OEMCrypto_DecryptCENC"),
    SymbolDescriptor::since(Op::DeleteOldUsageTable, 9, "OEMCrypto_DeleteOldUsageTable"),
    SymbolDescriptor::new(Op::DeleteUsageEntry, 9, 12, "OEMCrypto_DeleteUsageEntry"),
    SymbolDescriptor::since(Op::DeriveKeysFromSessionKey, 8, "OEMCrypto_DeriveKeysFromSessionKey"),
    SymbolDescriptor::new(Op::ForceDeleteUsageEntry, 10, 12, "OEMCrypto_ForceDeleteUsageEntry"),
    SymbolDescriptor::since(Op::GenerateDerivedKeys, 8, "OEMCrypto_GenerateDerivedKeys"),
    SymbolDescriptor::since(Op::GenerateNonce, 8, "OEMCrypto_GenerateNonce"),
    SymbolDescriptor::new(Op::GenerateRsaSignatureV8, 8, 8, "OEMCrypto_GenerateRSASignature_V8"),
    SymbolDescriptor::since(Op::GenerateRsaSignature, 9, "OEMCrypto_GenerateRSASignature"),
    SymbolDescriptor::since(Op::GenerateSignature, 8, "OEMCrypto_GenerateSignature"),
    SymbolDescriptor::since(Op::GenericDecrypt, 8, "OEMCrypto_Generic_Decrypt"),
    SymbolDescriptor::since(Op::GenericEncrypt, 8, "OEMCrypto_Generic_Encrypt"),
    SymbolDescriptor::since(Op::GenericSign, 8, "OEMCrypto_Generic_Sign"),
    SymbolDescriptor::since(Op::GenericVerify, 8, "OEMCrypto_Generic_Verify"),
    SymbolDescriptor::since(Op::GetCurrentSrmVersion, 13, "OEMCrypto_GetCurrentSRMVersion"),
    SymbolDescriptor::since(Op::GetDeviceId, 8, "OEMCrypto_GetDeviceID"),
    SymbolDescriptor::new(Op::GetHdcpCapabilityV9, 9, 9, "OEMCrypto_GetHDCPCapability_V9"),
    SymbolDescriptor::since(Op::GetHdcpCapability, 10, "OEMCrypto_GetHDCPCapability"),
    SymbolDescriptor::since(Op::GetAnalogOutputFlags, 14, "OEMCrypto_GetAnalogOutputFlags"),
    SymbolDescriptor::since(Op::GetKeyData, 8, "OEMCrypto_GetKeyData"),
    SymbolDescriptor::since(Op::GetMaxNumberOfSessions, 10, "OEMCrypto_GetMaxNumberOfSessions"),
    SymbolDescriptor::since(Op::GetNumberOfOpenSessions, 10, "OEMCrypto_GetNumberOfOpenSessions"),
    SymbolDescriptor::since(Op::GetOemPublicCertificate, 12, "OEMCrypto_GetOEMPublicCertificate"),
    SymbolDescriptor::since(Op::GetProvisioningMethod, 12, "OEMCrypto_GetProvisioningMethod"),
    SymbolDescriptor::since(Op::GetRandom, 8, "OEMCrypto_GetRandom"),
    SymbolDescriptor::since(Op::InstallKeybox, 8, "OEMCrypto_InstallKeybox"),
    SymbolDescriptor::since(Op::IsAntiRollbackHwPresent, 10, "OEMCrypto_IsAntiRollbackHwPresent"),
    SymbolDescriptor::since(Op::IsKeyboxValid, 8, "OEMCrypto_IsKeyboxValid"),
    SymbolDescriptor::since(Op::IsSrmUpdateSupported, 13, "OEMCrypto_IsSRMUpdateSupported"),
    SymbolDescriptor::since(Op::LoadDeviceRsaKey, 8, "OEMCrypto_LoadDeviceRSAKey"),
    SymbolDescriptor::new(Op::LoadKeysV8, 8, 8, "OEMCrypto_LoadKeys_V8"),
    SymbolDescriptor::new(Op::LoadKeysV9OrV10, 9, 10, "OEMCrypto_LoadKeys_V9_or_V10"),
    SymbolDescriptor::new(Op::LoadKeysV11OrV12, 11, 12, "OEMCrypto_LoadKeys_V11_or_V12"),
    SymbolDescriptor::new(Op::LoadKeysV13, 13, 13, "OEMCrypto_LoadKeys_V13"),
    SymbolDescriptor::since(Op::LoadKeys, 14, "OEMCrypto_LoadKeys"),
    SymbolDescriptor::since(Op::LoadEntitledContentKeys, 14, "OEMCrypto_LoadEntitledContentKeys"),
    SymbolDescriptor::since(Op::LoadSrm, 13, "OEMCrypto_LoadSRM"),
    SymbolDescriptor::new(Op::LoadTestKeyboxV13, 10, 13, "OEMCrypto_LoadTestKeybox_V13"),
    SymbolDescriptor::since(Op::LoadTestKeybox, 14, "OEMCrypto_LoadTestKeybox"),
    SymbolDescriptor::since(Op::LoadTestRsaKey, 10, "OEMCrypto_LoadTestRSAKey"),
    SymbolDescriptor::since(Op::LoadUsageEntry, 13, "OEMCrypto_LoadUsageEntry"),
    SymbolDescriptor::since(Op::LoadUsageTableHeader, 13, "OEMCrypto_LoadUsageTableHeader"),
    SymbolDescriptor::since(Op::MoveEntry, 13, "OEMCrypto_MoveEntry"),
    SymbolDescriptor::since(Op::OpenSession, 8, "OEMCrypto_OpenSession"),
    SymbolDescriptor::since(Op::QueryKeyControl, 10, "OEMCrypto_QueryKeyControl"),
    SymbolDescriptor::since(Op::RefreshKeys, 8, "OEMCrypto_RefreshKeys"),
    SymbolDescriptor::since(Op::RemoveSrm, 13, "OEMCrypto_RemoveSRM"),
    SymbolDescriptor::since(Op::ReportUsage, 9, "OEMCrypto_ReportUsage"),
    SymbolDescriptor::since(Op::RewrapDeviceRsaKey, 8, "OEMCrypto_RewrapDeviceRSAKey"),
    SymbolDescriptor::since(Op::RewrapDeviceRsaKey30, 12, "OEMCrypto_RewrapDeviceRSAKey30"),
    SymbolDescriptor::since(Op::SecurityLevel, 8, "OEMCrypto_SecurityLevel"),
    SymbolDescriptor::since(Op::SecurityPatchLevel, 11, "OEMCrypto_Security_Patch_Level"),
    SymbolDescriptor::new(Op::SelectKeyV13, 8, 13, "OEMCrypto_SelectKey_V13"),
    SymbolDescriptor::since(Op::SelectKey, 14, "OEMCrypto_SelectKey"),
    SymbolDescriptor::since(Op::ShrinkUsageTableHeader, 13, "OEMCrypto_ShrinkUsageTableHeader"),
    SymbolDescriptor::since(Op::SupportedCertificates, 13, "OEMCrypto_SupportedCertificates"),
    SymbolDescriptor::since(Op::SupportsUsageTable, 9, "OEMCrypto_SupportsUsageTable"),
    SymbolDescriptor::since(Op::UpdateUsageEntry, 13, "OEMCrypto_UpdateUsageEntry"),
    SymbolDescriptor::new(Op::UpdateUsageTable, 9, 12, "OEMCrypto_UpdateUsageTable"),
    SymbolDescriptor::since(Op::WrapKeybox, 8, "OEMCrypto_WrapKeybox"),
];

/// Statically linked Level 3 entry points. The built-in engine exports a
/// fixed set under obfuscated names, some of them older shapes.
pub static SOFTWARE_SYMBOL_TABLE: &[(Operation, &str)] = &[
    (Op::IsInApp, "_lcc00"),
    (Op::Initialize, "_lcc01"),
    (Op::Terminate, "_lcc02"),
    (Op::InstallKeybox, "_lcc03"),
    (Op::GetKeyData, "_lcc04"),
    (Op::IsKeyboxValid, "_lcc05"),
    (Op::GetRandom, "_lcc06"),
    (Op::GetDeviceId, "_lcc07"),
    (Op::WrapKeybox, "_lcc08"),
    (Op::OpenSession, "_lcc09"),
    (Op::CloseSession, "_lcc10"),
    (Op::DecryptCenc, "_lcc11"),
    (Op::GenerateDerivedKeys, "_lcc12"),
    (Op::GenerateSignature, "_lcc13"),
    (Op::GenerateNonce, "_lcc14"),
    (Op::RefreshKeys, "_lcc16"),
    (Op::SelectKeyV13, "_lcc17"),
    (Op::RewrapDeviceRsaKey, "_lcc18"),
    (Op::LoadDeviceRsaKey, "_lcc19"),
    (Op::GenerateRsaSignature, "_lcc20"),
    (Op::DeriveKeysFromSessionKey, "_lcc21"),
    (Op::ApiVersion, "_lcc22"),
    (Op::SecurityLevel, "_lcc23"),
    (Op::GenericEncrypt, "_lcc24"),
    (Op::GenericDecrypt, "_lcc25"),
    (Op::GenericSign, "_lcc26"),
    (Op::GenericVerify, "_lcc27"),
    (Op::GetHdcpCapability, "_lcc28"),
    (Op::SupportsUsageTable, "_lcc29"),
    (Op::DeactivateUsageEntry, "_lcc31"),
    (Op::ReportUsage, "_lcc32"),
    (Op::DeleteOldUsageTable, "_lcc34"),
    (Op::GetMaxNumberOfSessions, "_lcc37"),
    (Op::GetNumberOfOpenSessions, "_lcc38"),
    (Op::IsAntiRollbackHwPresent, "_lcc39"),
    (Op::CopyBuffer, "_lcc40"),
    (Op::QueryKeyControl, "_lcc41"),
    (Op::LoadTestKeyboxV13, "_lcc42"),
    (Op::LoadTestRsaKey, "_lcc45"),
    (Op::SecurityPatchLevel, "_lcc46"),
    (Op::GetProvisioningMethod, "_lcc49"),
    (Op::GetOemPublicCertificate, "_lcc50"),
    (Op::RewrapDeviceRsaKey30, "_lcc51"),
    (Op::SupportedCertificates, "_lcc52"),
    (Op::IsSrmUpdateSupported, "_lcc53"),
    (Op::GetCurrentSrmVersion, "_lcc54"),
    (Op::LoadSrm, "_lcc55"),
    (Op::LoadKeysV13, "_lcc56"),
    (Op::RemoveSrm, "_lcc57"),
    (Op::CreateUsageTableHeader, "_lcc61"),
    (Op::LoadUsageTableHeader, "_lcc62"),
    (Op::CreateNewUsageEntry, "_lcc63"),
    (Op::LoadUsageEntry, "_lcc64"),
    (Op::UpdateUsageEntry, "_lcc65"),
    (Op::ShrinkUsageTableHeader, "_lcc67"),
    (Op::MoveEntry, "_lcc68"),
    (Op::CopyOldUsageEntry, "_lcc69"),
    (Op::CreateOldUsageEntry, "_lcc70"),
];

/// Anything that can hand out the address of a named C symbol.
pub trait SymbolSource: Send + Sync {
    fn symbol(&self, name: &str) -> Option<*mut c_void>;
}

/// A shared object opened with `dlopen`; closed again on drop.
pub struct NativeLibrary {
    handle: *mut c_void,
    name: String,
}

// dlsym/dlclose on a handle are thread-safe.
unsafe impl Send for NativeLibrary {}
unsafe impl Sync for NativeLibrary {}

impl NativeLibrary {
    /// Open `path` with `RTLD_NOW` so every undefined reference is bound up front.
    pub fn open(path: &Path) -> Result<Self> {
        let name = path.display().to_string();
        let c_path = CString::new(name.as_bytes())
            .map_err(|_| Error::Config(format!("library path contains NUL: {name}")))?;
        let handle = unsafe { libc::dlopen(c_path.as_ptr(), libc::RTLD_NOW) };
        if handle.is_null() {
            return Err(Error::InitializationFailure(format!(
                "could not load {name}: {}",
                last_dl_error()
            )));
        }
        Ok(Self { handle, name })
    }

    /// Symbols linked into the running executable.
    pub fn process_image() -> Result<Self> {
        let handle = unsafe { libc::dlopen(std::ptr::null(), libc::RTLD_NOW) };
        if handle.is_null() {
            return Err(Error::InitializationFailure(format!(
                "could not open process image: {}",
                last_dl_error()
            )));
        }
        Ok(Self {
            handle,
            name: "<process>".to_string(),
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl SymbolSource for NativeLibrary {
    fn symbol(&self, name: &str) -> Option<*mut c_void> {
        let c_name = CString::new(name).ok()?;
        let address = unsafe { libc::dlsym(self.handle, c_name.as_ptr()) };
        (!address.is_null()).then_some(address)
    }
}

impl Drop for NativeLibrary {
    fn drop(&mut self) {
        unsafe {
            libc::dlclose(self.handle);
        }
        debug!("Closed native library {}", self.name);
    }
}

impl fmt::Debug for NativeLibrary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeLibrary").field("name", &self.name).finish()
    }
}

fn last_dl_error() -> String {
    let message = unsafe { libc::dlerror() };
    if message.is_null() {
        "unknown error".to_string()
    } else {
        unsafe { CStr::from_ptr(message) }.to_string_lossy().into_owned()
    }
}

/// Symbols registered by address, for engines linked into the host binary.
#[derive(Debug, Default, Clone)]
pub struct StaticSymbols {
    entries: HashMap<String, usize>,
}

impl StaticSymbols {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `address` under `name`; a later registration wins.
    pub fn insert(&mut self, name: impl Into<String>, address: *const c_void) -> &mut Self {
        self.entries.insert(name.into(), address as usize);
        self
    }

    #[must_use]
    pub fn with(mut self, name: impl Into<String>, address: *const c_void) -> Self {
        self.insert(name, address);
        self
    }

    pub fn remove(&mut self, name: &str) {
        self.entries.remove(name);
    }
}

impl SymbolSource for StaticSymbols {
    fn symbol(&self, name: &str) -> Option<*mut c_void> {
        self.entries.get(name).map(|&address| address as *mut c_void)
    }
}

/// Entry points of one module, keyed by operation.
#[derive(Debug, Clone, Default)]
pub struct SymbolMap {
    entries: HashMap<Operation, usize>,
}

impl SymbolMap {
    pub(crate) fn insert(&mut self, operation: Operation, address: *mut c_void) {
        self.entries.insert(operation, address as usize);
    }

    #[must_use]
    pub fn contains(&self, operation: Operation) -> bool {
        self.entries.contains_key(&operation)
    }

    pub fn operations(&self) -> impl Iterator<Item = Operation> + '_ {
        self.entries.keys().copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Reinterpret the entry for `operation` as the function pointer type `F`.
    ///
    /// # Safety
    /// `F` must be the `extern "C"` signature the module exports for
    /// `operation`.
    pub(crate) unsafe fn get<F: Copy>(&self, operation: Operation) -> Option<F> {
        debug_assert_eq!(std::mem::size_of::<F>(), std::mem::size_of::<usize>());
        self.entries
            .get(&operation)
            .map(|address| std::mem::transmute_copy::<usize, F>(address))
    }
}

/// Why a Level 1 module was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveFailure {
    /// One of the bootstrap entry points is missing.
    MissingBootstrap(&'static str),
    /// The module's own `Initialize` failed.
    InitializeFailed(OemCryptoResult),
    /// The module is older than [`MIN_API_VERSION`].
    UnsupportedVersion(u32),
    /// A symbol required at the negotiated version is missing.
    MissingSymbol { symbol: &'static str, version: u32 },
}

impl ResolveFailure {
    /// Initialization mode reported when this failure forces a fallback.
    #[must_use]
    pub fn mode(&self) -> InitializationMode {
        match self {
            Self::MissingBootstrap(_) => InitializationMode::L3InvalidL1,
            Self::InitializeFailed(_) => InitializationMode::L3CouldNotInitializeL1,
            Self::UnsupportedVersion(_) => InitializationMode::L3WrongL1Version,
            Self::MissingSymbol { .. } => InitializationMode::L3L1LoadFailed,
        }
    }

    /// Version reported by the module, when negotiation got that far.
    #[must_use]
    pub fn version(&self) -> Option<u32> {
        match self {
            Self::UnsupportedVersion(version) | Self::MissingSymbol { version, .. } => Some(*version),
            _ => None,
        }
    }
}

impl fmt::Display for ResolveFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingBootstrap(symbol) => write!(f, "missing bootstrap symbol {symbol}"),
            Self::InitializeFailed(code) => write!(f, "module Initialize returned {code}"),
            Self::UnsupportedVersion(version) => {
                write!(f, "module is version {version}, need at least {MIN_API_VERSION}")
            }
            Self::MissingSymbol { symbol, version } => {
                write!(f, "missing {symbol} required at version {version}")
            }
        }
    }
}

impl From<ResolveFailure> for Error {
    fn from(failure: ResolveFailure) -> Self {
        Error::InitializationFailure(failure.to_string())
    }
}

/// Bring the module up through its own Initialize and learn its version.
/// The module is terminated again if it turns out to be too old.
pub(crate) fn negotiate(
    initialize: impl FnOnce() -> OemCryptoResult,
    api_version: impl FnOnce() -> u32,
    terminate: impl FnOnce() -> OemCryptoResult,
) -> std::result::Result<u32, ResolveFailure> {
    let status = initialize();
    if !status.is_success() {
        warn!("Could not initialize L1 ({}). Falling back to L3.", status);
        return Err(ResolveFailure::InitializeFailed(status));
    }
    let version = api_version();
    if version < MIN_API_VERSION {
        warn!(
            "L1 module is version {}, not {}. Falling back to L3.",
            version, MIN_API_VERSION
        );
        terminate();
        return Err(ResolveFailure::UnsupportedVersion(version));
    }
    Ok(version)
}

/// A fully resolved Level 1 module.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub version: u32,
    pub symbols: SymbolMap,
}

/// Resolve a Level 1 module: bootstrap symbols first, then `Initialize` and
/// `APIVersion`, then every descriptor covering the negotiated version.
pub fn resolve(source: &dyn SymbolSource) -> std::result::Result<Resolution, ResolveFailure> {
    let mut symbols = SymbolMap::default();
    for operation in BOOTSTRAP_SYMBOLS {
        let Some(descriptor) = operation.descriptor() else {
            continue;
        };
        let address = source.symbol(descriptor.symbol).ok_or_else(|| {
            warn!("Could not load L1 {}. Falling back to L3.", descriptor.symbol);
            ResolveFailure::MissingBootstrap(descriptor.symbol)
        })?;
        symbols.insert(operation, address);
    }

    // SAFETY: the bootstrap entries were just resolved under their
    // documented signatures.
    let (initialize, api_version, terminate) = unsafe {
        (
            symbols.get::<ffi::InitializeFn>(Op::Initialize),
            symbols.get::<ffi::ApiVersionFn>(Op::ApiVersion),
            symbols.get::<ffi::TerminateFn>(Op::Terminate),
        )
    };
    let (Some(initialize), Some(api_version), Some(terminate)) = (initialize, api_version, terminate) else {
        return Err(ResolveFailure::MissingBootstrap("OEMCrypto_Initialize"));
    };

    let version = negotiate(
        || unsafe { initialize() },
        || unsafe { api_version() },
        || unsafe { terminate() },
    )?;
    debug!("L1 module negotiated API version {}", version);

    for descriptor in SYMBOL_TABLE.iter().filter(|d| d.covers(version)) {
        if symbols.contains(descriptor.operation) {
            continue;
        }
        match source.symbol(descriptor.symbol) {
            Some(address) => symbols.insert(descriptor.operation, address),
            None => {
                warn!("Could not load L1 {}. Falling back to L3.", descriptor.symbol);
                unsafe { terminate() };
                return Err(ResolveFailure::MissingSymbol {
                    symbol: descriptor.symbol,
                    version,
                });
            }
        }
    }

    Ok(Resolution { version, symbols })
}

/// Resolve the statically linked Level 3 engine. Missing entries are left
/// absent and report NotImplemented when called.
pub fn resolve_software(source: &dyn SymbolSource) -> Result<SymbolMap> {
    let mut symbols = SymbolMap::default();
    for &(operation, symbol) in SOFTWARE_SYMBOL_TABLE {
        if let Some(address) = source.symbol(symbol) {
            symbols.insert(operation, address);
        }
    }
    for required in [Op::Initialize, Op::ApiVersion, Op::OpenSession, Op::CloseSession] {
        if !symbols.contains(required) {
            return Err(Error::InitializationFailure(format!(
                "built-in engine does not export {required:?}"
            )));
        }
    }
    Ok(symbols)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    static REPORTED_VERSION: AtomicU32 = AtomicU32::new(14);
    static TERMINATED: AtomicU32 = AtomicU32::new(0);

    extern "C" fn fake_initialize() -> OemCryptoResult {
        OemCryptoResult::SUCCESS
    }

    extern "C" fn fake_failing_initialize() -> OemCryptoResult {
        OemCryptoResult::ERROR_INIT_FAILED
    }

    extern "C" fn fake_api_version() -> u32 {
        REPORTED_VERSION.load(Ordering::SeqCst)
    }

    extern "C" fn fake_terminate() -> OemCryptoResult {
        TERMINATED.fetch_add(1, Ordering::SeqCst);
        OemCryptoResult::SUCCESS
    }

    extern "C" fn fake_entry() -> OemCryptoResult {
        OemCryptoResult::SUCCESS
    }

    /// A source exporting every descriptor covering `version`, with working
    /// bootstrap entry points.
    fn full_module(version: u32) -> StaticSymbols {
        let mut symbols = StaticSymbols::new();
        for descriptor in SYMBOL_TABLE.iter().filter(|d| d.covers(version)) {
            symbols.insert(descriptor.symbol, fake_entry as *const c_void);
        }
        symbols
            .with("OEMCrypto_Initialize", fake_initialize as *const c_void)
            .with("OEMCrypto_APIVersion", fake_api_version as *const c_void)
            .with("OEMCrypto_Terminate", fake_terminate as *const c_void)
    }

    #[test]
    fn table_has_one_row_per_operation() {
        let mut seen = HashSet::new();
        for descriptor in SYMBOL_TABLE {
            assert!(seen.insert(descriptor.operation), "{:?} listed twice", descriptor.operation);
            assert!(descriptor.symbol.starts_with("OEMCrypto_"));
            assert!(descriptor.min_version >= MIN_API_VERSION);
        }
    }

    #[test]
    fn open_ended_rows_cover_newer_versions() {
        let load_keys = Op::LoadKeys.descriptor().expect("LoadKeys row");
        assert!(load_keys.covers(14));
        assert!(load_keys.covers(16));
        assert!(!load_keys.covers(13));
        assert!(Op::LoadKeysV9OrV10.available_at(10));
        assert!(!Op::LoadKeysV9OrV10.available_at(11));
        assert!(!Op::IsInApp.available_at(14));
    }

    #[test]
    fn legacy_shapes_partition_versions() {
        for version in MIN_API_VERSION..=MAX_API_VERSION {
            let load_keys = [
                Op::LoadKeysV8,
                Op::LoadKeysV9OrV10,
                Op::LoadKeysV11OrV12,
                Op::LoadKeysV13,
                Op::LoadKeys,
            ];
            let count = load_keys.iter().filter(|op| op.available_at(version)).count();
            assert_eq!(count, 1, "exactly one LoadKeys shape at v{version}");

            let select = [Op::SelectKeyV13, Op::SelectKey];
            assert_eq!(select.iter().filter(|op| op.available_at(version)).count(), 1);
        }
    }

    // The fakes share process-wide counters, so the resolver scenarios run
    // sequentially in one test.
    #[test]
    fn resolver_scenarios() {
        for version in MIN_API_VERSION..=MAX_API_VERSION {
            REPORTED_VERSION.store(version, Ordering::SeqCst);
            let resolution = resolve(&full_module(version)).expect("full module resolves");
            assert_eq!(resolution.version, version);
            for descriptor in SYMBOL_TABLE {
                assert_eq!(
                    resolution.symbols.contains(descriptor.operation),
                    descriptor.covers(version),
                    "{} at v{}",
                    descriptor.symbol,
                    version
                );
            }
        }

        REPORTED_VERSION.store(12, Ordering::SeqCst);
        let mut missing = full_module(12);
        missing.remove("OEMCrypto_GetOEMPublicCertificate");
        let before = TERMINATED.load(Ordering::SeqCst);
        let failure = resolve(&missing).expect_err("missing symbol rejects module");
        assert_eq!(
            failure,
            ResolveFailure::MissingSymbol {
                symbol: "OEMCrypto_GetOEMPublicCertificate",
                version: 12
            }
        );
        assert_eq!(failure.mode(), InitializationMode::L3L1LoadFailed);
        assert_eq!(TERMINATED.load(Ordering::SeqCst), before + 1);

        // A symbol outside the negotiated range is not required.
        let mut old = full_module(12);
        old.remove("OEMCrypto_LoadKeys_V9_or_V10");
        assert!(resolve(&old).is_ok());

        REPORTED_VERSION.store(7, Ordering::SeqCst);
        let before = TERMINATED.load(Ordering::SeqCst);
        let failure = resolve(&full_module(8)).expect_err("too old");
        assert_eq!(failure, ResolveFailure::UnsupportedVersion(7));
        assert_eq!(TERMINATED.load(Ordering::SeqCst), before + 1);

        REPORTED_VERSION.store(14, Ordering::SeqCst);
        let failing = full_module(14).with("OEMCrypto_Initialize", fake_failing_initialize as *const c_void);
        assert_eq!(
            resolve(&failing).expect_err("init fails").mode(),
            InitializationMode::L3CouldNotInitializeL1
        );

        let mut no_bootstrap = full_module(14);
        no_bootstrap.remove("OEMCrypto_APIVersion");
        assert_eq!(
            resolve(&no_bootstrap).expect_err("bootstrap missing"),
            ResolveFailure::MissingBootstrap("OEMCrypto_APIVersion")
        );
    }

    #[test]
    fn software_resolution_requires_core_entries() {
        let mut symbols = StaticSymbols::new();
        for (_, name) in SOFTWARE_SYMBOL_TABLE {
            symbols.insert(*name, fake_entry as *const c_void);
        }
        let map = resolve_software(&symbols).expect("software resolves");
        assert!(map.contains(Op::LoadKeysV13));
        assert!(!map.contains(Op::LoadKeys));

        symbols.remove("_lcc09");
        assert!(resolve_software(&symbols).is_err());
    }
}
