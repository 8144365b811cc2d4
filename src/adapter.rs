//! The adapter context: bring-up, routing and dispatch.
//!
//! [`Adapter::initialize`] brings up the built-in Level 3 engine under the
//! watchdog, then tries the vendor Level 1 module and keeps it only if its
//! provisioning checks out. Every OEMCrypto operation is a method that routes
//! to the implementation owning the session (or serving the requested
//! security level), gates it on the negotiated API version and translates it
//! through that version's [`AbiShim`](crate::shim::AbiShim).
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::AdapterConfig;
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::implementation::{Implementation, ImplementationKind};
use crate::metrics::{AdapterMetrics, InitializationMode};
use crate::native::NativeEngine;
use crate::provisioning;
use crate::registry::{SessionId, SessionRegistry};
use crate::symbols::{self, Operation, ResolveFailure, SymbolSource, MIN_API_VERSION};
use crate::types::{
    certificate, Algorithm, CipherMode, DestBuffer, EncryptPattern, EntitledContentKeyObject,
    HdcpCapability, KeyObject, KeyObjectV13, KeyRefreshObject, LoadKeysRequest, OemCryptoResult,
    OldUsageEntry, ProvisioningMethod, RewrapRequest, RewrapRequest30, RsaPaddingScheme,
    SampleDescription, SecurityLevel,
};
use crate::watchdog::Watchdog;

/// Largest slice handed to a single generic encrypt or decrypt call.
pub const MAX_GENERIC_CHUNK: usize = 100 * 1024;
const IV_SIZE: usize = 16;

/// Where the Level 1 implementation comes from.
pub enum Level1Source {
    /// The library named by [`AdapterConfig::l1_library_path`].
    Configured,
    /// A shared library at this path.
    Library(PathBuf),
    /// Entry points exported under their vendor names by any symbol source.
    Symbols(Box<dyn SymbolSource>),
    /// A host-provided engine, negotiated through its own Initialize.
    Engine(Arc<dyn Engine>),
}

/// Interprets a status that may carry a required output length.
fn sized(status: OemCryptoResult, length: usize) -> Result<usize> {
    if status == OemCryptoResult::ERROR_SHORT_BUFFER {
        return Err(Error::ShortBuffer { required: length });
    }
    status.into_result().map(|()| length)
}

/// An initialized OEMCrypto adapter.
pub struct Adapter {
    config: AdapterConfig,
    software: Implementation,
    hardware: Option<Implementation>,
    sessions: SessionRegistry,
    metrics: AdapterMetrics,
    terminated: bool,
}

impl Adapter {
    /// Initialize with the built-in engine linked into this process and the
    /// configured Level 1 library.
    pub fn initialize(config: AdapterConfig) -> Result<Self> {
        let software = NativeEngine::software_from_process()?;
        Self::initialize_with(config, Arc::new(software), Level1Source::Configured)
    }

    /// Initialize with an explicit Level 3 engine and Level 1 source.
    pub fn initialize_with(
        config: AdapterConfig,
        software: Arc<dyn Engine>,
        level1: Level1Source,
    ) -> Result<Self> {
        let mut metrics = AdapterMetrics::default();

        let watchdog = Watchdog::new(
            config.watchdog_timeout(),
            config.failure_file_path(),
            config.abort_policy,
        );
        if watchdog.check_for_previous_failure() {
            metrics.previous_l3_failure = true;
            metrics.record_mode(InitializationMode::L3InitializationFailed);
        }

        let worker = Arc::clone(&software);
        let diagnostics = Arc::clone(&software);
        let status = watchdog.run(move || worker.initialize(), || diagnostics.dump_state())?;
        if !status.is_success() {
            error!("Level 3 initialization failed: {}", status);
            return Err(Error::InitializationFailure(format!(
                "Level 3 initialization returned {status}"
            )));
        }

        let software = Implementation::new(ImplementationKind::Software, software);
        let mut adapter = Self {
            config,
            software,
            hardware: None,
            sessions: SessionRegistry::new(),
            metrics,
            terminated: false,
        };

        if adapter
            .software
            .get(Operation::IsInApp)
            .is_ok_and(|e| e.is_in_app())
        {
            adapter.metrics.record_mode(InitializationMode::UsingInApp);
            return Ok(adapter);
        }
        if adapter.config.level3_forced() {
            warn!("Level 3 requested explicitly. Level 1 is not loaded.");
            adapter.metrics.record_mode(InitializationMode::ForcingL3);
            return Ok(adapter);
        }

        info!("L3 initialized. Trying L1.");
        adapter.hardware = adapter.load_level1(level1);
        match &adapter.hardware {
            Some(hardware) => {
                info!("Using Level 1 (API v{}).", hardware.version());
            }
            None => {
                info!("Using Level 3 (API v{}).", adapter.software.version());
            }
        }
        Ok(adapter)
    }

    fn record_resolve_failure(&mut self, failure: &ResolveFailure) {
        warn!("Level 1 rejected: {}. Falling back to L3.", failure);
        if let Some(version) = failure.version() {
            self.metrics.record_l1_version(version, MIN_API_VERSION);
        }
        self.metrics.record_mode(failure.mode());
    }

    fn load_level1(&mut self, source: Level1Source) -> Option<Implementation> {
        let path = match source {
            Level1Source::Configured => match self.config.l1_library_path.clone() {
                Some(path) => Some(path),
                None => {
                    warn!("L1 library not specified. Falling back to L3.");
                    self.metrics.record_mode(InitializationMode::L3NoL1LibraryPath);
                    return None;
                }
            },
            Level1Source::Library(ref path) => Some(path.clone()),
            _ => None,
        };

        let resolved: std::result::Result<(Arc<dyn Engine>, u32), ResolveFailure> = match (path, source) {
            (Some(path), _) => match NativeEngine::load(&path) {
                Err(err) => {
                    warn!("Could not load {}. Falling back to L3. {}", path.display(), err);
                    self.metrics.record_mode(InitializationMode::L3L1OpenFailed);
                    return None;
                }
                Ok(loaded) => loaded.map(|engine| {
                    let version = engine.api_version();
                    (Arc::new(engine) as Arc<dyn Engine>, version)
                }),
            },
            (None, Level1Source::Symbols(exported)) => NativeEngine::from_source("level1", exported.as_ref())
                .map(|engine| {
                    let version = engine.api_version();
                    (Arc::new(engine) as Arc<dyn Engine>, version)
                }),
            (None, Level1Source::Engine(engine)) => symbols::negotiate(
                || engine.initialize(),
                || engine.api_version(),
                || engine.terminate(),
            )
            .map(|version| (engine, version)),
            (None, _) => return None,
        };
        let (engine, version) = match resolved {
            Ok(resolved) => resolved,
            Err(failure) => {
                self.record_resolve_failure(&failure);
                return None;
            }
        };

        self.metrics.record_l1_version(version, MIN_API_VERSION);
        let hardware = Implementation::with_version(ImplementationKind::Hardware, engine, version);
        match provisioning::bootstrap(&hardware, self.config.factory_keybox_path.as_deref()) {
            Ok(mode) => {
                self.metrics.record_mode(mode);
                Some(hardware)
            }
            Err(mode) => {
                hardware.engine().terminate();
                self.metrics.record_mode(mode);
                None
            }
        }
    }

    /// Close every session and terminate both implementations. Dropping the
    /// adapter does the same.
    pub fn terminate(mut self) -> Result<()> {
        self.shutdown().into_result()
    }

    fn shutdown(&mut self) -> OemCryptoResult {
        if self.terminated {
            return OemCryptoResult::SUCCESS;
        }
        self.terminated = true;
        let (hardware, software) = (&self.hardware, &self.software);
        self.sessions.close_all(|kind| match kind {
            ImplementationKind::Hardware => hardware.as_ref(),
            ImplementationKind::Software => Some(software),
        });
        let mut status = self.software.engine().terminate();
        if let Some(hardware) = self.hardware.take() {
            status = hardware.engine().terminate();
        }
        debug!("Adapter terminated ({})", status);
        status
    }

    #[must_use]
    pub fn metrics(&self) -> &AdapterMetrics {
        &self.metrics
    }

    #[must_use]
    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    /// Implementation serving [`SecurityLevel::Default`].
    #[must_use]
    pub fn default_kind(&self) -> ImplementationKind {
        self.for_level(SecurityLevel::Default).kind()
    }

    #[must_use]
    pub fn implementation(&self, kind: ImplementationKind) -> Option<&Implementation> {
        match kind {
            ImplementationKind::Hardware => self.hardware.as_ref(),
            ImplementationKind::Software => Some(&self.software),
        }
    }

    /// Number of open sessions across both implementations.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    fn for_level(&self, level: SecurityLevel) -> &Implementation {
        match (level, &self.hardware) {
            (SecurityLevel::Default, Some(hardware)) => hardware,
            _ => &self.software,
        }
    }

    fn default_level(&self) -> &Implementation {
        self.for_level(SecurityLevel::Default)
    }

    fn session(&self, id: SessionId) -> Result<(&Implementation, u32)> {
        let entry = self.sessions.lookup(id).ok_or(Error::InvalidSession(id))?;
        let implementation = self.implementation(id.owner).ok_or(Error::InvalidSession(id))?;
        Ok((implementation, entry.internal))
    }

    // Sessions.

    pub fn open_session(&self, level: SecurityLevel) -> Result<SessionId> {
        self.sessions.open(self.for_level(level))
    }

    pub fn close_session(&self, id: SessionId) -> Result<()> {
        self.sessions.close(id, |kind| self.implementation(kind))
    }

    pub fn generate_derived_keys(
        &self,
        id: SessionId,
        mac_key_context: &[u8],
        enc_key_context: &[u8],
    ) -> Result<()> {
        let (imp, session) = self.session(id)?;
        imp.call(Operation::GenerateDerivedKeys, |e| {
            e.generate_derived_keys(session, mac_key_context, enc_key_context)
        })
        .into_result()
    }

    pub fn generate_nonce(&self, id: SessionId) -> Result<u32> {
        let (imp, session) = self.session(id)?;
        let mut nonce = 0;
        imp.call(Operation::GenerateNonce, |e| e.generate_nonce(session, &mut nonce))
            .into_result()?;
        Ok(nonce)
    }

    /// HMAC-SHA256 signature of `message` with the session's client MAC key.
    pub fn generate_signature(&self, id: SessionId, message: &[u8], signature: &mut [u8]) -> Result<usize> {
        let (imp, session) = self.session(id)?;
        let mut length = signature.len();
        let status = imp.call(Operation::GenerateSignature, |e| {
            e.generate_signature(session, message, signature, &mut length)
        });
        sized(status, length)
    }

    // Keys.

    pub fn load_keys(&self, id: SessionId, request: &LoadKeysRequest<'_, KeyObject<'_>>) -> Result<()> {
        let (imp, session) = self.session(id)?;
        imp.shim().load_keys(imp, session, request).into_result()
    }

    /// `LoadKeys` for callers that still set a cipher mode per key.
    pub fn load_keys_back_compat(
        &self,
        id: SessionId,
        request: &LoadKeysRequest<'_, KeyObjectV13<'_>>,
    ) -> Result<()> {
        let (imp, session) = self.session(id)?;
        imp.shim().load_keys_back_compat(imp, session, request).into_result()
    }

    pub fn load_entitled_content_keys(&self, id: SessionId, keys: &[EntitledContentKeyObject<'_>]) -> Result<()> {
        let (imp, session) = self.session(id)?;
        imp.call(Operation::LoadEntitledContentKeys, |e| {
            e.load_entitled_content_keys(session, keys)
        })
        .into_result()
    }

    pub fn refresh_keys(
        &self,
        id: SessionId,
        message: &[u8],
        signature: &[u8],
        keys: &[KeyRefreshObject<'_>],
    ) -> Result<()> {
        let (imp, session) = self.session(id)?;
        imp.call(Operation::RefreshKeys, |e| e.refresh_keys(session, message, signature, keys))
            .into_result()
    }

    pub fn query_key_control(&self, id: SessionId, key_id: &[u8], key_control_block: &mut [u8]) -> Result<usize> {
        let (imp, session) = self.session(id)?;
        let mut length = key_control_block.len();
        let status = imp.call(Operation::QueryKeyControl, |e| {
            e.query_key_control(session, key_id, key_control_block, &mut length)
        });
        sized(status, length)
    }

    pub fn select_key(&self, id: SessionId, key_id: &[u8], cipher_mode: CipherMode) -> Result<()> {
        let (imp, session) = self.session(id)?;
        imp.shim().select_key(imp, session, key_id, cipher_mode).into_result()
    }

    // Decryption.

    pub fn decrypt_cenc(
        &self,
        id: SessionId,
        sample: &SampleDescription<'_>,
        out: &mut DestBuffer<'_>,
        pattern: &EncryptPattern,
    ) -> Result<()> {
        let (imp, session) = self.session(id)?;
        imp.shim().decrypt_cenc(imp, session, sample, out, pattern).into_result()
    }

    pub fn copy_buffer(
        &self,
        level: SecurityLevel,
        data: &[u8],
        out: &mut DestBuffer<'_>,
        subsample_flags: u8,
    ) -> Result<()> {
        self.for_level(level)
            .call(Operation::CopyBuffer, |e| e.copy_buffer(data, out, subsample_flags))
            .into_result()
    }

    // Keybox and device identity.

    pub fn wrap_keybox(&self, keybox: &[u8], wrapped: &mut [u8], transport_key: &[u8]) -> Result<usize> {
        let mut length = wrapped.len();
        let status = self.default_level().call(Operation::WrapKeybox, |e| {
            e.wrap_keybox(keybox, wrapped, &mut length, transport_key)
        });
        sized(status, length)
    }

    pub fn install_keybox(&self, level: SecurityLevel, keybox: &[u8]) -> Result<()> {
        self.for_level(level)
            .call(Operation::InstallKeybox, |e| e.install_keybox(keybox))
            .into_result()
    }

    /// Load the well-known test keybox. Modules before v14 use their own
    /// built-in copy and ignore `buffer`.
    pub fn load_test_keybox(&self, buffer: &[u8]) -> Result<()> {
        let imp = self.default_level();
        imp.shim().load_test_keybox(imp, buffer).into_result()
    }

    pub fn is_keybox_valid(&self, level: SecurityLevel) -> Result<()> {
        self.for_level(level)
            .call(Operation::IsKeyboxValid, |e| e.is_keybox_valid())
            .into_result()
    }

    pub fn get_device_id(&self, level: SecurityLevel, device_id: &mut [u8]) -> Result<usize> {
        let mut length = device_id.len();
        let status = self
            .for_level(level)
            .call(Operation::GetDeviceId, |e| e.get_device_id(device_id, &mut length));
        sized(status, length)
    }

    pub fn get_key_data(&self, level: SecurityLevel, key_data: &mut [u8]) -> Result<usize> {
        let mut length = key_data.len();
        let status = self
            .for_level(level)
            .call(Operation::GetKeyData, |e| e.get_key_data(key_data, &mut length));
        sized(status, length)
    }

    pub fn get_random(&self, data: &mut [u8]) -> Result<()> {
        self.default_level()
            .call(Operation::GetRandom, |e| e.get_random(data))
            .into_result()
    }

    // Device RSA key.

    pub fn rewrap_device_rsa_key(
        &self,
        id: SessionId,
        request: &RewrapRequest<'_>,
        wrapped_rsa_key: &mut [u8],
    ) -> Result<usize> {
        let (imp, session) = self.session(id)?;
        let mut length = wrapped_rsa_key.len();
        let status = imp.call(Operation::RewrapDeviceRsaKey, |e| {
            e.rewrap_device_rsa_key(session, request, wrapped_rsa_key, &mut length)
        });
        sized(status, length)
    }

    /// Provisioning 3.0 rewrap.
    pub fn rewrap_device_rsa_key30(
        &self,
        id: SessionId,
        request: &RewrapRequest30<'_>,
        wrapped_rsa_key: &mut [u8],
    ) -> Result<usize> {
        let (imp, session) = self.session(id)?;
        let mut length = wrapped_rsa_key.len();
        let status = imp.call(Operation::RewrapDeviceRsaKey30, |e| {
            e.rewrap_device_rsa_key30(session, request, wrapped_rsa_key, &mut length)
        });
        sized(status, length)
    }

    pub fn load_device_rsa_key(&self, id: SessionId, wrapped_rsa_key: &[u8]) -> Result<()> {
        let (imp, session) = self.session(id)?;
        imp.call(Operation::LoadDeviceRsaKey, |e| e.load_device_rsa_key(session, wrapped_rsa_key))
            .into_result()
    }

    pub fn load_test_rsa_key(&self) -> Result<()> {
        self.default_level()
            .call(Operation::LoadTestRsaKey, |e| e.load_test_rsa_key())
            .into_result()
    }

    pub fn generate_rsa_signature(
        &self,
        id: SessionId,
        message: &[u8],
        signature: &mut [u8],
        padding: RsaPaddingScheme,
    ) -> Result<usize> {
        let (imp, session) = self.session(id)?;
        let mut length = signature.len();
        let status = imp
            .shim()
            .generate_rsa_signature(imp, session, message, signature, &mut length, padding);
        sized(status, length)
    }

    pub fn derive_keys_from_session_key(
        &self,
        id: SessionId,
        enc_session_key: &[u8],
        mac_key_context: &[u8],
        enc_key_context: &[u8],
    ) -> Result<()> {
        let (imp, session) = self.session(id)?;
        imp.call(Operation::DeriveKeysFromSessionKey, |e| {
            e.derive_keys_from_session_key(session, enc_session_key, mac_key_context, enc_key_context)
        })
        .into_result()
    }

    pub fn get_oem_public_certificate(&self, id: SessionId, public_cert: &mut [u8]) -> Result<usize> {
        let (imp, session) = self.session(id)?;
        let mut length = public_cert.len();
        let status = imp.call(Operation::GetOemPublicCertificate, |e| {
            e.get_oem_public_certificate(session, public_cert, &mut length)
        });
        sized(status, length)
    }

    // Device queries.

    /// Negotiated API version of the implementation serving `level`.
    #[must_use]
    pub fn api_version(&self, level: SecurityLevel) -> u32 {
        self.for_level(level).version()
    }

    #[must_use]
    pub fn security_patch_level(&self, level: SecurityLevel) -> u8 {
        self.for_level(level)
            .get(Operation::SecurityPatchLevel)
            .map_or(0, |e| e.security_patch_level())
    }

    /// "L1", "L2" or "L3" as reported by the implementation, empty if it
    /// does not say.
    #[must_use]
    pub fn security_level(&self, level: SecurityLevel) -> String {
        self.for_level(level)
            .get(Operation::SecurityLevel)
            .ok()
            .and_then(|e| e.security_level())
            .unwrap_or_default()
    }

    /// Current and maximum HDCP capability.
    pub fn get_hdcp_capability(&self, level: SecurityLevel) -> Result<(HdcpCapability, HdcpCapability)> {
        let imp = self.for_level(level);
        let (mut current, mut maximum) = (HdcpCapability::None, HdcpCapability::None);
        imp.shim()
            .hdcp_capability(imp, &mut current, &mut maximum)
            .into_result()?;
        Ok((current, maximum))
    }

    #[must_use]
    pub fn get_analog_output_flags(&self, level: SecurityLevel) -> u32 {
        self.for_level(level)
            .get(Operation::GetAnalogOutputFlags)
            .map_or(crate::types::analog_output::UNKNOWN, |e| e.get_analog_output_flags())
    }

    #[must_use]
    pub fn supports_usage_table(&self, level: SecurityLevel) -> bool {
        self.for_level(level)
            .get(Operation::SupportsUsageTable)
            .is_ok_and(|e| e.supports_usage_table())
    }

    #[must_use]
    pub fn is_anti_rollback_hw_present(&self, level: SecurityLevel) -> bool {
        self.for_level(level)
            .get(Operation::IsAntiRollbackHwPresent)
            .is_ok_and(|e| e.is_anti_rollback_hw_present())
    }

    pub fn get_number_of_open_sessions(&self, level: SecurityLevel) -> Result<usize> {
        let mut count = 0;
        self.for_level(level)
            .call(Operation::GetNumberOfOpenSessions, |e| e.get_number_of_open_sessions(&mut count))
            .into_result()?;
        Ok(count)
    }

    pub fn get_max_number_of_sessions(&self, level: SecurityLevel) -> Result<usize> {
        let mut maximum = 0;
        self.for_level(level)
            .call(Operation::GetMaxNumberOfSessions, |e| e.get_max_number_of_sessions(&mut maximum))
            .into_result()?;
        Ok(maximum)
    }

    /// Modules before v12 only know keyboxes.
    #[must_use]
    pub fn get_provisioning_method(&self, level: SecurityLevel) -> ProvisioningMethod {
        self.for_level(level)
            .get(Operation::GetProvisioningMethod)
            .map_or(ProvisioningMethod::Keybox, |e| e.get_provisioning_method())
    }

    /// Bit set of [`certificate`] flags. Modules before v13 support
    /// RSA-2048 only.
    #[must_use]
    pub fn supported_certificates(&self, level: SecurityLevel) -> u32 {
        self.for_level(level)
            .get(Operation::SupportedCertificates)
            .map_or(certificate::RSA_2048, |e| e.supported_certificates())
    }

    // Generic crypto.

    fn generic_crypt(
        &self,
        id: SessionId,
        input: &[u8],
        iv: &[u8; IV_SIZE],
        algorithm: Algorithm,
        output: &mut [u8],
        encrypt: bool,
    ) -> Result<()> {
        let (imp, session) = self.session(id)?;
        let operation = if encrypt {
            Operation::GenericEncrypt
        } else {
            Operation::GenericDecrypt
        };
        let engine = imp.get(operation)?;
        if output.len() < input.len() {
            return Err(Error::ShortBuffer { required: input.len() });
        }

        let mut current_iv = *iv;
        let mut offset = 0;
        while offset < input.len() {
            let end = (offset + MAX_GENERIC_CHUNK).min(input.len());
            let chunk = &input[offset..end];
            let out = &mut output[offset..end];
            let status = if encrypt {
                engine.generic_encrypt(session, chunk, &current_iv, algorithm, out)
            } else {
                engine.generic_decrypt(session, chunk, &current_iv, algorithm, out)
            };
            status.into_result()?;
            if end < input.len() {
                // CBC chaining: the next IV is the last ciphertext block.
                let ciphertext = if encrypt { &output[..end] } else { &input[..end] };
                current_iv.copy_from_slice(&ciphertext[end - IV_SIZE..]);
            }
            offset = end;
        }
        Ok(())
    }

    /// Encrypt `input` into `output`, in chunks of at most
    /// [`MAX_GENERIC_CHUNK`] bytes.
    pub fn generic_encrypt(
        &self,
        id: SessionId,
        input: &[u8],
        iv: &[u8; 16],
        algorithm: Algorithm,
        output: &mut [u8],
    ) -> Result<()> {
        self.generic_crypt(id, input, iv, algorithm, output, true)
    }

    /// Decrypt `input` into `output`, in chunks of at most
    /// [`MAX_GENERIC_CHUNK`] bytes.
    pub fn generic_decrypt(
        &self,
        id: SessionId,
        input: &[u8],
        iv: &[u8; 16],
        algorithm: Algorithm,
        output: &mut [u8],
    ) -> Result<()> {
        self.generic_crypt(id, input, iv, algorithm, output, false)
    }

    pub fn generic_sign(
        &self,
        id: SessionId,
        input: &[u8],
        algorithm: Algorithm,
        signature: &mut [u8],
    ) -> Result<usize> {
        let (imp, session) = self.session(id)?;
        let mut length = signature.len();
        let status = imp.call(Operation::GenericSign, |e| {
            e.generic_sign(session, input, algorithm, signature, &mut length)
        });
        sized(status, length)
    }

    pub fn generic_verify(&self, id: SessionId, input: &[u8], algorithm: Algorithm, signature: &[u8]) -> Result<()> {
        let (imp, session) = self.session(id)?;
        imp.call(Operation::GenericVerify, |e| e.generic_verify(session, input, algorithm, signature))
            .into_result()
    }

    // Usage table, v9 through v12.

    pub fn update_usage_table(&self) -> Result<()> {
        self.default_level()
            .call(Operation::UpdateUsageTable, |e| e.update_usage_table())
            .into_result()
    }

    /// Deactivate the usage entry for `pst`.
    ///
    /// A handle that is not open is accepted for callers of the session-less
    /// legacy API: the default implementation is tried first, then Level 3.
    pub fn deactivate_usage_entry(&self, id: SessionId, pst: &[u8]) -> Result<()> {
        let status = match self.session(id) {
            Ok((imp, session)) => imp.shim().deactivate_usage_entry(imp, session, pst),
            Err(_) => self.deactivate_usage_entry_without_session(pst),
        };
        match status {
            OemCryptoResult::ERROR_INVALID_SESSION => Err(Error::InvalidSession(id)),
            other => other.into_result(),
        }
    }

    fn deactivate_usage_entry_without_session(&self, pst: &[u8]) -> OemCryptoResult {
        let deactivate = |imp: &Implementation| {
            if imp.supports(Operation::DeactivateUsageEntryV12) {
                imp.call(Operation::DeactivateUsageEntryV12, |e| e.deactivate_usage_entry_v12(pst))
            } else if imp.supports(Operation::DeactivateUsageEntry) {
                imp.call(Operation::DeactivateUsageEntry, |e| e.deactivate_usage_entry(0, pst))
            } else {
                OemCryptoResult::ERROR_INVALID_SESSION
            }
        };
        let default = self.default_level();
        let mut status = deactivate(default);
        if !status.is_success() && default.kind() != ImplementationKind::Software {
            status = deactivate(&self.software);
        }
        status
    }

    pub fn report_usage(&self, id: SessionId, pst: &[u8], buffer: &mut [u8]) -> Result<usize> {
        let (imp, session) = self.session(id)?;
        let mut length = buffer.len();
        let status = imp.call(Operation::ReportUsage, |e| e.report_usage(session, pst, buffer, &mut length));
        sized(status, length)
    }

    pub fn delete_usage_entry(&self, id: SessionId, pst: &[u8], message: &[u8], signature: &[u8]) -> Result<()> {
        let (imp, session) = self.session(id)?;
        imp.call(Operation::DeleteUsageEntry, |e| {
            e.delete_usage_entry(session, pst, message, signature)
        })
        .into_result()
    }

    /// Delete the entry for `pst` from both implementations. A Level 1
    /// success wins over a Level 3 failure.
    pub fn force_delete_usage_entry(&self, pst: &[u8]) -> Result<()> {
        let mut status = self
            .software
            .call(Operation::ForceDeleteUsageEntry, |e| e.force_delete_usage_entry(pst));
        if let Some(hardware) = &self.hardware {
            let hardware_status =
                hardware.call(Operation::ForceDeleteUsageEntry, |e| e.force_delete_usage_entry(pst));
            if !status.is_success() && hardware_status.is_success() {
                status = hardware_status;
            }
        }
        status.into_result()
    }

    /// Drop the pre-v13 usage table on both implementations. The Level 1
    /// result is the one reported.
    pub fn delete_old_usage_table(&self) -> Result<()> {
        let mut status = self
            .software
            .call(Operation::DeleteOldUsageTable, |e| e.delete_old_usage_table());
        if let Some(hardware) = &self.hardware {
            status = hardware.call(Operation::DeleteOldUsageTable, |e| e.delete_old_usage_table());
        }
        status.into_result()
    }

    // Usage table, v13 and later.

    pub fn create_usage_table_header(&self, level: SecurityLevel, header: &mut [u8]) -> Result<usize> {
        let mut length = header.len();
        let status = self.for_level(level).call(Operation::CreateUsageTableHeader, |e| {
            e.create_usage_table_header(header, &mut length)
        });
        sized(status, length)
    }

    pub fn load_usage_table_header(&self, level: SecurityLevel, header: &[u8]) -> Result<()> {
        self.for_level(level)
            .call(Operation::LoadUsageTableHeader, |e| e.load_usage_table_header(header))
            .into_result()
    }

    pub fn create_new_usage_entry(&self, id: SessionId) -> Result<u32> {
        let (imp, session) = self.session(id)?;
        let mut index = 0;
        imp.call(Operation::CreateNewUsageEntry, |e| e.create_new_usage_entry(session, &mut index))
            .into_result()?;
        Ok(index)
    }

    pub fn load_usage_entry(&self, id: SessionId, index: u32, entry: &[u8]) -> Result<()> {
        let (imp, session) = self.session(id)?;
        imp.call(Operation::LoadUsageEntry, |e| e.load_usage_entry(session, index, entry))
            .into_result()
    }

    /// Write the updated header and entry. Returns their lengths; on a short
    /// buffer the required size is the larger of the two.
    pub fn update_usage_entry(&self, id: SessionId, header: &mut [u8], entry: &mut [u8]) -> Result<(usize, usize)> {
        let (imp, session) = self.session(id)?;
        let mut header_length = header.len();
        let mut entry_length = entry.len();
        let status = imp.call(Operation::UpdateUsageEntry, |e| {
            e.update_usage_entry(session, header, &mut header_length, entry, &mut entry_length)
        });
        sized(status, header_length.max(entry_length))?;
        Ok((header_length, entry_length))
    }

    pub fn shrink_usage_table_header(
        &self,
        level: SecurityLevel,
        new_entry_count: u32,
        header: &mut [u8],
    ) -> Result<usize> {
        let mut length = header.len();
        let status = self.for_level(level).call(Operation::ShrinkUsageTableHeader, |e| {
            e.shrink_usage_table_header(new_entry_count, header, &mut length)
        });
        sized(status, length)
    }

    pub fn move_entry(&self, id: SessionId, new_index: u32) -> Result<()> {
        let (imp, session) = self.session(id)?;
        imp.call(Operation::MoveEntry, |e| e.move_entry(session, new_index))
            .into_result()
    }

    pub fn copy_old_usage_entry(&self, id: SessionId, pst: &[u8]) -> Result<()> {
        let (imp, session) = self.session(id)?;
        imp.call(Operation::CopyOldUsageEntry, |e| e.copy_old_usage_entry(session, pst))
            .into_result()
    }

    pub fn create_old_usage_entry(&self, level: SecurityLevel, entry: &OldUsageEntry<'_>) -> Result<()> {
        self.for_level(level)
            .call(Operation::CreateOldUsageEntry, |e| e.create_old_usage_entry(entry))
            .into_result()
    }

    // SRM. Level 3 cannot hold an SRM, so only the default level is asked.

    #[must_use]
    pub fn is_srm_update_supported(&self) -> bool {
        self.default_level()
            .get(Operation::IsSrmUpdateSupported)
            .is_ok_and(|e| e.is_srm_update_supported())
    }

    pub fn get_current_srm_version(&self) -> Result<u16> {
        let mut version = 0;
        self.default_level()
            .call(Operation::GetCurrentSrmVersion, |e| e.get_current_srm_version(&mut version))
            .into_result()?;
        Ok(version)
    }

    pub fn load_srm(&self, srm: &[u8]) -> Result<()> {
        self.default_level()
            .call(Operation::LoadSrm, |e| e.load_srm(srm))
            .into_result()
    }

    pub fn remove_srm(&self) -> Result<()> {
        self.default_level()
            .call(Operation::RemoveSrm, |e| e.remove_srm())
            .into_result()
    }
}

impl Drop for Adapter {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Adapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Adapter")
            .field("software", &self.software)
            .field("hardware", &self.hardware)
            .field("sessions", &self.sessions.len())
            .field("metrics", &self.metrics)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use super::*;
    use crate::types::{LicenseType, SignedMessage};
    use crate::watchdog::AbortPolicy;

    type Journal = Arc<Mutex<Vec<String>>>;

    /// Scriptable engine that logs every call into a shared journal.
    struct Fake {
        name: &'static str,
        version: u32,
        initialize: OemCryptoResult,
        keybox_valid: bool,
        in_app: bool,
        results: HashMap<&'static str, OemCryptoResult>,
        next_session: AtomicU32,
        journal: Journal,
        ivs: Mutex<Vec<[u8; 16]>>,
        loaded: Mutex<HashMap<u32, u32>>,
        missing: Vec<Operation>,
    }

    impl Fake {
        fn new(name: &'static str, version: u32, journal: &Journal) -> Self {
            Self {
                name,
                version,
                initialize: OemCryptoResult::SUCCESS,
                keybox_valid: true,
                in_app: false,
                results: HashMap::new(),
                next_session: AtomicU32::new(1),
                journal: Arc::clone(journal),
                ivs: Mutex::new(Vec::new()),
                loaded: Mutex::new(HashMap::new()),
                missing: Vec::new(),
            }
        }

        fn without(mut self, operation: Operation) -> Self {
            self.missing.push(operation);
            self
        }

        fn returning(mut self, call: &'static str, status: OemCryptoResult) -> Self {
            self.results.insert(call, status);
            self
        }

        fn hit(&self, call: &'static str) -> OemCryptoResult {
            self.journal
                .lock()
                .expect("journal")
                .push(format!("{}:{}", self.name, call));
            self.results.get(call).copied().unwrap_or(OemCryptoResult::SUCCESS)
        }
    }

    impl Engine for Fake {
        fn provides(&self, operation: Operation) -> bool {
            !self.missing.contains(&operation)
        }

        fn api_version(&self) -> u32 {
            self.version
        }

        fn initialize(&self) -> OemCryptoResult {
            self.hit("Initialize");
            self.initialize
        }

        fn terminate(&self) -> OemCryptoResult {
            self.hit("Terminate")
        }

        fn is_in_app(&self) -> bool {
            self.in_app
        }

        fn open_session(&self, session: &mut u32) -> OemCryptoResult {
            *session = self.next_session.fetch_add(1, Ordering::SeqCst);
            self.hit("OpenSession")
        }

        fn close_session(&self, _: u32) -> OemCryptoResult {
            self.hit("CloseSession")
        }

        fn is_keybox_valid(&self) -> OemCryptoResult {
            if self.keybox_valid {
                OemCryptoResult::SUCCESS
            } else {
                OemCryptoResult::ERROR_KEYBOX_INVALID
            }
        }

        fn get_key_data(&self, _: &mut [u8], _: &mut usize) -> OemCryptoResult {
            self.hit("GetKeyData")
        }

        fn generate_signature(&self, _: u32, _: &[u8], _: &mut [u8], length: &mut usize) -> OemCryptoResult {
            *length = 32;
            self.hit("GenerateSignature")
        }

        fn load_keys(&self, _: u32, _: &LoadKeysRequest<'_, KeyObject<'_>>) -> OemCryptoResult {
            self.hit("LoadKeys")
        }

        fn load_keys_v9_or_v10(&self, _: u32, _: &LoadKeysRequest<'_, KeyObject<'_>>) -> OemCryptoResult {
            self.hit("LoadKeys_V9_or_V10")
        }

        fn get_hdcp_capability_v9(&self, current: &mut u8, maximum: &mut u8) -> OemCryptoResult {
            *current = 2;
            *maximum = 4;
            self.hit("GetHDCPCapability_V9")
        }

        fn get_hdcp_capability(&self, current: &mut HdcpCapability, maximum: &mut HdcpCapability) -> OemCryptoResult {
            *current = HdcpCapability::V2_2;
            *maximum = HdcpCapability::V2_2;
            self.hit("GetHDCPCapability")
        }

        fn generic_encrypt(
            &self,
            _: u32,
            input: &[u8],
            iv: &[u8; 16],
            _: Algorithm,
            output: &mut [u8],
        ) -> OemCryptoResult {
            self.ivs.lock().expect("ivs").push(*iv);
            for (out, byte) in output.iter_mut().zip(input) {
                *out = byte.wrapping_add(1);
            }
            self.hit("Generic_Encrypt")
        }

        fn generic_decrypt(
            &self,
            _: u32,
            input: &[u8],
            iv: &[u8; 16],
            _: Algorithm,
            output: &mut [u8],
        ) -> OemCryptoResult {
            self.ivs.lock().expect("ivs").push(*iv);
            for (out, byte) in output.iter_mut().zip(input) {
                *out = byte.wrapping_sub(1);
            }
            self.hit("Generic_Decrypt")
        }

        fn deactivate_usage_entry_v12(&self, _: &[u8]) -> OemCryptoResult {
            self.hit("DeactivateUsageEntry_V12")
        }

        fn deactivate_usage_entry(&self, _: u32, _: &[u8]) -> OemCryptoResult {
            self.hit("DeactivateUsageEntry")
        }

        fn force_delete_usage_entry(&self, _: &[u8]) -> OemCryptoResult {
            self.hit("ForceDeleteUsageEntry")
        }

        fn delete_old_usage_table(&self) -> OemCryptoResult {
            self.hit("DeleteOldUsageTable")
        }

        fn create_new_usage_entry(&self, _: u32, index: &mut u32) -> OemCryptoResult {
            *index = 5;
            self.hit("CreateNewUsageEntry")
        }

        fn load_usage_entry(&self, session: u32, index: u32, _: &[u8]) -> OemCryptoResult {
            self.loaded.lock().expect("loaded").insert(session, index);
            self.hit("LoadUsageEntry")
        }

        fn update_usage_entry(
            &self,
            _: u32,
            _: &mut [u8],
            header_length: &mut usize,
            _: &mut [u8],
            entry_length: &mut usize,
        ) -> OemCryptoResult {
            *header_length = 64;
            *entry_length = 256;
            self.hit("UpdateUsageEntry")
        }
    }

    fn config(dir: &Path) -> AdapterConfig {
        AdapterConfig::default()
            .with_device_files(dir)
            .with_abort_policy(AbortPolicy::ReturnError)
    }

    fn journal() -> Journal {
        Arc::new(Mutex::new(Vec::new()))
    }

    fn entries(journal: &Journal, prefix: &str) -> Vec<String> {
        journal
            .lock()
            .expect("journal")
            .iter()
            .filter(|entry| entry.starts_with(prefix))
            .cloned()
            .collect()
    }

    fn start(dir: &Path, software: Fake, hardware: Fake) -> Adapter {
        Adapter::initialize_with(
            config(dir),
            Arc::new(software),
            Level1Source::Engine(Arc::new(hardware)),
        )
        .expect("initialize")
    }

    #[test]
    fn missing_library_path_falls_back_to_level3() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = journal();
        let adapter = Adapter::initialize_with(
            config(dir.path()),
            Arc::new(Fake::new("L3", 14, &log)),
            Level1Source::Configured,
        )
        .expect("initialize");

        assert_eq!(adapter.metrics().mode, Some(InitializationMode::L3NoL1LibraryPath));
        assert_eq!(adapter.default_kind(), ImplementationKind::Software);
        assert_eq!(adapter.api_version(SecurityLevel::Default), 14);
        assert!(adapter.implementation(ImplementationKind::Hardware).is_none());
    }

    #[test]
    fn level1_that_fails_to_initialize_is_dropped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = journal();
        let hardware = Fake {
            initialize: OemCryptoResult::ERROR_INIT_FAILED,
            ..Fake::new("L1", 14, &log)
        };
        let adapter = start(dir.path(), Fake::new("L3", 14, &log), hardware);

        assert_eq!(adapter.metrics().mode, Some(InitializationMode::L3CouldNotInitializeL1));
        assert_eq!(adapter.default_kind(), ImplementationKind::Software);
    }

    #[test]
    fn old_level1_is_terminated_and_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = journal();
        let adapter = start(dir.path(), Fake::new("L3", 14, &log), Fake::new("L1", 7, &log));

        assert_eq!(adapter.metrics().mode, Some(InitializationMode::L3WrongL1Version));
        assert_eq!(adapter.metrics().l1_api_version, Some(7));
        assert_eq!(adapter.metrics().l1_min_api_version, Some(MIN_API_VERSION));
        assert_eq!(entries(&log, "L1:"), vec!["L1:Initialize", "L1:Terminate"]);
    }

    #[test]
    fn bad_keybox_without_factory_file_falls_back() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = journal();
        let hardware = Fake {
            keybox_valid: false,
            ..Fake::new("L1", 14, &log)
        };
        let adapter = start(dir.path(), Fake::new("L3", 14, &log), hardware);

        assert_eq!(adapter.metrics().mode, Some(InitializationMode::L3BadKeybox));
        assert_eq!(adapter.default_kind(), ImplementationKind::Software);
        assert!(entries(&log, "L1:").contains(&"L1:Terminate".to_string()));
    }

    #[test]
    fn forced_level3_never_touches_level1() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = journal();
        let adapter = Adapter::initialize_with(
            config(dir.path()).with_force_level3(true),
            Arc::new(Fake::new("L3", 14, &log)),
            Level1Source::Engine(Arc::new(Fake::new("L1", 14, &log))),
        )
        .expect("initialize");

        assert_eq!(adapter.metrics().mode, Some(InitializationMode::ForcingL3));
        assert_eq!(adapter.default_kind(), ImplementationKind::Software);
        assert!(entries(&log, "L1:").is_empty());
    }

    #[test]
    fn in_app_engine_runs_alone() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = journal();
        let software = Fake {
            in_app: true,
            ..Fake::new("L3", 14, &log)
        };
        let adapter = start(dir.path(), software, Fake::new("L1", 14, &log));

        assert_eq!(adapter.metrics().mode, Some(InitializationMode::UsingInApp));
        assert!(entries(&log, "L1:").is_empty());
    }

    #[test]
    fn level3_initialize_failure_is_fatal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = journal();
        let software = Fake {
            initialize: OemCryptoResult::ERROR_INIT_FAILED,
            ..Fake::new("L3", 14, &log)
        };
        let err = Adapter::initialize_with(config(dir.path()), Arc::new(software), Level1Source::Configured)
            .expect_err("fails");
        assert!(matches!(err, Error::InitializationFailure(_)));
    }

    #[test]
    fn sessions_from_both_levels_stay_disjoint() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = journal();
        let adapter = start(dir.path(), Fake::new("L3", 14, &log), Fake::new("L1", 14, &log));
        assert_eq!(adapter.metrics().mode, Some(InitializationMode::L1WithKeybox));

        let hardware = adapter.open_session(SecurityLevel::Default).expect("open");
        let software = adapter.open_session(SecurityLevel::Level3).expect("open");
        assert_eq!(hardware.id, software.id);
        assert_ne!(hardware, software);
        assert_eq!(hardware.owner, ImplementationKind::Hardware);
        assert_eq!(software.owner, ImplementationKind::Software);

        adapter.close_session(software).expect("close");
        let err = adapter.close_session(software).expect_err("already closed");
        assert!(matches!(err, Error::InvalidSession(id) if id == software));
        assert_eq!(adapter.session_count(), 1);
        assert_eq!(entries(&log, "L3:CloseSession").len(), 1);
    }

    #[test]
    fn unknown_session_is_rejected_before_dispatch() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = journal();
        let adapter = start(dir.path(), Fake::new("L3", 14, &log), Fake::new("L1", 14, &log));
        let stale = SessionId::new(ImplementationKind::Hardware, 42);

        let err = adapter.generate_nonce(stale).expect_err("unknown");
        assert!(matches!(err, Error::InvalidSession(_)));
        assert_eq!(entries(&log, "L1:").len(), 1);
    }

    #[test]
    fn hdcp_on_v9_uses_the_byte_query() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = journal();
        let adapter = start(dir.path(), Fake::new("L3", 14, &log), Fake::new("L1", 9, &log));

        let capability = adapter.get_hdcp_capability(SecurityLevel::Default).expect("hdcp");
        assert_eq!(capability, (HdcpCapability::V2, HdcpCapability::V2_2));
        assert!(entries(&log, "L1:").contains(&"L1:GetHDCPCapability_V9".to_string()));
    }

    #[test]
    fn entitlement_licenses_are_not_implemented_on_v10() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = journal();
        let adapter = start(dir.path(), Fake::new("L3", 14, &log), Fake::new("L1", 10, &log));
        let session = adapter.open_session(SecurityLevel::Default).expect("open");

        let keys: [KeyObject<'_>; 0] = [];
        let request = LoadKeysRequest {
            signed: SignedMessage {
                message: b"license",
                signature: &[0; 32],
                enc_mac_key_iv: None,
                enc_mac_key: None,
            },
            keys: &keys,
            pst: None,
            srm_requirement: None,
            license_type: LicenseType::EntitlementLicense,
        };
        let err = adapter.load_keys(session, &request).expect_err("entitlement");
        assert!(matches!(err, Error::NotImplemented));

        let request = LoadKeysRequest {
            license_type: LicenseType::ContentLicense,
            ..request
        };
        adapter.load_keys(session, &request).expect("content license");
        assert!(entries(&log, "L1:").contains(&"L1:LoadKeys_V9_or_V10".to_string()));
    }

    #[test]
    fn reloading_a_usage_entry_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = journal();
        let hardware = Arc::new(Fake::new("L1", 14, &log));
        let adapter = Adapter::initialize_with(
            config(dir.path()),
            Arc::new(Fake::new("L3", 14, &log)),
            Level1Source::Engine(hardware.clone()),
        )
        .expect("initialize");
        let session = adapter.open_session(SecurityLevel::Default).expect("open");

        let index = adapter.create_new_usage_entry(session).expect("create");
        let (mut header, mut entry) = ([0u8; 64], [0u8; 256]);
        let lengths = adapter
            .update_usage_entry(session, &mut header, &mut entry)
            .expect("update");
        assert_eq!(lengths, (64, 256));

        adapter.load_usage_entry(session, index, &entry).expect("load");
        let first = hardware.loaded.lock().expect("loaded").clone();
        adapter.load_usage_entry(session, index, &entry).expect("reload");
        assert_eq!(*hardware.loaded.lock().expect("loaded"), first);
        assert_eq!(first.get(&session.id), Some(&5));
    }

    #[test]
    fn short_update_buffers_report_the_larger_length() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = journal();
        let hardware = Fake::new("L1", 14, &log).returning("UpdateUsageEntry", OemCryptoResult::ERROR_SHORT_BUFFER);
        let adapter = start(dir.path(), Fake::new("L3", 14, &log), hardware);
        let session = adapter.open_session(SecurityLevel::Default).expect("open");

        let err = adapter
            .update_usage_entry(session, &mut [], &mut [])
            .expect_err("short");
        assert!(matches!(err, Error::ShortBuffer { required: 256 }));
    }

    #[test]
    fn signature_lengths_come_back_from_the_engine() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = journal();
        let adapter = start(dir.path(), Fake::new("L3", 14, &log), Fake::new("L1", 14, &log));
        let session = adapter.open_session(SecurityLevel::Default).expect("open");

        let mut signature = [0u8; 64];
        let length = adapter
            .generate_signature(session, b"message", &mut signature)
            .expect("sign");
        assert_eq!(length, 32);
    }

    #[test]
    fn generic_crypto_chains_ivs_across_chunks() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = journal();
        let hardware = Arc::new(Fake::new("L1", 14, &log));
        let adapter = Adapter::initialize_with(
            config(dir.path()),
            Arc::new(Fake::new("L3", 14, &log)),
            Level1Source::Engine(hardware.clone()),
        )
        .expect("initialize");
        let session = adapter.open_session(SecurityLevel::Default).expect("open");

        let input: Vec<u8> = (0..2 * MAX_GENERIC_CHUNK + 32).map(|i| (i % 251) as u8).collect();
        let iv = [7u8; 16];
        let mut output = vec![0u8; input.len()];
        adapter
            .generic_encrypt(session, &input, &iv, Algorithm::AesCbc128NoPadding, &mut output)
            .expect("encrypt");

        let ivs = std::mem::take(&mut *hardware.ivs.lock().expect("ivs"));
        assert_eq!(ivs.len(), 3);
        assert_eq!(ivs[0], iv);
        assert_eq!(ivs[1][..], output[MAX_GENERIC_CHUNK - 16..MAX_GENERIC_CHUNK]);
        assert_eq!(ivs[2][..], output[2 * MAX_GENERIC_CHUNK - 16..2 * MAX_GENERIC_CHUNK]);

        let mut plain = vec![0u8; input.len()];
        adapter
            .generic_decrypt(session, &output, &iv, Algorithm::AesCbc128NoPadding, &mut plain)
            .expect("decrypt");
        let ivs = hardware.ivs.lock().expect("ivs").clone();
        assert_eq!(ivs[1][..], output[MAX_GENERIC_CHUNK - 16..MAX_GENERIC_CHUNK]);
        assert_eq!(plain, input);
    }

    #[test]
    fn generic_crypto_stops_at_the_first_failure() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = journal();
        let hardware = Fake::new("L1", 14, &log).returning("Generic_Encrypt", OemCryptoResult::ERROR_DECRYPT_FAILED);
        let adapter = start(dir.path(), Fake::new("L3", 14, &log), hardware);
        let session = adapter.open_session(SecurityLevel::Default).expect("open");

        let input = vec![0u8; 3 * MAX_GENERIC_CHUNK];
        let mut output = vec![0u8; input.len()];
        let err = adapter
            .generic_encrypt(session, &input, &[0; 16], Algorithm::AesCbc128NoPadding, &mut output)
            .expect_err("fails");
        assert!(matches!(err, Error::Underlying(OemCryptoResult::ERROR_DECRYPT_FAILED)));
        assert_eq!(entries(&log, "L1:Generic_Encrypt").len(), 1);
    }

    #[test]
    fn force_delete_prefers_a_level1_success() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = journal();
        let software =
            Fake::new("L3", 12, &log).returning("ForceDeleteUsageEntry", OemCryptoResult::ERROR_UNKNOWN_FAILURE);
        let adapter = start(dir.path(), software, Fake::new("L1", 11, &log));

        adapter.force_delete_usage_entry(b"pst").expect("deleted on L1");
        assert_eq!(
            entries(&log, "").into_iter().filter(|e| e.ends_with(":ForceDeleteUsageEntry")).collect::<Vec<_>>(),
            vec!["L3:ForceDeleteUsageEntry", "L1:ForceDeleteUsageEntry"]
        );
    }

    #[test]
    fn delete_old_usage_table_reports_level1() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = journal();
        let hardware =
            Fake::new("L1", 12, &log).returning("DeleteOldUsageTable", OemCryptoResult::ERROR_UNKNOWN_FAILURE);
        let adapter = start(dir.path(), Fake::new("L3", 14, &log), hardware);

        let err = adapter.delete_old_usage_table().expect_err("L1 failed");
        assert!(matches!(err, Error::Underlying(OemCryptoResult::ERROR_UNKNOWN_FAILURE)));
        assert_eq!(entries(&log, "L3:DeleteOldUsageTable").len(), 1);
    }

    #[test]
    fn deactivate_without_session_tries_level3_next() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = journal();
        let hardware =
            Fake::new("L1", 13, &log).returning("DeactivateUsageEntry", OemCryptoResult::ERROR_INVALID_SESSION);
        let adapter = start(dir.path(), Fake::new("L3", 12, &log), hardware);
        let unknown = SessionId::new(ImplementationKind::Hardware, 99);

        adapter.deactivate_usage_entry(unknown, b"pst").expect("deactivated on L3");
        assert_eq!(
            entries(&log, "").into_iter().filter(|e| e.contains(":Deactivate")).collect::<Vec<_>>(),
            vec!["L1:DeactivateUsageEntry", "L3:DeactivateUsageEntry_V12"]
        );
    }

    #[test]
    fn deactivate_on_a_module_without_the_entry_point_is_an_invalid_session() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = journal();
        let hardware = Fake::new("L1", 12, &log).without(Operation::DeactivateUsageEntryV12);
        let adapter = start(dir.path(), Fake::new("L3", 14, &log), hardware);
        let session = adapter.open_session(SecurityLevel::Default).expect("open");

        let err = adapter.deactivate_usage_entry(session, b"pst").expect_err("no entry point");
        assert!(matches!(err, Error::InvalidSession(id) if id == session));
        assert!(entries(&log, "L1:Deactivate").is_empty());
    }

    #[test]
    fn old_modules_answer_queries_with_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = journal();
        let adapter = start(dir.path(), Fake::new("L3", 14, &log), Fake::new("L1", 10, &log));

        assert_eq!(adapter.security_patch_level(SecurityLevel::Default), 0);
        assert_eq!(adapter.security_level(SecurityLevel::Default), "");
        assert_eq!(
            adapter.get_provisioning_method(SecurityLevel::Default),
            ProvisioningMethod::Keybox
        );
        assert_eq!(
            adapter.supported_certificates(SecurityLevel::Default),
            certificate::RSA_2048
        );
        assert_eq!(
            adapter.get_analog_output_flags(SecurityLevel::Default),
            crate::types::analog_output::UNKNOWN
        );
        assert!(!adapter.is_srm_update_supported());
        assert!(matches!(adapter.load_srm(b"srm"), Err(Error::NotImplemented)));
    }

    #[test]
    fn previous_watchdog_failure_is_reported_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let flag = config(dir.path()).failure_file_path();
        std::fs::write(&flag, [1u8]).expect("write flag");

        let log = journal();
        let adapter = Adapter::initialize_with(
            config(dir.path()),
            Arc::new(Fake::new("L3", 14, &log)),
            Level1Source::Configured,
        )
        .expect("initialize");
        assert!(adapter.metrics().previous_l3_failure);
        assert_eq!(
            adapter.metrics().history.first(),
            Some(&InitializationMode::L3InitializationFailed)
        );
        assert!(!flag.exists());
        drop(adapter);

        let adapter = Adapter::initialize_with(
            config(dir.path()),
            Arc::new(Fake::new("L3", 14, &log)),
            Level1Source::Configured,
        )
        .expect("initialize");
        assert!(!adapter.metrics().previous_l3_failure);
    }

    #[test]
    fn terminate_closes_sessions_then_both_levels() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = journal();
        let adapter = start(dir.path(), Fake::new("L3", 14, &log), Fake::new("L1", 14, &log));
        adapter.open_session(SecurityLevel::Default).expect("open");
        adapter.open_session(SecurityLevel::Level3).expect("open");
        log.lock().expect("journal").clear();

        adapter.terminate().expect("terminate");
        assert_eq!(
            *log.lock().expect("journal"),
            vec!["L1:CloseSession", "L3:CloseSession", "L3:Terminate", "L1:Terminate"]
        );
    }
}
