//! [`Engine`] backed by resolved C entry points.
use std::ffi::CStr;
use std::fmt;
use std::path::Path;
use std::ptr;
use std::sync::Arc;

use crate::engine::Engine;
use crate::error::Result;
use crate::ffi::{self, opt_len, opt_ptr};
use crate::symbols::{self, NativeLibrary, Operation, ResolveFailure, SymbolMap, SymbolSource};
use crate::types::{
    analog_output, Algorithm, CipherMode, DestBuffer, EncryptPattern, EntitledContentKeyObject,
    HdcpCapability, KeyObject, KeyObjectV13, KeyRefreshObject, LoadKeysRequest, OemCryptoResult,
    OldUsageEntry, ProvisioningMethod, RewrapRequest, RewrapRequest30, RsaPaddingScheme,
    SampleDescription,
};

/// Call the resolved entry point for `$op`, or report it as not implemented.
macro_rules! forward {
    ($self:ident, $op:ident as $ty:ty, |$f:ident| $call:expr) => {
        // SAFETY: entries are resolved from the table under the signature
        // the module exports for that operation.
        match unsafe { $self.symbols.get::<$ty>(Operation::$op) } {
            Some($f) => unsafe { $call },
            None => OemCryptoResult::ERROR_NOT_IMPLEMENTED,
        }
    };
}

fn in_ptr(bytes: &[u8]) -> *const u8 {
    if bytes.is_empty() {
        ptr::null()
    } else {
        bytes.as_ptr()
    }
}

fn out_ptr(bytes: &mut [u8]) -> *mut u8 {
    if bytes.is_empty() {
        ptr::null_mut()
    } else {
        bytes.as_mut_ptr()
    }
}

fn array_ptr<T>(items: &[T]) -> *const T {
    if items.is_empty() {
        ptr::null()
    } else {
        items.as_ptr()
    }
}

/// An OEMCrypto implementation living in native code.
pub struct NativeEngine {
    name: String,
    version: u32,
    symbols: SymbolMap,
    // Keeps the module mapped for as long as the entry points are reachable.
    _library: Option<Arc<NativeLibrary>>,
}

impl NativeEngine {
    /// Load and resolve a Level 1 module from `path`.
    pub fn load(path: &Path) -> Result<std::result::Result<Self, ResolveFailure>> {
        let library = NativeLibrary::open(path)?;
        let name = library.name().to_string();
        Ok(symbols::resolve(&library).map(|resolution| Self {
            name,
            version: resolution.version,
            symbols: resolution.symbols,
            _library: Some(Arc::new(library)),
        }))
    }

    /// Resolve a Level 1 module from an arbitrary symbol source.
    pub fn from_source(
        name: impl Into<String>,
        source: &dyn SymbolSource,
    ) -> std::result::Result<Self, ResolveFailure> {
        let resolution = symbols::resolve(source)?;
        Ok(Self {
            name: name.into(),
            version: resolution.version,
            symbols: resolution.symbols,
            _library: None,
        })
    }

    /// Bind the built-in Level 3 engine from its statically linked symbols.
    pub fn software(source: &dyn SymbolSource) -> Result<Self> {
        let symbols = symbols::resolve_software(source)?;
        let mut engine = Self {
            name: "level3".to_string(),
            version: 0,
            symbols,
            _library: None,
        };
        engine.version = forward_version(&engine);
        Ok(engine)
    }

    /// The built-in engine linked into the running process.
    pub fn software_from_process() -> Result<Self> {
        let image = NativeLibrary::process_image()?;
        let mut engine = Self::software(&image)?;
        engine._library = Some(Arc::new(image));
        Ok(engine)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn symbols(&self) -> &SymbolMap {
        &self.symbols
    }
}

fn forward_version(engine: &NativeEngine) -> u32 {
    // SAFETY: resolved under the APIVersion signature.
    match unsafe { engine.symbols.get::<ffi::ApiVersionFn>(Operation::ApiVersion) } {
        Some(f) => unsafe { f() },
        None => 0,
    }
}

impl fmt::Debug for NativeEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeEngine")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("symbols", &self.symbols.len())
            .finish()
    }
}

impl Engine for NativeEngine {
    fn provides(&self, operation: Operation) -> bool {
        self.symbols.contains(operation)
    }

    fn api_version(&self) -> u32 {
        self.version
    }

    fn initialize(&self) -> OemCryptoResult {
        forward!(self, Initialize as ffi::InitializeFn, |f| f())
    }

    fn terminate(&self) -> OemCryptoResult {
        forward!(self, Terminate as ffi::TerminateFn, |f| f())
    }

    fn is_in_app(&self) -> bool {
        match unsafe { self.symbols.get::<ffi::IsInAppFn>(Operation::IsInApp) } {
            Some(f) => unsafe { f() },
            None => false,
        }
    }

    fn dump_state(&self) {
        // Null buffers on session 0 make the built-in engine log its state.
        if let Some(f) = unsafe { self.symbols.get::<ffi::DumpStateFn>(Operation::GetOemPublicCertificate) } {
            unsafe {
                f(0, ptr::null_mut(), ptr::null_mut());
            }
        }
    }

    fn open_session(&self, session: &mut u32) -> OemCryptoResult {
        forward!(self, OpenSession as ffi::OpenSessionFn, |f| f(session))
    }

    fn close_session(&self, session: u32) -> OemCryptoResult {
        forward!(self, CloseSession as ffi::CloseSessionFn, |f| f(session))
    }

    fn generate_derived_keys(
        &self,
        session: u32,
        mac_key_context: &[u8],
        enc_key_context: &[u8],
    ) -> OemCryptoResult {
        let (Ok(mac_length), Ok(enc_length)) = (
            u32::try_from(mac_key_context.len()),
            u32::try_from(enc_key_context.len()),
        ) else {
            return OemCryptoResult::ERROR_BUFFER_TOO_LARGE;
        };
        forward!(self, GenerateDerivedKeys as ffi::GenerateDerivedKeysFn, |f| f(
            session,
            in_ptr(mac_key_context),
            mac_length,
            in_ptr(enc_key_context),
            enc_length
        ))
    }

    fn generate_nonce(&self, session: u32, nonce: &mut u32) -> OemCryptoResult {
        forward!(self, GenerateNonce as ffi::GenerateNonceFn, |f| f(session, nonce))
    }

    fn generate_signature(
        &self,
        session: u32,
        message: &[u8],
        signature: &mut [u8],
        signature_length: &mut usize,
    ) -> OemCryptoResult {
        forward!(self, GenerateSignature as ffi::GenerateSignatureFn, |f| f(
            session,
            in_ptr(message),
            message.len(),
            out_ptr(signature),
            signature_length
        ))
    }

    fn load_keys(&self, session: u32, request: &LoadKeysRequest<'_, KeyObject<'_>>) -> OemCryptoResult {
        let keys: Vec<ffi::OEMCrypto_KeyObject> = request.keys.iter().map(Into::into).collect();
        let signed = &request.signed;
        forward!(self, LoadKeys as ffi::LoadKeysFn, |f| f(
            session,
            in_ptr(signed.message),
            signed.message.len(),
            in_ptr(signed.signature),
            signed.signature.len(),
            opt_ptr(signed.enc_mac_key_iv),
            opt_ptr(signed.enc_mac_key),
            keys.len(),
            array_ptr(&keys),
            opt_ptr(request.pst),
            opt_len(request.pst),
            opt_ptr(request.srm_requirement),
            request.license_type as u32
        ))
    }

    fn load_keys_v13(
        &self,
        session: u32,
        request: &LoadKeysRequest<'_, KeyObjectV13<'_>>,
    ) -> OemCryptoResult {
        let keys: Vec<ffi::OEMCrypto_KeyObject_V13> = request.keys.iter().map(Into::into).collect();
        let signed = &request.signed;
        forward!(self, LoadKeysV13 as ffi::LoadKeysV13Fn, |f| f(
            session,
            in_ptr(signed.message),
            signed.message.len(),
            in_ptr(signed.signature),
            signed.signature.len(),
            opt_ptr(signed.enc_mac_key_iv),
            opt_ptr(signed.enc_mac_key),
            keys.len(),
            array_ptr(&keys),
            opt_ptr(request.pst),
            opt_len(request.pst),
            opt_ptr(request.srm_requirement)
        ))
    }

    fn load_keys_v11_or_v12(
        &self,
        session: u32,
        request: &LoadKeysRequest<'_, KeyObjectV13<'_>>,
    ) -> OemCryptoResult {
        let keys: Vec<ffi::OEMCrypto_KeyObject_V13> = request.keys.iter().map(Into::into).collect();
        let signed = &request.signed;
        forward!(self, LoadKeysV11OrV12 as ffi::LoadKeysV11OrV12Fn, |f| f(
            session,
            in_ptr(signed.message),
            signed.message.len(),
            in_ptr(signed.signature),
            signed.signature.len(),
            opt_ptr(signed.enc_mac_key_iv),
            opt_ptr(signed.enc_mac_key),
            keys.len(),
            array_ptr(&keys),
            opt_ptr(request.pst),
            opt_len(request.pst)
        ))
    }

    fn load_keys_v9_or_v10(
        &self,
        session: u32,
        request: &LoadKeysRequest<'_, KeyObject<'_>>,
    ) -> OemCryptoResult {
        let keys: Vec<ffi::OEMCrypto_KeyObject> = request.keys.iter().map(Into::into).collect();
        let signed = &request.signed;
        forward!(self, LoadKeysV9OrV10 as ffi::LoadKeysV9OrV10Fn, |f| f(
            session,
            in_ptr(signed.message),
            signed.message.len(),
            in_ptr(signed.signature),
            signed.signature.len(),
            opt_ptr(signed.enc_mac_key_iv),
            opt_ptr(signed.enc_mac_key),
            keys.len(),
            array_ptr(&keys),
            opt_ptr(request.pst),
            opt_len(request.pst)
        ))
    }

    fn load_keys_v8(&self, session: u32, request: &LoadKeysRequest<'_, KeyObject<'_>>) -> OemCryptoResult {
        let keys: Vec<ffi::OEMCrypto_KeyObject> = request.keys.iter().map(Into::into).collect();
        let signed = &request.signed;
        forward!(self, LoadKeysV8 as ffi::LoadKeysV8Fn, |f| f(
            session,
            in_ptr(signed.message),
            signed.message.len(),
            in_ptr(signed.signature),
            signed.signature.len(),
            opt_ptr(signed.enc_mac_key_iv),
            opt_ptr(signed.enc_mac_key),
            keys.len(),
            array_ptr(&keys)
        ))
    }

    fn load_entitled_content_keys(
        &self,
        session: u32,
        keys: &[EntitledContentKeyObject<'_>],
    ) -> OemCryptoResult {
        let raw: Vec<ffi::OEMCrypto_EntitledContentKeyObject> = keys.iter().map(Into::into).collect();
        forward!(self, LoadEntitledContentKeys as ffi::LoadEntitledContentKeysFn, |f| f(
            session,
            raw.len(),
            array_ptr(&raw)
        ))
    }

    fn refresh_keys(
        &self,
        session: u32,
        message: &[u8],
        signature: &[u8],
        keys: &[KeyRefreshObject<'_>],
    ) -> OemCryptoResult {
        let raw: Vec<ffi::OEMCrypto_KeyRefreshObject> = keys.iter().map(Into::into).collect();
        forward!(self, RefreshKeys as ffi::RefreshKeysFn, |f| f(
            session,
            in_ptr(message),
            message.len(),
            in_ptr(signature),
            signature.len(),
            raw.len(),
            array_ptr(&raw)
        ))
    }

    fn query_key_control(
        &self,
        session: u32,
        key_id: &[u8],
        key_control_block: &mut [u8],
        key_control_block_length: &mut usize,
    ) -> OemCryptoResult {
        forward!(self, QueryKeyControl as ffi::QueryKeyControlFn, |f| f(
            session,
            in_ptr(key_id),
            key_id.len(),
            out_ptr(key_control_block),
            key_control_block_length
        ))
    }

    fn select_key(&self, session: u32, key_id: &[u8], cipher_mode: CipherMode) -> OemCryptoResult {
        forward!(self, SelectKey as ffi::SelectKeyFn, |f| f(
            session,
            in_ptr(key_id),
            key_id.len(),
            cipher_mode as u32
        ))
    }

    fn select_key_v13(&self, session: u32, key_id: &[u8]) -> OemCryptoResult {
        forward!(self, SelectKeyV13 as ffi::SelectKeyV13Fn, |f| f(
            session,
            in_ptr(key_id),
            key_id.len()
        ))
    }

    fn decrypt_cenc(
        &self,
        session: u32,
        sample: &SampleDescription<'_>,
        out: &mut DestBuffer<'_>,
        pattern: &EncryptPattern,
    ) -> OemCryptoResult {
        let mut desc = ffi::OEMCrypto_DestBufferDesc::from(out);
        let pattern = ffi::OEMCrypto_CENCEncryptPatternDesc::from(pattern);
        forward!(self, DecryptCenc as ffi::DecryptCencFn, |f| f(
            session,
            in_ptr(sample.data),
            sample.data.len(),
            sample.is_encrypted,
            sample.iv.as_ptr(),
            sample.block_offset,
            &mut desc,
            &pattern,
            sample.subsample_flags
        ))
    }

    fn decrypt_ctr_v10(
        &self,
        session: u32,
        sample: &SampleDescription<'_>,
        out: &mut DestBuffer<'_>,
    ) -> OemCryptoResult {
        let desc = ffi::OEMCrypto_DestBufferDesc::from(out);
        forward!(self, DecryptCtrV10 as ffi::DecryptCtrV10Fn, |f| f(
            session,
            in_ptr(sample.data),
            sample.data.len(),
            sample.is_encrypted,
            sample.iv.as_ptr(),
            sample.block_offset,
            &desc,
            sample.subsample_flags
        ))
    }

    fn copy_buffer(&self, data: &[u8], out: &mut DestBuffer<'_>, subsample_flags: u8) -> OemCryptoResult {
        let mut desc = ffi::OEMCrypto_DestBufferDesc::from(out);
        forward!(self, CopyBuffer as ffi::CopyBufferFn, |f| f(
            in_ptr(data),
            data.len(),
            &mut desc,
            subsample_flags
        ))
    }

    fn wrap_keybox(
        &self,
        keybox: &[u8],
        wrapped: &mut [u8],
        wrapped_length: &mut usize,
        transport_key: &[u8],
    ) -> OemCryptoResult {
        forward!(self, WrapKeybox as ffi::WrapKeyboxFn, |f| f(
            in_ptr(keybox),
            keybox.len(),
            out_ptr(wrapped),
            wrapped_length,
            in_ptr(transport_key),
            transport_key.len()
        ))
    }

    fn install_keybox(&self, keybox: &[u8]) -> OemCryptoResult {
        forward!(self, InstallKeybox as ffi::InstallKeyboxFn, |f| f(in_ptr(keybox), keybox.len()))
    }

    fn load_test_keybox(&self, buffer: &[u8]) -> OemCryptoResult {
        forward!(self, LoadTestKeybox as ffi::LoadTestKeyboxFn, |f| f(in_ptr(buffer), buffer.len()))
    }

    fn load_test_keybox_v13(&self) -> OemCryptoResult {
        forward!(self, LoadTestKeyboxV13 as ffi::LoadTestKeyboxV13Fn, |f| f())
    }

    fn is_keybox_valid(&self) -> OemCryptoResult {
        forward!(self, IsKeyboxValid as ffi::IsKeyboxValidFn, |f| f())
    }

    fn get_device_id(&self, device_id: &mut [u8], device_id_length: &mut usize) -> OemCryptoResult {
        forward!(self, GetDeviceId as ffi::GetDeviceIdFn, |f| f(out_ptr(device_id), device_id_length))
    }

    fn get_key_data(&self, key_data: &mut [u8], key_data_length: &mut usize) -> OemCryptoResult {
        forward!(self, GetKeyData as ffi::GetKeyDataFn, |f| f(out_ptr(key_data), key_data_length))
    }

    fn get_random(&self, data: &mut [u8]) -> OemCryptoResult {
        forward!(self, GetRandom as ffi::GetRandomFn, |f| f(out_ptr(data), data.len()))
    }

    fn rewrap_device_rsa_key(
        &self,
        session: u32,
        request: &RewrapRequest<'_>,
        wrapped_rsa_key: &mut [u8],
        wrapped_rsa_key_length: &mut usize,
    ) -> OemCryptoResult {
        forward!(self, RewrapDeviceRsaKey as ffi::RewrapDeviceRsaKeyFn, |f| f(
            session,
            in_ptr(request.message),
            request.message.len(),
            in_ptr(request.signature),
            request.signature.len(),
            &request.nonce,
            in_ptr(request.enc_rsa_key),
            request.enc_rsa_key.len(),
            in_ptr(request.enc_rsa_key_iv),
            out_ptr(wrapped_rsa_key),
            wrapped_rsa_key_length
        ))
    }

    fn rewrap_device_rsa_key30(
        &self,
        session: u32,
        request: &RewrapRequest30<'_>,
        wrapped_rsa_key: &mut [u8],
        wrapped_rsa_key_length: &mut usize,
    ) -> OemCryptoResult {
        forward!(self, RewrapDeviceRsaKey30 as ffi::RewrapDeviceRsaKey30Fn, |f| f(
            session,
            &request.nonce,
            in_ptr(request.encrypted_message_key),
            request.encrypted_message_key.len(),
            in_ptr(request.enc_rsa_key),
            request.enc_rsa_key.len(),
            in_ptr(request.enc_rsa_key_iv),
            out_ptr(wrapped_rsa_key),
            wrapped_rsa_key_length
        ))
    }

    fn load_device_rsa_key(&self, session: u32, wrapped_rsa_key: &[u8]) -> OemCryptoResult {
        forward!(self, LoadDeviceRsaKey as ffi::LoadDeviceRsaKeyFn, |f| f(
            session,
            in_ptr(wrapped_rsa_key),
            wrapped_rsa_key.len()
        ))
    }

    fn load_test_rsa_key(&self) -> OemCryptoResult {
        forward!(self, LoadTestRsaKey as ffi::LoadTestRsaKeyFn, |f| f())
    }

    fn generate_rsa_signature(
        &self,
        session: u32,
        message: &[u8],
        signature: &mut [u8],
        signature_length: &mut usize,
        padding: RsaPaddingScheme,
    ) -> OemCryptoResult {
        forward!(self, GenerateRsaSignature as ffi::GenerateRsaSignatureFn, |f| f(
            session,
            in_ptr(message),
            message.len(),
            out_ptr(signature),
            signature_length,
            padding as u32
        ))
    }

    fn generate_rsa_signature_v8(
        &self,
        session: u32,
        message: &[u8],
        signature: &mut [u8],
        signature_length: &mut usize,
    ) -> OemCryptoResult {
        forward!(self, GenerateRsaSignatureV8 as ffi::GenerateRsaSignatureV8Fn, |f| f(
            session,
            in_ptr(message),
            message.len(),
            out_ptr(signature),
            signature_length
        ))
    }

    fn derive_keys_from_session_key(
        &self,
        session: u32,
        enc_session_key: &[u8],
        mac_key_context: &[u8],
        enc_key_context: &[u8],
    ) -> OemCryptoResult {
        forward!(self, DeriveKeysFromSessionKey as ffi::DeriveKeysFromSessionKeyFn, |f| f(
            session,
            in_ptr(enc_session_key),
            enc_session_key.len(),
            in_ptr(mac_key_context),
            mac_key_context.len(),
            in_ptr(enc_key_context),
            enc_key_context.len()
        ))
    }

    fn security_patch_level(&self) -> u8 {
        match unsafe { self.symbols.get::<ffi::SecurityPatchLevelFn>(Operation::SecurityPatchLevel) } {
            Some(f) => unsafe { f() },
            None => 0,
        }
    }

    fn security_level(&self) -> Option<String> {
        let f = unsafe { self.symbols.get::<ffi::SecurityLevelFn>(Operation::SecurityLevel) }?;
        let level = unsafe { f() };
        if level.is_null() {
            return None;
        }
        Some(unsafe { CStr::from_ptr(level) }.to_string_lossy().into_owned())
    }

    fn get_hdcp_capability(
        &self,
        current: &mut HdcpCapability,
        maximum: &mut HdcpCapability,
    ) -> OemCryptoResult {
        let (mut raw_current, mut raw_maximum) = (0u32, 0u32);
        let status = forward!(self, GetHdcpCapability as ffi::GetHdcpCapabilityFn, |f| f(
            &mut raw_current,
            &mut raw_maximum
        ));
        *current = HdcpCapability::from_raw(raw_current);
        *maximum = HdcpCapability::from_raw(raw_maximum);
        status
    }

    fn get_hdcp_capability_v9(&self, current: &mut u8, maximum: &mut u8) -> OemCryptoResult {
        forward!(self, GetHdcpCapabilityV9 as ffi::GetHdcpCapabilityV9Fn, |f| f(current, maximum))
    }

    fn get_analog_output_flags(&self) -> u32 {
        match unsafe { self.symbols.get::<ffi::GetAnalogOutputFlagsFn>(Operation::GetAnalogOutputFlags) } {
            Some(f) => unsafe { f() },
            None => analog_output::UNKNOWN,
        }
    }

    fn supports_usage_table(&self) -> bool {
        match unsafe { self.symbols.get::<ffi::SupportsUsageTableFn>(Operation::SupportsUsageTable) } {
            Some(f) => unsafe { f() },
            None => false,
        }
    }

    fn is_anti_rollback_hw_present(&self) -> bool {
        match unsafe { self.symbols.get::<ffi::IsAntiRollbackHwPresentFn>(Operation::IsAntiRollbackHwPresent) } {
            Some(f) => unsafe { f() },
            None => false,
        }
    }

    fn get_number_of_open_sessions(&self, count: &mut usize) -> OemCryptoResult {
        forward!(self, GetNumberOfOpenSessions as ffi::GetNumberOfOpenSessionsFn, |f| f(count))
    }

    fn get_max_number_of_sessions(&self, maximum: &mut usize) -> OemCryptoResult {
        forward!(self, GetMaxNumberOfSessions as ffi::GetMaxNumberOfSessionsFn, |f| f(maximum))
    }

    fn generic_encrypt(
        &self,
        session: u32,
        input: &[u8],
        iv: &[u8; 16],
        algorithm: Algorithm,
        output: &mut [u8],
    ) -> OemCryptoResult {
        forward!(self, GenericEncrypt as ffi::GenericCryptFn, |f| f(
            session,
            in_ptr(input),
            input.len(),
            iv.as_ptr(),
            algorithm as u32,
            out_ptr(output)
        ))
    }

    fn generic_decrypt(
        &self,
        session: u32,
        input: &[u8],
        iv: &[u8; 16],
        algorithm: Algorithm,
        output: &mut [u8],
    ) -> OemCryptoResult {
        forward!(self, GenericDecrypt as ffi::GenericCryptFn, |f| f(
            session,
            in_ptr(input),
            input.len(),
            iv.as_ptr(),
            algorithm as u32,
            out_ptr(output)
        ))
    }

    fn generic_sign(
        &self,
        session: u32,
        input: &[u8],
        algorithm: Algorithm,
        signature: &mut [u8],
        signature_length: &mut usize,
    ) -> OemCryptoResult {
        forward!(self, GenericSign as ffi::GenericSignFn, |f| f(
            session,
            in_ptr(input),
            input.len(),
            algorithm as u32,
            out_ptr(signature),
            signature_length
        ))
    }

    fn generic_verify(
        &self,
        session: u32,
        input: &[u8],
        algorithm: Algorithm,
        signature: &[u8],
    ) -> OemCryptoResult {
        forward!(self, GenericVerify as ffi::GenericVerifyFn, |f| f(
            session,
            in_ptr(input),
            input.len(),
            algorithm as u32,
            in_ptr(signature),
            signature.len()
        ))
    }

    fn update_usage_table(&self) -> OemCryptoResult {
        forward!(self, UpdateUsageTable as ffi::UpdateUsageTableFn, |f| f())
    }

    fn deactivate_usage_entry_v12(&self, pst: &[u8]) -> OemCryptoResult {
        forward!(self, DeactivateUsageEntryV12 as ffi::DeactivateUsageEntryV12Fn, |f| f(
            in_ptr(pst),
            pst.len()
        ))
    }

    fn deactivate_usage_entry(&self, session: u32, pst: &[u8]) -> OemCryptoResult {
        forward!(self, DeactivateUsageEntry as ffi::DeactivateUsageEntryFn, |f| f(
            session,
            in_ptr(pst),
            pst.len()
        ))
    }

    fn report_usage(
        &self,
        session: u32,
        pst: &[u8],
        buffer: &mut [u8],
        buffer_length: &mut usize,
    ) -> OemCryptoResult {
        forward!(self, ReportUsage as ffi::ReportUsageFn, |f| f(
            session,
            in_ptr(pst),
            pst.len(),
            out_ptr(buffer),
            buffer_length
        ))
    }

    fn delete_usage_entry(
        &self,
        session: u32,
        pst: &[u8],
        message: &[u8],
        signature: &[u8],
    ) -> OemCryptoResult {
        forward!(self, DeleteUsageEntry as ffi::DeleteUsageEntryFn, |f| f(
            session,
            in_ptr(pst),
            pst.len(),
            in_ptr(message),
            message.len(),
            in_ptr(signature),
            signature.len()
        ))
    }

    fn force_delete_usage_entry(&self, pst: &[u8]) -> OemCryptoResult {
        forward!(self, ForceDeleteUsageEntry as ffi::ForceDeleteUsageEntryFn, |f| f(
            in_ptr(pst),
            pst.len()
        ))
    }

    fn delete_old_usage_table(&self) -> OemCryptoResult {
        forward!(self, DeleteOldUsageTable as ffi::DeleteOldUsageTableFn, |f| f())
    }

    fn get_provisioning_method(&self) -> ProvisioningMethod {
        match unsafe { self.symbols.get::<ffi::GetProvisioningMethodFn>(Operation::GetProvisioningMethod) } {
            Some(f) => ProvisioningMethod::from_raw(unsafe { f() }),
            None => ProvisioningMethod::ProvisioningError,
        }
    }

    fn get_oem_public_certificate(
        &self,
        session: u32,
        public_cert: &mut [u8],
        public_cert_length: &mut usize,
    ) -> OemCryptoResult {
        forward!(self, GetOemPublicCertificate as ffi::GetOemPublicCertificateFn, |f| f(
            session,
            out_ptr(public_cert),
            public_cert_length
        ))
    }

    fn supported_certificates(&self) -> u32 {
        match unsafe { self.symbols.get::<ffi::SupportedCertificatesFn>(Operation::SupportedCertificates) } {
            Some(f) => unsafe { f() },
            None => 0,
        }
    }

    fn is_srm_update_supported(&self) -> bool {
        match unsafe { self.symbols.get::<ffi::IsSrmUpdateSupportedFn>(Operation::IsSrmUpdateSupported) } {
            Some(f) => unsafe { f() },
            None => false,
        }
    }

    fn get_current_srm_version(&self, version: &mut u16) -> OemCryptoResult {
        forward!(self, GetCurrentSrmVersion as ffi::GetCurrentSrmVersionFn, |f| f(version))
    }

    fn load_srm(&self, buffer: &[u8]) -> OemCryptoResult {
        forward!(self, LoadSrm as ffi::LoadSrmFn, |f| f(in_ptr(buffer), buffer.len()))
    }

    fn remove_srm(&self) -> OemCryptoResult {
        forward!(self, RemoveSrm as ffi::RemoveSrmFn, |f| f())
    }

    fn create_usage_table_header(&self, header: &mut [u8], header_length: &mut usize) -> OemCryptoResult {
        forward!(self, CreateUsageTableHeader as ffi::CreateUsageTableHeaderFn, |f| f(
            out_ptr(header),
            header_length
        ))
    }

    fn load_usage_table_header(&self, buffer: &[u8]) -> OemCryptoResult {
        forward!(self, LoadUsageTableHeader as ffi::LoadUsageTableHeaderFn, |f| f(
            in_ptr(buffer),
            buffer.len()
        ))
    }

    fn create_new_usage_entry(&self, session: u32, usage_entry_number: &mut u32) -> OemCryptoResult {
        forward!(self, CreateNewUsageEntry as ffi::CreateNewUsageEntryFn, |f| f(
            session,
            usage_entry_number
        ))
    }

    fn load_usage_entry(&self, session: u32, index: u32, buffer: &[u8]) -> OemCryptoResult {
        forward!(self, LoadUsageEntry as ffi::LoadUsageEntryFn, |f| f(
            session,
            index,
            in_ptr(buffer),
            buffer.len()
        ))
    }

    fn update_usage_entry(
        &self,
        session: u32,
        header: &mut [u8],
        header_length: &mut usize,
        entry: &mut [u8],
        entry_length: &mut usize,
    ) -> OemCryptoResult {
        forward!(self, UpdateUsageEntry as ffi::UpdateUsageEntryFn, |f| f(
            session,
            out_ptr(header),
            header_length,
            out_ptr(entry),
            entry_length
        ))
    }

    fn shrink_usage_table_header(
        &self,
        new_table_size: u32,
        header: &mut [u8],
        header_length: &mut usize,
    ) -> OemCryptoResult {
        forward!(self, ShrinkUsageTableHeader as ffi::ShrinkUsageTableHeaderFn, |f| f(
            new_table_size,
            out_ptr(header),
            header_length
        ))
    }

    fn move_entry(&self, session: u32, new_index: u32) -> OemCryptoResult {
        forward!(self, MoveEntry as ffi::MoveEntryFn, |f| f(session, new_index))
    }

    fn copy_old_usage_entry(&self, session: u32, pst: &[u8]) -> OemCryptoResult {
        forward!(self, CopyOldUsageEntry as ffi::CopyOldUsageEntryFn, |f| f(
            session,
            in_ptr(pst),
            pst.len()
        ))
    }

    fn create_old_usage_entry(&self, entry: &OldUsageEntry<'_>) -> OemCryptoResult {
        // The C signature takes the MAC keys as mutable pointers but only reads them.
        let mut server_mac_key = *entry.server_mac_key;
        let mut client_mac_key = *entry.client_mac_key;
        forward!(self, CreateOldUsageEntry as ffi::CreateOldUsageEntryFn, |f| f(
            entry.time_since_license_received,
            entry.time_since_first_decrypt,
            entry.time_since_last_decrypt,
            entry.status as u32,
            server_mac_key.as_mut_ptr(),
            client_mac_key.as_mut_ptr(),
            in_ptr(entry.pst),
            entry.pst.len()
        ))
    }
}
