//! The calling surface of one OEMCrypto implementation.
//!
//! [`Engine`] mirrors the C entry points one method per symbol, legacy
//! shapes included. Sized outputs follow the C convention: the slice is the
//! caller's buffer and the `*_length` argument receives the written (or, on
//! `ERROR_SHORT_BUFFER`, the required) length.
//!
//! Every method has a default that reports the entry point as missing, so
//! an implementation only overrides what it actually exports.
use crate::symbols::Operation;
use crate::types::{
    analog_output, Algorithm, CipherMode, DestBuffer, EncryptPattern, EntitledContentKeyObject,
    HdcpCapability, KeyObject, KeyObjectV13, KeyRefreshObject, LoadKeysRequest, OemCryptoResult,
    OldUsageEntry, ProvisioningMethod, RewrapRequest, RewrapRequest30, RsaPaddingScheme,
    SampleDescription,
};

const NI: OemCryptoResult = OemCryptoResult::ERROR_NOT_IMPLEMENTED;

/// Raw OEMCrypto entry points of a single implementation.
#[allow(unused_variables)]
pub trait Engine: Send + Sync {
    /// Whether the entry point for `operation` exists at all.
    fn provides(&self, operation: Operation) -> bool {
        true
    }

    fn api_version(&self) -> u32;

    fn initialize(&self) -> OemCryptoResult {
        NI
    }

    fn terminate(&self) -> OemCryptoResult {
        NI
    }

    /// The built-in engine reports true when it runs embedded in an app and
    /// must not be paired with a Level 1 module.
    fn is_in_app(&self) -> bool {
        false
    }

    /// Ask the engine to dump whatever state helps explain a stalled
    /// initialization. Best effort.
    fn dump_state(&self) {}

    fn open_session(&self, session: &mut u32) -> OemCryptoResult {
        NI
    }

    fn close_session(&self, session: u32) -> OemCryptoResult {
        NI
    }

    fn generate_derived_keys(
        &self,
        session: u32,
        mac_key_context: &[u8],
        enc_key_context: &[u8],
    ) -> OemCryptoResult {
        NI
    }

    fn generate_nonce(&self, session: u32, nonce: &mut u32) -> OemCryptoResult {
        NI
    }

    fn generate_signature(
        &self,
        session: u32,
        message: &[u8],
        signature: &mut [u8],
        signature_length: &mut usize,
    ) -> OemCryptoResult {
        NI
    }

    fn load_keys(&self, session: u32, request: &LoadKeysRequest<'_, KeyObject<'_>>) -> OemCryptoResult {
        NI
    }

    /// v13 shape: per-key cipher mode, SRM requirement, no license type.
    fn load_keys_v13(
        &self,
        session: u32,
        request: &LoadKeysRequest<'_, KeyObjectV13<'_>>,
    ) -> OemCryptoResult {
        NI
    }

    /// v11/v12 shape: per-key cipher mode and PST only.
    fn load_keys_v11_or_v12(
        &self,
        session: u32,
        request: &LoadKeysRequest<'_, KeyObjectV13<'_>>,
    ) -> OemCryptoResult {
        NI
    }

    /// v9/v10 shape: PST but no cipher mode.
    fn load_keys_v9_or_v10(
        &self,
        session: u32,
        request: &LoadKeysRequest<'_, KeyObject<'_>>,
    ) -> OemCryptoResult {
        NI
    }

    /// v8 shape: no PST.
    fn load_keys_v8(&self, session: u32, request: &LoadKeysRequest<'_, KeyObject<'_>>) -> OemCryptoResult {
        NI
    }

    fn load_entitled_content_keys(
        &self,
        session: u32,
        keys: &[EntitledContentKeyObject<'_>],
    ) -> OemCryptoResult {
        NI
    }

    fn refresh_keys(
        &self,
        session: u32,
        message: &[u8],
        signature: &[u8],
        keys: &[KeyRefreshObject<'_>],
    ) -> OemCryptoResult {
        NI
    }

    fn query_key_control(
        &self,
        session: u32,
        key_id: &[u8],
        key_control_block: &mut [u8],
        key_control_block_length: &mut usize,
    ) -> OemCryptoResult {
        NI
    }

    fn select_key(&self, session: u32, key_id: &[u8], cipher_mode: CipherMode) -> OemCryptoResult {
        NI
    }

    fn select_key_v13(&self, session: u32, key_id: &[u8]) -> OemCryptoResult {
        NI
    }

    fn decrypt_cenc(
        &self,
        session: u32,
        sample: &SampleDescription<'_>,
        out: &mut DestBuffer<'_>,
        pattern: &EncryptPattern,
    ) -> OemCryptoResult {
        NI
    }

    fn decrypt_ctr_v10(
        &self,
        session: u32,
        sample: &SampleDescription<'_>,
        out: &mut DestBuffer<'_>,
    ) -> OemCryptoResult {
        NI
    }

    fn copy_buffer(&self, data: &[u8], out: &mut DestBuffer<'_>, subsample_flags: u8) -> OemCryptoResult {
        NI
    }

    fn wrap_keybox(
        &self,
        keybox: &[u8],
        wrapped: &mut [u8],
        wrapped_length: &mut usize,
        transport_key: &[u8],
    ) -> OemCryptoResult {
        NI
    }

    fn install_keybox(&self, keybox: &[u8]) -> OemCryptoResult {
        NI
    }

    fn load_test_keybox(&self, buffer: &[u8]) -> OemCryptoResult {
        NI
    }

    fn load_test_keybox_v13(&self) -> OemCryptoResult {
        NI
    }

    fn is_keybox_valid(&self) -> OemCryptoResult {
        NI
    }

    fn get_device_id(&self, device_id: &mut [u8], device_id_length: &mut usize) -> OemCryptoResult {
        NI
    }

    fn get_key_data(&self, key_data: &mut [u8], key_data_length: &mut usize) -> OemCryptoResult {
        NI
    }

    fn get_random(&self, data: &mut [u8]) -> OemCryptoResult {
        NI
    }

    fn rewrap_device_rsa_key(
        &self,
        session: u32,
        request: &RewrapRequest<'_>,
        wrapped_rsa_key: &mut [u8],
        wrapped_rsa_key_length: &mut usize,
    ) -> OemCryptoResult {
        NI
    }

    fn rewrap_device_rsa_key30(
        &self,
        session: u32,
        request: &RewrapRequest30<'_>,
        wrapped_rsa_key: &mut [u8],
        wrapped_rsa_key_length: &mut usize,
    ) -> OemCryptoResult {
        NI
    }

    fn load_device_rsa_key(&self, session: u32, wrapped_rsa_key: &[u8]) -> OemCryptoResult {
        NI
    }

    fn load_test_rsa_key(&self) -> OemCryptoResult {
        NI
    }

    fn generate_rsa_signature(
        &self,
        session: u32,
        message: &[u8],
        signature: &mut [u8],
        signature_length: &mut usize,
        padding: RsaPaddingScheme,
    ) -> OemCryptoResult {
        NI
    }

    fn generate_rsa_signature_v8(
        &self,
        session: u32,
        message: &[u8],
        signature: &mut [u8],
        signature_length: &mut usize,
    ) -> OemCryptoResult {
        NI
    }

    fn derive_keys_from_session_key(
        &self,
        session: u32,
        enc_session_key: &[u8],
        mac_key_context: &[u8],
        enc_key_context: &[u8],
    ) -> OemCryptoResult {
        NI
    }

    fn security_patch_level(&self) -> u8 {
        0
    }

    fn security_level(&self) -> Option<String> {
        None
    }

    fn get_hdcp_capability(
        &self,
        current: &mut HdcpCapability,
        maximum: &mut HdcpCapability,
    ) -> OemCryptoResult {
        NI
    }

    fn get_hdcp_capability_v9(&self, current: &mut u8, maximum: &mut u8) -> OemCryptoResult {
        NI
    }

    fn get_analog_output_flags(&self) -> u32 {
        analog_output::UNKNOWN
    }

    fn supports_usage_table(&self) -> bool {
        false
    }

    fn is_anti_rollback_hw_present(&self) -> bool {
        false
    }

    fn get_number_of_open_sessions(&self, count: &mut usize) -> OemCryptoResult {
        NI
    }

    fn get_max_number_of_sessions(&self, maximum: &mut usize) -> OemCryptoResult {
        NI
    }

    fn generic_encrypt(
        &self,
        session: u32,
        input: &[u8],
        iv: &[u8; 16],
        algorithm: Algorithm,
        output: &mut [u8],
    ) -> OemCryptoResult {
        NI
    }

    fn generic_decrypt(
        &self,
        session: u32,
        input: &[u8],
        iv: &[u8; 16],
        algorithm: Algorithm,
        output: &mut [u8],
    ) -> OemCryptoResult {
        NI
    }

    fn generic_sign(
        &self,
        session: u32,
        input: &[u8],
        algorithm: Algorithm,
        signature: &mut [u8],
        signature_length: &mut usize,
    ) -> OemCryptoResult {
        NI
    }

    fn generic_verify(
        &self,
        session: u32,
        input: &[u8],
        algorithm: Algorithm,
        signature: &[u8],
    ) -> OemCryptoResult {
        NI
    }

    fn update_usage_table(&self) -> OemCryptoResult {
        NI
    }

    fn deactivate_usage_entry_v12(&self, pst: &[u8]) -> OemCryptoResult {
        NI
    }

    fn deactivate_usage_entry(&self, session: u32, pst: &[u8]) -> OemCryptoResult {
        NI
    }

    fn report_usage(
        &self,
        session: u32,
        pst: &[u8],
        buffer: &mut [u8],
        buffer_length: &mut usize,
    ) -> OemCryptoResult {
        NI
    }

    fn delete_usage_entry(
        &self,
        session: u32,
        pst: &[u8],
        message: &[u8],
        signature: &[u8],
    ) -> OemCryptoResult {
        NI
    }

    fn force_delete_usage_entry(&self, pst: &[u8]) -> OemCryptoResult {
        NI
    }

    fn delete_old_usage_table(&self) -> OemCryptoResult {
        NI
    }

    fn get_provisioning_method(&self) -> ProvisioningMethod {
        ProvisioningMethod::ProvisioningError
    }

    fn get_oem_public_certificate(
        &self,
        session: u32,
        public_cert: &mut [u8],
        public_cert_length: &mut usize,
    ) -> OemCryptoResult {
        NI
    }

    fn supported_certificates(&self) -> u32 {
        0
    }

    fn is_srm_update_supported(&self) -> bool {
        false
    }

    fn get_current_srm_version(&self, version: &mut u16) -> OemCryptoResult {
        NI
    }

    fn load_srm(&self, buffer: &[u8]) -> OemCryptoResult {
        NI
    }

    fn remove_srm(&self) -> OemCryptoResult {
        NI
    }

    fn create_usage_table_header(&self, header: &mut [u8], header_length: &mut usize) -> OemCryptoResult {
        NI
    }

    fn load_usage_table_header(&self, buffer: &[u8]) -> OemCryptoResult {
        NI
    }

    fn create_new_usage_entry(&self, session: u32, usage_entry_number: &mut u32) -> OemCryptoResult {
        NI
    }

    fn load_usage_entry(&self, session: u32, index: u32, buffer: &[u8]) -> OemCryptoResult {
        NI
    }

    fn update_usage_entry(
        &self,
        session: u32,
        header: &mut [u8],
        header_length: &mut usize,
        entry: &mut [u8],
        entry_length: &mut usize,
    ) -> OemCryptoResult {
        NI
    }

    fn shrink_usage_table_header(
        &self,
        new_table_size: u32,
        header: &mut [u8],
        header_length: &mut usize,
    ) -> OemCryptoResult {
        NI
    }

    fn move_entry(&self, session: u32, new_index: u32) -> OemCryptoResult {
        NI
    }

    fn copy_old_usage_entry(&self, session: u32, pst: &[u8]) -> OemCryptoResult {
        NI
    }

    fn create_old_usage_entry(&self, entry: &OldUsageEntry<'_>) -> OemCryptoResult {
        NI
    }
}
