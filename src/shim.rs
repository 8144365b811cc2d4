//! Per-generation ABI strategies.
//!
//! Each OEMCrypto generation changed the shape of a handful of entry points.
//! An [`AbiShim`] translates the current calling convention into the shape a
//! module of that generation exports. The trait defaults are the current
//! (v14) behavior; older generations override what differs.
use crate::implementation::Implementation;
use crate::symbols::{Operation, MAX_API_VERSION};
use crate::types::{
    CipherMode, DestBuffer, EncryptPattern, HdcpCapability, KeyObject, KeyObjectV13, LicenseType,
    LoadKeysRequest, OemCryptoResult, RsaPaddingScheme, SampleDescription,
};

const NI: OemCryptoResult = OemCryptoResult::ERROR_NOT_IMPLEMENTED;

/// Version-specific translation of the entry points whose shape changed.
pub trait AbiShim: Send + Sync {
    /// Short label for logs.
    fn generation(&self) -> &'static str;

    /// `LoadKeys` with the current key layout and license type.
    fn load_keys(
        &self,
        imp: &Implementation,
        session: u32,
        request: &LoadKeysRequest<'_, KeyObject<'_>>,
    ) -> OemCryptoResult {
        imp.call(Operation::LoadKeys, |e| e.load_keys(session, request))
    }

    /// `LoadKeys` for callers still using the per-key cipher mode layout.
    fn load_keys_back_compat(
        &self,
        imp: &Implementation,
        session: u32,
        request: &LoadKeysRequest<'_, KeyObjectV13<'_>>,
    ) -> OemCryptoResult {
        let keys: Vec<KeyObject<'_>> = request.keys.iter().map(KeyObjectV13::without_mode).collect();
        imp.call(Operation::LoadKeys, |e| e.load_keys(session, &relayout(request, &keys)))
    }

    fn select_key(
        &self,
        imp: &Implementation,
        session: u32,
        key_id: &[u8],
        cipher_mode: CipherMode,
    ) -> OemCryptoResult {
        imp.call(Operation::SelectKey, |e| e.select_key(session, key_id, cipher_mode))
    }

    fn decrypt_cenc(
        &self,
        imp: &Implementation,
        session: u32,
        sample: &SampleDescription<'_>,
        out: &mut DestBuffer<'_>,
        pattern: &EncryptPattern,
    ) -> OemCryptoResult {
        imp.call(Operation::DecryptCenc, |e| e.decrypt_cenc(session, sample, out, pattern))
    }

    fn generate_rsa_signature(
        &self,
        imp: &Implementation,
        session: u32,
        message: &[u8],
        signature: &mut [u8],
        signature_length: &mut usize,
        padding: RsaPaddingScheme,
    ) -> OemCryptoResult {
        imp.call(Operation::GenerateRsaSignature, |e| {
            e.generate_rsa_signature(session, message, signature, signature_length, padding)
        })
    }

    fn hdcp_capability(
        &self,
        imp: &Implementation,
        current: &mut HdcpCapability,
        maximum: &mut HdcpCapability,
    ) -> OemCryptoResult {
        imp.call(Operation::GetHdcpCapability, |e| e.get_hdcp_capability(current, maximum))
    }

    /// Deactivate the usage entry bound to an open session. A module without
    /// the entry point reports the session as invalid.
    fn deactivate_usage_entry(&self, imp: &Implementation, session: u32, pst: &[u8]) -> OemCryptoResult {
        if !imp.supports(Operation::DeactivateUsageEntry) {
            return OemCryptoResult::ERROR_INVALID_SESSION;
        }
        imp.call(Operation::DeactivateUsageEntry, |e| e.deactivate_usage_entry(session, pst))
    }

    fn load_test_keybox(&self, imp: &Implementation, buffer: &[u8]) -> OemCryptoResult {
        if imp.supports(Operation::LoadTestKeyboxV13) {
            imp.call(Operation::LoadTestKeyboxV13, |e| e.load_test_keybox_v13())
        } else {
            imp.call(Operation::LoadTestKeybox, |e| e.load_test_keybox(buffer))
        }
    }
}

/// Same request, different key slice.
fn relayout<'a, K, L>(request: &LoadKeysRequest<'a, K>, keys: &'a [L]) -> LoadKeysRequest<'a, L> {
    LoadKeysRequest {
        signed: request.signed,
        keys,
        pst: request.pst,
        srm_requirement: request.srm_requirement,
        license_type: request.license_type,
    }
}

/// Pre-v11 modules decrypt CTR only.
fn has_cbc_key(request: &LoadKeysRequest<'_, KeyObjectV13<'_>>) -> bool {
    request.keys.iter().any(|k| k.cipher_mode == CipherMode::Cbc)
}

fn select_key_v13(imp: &Implementation, session: u32, key_id: &[u8]) -> OemCryptoResult {
    imp.call(Operation::SelectKeyV13, |e| e.select_key_v13(session, key_id))
}

fn decrypt_ctr_v10(
    imp: &Implementation,
    session: u32,
    sample: &SampleDescription<'_>,
    out: &mut DestBuffer<'_>,
) -> OemCryptoResult {
    imp.call(Operation::DecryptCtrV10, |e| e.decrypt_ctr_v10(session, sample, out))
}

fn deactivate_usage_entry_v12(imp: &Implementation, pst: &[u8]) -> OemCryptoResult {
    if !imp.supports(Operation::DeactivateUsageEntryV12) {
        return OemCryptoResult::ERROR_INVALID_SESSION;
    }
    imp.call(Operation::DeactivateUsageEntryV12, |e| e.deactivate_usage_entry_v12(pst))
}

fn load_keys_v9_or_v10(
    imp: &Implementation,
    session: u32,
    request: &LoadKeysRequest<'_, KeyObject<'_>>,
) -> OemCryptoResult {
    imp.call(Operation::LoadKeysV9OrV10, |e| e.load_keys_v9_or_v10(session, request))
        .normalized()
}

/// Version 8: no PST, no RSA padding choice, no HDCP query.
#[derive(Debug)]
pub struct Abi8;

impl AbiShim for Abi8 {
    fn generation(&self) -> &'static str {
        "v8"
    }

    fn load_keys(
        &self,
        imp: &Implementation,
        session: u32,
        request: &LoadKeysRequest<'_, KeyObject<'_>>,
    ) -> OemCryptoResult {
        if request.license_type != LicenseType::ContentLicense {
            return NI;
        }
        imp.call(Operation::LoadKeysV8, |e| e.load_keys_v8(session, request))
    }

    fn load_keys_back_compat(
        &self,
        imp: &Implementation,
        session: u32,
        request: &LoadKeysRequest<'_, KeyObjectV13<'_>>,
    ) -> OemCryptoResult {
        if has_cbc_key(request) {
            return NI;
        }
        let keys: Vec<KeyObject<'_>> = request.keys.iter().map(KeyObjectV13::without_mode).collect();
        self.load_keys(imp, session, &relayout(request, &keys))
    }

    fn select_key(&self, imp: &Implementation, session: u32, key_id: &[u8], _: CipherMode) -> OemCryptoResult {
        select_key_v13(imp, session, key_id)
    }

    fn decrypt_cenc(
        &self,
        imp: &Implementation,
        session: u32,
        sample: &SampleDescription<'_>,
        out: &mut DestBuffer<'_>,
        _pattern: &EncryptPattern,
    ) -> OemCryptoResult {
        decrypt_ctr_v10(imp, session, sample, out)
    }

    fn generate_rsa_signature(
        &self,
        imp: &Implementation,
        session: u32,
        message: &[u8],
        signature: &mut [u8],
        signature_length: &mut usize,
        _padding: RsaPaddingScheme,
    ) -> OemCryptoResult {
        imp.call(Operation::GenerateRsaSignatureV8, |e| {
            e.generate_rsa_signature_v8(session, message, signature, signature_length)
        })
    }

    fn hdcp_capability(
        &self,
        _imp: &Implementation,
        _current: &mut HdcpCapability,
        _maximum: &mut HdcpCapability,
    ) -> OemCryptoResult {
        NI
    }

    fn deactivate_usage_entry(&self, _imp: &Implementation, _session: u32, _pst: &[u8]) -> OemCryptoResult {
        NI
    }
}

/// Version 9: PST-aware key loading and a byte-sized HDCP query.
#[derive(Debug)]
pub struct Abi9;

impl AbiShim for Abi9 {
    fn generation(&self) -> &'static str {
        "v9"
    }

    fn load_keys(
        &self,
        imp: &Implementation,
        session: u32,
        request: &LoadKeysRequest<'_, KeyObject<'_>>,
    ) -> OemCryptoResult {
        if request.license_type != LicenseType::ContentLicense {
            return NI;
        }
        load_keys_v9_or_v10(imp, session, request)
    }

    fn load_keys_back_compat(
        &self,
        imp: &Implementation,
        session: u32,
        request: &LoadKeysRequest<'_, KeyObjectV13<'_>>,
    ) -> OemCryptoResult {
        if has_cbc_key(request) {
            return NI;
        }
        let keys: Vec<KeyObject<'_>> = request.keys.iter().map(KeyObjectV13::without_mode).collect();
        self.load_keys(imp, session, &relayout(request, &keys))
    }

    fn select_key(&self, imp: &Implementation, session: u32, key_id: &[u8], _: CipherMode) -> OemCryptoResult {
        select_key_v13(imp, session, key_id)
    }

    fn decrypt_cenc(
        &self,
        imp: &Implementation,
        session: u32,
        sample: &SampleDescription<'_>,
        out: &mut DestBuffer<'_>,
        _pattern: &EncryptPattern,
    ) -> OemCryptoResult {
        decrypt_ctr_v10(imp, session, sample, out)
    }

    fn hdcp_capability(
        &self,
        imp: &Implementation,
        current: &mut HdcpCapability,
        maximum: &mut HdcpCapability,
    ) -> OemCryptoResult {
        let (mut legacy_current, mut legacy_maximum) = (0u8, 0u8);
        let status = imp.call(Operation::GetHdcpCapabilityV9, |e| {
            e.get_hdcp_capability_v9(&mut legacy_current, &mut legacy_maximum)
        });
        *current = HdcpCapability::from_legacy_byte(legacy_current);
        *maximum = HdcpCapability::from_legacy_byte(legacy_maximum);
        status
    }

    fn deactivate_usage_entry(&self, imp: &Implementation, _session: u32, pst: &[u8]) -> OemCryptoResult {
        deactivate_usage_entry_v12(imp, pst)
    }
}

/// Version 10: typed HDCP query, still CTR-only decryption.
#[derive(Debug)]
pub struct Abi10;

impl AbiShim for Abi10 {
    fn generation(&self) -> &'static str {
        "v10"
    }

    fn load_keys(
        &self,
        imp: &Implementation,
        session: u32,
        request: &LoadKeysRequest<'_, KeyObject<'_>>,
    ) -> OemCryptoResult {
        Abi9.load_keys(imp, session, request)
    }

    fn load_keys_back_compat(
        &self,
        imp: &Implementation,
        session: u32,
        request: &LoadKeysRequest<'_, KeyObjectV13<'_>>,
    ) -> OemCryptoResult {
        Abi9.load_keys_back_compat(imp, session, request)
    }

    fn select_key(&self, imp: &Implementation, session: u32, key_id: &[u8], _: CipherMode) -> OemCryptoResult {
        select_key_v13(imp, session, key_id)
    }

    fn decrypt_cenc(
        &self,
        imp: &Implementation,
        session: u32,
        sample: &SampleDescription<'_>,
        out: &mut DestBuffer<'_>,
        _pattern: &EncryptPattern,
    ) -> OemCryptoResult {
        decrypt_ctr_v10(imp, session, sample, out)
    }

    fn deactivate_usage_entry(&self, imp: &Implementation, _session: u32, pst: &[u8]) -> OemCryptoResult {
        deactivate_usage_entry_v12(imp, pst)
    }
}

/// Versions 11 and 12: per-key cipher modes and CENC decryption.
#[derive(Debug)]
pub struct Abi11;

impl AbiShim for Abi11 {
    fn generation(&self) -> &'static str {
        "v11"
    }

    fn load_keys(
        &self,
        imp: &Implementation,
        session: u32,
        request: &LoadKeysRequest<'_, KeyObject<'_>>,
    ) -> OemCryptoResult {
        if request.license_type != LicenseType::ContentLicense {
            return NI;
        }
        let keys: Vec<KeyObjectV13<'_>> = request
            .keys
            .iter()
            .map(|k| KeyObjectV13::with_mode(k, CipherMode::Ctr))
            .collect();
        self.load_keys_back_compat(imp, session, &relayout(request, &keys))
    }

    fn load_keys_back_compat(
        &self,
        imp: &Implementation,
        session: u32,
        request: &LoadKeysRequest<'_, KeyObjectV13<'_>>,
    ) -> OemCryptoResult {
        imp.call(Operation::LoadKeysV11OrV12, |e| e.load_keys_v11_or_v12(session, request))
            .normalized()
    }

    fn select_key(&self, imp: &Implementation, session: u32, key_id: &[u8], _: CipherMode) -> OemCryptoResult {
        select_key_v13(imp, session, key_id)
    }

    fn deactivate_usage_entry(&self, imp: &Implementation, _session: u32, pst: &[u8]) -> OemCryptoResult {
        deactivate_usage_entry_v12(imp, pst)
    }
}

/// Version 13: session-bound usage entries and SRM requirements.
#[derive(Debug)]
pub struct Abi13;

impl AbiShim for Abi13 {
    fn generation(&self) -> &'static str {
        "v13"
    }

    fn load_keys(
        &self,
        imp: &Implementation,
        session: u32,
        request: &LoadKeysRequest<'_, KeyObject<'_>>,
    ) -> OemCryptoResult {
        if request.license_type != LicenseType::ContentLicense {
            return NI;
        }
        let keys: Vec<KeyObjectV13<'_>> = request
            .keys
            .iter()
            .map(|k| KeyObjectV13::with_mode(k, CipherMode::Ctr))
            .collect();
        self.load_keys_back_compat(imp, session, &relayout(request, &keys))
    }

    fn load_keys_back_compat(
        &self,
        imp: &Implementation,
        session: u32,
        request: &LoadKeysRequest<'_, KeyObjectV13<'_>>,
    ) -> OemCryptoResult {
        imp.call(Operation::LoadKeysV13, |e| e.load_keys_v13(session, request))
    }

    fn select_key(&self, imp: &Implementation, session: u32, key_id: &[u8], _: CipherMode) -> OemCryptoResult {
        select_key_v13(imp, session, key_id)
    }
}

/// Version 14 and newer.
#[derive(Debug)]
pub struct Abi14;

impl AbiShim for Abi14 {
    fn generation(&self) -> &'static str {
        "v14"
    }
}

/// Strategy for a module negotiated at `version`. Versions newer than the
/// adapter knows use the latest strategy.
#[must_use]
pub fn shim_for(version: u32) -> &'static dyn AbiShim {
    match version.min(MAX_API_VERSION) {
        0..=8 => &Abi8,
        9 => &Abi9,
        10 => &Abi10,
        11 | 12 => &Abi11,
        13 => &Abi13,
        _ => &Abi14,
    }
}
