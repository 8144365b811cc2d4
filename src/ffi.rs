//! C ABI of native OEMCrypto modules: struct layouts and entry point
//! signatures for every shape the adapter calls.
#![allow(non_camel_case_types)]

use std::ffi::{c_char, c_void};
use std::ptr;

use crate::types::{
    DestBuffer, EncryptPattern, EntitledContentKeyObject, KeyObject, KeyObjectV13,
    KeyRefreshObject, OemCryptoResult,
};

pub type OEMCrypto_SESSION = u32;

/// Key layout shared by `LoadKeys` (v14) and the v8 through v10 shapes.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct OEMCrypto_KeyObject {
    pub key_id: *const u8,
    pub key_id_length: usize,
    pub key_data_iv: *const u8,
    pub key_data: *const u8,
    pub key_data_length: usize,
    pub key_control_iv: *const u8,
    pub key_control: *const u8,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct OEMCrypto_KeyObject_V13 {
    pub key_id: *const u8,
    pub key_id_length: usize,
    pub key_data_iv: *const u8,
    pub key_data: *const u8,
    pub key_data_length: usize,
    pub key_control_iv: *const u8,
    pub key_control: *const u8,
    pub cipher_mode: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct OEMCrypto_EntitledContentKeyObject {
    pub entitlement_key_id: *const u8,
    pub entitlement_key_id_length: usize,
    pub content_key_id: *const u8,
    pub content_key_id_length: usize,
    pub content_key_data_iv: *const u8,
    pub content_key_data: *const u8,
    pub content_key_data_length: usize,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct OEMCrypto_KeyRefreshObject {
    pub key_id: *const u8,
    pub key_id_length: usize,
    pub key_control_iv: *const u8,
    pub key_control: *const u8,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct OEMCrypto_CENCEncryptPatternDesc {
    pub encrypt: usize,
    pub skip: usize,
    pub offset: usize,
}

pub const BUFFER_TYPE_CLEAR: u32 = 0;
pub const BUFFER_TYPE_SECURE: u32 = 1;
pub const BUFFER_TYPE_DIRECT: u32 = 2;

#[repr(C)]
#[derive(Clone, Copy)]
pub struct ClearBuffer {
    pub address: *mut u8,
    pub max_length: usize,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct SecureBuffer {
    pub handle: *mut c_void,
    pub max_length: usize,
    pub offset: usize,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct DirectBuffer {
    pub is_video: bool,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub union DestBufferUnion {
    pub clear: ClearBuffer,
    pub secure: SecureBuffer,
    pub direct: DirectBuffer,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct OEMCrypto_DestBufferDesc {
    pub buffer_type: u32,
    pub buffer: DestBufferUnion,
}

fn ptr_of(bytes: &[u8]) -> *const u8 {
    if bytes.is_empty() {
        ptr::null()
    } else {
        bytes.as_ptr()
    }
}

pub(crate) fn opt_ptr(bytes: Option<&[u8]>) -> *const u8 {
    bytes.map_or(ptr::null(), ptr_of)
}

pub(crate) fn opt_len(bytes: Option<&[u8]>) -> usize {
    bytes.map_or(0, <[u8]>::len)
}

impl From<&KeyObject<'_>> for OEMCrypto_KeyObject {
    fn from(key: &KeyObject<'_>) -> Self {
        Self {
            key_id: ptr_of(key.key_id),
            key_id_length: key.key_id.len(),
            key_data_iv: ptr_of(key.key_data_iv),
            key_data: ptr_of(key.key_data),
            key_data_length: key.key_data.len(),
            key_control_iv: ptr_of(key.key_control_iv),
            key_control: ptr_of(key.key_control),
        }
    }
}

impl From<&KeyObjectV13<'_>> for OEMCrypto_KeyObject_V13 {
    fn from(key: &KeyObjectV13<'_>) -> Self {
        Self {
            key_id: ptr_of(key.key_id),
            key_id_length: key.key_id.len(),
            key_data_iv: ptr_of(key.key_data_iv),
            key_data: ptr_of(key.key_data),
            key_data_length: key.key_data.len(),
            key_control_iv: ptr_of(key.key_control_iv),
            key_control: ptr_of(key.key_control),
            cipher_mode: key.cipher_mode as u32,
        }
    }
}

impl From<&EntitledContentKeyObject<'_>> for OEMCrypto_EntitledContentKeyObject {
    fn from(key: &EntitledContentKeyObject<'_>) -> Self {
        Self {
            entitlement_key_id: ptr_of(key.entitlement_key_id),
            entitlement_key_id_length: key.entitlement_key_id.len(),
            content_key_id: ptr_of(key.content_key_id),
            content_key_id_length: key.content_key_id.len(),
            content_key_data_iv: ptr_of(key.content_key_data_iv),
            content_key_data: ptr_of(key.content_key_data),
            content_key_data_length: key.content_key_data.len(),
        }
    }
}

impl From<&KeyRefreshObject<'_>> for OEMCrypto_KeyRefreshObject {
    fn from(key: &KeyRefreshObject<'_>) -> Self {
        Self {
            key_id: opt_ptr(key.key_id),
            key_id_length: opt_len(key.key_id),
            key_control_iv: opt_ptr(key.key_control_iv),
            key_control: ptr_of(key.key_control),
        }
    }
}

impl From<&EncryptPattern> for OEMCrypto_CENCEncryptPatternDesc {
    fn from(pattern: &EncryptPattern) -> Self {
        Self {
            encrypt: pattern.encrypt,
            skip: pattern.skip,
            offset: pattern.offset,
        }
    }
}

impl From<&mut DestBuffer<'_>> for OEMCrypto_DestBufferDesc {
    fn from(dest: &mut DestBuffer<'_>) -> Self {
        match dest {
            DestBuffer::Clear(bytes) => Self {
                buffer_type: BUFFER_TYPE_CLEAR,
                buffer: DestBufferUnion {
                    clear: ClearBuffer {
                        address: bytes.as_mut_ptr(),
                        max_length: bytes.len(),
                    },
                },
            },
            DestBuffer::Secure {
                handle,
                max_length,
                offset,
            } => Self {
                buffer_type: BUFFER_TYPE_SECURE,
                buffer: DestBufferUnion {
                    secure: SecureBuffer {
                        handle: *handle,
                        max_length: *max_length,
                        offset: *offset,
                    },
                },
            },
            DestBuffer::Direct { is_video } => Self {
                buffer_type: BUFFER_TYPE_DIRECT,
                buffer: DestBufferUnion {
                    direct: DirectBuffer { is_video: *is_video },
                },
            },
        }
    }
}

type R = OemCryptoResult;
type S = OEMCrypto_SESSION;

pub type InitializeFn = unsafe extern "C" fn() -> R;
pub type TerminateFn = unsafe extern "C" fn() -> R;
pub type ApiVersionFn = unsafe extern "C" fn() -> u32;
pub type IsInAppFn = unsafe extern "C" fn() -> bool;
pub type OpenSessionFn = unsafe extern "C" fn(*mut S) -> R;
pub type CloseSessionFn = unsafe extern "C" fn(S) -> R;
pub type GenerateDerivedKeysFn = unsafe extern "C" fn(S, *const u8, u32, *const u8, u32) -> R;
pub type GenerateNonceFn = unsafe extern "C" fn(S, *mut u32) -> R;
pub type GenerateSignatureFn = unsafe extern "C" fn(S, *const u8, usize, *mut u8, *mut usize) -> R;
pub type LoadKeysFn = unsafe extern "C" fn(
    S,
    *const u8,
    usize,
    *const u8,
    usize,
    *const u8,
    *const u8,
    usize,
    *const OEMCrypto_KeyObject,
    *const u8,
    usize,
    *const u8,
    u32,
) -> R;
pub type LoadKeysV13Fn = unsafe extern "C" fn(
    S,
    *const u8,
    usize,
    *const u8,
    usize,
    *const u8,
    *const u8,
    usize,
    *const OEMCrypto_KeyObject_V13,
    *const u8,
    usize,
    *const u8,
) -> R;
pub type LoadKeysV11OrV12Fn = unsafe extern "C" fn(
    S,
    *const u8,
    usize,
    *const u8,
    usize,
    *const u8,
    *const u8,
    usize,
    *const OEMCrypto_KeyObject_V13,
    *const u8,
    usize,
) -> R;
pub type LoadKeysV9OrV10Fn = unsafe extern "C" fn(
    S,
    *const u8,
    usize,
    *const u8,
    usize,
    *const u8,
    *const u8,
    usize,
    *const OEMCrypto_KeyObject,
    *const u8,
    usize,
) -> R;
pub type LoadKeysV8Fn = unsafe extern "C" fn(
    S,
    *const u8,
    usize,
    *const u8,
    usize,
    *const u8,
    *const u8,
    usize,
    *const OEMCrypto_KeyObject,
) -> R;
pub type LoadEntitledContentKeysFn =
    unsafe extern "C" fn(S, usize, *const OEMCrypto_EntitledContentKeyObject) -> R;
pub type RefreshKeysFn = unsafe extern "C" fn(
    S,
    *const u8,
    usize,
    *const u8,
    usize,
    usize,
    *const OEMCrypto_KeyRefreshObject,
) -> R;
pub type QueryKeyControlFn = unsafe extern "C" fn(S, *const u8, usize, *mut u8, *mut usize) -> R;
pub type SelectKeyFn = unsafe extern "C" fn(S, *const u8, usize, u32) -> R;
pub type SelectKeyV13Fn = unsafe extern "C" fn(S, *const u8, usize) -> R;
pub type DecryptCtrV10Fn = unsafe extern "C" fn(
    S,
    *const u8,
    usize,
    bool,
    *const u8,
    usize,
    *const OEMCrypto_DestBufferDesc,
    u8,
) -> R;
pub type DecryptCencFn = unsafe extern "C" fn(
    S,
    *const u8,
    usize,
    bool,
    *const u8,
    usize,
    *mut OEMCrypto_DestBufferDesc,
    *const OEMCrypto_CENCEncryptPatternDesc,
    u8,
) -> R;
pub type CopyBufferFn = unsafe extern "C" fn(*const u8, usize, *mut OEMCrypto_DestBufferDesc, u8) -> R;
pub type WrapKeyboxFn =
    unsafe extern "C" fn(*const u8, usize, *mut u8, *mut usize, *const u8, usize) -> R;
pub type InstallKeyboxFn = unsafe extern "C" fn(*const u8, usize) -> R;
pub type LoadTestKeyboxFn = unsafe extern "C" fn(*const u8, usize) -> R;
pub type LoadTestKeyboxV13Fn = unsafe extern "C" fn() -> R;
pub type IsKeyboxValidFn = unsafe extern "C" fn() -> R;
pub type GetDeviceIdFn = unsafe extern "C" fn(*mut u8, *mut usize) -> R;
pub type GetKeyDataFn = unsafe extern "C" fn(*mut u8, *mut usize) -> R;
pub type GetRandomFn = unsafe extern "C" fn(*mut u8, usize) -> R;
pub type RewrapDeviceRsaKeyFn = unsafe extern "C" fn(
    S,
    *const u8,
    usize,
    *const u8,
    usize,
    *const u32,
    *const u8,
    usize,
    *const u8,
    *mut u8,
    *mut usize,
) -> R;
pub type RewrapDeviceRsaKey30Fn = unsafe extern "C" fn(
    S,
    *const u32,
    *const u8,
    usize,
    *const u8,
    usize,
    *const u8,
    *mut u8,
    *mut usize,
) -> R;
pub type LoadDeviceRsaKeyFn = unsafe extern "C" fn(S, *const u8, usize) -> R;
pub type LoadTestRsaKeyFn = unsafe extern "C" fn() -> R;
pub type GenerateRsaSignatureFn =
    unsafe extern "C" fn(S, *const u8, usize, *mut u8, *mut usize, u32) -> R;
pub type GenerateRsaSignatureV8Fn = unsafe extern "C" fn(S, *const u8, usize, *mut u8, *mut usize) -> R;
pub type DeriveKeysFromSessionKeyFn =
    unsafe extern "C" fn(S, *const u8, usize, *const u8, usize, *const u8, usize) -> R;
pub type SecurityPatchLevelFn = unsafe extern "C" fn() -> u8;
pub type SecurityLevelFn = unsafe extern "C" fn() -> *const c_char;
pub type GetHdcpCapabilityV9Fn = unsafe extern "C" fn(*mut u8, *mut u8) -> R;
pub type GetHdcpCapabilityFn = unsafe extern "C" fn(*mut u32, *mut u32) -> R;
pub type GetAnalogOutputFlagsFn = unsafe extern "C" fn() -> u32;
pub type SupportsUsageTableFn = unsafe extern "C" fn() -> bool;
pub type IsAntiRollbackHwPresentFn = unsafe extern "C" fn() -> bool;
pub type GetNumberOfOpenSessionsFn = unsafe extern "C" fn(*mut usize) -> R;
pub type GetMaxNumberOfSessionsFn = unsafe extern "C" fn(*mut usize) -> R;
pub type GenericCryptFn = unsafe extern "C" fn(S, *const u8, usize, *const u8, u32, *mut u8) -> R;
pub type GenericSignFn = unsafe extern "C" fn(S, *const u8, usize, u32, *mut u8, *mut usize) -> R;
pub type GenericVerifyFn = unsafe extern "C" fn(S, *const u8, usize, u32, *const u8, usize) -> R;
pub type UpdateUsageTableFn = unsafe extern "C" fn() -> R;
pub type DeactivateUsageEntryV12Fn = unsafe extern "C" fn(*const u8, usize) -> R;
pub type ReportUsageFn = unsafe extern "C" fn(S, *const u8, usize, *mut u8, *mut usize) -> R;
pub type DeleteUsageEntryFn =
    unsafe extern "C" fn(S, *const u8, usize, *const u8, usize, *const u8, usize) -> R;
pub type ForceDeleteUsageEntryFn = unsafe extern "C" fn(*const u8, usize) -> R;
pub type DeleteOldUsageTableFn = unsafe extern "C" fn() -> R;
pub type GetProvisioningMethodFn = unsafe extern "C" fn() -> u32;
pub type GetOemPublicCertificateFn = unsafe extern "C" fn(S, *mut u8, *mut usize) -> R;
pub type SupportedCertificatesFn = unsafe extern "C" fn() -> u32;
pub type IsSrmUpdateSupportedFn = unsafe extern "C" fn() -> bool;
pub type GetCurrentSrmVersionFn = unsafe extern "C" fn(*mut u16) -> R;
pub type LoadSrmFn = unsafe extern "C" fn(*const u8, usize) -> R;
pub type RemoveSrmFn = unsafe extern "C" fn() -> R;
pub type CreateUsageTableHeaderFn = unsafe extern "C" fn(*mut u8, *mut usize) -> R;
pub type LoadUsageTableHeaderFn = unsafe extern "C" fn(*const u8, usize) -> R;
pub type CreateNewUsageEntryFn = unsafe extern "C" fn(S, *mut u32) -> R;
pub type LoadUsageEntryFn = unsafe extern "C" fn(S, u32, *const u8, usize) -> R;
pub type UpdateUsageEntryFn =
    unsafe extern "C" fn(S, *mut u8, *mut usize, *mut u8, *mut usize) -> R;
pub type DeactivateUsageEntryFn = unsafe extern "C" fn(S, *const u8, usize) -> R;
pub type ShrinkUsageTableHeaderFn = unsafe extern "C" fn(u32, *mut u8, *mut usize) -> R;
pub type MoveEntryFn = unsafe extern "C" fn(S, u32) -> R;
pub type CopyOldUsageEntryFn = unsafe extern "C" fn(S, *const u8, usize) -> R;
pub type CreateOldUsageEntryFn =
    unsafe extern "C" fn(u64, u64, u64, u32, *mut u8, *mut u8, *const u8, usize) -> R;
/// Diagnostic hook of the built-in engine (`GetOEMPublicCertificate` with
/// null buffers).
pub type DumpStateFn = GetOemPublicCertificateFn;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_object_points_into_caller_buffers() {
        let message = [7u8; 64];
        let key = KeyObject {
            key_id: &message[0..16],
            key_data_iv: &message[16..32],
            key_data: &message[32..48],
            key_control_iv: &message[48..64],
            key_control: &[],
        };
        let raw = OEMCrypto_KeyObject::from(&key);
        assert_eq!(raw.key_id, message.as_ptr());
        assert_eq!(raw.key_id_length, 16);
        assert_eq!(raw.key_data_length, 16);
        assert!(raw.key_control.is_null());
    }

    #[test]
    fn v13_key_carries_cipher_mode() {
        let id = [1u8; 4];
        let key = KeyObjectV13 {
            key_id: &id,
            key_data_iv: &[],
            key_data: &[],
            key_control_iv: &[],
            key_control: &[],
            cipher_mode: crate::types::CipherMode::Cbc,
        };
        assert_eq!(OEMCrypto_KeyObject_V13::from(&key).cipher_mode, 1);
    }

    #[test]
    fn clear_dest_buffer_describes_slice() {
        let mut out = vec![0u8; 32];
        let mut dest = DestBuffer::Clear(&mut out);
        let desc = OEMCrypto_DestBufferDesc::from(&mut dest);
        assert_eq!(desc.buffer_type, BUFFER_TYPE_CLEAR);
        let clear = unsafe { desc.buffer.clear };
        assert_eq!(clear.max_length, 32);
    }
}
