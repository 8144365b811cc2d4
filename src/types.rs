//! OEMCrypto value types shared by every layer of the adapter.
//!
//! Numeric values match the C ABI so they can cross the native boundary
//! unchanged.
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Raw OEMCrypto result code as returned by an implementation.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct OemCryptoResult(pub u32);

impl OemCryptoResult {
    pub const SUCCESS: Self = Self(0);
    pub const ERROR_INIT_FAILED: Self = Self(1);
    pub const ERROR_TERMINATE_FAILED: Self = Self(2);
    pub const ERROR_OPEN_FAILURE: Self = Self(3);
    pub const ERROR_CLOSE_FAILURE: Self = Self(4);
    pub const ERROR_SHORT_BUFFER: Self = Self(7);
    pub const ERROR_NO_DEVICE_KEY: Self = Self(8);
    pub const ERROR_KEYBOX_INVALID: Self = Self(10);
    pub const ERROR_DECRYPT_FAILED: Self = Self(13);
    pub const ERROR_WRITE_KEYBOX: Self = Self(14);
    pub const ERROR_OPEN_SESSION_FAILED: Self = Self(22);
    pub const ERROR_CLOSE_SESSION_FAILED: Self = Self(23);
    pub const ERROR_INVALID_SESSION: Self = Self(24);
    pub const ERROR_NOT_IMPLEMENTED: Self = Self(25);
    pub const ERROR_NO_CONTENT_KEY: Self = Self(26);
    pub const ERROR_UNKNOWN_FAILURE: Self = Self(28);
    pub const ERROR_INVALID_CONTEXT: Self = Self(29);
    pub const ERROR_SIGNATURE_FAILURE: Self = Self(30);
    pub const ERROR_TOO_MANY_SESSIONS: Self = Self(31);
    pub const ERROR_INVALID_NONCE: Self = Self(32);
    pub const ERROR_TOO_MANY_KEYS: Self = Self(33);
    pub const ERROR_INSUFFICIENT_RESOURCES: Self = Self(37);
    pub const ERROR_BUFFER_TOO_LARGE: Self = Self(46);
    pub const ERROR_USAGE_TABLE_UNRECOVERABLE: Self = Self(50);
    /// Vendor-specific code some Level 1 builds return when their usage
    /// table cannot be recovered.
    pub const VENDOR_USAGE_TABLE_FAILURE: Self = Self(10008);

    #[must_use]
    pub fn is_success(self) -> bool {
        self == Self::SUCCESS
    }

    /// Map a vendor-specific code onto its standard counterpart.
    #[must_use]
    pub fn normalized(self) -> Self {
        if self == Self::VENDOR_USAGE_TABLE_FAILURE {
            Self::ERROR_USAGE_TABLE_UNRECOVERABLE
        } else {
            self
        }
    }

    /// Convert into the crate result, classifying the failure.
    pub fn into_result(self) -> Result<()> {
        match self {
            Self::SUCCESS => Ok(()),
            Self::ERROR_NOT_IMPLEMENTED => Err(Error::NotImplemented),
            Self::ERROR_USAGE_TABLE_UNRECOVERABLE => Err(Error::UsageTableUnrecoverable),
            other => Err(Error::Underlying(other)),
        }
    }
}

impl fmt::Debug for OemCryptoResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OEMCryptoResult({})", self.0)
    }
}

impl fmt::Display for OemCryptoResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which implementation the caller asks for on session-free operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SecurityLevel {
    /// Hardware if it is available, Software otherwise.
    #[default]
    Default,
    /// Always the Software implementation.
    Level3,
}

/// HDCP output protection capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum HdcpCapability {
    #[default]
    None,
    V1,
    V2,
    V2_1,
    V2_2,
    NoDigitalOutput,
    /// A value this adapter does not know, kept as reported.
    Other(u32),
}

impl HdcpCapability {
    /// Translate the single-byte encoding used by the version 9 ABI.
    #[must_use]
    pub fn from_legacy_byte(value: u8) -> Self {
        Self::from_raw(u32::from(value))
    }

    #[must_use]
    pub fn from_raw(value: u32) -> Self {
        match value {
            0 => Self::None,
            1 => Self::V1,
            2 => Self::V2,
            3 => Self::V2_1,
            4 => Self::V2_2,
            0xff => Self::NoDigitalOutput,
            other => Self::Other(other),
        }
    }

    /// The ABI encoding.
    #[must_use]
    pub fn raw(self) -> u32 {
        match self {
            Self::None => 0,
            Self::V1 => 1,
            Self::V2 => 2,
            Self::V2_1 => 3,
            Self::V2_2 => 4,
            Self::NoDigitalOutput => 0xff,
            Self::Other(value) => value,
        }
    }
}

/// How the device obtains its DRM certificate.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ProvisioningMethod {
    ProvisioningError = 0,
    DrmCertificate = 1,
    Keybox = 2,
    OemCertificate = 3,
}

impl ProvisioningMethod {
    #[must_use]
    pub fn from_raw(value: u32) -> Self {
        match value {
            1 => Self::DrmCertificate,
            2 => Self::Keybox,
            3 => Self::OemCertificate,
            _ => Self::ProvisioningError,
        }
    }
}

/// License flavor passed to `LoadKeys`.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LicenseType {
    #[default]
    ContentLicense = 0,
    EntitlementLicense = 1,
}

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CipherMode {
    #[default]
    Ctr = 0,
    Cbc = 1,
}

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RsaPaddingScheme {
    Pss = 0x1,
    Pkcs1Block1 = 0x2,
}

/// Algorithm used by the generic crypto operations.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    AesCbc128NoPadding = 0,
    HmacSha256 = 1,
}

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UsageEntryStatus {
    Unused = 0,
    Active = 1,
    Inactive = 2,
    InactiveUsed = 3,
    InactiveUnused = 4,
}

/// Bit flags reported by `GetAnalogOutputFlags`.
pub mod analog_output {
    pub const NONE: u32 = 0x0;
    pub const SUPPORTED: u32 = 0x1;
    pub const SUPPORTS_CGMS_A: u32 = 0x2;
    pub const CAN_DISABLE_ANALOG: u32 = 0x4;
    pub const UNKNOWN: u32 = 0x8000_0000;
}

/// Bit flags reported by `SupportedCertificates`.
pub mod certificate {
    pub const RSA_2048: u32 = 0x1;
    pub const RSA_3072: u32 = 0x2;
    pub const RSA_CAST: u32 = 0x10;
}

/// One content key in the current (`LoadKeys` v14) layout.
#[derive(Debug, Clone, Copy)]
pub struct KeyObject<'a> {
    pub key_id: &'a [u8],
    pub key_data_iv: &'a [u8],
    pub key_data: &'a [u8],
    pub key_control_iv: &'a [u8],
    pub key_control: &'a [u8],
}

/// One content key in the version 11 through 13 layout, which carried the
/// cipher mode per key.
#[derive(Debug, Clone, Copy)]
pub struct KeyObjectV13<'a> {
    pub key_id: &'a [u8],
    pub key_data_iv: &'a [u8],
    pub key_data: &'a [u8],
    pub key_control_iv: &'a [u8],
    pub key_control: &'a [u8],
    pub cipher_mode: CipherMode,
}

impl<'a> KeyObjectV13<'a> {
    #[must_use]
    pub fn with_mode(key: &KeyObject<'a>, cipher_mode: CipherMode) -> Self {
        Self {
            key_id: key.key_id,
            key_data_iv: key.key_data_iv,
            key_data: key.key_data,
            key_control_iv: key.key_control_iv,
            key_control: key.key_control,
            cipher_mode,
        }
    }

    #[must_use]
    pub fn without_mode(&self) -> KeyObject<'a> {
        KeyObject {
            key_id: self.key_id,
            key_data_iv: self.key_data_iv,
            key_data: self.key_data,
            key_control_iv: self.key_control_iv,
            key_control: self.key_control,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EntitledContentKeyObject<'a> {
    pub entitlement_key_id: &'a [u8],
    pub content_key_id: &'a [u8],
    pub content_key_data_iv: &'a [u8],
    pub content_key_data: &'a [u8],
}

#[derive(Debug, Clone, Copy)]
pub struct KeyRefreshObject<'a> {
    pub key_id: Option<&'a [u8]>,
    pub key_control_iv: Option<&'a [u8]>,
    pub key_control: &'a [u8],
}

/// Signed license message together with the MAC key material.
#[derive(Debug, Clone, Copy)]
pub struct SignedMessage<'a> {
    pub message: &'a [u8],
    pub signature: &'a [u8],
    pub enc_mac_key_iv: Option<&'a [u8]>,
    pub enc_mac_key: Option<&'a [u8]>,
}

/// Arguments shared by every `LoadKeys` shape.
#[derive(Debug, Clone, Copy)]
pub struct LoadKeysRequest<'a, K> {
    pub signed: SignedMessage<'a>,
    pub keys: &'a [K],
    pub pst: Option<&'a [u8]>,
    pub srm_requirement: Option<&'a [u8]>,
    pub license_type: LicenseType,
}

/// Where decrypted or copied content is written.
#[derive(Debug)]
pub enum DestBuffer<'a> {
    Clear(&'a mut [u8]),
    Secure {
        handle: *mut std::ffi::c_void,
        max_length: usize,
        offset: usize,
    },
    Direct {
        is_video: bool,
    },
}

/// CENC pattern encryption descriptor (`cbcs`/`cens`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncryptPattern {
    pub encrypt: usize,
    pub skip: usize,
    pub offset: usize,
}

/// One sample (or subsample) handed to `DecryptCENC`.
#[derive(Debug, Clone, Copy)]
pub struct SampleDescription<'a> {
    pub data: &'a [u8],
    pub is_encrypted: bool,
    pub iv: &'a [u8; 16],
    pub block_offset: usize,
    pub subsample_flags: u8,
}

/// Inputs for creating a usage entry from a pre-v13 usage table.
#[derive(Debug, Clone, Copy)]
pub struct OldUsageEntry<'a> {
    pub time_since_license_received: u64,
    pub time_since_first_decrypt: u64,
    pub time_since_last_decrypt: u64,
    pub status: UsageEntryStatus,
    pub server_mac_key: &'a [u8; 32],
    pub client_mac_key: &'a [u8; 32],
    pub pst: &'a [u8],
}

/// Inputs for `RewrapDeviceRSAKey30`.
#[derive(Debug, Clone, Copy)]
pub struct RewrapRequest30<'a> {
    pub nonce: u32,
    pub encrypted_message_key: &'a [u8],
    pub enc_rsa_key: &'a [u8],
    pub enc_rsa_key_iv: &'a [u8],
}

/// Inputs for `RewrapDeviceRSAKey`.
#[derive(Debug, Clone, Copy)]
pub struct RewrapRequest<'a> {
    pub message: &'a [u8],
    pub signature: &'a [u8],
    pub nonce: u32,
    pub enc_rsa_key: &'a [u8],
    pub enc_rsa_key_iv: &'a [u8],
}
