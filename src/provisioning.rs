//! Decides whether a freshly resolved Level 1 module is usable.
use std::path::Path;

use crate::implementation::Implementation;
use crate::metrics::InitializationMode;
use crate::symbols::Operation;
use crate::types::{OemCryptoResult, ProvisioningMethod};
use crate::utils::file_size;

/// First version that can provision through an OEM certificate.
const PROVISIONING_30_VERSION: u32 = 12;

/// Check the module's root of trust, installing the factory keybox if it
/// has none.
///
/// `Ok` carries the mode under which Level 1 stays in use; `Err` carries the
/// mode to report when the adapter must fall back to Level 3. The caller
/// tears the module down on `Err`.
pub fn bootstrap(
    hardware: &Implementation,
    factory_keybox: Option<&Path>,
) -> std::result::Result<InitializationMode, InitializationMode> {
    if hardware.call(Operation::IsKeyboxValid, |e| e.is_keybox_valid()).is_success() {
        return Ok(InitializationMode::L1WithKeybox);
    }

    if hardware.version() >= PROVISIONING_30_VERSION
        && hardware
            .get(Operation::GetProvisioningMethod)
            .is_ok_and(|e| e.get_provisioning_method() == ProvisioningMethod::OemCertificate)
    {
        return Ok(InitializationMode::L1WithProvisioning30);
    }

    // A module without key data identifies itself with a baked-in certificate.
    let mut buffer = [0u8; 1];
    let mut length = 0usize;
    let status = hardware.call(Operation::GetKeyData, |e| e.get_key_data(&mut buffer, &mut length));
    if status == OemCryptoResult::ERROR_NOT_IMPLEMENTED {
        return Ok(InitializationMode::L1WithCertificate);
    }

    let Some(path) = factory_keybox else {
        warn!("Bad Level 1 keybox. Falling back to L3.");
        return Err(InitializationMode::L3BadKeybox);
    };
    if file_size(path).unwrap_or(0) == 0 {
        warn!("Could not find {}. Falling back to L3.", path.display());
        return Err(InitializationMode::L3CouldNotOpenFactoryKeybox);
    }
    let keybox = std::fs::read(path).map_err(|err| {
        warn!("Could not open {}: {}. Falling back to L3.", path.display(), err);
        InitializationMode::L3CouldNotOpenFactoryKeybox
    })?;

    let status = hardware.call(Operation::InstallKeybox, |e| e.install_keybox(&keybox));
    if !status.is_success() {
        error!(
            "Could not install keybox from {} ({}). Falling back to L3.",
            path.display(),
            status
        );
        return Err(InitializationMode::L3CouldNotInstallKeybox);
    }
    info!("Installed keybox from {}", path.display());
    Ok(InitializationMode::L1InstalledKeybox)
}
