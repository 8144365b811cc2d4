//! End-to-end bring-up against fake native modules.
use std::ffi::c_void;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rsoemcrypto::implementation::ImplementationKind;
use rsoemcrypto::metrics::InitializationMode;
use rsoemcrypto::native::NativeEngine;
use rsoemcrypto::symbols::{StaticSymbols, SYMBOL_TABLE};
use rsoemcrypto::types::HdcpCapability;
use rsoemcrypto::watchdog::AbortPolicy;
use rsoemcrypto::{Adapter, AdapterConfig, Level1Source, OemCryptoResult, SecurityLevel};

const LEVEL1_VERSION: u32 = 12;

extern "C" fn success() -> OemCryptoResult {
    OemCryptoResult::SUCCESS
}

extern "C" fn unused() -> OemCryptoResult {
    OemCryptoResult::ERROR_NOT_IMPLEMENTED
}

extern "C" fn l1_api_version() -> u32 {
    LEVEL1_VERSION
}

extern "C" fn l3_api_version() -> u32 {
    14
}

extern "C" fn open_session(session: *mut u32) -> OemCryptoResult {
    unsafe { *session = 1 };
    OemCryptoResult::SUCCESS
}

extern "C" fn close_session(_session: u32) -> OemCryptoResult {
    OemCryptoResult::SUCCESS
}

static TEST_KEYBOX_LOADED: AtomicBool = AtomicBool::new(false);

extern "C" fn l3_load_test_keybox() -> OemCryptoResult {
    TEST_KEYBOX_LOADED.store(true, Ordering::SeqCst);
    OemCryptoResult::SUCCESS
}

extern "C" fn l1_hdcp(current: *mut u32, maximum: *mut u32) -> OemCryptoResult {
    unsafe {
        *current = 3;
        *maximum = 4;
    }
    OemCryptoResult::SUCCESS
}

fn software_symbols() -> StaticSymbols {
    StaticSymbols::new()
        .with("_lcc01", success as *const c_void)
        .with("_lcc02", success as *const c_void)
        .with("_lcc22", l3_api_version as *const c_void)
        .with("_lcc09", open_session as *const c_void)
        .with("_lcc10", close_session as *const c_void)
}

fn software() -> Arc<NativeEngine> {
    Arc::new(NativeEngine::software(&software_symbols()).expect("software binds"))
}

/// A complete module at [`LEVEL1_VERSION`]. Entry points the tests never
/// call share one placeholder.
fn level1() -> StaticSymbols {
    let mut symbols = StaticSymbols::new();
    for descriptor in SYMBOL_TABLE.iter().filter(|d| d.covers(LEVEL1_VERSION)) {
        symbols.insert(descriptor.symbol, unused as *const c_void);
    }
    symbols
        .insert("OEMCrypto_Initialize", success as *const c_void)
        .insert("OEMCrypto_Terminate", success as *const c_void)
        .insert("OEMCrypto_APIVersion", l1_api_version as *const c_void)
        .insert("OEMCrypto_IsKeyboxValid", success as *const c_void)
        .insert("OEMCrypto_OpenSession", open_session as *const c_void)
        .insert("OEMCrypto_CloseSession", close_session as *const c_void)
        .insert("OEMCrypto_GetHDCPCapability", l1_hdcp as *const c_void);
    symbols
}

fn config(dir: &std::path::Path) -> AdapterConfig {
    AdapterConfig::default()
        .with_device_files(dir)
        .with_abort_policy(AbortPolicy::ReturnError)
}

#[test]
fn resolved_level1_serves_the_default_level() {
    let dir = tempfile::tempdir().expect("tempdir");
    let adapter = Adapter::initialize_with(
        config(dir.path()),
        software(),
        Level1Source::Symbols(Box::new(level1())),
    )
    .expect("initialize");

    assert_eq!(adapter.metrics().mode, Some(InitializationMode::L1WithKeybox));
    assert_eq!(adapter.metrics().l1_api_version, Some(LEVEL1_VERSION));
    assert_eq!(adapter.default_kind(), ImplementationKind::Hardware);
    assert_eq!(adapter.api_version(SecurityLevel::Default), LEVEL1_VERSION);
    assert_eq!(adapter.api_version(SecurityLevel::Level3), 14);

    let hdcp = adapter.get_hdcp_capability(SecurityLevel::Default).expect("hdcp");
    assert_eq!(hdcp, (HdcpCapability::V2_1, HdcpCapability::V2_2));

    let hardware = adapter.open_session(SecurityLevel::Default).expect("open");
    let software = adapter.open_session(SecurityLevel::Level3).expect("open");
    assert_ne!(hardware, software);
    adapter.close_session(hardware).expect("close");

    adapter.terminate().expect("terminate");
}

#[test]
fn missing_entry_point_falls_back_to_level3() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut symbols = level1();
    symbols.remove("OEMCrypto_GenerateNonce");
    let adapter = Adapter::initialize_with(
        config(dir.path()),
        software(),
        Level1Source::Symbols(Box::new(symbols)),
    )
    .expect("initialize");

    assert_eq!(adapter.metrics().mode, Some(InitializationMode::L3L1LoadFailed));
    assert_eq!(adapter.metrics().l1_api_version, Some(LEVEL1_VERSION));
    assert_eq!(adapter.default_kind(), ImplementationKind::Software);
}

#[test]
fn module_without_bootstrap_symbols_is_invalid() {
    let dir = tempfile::tempdir().expect("tempdir");
    let adapter = Adapter::initialize_with(
        config(dir.path()),
        software(),
        Level1Source::Symbols(Box::new(StaticSymbols::new())),
    )
    .expect("initialize");

    assert_eq!(adapter.metrics().mode, Some(InitializationMode::L3InvalidL1));
    assert_eq!(adapter.api_version(SecurityLevel::Default), 14);
}

#[test]
fn unopenable_library_is_reported() {
    let dir = tempfile::tempdir().expect("tempdir");
    let adapter = Adapter::initialize_with(
        config(dir.path()),
        software(),
        Level1Source::Library(dir.path().join("liboemcrypto.so")),
    )
    .expect("initialize");

    assert_eq!(adapter.metrics().mode, Some(InitializationMode::L3L1OpenFailed));
}

#[test]
fn level3_at_v14_loads_a_test_keybox_through_its_legacy_entry() {
    let dir = tempfile::tempdir().expect("tempdir");
    let symbols = software_symbols().with("_lcc42", l3_load_test_keybox as *const c_void);
    let software = NativeEngine::software(&symbols).expect("software binds");
    let adapter = Adapter::initialize_with(config(dir.path()), Arc::new(software), Level1Source::Configured)
        .expect("initialize");

    assert_eq!(adapter.metrics().mode, Some(InitializationMode::L3NoL1LibraryPath));
    assert_eq!(adapter.api_version(SecurityLevel::Default), 14);
    adapter.load_test_keybox(&[0; 128]).expect("test keybox loaded");
    assert!(TEST_KEYBOX_LOADED.load(Ordering::SeqCst));
}
