//! Backend selection by platform.

use duke_sheets_automation::{
    BackendKind, EngineConfig, EngineFactory, ErrorKind, Platform, SessionState,
};
use pretty_assertions::assert_eq;

#[test]
fn windows_gets_the_com_backend() {
    let engine = EngineFactory::create_for(&Platform::Windows, EngineConfig::default()).unwrap();
    assert_eq!(engine.platform(), Platform::Windows);
    assert_eq!(engine.session().backend_kind(), BackendKind::Windows);
    assert_eq!(engine.session().state(), SessionState::Active);
    engine.teardown().unwrap();
}

#[test]
fn macos_gets_the_applescript_backend() {
    let engine = EngineFactory::create_for(&Platform::MacOs, EngineConfig::default()).unwrap();
    assert_eq!(engine.platform(), Platform::MacOs);
    assert_eq!(engine.session().backend_kind(), BackendKind::Mac);
    engine.teardown().unwrap();
}

#[test]
fn other_platforms_are_rejected_up_front() {
    for os in ["linux", "freebsd", "android"] {
        let err = EngineFactory::create_for(&Platform::from_os(os), EngineConfig::default())
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::UnsupportedPlatform);
        assert!(err.to_string().contains(os));
    }
}

#[test]
fn current_platform_is_detected_once() {
    let first = Platform::current();
    let second = Platform::current();
    assert!(std::ptr::eq(first, second));
    assert_eq!(first.id(), std::env::consts::OS);
}
