// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

mod common;

use common::{mock_context, MockTpm};
use tpm2::{tpm_rc, tpm_rh, PlatformSignal, TpmCc, TpmSu};
use tpm2d::{Config, Error, SessionKind, TpmContext};

#[test]
fn unopened_context_has_no_device() {
    let mut ctx = TpmContext::new(Config::default());
    assert!(!ctx.is_open());
    assert!(matches!(ctx.device(), Err(Error::NoDevice)));
    assert!(matches!(ctx.destroy(), Err(Error::NoDevice)));
}

#[test]
fn second_init_is_refused() {
    let (mut ctx, _state) = mock_context(Config::default());
    let (other, _) = MockTpm::new();
    assert!(matches!(ctx.init(Box::new(other)), Err(Error::AlreadyOpen)));
    assert!(matches!(ctx.open(), Err(Error::AlreadyOpen)));

    ctx.destroy().unwrap();
    assert!(matches!(ctx.device(), Err(Error::NoDevice)));
    let (again, _) = MockTpm::new();
    ctx.init(Box::new(again)).unwrap();
}

#[test]
fn startup_sequence() {
    let (mut ctx, state) = mock_context(Config::default());
    let tpm = ctx.device().unwrap();
    tpm.powerup().unwrap();
    tpm.startup(TpmSu::Clear).unwrap();
    tpm.selftest().unwrap();
    tpm.clear(Some("lockout")).unwrap();

    let s = state.lock().unwrap();
    assert_eq!(
        s.signals,
        vec![PlatformSignal::PowerOff, PlatformSignal::PowerOn, PlatformSignal::NvOn]
    );
    assert_eq!(s.codes(), vec![TpmCc::Startup, TpmCc::SelfTest, TpmCc::Clear]);
    assert_eq!(s.requests[0].params, vec![0, 0]);
    assert_eq!(s.requests[1].params, vec![1]);
    assert_eq!(s.requests[2].handles, vec![tpm_rh::LOCKOUT]);
}

#[test]
fn protocol_errors_carry_code_and_text() {
    let (mut ctx, state) = mock_context(Config::default());
    state.lock().unwrap().fail.insert(TpmCc::Startup, tpm_rc::INITIALIZE);

    let err = ctx.device().unwrap().startup(TpmSu::Clear).unwrap_err();
    let Error::Protocol {
        command,
        rc,
        description,
    } = &err
    else {
        panic!("expected a protocol error, got {err}");
    };
    assert_eq!((*command, *rc), (TpmCc::Startup, tpm_rc::INITIALIZE));
    assert!(description.starts_with("TPM_RC_INITIALIZE"));
    assert!(err.to_string().contains("CC_Startup"));
}

#[test]
fn dropped_session_guard_flushes() {
    let (mut ctx, state) = mock_context(Config::default());
    let handle = {
        let session = ctx
            .device()
            .unwrap()
            .open_session(SessionKind::Hmac, tpm_rh::OWNER, Some(&b"owner"[..]))
            .unwrap();
        session.handle()
    };
    let s = state.lock().unwrap();
    assert_eq!(s.flushed, vec![handle]);
    assert_eq!(s.last(TpmCc::StartAuthSession).unwrap().bind_auth, Some(b"owner".to_vec()));
}

#[test]
fn closed_session_is_not_flushed_twice() {
    let (mut ctx, state) = mock_context(Config::default());
    let session = ctx
        .device()
        .unwrap()
        .open_session(SessionKind::Policy, tpm_rh::NULL, Some(&b"ignored"[..]))
        .unwrap();
    session.close().unwrap();

    let s = state.lock().unwrap();
    assert_eq!(s.count(TpmCc::FlushContext), 1);
    let start = s.last(TpmCc::StartAuthSession).unwrap();
    assert_eq!(start.bind_auth, None);
    // nonceCaller, salt, then TPM_SE_POLICY
    assert_eq!(&start.params[..5], &[0, 0, 0, 0, 1]);
}

#[test]
fn session_cipher_follows_config() {
    let config = Config {
        session_encryption: tpm2d::config::SessionCipher::Xor,
        ..Config::default()
    };
    let (mut ctx, state) = mock_context(config);
    ctx.device().unwrap().get_random(4).unwrap();

    let s = state.lock().unwrap();
    let start = s.last(TpmCc::StartAuthSession).unwrap();
    // TPM_ALG_XOR with TPM_ALG_SHA256, then the session hash
    assert_eq!(&start.params[5..], &[0x00, 0x0a, 0x00, 0x0b, 0x00, 0x0b]);
}
