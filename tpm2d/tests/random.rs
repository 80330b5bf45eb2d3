// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

mod common;

use common::mock_context;
use tpm2::{tpm_rc, tpm_rh, Authorization, TpmCc};
use tpm2d::{Config, Error};

#[test]
fn zero_length_needs_no_device() {
    let (mut ctx, state) = mock_context(Config::default());
    assert!(ctx.device().unwrap().get_random(0).unwrap().is_empty());
    assert!(state.lock().unwrap().requests.is_empty());
}

#[test]
fn accumulates_across_partial_answers() {
    let (mut ctx, state) = mock_context(Config::default());
    state.lock().unwrap().random_chunk = 32;

    let bytes = ctx.device().unwrap().get_random(100).unwrap();
    assert_eq!(bytes.len(), 100);
    assert_eq!(bytes[0], 1);
    assert_eq!(bytes[99], 100);

    let s = state.lock().unwrap();
    assert_eq!(s.count(TpmCc::GetRandom), 4);
    assert_eq!(s.started.len(), 1);
    assert_eq!(s.flushed, s.started);

    let start = s.last(TpmCc::StartAuthSession).unwrap();
    assert_eq!(start.handles, vec![tpm_rh::NULL, tpm_rh::NULL]);
    assert_eq!(start.bind_auth, None);
    let last = s.last(TpmCc::GetRandom).unwrap();
    // 100 - 3 * 32 bytes left
    assert_eq!(last.params, vec![0, 4]);
    let Authorization::Session { attributes, .. } = &last.auths[0] else {
        panic!("GetRandom must run under a session");
    };
    assert!(attributes.encrypt() && attributes.continue_session());
}

#[test]
fn repeated_empty_answers_become_an_error() {
    let (mut ctx, state) = mock_context(Config::default());
    state.lock().unwrap().random_empty = true;

    let err = ctx.device().unwrap().get_random(16).unwrap_err();
    assert!(matches!(
        err,
        Error::Protocol {
            command: TpmCc::GetRandom,
            rc: tpm_rc::FAILURE,
            ..
        }
    ));
    let s = state.lock().unwrap();
    assert_eq!(s.count(TpmCc::GetRandom), 4);
    assert_eq!(s.flushed, s.started);
}

#[test]
fn failed_request_still_flushes_once() {
    let (mut ctx, state) = mock_context(Config::default());
    state.lock().unwrap().fail.insert(TpmCc::GetRandom, 0x922);

    let err = ctx.device().unwrap().get_random(8).unwrap_err();
    assert_eq!(err.rc(), Some(0x922));
    let s = state.lock().unwrap();
    assert_eq!(s.count(TpmCc::FlushContext), 1);
    assert!(s.open_sessions.is_empty());
}
