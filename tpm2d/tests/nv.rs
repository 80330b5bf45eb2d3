// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

mod common;

use common::{mock_context, NvSlot, NV_INDEX};
use tpm2::{tpm_rc, tpm_rh, Authorization, TpmCc, TpmaNv};
use tpm2d::{Config, Error, Hierarchy};

#[test]
fn write_larger_than_max_buffer_opens_no_session() {
    let (mut ctx, state) = mock_context(Config::default());
    {
        let mut s = state.lock().unwrap();
        s.nv_buffer_max = Some(16);
        s.define_ordinary(NV_INDEX, 64, &[]);
    }
    let err = ctx.device().unwrap().nv_write(NV_INDEX, None, &[7; 32]).unwrap_err();
    assert!(matches!(err, Error::InsufficientBuffer(_)));

    let s = state.lock().unwrap();
    assert_eq!(s.count(TpmCc::StartAuthSession), 0);
    assert_eq!(s.codes(), vec![TpmCc::GetCapability]);
}

#[test]
fn write_flushes_its_session_once() {
    let (mut ctx, state) = mock_context(Config::default());
    state.lock().unwrap().define_ordinary(NV_INDEX, 8, &[]);

    ctx.device().unwrap().nv_write(NV_INDEX, Some("idx"), b"sealed!!").unwrap();

    let s = state.lock().unwrap();
    assert_eq!(s.nv[&NV_INDEX].data, b"sealed!!");
    assert_eq!(s.started.len(), 1);
    assert_eq!(s.flushed, s.started);
    assert!(s.open_sessions.is_empty());

    let start = s.last(TpmCc::StartAuthSession).unwrap();
    assert_eq!(start.handles, vec![tpm_rh::NULL, NV_INDEX]);
    assert_eq!(start.bind_auth.as_deref(), Some(&b"idx"[..]));

    let write = s.last(TpmCc::NvWrite).unwrap();
    assert_eq!(write.handles, vec![NV_INDEX, NV_INDEX]);
    let Authorization::Session { handle, attributes, auth } = &write.auths[0] else {
        panic!("NV write must run under a session");
    };
    assert_eq!(*handle, s.started[0]);
    assert!(attributes.decrypt() && !attributes.encrypt());
    assert_eq!(auth, b"idx");
}

#[test]
fn write_error_still_flushes_once() {
    let (mut ctx, state) = mock_context(Config::default());
    {
        let mut s = state.lock().unwrap();
        s.define_ordinary(NV_INDEX, 8, &[]);
        s.fail.insert(TpmCc::NvWrite, 0x149);
    }
    let err = ctx.device().unwrap().nv_write(NV_INDEX, None, b"x").unwrap_err();
    assert_eq!(err.rc(), Some(0x149));

    let s = state.lock().unwrap();
    assert_eq!(s.count(TpmCc::FlushContext), 1);
    assert_eq!(s.flushed, s.started);
}

#[test]
fn flush_failure_after_success_is_reported() {
    let (mut ctx, state) = mock_context(Config::default());
    {
        let mut s = state.lock().unwrap();
        s.define_ordinary(NV_INDEX, 8, &[]);
        s.fail.insert(TpmCc::FlushContext, tpm_rc::HANDLE);
    }
    let err = ctx.device().unwrap().nv_write(NV_INDEX, None, b"data").unwrap_err();
    assert!(matches!(
        err,
        Error::Protocol {
            command: TpmCc::FlushContext,
            ..
        }
    ));

    let s = state.lock().unwrap();
    assert_eq!(s.nv[&NV_INDEX].data, b"data");
    assert_eq!(s.count(TpmCc::FlushContext), 1);
}

#[test]
fn write_falls_back_when_capability_query_fails() {
    let (mut ctx, state) = mock_context(Config::default());
    {
        let mut s = state.lock().unwrap();
        s.nv_buffer_max = None;
        s.define_ordinary(NV_INDEX, 1024, &[]);
    }
    let tpm = ctx.device().unwrap();
    assert_eq!(tpm.nv_max_buffer(), 512);
    assert!(matches!(
        tpm.nv_write(NV_INDEX, None, &[0; 513]),
        Err(Error::InsufficientBuffer(_))
    ));
    tpm.nv_write(NV_INDEX, None, &[1; 512]).unwrap();
}

#[test]
fn read_beyond_caller_capacity_opens_no_session() {
    let (mut ctx, state) = mock_context(Config::default());
    state.lock().unwrap().define_ordinary(NV_INDEX, 64, &[3; 64]);

    let err = ctx.device().unwrap().nv_read(NV_INDEX, None, 16).unwrap_err();
    assert!(matches!(err, Error::InsufficientBuffer(_)));

    let s = state.lock().unwrap();
    assert_eq!(s.count(TpmCc::StartAuthSession), 0);
    assert_eq!(s.count(TpmCc::FlushContext), 0);
}

#[test]
fn read_beyond_device_max_is_refused() {
    let (mut ctx, state) = mock_context(Config::default());
    {
        let mut s = state.lock().unwrap();
        s.nv_buffer_max = Some(32);
        s.define_ordinary(NV_INDEX, 64, &[3; 64]);
    }
    let err = ctx.device().unwrap().nv_read(NV_INDEX, None, 4096).unwrap_err();
    assert!(matches!(err, Error::InsufficientBuffer(_)));
    assert_eq!(state.lock().unwrap().count(TpmCc::StartAuthSession), 0);
}

#[test]
fn read_returns_declared_size() {
    let (mut ctx, state) = mock_context(Config::default());
    state.lock().unwrap().define_ordinary(NV_INDEX, 4, b"abcdefgh");

    let data = ctx.device().unwrap().nv_read(NV_INDEX, Some("pw"), 4).unwrap();
    assert_eq!(data, b"abcd");

    let s = state.lock().unwrap();
    assert_eq!(s.flushed, s.started);
    let read = s.last(TpmCc::NvRead).unwrap();
    let Authorization::Session { attributes, .. } = &read.auths[0] else {
        panic!("NV read must run under a session");
    };
    assert!(attributes.encrypt() && !attributes.decrypt());
    // size, offset
    assert_eq!(read.params, vec![0, 4, 0, 0]);
}

#[test]
fn read_error_still_flushes_once() {
    let (mut ctx, state) = mock_context(Config::default());
    {
        let mut s = state.lock().unwrap();
        s.define_ordinary(NV_INDEX, 4, b"abcd");
        s.fail.insert(TpmCc::NvRead, tpm_rc::NV_UNINITIALIZED);
    }
    let err = ctx.device().unwrap().nv_read(NV_INDEX, None, 4).unwrap_err();
    assert_eq!(err.rc(), Some(tpm_rc::NV_UNINITIALIZED));
    let s = state.lock().unwrap();
    assert_eq!(s.started.len(), 1);
    assert_eq!(s.flushed, s.started);
}

#[test]
fn define_space_under_owner() {
    let (mut ctx, state) = mock_context(Config::default());
    let tpm = ctx.device().unwrap();
    tpm.nv_define_space(Hierarchy::Owner, NV_INDEX, 32, Some("owner"), Some("idx"))
        .unwrap();
    assert_eq!(tpm.nv_data_size(NV_INDEX).unwrap(), 32);

    let s = state.lock().unwrap();
    let slot = &s.nv[&NV_INDEX];
    assert!(slot.attributes.contains(TpmaNv::OWNER_READ | TpmaNv::OWNER_WRITE));
    assert!(slot.attributes.contains(TpmaNv::AUTH_READ | TpmaNv::AUTH_WRITE));
    assert!(!slot.attributes.contains(TpmaNv::PP_WRITE));

    let start = s.last(TpmCc::StartAuthSession).unwrap();
    assert_eq!(start.handles[1], tpm_rh::OWNER);
    let define = s.last(TpmCc::NvDefineSpace).unwrap();
    assert_eq!(define.handles, vec![tpm_rh::OWNER]);
    // the index password leads the parameters and is encrypted in transit
    assert_eq!(&define.params[..5], &[0, 3, b'i', b'd', b'x']);
    assert_eq!(s.flushed, s.started);
}

#[test]
fn define_space_error_still_flushes_once() {
    let (mut ctx, state) = mock_context(Config::default());
    state.lock().unwrap().define_ordinary(NV_INDEX, 8, &[]);

    let err = ctx
        .device()
        .unwrap()
        .nv_define_space(Hierarchy::Platform, NV_INDEX, 8, None, None)
        .unwrap_err();
    assert_eq!(err.rc(), Some(tpm_rc::NV_DEFINED));
    let s = state.lock().unwrap();
    assert_eq!(s.count(TpmCc::FlushContext), 1);
    assert!(s.open_sessions.is_empty());
}

#[test]
fn undefine_space_removes_index() {
    let (mut ctx, state) = mock_context(Config::default());
    state.lock().unwrap().define_ordinary(NV_INDEX, 8, &[]);
    ctx.device()
        .unwrap()
        .nv_undefine_space(Hierarchy::Owner, NV_INDEX, Some("owner"))
        .unwrap();
    let s = state.lock().unwrap();
    assert!(s.nv.is_empty());
    let req = s.last(TpmCc::NvUndefineSpace).unwrap();
    assert_eq!(req.handles, vec![tpm_rh::OWNER, NV_INDEX]);
    assert_eq!(req.auths, vec![Authorization::Password(b"owner".to_vec())]);
}

#[test]
fn wrong_handle_type_never_reaches_the_device() {
    let (mut ctx, state) = mock_context(Config::default());
    let tpm = ctx.device().unwrap();
    assert!(matches!(
        tpm.nv_write(0x81000001, None, b"x"),
        Err(Error::BadHandle(0x81000001))
    ));
    assert!(matches!(tpm.nv_read(0x80000000, None, 8), Err(Error::BadHandle(_))));
    assert!(matches!(
        tpm.nv_define_space(Hierarchy::Owner, tpm_rh::OWNER, 8, None, None),
        Err(Error::BadHandle(_))
    ));
    assert!(state.lock().unwrap().requests.is_empty());
}

#[test]
fn non_ordinary_index_reports_zero_size() {
    let (mut ctx, state) = mock_context(Config::default());
    state.lock().unwrap().nv.insert(
        NV_INDEX,
        NvSlot {
            attributes: TpmaNv::new().with_nv_type(1),
            data_size: 8,
            data: Vec::new(),
        },
    );
    assert_eq!(ctx.device().unwrap().nv_data_size(NV_INDEX).unwrap(), 0);
}

#[test]
fn data_size_query_errors_propagate() {
    let (mut ctx, _state) = mock_context(Config::default());
    let err = ctx.device().unwrap().nv_data_size(NV_INDEX).unwrap_err();
    assert_eq!(err.rc(), Some(tpm_rc::HANDLE));
}
