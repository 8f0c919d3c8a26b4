// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[yare::parameterized(
    job   = { ExecError::Job(sqlx::Error::RowNotFound), 1 },
    setup = { ExecError::Setup(sqlx::Error::PoolTimedOut), 2 },
)]
fn exec_error_exit_codes(error: ExecError, code: i32) {
    assert_eq!(error.exit_code(), code);
}

#[test]
fn client_side_errors_carry_no_sqlstate() {
    assert_eq!(ExecError::Job(sqlx::Error::RowNotFound).sqlstate(), None);
    assert_eq!(ExecError::Setup(sqlx::Error::PoolClosed).sqlstate(), None);
}
