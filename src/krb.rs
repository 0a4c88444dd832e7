/*
 * SPDX-FileCopyrightText: Copyright (c) 2023-2025, NVIDIA CORPORATION. All rights reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use crate::exec;

use tokio::process::Command;

/// Checks whether the current user holds usable Kerberos credentials.
#[allow(async_fn_in_trait)]
pub trait CredentialCheck {
    async fn has_valid_ticket(&self) -> Result<bool, exec::Error>;
}

/// Credential check backed by `klist -s`, which exits non-zero when the default cache holds no valid ticket.
pub struct Klist {
    program: String,
}

impl Klist {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl CredentialCheck for Klist {
    #[tracing::instrument(skip_all)]
    async fn has_valid_ticket(&self) -> Result<bool, exec::Error> {
        let out = exec::output(Command::new(&self.program).arg("-s")).await?;
        tracing::debug!(status = ?out.status.code(), "checked credentials cache");
        Ok(out.status.success())
    }
}
