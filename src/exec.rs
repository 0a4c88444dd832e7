/*
 * SPDX-FileCopyrightText: Copyright (c) 2023-2025, NVIDIA CORPORATION. All rights reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use snafu::prelude::*;
use std::{
    io,
    process::{ExitStatus, Output, Stdio},
};
use tokio::process::Command;

#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum Error {
    #[snafu(display("Failed to execute `{program}`"))]
    Spawn { program: String, source: io::Error },
    #[snafu(display("Command `{program}` failed ({status}): {stderr}"))]
    Status {
        program: String,
        status: ExitStatus,
        stderr: String,
    },
}

fn program(cmd: &Command) -> String {
    cmd.as_std().get_program().to_string_lossy().into_owned()
}

/// Runs the command to completion without checking its exit status.
pub async fn output(cmd: &mut Command) -> Result<Output, Error> {
    let program = program(cmd);

    tracing::debug!(%program, "executing command");
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .context(Spawn { program })
}

/// Runs the command to completion and returns its standard output, failing on a non-zero exit status.
pub async fn run(cmd: &mut Command) -> Result<String, Error> {
    let out = output(cmd).await?;

    check(cmd, out).map(|out| String::from_utf8_lossy(&out.stdout).into_owned())
}

pub fn check(cmd: &Command, out: Output) -> Result<Output, Error> {
    if out.status.success() {
        return Ok(out);
    }
    Err(Error::Status {
        program: program(cmd),
        status: out.status,
        stderr: String::from_utf8_lossy(&out.stderr).trim().to_owned(),
    })
}
