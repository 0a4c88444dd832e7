/*
 * SPDX-FileCopyrightText: Copyright (c) 2023-2025, NVIDIA CORPORATION. All rights reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::{
    error::Error,
    ffi::CStr,
    fmt::{Display, Write},
};
use syslog_tracing::Syslog;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const SYSLOG_IDENT: &CStr = c"ktdeploy";

pub const ENV_SYSLOG: &str = "KTDEPLOY_SYSLOG";

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum Verbosity {
    Quiet,
    #[default]
    Normal,
    Verbose,
}

impl Verbosity {
    fn directive(self) -> &'static str {
        match self {
            Verbosity::Quiet => "warn",
            Verbosity::Normal => "info",
            Verbosity::Verbose => "debug",
        }
    }
}

pub trait DisplayOptExt {
    fn display<'a>(&'a self) -> Box<dyn tracing::Value + 'a>;
}

impl<T: Display> DisplayOptExt for Option<T> {
    fn display(&self) -> Box<dyn tracing::Value + '_> {
        match self.as_ref() {
            Some(v) => Box::new(tracing::field::display(v)),
            None => Box::new(tracing::field::Empty),
        }
    }
}

pub trait ErrorChainExt {
    fn chain(&self) -> impl tracing::Value;
}

impl<T: Error + ?Sized> ErrorChainExt for T {
    fn chain(&self) -> impl tracing::Value {
        let mut err = String::new();
        let mut src = self.source();

        write!(err, "{}", self).ok();
        while let Some(s) = src {
            write!(err, ": {}", s).ok();
            src = s.source();
        }
        err
    }
}

fn syslog() -> Result<Syslog, crate::Error> {
    Syslog::new(SYSLOG_IDENT, Default::default(), Default::default()).ok_or(crate::Error::SyslogInit)
}

/// Installs the global subscriber. `RUST_LOG` takes precedence over the requested verbosity.
pub fn setup_logging(verbosity: Verbosity) -> Result<(), crate::Error> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(verbosity.directive()));

    let layer = if std::env::var(ENV_SYSLOG).is_ok() {
        fmt::layer()
            .without_time()
            .with_level(false)
            .compact()
            .with_writer(syslog()?)
            .boxed()
    } else {
        fmt::layer().with_writer(std::io::stderr).with_target(false).boxed()
    };

    tracing_subscriber::registry().with(filter).with(layer).init();

    Ok(())
}
