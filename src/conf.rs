/*
 * SPDX-FileCopyrightText: Copyright (c) 2023-2025, NVIDIA CORPORATION. All rights reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use crate::trace::*;

use serde::Deserialize;
use snafu::prelude::*;
use std::{path::Path, time::Duration};

pub const DEFAULT_CONFIG: &str = "/etc/ktdeploy";
pub const ENV_PREFIX: &str = "KTDEPLOY";

const DEFAULT_TIMEOUT: u64 = 3600;

#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum Error {
    #[snafu(display("Failed to load configuration"))]
    Load { source: config::ConfigError },
    #[snafu(display("Bind DN and bind password must be given together"))]
    PartialBind,
    #[snafu(display("Timeout must be greater than zero"))]
    ZeroTimeout,
}

#[derive(Deserialize)]
#[serde(default)]
pub struct Commands {
    pub ipa: String,
    pub ipa_getkeytab: String,
    pub klist: String,
    pub ssh: String,
    pub rsync: String,
}

impl Default for Commands {
    fn default() -> Self {
        Self {
            ipa: "ipa".to_owned(),
            ipa_getkeytab: "ipa-getkeytab".to_owned(),
            klist: "klist".to_owned(),
            ssh: "ssh".to_owned(),
            rsync: "rsync".to_owned(),
        }
    }
}

#[derive(Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: Option<String>,
    pub bind_dn: Option<String>,
    pub bind_password: Option<String>,
    pub email_domain: Option<String>,
    pub local_host: Option<String>,
    pub remote_user: Option<String>,
    pub timeout: u64,
    pub commands: Commands,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: None,
            bind_dn: None,
            bind_password: None,
            email_domain: None,
            local_host: None,
            remote_user: None,
            timeout: DEFAULT_TIMEOUT,
            commands: Default::default(),
        }
    }
}

/// Settings given on the command line, which take precedence over the file and the environment.
#[derive(Default)]
pub struct Overrides {
    pub server: Option<String>,
    pub bind_dn: Option<String>,
    pub bind_password: Option<String>,
}

fn environment() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

impl Config {
    /// Loads the configuration file (`path` or the optional system-wide one), then `KTDEPLOY_*` variables,
    /// then `overrides`.
    pub fn load(path: Option<&Path>, overrides: Overrides) -> Result<Self, Error> {
        Self::load_from(path, environment(), overrides)
    }

    fn load_from(path: Option<&Path>, env: config::Environment, overrides: Overrides) -> Result<Self, Error> {
        let file = match path {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name(DEFAULT_CONFIG).required(false),
        };

        let config: Config = config::Config::builder()
            .add_source(file)
            .add_source(env)
            .set_override_option("server", overrides.server)
            .and_then(|b| b.set_override_option("bind_dn", overrides.bind_dn))
            .and_then(|b| b.set_override_option("bind_password", overrides.bind_password))
            .and_then(|b| b.build())
            .and_then(config::Config::try_deserialize)
            .context(Load)?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), Error> {
        ensure!(self.bind_dn.is_some() == self.bind_password.is_some(), PartialBind);
        ensure!(self.timeout > 0, ZeroTimeout);
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    pub fn log(&self) {
        tracing::debug!(
            config.server = self.server.display(),
            config.bind_dn = self.bind_dn.display(),
            config.bind_password = self.bind_password.is_some(),
            config.email_domain = self.email_domain.display(),
            config.local_host = self.local_host.display(),
            config.remote_user = self.remote_user.display(),
            config.timeout = self.timeout,
            "loaded configuration"
        );
    }
}
