/*
 * SPDX-FileCopyrightText: Copyright (c) 2023-2025, NVIDIA CORPORATION. All rights reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use crate::conf::Config;
use crate::exec::{self, Error};

use std::{fmt, path::Path};
use tokio::process::Command;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Entry {
    Host,
    User,
    Service,
}

impl Entry {
    /// Labels under which the primary key of an entry is printed by the listing commands.
    fn labels(self) -> &'static [&'static str] {
        match self {
            Entry::Host => &["Host name"],
            Entry::User => &["User login"],
            Entry::Service => &["Principal name", "Principal"],
        }
    }

    fn command(self) -> &'static str {
        match self {
            Entry::Host => "host-find",
            Entry::User => "user-find",
            Entry::Service => "service-find",
        }
    }
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Entry::Host => f.write_str("host"),
            Entry::User => f.write_str("user"),
            Entry::Service => f.write_str("service"),
        }
    }
}

pub struct NewUser<'a> {
    pub login: &'a str,
    pub display_name: &'a str,
    pub email: &'a str,
}

/// Directory service operations needed to provision principals.
#[allow(async_fn_in_trait)]
pub trait Directory {
    async fn list(&self, entry: Entry) -> Result<Vec<String>, Error>;
    async fn add_host(&self, host: &str) -> Result<(), Error>;
    async fn add_user(&self, user: &NewUser<'_>) -> Result<(), Error>;
    async fn add_service(&self, principal: &str) -> Result<(), Error>;
    /// Generates fresh keys for the principal and writes them to a new keytab at `path`.
    async fn get_keytab(&self, principal: &str, path: &Path) -> Result<(), Error>;
}

/// Extracts the primary keys of a listing printed by the `*-find` commands.
pub fn parse_listing(entry: Entry, output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.trim().split_once(':'))
        .filter(|(label, _)| entry.labels().iter().any(|l| l == label))
        .map(|(_, value)| value.trim().to_owned())
        .filter(|value| !value.is_empty())
        .collect()
}

/// Whether a failed `*-find` invocation merely reported an empty result.
fn is_empty_listing(status: Option<i32>, stdout: &str) -> bool {
    status == Some(1)
        && stdout
            .lines()
            .any(|l| l.trim().starts_with("0 ") && l.trim_end().ends_with("matched"))
}

/// Directory implementation backed by the IPA command line tools.
pub struct Ipa {
    ipa: String,
    getkeytab: String,
    server: String,
    bind: Option<(String, String)>,
}

impl Ipa {
    pub fn new(config: &Config, server: String) -> Self {
        Self {
            ipa: config.commands.ipa.clone(),
            getkeytab: config.commands.ipa_getkeytab.clone(),
            server,
            bind: config.bind_dn.clone().zip(config.bind_password.clone()),
        }
    }

    fn ipa(&self) -> Command {
        let mut cmd = Command::new(&self.ipa);
        cmd.env("LC_ALL", "C");
        cmd
    }
}

impl Directory for Ipa {
    #[tracing::instrument(skip(self))]
    async fn list(&self, entry: Entry) -> Result<Vec<String>, Error> {
        let mut cmd = self.ipa();
        cmd.args([entry.command(), "--pkey-only", "--sizelimit=0"]);

        let out = exec::output(&mut cmd).await?;
        let stdout = String::from_utf8_lossy(&out.stdout).into_owned();
        if is_empty_listing(out.status.code(), &stdout) {
            tracing::debug!("no entries found");
            return Ok(Vec::new());
        }
        exec::check(&cmd, out)?;

        let keys = parse_listing(entry, &stdout);
        tracing::debug!(count = keys.len(), "listed entries");
        Ok(keys)
    }

    #[tracing::instrument(skip(self))]
    async fn add_host(&self, host: &str) -> Result<(), Error> {
        exec::run(self.ipa().args(["host-add", host, "--force"])).await?;
        Ok(())
    }

    #[tracing::instrument(skip_all, fields(user = user.login))]
    async fn add_user(&self, user: &NewUser<'_>) -> Result<(), Error> {
        let mut cmd = self.ipa();
        cmd.args(["user-add", user.login])
            .arg(format!("--first={}", user.login))
            .arg(format!("--last={}", user.login))
            .arg(format!("--displayname={}", user.display_name))
            .arg(format!("--email={}", user.email))
            .arg("--random");
        exec::run(&mut cmd).await?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn add_service(&self, principal: &str) -> Result<(), Error> {
        exec::run(self.ipa().args(["service-add", principal])).await?;
        Ok(())
    }

    #[tracing::instrument(skip(self, path))]
    async fn get_keytab(&self, principal: &str, path: &Path) -> Result<(), Error> {
        let mut cmd = Command::new(&self.getkeytab);
        cmd.arg("-s")
            .arg(&self.server)
            .arg("-p")
            .arg(principal)
            .arg("-k")
            .arg(path);
        if let Some((dn, password)) = &self.bind {
            cmd.arg("-D").arg(dn).arg("-w").arg(password);
        }
        exec::run(&mut cmd).await?;
        Ok(())
    }
}
