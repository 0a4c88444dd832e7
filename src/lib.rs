/*
 * SPDX-FileCopyrightText: Copyright (c) 2023-2025, NVIDIA CORPORATION. All rights reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

mod conf;
mod distribute;
mod dns;
mod exec;
mod export;
mod inventory;
mod ipa;
mod krb;
mod prompt;
mod reconcile;
mod record;
#[cfg(test)]
mod testing;
mod trace;

pub use crate::conf::{Config, Overrides};
pub use crate::prompt::parse_answer;
pub use crate::record::{Kind, PrincipalRecord};
pub use crate::reconcile::Summary;
pub use crate::trace::{Verbosity, setup_logging};

use crate::distribute::{Distributor, Remote, Ssh};
use crate::export::{Exporter, Ownership, System};
use crate::inventory::Inventory;
use crate::ipa::{Directory, Ipa};
use crate::krb::{CredentialCheck, Klist};
use crate::prompt::{Confirm, Prompt};
use crate::reconcile::Reconciler;
use crate::trace::*;

use nix::unistd;
use snafu::prelude::*;
use std::{path::PathBuf, time::Duration};
use tokio::time::Instant;

const EXPORT_QUESTION: &str = "Export keytabs?";
const DISTRIBUTE_QUESTION: &str = "Rsync keytabs?";

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Invalid input"), context(false))]
    Input { source: record::Error },
    #[snafu(display("Invalid configuration"), context(false))]
    Configuration { source: conf::Error },
    #[snafu(display("External command error"), context(false))]
    Collaborator { source: exec::Error },
    #[snafu(display("Keytab export error"), context(false))]
    Export { source: export::Error },
    #[snafu(display("Keytab distribution error"), context(false))]
    Distribute { source: distribute::Error },
    #[snafu(display("No valid Kerberos credentials found in cache, run kinit first"))]
    NoCredentials,
    #[snafu(display("Failed to read confirmation"), context(false))]
    Confirmation { source: prompt::Error },
    #[snafu(display("Run did not complete within {}s", timeout.as_secs()))]
    Timeout { timeout: Duration },
    #[snafu(display("Run deadline passed before {step}"))]
    Deadline { step: &'static str },
    #[snafu(display("Syslog initialization error"))]
    SyslogInit,
}

pub struct Options {
    pub input: PathBuf,
    pub export: Option<bool>,
    pub distribute: Option<bool>,
    pub dry_run: bool,
}

/// Outcome of a run. `None` marks a step that was declined or skipped.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Report {
    pub records: usize,
    pub reconciled: Summary,
    pub exported: Option<usize>,
    pub distributed: Option<usize>,
}

impl Report {
    pub fn log(&self) {
        tracing::info!(
            records = self.records,
            hosts_created = self.reconciled.hosts,
            users_created = self.reconciled.users,
            services_created = self.reconciled.services,
            skipped = self.reconciled.skipped,
            keytabs_exported = self.exported.display(),
            hosts_distributed = self.distributed.display(),
            "run complete"
        );
    }
}

/// Sequences one run over validated records: credential check, inventory, reconciliation, export, distribution.
pub struct Provisioner<'a, D, K, O, R> {
    pub directory: &'a D,
    pub credentials: &'a K,
    pub ownership: &'a O,
    pub remote: &'a R,
    pub email_domain: Option<String>,
    pub local_host: String,
    pub stamp: String,
    pub dry_run: bool,
    pub deadline: Option<Instant>,
}

impl<D, K, O, R> Provisioner<'_, D, K, O, R>
where
    D: Directory,
    K: CredentialCheck,
    O: Ownership,
    R: Remote,
{
    fn check_deadline(&self, step: &'static str) -> Result<(), Error> {
        if let Some(deadline) = self.deadline {
            ensure!(Instant::now() < deadline, DeadlineSnafu { step });
        }
        Ok(())
    }

    #[tracing::instrument(skip_all, fields(dry_run = self.dry_run, stamp = %self.stamp))]
    pub async fn provision(
        &self,
        records: &[PrincipalRecord],
        export: &mut impl Confirm,
        distribute: &mut impl Confirm,
    ) -> Result<Report, Error> {
        let mut report = Report {
            records: records.len(),
            ..Default::default()
        };

        export::check_conflicts(records)?;
        ensure!(self.credentials.has_valid_ticket().await?, NoCredentialsSnafu);

        let inventory = Inventory::fetch(self.directory).await?;
        report.reconciled = Reconciler::new(self.directory, inventory)
            .email_domain(self.email_domain.clone())
            .dry_run(self.dry_run)
            .reconcile(records)
            .await?;

        if self.dry_run {
            tracing::info!("dry run, skipping keytab export and distribution");
            return Ok(report);
        }

        if export.confirm(EXPORT_QUESTION).await? {
            self.check_deadline("keytab export")?;
            let exporter = Exporter::new(self.directory, self.ownership, &self.stamp);
            report.exported = Some(exporter.export(records).await?);
        } else {
            tracing::info!("skipping keytab export");
        }

        if distribute.confirm(DISTRIBUTE_QUESTION).await? {
            self.check_deadline("keytab distribution")?;
            let distributor = Distributor::new(self.remote, &self.local_host, &self.stamp);
            report.distributed = Some(distributor.distribute(records).await?);
        } else {
            tracing::info!("skipping keytab distribution");
        }

        Ok(report)
    }
}

/// Name under which this host appears in the input file.
async fn local_host(config: &Config) -> String {
    if let Some(host) = &config.local_host {
        return host.to_lowercase();
    }
    match dns::local_fqdn().await {
        Ok(fqdn) => fqdn,
        Err(error) => {
            tracing::warn!(error = error.chain(), "could not resolve local host name, using the system host name");
            unistd::gethostname()
                .map(|h| h.to_string_lossy().into_owned())
                .unwrap_or_else(|_| "localhost".to_owned())
        }
    }
}

async fn execute(config: &Config, opts: Options, deadline: Instant) -> Result<Report, Error> {
    let records = record::read_records(&opts.input)?;

    let local_host = local_host(config).await;
    let server = config.server.clone().unwrap_or_else(|| local_host.clone());
    let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S").to_string();
    tracing::debug!(%local_host, %server, %stamp, "starting run");

    let directory = Ipa::new(config, server);
    let credentials = Klist::new(&config.commands.klist);
    let remote = Ssh::new(&config.commands.ssh, &config.commands.rsync, config.remote_user.clone());

    let provisioner = Provisioner {
        directory: &directory,
        credentials: &credentials,
        ownership: &System,
        remote: &remote,
        email_domain: config.email_domain.clone(),
        local_host,
        stamp,
        dry_run: opts.dry_run,
        deadline: Some(deadline),
    };
    provisioner
        .provision(&records, &mut Prompt::new(opts.export), &mut Prompt::new(opts.distribute))
        .await
}

/// Runs the whole pipeline under the configured watchdog.
pub async fn run(config: &Config, opts: Options) -> Result<Report, Error> {
    let timeout = config.timeout();
    let deadline = Instant::now() + timeout;

    match tokio::time::timeout_at(deadline, execute(config, opts, deadline)).await {
        Ok(res) => res,
        Err(_) => TimeoutSnafu { timeout }.fail(),
    }
}
