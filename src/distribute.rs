/*
 * SPDX-FileCopyrightText: Copyright (c) 2023-2025, NVIDIA CORPORATION. All rights reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use crate::exec;
use crate::export::backup_dir_name;
use crate::record::PrincipalRecord;

use nix::{
    errno::Errno,
    unistd::{self, Gid, Uid},
};
use snafu::prelude::*;
use std::{
    fs::{self, DirBuilder},
    io,
    os::unix::fs::{DirBuilderExt, MetadataExt},
    path::{Path, PathBuf},
};
use tokio::process::Command;

const SSH_OPTIONS: [&str; 6] = [
    "-o",
    "BatchMode=yes",
    "-o",
    "PreferredAuthentications=publickey",
    "-o",
    "PasswordAuthentication=no",
];

#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum Error {
    #[snafu(display("Keytab `{}` has not been exported", path.display()))]
    MissingKeytab { path: PathBuf },
    #[snafu(display("Failed to back up keytabs on `{host}`"))]
    RemoteBackup { host: String, source: exec::Error },
    #[snafu(display("Failed to transfer keytabs to `{host}`"))]
    Transfer { host: String, source: exec::Error },
    #[snafu(display("Failed to copy keytab to `{}`", path.display()))]
    LocalCopy { path: PathBuf, source: io::Error },
    #[snafu(display("Failed to preserve ownership of `{}`", path.display()))]
    LocalOwner { path: PathBuf, source: Errno },
}

/// Keytabs staged for one host and destination directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub host: String,
    pub dir: PathBuf,
    pub names: Vec<String>,
}

impl Batch {
    pub fn sources(&self) -> Vec<PathBuf> {
        let staging = self.dir.join(&self.host);
        self.names.iter().map(|n| staging.join(n)).collect()
    }
}

/// Groups records by host and keytab directory, in order of first appearance.
pub fn batches(records: &[PrincipalRecord]) -> Vec<Batch> {
    let mut batches = Vec::<Batch>::new();

    for rec in records {
        let dir = Path::new(&rec.keytab_dir);
        let i = match batches.iter().position(|b| b.host == rec.host && b.dir == dir) {
            Some(i) => i,
            None => {
                batches.push(Batch {
                    host: rec.host.clone(),
                    dir: dir.to_owned(),
                    names: Vec::new(),
                });
                batches.len() - 1
            }
        };
        let batch = &mut batches[i];
        if !batch.names.contains(&rec.keytab_name) {
            batch.names.push(rec.keytab_name.clone());
        }
    }
    batches
}

/// Shell snippet run on the destination host before a transfer: it creates the directory and copies
/// the keytabs about to be replaced into the backup directory. Any failing step fails the script.
pub fn backup_script(dir: &Path, names: &[String], backup: &str) -> String {
    format!(
        "set -e; mkdir -p '{dir}'; cd '{dir}'; set --; \
         for f in {names}; do if [ -f \"$f\" ]; then set -- \"$@\" \"$f\"; fi; done; \
         if [ $# -gt 0 ]; then mkdir -p -m 700 '{backup}'; cp -p \"$@\" '{backup}/'; fi",
        dir = dir.display(),
        names = names.iter().map(|n| format!("'{n}'")).collect::<Vec<_>>().join(" "),
    )
}

/// Transfer of keytabs to other hosts.
#[allow(async_fn_in_trait)]
pub trait Remote {
    async fn backup(&self, host: &str, dir: &Path, names: &[String], backup: &str) -> Result<(), exec::Error>;
    async fn sync(&self, host: &str, files: &[PathBuf], dir: &Path) -> Result<(), exec::Error>;
}

/// Remote transfer over ssh and rsync, restricted to public key authentication.
pub struct Ssh {
    ssh: String,
    rsync: String,
    user: Option<String>,
}

impl Ssh {
    pub fn new(ssh: impl Into<String>, rsync: impl Into<String>, user: Option<String>) -> Self {
        Self {
            ssh: ssh.into(),
            rsync: rsync.into(),
            user,
        }
    }

    fn destination(&self, host: &str) -> String {
        match &self.user {
            Some(user) => format!("{user}@{host}"),
            None => host.to_owned(),
        }
    }
}

impl Remote for Ssh {
    #[tracing::instrument(skip(self, names))]
    async fn backup(&self, host: &str, dir: &Path, names: &[String], backup: &str) -> Result<(), exec::Error> {
        let mut cmd = Command::new(&self.ssh);
        cmd.args(SSH_OPTIONS)
            .arg(self.destination(host))
            .arg(backup_script(dir, names, backup));
        exec::run(&mut cmd).await?;
        Ok(())
    }

    #[tracing::instrument(skip(self, files))]
    async fn sync(&self, host: &str, files: &[PathBuf], dir: &Path) -> Result<(), exec::Error> {
        let mut cmd = Command::new(&self.rsync);
        cmd.arg("-a")
            .arg("-e")
            .arg(format!("{} {}", self.ssh, SSH_OPTIONS.join(" ")))
            .args(files)
            .arg(format!("{}:{}/", self.destination(host), dir.display()));
        exec::run(&mut cmd).await?;
        Ok(())
    }
}

/// Copies `src` over `dest` through a temporary file, keeping mode and ownership.
fn copy_preserving(src: &Path, dest: &Path) -> Result<(), Error> {
    let meta = fs::metadata(src).context(LocalCopy { path: dest })?;
    let name = dest.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    let tmp = dest.with_file_name(format!(".{name}.ktdeploy-tmp"));

    match fs::remove_file(&tmp) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => return Err(err).context(LocalCopy { path: &tmp }),
        _ => (),
    }
    fs::copy(src, &tmp).context(LocalCopy { path: &tmp })?;
    unistd::chown(&tmp, Some(Uid::from_raw(meta.uid())), Some(Gid::from_raw(meta.gid())))
        .context(LocalOwner { path: &tmp })?;
    fs::rename(&tmp, dest).context(LocalCopy { path: dest })
}

/// Installs staged keytabs on their target hosts.
pub struct Distributor<'a, R> {
    remote: &'a R,
    local_host: &'a str,
    stamp: &'a str,
}

impl<'a, R: Remote> Distributor<'a, R> {
    pub fn new(remote: &'a R, local_host: &'a str, stamp: &'a str) -> Self {
        Self {
            remote,
            local_host,
            stamp,
        }
    }

    /// Distributes every batch and returns the number of hosts served.
    #[tracing::instrument(skip_all, fields(local_host = self.local_host))]
    pub async fn distribute(&self, records: &[PrincipalRecord]) -> Result<usize, Error> {
        let batches = batches(records);
        let mut hosts = Vec::new();

        for batch in &batches {
            let sources = batch.sources();
            if let Some(missing) = sources.iter().find(|p| !p.is_file()) {
                return MissingKeytab { path: missing }.fail();
            }

            if batch.host.eq_ignore_ascii_case(self.local_host) {
                self.install_local(batch, &sources)?;
            } else {
                self.install_remote(batch, &sources).await?;
            }
            if !hosts.contains(&&batch.host) {
                hosts.push(&batch.host);
            }
        }

        tracing::info!(hosts = hosts.len(), "distributed keytabs");
        Ok(hosts.len())
    }

    fn install_local(&self, batch: &Batch, sources: &[PathBuf]) -> Result<(), Error> {
        tracing::info!(
            host = %batch.host,
            dir = %batch.dir.display(),
            keytabs = batch.names.len(),
            "installing keytabs locally"
        );

        let backup = batch.dir.join(backup_dir_name(self.stamp));
        for name in &batch.names {
            let dest = batch.dir.join(name);
            if !dest.is_file() {
                continue;
            }
            if !backup.is_dir() {
                DirBuilder::new()
                    .mode(0o700)
                    .create(&backup)
                    .context(LocalCopy { path: &backup })?;
            }
            tracing::debug!(path = %dest.display(), "backing up installed keytab");
            copy_preserving(&dest, &backup.join(name))?;
        }

        for (name, src) in batch.names.iter().zip(sources) {
            copy_preserving(src, &batch.dir.join(name))?;
        }
        Ok(())
    }

    async fn install_remote(&self, batch: &Batch, sources: &[PathBuf]) -> Result<(), Error> {
        tracing::info!(
            host = %batch.host,
            dir = %batch.dir.display(),
            keytabs = batch.names.len(),
            "transferring keytabs"
        );

        self.remote
            .backup(&batch.host, &batch.dir, &batch.names, &backup_dir_name(self.stamp))
            .await
            .context(RemoteBackup { host: &batch.host })?;
        self.remote
            .sync(&batch.host, sources, &batch.dir)
            .await
            .context(Transfer { host: &batch.host })
    }
}
