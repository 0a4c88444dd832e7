/*
 * SPDX-FileCopyrightText: Copyright (c) 2023-2025, NVIDIA CORPORATION. All rights reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use crate::exec;
use crate::ipa::Directory;
use crate::record::PrincipalRecord;
use crate::trace::*;

use nix::{
    errno::Errno,
    unistd::{self, AccessFlags, Gid, Group, Uid, User},
};
use snafu::prelude::*;
use std::{
    collections::{HashMap, hash_map},
    fs::{self, DirBuilder, Permissions},
    io,
    os::unix::fs::{DirBuilderExt, PermissionsExt},
    path::{Path, PathBuf},
};

pub const BACKUP_PREFIX: &str = "keytab-backups-";
const TEMP_TEMPLATE: &str = ".ktdeploy-XXXXXX";

pub fn backup_dir_name(stamp: &str) -> String {
    format!("{BACKUP_PREFIX}{stamp}")
}

#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum Error {
    #[snafu(display("Conflicting records for `{principal}` on lines {first} and {second}: {reason}"))]
    Conflict {
        principal: String,
        first: usize,
        second: usize,
        reason: String,
    },
    #[snafu(display("Failed to create keytab directory `{}`", path.display()))]
    CreateDir { path: PathBuf, source: io::Error },
    #[snafu(display("Keytab directory `{}` is not writable", path.display()))]
    NotWritable { path: PathBuf, source: Errno },
    #[snafu(display("Failed to back up keytab `{}`", path.display()))]
    Backup { path: PathBuf, source: io::Error },
    #[snafu(display("Failed to create temporary directory in `{}`", path.display()))]
    TempDir { path: PathBuf, source: Errno },
    #[snafu(display("Failed to retrieve keytab for `{principal}`"))]
    Retrieve { principal: String, source: exec::Error },
    #[snafu(display("Failed to move keytab into place at `{}`", path.display()))]
    Relocate { path: PathBuf, source: io::Error },
    #[snafu(display("Failed to change ownership of `{}`", path.display()))]
    Chown { path: PathBuf, source: Errno },
    #[snafu(display("Failed to change permissions of `{}`", path.display()))]
    Chmod { path: PathBuf, source: io::Error },
}

#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum Resolution {
    #[snafu(display("Failed to lookup account `{name}`"))]
    Lookup { name: String, source: Errno },
    #[snafu(display("Unknown user `{name}`"))]
    UnknownUser { name: String },
    #[snafu(display("Unknown group `{name}`"))]
    UnknownGroup { name: String },
}

/// Account resolution and ownership changes on the local host.
pub trait Ownership {
    fn lookup(&self, owner: &str, group: &str) -> Result<(Uid, Gid), Resolution>;
    fn chown(&self, path: &Path, uid: Uid, gid: Gid) -> Result<(), Errno>;
}

pub struct System;

impl Ownership for System {
    fn lookup(&self, owner: &str, group: &str) -> Result<(Uid, Gid), Resolution> {
        let uid = User::from_name(owner)
            .context(Lookup { name: owner })?
            .context(UnknownUser { name: owner })?
            .uid;
        let gid = Group::from_name(group)
            .context(Lookup { name: group })?
            .context(UnknownGroup { name: group })?
            .gid;
        Ok((uid, gid))
    }

    fn chown(&self, path: &Path, uid: Uid, gid: Gid) -> Result<(), Errno> {
        unistd::chown(path, Some(uid), Some(gid))
    }
}

/// Rejects records that would export one principal into differing keytabs, or several principals into one keytab.
pub fn check_conflicts(records: &[PrincipalRecord]) -> Result<(), Error> {
    let mut principals = HashMap::<&str, &PrincipalRecord>::new();
    let mut targets = HashMap::<PathBuf, &PrincipalRecord>::new();

    for rec in records {
        match principals.entry(&rec.principal) {
            hash_map::Entry::Vacant(e) => {
                e.insert(rec);
            }
            hash_map::Entry::Occupied(e) => {
                let first = *e.get();
                let reason = if first.keytab_path() != rec.keytab_path() {
                    Some(format!(
                        "keytab `{}` differs from `{}`",
                        rec.keytab_path().display(),
                        first.keytab_path().display()
                    ))
                } else if (&first.owner, &first.group, &first.perm) != (&rec.owner, &rec.group, &rec.perm) {
                    Some(format!(
                        "ownership {}:{} {} differs from {}:{} {}",
                        rec.owner, rec.group, rec.perm, first.owner, first.group, first.perm
                    ))
                } else {
                    None
                };
                if let Some(reason) = reason {
                    return Conflict {
                        principal: &rec.principal,
                        first: first.line,
                        second: rec.line,
                        reason,
                    }
                    .fail();
                }
            }
        }

        let first = *targets.entry(rec.local_path()).or_insert(rec);
        ensure!(
            first.principal == rec.principal,
            Conflict {
                principal: &rec.principal,
                first: first.line,
                second: rec.line,
                reason: format!(
                    "keytab `{}` on `{}` is already assigned to `{}`",
                    rec.keytab_path().display(),
                    rec.host,
                    first.principal
                ),
            }
        );
    }
    Ok(())
}

/// Private scratch directory removed on drop.
struct Scratch(PathBuf);

impl Scratch {
    fn new(parent: &Path) -> Result<Self, Error> {
        unistd::mkdtemp(&parent.join(TEMP_TEMPLATE))
            .map(Self)
            .context(TempDir { path: parent })
    }
}

impl Drop for Scratch {
    fn drop(&mut self) {
        if let Err(error) = fs::remove_dir_all(&self.0) {
            tracing::warn!(%error, path = %self.0.display(), "could not remove temporary directory");
        }
    }
}

/// Exports keytabs into `<keytab_dir>/<host>/<keytab_name>`, backing up what it replaces.
pub struct Exporter<'a, D, O> {
    dir: &'a D,
    owners: &'a O,
    stamp: &'a str,
}

impl<'a, D: Directory, O: Ownership> Exporter<'a, D, O> {
    pub fn new(dir: &'a D, owners: &'a O, stamp: &'a str) -> Self {
        Self { dir, owners, stamp }
    }

    /// Exports every record and returns the number of keytab files written.
    #[tracing::instrument(skip_all)]
    pub async fn export(&self, records: &[PrincipalRecord]) -> Result<usize, Error> {
        check_conflicts(records)?;

        let mut exported = HashMap::<&str, PathBuf>::new();
        let mut written = 0;

        for rec in records {
            let target = rec.local_path();
            let source = exported.get(rec.principal.as_str());
            if source == Some(&target) {
                tracing::debug!(principal = %rec.principal, path = %target.display(), "keytab already exported");
                continue;
            }

            self.prepare(rec, &target)?;
            match source {
                Some(source) => self.copy(rec, source, &target)?,
                None => self.retrieve(rec, &target).await?,
            }
            self.apply_ownership(rec, &target)?;

            exported.entry(&rec.principal).or_insert(target);
            written += 1;
        }

        tracing::info!(keytabs = written, "exported keytabs");
        Ok(written)
    }

    /// Makes sure the host directory is usable and moves any existing keytab out of the way.
    fn prepare(&self, rec: &PrincipalRecord, target: &Path) -> Result<(), Error> {
        let dir = rec.local_dir();

        if dir.is_dir() {
            unistd::access(&dir, AccessFlags::W_OK).context(NotWritable { path: &dir })?;
        } else {
            tracing::debug!(path = %dir.display(), "creating keytab directory");
            fs::create_dir_all(&rec.keytab_dir).context(CreateDir { path: &rec.keytab_dir })?;
            DirBuilder::new()
                .mode(0o700)
                .create(&dir)
                .context(CreateDir { path: &dir })?;
        }

        if fs::symlink_metadata(target).is_err() {
            return Ok(());
        }
        let backup = dir.join(backup_dir_name(self.stamp));
        if !backup.is_dir() {
            DirBuilder::new()
                .mode(0o700)
                .create(&backup)
                .context(Backup { path: target })?;
        }
        let dest = backup.join(&rec.keytab_name);

        tracing::info!(path = %target.display(), backup = %dest.display(), "backing up existing keytab");
        fs::rename(target, &dest).context(Backup { path: target })
    }

    async fn retrieve(&self, rec: &PrincipalRecord, target: &Path) -> Result<(), Error> {
        let scratch = Scratch::new(&rec.local_dir())?;
        let keytab = scratch.0.join(&rec.keytab_name);

        tracing::info!(
            principal = %rec.principal,
            description = %rec.description,
            path = %target.display(),
            "exporting keytab"
        );
        self.dir
            .get_keytab(&rec.principal, &keytab)
            .await
            .context(Retrieve { principal: &rec.principal })?;
        fs::rename(&keytab, target).context(Relocate { path: target })
    }

    fn copy(&self, rec: &PrincipalRecord, source: &Path, target: &Path) -> Result<(), Error> {
        let scratch = Scratch::new(&rec.local_dir())?;
        let keytab = scratch.0.join(&rec.keytab_name);

        tracing::info!(
            principal = %rec.principal,
            path = %target.display(),
            source = %source.display(),
            "copying exported keytab"
        );
        fs::copy(source, &keytab).context(Relocate { path: target })?;
        fs::rename(&keytab, target).context(Relocate { path: target })
    }

    fn apply_ownership(&self, rec: &PrincipalRecord, target: &Path) -> Result<(), Error> {
        let (uid, gid) = self.owners.lookup(&rec.owner, &rec.group).unwrap_or_else(|error| {
            tracing::warn!(
                error = error.chain(),
                path = %target.display(),
                owner = %rec.owner,
                group = %rec.group,
                "could not resolve keytab ownership, falling back to root"
            );
            (Uid::from_raw(0), Gid::from_raw(0))
        });

        tracing::debug!(path = %target.display(), %uid, %gid, perm = %rec.perm, "applying keytab ownership");
        self.owners.chown(target, uid, gid).context(Chown { path: target })?;
        fs::set_permissions(target, Permissions::from_mode(rec.mode())).context(Chmod { path: target })
    }
}
