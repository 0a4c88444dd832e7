/*
 * SPDX-FileCopyrightText: Copyright (c) 2023-2025, NVIDIA CORPORATION. All rights reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use crate::distribute::Remote;
use crate::exec;
use crate::export::{Ownership, Resolution};
use crate::ipa::{Directory, Entry, NewUser};
use crate::krb::CredentialCheck;
use crate::prompt::{self, Confirm};
use crate::record::{self, PrincipalRecord};

use nix::{
    errno::Errno,
    unistd::{Gid, Uid},
};
use std::{
    cell::RefCell,
    collections::HashMap,
    fs,
    io::{self, Write},
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    process::ExitStatus,
    sync::{Arc, Mutex},
};
use tracing::subscriber::DefaultGuard;

pub fn records(lines: &[&str]) -> Vec<PrincipalRecord> {
    record::parse_records(&lines.join("\n")).unwrap()
}

pub fn failure(program: &str) -> exec::Error {
    use std::os::unix::process::ExitStatusExt;

    exec::Error::Status {
        program: program.to_owned(),
        status: ExitStatus::from_raw(1 << 8),
        stderr: "injected failure".to_owned(),
    }
}

/// In-memory directory recording every mutating call.
#[derive(Default)]
pub struct FakeDirectory {
    pub entries: RefCell<HashMap<Entry, Vec<String>>>,
    pub calls: RefCell<Vec<String>>,
    pub fail: Option<&'static str>,
}

impl FakeDirectory {
    pub fn with(entries: &[(Entry, &str)]) -> Self {
        let dir = Self::default();
        for (entry, name) in entries {
            dir.entries.borrow_mut().entry(*entry).or_default().push(name.to_string());
        }
        dir
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    fn record(&self, call: String) -> Result<(), exec::Error> {
        let failed = self.fail.is_some_and(|f| call.starts_with(f));
        self.calls.borrow_mut().push(call);
        match failed {
            true => Err(failure("ipa")),
            false => Ok(()),
        }
    }

    fn add(&self, entry: Entry, name: &str) {
        self.entries.borrow_mut().entry(entry).or_default().push(name.to_owned());
    }
}

impl Directory for FakeDirectory {
    async fn list(&self, entry: Entry) -> Result<Vec<String>, exec::Error> {
        Ok(self.entries.borrow().get(&entry).cloned().unwrap_or_default())
    }

    async fn add_host(&self, host: &str) -> Result<(), exec::Error> {
        self.record(format!("host-add {host}"))?;
        self.add(Entry::Host, host);
        Ok(())
    }

    async fn add_user(&self, user: &NewUser<'_>) -> Result<(), exec::Error> {
        self.record(format!("user-add {} {} {}", user.login, user.display_name, user.email))?;
        self.add(Entry::User, user.login);
        Ok(())
    }

    async fn add_service(&self, principal: &str) -> Result<(), exec::Error> {
        self.record(format!("service-add {principal}"))?;
        self.add(Entry::Service, principal);
        Ok(())
    }

    async fn get_keytab(&self, principal: &str, path: &Path) -> Result<(), exec::Error> {
        self.record(format!("getkeytab {principal}"))?;
        fs::write(path, format!("keytab for {principal}")).map_err(|source: io::Error| exec::Error::Spawn {
            program: "ipa-getkeytab".to_owned(),
            source,
        })
    }
}

/// Ownership provider knowing `hdfs` (1001), `yarn` (1003) and the `hadoop` group (1002).
#[derive(Default)]
pub struct FakeOwnership {
    pub chowned: RefCell<Vec<(PathBuf, u32, u32)>>,
    pub deny_chown: bool,
}

impl FakeOwnership {
    pub fn chowned(&self) -> Vec<(PathBuf, u32, u32)> {
        self.chowned.borrow().clone()
    }
}

impl Ownership for FakeOwnership {
    fn lookup(&self, owner: &str, group: &str) -> Result<(Uid, Gid), Resolution> {
        let uid = match owner {
            "hdfs" => 1001,
            "yarn" => 1003,
            _ => return Err(Resolution::UnknownUser { name: owner.to_owned() }),
        };
        let gid = match group {
            "hadoop" => 1002,
            _ => return Err(Resolution::UnknownGroup { name: group.to_owned() }),
        };
        Ok((Uid::from_raw(uid), Gid::from_raw(gid)))
    }

    fn chown(&self, path: &Path, uid: Uid, gid: Gid) -> Result<(), Errno> {
        if self.deny_chown {
            return Err(Errno::EPERM);
        }
        self.chowned
            .borrow_mut()
            .push((path.to_owned(), uid.as_raw(), gid.as_raw()));
        Ok(())
    }
}

/// Remote transport recording backups and transfers.
#[derive(Default)]
pub struct FakeRemote {
    pub calls: RefCell<Vec<String>>,
    pub fail_host: Option<&'static str>,
}

impl FakeRemote {
    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }
}

impl Remote for FakeRemote {
    async fn backup(&self, host: &str, dir: &Path, names: &[String], backup: &str) -> Result<(), exec::Error> {
        self.calls
            .borrow_mut()
            .push(format!("backup {host} {} {} {backup}", dir.display(), names.join(",")));
        match self.fail_host == Some(host) {
            true => Err(failure("ssh")),
            false => Ok(()),
        }
    }

    async fn sync(&self, host: &str, files: &[PathBuf], dir: &Path) -> Result<(), exec::Error> {
        let files = files
            .iter()
            .filter_map(|f| f.file_name())
            .map(|f| f.to_string_lossy())
            .collect::<Vec<_>>();
        self.calls
            .borrow_mut()
            .push(format!("sync {host} {} {}", files.join(","), dir.display()));
        Ok(())
    }
}

pub struct Ticket(pub bool);

impl CredentialCheck for Ticket {
    async fn has_valid_ticket(&self) -> Result<bool, exec::Error> {
        Ok(self.0)
    }
}

impl Confirm for bool {
    async fn confirm(&mut self, _: &str) -> Result<bool, prompt::Error> {
        Ok(*self)
    }
}

/// Events logged on the current thread while the guard is held.
#[derive(Clone, Default)]
pub struct Logs(Arc<Mutex<Vec<u8>>>);

impl Logs {
    pub fn capture() -> (Self, DefaultGuard) {
        let logs = Self::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        (logs, tracing::subscriber::set_default(subscriber))
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for Logs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Writes an executable at `dir/name` that appends `$LC_ALL|<args>` to `dir/name.log`, prints `stdout`
/// and exits with `status`.
pub fn recorder(dir: &Path, name: &str, stdout: &str, status: i32) -> String {
    let path = dir.join(name);
    let log = dir.join(format!("{name}.log"));
    let stdout = match stdout.is_empty() || stdout.ends_with('\n') {
        true => stdout.to_owned(),
        false => format!("{stdout}\n"),
    };
    let script = format!(
        "#!/bin/sh\nprintf '%s|%s\\n' \"$LC_ALL\" \"$*\" >> '{}'\ncat <<'EOF'\n{stdout}EOF\nexit {status}\n",
        log.display()
    );
    fs::write(&path, script).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path.display().to_string()
}

fn invocations(dir: &Path, name: &str) -> Vec<(String, String)> {
    fs::read_to_string(dir.join(format!("{name}.log")))
        .unwrap_or_default()
        .lines()
        .filter_map(|l| l.split_once('|'))
        .map(|(locale, args)| (locale.to_owned(), args.to_owned()))
        .collect()
}

/// Arguments of every invocation logged by the recorder `name` in `dir`.
pub fn recorded(dir: &Path, name: &str) -> Vec<String> {
    invocations(dir, name).into_iter().map(|(_, args)| args).collect()
}

/// `LC_ALL` of every invocation logged by the recorder `name` in `dir`.
pub fn recorded_locales(dir: &Path, name: &str) -> Vec<String> {
    invocations(dir, name).into_iter().map(|(locale, _)| locale).collect()
}
