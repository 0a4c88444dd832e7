/*
 * SPDX-FileCopyrightText: Copyright (c) 2023-2025, NVIDIA CORPORATION. All rights reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use regex_lite::Regex;
use snafu::prelude::*;
use std::{
    fmt, fs, io,
    path::{Path, PathBuf},
    sync::LazyLock,
};

pub const FIELD_COUNT: usize = 8;

const HOSTNAME: &str = r"[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?)*";
const DESCRIPTION: &str = r"[A-Za-z0-9 _-]+";
const PRIMARY: &str = r"[A-Za-z0-9_][A-Za-z0-9_.-]*";
const FILENAME: &str = r"[A-Za-z0-9_][A-Za-z0-9_.-]*";
const DIRECTORY: &str = r"(?:/[A-Za-z0-9_.][A-Za-z0-9_.-]*)+/?";
const ACCOUNT: &str = r"[A-Za-z_][A-Za-z0-9_.-]{0,31}\$?";
const PERMISSION: &str = r"0?[0-7]{3}";

fn anchored(pattern: &str) -> Regex {
    match Regex::new(&format!("^(?:{pattern})$")) {
        Ok(re) => re,
        Err(err) => panic!("invalid field pattern `{pattern}`: {err}"),
    }
}

static HOSTNAME_RE: LazyLock<Regex> = LazyLock::new(|| anchored(HOSTNAME));
static DESCRIPTION_RE: LazyLock<Regex> = LazyLock::new(|| anchored(DESCRIPTION));
static PRIMARY_RE: LazyLock<Regex> = LazyLock::new(|| anchored(PRIMARY));
static FILENAME_RE: LazyLock<Regex> = LazyLock::new(|| anchored(FILENAME));
static DIRECTORY_RE: LazyLock<Regex> = LazyLock::new(|| anchored(DIRECTORY));
static ACCOUNT_RE: LazyLock<Regex> = LazyLock::new(|| anchored(ACCOUNT));
static PERMISSION_RE: LazyLock<Regex> = LazyLock::new(|| anchored(PERMISSION));

#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum Error {
    #[snafu(display("Failed to read input file `{}`", path.display()))]
    Read { path: PathBuf, source: io::Error },
    #[snafu(display("Line {line}: expected {FIELD_COUNT} comma-separated fields, found {found}"))]
    Format { line: usize, found: usize },
    #[snafu(display("Line {line}: invalid {field} `{value}`, expected `{expected}`"))]
    Validation {
        line: usize,
        field: &'static str,
        value: String,
        expected: &'static str,
    },
    #[snafu(display("Line {line}: principal `{principal}` is bound to host `{component}` but the record targets `{host}`"))]
    Consistency {
        line: usize,
        principal: String,
        component: String,
        host: String,
    },
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Kind {
    User,
    Service,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Kind::User => f.write_str("user"),
            Kind::Service => f.write_str("service"),
        }
    }
}

/// One line of the input file, validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrincipalRecord {
    pub line: usize,
    pub host: String,
    pub description: String,
    pub principal: String,
    pub user: String,
    pub host_component: Option<String>,
    pub domain: String,
    pub keytab_name: String,
    pub keytab_dir: String,
    pub owner: String,
    pub group: String,
    pub perm: String,
}

impl PrincipalRecord {
    pub fn kind(&self) -> Kind {
        if self.host_component.is_some() {
            Kind::Service
        } else {
            Kind::User
        }
    }

    /// Path the keytab ends up at on its target host.
    pub fn keytab_path(&self) -> PathBuf {
        Path::new(&self.keytab_dir).join(&self.keytab_name)
    }

    /// Staging directory holding the exported keytabs of this record's host.
    pub fn local_dir(&self) -> PathBuf {
        Path::new(&self.keytab_dir).join(&self.host)
    }

    pub fn local_path(&self) -> PathBuf {
        self.local_dir().join(&self.keytab_name)
    }

    pub fn mode(&self) -> u32 {
        // Validated as octal digits.
        u32::from_str_radix(&self.perm, 8).unwrap_or(0o400)
    }
}

fn validate(
    line: usize,
    field: &'static str,
    value: &str,
    re: &Regex,
    expected: &'static str,
) -> Result<String, Error> {
    ensure!(
        re.is_match(value),
        Validation {
            line,
            field,
            value,
            expected,
        }
    );
    Ok(value.to_owned())
}

fn validate_dir(line: usize, value: &str) -> Result<String, Error> {
    let dir = validate(line, "keytab directory", value, &DIRECTORY_RE, DIRECTORY)?;
    ensure!(
        !dir.split('/').any(|c| c == "." || c == ".."),
        Validation {
            line,
            field: "keytab directory",
            value,
            expected: "a path without `.` or `..` components",
        }
    );
    Ok(dir.trim_end_matches('/').to_owned())
}

fn validate_name(line: usize, value: &str) -> Result<String, Error> {
    let name = validate(line, "keytab name", value, &FILENAME_RE, FILENAME)?;
    ensure!(
        name != "." && name != "..",
        Validation {
            line,
            field: "keytab name",
            value,
            expected: FILENAME,
        }
    );
    Ok(name)
}

/// Splits `primary[/host]@realm` into its components.
fn parse_principal(line: usize, value: &str) -> Result<(String, Option<String>, String), Error> {
    let invalid = || Error::Validation {
        line,
        field: "principal",
        value: value.to_owned(),
        expected: "primary[/host]@REALM",
    };

    let (name, domain) = value.rsplit_once('@').ok_or_else(invalid)?;
    let (user, host) = match name.split_once('/') {
        Some((user, host)) => (user, Some(host)),
        None => (name, None),
    };

    if !PRIMARY_RE.is_match(user) || !HOSTNAME_RE.is_match(domain) {
        return Err(invalid());
    }
    if host.is_some_and(|h| !HOSTNAME_RE.is_match(h)) {
        return Err(invalid());
    }
    Ok((user.to_owned(), host.map(str::to_owned), domain.to_owned()))
}

/// Parses one input line (1-based `line` number) into a record.
pub fn parse_line(line: usize, text: &str) -> Result<PrincipalRecord, Error> {
    let fields = text.split(',').map(str::trim).collect::<Vec<_>>();
    ensure!(
        fields.len() == FIELD_COUNT,
        Format {
            line,
            found: fields.len()
        }
    );
    let [host, description, principal, keytab_name, keytab_dir, owner, group, perm] = fields[..] else {
        return Format { line, found: fields.len() }.fail();
    };

    let host = validate(line, "host", host, &HOSTNAME_RE, HOSTNAME)?;
    let description = validate(line, "description", description, &DESCRIPTION_RE, DESCRIPTION)?;
    let (user, host_component, domain) = parse_principal(line, principal)?;
    let keytab_name = validate_name(line, keytab_name)?;
    let keytab_dir = validate_dir(line, keytab_dir)?;
    let owner = validate(line, "owner", owner, &ACCOUNT_RE, ACCOUNT)?;
    let group = validate(line, "group", group, &ACCOUNT_RE, ACCOUNT)?;
    let perm = validate(line, "permission", perm, &PERMISSION_RE, PERMISSION)?;

    if let Some(component) = &host_component {
        ensure!(
            *component == host,
            Consistency {
                line,
                principal,
                component,
                host,
            }
        );
    }

    Ok(PrincipalRecord {
        line,
        host,
        description,
        principal: principal.to_owned(),
        user,
        host_component,
        domain,
        keytab_name,
        keytab_dir,
        owner,
        group,
        perm,
    })
}

/// Parses a whole input document, stopping at the first invalid line. Only blank lines at the end of the
/// document are ignored.
pub fn parse_records(input: &str) -> Result<Vec<PrincipalRecord>, Error> {
    let lines = input.lines().collect::<Vec<_>>();
    let end = lines
        .iter()
        .rposition(|text| !text.trim().is_empty())
        .map_or(0, |i| i + 1);

    lines[..end]
        .iter()
        .enumerate()
        .map(|(n, text)| parse_line(n + 1, text))
        .collect()
}

#[tracing::instrument(skip_all, fields(path = %path.display()))]
pub fn read_records(path: &Path) -> Result<Vec<PrincipalRecord>, Error> {
    let input = fs::read_to_string(path).context(Read { path })?;
    let records = parse_records(&input)?;

    tracing::info!(records = records.len(), "loaded principal records");
    Ok(records)
}
