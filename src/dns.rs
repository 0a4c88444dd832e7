/*
 * SPDX-FileCopyrightText: Copyright (c) 2023-2025, NVIDIA CORPORATION. All rights reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use nix::{errno::Errno, unistd};
use snafu::prelude::*;
use trust_dns_resolver::{TokioAsyncResolver, error::ResolveError, proto::rr::domain::Name};

#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum Error {
    #[snafu(display("Failed to retrieve the local host name"))]
    Hostname { source: Errno },
    #[snafu(display("Failed to resolve host `{host}`"))]
    ForwardLookup { host: String, source: ResolveError },
    #[snafu(display("Failed to find addresses for host `{host}`"))]
    ForwardAddrs { host: String },
    #[snafu(display("Failed to resolve the address of host `{host}`"))]
    ReverseLookup { host: String, source: ResolveError },
    #[snafu(display("Failed to find host name for host `{host}`"))]
    ReverseHost { host: String },
}

fn canonical(name: &Name) -> String {
    name.to_utf8().trim_end_matches('.').to_lowercase()
}

/// Returns the fully qualified name of this host, resolving the short host name through DNS if needed.
pub async fn local_fqdn() -> Result<String, Error> {
    let host = unistd::gethostname()
        .context(Hostname)?
        .to_string_lossy()
        .into_owned();
    if host.contains('.') {
        return Ok(host.to_lowercase());
    }

    let resolver = TokioAsyncResolver::tokio_from_system_conf().context(ForwardLookup { host: &host })?;

    tracing::debug!(%host, "resolving local host record");
    let addr = resolver
        .lookup_ip(host.as_str())
        .await
        .context(ForwardLookup { host: &host })?
        .iter()
        .next()
        .context(ForwardAddrs { host: &host })?;

    tracing::debug!(%host, address = %addr, "resolving local address record");
    resolver
        .reverse_lookup(addr)
        .await
        .context(ReverseLookup { host: &host })?
        .into_iter()
        .next()
        .as_deref()
        .map(canonical)
        .context(ReverseHost { host: &host })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn canonical_strips_root() {
        let name = Name::from_str("Node1.Example.COM.").unwrap();
        assert_eq!(canonical(&name), "node1.example.com");
    }
}
