/*
 * SPDX-FileCopyrightText: Copyright (c) 2023-2025, NVIDIA CORPORATION. All rights reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use crate::exec;
use crate::ipa::{Directory, Entry};

use std::collections::HashSet;

/// Snapshot of the entries present in the directory, augmented with what this run creates.
#[derive(Debug, Default, Clone)]
pub struct Inventory {
    hosts: HashSet<String>,
    users: HashSet<String>,
    services: HashSet<String>,
}

impl Inventory {
    #[tracing::instrument(skip_all)]
    pub async fn fetch<D: Directory>(dir: &D) -> Result<Self, exec::Error> {
        let mut inventory = Self::default();

        for host in dir.list(Entry::Host).await? {
            inventory.insert(Entry::Host, &host);
        }
        for user in dir.list(Entry::User).await? {
            inventory.insert(Entry::User, &user);
        }
        for service in dir.list(Entry::Service).await? {
            inventory.insert(Entry::Service, &service);
        }

        tracing::info!(
            hosts = inventory.len(Entry::Host),
            users = inventory.len(Entry::User),
            services = inventory.len(Entry::Service),
            "fetched directory inventory"
        );
        Ok(inventory)
    }

    fn key(entry: Entry, name: &str) -> String {
        // Host names and logins are case-insensitive in the directory.
        match entry {
            Entry::Host | Entry::User => name.to_lowercase(),
            Entry::Service => name.to_owned(),
        }
    }

    fn set(&self, entry: Entry) -> &HashSet<String> {
        match entry {
            Entry::Host => &self.hosts,
            Entry::User => &self.users,
            Entry::Service => &self.services,
        }
    }

    pub fn contains(&self, entry: Entry, name: &str) -> bool {
        self.set(entry).contains(&Self::key(entry, name))
    }

    pub fn insert(&mut self, entry: Entry, name: &str) -> bool {
        let key = Self::key(entry, name);
        match entry {
            Entry::Host => self.hosts.insert(key),
            Entry::User => self.users.insert(key),
            Entry::Service => self.services.insert(key),
        }
    }

    pub fn len(&self, entry: Entry) -> usize {
        self.set(entry).len()
    }
}
