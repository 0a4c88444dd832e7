/*
 * SPDX-FileCopyrightText: Copyright (c) 2023-2025, NVIDIA CORPORATION. All rights reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use crate::exec;
use crate::inventory::Inventory;
use crate::ipa::{Directory, Entry, NewUser};
use crate::record::{Kind, PrincipalRecord};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Summary {
    pub hosts: usize,
    pub users: usize,
    pub services: usize,
    pub skipped: usize,
}

impl Summary {
    pub fn created(&self) -> usize {
        self.hosts + self.users + self.services
    }
}

/// Creates the directory entries missing for a set of records.
pub struct Reconciler<'a, D> {
    dir: &'a D,
    inventory: Inventory,
    email_domain: Option<String>,
    dry_run: bool,
}

impl<'a, D: Directory> Reconciler<'a, D> {
    pub fn new(dir: &'a D, inventory: Inventory) -> Self {
        Self {
            dir,
            inventory,
            email_domain: None,
            dry_run: false,
        }
    }

    pub fn email_domain(mut self, domain: Option<String>) -> Self {
        self.email_domain = domain;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Walks the records in order, creating hosts, service principals and users that are not in the inventory.
    #[tracing::instrument(skip_all, fields(dry_run = self.dry_run))]
    pub async fn reconcile(&mut self, records: &[PrincipalRecord]) -> Result<Summary, exec::Error> {
        let mut summary = Summary::default();

        for rec in records {
            match rec.kind() {
                Kind::Service => {
                    self.ensure_host(&rec.host, &mut summary).await?;
                    self.ensure_service(&rec.principal, &mut summary).await?;
                }
                Kind::User => self.ensure_user(rec, &mut summary).await?,
            }
        }

        tracing::info!(
            hosts = summary.hosts,
            users = summary.users,
            services = summary.services,
            skipped = summary.skipped,
            "reconciled directory entries"
        );
        Ok(summary)
    }

    fn exists(&self, entry: Entry, name: &str, summary: &mut Summary) -> bool {
        let found = self.inventory.contains(entry, name);
        if found {
            tracing::debug!(%entry, %name, "entry already exists");
            summary.skipped += 1;
        }
        found
    }

    async fn ensure_host(&mut self, host: &str, summary: &mut Summary) -> Result<(), exec::Error> {
        if self.exists(Entry::Host, host, summary) {
            return Ok(());
        }
        tracing::info!(%host, "creating host");
        if !self.dry_run {
            self.dir.add_host(host).await?;
        }
        self.inventory.insert(Entry::Host, host);
        summary.hosts += 1;
        Ok(())
    }

    async fn ensure_service(&mut self, principal: &str, summary: &mut Summary) -> Result<(), exec::Error> {
        if self.exists(Entry::Service, principal, summary) {
            return Ok(());
        }
        tracing::info!(%principal, "creating service principal");
        if !self.dry_run {
            self.dir.add_service(principal).await?;
        }
        self.inventory.insert(Entry::Service, principal);
        summary.services += 1;
        Ok(())
    }

    async fn ensure_user(&mut self, rec: &PrincipalRecord, summary: &mut Summary) -> Result<(), exec::Error> {
        if self.exists(Entry::User, &rec.user, summary) {
            return Ok(());
        }
        let domain = self
            .email_domain
            .clone()
            .unwrap_or_else(|| rec.domain.to_lowercase());
        let email = format!("{}@{}", rec.user, domain);

        tracing::info!(user = %rec.user, principal = %rec.principal, "creating user");
        if !self.dry_run {
            let user = NewUser {
                login: &rec.user,
                display_name: &rec.principal,
                email: &email,
            };
            self.dir.add_user(&user).await?;
        }
        self.inventory.insert(Entry::User, &rec.user);
        summary.users += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeDirectory, records};

    const HDFS: &str = "node1.example.com,HDFS,hdfs@EXAMPLE.COM,hdfs.keytab,/etc/security/keytabs,hdfs,hadoop,0400";
    const NN: &str =
        "node1.example.com,NameNode,nn/node1.example.com@EXAMPLE.COM,nn.service.keytab,/etc/security/keytabs,hdfs,hadoop,0400";
    const DN: &str =
        "node1.example.com,DataNode,dn/node1.example.com@EXAMPLE.COM,dn.service.keytab,/etc/security/keytabs,hdfs,hadoop,0400";

    async fn reconcile(dir: &FakeDirectory, lines: &[&str]) -> Summary {
        let inventory = Inventory::fetch(dir).await.unwrap();
        Reconciler::new(dir, inventory)
            .reconcile(&records(lines))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn creates_missing_user() {
        let dir = FakeDirectory::default();
        let summary = reconcile(&dir, &[HDFS]).await;

        assert_eq!(dir.calls(), vec!["user-add hdfs hdfs@EXAMPLE.COM hdfs@example.com"]);
        assert_eq!(summary.users, 1);
        assert_eq!(summary.created(), 1);
    }

    #[tokio::test]
    async fn creates_host_before_service() {
        let dir = FakeDirectory::default();
        reconcile(&dir, &[NN]).await;

        assert_eq!(
            dir.calls(),
            vec!["host-add node1.example.com", "service-add nn/node1.example.com@EXAMPLE.COM"]
        );
    }

    #[tokio::test]
    async fn skips_existing_entries() {
        let dir = FakeDirectory::with(&[
            (Entry::Host, "node1.example.com"),
            (Entry::Service, "nn/node1.example.com@EXAMPLE.COM"),
            (Entry::User, "hdfs"),
        ]);
        let summary = reconcile(&dir, &[HDFS, NN]).await;

        assert!(dir.calls().is_empty());
        assert_eq!(summary.skipped, 3);
    }

    #[tokio::test]
    async fn creates_each_entry_once_per_run() {
        let dir = FakeDirectory::default();
        let summary = reconcile(&dir, &[NN, DN, HDFS, HDFS, NN]).await;

        assert_eq!(
            dir.calls(),
            vec![
                "host-add node1.example.com",
                "service-add nn/node1.example.com@EXAMPLE.COM",
                "service-add dn/node1.example.com@EXAMPLE.COM",
                "user-add hdfs hdfs@EXAMPLE.COM hdfs@example.com",
            ]
        );
        assert_eq!(summary.hosts, 1);
        assert_eq!(summary.services, 2);
        assert_eq!(summary.users, 1);
    }

    #[tokio::test]
    async fn second_run_is_idempotent() {
        let dir = FakeDirectory::default();
        reconcile(&dir, &[HDFS, NN, DN]).await;
        let first = dir.calls().len();

        let summary = reconcile(&dir, &[HDFS, NN, DN]).await;
        assert_eq!(dir.calls().len(), first);
        assert_eq!(summary.created(), 0);
    }

    #[tokio::test]
    async fn uses_configured_email_domain() {
        let dir = FakeDirectory::default();
        Reconciler::new(&dir, Inventory::default())
            .email_domain(Some("corp.example.org".into()))
            .reconcile(&records(&[HDFS]))
            .await
            .unwrap();

        assert_eq!(dir.calls(), vec!["user-add hdfs hdfs@EXAMPLE.COM hdfs@corp.example.org"]);
    }

    #[tokio::test]
    async fn dry_run_plans_without_calls() {
        let dir = FakeDirectory::default();
        let summary = Reconciler::new(&dir, Inventory::default())
            .dry_run(true)
            .reconcile(&records(&[NN, HDFS, HDFS]))
            .await
            .unwrap();

        assert!(dir.calls().is_empty());
        assert_eq!(summary.created(), 3);
        assert_eq!(summary.skipped, 1);
    }

    #[tokio::test]
    async fn creation_failure_stops_run() {
        let dir = FakeDirectory {
            fail: Some("service-add"),
            ..Default::default()
        };
        let res = Reconciler::new(&dir, Inventory::default())
            .reconcile(&records(&[NN, HDFS]))
            .await;

        assert!(res.is_err());
        assert_eq!(
            dir.calls(),
            vec!["host-add node1.example.com", "service-add nn/node1.example.com@EXAMPLE.COM"]
        );
    }
}
