// src/repository/extension.rs

//! Lazy loading of extension metadata
//!
//! Registered with the pool as its [`StubLoader`]. The first time file
//! lists or delta information of a repository are needed, the cache is
//! tried first; on a miss the extension file is fetched, parsed, attached
//! to the repo and written back to the cache.

use super::parsers::rpmmd;
use super::{Fetcher, MetadataKind, RepoCache, RepoDescriptor};
use crate::error::Result;
use crate::pool::{ExtensionKind, ExtensionStub, Repo, StubLoader};
use std::collections::HashMap;
use std::io::BufReader;
use tracing::{info, warn};

/// Loads extension stubs for the configured repositories
pub struct RepoExtensionLoader {
    cache: RepoCache,
    fetcher: Fetcher,
    repos: HashMap<String, RepoDescriptor>,
}

impl RepoExtensionLoader {
    pub fn new(cache: RepoCache, fetcher: Fetcher, repos: impl IntoIterator<Item = RepoDescriptor>) -> Self {
        Self {
            cache,
            fetcher,
            repos: repos.into_iter().map(|d| (d.alias.clone(), d)).collect(),
        }
    }

    fn fetch_and_attach(&self, desc: &RepoDescriptor, repo: &mut Repo, stub: &ExtensionStub) -> Result<bool> {
        let Some(file) = self
            .fetcher
            .fetch(desc, &stub.location, true, Some(&stub.checksum))
            .into_file()
        else {
            return Ok(false);
        };
        let reader = BufReader::new(file.reader()?);

        match stub.kind {
            ExtensionKind::FileLists => {
                let mut attached = 0;
                for list in rpmmd::parse_filelists(reader)? {
                    if let Some(index) = repo.find(&list.name, &list.evr, &list.arch) {
                        repo.solvables[index].filelist = list.files;
                        attached += 1;
                    }
                }
                info!("{}: attached {} file lists", desc.alias, attached);
            }
            ExtensionKind::DeltaInfo => {
                let deltas = rpmmd::parse_deltainfo(reader)?;
                info!("{}: {} delta rpms available", desc.alias, deltas.len());
                repo.deltas.extend(deltas);
            }
        }
        Ok(true)
    }
}

impl StubLoader for RepoExtensionLoader {
    fn load_stub(&mut self, repo: &mut Repo, stub: &ExtensionStub) -> bool {
        let Some(mut desc) = self.repos.get(&repo.name).cloned() else {
            return false;
        };
        // Only rpm-md repositories publish extension data
        if desc.kind != MetadataKind::RpmMd {
            return false;
        }

        if self.cache.load(&mut desc, repo, Some(stub.kind), false) {
            info!("[{}:{} cached]", desc.alias, stub.kind);
            return true;
        }
        info!("[{}:{} fetching]", desc.alias, stub.kind);

        match self.fetch_and_attach(&desc, repo, stub) {
            Ok(true) => {
                self.cache.store(&mut desc, repo, Some(stub.kind));
                self.repos.insert(desc.alias.clone(), desc);
                true
            }
            Ok(false) => false,
            Err(e) => {
                warn!("{}: failed to load {}: {}", desc.alias, stub.location, e);
                false
            }
        }
    }
}
