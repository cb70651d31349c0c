// Copyright © 2026 The Goblet Authors
//
// This file is part of goblet, distributed under the terms of the GNU General
// Public License version 3 or later. For full terms see the included LICENSE
// file.

//! Interface seam for an external pack-object blob store.
//!
//! The on-disk bare repository (`store::Store`) is the only storage backend
//! wired up today. This trait exists so a future deployment can interpose a
//! content-addressed blob cache (S3, a local object store) in front of the
//! local git store without changing the dispatcher; nothing in this crate
//! currently implements or calls it.

use async_trait::async_trait;
use bytes::Bytes;

use crate::{error::Error, oid::Oid};

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn get(&self, oid: &Oid) -> Result<Option<Bytes>, Error>;
    async fn put(&self, oid: &Oid, data: Bytes) -> Result<(), Error>;
}
