// Copyright © 2026 The Goblet Authors
//
// This file is part of goblet, distributed under the terms of the GNU General
// Public License version 3 or later. For full terms see the included LICENSE
// file.

//! The HTTP surface: protocol dispatch, routing, authorization and the
//! (currently unused) blob store seam.

pub mod auth;
pub mod blobstore;
pub mod dispatch;
pub mod fetch;
pub mod ls_refs;
pub mod router;

pub use dispatch::AppState;
pub use router::build as build_router;
