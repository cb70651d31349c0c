// Copyright © 2026 The Goblet Authors
//
// This file is part of goblet, distributed under the terms of the GNU General
// Public License version 3 or later. For full terms see the included LICENSE
// file.

//! Ref enumeration and HEAD symref resolution for the local store.

use crate::{error::Result, oid::Oid, pktline};

/// One advertised ref: a name, the object it points at, and — for annotated
/// tags — the object the tag itself peels to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefAdvertisement {
    pub name: String,
    pub oid: Oid,
    pub peeled: Option<Oid>,
}

/// `HEAD`'s resolution to a branch, one level deep. `ls-refs` advertises
/// this as `HEAD symref-target:<target>` alongside `HEAD`'s own entry; we
/// do not chase symrefs transitively, matching how `git-upload-pack` itself
/// only resolves one hop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymrefTarget {
    pub name: String,
    pub target: String,
}

/// Enumerate every ref in `repo`, HEAD first (if it resolves), then the
/// rest in lexicographic order by name — the order `git-upload-pack`'s
/// advertisement uses.
pub fn read_refs(repo: &git2::Repository) -> Result<Vec<RefAdvertisement>> {
    let mut out = Vec::new();

    if let Some(head) = head_advertisement(repo)? {
        out.push(head);
    }

    let mut rest: Vec<RefAdvertisement> = repo
        .references()?
        .filter_map(|r| r.ok())
        .filter_map(|r| advertisement_for(repo, &r))
        .collect();
    rest.sort_by(|a, b| a.name.cmp(&b.name));
    out.extend(rest);

    Ok(out)
}

/// Resolve `HEAD` to a concrete object, if it points anywhere valid.
pub fn head_advertisement(repo: &git2::Repository) -> Result<Option<RefAdvertisement>> {
    match repo.head() {
        Ok(head) => Ok(head.target().map(|oid| RefAdvertisement {
            name: "HEAD".to_string(),
            oid: oid.into(),
            peeled: None,
        })),
        Err(e) if e.code() == git2::ErrorCode::UnbornBranch || e.code() == git2::ErrorCode::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Resolve `HEAD`'s one-hop symbolic target, e.g. `refs/heads/main`.
pub fn head_symref_target(repo: &git2::Repository) -> Result<Option<SymrefTarget>> {
    let head_ref = match repo.find_reference("HEAD") {
        Ok(r) => r,
        Err(e) if e.code() == git2::ErrorCode::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(head_ref.symbolic_target().map(|target| SymrefTarget {
        name: "HEAD".to_string(),
        target: target.to_string(),
    }))
}

/// One ref line recovered from an upstream `ls-refs` response, for
/// opportunistic mirroring into the local bare repository. Mirroring never
/// transfers objects: it only points local refs at the oids upstream
/// advertised, the way `git ls-remote` lets a caller see what exists
/// upstream without fetching anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirroredRef {
    pub name: String,
    pub oid: Option<Oid>,
    pub symref_target: Option<String>,
}

/// Parse the raw pkt-line bytes of an `ls-refs` v2 response (as rendered by
/// [`crate::http::ls_refs::render`]) back into structured ref lines.
pub async fn parse_ls_refs_response(bytes: &[u8]) -> Result<Vec<MirroredRef>> {
    let mut cursor = std::io::Cursor::new(bytes);
    let frames = pktline::scan_until(&mut cursor, pktline::FrameKind::Flush).await?;

    let mut out = Vec::new();
    for frame in frames {
        if frame.kind != pktline::FrameKind::Data {
            continue;
        }
        let Ok(line) = std::str::from_utf8(&frame.bytes) else { continue };
        let line = line.trim_end_matches('\n');
        let mut parts = line.split(' ');
        let Some(oid_str) = parts.next() else { continue };
        let Some(name) = parts.next() else { continue };

        let mut symref_target = None;
        for attr in parts {
            if let Some(target) = attr.strip_prefix("symref-target=") {
                symref_target = Some(target.to_string());
            }
        }

        let oid = Oid::try_from(oid_str).ok();
        out.push(MirroredRef {
            name: name.to_string(),
            oid,
            symref_target,
        });
    }
    Ok(out)
}

fn advertisement_for(repo: &git2::Repository, r: &git2::Reference) -> Option<RefAdvertisement> {
    let name = r.name()?.to_string();
    let oid = r.target()?;
    let peeled = repo
        .find_tag(oid)
        .ok()
        .map(|tag| Oid::from(tag.target_id()));
    Some(RefAdvertisement {
        name,
        oid: oid.into(),
        peeled,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn head_is_none_on_fresh_bare_repo() {
        let dir = tempdir().unwrap();
        let repo = git2::Repository::init_bare(dir.path()).unwrap();
        assert_eq!(head_advertisement(&repo).unwrap(), None);
    }

    #[test]
    fn empty_repo_has_no_refs() {
        let dir = tempdir().unwrap();
        let repo = git2::Repository::init_bare(dir.path()).unwrap();
        assert!(read_refs(&repo).unwrap().is_empty());
    }

    #[test]
    fn head_symref_target_defaults_to_a_branch_name() {
        let dir = tempdir().unwrap();
        let repo = git2::Repository::init_bare(dir.path()).unwrap();
        let target = head_symref_target(&repo).unwrap().expect("HEAD is symbolic");
        assert!(target.target.starts_with("refs/heads/"));
    }

    #[tokio::test]
    async fn parses_ls_refs_response_with_symref_target() {
        use crate::pktline::Frame;
        use bytes::Bytes;

        let line = format!(
            "{} HEAD symref-target=refs/heads/main\n",
            "4b825dc642cb6eb9a060e54bf8d69288fbee4904"
        );
        let mut buf = Vec::new();
        buf.extend_from_slice(&Frame::data(Bytes::from(line.into_bytes())).encode());
        buf.extend_from_slice(&Frame::flush().encode());

        let mirrored = parse_ls_refs_response(&buf).await.unwrap();
        assert_eq!(mirrored.len(), 1);
        assert_eq!(mirrored[0].name, "HEAD");
        assert_eq!(mirrored[0].symref_target.as_deref(), Some("refs/heads/main"));
    }
}
